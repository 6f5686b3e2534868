//! Interfaces to the simulation backend. The pipeline only configures and queries these
//! collaborators; the engine, radio stack, IP stack, applications and flow monitor all live on
//! the other side of these traits.

use std::net::Ipv4Addr;
use std::path::Path;

use crate::bearer::Qci;
use crate::network::types::{DeviceId, Node, NodeId};
use crate::spec::RngConfig;
use crate::traffic::Protocol;
use crate::units::{BitsPerSec, Bytes, Nanosecs};

identifier!(AppId, usize);

identifier!(FlowId, u32);

/// The discrete-event engine.
pub trait Engine {
    /// Selects the engine's random stream. Called first, before any node is registered.
    fn seed(&mut self, rng: RngConfig);

    /// Registers positioned nodes. Called once, before anything else is installed.
    fn add_nodes(&mut self, nodes: &[Node]);

    fn stop_at(&mut self, at: Nanosecs);

    /// Runs until the stop time.
    fn run(&mut self) -> Result<(), EngineWarning>;

    /// Releases every simulation object.
    fn destroy(&mut self);
}

/// The radio access stack.
pub trait RadioStack {
    fn set_scheduler_type(&mut self, name: &str);

    fn set_pathloss_model(&mut self, name: &str);

    /// Downlink and uplink bandwidth, in resource blocks.
    fn set_bandwidth(&mut self, rbs: u8);

    fn install_base_station_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId>;

    fn install_terminal_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId>;

    fn attach(&mut self, terminal: DeviceId, base_station: DeviceId);

    fn activate_bearer(&mut self, terminals: &[DeviceId], qci: Qci);
}

/// The IP stack.
pub trait IpStack {
    fn install_stack(&mut self, nodes: &[NodeId]);

    /// Joins the gateway and the remote host with a point-to-point link, returning the remote
    /// host's address on it.
    fn connect_core(&mut self, gateway: NodeId, remote_host: NodeId, link: &CoreLink) -> Ipv4Addr;

    /// Assigns one address per terminal device, in order.
    fn assign_terminal_addresses(&mut self, devices: &[DeviceId]) -> Vec<Ipv4Addr>;

    /// The default gateway address of every terminal.
    fn terminal_gateway(&self) -> Ipv4Addr;

    fn set_default_route(&mut self, node: NodeId, gateway: Ipv4Addr);

    fn add_network_route(&mut self, node: NodeId, network: Ipv4Addr, mask: Ipv4Addr);
}

/// Packet sinks and constant-rate clients.
pub trait Applications {
    fn install_server(&mut self, node: NodeId, protocol: Protocol, port: u16) -> AppId;

    fn install_client(&mut self, node: NodeId, params: &ClientParams) -> AppId;

    fn start(&mut self, app: AppId, at: Nanosecs);
}

/// The flow monitor.
pub trait Monitor {
    /// Installs probes on every node.
    fn install_all(&mut self);

    fn check_for_lost_packets(&mut self) {}

    fn flow_stats(&self) -> Result<Vec<(FlowId, FlowStats)>, MonitorError>;

    fn classify(&self, flow: FlowId) -> Option<FiveTuple>;

    /// Writes the monitor's native report.
    fn serialize_to_file(&self, path: &Path) -> Result<(), MonitorError>;
}

/// Everything a scenario needs from its backend.
pub trait Backend: Engine + RadioStack + IpStack + Applications + Monitor {}

impl<T> Backend for T where T: Engine + RadioStack + IpStack + Applications + Monitor {}

/// Client application parameters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClientParams {
    pub protocol: Protocol,
    pub dst: Ipv4Addr,
    pub port: u16,
    pub interval: Nanosecs,
    pub packet_size: Bytes,
    pub max_packets: u64,
}

/// The point-to-point link between the gateway and the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CoreLink {
    #[builder(default = crate::constants::CORE_DATA_RATE)]
    pub data_rate: BitsPerSec,
    #[builder(default = crate::constants::CORE_MTU)]
    pub mtu: u16,
    #[builder(default = crate::constants::CORE_DELAY)]
    pub delay: Nanosecs,
}

impl Default for CoreLink {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Flow identification as seen by the IPv4 classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FiveTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl std::fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src, self.src_port, self.dst, self.dst_port, self.protocol
        )
    }
}

/// Per-flow counters recorded by the monitor. Receive timestamps are absent until the first
/// packet arrives.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: Bytes,
    pub rx_bytes: Bytes,
    pub lost_packets: u64,
    pub time_first_tx: Nanosecs,
    pub time_last_tx: Nanosecs,
    pub time_first_rx: Option<Nanosecs>,
    pub time_last_rx: Option<Nanosecs>,
    pub delay_sum: Nanosecs,
}

/// The engine finished with a condition worth reporting. The scenario still tears down and is
/// measured.
#[derive(Debug, thiserror::Error)]
pub enum EngineWarning {
    #[error("simulation exited with status {0}")]
    ExitStatus(i32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The monitor report is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor was never installed")]
    NotInstalled,

    #[error("monitor report unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
