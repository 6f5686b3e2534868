//! Fixtures and a scripted backend for tests.

use std::net::Ipv4Addr;
use std::path::Path;

use crate::backend::{
    AppId, Applications, ClientParams, CoreLink, Engine, EngineWarning, FiveTuple, FlowId,
    FlowStats, IpStack, Monitor, MonitorError, RadioStack,
};
use crate::bearer::Qci;
use crate::layouts;
use crate::network::types::{DeviceId, Node, NodeId};
use crate::spec::{RngConfig, ScenarioSpec};
use crate::traffic::Protocol;
use crate::units::Nanosecs;

pub(crate) fn two_cell_spec() -> ScenarioSpec {
    layouts::two_cell(50.0)
}

pub(crate) fn multi_cell_spec(n: usize) -> ScenarioSpec {
    layouts::multi_cell(n, 60.0, 50.0)
}

/// A collaborator call recorded by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Seed(RngConfig),
    AddNodes(Vec<Node>),
    StopAt(Nanosecs),
    Run,
    Destroy,
    SetSchedulerType(String),
    SetPathlossModel(String),
    SetBandwidth(u8),
    InstallBaseStationDevices(Vec<NodeId>),
    InstallTerminalDevices(Vec<NodeId>),
    Attach {
        terminal: DeviceId,
        base_station: DeviceId,
    },
    ActivateBearer {
        terminals: Vec<DeviceId>,
        qci: Qci,
    },
    InstallStack(Vec<NodeId>),
    ConnectCore {
        gateway: NodeId,
        remote_host: NodeId,
        link: CoreLink,
    },
    AssignTerminalAddresses(Vec<DeviceId>),
    SetDefaultRoute {
        node: NodeId,
        gateway: Ipv4Addr,
    },
    AddNetworkRoute {
        node: NodeId,
        network: Ipv4Addr,
        mask: Ipv4Addr,
    },
    InstallServer {
        node: NodeId,
        protocol: Protocol,
        port: u16,
    },
    InstallClient {
        node: NodeId,
        params: ClientParams,
    },
    Start {
        app: AppId,
        at: Nanosecs,
    },
    InstallMonitor,
}

/// A backend that records every call and replays scripted flow records.
#[derive(Debug, Default)]
pub(crate) struct ScriptedBackend {
    calls: Vec<Call>,
    nr_devices: usize,
    nr_apps: usize,
    nr_destroys: usize,
    checked_for_lost_packets: bool,
    run_warning: Option<EngineWarning>,
    monitor_fails: bool,
    flows: Vec<(FlowId, Option<FiveTuple>, FlowStats)>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Number of radio devices installed so far.
    pub(crate) fn nr_devices(&self) -> usize {
        self.nr_devices
    }

    pub(crate) fn nr_destroys(&self) -> usize {
        self.nr_destroys
    }

    pub(crate) fn checked_for_lost_packets(&self) -> bool {
        self.checked_for_lost_packets
    }

    /// Makes the next run return `warning`.
    pub(crate) fn warn_on_run(&mut self, warning: EngineWarning) {
        self.run_warning = Some(warning);
    }

    /// Makes the monitor report unavailable.
    pub(crate) fn fail_monitor(&mut self) {
        self.monitor_fails = true;
    }

    pub(crate) fn script_flow(&mut self, flow: FlowId, tuple: FiveTuple, stats: FlowStats) {
        self.flows.push((flow, Some(tuple), stats));
    }

    /// Adds a flow the classifier cannot resolve.
    pub(crate) fn script_unclassified_flow(&mut self, flow: FlowId, stats: FlowStats) {
        self.flows.push((flow, None, stats));
    }

    fn devices(&mut self, n: usize) -> Vec<DeviceId> {
        let start = self.nr_devices;
        self.nr_devices += n;
        (start..self.nr_devices).map(DeviceId::new).collect()
    }

    fn app(&mut self) -> AppId {
        let id = AppId::new(self.nr_apps);
        self.nr_apps += 1;
        id
    }
}

impl Engine for ScriptedBackend {
    fn seed(&mut self, rng: RngConfig) {
        self.calls.push(Call::Seed(rng));
    }

    fn add_nodes(&mut self, nodes: &[Node]) {
        self.calls.push(Call::AddNodes(nodes.to_vec()));
    }

    fn stop_at(&mut self, at: Nanosecs) {
        self.calls.push(Call::StopAt(at));
    }

    fn run(&mut self) -> Result<(), EngineWarning> {
        self.calls.push(Call::Run);
        match self.run_warning.take() {
            Some(w) => Err(w),
            None => Ok(()),
        }
    }

    fn destroy(&mut self) {
        self.calls.push(Call::Destroy);
        self.nr_destroys += 1;
    }
}

impl RadioStack for ScriptedBackend {
    fn set_scheduler_type(&mut self, name: &str) {
        self.calls.push(Call::SetSchedulerType(name.to_owned()));
    }

    fn set_pathloss_model(&mut self, name: &str) {
        self.calls.push(Call::SetPathlossModel(name.to_owned()));
    }

    fn set_bandwidth(&mut self, rbs: u8) {
        self.calls.push(Call::SetBandwidth(rbs));
    }

    fn install_base_station_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        self.calls
            .push(Call::InstallBaseStationDevices(nodes.to_vec()));
        self.devices(nodes.len())
    }

    fn install_terminal_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        self.calls.push(Call::InstallTerminalDevices(nodes.to_vec()));
        self.devices(nodes.len())
    }

    fn attach(&mut self, terminal: DeviceId, base_station: DeviceId) {
        self.calls.push(Call::Attach {
            terminal,
            base_station,
        });
    }

    fn activate_bearer(&mut self, terminals: &[DeviceId], qci: Qci) {
        self.calls.push(Call::ActivateBearer {
            terminals: terminals.to_vec(),
            qci,
        });
    }
}

impl IpStack for ScriptedBackend {
    fn install_stack(&mut self, nodes: &[NodeId]) {
        self.calls.push(Call::InstallStack(nodes.to_vec()));
    }

    fn connect_core(&mut self, gateway: NodeId, remote_host: NodeId, link: &CoreLink) -> Ipv4Addr {
        self.calls.push(Call::ConnectCore {
            gateway,
            remote_host,
            link: *link,
        });
        Ipv4Addr::new(1, 0, 0, 2)
    }

    fn assign_terminal_addresses(&mut self, devices: &[DeviceId]) -> Vec<Ipv4Addr> {
        self.calls
            .push(Call::AssignTerminalAddresses(devices.to_vec()));
        (0..devices.len())
            .map(|i| Ipv4Addr::from(u32::from(Ipv4Addr::new(7, 0, 0, 2)) + i as u32))
            .collect()
    }

    fn terminal_gateway(&self) -> Ipv4Addr {
        Ipv4Addr::new(7, 0, 0, 1)
    }

    fn set_default_route(&mut self, node: NodeId, gateway: Ipv4Addr) {
        self.calls.push(Call::SetDefaultRoute { node, gateway });
    }

    fn add_network_route(&mut self, node: NodeId, network: Ipv4Addr, mask: Ipv4Addr) {
        self.calls.push(Call::AddNetworkRoute {
            node,
            network,
            mask,
        });
    }
}

impl Applications for ScriptedBackend {
    fn install_server(&mut self, node: NodeId, protocol: Protocol, port: u16) -> AppId {
        self.calls.push(Call::InstallServer {
            node,
            protocol,
            port,
        });
        self.app()
    }

    fn install_client(&mut self, node: NodeId, params: &ClientParams) -> AppId {
        self.calls.push(Call::InstallClient {
            node,
            params: params.clone(),
        });
        self.app()
    }

    fn start(&mut self, app: AppId, at: Nanosecs) {
        self.calls.push(Call::Start { app, at });
    }
}

impl Monitor for ScriptedBackend {
    fn install_all(&mut self) {
        self.calls.push(Call::InstallMonitor);
    }

    fn check_for_lost_packets(&mut self) {
        self.checked_for_lost_packets = true;
    }

    fn flow_stats(&self) -> Result<Vec<(FlowId, FlowStats)>, MonitorError> {
        if self.monitor_fails {
            return Err(MonitorError::NotInstalled);
        }
        Ok(self.flows.iter().map(|&(id, _, stats)| (id, stats)).collect())
    }

    fn classify(&self, flow: FlowId) -> Option<FiveTuple> {
        self.flows
            .iter()
            .find(|(id, ..)| *id == flow)
            .and_then(|&(_, tuple, _)| tuple)
    }

    fn serialize_to_file(&self, path: &Path) -> Result<(), MonitorError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(file, &self.flows)
            .map_err(|e| MonitorError::Unavailable(Box::new(e)))
    }
}
