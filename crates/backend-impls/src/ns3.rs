//! A backend that records a scenario and replays it in the ns-3 `lena-flows` program.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use cellflow_core::{
    backend::{
        AppId, Applications, ClientParams, CoreLink, Engine, EngineWarning, FiveTuple, FlowId,
        FlowStats, IpStack, Monitor, MonitorError, RadioStack,
    },
    bearer::Qci,
    network::types::{DeviceId, Node, NodeId},
    spec::{RadioSpec, RngConfig},
    traffic::Protocol,
    units::Nanosecs,
};
use ns3_frontend::{App, FlowRecord, Launcher, Ns3Simulation, Route};

const TERMINAL_GATEWAY: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 1);
const FIRST_TERMINAL: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 2);
const CORE_REMOTE: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 2);

/// An ns-3 backend. Configuration calls are collected and the whole scenario is handed to ns-3
/// when the engine runs. Addresses are the ones the EPC helper assigns deterministically.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct Ns3Backend {
    /// The root of the ns-3 source tree.
    #[builder(setter(into))]
    ns3_dir: PathBuf,
    /// The directory in which to write simulation configs and data.
    #[builder(setter(into))]
    data_dir: PathBuf,
    /// How the program is launched.
    #[builder(default)]
    launcher: Launcher,
    #[builder(default, setter(skip))]
    state: State,
}

#[derive(Debug)]
struct State {
    /// The ns-3 `RngSeed`/`RngRun` pair.
    rng: RngConfig,
    nodes: Vec<Node>,
    radio: RadioSpec,
    core: Option<(NodeId, NodeId, CoreLink)>,
    device_nodes: Vec<NodeId>,
    attachments: Vec<(NodeId, NodeId)>,
    bearers: Vec<(Vec<NodeId>, Qci)>,
    nr_terminal_addresses: u32,
    routes: Vec<Route>,
    apps: Vec<App>,
    stop: Nanosecs,
    monitor_installed: bool,
    records: Result<Vec<FlowRecord>, String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            rng: RngConfig::default(),
            nodes: Vec::new(),
            radio: RadioSpec::default(),
            core: None,
            device_nodes: Vec::new(),
            attachments: Vec::new(),
            bearers: Vec::new(),
            nr_terminal_addresses: 0,
            routes: Vec::new(),
            apps: Vec::new(),
            stop: Nanosecs::ZERO,
            monitor_installed: false,
            records: Err("simulation has not run".into()),
        }
    }
}

impl Ns3Backend {
    fn simulation(&self) -> Ns3Simulation {
        Ns3Simulation::builder()
            .ns3_dir(self.ns3_dir.clone())
            .data_dir(self.data_dir.clone())
            .launcher(self.launcher)
            .nodes(self.state.nodes.clone())
            .radio(self.state.radio.clone())
            .core(self.state.core)
            .attachments(self.state.attachments.clone())
            .bearers(self.state.bearers.clone())
            .routes(self.state.routes.clone())
            .apps(self.state.apps.clone())
            .stop(self.state.stop)
            .rng(self.state.rng)
            .build()
    }

    fn node_of(&self, device: DeviceId) -> Option<NodeId> {
        self.state.device_nodes.get(device.index()).copied()
    }

    fn devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        nodes
            .iter()
            .map(|&node| {
                let id = DeviceId::new(self.state.device_nodes.len());
                self.state.device_nodes.push(node);
                id
            })
            .collect()
    }

    fn records(&self) -> Result<&[FlowRecord], MonitorError> {
        if !self.state.monitor_installed {
            return Err(MonitorError::NotInstalled);
        }
        self.state
            .records
            .as_deref()
            .map_err(|e| MonitorError::Unavailable(e.clone().into()))
    }
}

impl Engine for Ns3Backend {
    fn seed(&mut self, rng: RngConfig) {
        self.state.rng = rng;
    }

    fn add_nodes(&mut self, nodes: &[Node]) {
        self.state.nodes.extend_from_slice(nodes);
    }

    fn stop_at(&mut self, at: Nanosecs) {
        self.state.stop = at;
    }

    fn run(&mut self) -> Result<(), EngineWarning> {
        let sim = self.simulation();
        match sim.run() {
            Ok(records) => {
                log::info!("ns-3 reported {} flows", records.len());
                self.state.records = Ok(records);
                Ok(())
            }
            Err(ns3_frontend::Error::ExitStatus(code)) => {
                self.state.records = Err(format!("ns-3 exited with status {code:?}"));
                Err(EngineWarning::ExitStatus(code.unwrap_or(-1)))
            }
            Err(ns3_frontend::Error::Io(e)) => {
                self.state.records = Err(e.to_string());
                Err(EngineWarning::Io(e))
            }
            // The program finished; only its report is unusable.
            Err(e @ ns3_frontend::Error::ParseNs3(_)) => {
                log::warn!("failed to read ns-3 flow records: {e}");
                self.state.records = Err(e.to_string());
                Ok(())
            }
        }
    }

    fn destroy(&mut self) {
        self.state = State::default();
    }
}

impl RadioStack for Ns3Backend {
    fn set_scheduler_type(&mut self, name: &str) {
        self.state.radio.scheduler = name.to_owned();
    }

    fn set_pathloss_model(&mut self, name: &str) {
        self.state.radio.pathloss = name.to_owned();
    }

    fn set_bandwidth(&mut self, rbs: u8) {
        self.state.radio.bandwidth = rbs;
    }

    fn install_base_station_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        self.devices(nodes)
    }

    fn install_terminal_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        self.devices(nodes)
    }

    fn attach(&mut self, terminal: DeviceId, base_station: DeviceId) {
        match (self.node_of(terminal), self.node_of(base_station)) {
            (Some(ue), Some(enb)) => self.state.attachments.push((ue, enb)),
            _ => log::warn!("attach with unknown device {terminal} or {base_station}"),
        }
    }

    fn activate_bearer(&mut self, terminals: &[DeviceId], qci: Qci) {
        let nodes = terminals
            .iter()
            .filter_map(|&d| self.node_of(d))
            .collect::<Vec<_>>();
        self.state.bearers.push((nodes, qci));
    }
}

impl IpStack for Ns3Backend {
    // The program installs the internet stack on every node it creates.
    fn install_stack(&mut self, _nodes: &[NodeId]) {}

    fn connect_core(&mut self, gateway: NodeId, remote_host: NodeId, link: &CoreLink) -> Ipv4Addr {
        self.state.core = Some((gateway, remote_host, *link));
        CORE_REMOTE
    }

    fn assign_terminal_addresses(&mut self, devices: &[DeviceId]) -> Vec<Ipv4Addr> {
        devices
            .iter()
            .map(|_| {
                let addr = Ipv4Addr::from(u32::from(FIRST_TERMINAL) + self.state.nr_terminal_addresses);
                self.state.nr_terminal_addresses += 1;
                addr
            })
            .collect()
    }

    fn terminal_gateway(&self) -> Ipv4Addr {
        TERMINAL_GATEWAY
    }

    fn set_default_route(&mut self, node: NodeId, gateway: Ipv4Addr) {
        self.state.routes.push(Route::Default { node, gateway });
    }

    fn add_network_route(&mut self, node: NodeId, network: Ipv4Addr, mask: Ipv4Addr) {
        self.state.routes.push(Route::Network {
            node,
            network,
            mask,
        });
    }
}

impl Applications for Ns3Backend {
    fn install_server(&mut self, node: NodeId, protocol: Protocol, port: u16) -> AppId {
        self.state.apps.push(App::Server {
            node,
            protocol,
            port,
            start: None,
        });
        AppId::new(self.state.apps.len() - 1)
    }

    fn install_client(&mut self, node: NodeId, params: &ClientParams) -> AppId {
        self.state.apps.push(App::Client {
            node,
            protocol: params.protocol,
            dst: params.dst,
            port: params.port,
            interval: params.interval,
            packet_size: params.packet_size,
            max_packets: params.max_packets,
            start: None,
        });
        AppId::new(self.state.apps.len() - 1)
    }

    fn start(&mut self, app: AppId, at: Nanosecs) {
        if let Some(app) = self.state.apps.get_mut(app.inner()) {
            app.set_start(at);
        }
    }
}

impl Monitor for Ns3Backend {
    fn install_all(&mut self) {
        self.state.monitor_installed = true;
    }

    // The program checks for lost packets before writing its records.

    fn flow_stats(&self) -> Result<Vec<(FlowId, FlowStats)>, MonitorError> {
        Ok(self.records()?.iter().map(|r| (r.id, r.stats)).collect())
    }

    fn classify(&self, flow: FlowId) -> Option<FiveTuple> {
        self.records()
            .ok()?
            .iter()
            .find(|r| r.id == flow)
            .map(|r| r.tuple)
    }

    fn serialize_to_file(&self, path: &Path) -> Result<(), MonitorError> {
        self.records()?;
        ns3_frontend::copy_monitor_dump(&self.data_dir, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cellflow_core::network::types::NodeKind;

    use super::*;

    fn backend() -> Ns3Backend {
        Ns3Backend::builder()
            .ns3_dir("ns-3-dev")
            .data_dir("data")
            .build()
    }

    #[test]
    fn devices_map_back_to_nodes() {
        let mut backend = backend();
        let enbs = backend.install_base_station_devices(&[NodeId::new(0)]);
        let ues = backend.install_terminal_devices(&[NodeId::new(1), NodeId::new(2)]);
        backend.attach(ues[1], enbs[0]);
        backend.activate_bearer(&ues, Qci::GbrConvVoice);
        assert_eq!(backend.state.attachments, vec![(NodeId::new(2), NodeId::new(0))]);
        assert_eq!(
            backend.state.bearers,
            vec![(vec![NodeId::new(1), NodeId::new(2)], Qci::GbrConvVoice)]
        );
    }

    #[test]
    fn apps_are_started_in_place() {
        let mut backend = backend();
        let id = backend.install_server(NodeId::new(1), Protocol::Udp, 1235);
        backend.start(id, Nanosecs::from_millis(10));
        assert_eq!(
            backend.state.apps,
            vec![App::Server {
                node: NodeId::new(1),
                protocol: Protocol::Udp,
                port: 1235,
                start: Some(Nanosecs::from_millis(10)),
            }]
        );
    }

    #[test]
    fn monitor_requires_a_run() {
        let mut backend = backend();
        assert!(matches!(backend.flow_stats(), Err(MonitorError::NotInstalled)));
        backend.install_all();
        assert!(matches!(backend.flow_stats(), Err(MonitorError::Unavailable(_))));
    }

    #[test]
    fn destroy_forgets_the_scenario() {
        let mut backend = backend();
        backend.add_nodes(&[Node::new(
            NodeId::new(0),
            NodeKind::RemoteHost,
            0,
            Default::default(),
        )]);
        backend.install_all();
        backend.destroy();
        assert!(backend.state.nodes.is_empty());
        assert!(!backend.state.monitor_installed);
    }

    #[test]
    fn seed_reaches_the_program() {
        let mut backend = backend();
        backend.seed(RngConfig { seed: 3, run: 9 });
        assert_eq!(backend.simulation().rng, RngConfig { seed: 3, run: 9 });
        backend.destroy();
        assert_eq!(backend.simulation().rng, RngConfig::default());
    }

    #[test]
    fn monitor_dump_is_copied_from_the_data_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let data_dir = dir.path().join("data");
        std::fs::create_dir(&data_dir)?;
        std::fs::write(data_dir.join("flowmon.xml"), "<FlowMonitor/>")?;
        let mut backend = Ns3Backend::builder()
            .ns3_dir("ns-3-dev")
            .data_dir(&data_dir)
            .build();
        backend.install_all();
        backend.state.records = Ok(Vec::new());
        let dst = dir.path().join("flows.xml");
        backend.serialize_to_file(&dst)?;
        assert_eq!(std::fs::read_to_string(dst)?, "<FlowMonitor/>");
        Ok(())
    }
}
