//! An in-process backend with an analytic delivery model. A packet reaches its sink after a fixed
//! per-hop latency when every element on its path has been configured: attached and provisioned
//! radio devices, IP stacks, addresses, routes and a started listener. Otherwise it is dropped.

use std::net::Ipv4Addr;
use std::path::Path;

use cellflow_core::{
    backend::{
        AppId, Applications, ClientParams, CoreLink, Engine, EngineWarning, FiveTuple, FlowId,
        FlowStats, IpStack, Monitor, MonitorError, RadioStack,
    },
    bearer::Qci,
    constants::{EPHEMERAL_PORT_BASE, SZ_TCP_IP_HDR, SZ_UDP_IP_HDR},
    network::types::{DeviceId, Node, NodeId, NodeKind},
    spec::RngConfig,
    traffic::Protocol,
    units::{Bytes, Nanosecs},
};
use rustc_hash::{FxHashMap, FxHashSet};

const TERMINAL_GATEWAY: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 1);
const FIRST_TERMINAL: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 2);
const CORE_GATEWAY: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 1);
const CORE_REMOTE: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 2);

/// An analytic backend. Addresses follow the EPC conventions: terminals from `7.0.0.2` with
/// gateway `7.0.0.1`, and the remote host at `1.0.0.2` on the core link.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct IdealBackend {
    /// One-way latency of the radio hop.
    #[builder(default = Nanosecs::from_millis(1), setter(into))]
    radio_delay: Nanosecs,
    #[builder(default, setter(skip))]
    state: State,
}

impl Default for IdealBackend {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Default)]
struct State {
    // The delivery model draws nothing from the stream
    rng: Option<RngConfig>,
    nodes: Vec<Node>,
    scheduler: Option<String>,
    pathloss: Option<String>,
    bandwidth: Option<u8>,
    // Radio
    device_nodes: Vec<NodeId>,
    base_stations: FxHashSet<DeviceId>,
    serving: FxHashMap<DeviceId, DeviceId>,
    bearers: FxHashMap<DeviceId, Vec<Qci>>,
    // IP
    stacks: FxHashSet<NodeId>,
    core: Option<(NodeId, NodeId, CoreLink)>,
    addresses: FxHashMap<Ipv4Addr, NodeId>,
    node_addresses: FxHashMap<NodeId, Ipv4Addr>,
    nr_terminal_addresses: u32,
    default_routes: FxHashMap<NodeId, Ipv4Addr>,
    network_routes: Vec<(NodeId, Ipv4Addr, Ipv4Addr)>,
    // Applications
    apps: Vec<App>,
    next_ephemeral: FxHashMap<NodeId, u16>,
    // Run and measurement
    monitor_installed: bool,
    stop: Option<Nanosecs>,
    flows: Vec<IdealFlow>,
}

#[derive(Debug)]
struct App {
    node: NodeId,
    kind: AppKind,
    start: Option<Nanosecs>,
}

#[derive(Debug)]
enum AppKind {
    Server { protocol: Protocol, port: u16 },
    Client { params: ClientParams, src_port: u16 },
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
struct IdealFlow {
    id: FlowId,
    tuple: FiveTuple,
    stats: FlowStats,
    #[serde(skip)]
    deliverable: bool,
}

impl IdealBackend {
    fn radio_device(&self, node: NodeId) -> Option<DeviceId> {
        self.state
            .device_nodes
            .iter()
            .position(|&n| n == node)
            .map(DeviceId::new)
            .filter(|d| !self.state.base_stations.contains(d))
    }

    fn node_kind(&self, node: NodeId) -> Option<NodeKind> {
        self.state.nodes.get(node.index()).map(|n| n.kind)
    }

    /// A terminal can exchange traffic once its device is attached and carries a bearer.
    fn terminal_ready(&self, node: NodeId) -> bool {
        self.radio_device(node).map_or(false, |dev| {
            self.state.serving.contains_key(&dev)
                && self
                    .state
                    .bearers
                    .get(&dev)
                    .map_or(false, |b| !b.is_empty())
        })
    }

    fn routes_to(&self, node: NodeId, dst: Ipv4Addr) -> bool {
        let in_network = |net: Ipv4Addr, mask: Ipv4Addr| {
            u32::from(dst) & u32::from(mask) == u32::from(net) & u32::from(mask)
        };
        self.state
            .network_routes
            .iter()
            .any(|&(n, net, mask)| n == node && in_network(net, mask))
            || self.state.default_routes.contains_key(&node)
    }

    /// The one-way latency from `src` to `dst`, if a packet can get there at all.
    fn path_latency(&self, src: NodeId, dst: NodeId, dst_addr: Ipv4Addr) -> Option<Nanosecs> {
        let core_delay = self.state.core.map(|(.., link)| link.delay)?;
        let is_terminal = |n| self.node_kind(n) == Some(NodeKind::Terminal);
        for node in [src, dst] {
            if !self.state.stacks.contains(&node) {
                return None;
            }
            if is_terminal(node) && !self.terminal_ready(node) {
                return None;
            }
        }
        if !self.routes_to(src, dst_addr) {
            return None;
        }
        match (is_terminal(src), is_terminal(dst)) {
            (true, true) => Some(self.radio_delay + self.radio_delay),
            (true, false) | (false, true) => Some(self.radio_delay + core_delay),
            (false, false) => None,
        }
    }

    fn listener(&self, node: NodeId, protocol: Protocol, port: u16) -> Option<Nanosecs> {
        self.state.apps.iter().find_map(|app| match app.kind {
            AppKind::Server {
                protocol: p,
                port: q,
            } if app.node == node && p == protocol && q == port => app.start,
            _ => None,
        })
    }

    fn simulate(&self, stop: Nanosecs) -> Vec<IdealFlow> {
        let mut flows = Vec::new();
        for app in &self.state.apps {
            let (AppKind::Client { params, src_port }, Some(start)) = (&app.kind, app.start) else {
                continue;
            };
            let Some(&src) = self.state.node_addresses.get(&app.node) else {
                log::warn!("client on node {} has no address", app.node);
                continue;
            };
            let nr_sent = nr_packets(start, params.interval, params.max_packets, stop);
            if nr_sent == 0 {
                continue;
            }
            let tuple = FiveTuple {
                src,
                dst: params.dst,
                protocol: params.protocol.number(),
                src_port: *src_port,
                dst_port: params.port,
            };
            let wire = params.packet_size
                + match params.protocol {
                    Protocol::Udp => SZ_UDP_IP_HDR,
                    Protocol::Tcp => SZ_TCP_IP_HDR,
                };
            let interval = params.interval.into_u64();
            let mut stats = FlowStats {
                tx_packets: nr_sent,
                tx_bytes: Bytes::new(wire.into_u64() * nr_sent),
                time_first_tx: start,
                time_last_tx: Nanosecs::new(start.into_u64() + (nr_sent - 1) * interval),
                ..Default::default()
            };
            let delivery = self.state.addresses.get(&params.dst).and_then(|&dst| {
                let latency = self.path_latency(app.node, dst, params.dst)?;
                let listening = self.listener(dst, params.protocol, params.port)?;
                received_range(start, interval, nr_sent, latency, listening, stop)
                    .map(|range| (range, latency))
            });
            if let Some(((first, last), latency)) = delivery {
                let nr_received = last - first + 1;
                let arrival = |k: u64| Nanosecs::new(start.into_u64() + k * interval) + latency;
                stats.rx_packets = nr_received;
                stats.rx_bytes = Bytes::new(wire.into_u64() * nr_received);
                stats.time_first_rx = Some(arrival(first));
                stats.time_last_rx = Some(arrival(last));
                stats.delay_sum = Nanosecs::new(latency.into_u64() * nr_received);
            }
            flows.push(IdealFlow {
                id: FlowId::new(flows.len() as u32 + 1),
                tuple,
                stats,
                deliverable: delivery.is_some(),
            });
        }
        flows
    }
}

/// Packets a client sends before `stop`: `min(max, (stop - start) / interval + 1)`.
fn nr_packets(start: Nanosecs, interval: Nanosecs, max: u64, stop: Nanosecs) -> u64 {
    if start > stop || interval == Nanosecs::ZERO {
        return 0;
    }
    let fits = (stop - start).into_u64() / interval.into_u64() + 1;
    fits.min(max)
}

/// The indices of packets that arrive no earlier than `from` and no later than `until`.
fn received_range(
    start: Nanosecs,
    interval: u64,
    nr_sent: u64,
    latency: Nanosecs,
    from: Nanosecs,
    until: Nanosecs,
) -> Option<(u64, u64)> {
    let first_arrival = (start + latency).into_u64();
    let (from, until) = (from.into_u64(), until.into_u64());
    if until < first_arrival {
        return None;
    }
    let first = from.saturating_sub(first_arrival).div_ceil(interval);
    let last = ((until - first_arrival) / interval).min(nr_sent - 1);
    (first <= last).then_some((first, last))
}

impl Engine for IdealBackend {
    fn seed(&mut self, rng: RngConfig) {
        self.state.rng = Some(rng);
    }

    fn add_nodes(&mut self, nodes: &[Node]) {
        self.state.nodes.extend_from_slice(nodes);
    }

    fn stop_at(&mut self, at: Nanosecs) {
        self.state.stop = Some(at);
    }

    fn run(&mut self) -> Result<(), EngineWarning> {
        let stop = self.state.stop.unwrap_or(Nanosecs::ZERO);
        log::debug!(
            "ideal run {:?} with scheduler {:?}, path loss {:?}, {:?} RBs",
            self.state.rng,
            self.state.scheduler,
            self.state.pathloss,
            self.state.bandwidth
        );
        self.state.flows = self.simulate(stop);
        Ok(())
    }

    fn destroy(&mut self) {
        self.state = State::default();
    }
}

impl RadioStack for IdealBackend {
    fn set_scheduler_type(&mut self, name: &str) {
        self.state.scheduler = Some(name.to_owned());
    }

    fn set_pathloss_model(&mut self, name: &str) {
        self.state.pathloss = Some(name.to_owned());
    }

    fn set_bandwidth(&mut self, rbs: u8) {
        self.state.bandwidth = Some(rbs);
    }

    fn install_base_station_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        let devices = self.install_terminal_devices(nodes);
        self.state.base_stations.extend(devices.iter().copied());
        devices
    }

    fn install_terminal_devices(&mut self, nodes: &[NodeId]) -> Vec<DeviceId> {
        nodes
            .iter()
            .map(|&node| {
                let id = DeviceId::new(self.state.device_nodes.len());
                self.state.device_nodes.push(node);
                id
            })
            .collect()
    }

    fn attach(&mut self, terminal: DeviceId, base_station: DeviceId) {
        self.state.serving.insert(terminal, base_station);
    }

    fn activate_bearer(&mut self, terminals: &[DeviceId], qci: Qci) {
        for &dev in terminals {
            self.state.bearers.entry(dev).or_default().push(qci);
        }
    }
}

impl IpStack for IdealBackend {
    fn install_stack(&mut self, nodes: &[NodeId]) {
        self.state.stacks.extend(nodes.iter().copied());
    }

    fn connect_core(&mut self, gateway: NodeId, remote_host: NodeId, link: &CoreLink) -> Ipv4Addr {
        self.state.core = Some((gateway, remote_host, *link));
        self.state.stacks.insert(gateway);
        self.state.addresses.insert(CORE_GATEWAY, gateway);
        self.state.addresses.insert(CORE_REMOTE, remote_host);
        self.state.node_addresses.insert(remote_host, CORE_REMOTE);
        CORE_REMOTE
    }

    fn assign_terminal_addresses(&mut self, devices: &[DeviceId]) -> Vec<Ipv4Addr> {
        devices
            .iter()
            .map(|dev| {
                let addr = Ipv4Addr::from(u32::from(FIRST_TERMINAL) + self.state.nr_terminal_addresses);
                self.state.nr_terminal_addresses += 1;
                if let Some(&node) = self.state.device_nodes.get(dev.index()) {
                    self.state.addresses.insert(addr, node);
                    self.state.node_addresses.insert(node, addr);
                }
                addr
            })
            .collect()
    }

    fn terminal_gateway(&self) -> Ipv4Addr {
        TERMINAL_GATEWAY
    }

    fn set_default_route(&mut self, node: NodeId, gateway: Ipv4Addr) {
        self.state.default_routes.insert(node, gateway);
    }

    fn add_network_route(&mut self, node: NodeId, network: Ipv4Addr, mask: Ipv4Addr) {
        self.state.network_routes.push((node, network, mask));
    }
}

impl Applications for IdealBackend {
    fn install_server(&mut self, node: NodeId, protocol: Protocol, port: u16) -> AppId {
        self.push_app(node, AppKind::Server { protocol, port })
    }

    fn install_client(&mut self, node: NodeId, params: &ClientParams) -> AppId {
        let next = self
            .state
            .next_ephemeral
            .entry(node)
            .or_insert(EPHEMERAL_PORT_BASE);
        let src_port = *next;
        *next = next.wrapping_add(1).max(EPHEMERAL_PORT_BASE);
        self.push_app(
            node,
            AppKind::Client {
                params: params.clone(),
                src_port,
            },
        )
    }

    fn start(&mut self, app: AppId, at: Nanosecs) {
        if let Some(app) = self.state.apps.get_mut(app.inner()) {
            app.start = Some(at);
        }
    }
}

impl IdealBackend {
    fn push_app(&mut self, node: NodeId, kind: AppKind) -> AppId {
        let id = AppId::new(self.state.apps.len());
        self.state.apps.push(App {
            node,
            kind,
            start: None,
        });
        id
    }
}

impl Monitor for IdealBackend {
    fn install_all(&mut self) {
        self.state.monitor_installed = true;
    }

    fn check_for_lost_packets(&mut self) {
        for flow in &mut self.state.flows {
            if !flow.deliverable {
                flow.stats.lost_packets = flow.stats.tx_packets - flow.stats.rx_packets;
            }
        }
    }

    fn flow_stats(&self) -> Result<Vec<(FlowId, FlowStats)>, MonitorError> {
        if !self.state.monitor_installed {
            return Err(MonitorError::NotInstalled);
        }
        Ok(self.state.flows.iter().map(|f| (f.id, f.stats)).collect())
    }

    fn classify(&self, flow: FlowId) -> Option<FiveTuple> {
        self.state
            .flows
            .iter()
            .find(|f| f.id == flow)
            .map(|f| f.tuple)
    }

    fn serialize_to_file(&self, path: &Path) -> Result<(), MonitorError> {
        if !self.state.monitor_installed {
            return Err(MonitorError::NotInstalled);
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &self.state.flows)
            .map_err(|e| MonitorError::Unavailable(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_count_is_capped() {
        let start = Nanosecs::from_millis(10);
        let interval = Nanosecs::from_millis(100);
        assert_eq!(nr_packets(start, interval, 1_000_000, Nanosecs::from_secs(10)), 100);
        assert_eq!(nr_packets(start, interval, 5, Nanosecs::from_secs(10)), 5);
        assert_eq!(nr_packets(Nanosecs::from_secs(11), interval, 5, Nanosecs::from_secs(10)), 0);
    }

    #[test]
    fn in_flight_packets_are_not_received() {
        // Sent at 0, 100, ..., 900 ms with 150 ms latency; the last arrives after the stop
        let range = received_range(
            Nanosecs::ZERO,
            100_000_000,
            10,
            Nanosecs::from_millis(150),
            Nanosecs::ZERO,
            Nanosecs::from_secs(1),
        );
        assert_eq!(range, Some((0, 8)));
    }

    #[test]
    fn late_listener_misses_early_packets() {
        let range = received_range(
            Nanosecs::ZERO,
            100_000_000,
            10,
            Nanosecs::from_millis(10),
            Nanosecs::from_millis(250),
            Nanosecs::from_secs(5),
        );
        assert_eq!(range, Some((3, 9)));
    }

    #[test]
    fn nothing_arrives_before_stop() {
        let range = received_range(
            Nanosecs::from_millis(10),
            100_000_000,
            1,
            Nanosecs::from_millis(11),
            Nanosecs::ZERO,
            Nanosecs::from_millis(15),
        );
        assert_eq!(range, None);
    }

    #[test]
    fn unprovisioned_terminal_loses_everything() {
        let mut backend = IdealBackend::default();
        let ue = NodeId::new(0);
        let remote = NodeId::new(1);
        backend.add_nodes(&[
            Node::new(ue, NodeKind::Terminal, 0, Default::default()),
            Node::new(remote, NodeKind::RemoteHost, 0, Default::default()),
        ]);
        backend.install_stack(&[remote]);
        let remote_addr = backend.connect_core(NodeId::new(2), remote, &CoreLink::default());
        let devs = backend.install_terminal_devices(&[ue]);
        backend.install_stack(&[ue]);
        backend.assign_terminal_addresses(&devs);
        backend.set_default_route(ue, TERMINAL_GATEWAY);
        // No attachment and no bearer
        let server = backend.install_server(remote, Protocol::Udp, 2001);
        let client = backend.install_client(
            ue,
            &ClientParams {
                protocol: Protocol::Udp,
                dst: remote_addr,
                port: 2001,
                interval: Nanosecs::from_millis(100),
                packet_size: Bytes::new(1024),
                max_packets: 10,
            },
        );
        backend.start(server, Nanosecs::ZERO);
        backend.start(client, Nanosecs::ZERO);
        backend.install_all();
        backend.stop_at(Nanosecs::from_secs(2));
        assert!(backend.run().is_ok());
        backend.check_for_lost_packets();
        let stats = backend.flow_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].1.tx_packets, 10);
        assert_eq!(stats[0].1.rx_packets, 0);
        assert_eq!(stats[0].1.lost_packets, 10);
        assert_eq!(stats[0].1.tx_bytes, Bytes::new(10 * 1052));
    }
}
