//! The traffic matrix: per-class port allocation, ring pairing of peer traffic, and
//! installation of server/client applications.

use std::net::Ipv4Addr;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{AppId, Applications, ClientParams};
use crate::constants::{DL_PORT_BASE, PEER_PORT_BASE, UL_PORT_BASE};
use crate::network::types::{AddressBook, NodeId};
use crate::spec::ConfigError;
use crate::units::{Bytes, Nanosecs};

/// Transport protocol of a flow.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl Protocol {
    /// The IP protocol number.
    pub fn number(self) -> u8 {
        match self {
            Protocol::Udp => 17,
            Protocol::Tcp => 6,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            17 => Some(Protocol::Udp),
            6 => Some(Protocol::Tcp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    /// Remote host to terminal.
    Downlink,
    /// Terminal to remote host.
    Uplink,
    /// Terminal `(u + 1) mod N` to terminal `u`.
    Peer,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 3] = [
        TrafficClass::Downlink,
        TrafficClass::Uplink,
        TrafficClass::Peer,
    ];
}

impl std::fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrafficClass::Downlink => write!(f, "downlink"),
            TrafficClass::Uplink => write!(f, "uplink"),
            TrafficClass::Peer => write!(f, "peer"),
        }
    }
}

/// How downlink ports are handed out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownlinkPorts {
    /// Advance the downlink counter per terminal, like the other classes.
    #[default]
    PerTerminal,
    /// Every terminal listens on the base downlink port. Each sink still binds on its own node,
    /// so sockets never collide, but ports repeat within the class.
    Shared,
}

/// Counter seeds for each class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortBases {
    pub downlink: u16,
    pub uplink: u16,
    pub peer: u16,
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            downlink: DL_PORT_BASE,
            uplink: UL_PORT_BASE,
            peer: PEER_PORT_BASE,
        }
    }
}

impl PortBases {
    fn base(&self, class: TrafficClass) -> u16 {
        match class {
            TrafficClass::Downlink => self.downlink,
            TrafficClass::Uplink => self.uplink,
            TrafficClass::Peer => self.peer,
        }
    }
}

/// Traffic configuration shared by every flow.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrafficSpec {
    #[builder(default)]
    pub protocol: Protocol,
    /// Inter-packet interval of every client.
    #[builder(default = Nanosecs::from_millis(100), setter(into))]
    pub interval: Nanosecs,
    /// Client payload size.
    #[builder(default = Bytes::new(1024), setter(into))]
    pub packet_size: Bytes,
    /// Packets sent by each client before it stops.
    #[builder(default = 1_000_000)]
    pub max_packets: u64,
    /// Common start time of servers and clients.
    #[builder(default = Nanosecs::from_millis(10), setter(into))]
    pub start: Nanosecs,
    #[builder(default)]
    pub ports: PortBases,
    #[builder(default)]
    pub downlink_ports: DownlinkPorts,
    /// Enabled classes.
    #[builder(default = TrafficClass::ALL.to_vec())]
    pub classes: Vec<TrafficClass>,
}

impl Default for TrafficSpec {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TrafficSpec {
    pub fn is_enabled(&self, class: TrafficClass) -> bool {
        self.classes.contains(&class)
    }

    fn is_shared(&self, class: TrafficClass) -> bool {
        class == TrafficClass::Downlink && self.downlink_ports == DownlinkPorts::Shared
    }

    /// Checks pacing parameters and that every enabled counter fits `nr_terminals` allocations
    /// in the 16-bit port space.
    pub(crate) fn validate(&self, nr_terminals: usize) -> Result<(), ConfigError> {
        if self.interval == Nanosecs::ZERO {
            return Err(ConfigError::ZeroInterval);
        }
        if self.packet_size == Bytes::ZERO {
            return Err(ConfigError::ZeroPacketSize);
        }
        for &class in &self.classes {
            let needed = if self.is_shared(class) { 0 } else { nr_terminals };
            let base = self.ports.base(class) as usize;
            if base + needed > u16::MAX as usize {
                return Err(ConfigError::PortRangeExhausted {
                    class,
                    base: self.ports.base(class),
                    nr_terminals,
                });
            }
        }
        // Downlink and peer sinks share each terminal; uplink sinks live on the remote host.
        if self.is_enabled(TrafficClass::Downlink) && self.is_enabled(TrafficClass::Peer) {
            let clash = (0..nr_terminals).find(|&u| {
                self.server_port(TrafficClass::Downlink, u) == self.server_port(TrafficClass::Peer, u)
            });
            if let Some(terminal) = clash {
                return Err(ConfigError::PortCollision {
                    terminal,
                    // Both ranges fit in 16 bits by now
                    port: self.server_port(TrafficClass::Peer, terminal) as u16,
                });
            }
        }
        Ok(())
    }

    /// The port the `class` sink of terminal `u` listens on. Counters are advanced before use.
    fn server_port(&self, class: TrafficClass, u: usize) -> u32 {
        let base = u32::from(self.ports.base(class));
        if self.is_shared(class) {
            base
        } else {
            base + u as u32 + 1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

/// One side of a flow. For a client, `port` is the destination port it sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub protocol: Protocol,
    pub port: u16,
    pub role: Role,
}

/// A listening server and the client that feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AppPair {
    pub class: TrafficClass,
    /// The terminal index the pair was generated for.
    pub terminal: usize,
    pub server: Endpoint,
    pub client: Endpoint,
}

impl AppPair {
    /// The address the client sends to.
    pub fn destination(&self, addresses: &AddressBook) -> Option<Ipv4Addr> {
        match self.class {
            TrafficClass::Uplink => Some(addresses.remote_host()),
            TrafficClass::Downlink | TrafficClass::Peer => addresses.terminal(self.terminal),
        }
    }
}

#[derive(Debug)]
struct PortAllocator {
    class: TrafficClass,
    next: u16,
    advance: bool,
}

impl PortAllocator {
    fn new(class: TrafficClass, base: u16, advance: bool) -> Self {
        Self {
            class,
            next: base,
            advance,
        }
    }

    fn allocate(&mut self) -> Result<u16, PortAllocationError> {
        if self.advance {
            self.next = self
                .next
                .checked_add(1)
                .ok_or(PortAllocationError::Exhausted { class: self.class })?;
        }
        Ok(self.next)
    }
}

/// Tracks bound sockets and per-class ports.
#[derive(Debug, Default)]
struct PortRegistry {
    sockets: FxHashSet<(NodeId, Protocol, u16)>,
    class_ports: FxHashSet<(TrafficClass, u16)>,
}

impl PortRegistry {
    fn bind(&mut self, server: &Endpoint, class: TrafficClass, unique: bool) -> Result<(), PortAllocationError> {
        let Endpoint {
            node,
            protocol,
            port,
            ..
        } = *server;
        // CORRECTNESS: A socket is bound at most once.
        if !self.sockets.insert((node, protocol, port)) {
            return Err(PortAllocationError::SocketInUse {
                node,
                protocol,
                port,
            });
        }
        // CORRECTNESS: Ports are unique within a class.
        if unique && !self.class_ports.insert((class, port)) {
            return Err(PortAllocationError::DuplicatePort { class, port });
        }
        Ok(())
    }
}

/// The generated flows of one scenario, in installation order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrafficMatrix {
    pairs: Vec<AppPair>,
}

impl TrafficMatrix {
    /// Generates the matrix for `terminals` (in terminal index order).
    ///
    /// Correctness properties:
    ///
    /// - Every client has exactly one listening server.
    /// - No socket is bound twice.
    /// - Ports are unique within a class, except for shared downlink ports.
    pub fn generate(
        spec: &TrafficSpec,
        terminals: &[NodeId],
        remote_host: NodeId,
    ) -> Result<Self, PortAllocationError> {
        let mut dl = PortAllocator::new(
            TrafficClass::Downlink,
            spec.ports.downlink,
            !spec.is_shared(TrafficClass::Downlink),
        );
        let mut ul = PortAllocator::new(TrafficClass::Uplink, spec.ports.uplink, true);
        let mut peer = PortAllocator::new(TrafficClass::Peer, spec.ports.peer, true);
        let mut registry = PortRegistry::default();
        let mut pairs = Vec::new();
        let nr_terminals = terminals.len();
        let endpoint = |node, port, role| Endpoint {
            node,
            protocol: spec.protocol,
            port,
            role,
        };
        for (u, &ue) in terminals.iter().enumerate() {
            for &class in &TrafficClass::ALL {
                if !spec.is_enabled(class) {
                    continue;
                }
                let (port, server, client) = match class {
                    TrafficClass::Downlink => (dl.allocate()?, ue, remote_host),
                    TrafficClass::Uplink => (ul.allocate()?, remote_host, ue),
                    // The successor in the ring feeds terminal `u`
                    TrafficClass::Peer => (peer.allocate()?, ue, terminals[(u + 1) % nr_terminals]),
                };
                let pair = AppPair {
                    class,
                    terminal: u,
                    server: endpoint(server, port, Role::Server),
                    client: endpoint(client, port, Role::Client),
                };
                registry.bind(&pair.server, class, !spec.is_shared(class))?;
                pairs.push(pair);
            }
        }
        Ok(Self { pairs })
    }

    /// Installs every pair and starts them: all servers first, then all clients, at the common
    /// start time.
    ///
    /// PRECONDITION: `addresses` holds an address for every terminal, which deployment asserts.
    pub(crate) fn install<B>(
        &self,
        spec: &TrafficSpec,
        addresses: &AddressBook,
        apps: &mut B,
    ) -> Vec<(AppId, AppId)>
    where
        B: Applications + ?Sized,
    {
        let mut installed = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            let dst = match pair.class {
                TrafficClass::Uplink => addresses.remote_host(),
                TrafficClass::Downlink | TrafficClass::Peer => addresses.terminals()[pair.terminal],
            };
            let server = apps.install_server(pair.server.node, pair.server.protocol, pair.server.port);
            let params = ClientParams {
                protocol: pair.client.protocol,
                dst,
                port: pair.client.port,
                interval: spec.interval,
                packet_size: spec.packet_size,
                max_packets: spec.max_packets,
            };
            let client = apps.install_client(pair.client.node, &params);
            log::debug!(
                "{} flow for terminal {}: {} -> {}:{}",
                pair.class,
                pair.terminal,
                pair.client.node,
                dst,
                pair.server.port
            );
            installed.push((server, client));
        }
        for &(server, _) in &installed {
            apps.start(server, spec.start);
        }
        for &(_, client) in &installed {
            apps.start(client, spec.start);
        }
        installed
    }

    pub fn pairs(&self) -> &[AppPair] {
        &self.pairs
    }

    pub fn pairs_of(&self, class: TrafficClass) -> impl Iterator<Item = &AppPair> + '_ {
        self.pairs.iter().filter(move |p| p.class == class)
    }

    /// Indexes the pairs by the server side of their five-tuple.
    pub(crate) fn by_destination(
        &self,
        addresses: &AddressBook,
    ) -> FxHashMap<(Ipv4Addr, Protocol, u16), AppPair> {
        self.pairs
            .iter()
            .filter_map(|p| {
                p.destination(addresses)
                    .map(|dst| ((dst, p.server.protocol, p.server.port), *p))
            })
            .collect()
    }

    delegate::delegate! {
        to self.pairs {
            #[call(len)]
            pub fn nr_pairs(&self) -> usize;
        }
    }
}

/// Port allocation broke an invariant. These indicate a logic defect or a configuration that
/// escaped validation.
#[derive(Debug, thiserror::Error)]
pub enum PortAllocationError {
    #[error("{class} port counter overflowed")]
    Exhausted { class: TrafficClass },

    #[error("{protocol} port {port} is already bound on node {node}")]
    SocketInUse {
        node: NodeId,
        protocol: Protocol,
        port: u16,
    },

    #[error("{class} port {port} allocated twice")]
    DuplicatePort { class: TrafficClass, port: u16 },
}
