use std::net::Ipv4Addr;

identifier!(NodeId, usize);
arena_index!(NodeId);

identifier!(DeviceId, usize);
arena_index!(DeviceId);

/// A simulation participant. `id` indexes the scenario-wide node arena, `index` is the stable
/// position of the node within its role group.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub index: usize,
    pub position: Position,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, index: usize, position: Position) -> Self {
        Self {
            id,
            kind,
            index,
            position,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    BaseStation,
    Terminal,
    RemoteHost,
    Gateway,
}

/// A 3D coordinate in metres.
#[derive(Debug, Default, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// The radio devices installed on base stations and terminals, indexed by role-group index.
#[derive(Debug, Clone, Default)]
pub struct Devices {
    pub(crate) base_stations: Vec<DeviceId>,
    pub(crate) terminals: Vec<DeviceId>,
}

impl Devices {
    pub fn base_station(&self, index: usize) -> Option<DeviceId> {
        self.base_stations.get(index).copied()
    }

    pub fn terminal(&self, index: usize) -> Option<DeviceId> {
        self.terminals.get(index).copied()
    }

    pub fn terminals(&self) -> &[DeviceId] {
        &self.terminals
    }

    pub fn base_stations(&self) -> &[DeviceId] {
        &self.base_stations
    }
}

/// Addresses handed out by the IP stack.
#[derive(Debug, Clone)]
pub struct AddressBook {
    pub(crate) remote_host: Ipv4Addr,
    pub(crate) terminal_gateway: Ipv4Addr,
    pub(crate) terminals: Vec<Ipv4Addr>,
}

impl AddressBook {
    pub fn remote_host(&self) -> Ipv4Addr {
        self.remote_host
    }

    pub fn terminal_gateway(&self) -> Ipv4Addr {
        self.terminal_gateway
    }

    pub fn terminal(&self, index: usize) -> Option<Ipv4Addr> {
        self.terminals.get(index).copied()
    }

    pub fn terminals(&self) -> &[Ipv4Addr] {
        &self.terminals
    }
}
