use rand::Rng;

use crate::network::types::{Node, NodeId, NodeKind, Position};
use crate::spec::{NodeGroup, ValidSpec};

/// The node arena of one scenario.
#[derive(Debug, Clone)]
pub struct Topology {
    pub(crate) nodes: Vec<Node>,
    pub(crate) base_stations: Vec<NodeId>,
    pub(crate) terminals: Vec<NodeId>,
    pub(crate) remote_host: NodeId,
    pub(crate) gateway: NodeId,
}

impl Topology {
    /// Places every node of a validated specification. Base stations come first in the arena,
    /// then terminals group by group, then the gateway and the remote host.
    ///
    /// All random draws come from `rng`, so a fixed stream gives a fixed layout.
    pub(crate) fn place<R>(spec: &ValidSpec, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let mut nodes = Vec::new();
        let mut push_group = |nodes: &mut Vec<Node>, kind: NodeKind, group: &NodeGroup, offset: usize| {
            group
                .placement
                .allocate(group.count, &mut *rng)
                .into_iter()
                .enumerate()
                .map(|(i, position)| {
                    let id = NodeId::new(nodes.len());
                    nodes.push(Node::new(id, kind, offset + i, position));
                    id
                })
                .collect::<Vec<_>>()
        };

        let base_stations = push_group(&mut nodes, NodeKind::BaseStation, &spec.base_stations, 0);
        let mut terminals = Vec::new();
        for group in &spec.terminal_groups {
            let start = terminals.len();
            terminals.extend(push_group(&mut nodes, NodeKind::Terminal, group, start));
        }

        let gateway = NodeId::new(nodes.len());
        nodes.push(Node::new(gateway, NodeKind::Gateway, 0, Position::ORIGIN));
        let remote_host = NodeId::new(nodes.len());
        nodes.push(Node::new(remote_host, NodeKind::RemoteHost, 0, Position::ORIGIN));

        Self {
            nodes,
            base_stations,
            terminals,
            remote_host,
            gateway,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Base station node IDs in role-index order.
    pub fn base_stations(&self) -> &[NodeId] {
        &self.base_stations
    }

    /// Terminal node IDs in role-index order.
    pub fn terminals(&self) -> &[NodeId] {
        &self.terminals
    }

    pub fn remote_host(&self) -> NodeId {
        self.remote_host
    }

    pub fn gateway(&self) -> NodeId {
        self.gateway
    }

    pub fn nr_terminals(&self) -> usize {
        self.terminals.len()
    }
}
