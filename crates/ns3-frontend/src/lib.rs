//! An interface to the backend ns-3 LENA simulation.
//!
//! This crate is tightly coupled to the `lena-flows` ns-3 program. It writes a scenario as a set
//! of whitespace-separated text files, runs the program on them, and parses the per-flow records
//! the program writes back.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

use std::fmt::Write;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;

use cellflow_core::{
    backend::{CoreLink, FiveTuple, FlowId, FlowStats},
    bearer::Qci,
    network::types::{Node, NodeId, NodeKind},
    spec::{RadioSpec, RngConfig},
    traffic::Protocol,
    units::{Bytes, Nanosecs},
};
use derivative::Derivative;

/// An ns-3 LENA simulation.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct Ns3Simulation {
    /// The root of the ns-3 source tree.
    #[builder(setter(into))]
    pub ns3_dir: PathBuf,
    /// The directory in which to write simulation configs and data.
    #[builder(setter(into))]
    pub data_dir: PathBuf,
    /// How the program is launched.
    #[builder(default)]
    pub launcher: Launcher,
    /// Positioned nodes of every role.
    pub nodes: Vec<Node>,
    /// Radio stack parameters.
    #[builder(default)]
    pub radio: RadioSpec,
    /// The gateway and remote host joined by the core link.
    pub core: Option<(NodeId, NodeId, CoreLink)>,
    /// `(terminal, base station)` node pairs, in attachment order.
    #[builder(default)]
    pub attachments: Vec<(NodeId, NodeId)>,
    /// Bearer activation requests, in order.
    #[builder(default)]
    pub bearers: Vec<(Vec<NodeId>, Qci)>,
    /// Static routes.
    #[builder(default)]
    pub routes: Vec<Route>,
    /// Applications, in installation order.
    #[builder(default)]
    pub apps: Vec<App>,
    /// Stop time.
    pub stop: Nanosecs,
    /// Pseudo-random stream selection.
    #[builder(default)]
    pub rng: RngConfig,
}

impl Ns3Simulation {
    /// Run the simulation, returning its flow records.
    ///
    /// This routine can fail due to IO errors, a failing ns-3 program, or errors parsing ns-3
    /// data.
    pub fn run(&self) -> Result<Vec<FlowRecord>, Error> {
        let mk_path = |file: &str| self.data_dir.join(file);
        fs::create_dir_all(&self.data_dir)?;

        fs::write(mk_path("nodes.txt"), translate_nodes(&self.nodes))?;
        fs::write(
            mk_path("config.txt"),
            translate_config(&self.radio, self.core.as_ref(), self.stop, self.rng),
        )?;
        fs::write(mk_path("attach.txt"), translate_attachments(&self.attachments))?;
        fs::write(mk_path("bearers.txt"), translate_bearers(&self.bearers))?;
        fs::write(mk_path("routes.txt"), translate_routes(&self.routes))?;
        fs::write(mk_path("apps.txt"), translate_apps(&self.apps))?;

        self.invoke_ns3()?;

        let s = fs::read_to_string(mk_path(FLOWS_FILE))?;
        let records = parse_ns3_records(&s)?;
        Ok(records)
    }

    fn invoke_ns3(&self) -> Result<(), Error> {
        // We need to canonicalize the directories because we run `cd` below.
        let data_dir = fs::canonicalize(&self.data_dir)?;
        let data_dir = data_dir.display();
        let ns3_dir = fs::canonicalize(&self.ns3_dir)?;
        let ns3_dir = ns3_dir.display();

        let program = format!(
            "lena-flows --root={data_dir} --RngSeed={} --RngRun={}",
            self.rng.seed, self.rng.run
        );
        let run_command = match self.launcher {
            Launcher::Ns3 => format!("./ns3 run \"{program}\""),
            Launcher::Waf => format!("./waf --run \"{program}\""),
        };
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!(
                "cd {ns3_dir}; {run_command} > {data_dir}/output.txt 2>&1"
            ))
            .status()?;
        if !status.success() {
            return Err(Error::ExitStatus(status.code()));
        }
        Ok(())
    }
}

const FLOWS_FILE: &str = "flows.txt";
const MONITOR_FILE: &str = "flowmon.xml";

/// How the ns-3 program is launched from the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Derivative, serde::Serialize, serde::Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "lowercase")]
pub enum Launcher {
    /// `./ns3 run` (ns-3.36 and later).
    #[derivative(Default)]
    Ns3,
    /// `./waf --run` (older trees).
    Waf,
}

/// A static route installed by the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A default route through `gateway`.
    Default {
        /// The routed node.
        node: NodeId,
        /// The next hop.
        gateway: Ipv4Addr,
    },
    /// A route to `network/mask` out of the node's core interface.
    Network {
        /// The routed node.
        node: NodeId,
        /// The destination network.
        network: Ipv4Addr,
        /// The destination mask.
        mask: Ipv4Addr,
    },
}

/// An application to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum App {
    /// A packet sink.
    Server {
        /// The node the sink runs on.
        node: NodeId,
        /// The transport protocol.
        protocol: Protocol,
        /// The listening port.
        port: u16,
        /// The start time, if the application was started.
        start: Option<Nanosecs>,
    },
    /// A constant-rate client.
    Client {
        /// The node the client runs on.
        node: NodeId,
        /// The transport protocol.
        protocol: Protocol,
        /// The destination address.
        dst: Ipv4Addr,
        /// The destination port.
        port: u16,
        /// The inter-packet interval.
        interval: Nanosecs,
        /// The payload size.
        packet_size: Bytes,
        /// Packets sent before stopping.
        max_packets: u64,
        /// The start time, if the application was started.
        start: Option<Nanosecs>,
    },
}

impl App {
    /// Sets the start time.
    pub fn set_start(&mut self, at: Nanosecs) {
        match self {
            App::Server { start, .. } | App::Client { start, .. } => *start = Some(at),
        }
    }
}

/// One flow as recorded by the ns-3 flow monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    /// The monitor's flow id.
    pub id: FlowId,
    /// The classified five-tuple.
    pub tuple: FiveTuple,
    /// The flow's counters.
    pub stats: FlowStats,
}

/// The error type for [Ns3Simulation::run].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error parsing ns-3 formats.
    #[error("failed to parse ns-3 format")]
    ParseNs3(#[from] ParseNs3Error),

    /// The program exited unsuccessfully.
    #[error("ns-3 exited with status {0:?}")]
    ExitStatus(Option<i32>),

    /// IO error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn kind_str(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::BaseStation => "enb",
        NodeKind::Terminal => "ue",
        NodeKind::RemoteHost => "remote",
        NodeKind::Gateway => "pgw",
    }
}

fn translate_nodes(nodes: &[Node]) -> String {
    let mut s = String::new();
    // First line: # of nodes
    // id0 kind0 x0 y0 z0
    // id1 kind1 x1 y1 z1
    writeln!(s, "{}", nodes.len()).unwrap();
    for n in nodes {
        let p = n.position;
        writeln!(s, "{} {} {} {} {}", n.id, kind_str(n.kind), p.x, p.y, p.z).unwrap();
    }
    s
}

fn translate_config(
    radio: &RadioSpec,
    core: Option<&(NodeId, NodeId, CoreLink)>,
    stop: Nanosecs,
    rng: RngConfig,
) -> String {
    let mut s = String::new();
    writeln!(s, "scheduler {}", radio.scheduler).unwrap();
    writeln!(s, "pathloss {}", radio.pathloss).unwrap();
    writeln!(s, "bandwidth {}", radio.bandwidth).unwrap();
    if let Some((gateway, remote_host, link)) = core {
        // gateway remote_host rate(bps) mtu delay(ns)
        writeln!(
            s,
            "core {gateway} {remote_host} {} {} {}",
            link.data_rate.into_u64(),
            link.mtu,
            link.delay.into_u64()
        )
        .unwrap();
    }
    writeln!(s, "stop {}", stop.into_u64()).unwrap();
    writeln!(s, "rng {} {}", rng.seed, rng.run).unwrap();
    s
}

fn translate_attachments(attachments: &[(NodeId, NodeId)]) -> String {
    let mut s = String::new();
    // First line: # of attachments
    // ue0 enb0
    writeln!(s, "{}", attachments.len()).unwrap();
    for (ue, enb) in attachments {
        writeln!(s, "{ue} {enb}").unwrap();
    }
    s
}

fn translate_bearers(bearers: &[(Vec<NodeId>, Qci)]) -> String {
    let mut s = String::new();
    // First line: # of requests
    // qci0 gbr0 priority0 delay_budget0(ms) loss_rate0 n0 ue0_0 ue0_1 ...
    writeln!(s, "{}", bearers.len()).unwrap();
    for (ues, qci) in bearers {
        let ids = ues.iter().map(|id| id.to_string()).collect::<Vec<_>>();
        writeln!(
            s,
            "{} {} {} {} {} {} {}",
            qci.value(),
            u8::from(qci.is_gbr()),
            qci.priority(),
            qci.delay_budget_ms(),
            qci.error_loss_rate(),
            ues.len(),
            ids.join(" ")
        )
        .unwrap();
    }
    s
}

fn translate_routes(routes: &[Route]) -> String {
    let mut s = String::new();
    writeln!(s, "{}", routes.len()).unwrap();
    for route in routes {
        match route {
            Route::Default { node, gateway } => writeln!(s, "default {node} {gateway}").unwrap(),
            Route::Network {
                node,
                network,
                mask,
            } => writeln!(s, "network {node} {network} {mask}").unwrap(),
        }
    }
    s
}

fn fmt_start(start: Option<Nanosecs>) -> String {
    start.map_or_else(|| "-".to_owned(), |t| t.into_u64().to_string())
}

fn translate_apps(apps: &[App]) -> String {
    let mut s = String::new();
    // First line: # of apps
    // server node proto port start
    // client node proto dst port interval(ns) size(B) max_packets start
    writeln!(s, "{}", apps.len()).unwrap();
    for app in apps {
        match *app {
            App::Server {
                node,
                protocol,
                port,
                start,
            } => writeln!(s, "server {node} {protocol} {port} {}", fmt_start(start)).unwrap(),
            App::Client {
                node,
                protocol,
                dst,
                port,
                interval,
                packet_size,
                max_packets,
                start,
            } => writeln!(
                s,
                "client {node} {protocol} {dst} {port} {} {} {max_packets} {}",
                interval.into_u64(),
                packet_size.into_u64(),
                fmt_start(start)
            )
            .unwrap(),
        }
    }
    s
}

fn parse_ns3_records(s: &str) -> Result<Vec<FlowRecord>, ParseNs3Error> {
    s.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_ns3_record)
        .collect()
}

fn parse_ns3_record(s: &str) -> Result<FlowRecord, ParseNs3Error> {
    // id, sip, dip, proto, sport, dport, tx_pkts, rx_pkts, tx_bytes, rx_bytes, lost,
    // first_tx (ns), last_tx (ns), first_rx (ns or -), last_rx (ns or -), delay_sum (ns)
    const NR_NS3_FIELDS: usize = 16;
    let fields = s.split_whitespace().collect::<Vec<_>>();
    let nr_fields = fields.len();
    if nr_fields != NR_NS3_FIELDS {
        return Err(ParseNs3Error::WrongNrFields {
            expected: NR_NS3_FIELDS,
            got: nr_fields,
        });
    }
    let opt_time = |field: &str| -> Result<Option<Nanosecs>, ParseNs3Error> {
        match field {
            "-" => Ok(None),
            t => Ok(Some(t.parse()?)),
        }
    };
    Ok(FlowRecord {
        id: fields[0].parse()?,
        tuple: FiveTuple {
            src: fields[1].parse()?,
            dst: fields[2].parse()?,
            protocol: fields[3].parse()?,
            src_port: fields[4].parse()?,
            dst_port: fields[5].parse()?,
        },
        stats: FlowStats {
            tx_packets: fields[6].parse()?,
            rx_packets: fields[7].parse()?,
            tx_bytes: fields[8].parse()?,
            rx_bytes: fields[9].parse()?,
            lost_packets: fields[10].parse()?,
            time_first_tx: fields[11].parse()?,
            time_last_tx: fields[12].parse()?,
            time_first_rx: opt_time(fields[13])?,
            time_last_rx: opt_time(fields[14])?,
            delay_sum: fields[15].parse()?,
        },
    })
}

/// Copies the flow monitor's native XML dump, which the program writes next to its flow records
/// in `data_dir`, to `path`.
pub fn copy_monitor_dump(data_dir: impl AsRef<Path>, path: impl AsRef<Path>) -> io::Result<()> {
    fs::copy(data_dir.as_ref().join(MONITOR_FILE), path)?;
    Ok(())
}

/// Error parsing ns-3 formats.
#[derive(Debug, thiserror::Error)]
pub enum ParseNs3Error {
    /// Incorrect number of fields.
    #[error("Wrong number of fields (expected {expected}, got {got}")]
    WrongNrFields {
        /// Expected number of fields.
        expected: usize,
        /// Actual number of fields.
        got: usize,
    },

    /// Error parsing an integer field.
    #[error("Failed to parse field")]
    ParseInt(#[from] std::num::ParseIntError),

    /// Error parsing an address field.
    #[error("Failed to parse address")]
    ParseAddr(#[from] std::net::AddrParseError),
}
