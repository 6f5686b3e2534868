//! The aggregate report produced after a run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::backend::{EngineWarning, FiveTuple, FlowId, FlowStats};
use crate::traffic::TrafficClass;
use crate::units::{Bytes, Nanosecs};

/// Received throughput of a flow.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Throughput {
    /// Kilobits (1024 bits) per second.
    Kbps(f64),
    /// Nothing was received, so throughput is undefined.
    NoTraffic,
}

impl Throughput {
    /// `rx_bytes * 8 / (last_rx - first_tx) / 1024`, with times in seconds.
    pub fn from_stats(stats: &FlowStats) -> Self {
        if stats.rx_packets == 0 {
            return Throughput::NoTraffic;
        }
        match stats.time_last_rx {
            Some(last_rx) if last_rx > stats.time_first_tx => {
                let secs = (last_rx - stats.time_first_tx).into_secs_f64();
                Throughput::Kbps(stats.rx_bytes.into_f64() * 8.0 / secs / 1024.0)
            }
            _ => Throughput::NoTraffic,
        }
    }

    pub fn kbps(&self) -> Option<f64> {
        match *self {
            Throughput::Kbps(v) => Some(v),
            Throughput::NoTraffic => None,
        }
    }
}

/// One measured flow.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FlowEntry {
    pub flow: FlowId,
    pub five_tuple: FiveTuple,
    /// Traffic class, when the five-tuple matches an installed pair.
    pub class: Option<TrafficClass>,
    pub terminal: Option<usize>,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: Bytes,
    pub rx_bytes: Bytes,
    pub lost_packets: u64,
    pub throughput: Throughput,
    /// `(tx - rx) / tx`; absent when nothing was sent.
    pub loss_ratio: Option<f64>,
    pub mean_delay: Option<Nanosecs>,
    /// Time from the first transmission to the first reception.
    pub first_packet_latency: Option<Nanosecs>,
}

impl FlowEntry {
    pub fn new(
        flow: FlowId,
        five_tuple: FiveTuple,
        class: Option<TrafficClass>,
        terminal: Option<usize>,
        stats: &FlowStats,
    ) -> Self {
        let loss_ratio = (stats.tx_packets > 0).then(|| {
            stats.tx_packets.saturating_sub(stats.rx_packets) as f64 / stats.tx_packets as f64
        });
        let mean_delay =
            (stats.rx_packets > 0).then(|| Nanosecs::new(stats.delay_sum.into_u64() / stats.rx_packets));
        let first_packet_latency = stats
            .time_first_rx
            .filter(|&rx| rx >= stats.time_first_tx)
            .map(|rx| rx - stats.time_first_tx);
        Self {
            flow,
            five_tuple,
            class,
            terminal,
            tx_packets: stats.tx_packets,
            rx_packets: stats.rx_packets,
            tx_bytes: stats.tx_bytes,
            rx_bytes: stats.rx_bytes,
            lost_packets: stats.lost_packets,
            throughput: Throughput::from_stats(stats),
            loss_ratio,
            mean_delay,
            first_packet_latency,
        }
    }
}

/// Summed counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Totals {
    pub nr_flows: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: Bytes,
    pub rx_bytes: Bytes,
    pub lost_packets: u64,
}

impl Totals {
    fn add(&mut self, entry: &FlowEntry) {
        self.nr_flows += 1;
        self.tx_packets += entry.tx_packets;
        self.rx_packets += entry.rx_packets;
        self.tx_bytes += entry.tx_bytes;
        self.rx_bytes += entry.rx_bytes;
        self.lost_packets += entry.lost_packets;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClassTotals {
    pub class: TrafficClass,
    #[serde(flatten)]
    pub totals: Totals,
}

/// A recoverable condition met while running or measuring.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReportWarning {
    NoTraffic { flow: FlowId },
    Unclassified { flow: FlowId },
    MonitorUnavailable { reason: String },
    Engine { reason: String },
}

impl std::fmt::Display for ReportWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportWarning::NoTraffic { flow } => write!(f, "flow {flow} received nothing"),
            ReportWarning::Unclassified { flow } => write!(f, "flow {flow} could not be classified"),
            ReportWarning::MonitorUnavailable { reason } => write!(f, "monitor unavailable: {reason}"),
            ReportWarning::Engine { reason } => write!(f, "engine: {reason}"),
        }
    }
}

/// Per-flow entries ordered by flow id, with totals and warnings.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AggregateReport {
    entries: Vec<FlowEntry>,
    totals: Totals,
    per_class: Vec<ClassTotals>,
    warnings: Vec<ReportWarning>,
}

impl AggregateReport {
    /// Builds a report from entries in any order.
    pub fn new(mut entries: Vec<FlowEntry>, mut warnings: Vec<ReportWarning>) -> Self {
        entries.sort_by_key(|e| e.flow);
        let mut totals = Totals::default();
        let mut per_class = TrafficClass::ALL.map(|class| ClassTotals {
            class,
            totals: Totals::default(),
        });
        for entry in &entries {
            totals.add(entry);
            if let Some(class) = entry.class {
                if let Some(slot) = per_class.iter_mut().find(|c| c.class == class) {
                    slot.totals.add(entry);
                }
            }
            if entry.throughput == Throughput::NoTraffic {
                warnings.push(ReportWarning::NoTraffic { flow: entry.flow });
            }
        }
        Self {
            entries,
            totals,
            per_class: per_class
                .into_iter()
                .filter(|c| c.totals.nr_flows > 0)
                .collect(),
            warnings,
        }
    }

    /// An empty report carrying one warning.
    pub fn empty(warning: ReportWarning) -> Self {
        Self {
            warnings: vec![warning],
            ..Default::default()
        }
    }

    pub fn push_engine_warning(&mut self, warning: &EngineWarning) {
        self.warnings.push(ReportWarning::Engine {
            reason: warning.to_string(),
        });
    }

    pub fn entries(&self) -> &[FlowEntry] {
        &self.entries
    }

    pub fn entries_of(&self, class: TrafficClass) -> impl Iterator<Item = &FlowEntry> + '_ {
        self.entries.iter().filter(move |e| e.class == Some(class))
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn class_totals(&self, class: TrafficClass) -> Option<&Totals> {
        self.per_class
            .iter()
            .find(|c| c.class == class)
            .map(|c| &c.totals)
    }

    pub fn warnings(&self) -> &[ReportWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn tuple() -> FiveTuple {
        FiveTuple {
            src: Ipv4Addr::new(1, 0, 0, 2),
            dst: Ipv4Addr::new(7, 0, 0, 2),
            protocol: 17,
            src_port: 49153,
            dst_port: 1235,
        }
    }

    fn delivered() -> FlowStats {
        FlowStats {
            tx_packets: 125,
            rx_packets: 125,
            tx_bytes: Bytes::new(125_000),
            rx_bytes: Bytes::new(125_000),
            time_first_tx: Nanosecs::ZERO,
            time_last_tx: Nanosecs::from_millis(990),
            time_first_rx: Some(Nanosecs::from_millis(10)),
            time_last_rx: Some(Nanosecs::from_secs(1)),
            delay_sum: Nanosecs::from_millis(1250),
            ..Default::default()
        }
    }

    #[test]
    fn throughput_formula() {
        assert_eq!(
            Throughput::from_stats(&delivered()),
            Throughput::Kbps(976.5625)
        );
    }

    #[test]
    fn nothing_received_is_no_traffic() {
        let stats = FlowStats {
            tx_packets: 10,
            tx_bytes: Bytes::new(10_240),
            time_first_tx: Nanosecs::from_millis(10),
            ..Default::default()
        };
        assert_eq!(Throughput::from_stats(&stats), Throughput::NoTraffic);
        let entry = FlowEntry::new(FlowId::new(1), tuple(), None, None, &stats);
        assert_eq!(entry.loss_ratio, Some(1.0));
        assert_eq!(entry.mean_delay, None);
        assert_eq!(entry.first_packet_latency, None);
    }

    #[test]
    fn zero_duration_is_no_traffic() {
        let stats = FlowStats {
            time_last_rx: Some(Nanosecs::ZERO),
            ..delivered()
        };
        assert_eq!(Throughput::from_stats(&stats), Throughput::NoTraffic);
    }

    #[test]
    fn entry_latency_and_delay() {
        let entry = FlowEntry::new(FlowId::new(1), tuple(), None, None, &delivered());
        assert_eq!(entry.mean_delay, Some(Nanosecs::from_millis(10)));
        assert_eq!(entry.first_packet_latency, Some(Nanosecs::from_millis(10)));
        assert_eq!(entry.loss_ratio, Some(0.0));
    }

    #[test]
    fn report_orders_and_totals() {
        let silent = FlowStats {
            tx_packets: 5,
            ..Default::default()
        };
        let report = AggregateReport::new(
            vec![
                FlowEntry::new(
                    FlowId::new(2),
                    tuple(),
                    Some(TrafficClass::Uplink),
                    Some(0),
                    &silent,
                ),
                FlowEntry::new(
                    FlowId::new(1),
                    tuple(),
                    Some(TrafficClass::Downlink),
                    Some(0),
                    &delivered(),
                ),
            ],
            Vec::new(),
        );
        let ids = report.entries().iter().map(|e| e.flow).collect::<Vec<_>>();
        assert_eq!(ids, vec![FlowId::new(1), FlowId::new(2)]);
        assert_eq!(report.totals().nr_flows, 2);
        assert_eq!(report.totals().tx_packets, 130);
        assert_eq!(
            report.class_totals(TrafficClass::Downlink).map(|t| t.rx_packets),
            Some(125)
        );
        assert_eq!(report.class_totals(TrafficClass::Peer), None);
        assert_eq!(
            report.warnings(),
            &[ReportWarning::NoTraffic { flow: FlowId::new(2) }]
        );
    }

    #[test]
    fn throughput_serialization() -> anyhow::Result<()> {
        let values = vec![Throughput::Kbps(976.5625), Throughput::NoTraffic];
        insta::assert_yaml_snapshot!(values, @r###"
        - kbps: 976.5625
        - no-traffic
        "###);
        Ok(())
    }

    #[test]
    fn write_json_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.json");
        let report = AggregateReport::new(
            vec![FlowEntry::new(
                FlowId::new(1),
                tuple(),
                Some(TrafficClass::Downlink),
                Some(0),
                &delivered(),
            )],
            vec![ReportWarning::Engine {
                reason: "simulation exited with status 1".into(),
            }],
        );
        report.write_json(&path)?;
        let read: AggregateReport = serde_json::from_reader(File::open(&path)?)?;
        assert_eq!(read, report);
        Ok(())
    }
}
