//! Post-run flow classification and aggregation.

use crate::backend::Monitor;
use crate::network::types::AddressBook;
use crate::report::{AggregateReport, FlowEntry, ReportWarning};
use crate::traffic::{Protocol, TrafficMatrix};

/// Pulls the monitor's flow records and turns them into a report. Measurement failures never
/// escape: an unavailable monitor yields an empty report carrying a warning.
pub fn aggregate<M>(monitor: &mut M, matrix: &TrafficMatrix, addresses: &AddressBook) -> AggregateReport
where
    M: Monitor + ?Sized,
{
    monitor.check_for_lost_packets();
    let stats = match monitor.flow_stats() {
        Ok(stats) => stats,
        Err(e) => {
            log::warn!("flow monitor report unavailable: {e}");
            return AggregateReport::empty(ReportWarning::MonitorUnavailable {
                reason: e.to_string(),
            });
        }
    };
    let pairs = matrix.by_destination(addresses);
    let mut entries = Vec::with_capacity(stats.len());
    let mut warnings = Vec::new();
    for (flow, stats) in stats {
        let Some(tuple) = monitor.classify(flow) else {
            log::warn!("flow {flow} has no five-tuple, skipping");
            warnings.push(ReportWarning::Unclassified { flow });
            continue;
        };
        let pair = Protocol::from_number(tuple.protocol)
            .and_then(|proto| pairs.get(&(tuple.dst, proto, tuple.dst_port)));
        if pair.is_none() {
            log::debug!("flow {flow} ({tuple}) matches no installed pair");
        }
        let entry = FlowEntry::new(
            flow,
            tuple,
            pair.map(|p| p.class),
            pair.map(|p| p.terminal),
            &stats,
        );
        if entry.throughput.kbps().is_none() {
            log::warn!("flow {flow} ({tuple}) received no traffic");
        }
        entries.push(entry);
    }
    let report = AggregateReport::new(entries, warnings);
    log::info!(
        "aggregated {} flows, {} warnings",
        report.entries().len(),
        report.warnings().len()
    );
    report
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::backend::{FiveTuple, FlowId, FlowStats};
    use crate::network::types::NodeId;
    use crate::report::Throughput;
    use crate::testing::ScriptedBackend;
    use crate::traffic::{TrafficClass, TrafficSpec};
    use crate::units::{Bytes, Nanosecs};

    fn setup() -> anyhow::Result<(TrafficMatrix, AddressBook)> {
        let matrix = TrafficMatrix::generate(
            &TrafficSpec::default(),
            &[NodeId::new(0), NodeId::new(1)],
            NodeId::new(2),
        )?;
        let addresses = AddressBook {
            remote_host: Ipv4Addr::new(1, 0, 0, 2),
            terminal_gateway: Ipv4Addr::new(7, 0, 0, 1),
            terminals: vec![Ipv4Addr::new(7, 0, 0, 2), Ipv4Addr::new(7, 0, 0, 3)],
        };
        Ok((matrix, addresses))
    }

    fn udp(src: Ipv4Addr, dst: Ipv4Addr, dst_port: u16) -> FiveTuple {
        FiveTuple {
            src,
            dst,
            protocol: 17,
            src_port: 49153,
            dst_port,
        }
    }

    fn delivered() -> FlowStats {
        FlowStats {
            tx_packets: 125,
            rx_packets: 125,
            tx_bytes: Bytes::new(125_000),
            rx_bytes: Bytes::new(125_000),
            time_first_rx: Some(Nanosecs::from_millis(5)),
            time_last_rx: Some(Nanosecs::from_secs(1)),
            ..Default::default()
        }
    }

    #[test]
    fn flows_are_classified_by_destination() -> anyhow::Result<()> {
        let (matrix, addresses) = setup()?;
        let mut backend = ScriptedBackend::new();
        backend.script_flow(
            FlowId::new(2),
            udp(Ipv4Addr::new(7, 0, 0, 2), Ipv4Addr::new(1, 0, 0, 2), 2001),
            delivered(),
        );
        backend.script_flow(
            FlowId::new(1),
            udp(Ipv4Addr::new(1, 0, 0, 2), Ipv4Addr::new(7, 0, 0, 3), 1236),
            delivered(),
        );
        backend.script_flow(
            FlowId::new(3),
            udp(Ipv4Addr::new(7, 0, 0, 3), Ipv4Addr::new(7, 0, 0, 2), 3001),
            FlowStats::default(),
        );
        let report = aggregate(&mut backend, &matrix, &addresses);
        let classes = report
            .entries()
            .iter()
            .map(|e| (e.flow.inner(), e.class, e.terminal))
            .collect::<Vec<_>>();
        assert_eq!(
            classes,
            vec![
                (1, Some(TrafficClass::Downlink), Some(1)),
                (2, Some(TrafficClass::Uplink), Some(0)),
                (3, Some(TrafficClass::Peer), Some(0)),
            ]
        );
        assert_eq!(report.entries()[0].throughput, Throughput::Kbps(976.5625));
        assert_eq!(report.entries()[2].throughput, Throughput::NoTraffic);
        assert_eq!(
            report.warnings(),
            &[ReportWarning::NoTraffic { flow: FlowId::new(3) }]
        );
        assert!(backend.checked_for_lost_packets());
        Ok(())
    }

    #[test]
    fn unknown_destinations_are_kept_unclassified() -> anyhow::Result<()> {
        let (matrix, addresses) = setup()?;
        let mut backend = ScriptedBackend::new();
        backend.script_flow(
            FlowId::new(1),
            udp(Ipv4Addr::new(7, 0, 0, 2), Ipv4Addr::new(1, 0, 0, 2), 9999),
            delivered(),
        );
        let report = aggregate(&mut backend, &matrix, &addresses);
        assert_eq!(report.entries().len(), 1);
        assert_eq!(report.entries()[0].class, None);
        assert_eq!(report.totals().nr_flows, 1);
        Ok(())
    }

    #[test]
    fn flows_without_five_tuple_are_skipped() -> anyhow::Result<()> {
        let (matrix, addresses) = setup()?;
        let mut backend = ScriptedBackend::new();
        backend.script_unclassified_flow(FlowId::new(4), delivered());
        let report = aggregate(&mut backend, &matrix, &addresses);
        assert!(report.is_empty());
        assert_eq!(
            report.warnings(),
            &[ReportWarning::Unclassified { flow: FlowId::new(4) }]
        );
        Ok(())
    }

    #[test]
    fn unavailable_monitor_gives_empty_report() -> anyhow::Result<()> {
        let (matrix, addresses) = setup()?;
        let mut backend = ScriptedBackend::new();
        backend.fail_monitor();
        let report = aggregate(&mut backend, &matrix, &addresses);
        assert!(report.is_empty());
        assert!(matches!(
            report.warnings(),
            [ReportWarning::MonitorUnavailable { .. }]
        ));
        Ok(())
    }
}
