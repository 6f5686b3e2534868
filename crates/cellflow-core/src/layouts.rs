//! Ready-made scenario shapes.

use crate::attach::AttachPolicy;
use crate::bearer::{BearerSpec, ProvisionMode, Qci};
use crate::network::types::Position;
use crate::placement::Placement;
use crate::spec::{NodeGroup, ScenarioSpec};
use crate::traffic::{TrafficClass, TrafficSpec};
use crate::units::Nanosecs;

/// `n` independent cells with one terminal each. Base stations sit on a line `distance` metres
/// apart; terminals are spread over a disc of `radius` metres around the origin and attach by
/// index. Every terminal carries downlink, uplink and peer traffic.
pub fn multi_cell(n: usize, distance: f64, radius: f64) -> ScenarioSpec {
    ScenarioSpec::builder()
        .base_stations(NodeGroup::new(
            n,
            Placement::Line {
                origin: Position::new(0.866, 0.2, 0.0),
                spacing: distance,
            },
        ))
        .terminal_groups(vec![NodeGroup::new(n, Placement::disc(0.0, 0.0, radius))])
        .attachment(AttachPolicy::Indexed)
        .build()
}

/// Two base stations, each serving one terminal. The second terminal's disc is offset by
/// `(0.3, 0.3)` and is 30 metres wider. Bearers are requested for whole groups, and there is no
/// peer traffic.
pub fn two_cell(radius: f64) -> ScenarioSpec {
    ScenarioSpec::builder()
        .base_stations(NodeGroup::new(
            2,
            Placement::List(vec![
                Position::new(0.866, 0.1, 0.0),
                Position::new(0.5, 0.4, 0.0),
            ]),
        ))
        .terminal_groups(vec![
            NodeGroup::new(1, Placement::disc(0.0, 0.0, radius)),
            NodeGroup::new(1, Placement::disc(0.3, 0.3, radius + 30.0)),
        ])
        .attachment(AttachPolicy::Grouped {
            anchors: vec![0, 1],
        })
        .bearers(
            BearerSpec::builder()
                .classes(vec![Qci::GbrConvVoice])
                .mode(ProvisionMode::Batch)
                .build(),
        )
        .traffic(
            TrafficSpec::builder()
                .classes(vec![TrafficClass::Downlink, TrafficClass::Uplink])
                .build(),
        )
        .sim_time(Nanosecs::from_secs(3))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_cell_pairs_by_index() -> anyhow::Result<()> {
        let spec = multi_cell(4, 60.0, 50.0).validate()?;
        assert_eq!(spec.nr_base_stations(), 4);
        assert_eq!(spec.nr_terminals(), 4);
        Ok(())
    }

    #[test]
    fn two_cell_anchors_each_group() -> anyhow::Result<()> {
        let spec = two_cell(50.0);
        assert_eq!(
            spec.terminal_groups[1].placement,
            Placement::disc(0.3, 0.3, 80.0)
        );
        let spec = spec.validate()?;
        assert_eq!(spec.nr_terminals(), 2);
        Ok(())
    }
}
