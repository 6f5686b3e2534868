//! This module defines scenario specifications ([`ScenarioSpec`]): where nodes go, how terminals
//! attach, which bearers they carry, and what traffic they exchange. A specification is
//! validated in full before any collaborator is touched.

use std::path::PathBuf;

use crate::{
    attach::{AttachPolicy, AttachmentPlan},
    backend::CoreLink,
    bearer::BearerSpec,
    placement::Placement,
    traffic::{TrafficClass, TrafficSpec},
    units::Nanosecs,
};

/// A group of nodes sharing a placement policy.
#[derive(Debug, Clone, PartialEq, derive_new::new, serde::Serialize, serde::Deserialize)]
pub struct NodeGroup {
    pub count: usize,
    pub placement: Placement,
}

/// Radio stack parameters.
#[derive(Debug, Clone, PartialEq, Eq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RadioSpec {
    #[builder(default = "ns3::PfFfMacScheduler".into(), setter(into))]
    pub scheduler: String,
    #[builder(default = "ns3::FriisPropagationLossModel".into(), setter(into))]
    pub pathloss: String,
    /// Downlink and uplink bandwidth, in resource blocks.
    #[builder(default = 25)]
    pub bandwidth: u8,
}

impl Default for RadioSpec {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Selects the pseudo-random stream of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RngConfig {
    pub seed: u64,
    pub run: u64,
}

impl Default for RngConfig {
    fn default() -> Self {
        Self { seed: 1, run: 1 }
    }
}

impl RngConfig {
    /// The seed of the single stream a scenario draws from.
    pub fn stream_seed(&self) -> u64 {
        self.seed
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(self.run)
    }
}

/// Where results are written.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    /// The JSON aggregate report.
    pub report: Option<PathBuf>,
    /// The monitor's native dump.
    pub monitor: Option<PathBuf>,
}

/// A scenario specification.
#[derive(Debug, Clone, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct ScenarioSpec {
    pub base_stations: NodeGroup,
    pub terminal_groups: Vec<NodeGroup>,
    pub attachment: AttachPolicy,
    #[builder(default)]
    #[serde(default)]
    pub bearers: BearerSpec,
    #[builder(default)]
    #[serde(default)]
    pub traffic: TrafficSpec,
    #[builder(default)]
    #[serde(default)]
    pub radio: RadioSpec,
    #[builder(default)]
    #[serde(default)]
    pub core: CoreLink,
    /// Simulated duration.
    #[builder(default = Nanosecs::from_secs(10), setter(into))]
    #[serde(default = "default_sim_time")]
    pub sim_time: Nanosecs,
    #[builder(default)]
    #[serde(default)]
    pub rng: RngConfig,
    #[builder(default)]
    #[serde(default)]
    pub output: OutputSpec,
}

fn default_sim_time() -> Nanosecs {
    Nanosecs::from_secs(10)
}

impl ScenarioSpec {
    /// Validate a specification, producing a `ValidSpec`.
    ///
    /// Correctness properties:
    ///
    /// - There is at least one base station and at least one terminal group.
    /// - No terminal group is empty.
    /// - Every placement policy is well-formed.
    /// - The attachment policy resolves for these group sizes.
    /// - At least one bearer class is requested.
    /// - Traffic pacing is positive, every port range fits, and no two sinks share a socket.
    /// - The simulated duration is positive.
    pub fn validate(self) -> Result<ValidSpec, ConfigError> {
        // CORRECTNESS: There is at least one base station and at least one terminal group.
        if self.base_stations.count == 0 {
            return Err(ConfigError::NoBaseStations);
        }
        if self.terminal_groups.is_empty() {
            return Err(ConfigError::NoTerminalGroups);
        }
        // CORRECTNESS: No terminal group is empty.
        if let Some(group) = self.terminal_groups.iter().position(|g| g.count == 0) {
            return Err(ConfigError::EmptyTerminalGroup(group));
        }
        // CORRECTNESS: Every placement policy is well-formed.
        self.base_stations.placement.validate()?;
        for group in &self.terminal_groups {
            group.placement.validate()?;
        }
        // CORRECTNESS: The attachment policy resolves for these group sizes.
        let group_sizes = self
            .terminal_groups
            .iter()
            .map(|g| g.count)
            .collect::<Vec<_>>();
        let plan = self
            .attachment
            .resolve(self.base_stations.count, &group_sizes)?;
        // CORRECTNESS: At least one bearer class is requested.
        if self.bearers.classes.is_empty() {
            return Err(ConfigError::NoBearerClasses);
        }
        // CORRECTNESS: Traffic pacing is positive, every port range fits, and no two sinks share a
        // socket.
        self.traffic.validate(plan.len())?;
        // CORRECTNESS: The simulated duration is positive.
        if self.sim_time == Nanosecs::ZERO {
            return Err(ConfigError::ZeroSimTime);
        }
        if self.traffic.start >= self.sim_time {
            log::warn!(
                "traffic starts at {} but the run stops at {}; no packets will flow",
                self.traffic.start,
                self.sim_time
            );
        }
        Ok(ValidSpec {
            base_stations: self.base_stations,
            terminal_groups: self.terminal_groups,
            plan,
            bearers: self.bearers,
            traffic: self.traffic,
            radio: self.radio,
            core: self.core,
            sim_time: self.sim_time,
            rng: self.rng,
            output: self.output,
        })
    }
}

/// A `ScenarioSpec` that has been validated. Its groups, attachment plan, bearers and traffic
/// are guaranteed to satisfy the properties listed in `ScenarioSpec::validate()`.
#[derive(Debug, Clone)]
pub struct ValidSpec {
    pub(crate) base_stations: NodeGroup,
    pub(crate) terminal_groups: Vec<NodeGroup>,
    pub(crate) plan: AttachmentPlan,
    pub(crate) bearers: BearerSpec,
    pub(crate) traffic: TrafficSpec,
    pub(crate) radio: RadioSpec,
    pub(crate) core: CoreLink,
    pub(crate) sim_time: Nanosecs,
    pub(crate) rng: RngConfig,
    pub(crate) output: OutputSpec,
}

impl ValidSpec {
    pub fn nr_terminals(&self) -> usize {
        self.plan.len()
    }

    pub fn nr_base_stations(&self) -> usize {
        self.base_stations.count
    }

    pub fn rng(&self) -> RngConfig {
        self.rng
    }

    /// Replaces the run index, keeping everything else.
    pub fn with_run(mut self, run: u64) -> Self {
        self.rng.run = run;
        self
    }

    pub fn output(&self) -> &OutputSpec {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputSpec {
        &mut self.output
    }
}

/// Scenario configuration error. These are always reported before any device is installed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one base station is required")]
    NoBaseStations,

    #[error("at least one terminal group is required")]
    NoTerminalGroups,

    #[error("terminal group {0} is empty")]
    EmptyTerminalGroup(usize),

    #[error("position list is empty")]
    EmptyPositionList,

    #[error("invalid disc radius {0}")]
    InvalidRadius(f64),

    #[error("invalid line spacing {0}")]
    InvalidSpacing(f64),

    #[error("indexed attachment needs as many terminals as base stations (got {terminals} terminals, {base_stations} base stations)")]
    MismatchedPairing {
        terminals: usize,
        base_stations: usize,
    },

    #[error("group attachment needs one anchor per group (got {anchors} anchors, {groups} groups)")]
    MismatchedAnchors { anchors: usize, groups: usize },

    #[error("group {group} is anchored to base station {anchor}, but there are only {base_stations}")]
    UnknownAnchor {
        group: usize,
        anchor: usize,
        base_stations: usize,
    },

    #[error("at least one bearer class is required")]
    NoBearerClasses,

    #[error("inter-packet interval must be positive")]
    ZeroInterval,

    #[error("packet size must be positive")]
    ZeroPacketSize,

    #[error("{class} ports starting at {base} cannot cover {nr_terminals} terminals")]
    PortRangeExhausted {
        class: TrafficClass,
        base: u16,
        nr_terminals: usize,
    },

    #[error("downlink and peer sinks of terminal {terminal} both listen on port {port}")]
    PortCollision { terminal: usize, port: u16 },

    #[error("simulation time must be positive")]
    ZeroSimTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn valid_spec_succeeds() {
        assert!(testing::two_cell_spec().validate().is_ok());
        assert!(testing::multi_cell_spec(1).validate().is_ok());
    }

    #[test]
    fn zero_base_stations_fails() {
        let mut spec = testing::two_cell_spec();
        spec.base_stations.count = 0;
        assert!(matches!(spec.validate(), Err(ConfigError::NoBaseStations)));
    }

    #[test]
    fn empty_terminal_group_fails() {
        let mut spec = testing::two_cell_spec();
        spec.terminal_groups[1].count = 0;
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::EmptyTerminalGroup(1))
        ));
        let mut spec = testing::two_cell_spec();
        spec.terminal_groups.clear();
        assert!(matches!(spec.validate(), Err(ConfigError::NoTerminalGroups)));
    }

    #[test]
    fn mismatched_indexed_pairing_fails() {
        let mut spec = testing::multi_cell_spec(2);
        spec.terminal_groups[0].count = 3;
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::MismatchedPairing {
                terminals: 3,
                base_stations: 2
            })
        ));
    }

    #[test]
    fn no_bearer_classes_fails() {
        let mut spec = testing::multi_cell_spec(2);
        spec.bearers.classes.clear();
        assert!(matches!(spec.validate(), Err(ConfigError::NoBearerClasses)));
    }

    #[test]
    fn zero_sim_time_fails() {
        let mut spec = testing::multi_cell_spec(2);
        spec.sim_time = Nanosecs::ZERO;
        assert!(matches!(spec.validate(), Err(ConfigError::ZeroSimTime)));
    }

    #[test]
    fn zero_interval_fails() {
        let mut spec = testing::multi_cell_spec(2);
        spec.traffic.interval = Nanosecs::ZERO;
        assert!(matches!(spec.validate(), Err(ConfigError::ZeroInterval)));
    }

    #[test]
    fn stream_seed_depends_on_run() {
        let a = RngConfig { seed: 1, run: 1 };
        let b = RngConfig { seed: 1, run: 2 };
        assert_ne!(a.stream_seed(), b.stream_seed());
        assert_eq!(a.stream_seed(), RngConfig::default().stream_seed());
    }

    #[test]
    fn spec_deserializes_with_defaults() -> anyhow::Result<()> {
        let json = r#"{
            "base_stations": { "count": 1, "placement": { "list": [{ "x": 0.866, "y": 0.2 }] } },
            "terminal_groups": [
                { "count": 1, "placement": { "uniform-disc": { "center": { "x": 0.0, "y": 0.0 }, "radius": 50.0 } } }
            ],
            "attachment": "indexed"
        }"#;
        let spec: ScenarioSpec = serde_json::from_str(json)?;
        assert_eq!(spec.sim_time, Nanosecs::from_secs(10));
        assert_eq!(spec.traffic.interval, Nanosecs::from_millis(100));
        assert_eq!(spec.radio.bandwidth, 25);
        let spec = spec.validate()?;
        assert_eq!(spec.nr_terminals(), 1);
        Ok(())
    }
}
