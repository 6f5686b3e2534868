//! Position allocators used by the topology builder.

use rand::prelude::*;
use rand_distr::UnitDisc;

use crate::network::types::Position;
use crate::spec::ConfigError;

/// How the nodes of one group are positioned.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Take positions in order, wrapping around when the group outgrows the list.
    List(Vec<Position>),
    /// Uniformly distributed in a disc around `center`. Nodes keep the center's height.
    UniformDisc { center: Position, radius: f64 },
    /// Node `i` sits at `origin + (i * spacing, 0, 0)`.
    Line { origin: Position, spacing: f64 },
}

impl Placement {
    pub fn disc(x: f64, y: f64, radius: f64) -> Self {
        Self::UniformDisc {
            center: Position::new(x, y, 0.0),
            radius,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Placement::List(points) if points.is_empty() => Err(ConfigError::EmptyPositionList),
            Placement::UniformDisc { radius, .. } if !radius.is_finite() || *radius < 0.0 => {
                Err(ConfigError::InvalidRadius(*radius))
            }
            Placement::Line { spacing, .. } if !spacing.is_finite() => {
                Err(ConfigError::InvalidSpacing(*spacing))
            }
            _ => Ok(()),
        }
    }

    /// Allocates `count` positions. Only [`Placement::UniformDisc`] draws from `rng`.
    ///
    /// PRECONDITION: `self` has been validated.
    pub(crate) fn allocate<R>(&self, count: usize, rng: &mut R) -> Vec<Position>
    where
        R: Rng + ?Sized,
    {
        match self {
            Placement::List(points) => points.iter().copied().cycle().take(count).collect(),
            &Placement::UniformDisc { center, radius } => (0..count)
                .map(|_| {
                    let [x, y]: [f64; 2] = UnitDisc.sample(rng);
                    Position::new(center.x + radius * x, center.y + radius * y, center.z)
                })
                .collect(),
            &Placement::Line { origin, spacing } => (0..count)
                .map(|i| Position::new(origin.x + spacing * i as f64, origin.y, origin.z))
                .collect(),
        }
    }
}
