//! Terminal to base-station attachment.

use crate::backend::RadioStack;
use crate::network::types::Devices;
use crate::spec::ConfigError;

/// How terminals pick their base station.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachPolicy {
    /// Terminal `i` attaches to base station `i`. Both sequences must have the same length.
    Indexed,
    /// Every terminal of group `g` attaches to base station `anchors[g]`.
    Grouped { anchors: Vec<usize> },
}

impl AttachPolicy {
    /// All groups anchored to the first base station.
    pub fn single_cell(nr_groups: usize) -> Self {
        Self::Grouped {
            anchors: vec![0; nr_groups],
        }
    }

    /// Resolves the policy into one base station index per terminal.
    ///
    /// Correctness properties:
    ///
    /// - Indexed pairing needs as many terminals as base stations.
    /// - Group pairing needs exactly one anchor per group, each naming an existing base station.
    pub(crate) fn resolve(
        &self,
        nr_base_stations: usize,
        group_sizes: &[usize],
    ) -> Result<AttachmentPlan, ConfigError> {
        let nr_terminals = group_sizes.iter().sum::<usize>();
        let serving = match self {
            AttachPolicy::Indexed => {
                // CORRECTNESS: Indexed pairing needs as many terminals as base stations.
                if nr_terminals != nr_base_stations {
                    return Err(ConfigError::MismatchedPairing {
                        terminals: nr_terminals,
                        base_stations: nr_base_stations,
                    });
                }
                (0..nr_terminals).collect()
            }
            AttachPolicy::Grouped { anchors } => {
                // CORRECTNESS: Exactly one anchor per group.
                if anchors.len() != group_sizes.len() {
                    return Err(ConfigError::MismatchedAnchors {
                        anchors: anchors.len(),
                        groups: group_sizes.len(),
                    });
                }
                let mut serving = Vec::with_capacity(nr_terminals);
                for (group, (&anchor, &size)) in anchors.iter().zip(group_sizes).enumerate() {
                    // CORRECTNESS: Every anchor names an existing base station.
                    if anchor >= nr_base_stations {
                        return Err(ConfigError::UnknownAnchor {
                            group,
                            anchor,
                            base_stations: nr_base_stations,
                        });
                    }
                    serving.extend(std::iter::repeat(anchor).take(size));
                }
                serving
            }
        };
        Ok(AttachmentPlan { serving })
    }
}

/// The resolved attachment, computed before any device exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPlan {
    serving: Vec<usize>,
}

impl AttachmentPlan {
    /// Attaches every terminal device to its base station device.
    ///
    /// PRECONDITION: `devices` holds one device per planned terminal and per referenced base
    /// station, which validation and device installation guarantee.
    pub(crate) fn apply<B>(&self, devices: &Devices, radio: &mut B) -> Attachments
    where
        B: RadioStack + ?Sized,
    {
        for (terminal, &bs) in self.serving.iter().enumerate() {
            let ue = devices.terminals[terminal];
            let enb = devices.base_stations[bs];
            log::debug!("attaching terminal {terminal} ({ue}) to base station {bs} ({enb})");
            radio.attach(ue, enb);
        }
        Attachments {
            serving: self.serving.clone(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.serving.len()
    }
}

/// The attachment relation: exactly one base station per terminal.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Attachments {
    serving: Vec<usize>,
}

impl Attachments {
    /// The base station index serving `terminal`.
    pub fn serving(&self, terminal: usize) -> Option<usize> {
        self.serving.get(terminal).copied()
    }

    /// Terminal indices attached to base station `bs`.
    pub fn attached_to(&self, bs: usize) -> impl Iterator<Item = usize> + '_ {
        self.serving
            .iter()
            .enumerate()
            .filter_map(move |(ue, &serving)| (serving == bs).then_some(ue))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.serving.iter().copied().enumerate()
    }

    delegate::delegate! {
        to self.serving {
            pub fn len(&self) -> usize;

            pub fn is_empty(&self) -> bool;
        }
    }
}
