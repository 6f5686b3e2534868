//! QoS classes and data radio bearer provisioning.

use crate::backend::RadioStack;
use crate::network::types::Devices;

/// EPS QoS class identifiers (3GPP TS 23.203, table 6.1.7).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Qci {
    GbrConvVoice = 1,
    GbrConvVideo = 2,
    GbrGaming = 3,
    GbrNonConvVideo = 4,
    NgbrIms = 5,
    NgbrVideoTcpOperator = 6,
    NgbrVoiceVideoGaming = 7,
    NgbrVideoTcpPremium = 8,
    NgbrVideoTcpDefault = 9,
}

impl Qci {
    pub const ALL: [Qci; 9] = [
        Qci::GbrConvVoice,
        Qci::GbrConvVideo,
        Qci::GbrGaming,
        Qci::GbrNonConvVideo,
        Qci::NgbrIms,
        Qci::NgbrVideoTcpOperator,
        Qci::NgbrVoiceVideoGaming,
        Qci::NgbrVideoTcpPremium,
        Qci::NgbrVideoTcpDefault,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.value() == value)
    }

    /// Whether the class has a guaranteed bit rate.
    pub fn is_gbr(self) -> bool {
        self.value() <= 4
    }

    /// Scheduling priority, lower is more urgent.
    pub fn priority(self) -> u8 {
        match self {
            Qci::GbrConvVoice => 2,
            Qci::GbrConvVideo => 4,
            Qci::GbrGaming => 3,
            Qci::GbrNonConvVideo => 5,
            Qci::NgbrIms => 1,
            Qci::NgbrVideoTcpOperator => 6,
            Qci::NgbrVoiceVideoGaming => 7,
            Qci::NgbrVideoTcpPremium => 8,
            Qci::NgbrVideoTcpDefault => 9,
        }
    }

    /// Packet delay budget in milliseconds.
    pub fn delay_budget_ms(self) -> u16 {
        match self {
            Qci::GbrConvVoice | Qci::NgbrIms | Qci::NgbrVoiceVideoGaming => 100,
            Qci::GbrConvVideo => 150,
            Qci::GbrGaming => 50,
            Qci::GbrNonConvVideo
            | Qci::NgbrVideoTcpOperator
            | Qci::NgbrVideoTcpPremium
            | Qci::NgbrVideoTcpDefault => 300,
        }
    }

    /// Packet error loss rate.
    pub fn error_loss_rate(self) -> f64 {
        match self {
            Qci::GbrConvVoice => 1e-2,
            Qci::GbrConvVideo | Qci::GbrGaming | Qci::NgbrVoiceVideoGaming => 1e-3,
            _ => 1e-6,
        }
    }
}

impl std::fmt::Display for Qci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QCI {}", self.value())
    }
}

/// How activation requests are issued to the radio stack.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionMode {
    /// One request per terminal and class.
    #[default]
    PerTerminal,
    /// One request per class covering every terminal device.
    Batch,
}

/// Bearer configuration.
#[derive(
    Debug, Clone, PartialEq, Eq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize,
)]
#[serde(default)]
pub struct BearerSpec {
    /// Classes activated on every terminal, in activation order.
    #[builder(default = vec![Qci::GbrConvVoice])]
    pub classes: Vec<Qci>,
    #[builder(default)]
    pub mode: ProvisionMode,
}

impl Default for BearerSpec {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The bearer relation: the classes active on each terminal, in activation order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Bearers {
    by_terminal: Vec<Vec<Qci>>,
}

impl Bearers {
    pub(crate) fn new(nr_terminals: usize) -> Self {
        Self {
            by_terminal: vec![Vec::new(); nr_terminals],
        }
    }

    /// Records `qci` on `terminal`. Returns `false` if the terminal already carries it.
    pub(crate) fn insert(&mut self, terminal: usize, qci: Qci) -> bool {
        let classes = &mut self.by_terminal[terminal];
        if classes.contains(&qci) {
            return false;
        }
        classes.push(qci);
        true
    }

    pub fn classes(&self, terminal: usize) -> &[Qci] {
        self.by_terminal
            .get(terminal)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of bearer records.
    pub fn nr_bearers(&self) -> usize {
        self.by_terminal.iter().map(Vec::len).sum()
    }

    pub fn nr_terminals(&self) -> usize {
        self.by_terminal.len()
    }
}

/// Activates the configured classes on every terminal. Duplicate requests for a class a terminal
/// already carries are dropped before they reach the radio stack.
pub(crate) fn provision<B>(spec: &BearerSpec, devices: &Devices, radio: &mut B) -> Bearers
where
    B: RadioStack + ?Sized,
{
    let terminals = devices.terminals();
    let mut bearers = Bearers::new(terminals.len());
    for &qci in &spec.classes {
        match spec.mode {
            ProvisionMode::PerTerminal => {
                for (ue, &dev) in terminals.iter().enumerate() {
                    if bearers.insert(ue, qci) {
                        radio.activate_bearer(&[dev], qci);
                    } else {
                        log::debug!("terminal {ue} already carries {qci}, skipping");
                    }
                }
            }
            ProvisionMode::Batch => {
                let fresh = (0..terminals.len())
                    .filter(|&ue| bearers.insert(ue, qci))
                    .map(|ue| terminals[ue])
                    .collect::<Vec<_>>();
                if fresh.is_empty() {
                    log::debug!("every terminal already carries {qci}, skipping");
                } else {
                    radio.activate_bearer(&fresh, qci);
                }
            }
        }
    }
    bearers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::DeviceId;
    use crate::testing::{Call, ScriptedBackend};

    fn devices(n: usize) -> Devices {
        Devices {
            base_stations: vec![DeviceId::new(0)],
            terminals: (1..=n).map(DeviceId::new).collect(),
        }
    }

    fn activations(backend: &ScriptedBackend) -> Vec<(Vec<DeviceId>, Qci)> {
        backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::ActivateBearer { terminals, qci } => Some((terminals.clone(), *qci)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn per_terminal_issues_one_request_each() {
        let mut backend = ScriptedBackend::new();
        let spec = BearerSpec::default();
        let bearers = provision(&spec, &devices(3), &mut backend);
        assert_eq!(bearers.nr_bearers(), 3);
        assert_eq!(activations(&backend).len(), 3);
        assert_eq!(bearers.classes(1), &[Qci::GbrConvVoice]);
    }

    #[test]
    fn batch_issues_one_request_per_class() {
        let mut backend = ScriptedBackend::new();
        let spec = BearerSpec::builder()
            .classes(vec![Qci::GbrConvVoice, Qci::NgbrVideoTcpDefault])
            .mode(ProvisionMode::Batch)
            .build();
        let bearers = provision(&spec, &devices(3), &mut backend);
        let calls = activations(&backend);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.len(), 3);
        assert_eq!(bearers.nr_bearers(), 6);
    }

    #[test]
    fn duplicate_classes_are_dropped() {
        for mode in [ProvisionMode::PerTerminal, ProvisionMode::Batch] {
            let mut backend = ScriptedBackend::new();
            let spec = BearerSpec::builder()
                .classes(vec![Qci::GbrConvVoice, Qci::GbrConvVoice])
                .mode(mode)
                .build();
            let bearers = provision(&spec, &devices(2), &mut backend);
            assert_eq!(bearers.nr_bearers(), 2);
            let requested = activations(&backend)
                .iter()
                .map(|(t, _)| t.len())
                .sum::<usize>();
            assert_eq!(requested, 2);
        }
    }

    #[test]
    fn qci_descriptors() {
        assert!(Qci::GbrConvVoice.is_gbr());
        assert!(!Qci::NgbrVideoTcpDefault.is_gbr());
        assert_eq!(Qci::NgbrIms.priority(), 1);
        assert_eq!(Qci::GbrGaming.delay_budget_ms(), 50);
        assert_eq!(Qci::from_value(7), Some(Qci::NgbrVoiceVideoGaming));
        assert_eq!(Qci::from_value(0), None);
    }
}
