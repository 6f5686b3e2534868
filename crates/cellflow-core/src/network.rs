//! The scenario pipeline as a sequence of typed stages. Each stage consumes the previous one, so
//! the install → attach → provision → load → run ordering cannot be broken.

pub(crate) mod topology;
pub mod types;

use rand::Rng;

pub use topology::Topology;
pub use types::*;

use crate::{
    attach::Attachments,
    backend::{AppId, Backend, Engine, IpStack, RadioStack},
    bearer::{self, Bearers},
    constants::{UE_NETMASK, UE_NETWORK},
    report::AggregateReport,
    run::RunController,
    spec::ValidSpec,
    traffic::{PortAllocationError, TrafficMatrix},
};

impl ValidSpec {
    /// Places every node, drawing random positions from `rng`.
    pub fn place<R>(self, rng: &mut R) -> PlacedScenario
    where
        R: Rng + ?Sized,
    {
        let topology = Topology::place(&self, rng);
        log::info!(
            "placed {} base stations and {} terminals",
            topology.base_stations().len(),
            topology.nr_terminals()
        );
        PlacedScenario {
            spec: self,
            topology,
        }
    }
}

/// Nodes have positions; nothing is installed yet.
#[derive(Debug, Clone)]
pub struct PlacedScenario {
    spec: ValidSpec,
    topology: Topology,
}

impl PlacedScenario {
    /// Seeds the engine, registers the nodes, configures the radio stack, builds the core network, installs radio
    /// devices and gives every terminal an address and a default route.
    pub fn deploy<B>(self, backend: &mut B) -> DeployedScenario
    where
        B: Engine + RadioStack + IpStack + ?Sized,
    {
        let Self { spec, topology } = self;
        backend.seed(spec.rng());
        backend.add_nodes(topology.nodes());
        backend.set_bandwidth(spec.radio.bandwidth);
        backend.set_scheduler_type(&spec.radio.scheduler);
        backend.set_pathloss_model(&spec.radio.pathloss);

        // Core network: gateway <-> remote host, with a route back to the terminals
        backend.install_stack(&[topology.remote_host()]);
        let remote_host = backend.connect_core(topology.gateway(), topology.remote_host(), &spec.core);
        backend.add_network_route(topology.remote_host(), UE_NETWORK, UE_NETMASK);

        let devices = Devices {
            base_stations: backend.install_base_station_devices(topology.base_stations()),
            terminals: backend.install_terminal_devices(topology.terminals()),
        };
        assert_eq!(devices.base_stations.len(), topology.base_stations().len());
        assert_eq!(devices.terminals.len(), topology.nr_terminals());

        backend.install_stack(topology.terminals());
        let terminals = backend.assign_terminal_addresses(devices.terminals());
        assert_eq!(terminals.len(), topology.nr_terminals());
        let terminal_gateway = backend.terminal_gateway();
        for &ue in topology.terminals() {
            backend.set_default_route(ue, terminal_gateway);
        }
        log::info!(
            "deployed {} devices, remote host at {remote_host}",
            devices.base_stations.len() + devices.terminals.len()
        );
        DeployedScenario {
            spec,
            topology,
            devices,
            addresses: AddressBook {
                remote_host,
                terminal_gateway,
                terminals,
            },
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

/// Devices and addresses exist.
#[derive(Debug, Clone)]
pub struct DeployedScenario {
    spec: ValidSpec,
    topology: Topology,
    devices: Devices,
    addresses: AddressBook,
}

impl DeployedScenario {
    /// Applies the attachment plan computed during validation.
    pub fn attach<B>(self, radio: &mut B) -> AttachedScenario
    where
        B: RadioStack + ?Sized,
    {
        let attachments = self.spec.plan.apply(&self.devices, radio);
        log::info!("attached {} terminals", attachments.len());
        AttachedScenario {
            deployed: self,
            attachments,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    pub fn addresses(&self) -> &AddressBook {
        &self.addresses
    }
}

/// Every terminal is attached to exactly one base station.
#[derive(Debug, Clone)]
pub struct AttachedScenario {
    deployed: DeployedScenario,
    attachments: Attachments,
}

impl AttachedScenario {
    pub fn provision<B>(self, radio: &mut B) -> ProvisionedScenario
    where
        B: RadioStack + ?Sized,
    {
        let bearers = bearer::provision(&self.deployed.spec.bearers, &self.deployed.devices, radio);
        log::info!("activated {} bearers", bearers.nr_bearers());
        ProvisionedScenario {
            attached: self,
            bearers,
        }
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    delegate::delegate! {
        to self.deployed {
            pub fn topology(&self) -> &Topology;
            pub fn devices(&self) -> &Devices;
            pub fn addresses(&self) -> &AddressBook;
        }
    }
}

/// Every terminal carries its bearers.
#[derive(Debug, Clone)]
pub struct ProvisionedScenario {
    attached: AttachedScenario,
    bearers: Bearers,
}

impl ProvisionedScenario {
    /// Generates the traffic matrix, installs and schedules its applications, and installs the
    /// flow monitor.
    pub fn load<B>(self, backend: &mut B) -> Result<LoadedScenario, PortAllocationError>
    where
        B: Backend + ?Sized,
    {
        let deployed = &self.attached.deployed;
        let traffic = &deployed.spec.traffic;
        let matrix = TrafficMatrix::generate(
            traffic,
            deployed.topology.terminals(),
            deployed.topology.remote_host(),
        )?;
        let apps = matrix.install(traffic, &deployed.addresses, backend);
        backend.install_all();
        log::info!("installed {} flows", apps.len());
        Ok(LoadedScenario {
            provisioned: self,
            matrix,
            apps,
        })
    }

    pub fn bearers(&self) -> &Bearers {
        &self.bearers
    }

    delegate::delegate! {
        to self.attached {
            pub fn topology(&self) -> &Topology;
            pub fn devices(&self) -> &Devices;
            pub fn addresses(&self) -> &AddressBook;
            pub fn attachments(&self) -> &Attachments;
        }
    }
}

/// Applications are installed; the scenario is ready to run.
#[derive(Debug, Clone)]
pub struct LoadedScenario {
    provisioned: ProvisionedScenario,
    matrix: TrafficMatrix,
    apps: Vec<(AppId, AppId)>,
}

impl LoadedScenario {
    /// Runs the scenario to its stop time, measures it, and tears the backend down.
    pub fn run<B>(self, backend: &mut B) -> AggregateReport
    where
        B: Backend + ?Sized,
    {
        let spec = &self.provisioned.attached.deployed.spec;
        RunController::new(spec.sim_time).execute(backend, |backend, warning| {
            let mut report = crate::aggregate::aggregate(
                &mut *backend,
                &self.matrix,
                self.provisioned.addresses(),
            );
            if let Some(warning) = warning {
                report.push_engine_warning(&warning);
            }
            if let Some(path) = &spec.output.monitor {
                if let Err(e) = backend.serialize_to_file(path) {
                    log::warn!("failed to write monitor dump to {}: {e}", path.display());
                }
            }
            report
        })
    }

    pub fn matrix(&self) -> &TrafficMatrix {
        &self.matrix
    }

    /// Installed `(server, client)` handles, aligned with the matrix pairs.
    pub fn apps(&self) -> &[(AppId, AppId)] {
        &self.apps
    }

    delegate::delegate! {
        to self.provisioned {
            pub fn topology(&self) -> &Topology;
            pub fn devices(&self) -> &Devices;
            pub fn addresses(&self) -> &AddressBook;
            pub fn attachments(&self) -> &Attachments;
            pub fn bearers(&self) -> &Bearers;
        }
    }
}
