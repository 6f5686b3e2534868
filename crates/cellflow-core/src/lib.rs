#![warn(unreachable_pub, missing_debug_implementations)]

//! The core cellflow library. This crate defines [the routine](run::run) that turns a
//! [scenario specification](ScenarioSpec) into an [aggregate report](AggregateReport) of
//! per-flow measurements, driving a [`Backend`] through placement, deployment, attachment,
//! bearer provisioning, traffic installation and the run itself.

#[macro_use]
mod ident;

pub mod aggregate;
pub mod attach;
pub mod backend;
pub mod bearer;
pub mod constants;
pub mod layouts;
pub mod network;
pub mod placement;
pub mod report;
pub mod run;
pub mod spec;
pub mod traffic;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use attach::{AttachPolicy, Attachments};
pub use backend::{
    AppId, Applications, Backend, ClientParams, CoreLink, Engine, EngineWarning, FiveTuple,
    FlowId, FlowStats, IpStack, Monitor, MonitorError, RadioStack,
};
pub use bearer::{BearerSpec, Bearers, ProvisionMode, Qci};
pub use network::{
    AddressBook, DeployedScenario, DeviceId, Devices, LoadedScenario, Node, NodeId, NodeKind,
    PlacedScenario, Position, ProvisionedScenario, AttachedScenario, Topology,
};
pub use placement::Placement;
pub use report::{AggregateReport, FlowEntry, ReportWarning, Throughput, Totals};
pub use run::{run, run_valid, sweep, Error, RunController};
pub use spec::{ConfigError, NodeGroup, OutputSpec, RadioSpec, RngConfig, ScenarioSpec, ValidSpec};
pub use traffic::{
    AppPair, DownlinkPorts, PortAllocationError, PortBases, Protocol, TrafficClass, TrafficMatrix,
    TrafficSpec,
};
pub use units::{BitsPerSec, Bytes, Nanosecs};
