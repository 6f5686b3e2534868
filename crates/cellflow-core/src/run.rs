//! Running scenarios end to end.

use std::collections::BTreeMap;

use rand::prelude::*;
use rayon::prelude::*;

use crate::backend::{Backend, Engine, EngineWarning};
use crate::report::AggregateReport;
use crate::spec::{ConfigError, ScenarioSpec, ValidSpec};
use crate::traffic::PortAllocationError;
use crate::units::Nanosecs;

/// Drives the engine through stop-time, run and teardown.
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct RunController {
    stop_at: Nanosecs,
}

impl RunController {
    /// Sets the stop time, runs, hands the backend to `collect`, then destroys it. Teardown
    /// happens exactly once whether or not the run reported a warning.
    pub fn execute<B, F, T>(&self, backend: &mut B, collect: F) -> T
    where
        B: Engine + ?Sized,
        F: FnOnce(&mut B, Option<EngineWarning>) -> T,
    {
        backend.stop_at(self.stop_at);
        log::info!("running until {}", self.stop_at);
        let warning = match backend.run() {
            Ok(()) => None,
            Err(e) => {
                log::warn!("run finished with a warning: {e}");
                Some(e)
            }
        };
        let out = collect(backend, warning);
        backend.destroy();
        out
    }
}

/// Validates and runs one scenario.
pub fn run<B>(spec: ScenarioSpec, backend: &mut B) -> Result<AggregateReport, Error>
where
    B: Backend + ?Sized,
{
    let spec = spec.validate()?;
    run_valid(spec, backend)
}

/// Runs a validated scenario and writes its report if a path is configured.
pub fn run_valid<B>(spec: ValidSpec, backend: &mut B) -> Result<AggregateReport, Error>
where
    B: Backend + ?Sized,
{
    let mut rng = StdRng::seed_from_u64(spec.rng().stream_seed());
    let report_path = spec.output().report.clone();
    let provisioned = spec
        .place(&mut rng)
        .deploy(backend)
        .attach(backend)
        .provision(backend);
    let loaded = match provisioned.load(backend) {
        Ok(loaded) => loaded,
        Err(e) => {
            backend.destroy();
            return Err(e.into());
        }
    };
    let report = loaded.run(backend);
    if let Some(path) = report_path {
        report.write_json(&path)?;
        log::info!("wrote report to {}", path.display());
    }
    Ok(report)
}

/// Runs `spec` once per run index in parallel, each on its own backend from `make_backend`.
/// Per-run output paths are ignored; callers write the returned reports themselves.
pub fn sweep<B, F>(
    spec: &ValidSpec,
    runs: &[u64],
    make_backend: F,
) -> Result<BTreeMap<u64, AggregateReport>, Error>
where
    B: Backend,
    F: Fn(u64) -> B + Sync,
{
    let (s, r) = crossbeam_channel::unbounded();
    runs.par_iter().try_for_each_with(s, |s, &run| {
        let mut spec = spec.clone().with_run(run);
        *spec.output_mut() = Default::default();
        let mut backend = make_backend(run);
        let report = run_valid(spec, &mut backend)?;
        s.send((run, report)).unwrap(); // the channel should never become disconnected
        Result::<(), Error>::Ok(())
    })?;
    Ok(r.iter().collect())
}

/// An error running a scenario.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid scenario")]
    Config(#[from] ConfigError),

    #[error("port allocation failed")]
    PortAllocation(#[from] PortAllocationError),

    #[error("failed to write report")]
    Io(#[from] std::io::Error),
}
