//! Utilities for interfacing with cellflow.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cellflow_core::{AggregateReport, ScenarioSpec, ValidSpec};

/// Reads and validates a [`ScenarioSpec`] from a file in JSON or Dhall format.
pub fn read_valid_spec(path: impl AsRef<Path>) -> Result<ValidSpec, Error> {
    let spec = read_spec(path)?;
    Ok(spec.validate()?)
}

/// Reads a [`ScenarioSpec`] from a file in JSON or Dhall format.
pub fn read_spec(path: impl AsRef<Path>) -> Result<ScenarioSpec, Error> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let spec: ScenarioSpec = match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("dhall") => serde_dhall::from_str(&contents).parse().map_err(Box::new)?,
        _ => return Err(Error::UnknownFileType(path.as_ref().into())),
    };
    Ok(spec)
}

/// Writes one JSON report per run into `dir` as `report-<run>.json`, returning the paths written.
pub fn write_reports(
    dir: impl AsRef<Path>,
    reports: &BTreeMap<u64, AggregateReport>,
) -> Result<Vec<PathBuf>, Error> {
    std::fs::create_dir_all(dir.as_ref())?;
    reports
        .iter()
        .map(|(run, report)| {
            let path = dir.as_ref().join(format!("report-{run}.json"));
            report.write_json(&path)?;
            Ok(path)
        })
        .collect()
}

/// Error kinds for specifications and I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown file type.
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    /// Error deserializing Dhall.
    #[error("Dhall error")]
    Dhall(#[from] Box<serde_dhall::Error>),

    /// Error deserializing JSON.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// The specification failed validation.
    #[error("invalid scenario")]
    Config(#[from] cellflow_core::ConfigError),
}
