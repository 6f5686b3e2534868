//! Utilities for reading scenarios and writing reports.

pub use cellflow_utils::*;
