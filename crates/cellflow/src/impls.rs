//! Simulation backends.

pub use backend_impls::*;
