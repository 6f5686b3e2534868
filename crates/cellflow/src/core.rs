//! Core cellflow data structures, traits, and routines. The most common entry point is
//! [run::run()], which turns a [scenario specification](ScenarioSpec) into an
//! [aggregate report](AggregateReport).

pub use cellflow_core::*;
