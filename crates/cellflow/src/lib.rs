//! `cellflow` builds LTE/EPC scenarios, runs them on a simulation backend, and measures every
//! application flow. Given a scenario of base stations, terminals, bearers and traffic classes,
//! it produces an [aggregate report](core::AggregateReport) of per-flow throughput, loss and
//! delay.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
pub mod impls;
pub mod utils;
