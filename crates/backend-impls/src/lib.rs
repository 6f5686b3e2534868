//! This crate contains implementations of the [`Backend`](cellflow_core::backend::Backend)
//! trait. The types here bridge cellflow and the engines that actually move packets.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

pub mod ideal;
pub mod ns3;

pub use crate::ideal::IdealBackend;
pub use crate::ns3::Ns3Backend;
