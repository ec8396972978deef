//! volley: a staged-load HTTP benchmarking engine.
//!
//! A run ramps a pool of virtual users along a stage plan, each VU looping
//! over a multi-step script of GETs with response checks. Outcomes stream
//! into a sharded aggregator, and the run's verdict comes from an ordered
//! list of threshold rules evaluated against the final snapshot.

pub mod config;
pub mod engine;
pub mod error;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;

pub use engine::{Engine, RunConfig};
pub use error::{Error, Result};
