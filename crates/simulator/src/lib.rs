//! Workload simulator for the atomic commit coordinator.
//!
//! Runs a batch of transactions against scripted participants, some of
//! which vote abort or fail their commit, then recovers whatever the log
//! still holds in doubt and checks every verdict.

pub mod config;
pub mod error;
pub mod workload;

pub use config::SimulatorConfig;
pub use error::{Result, SimulatorError};
pub use workload::{Report, Scenario, run};
