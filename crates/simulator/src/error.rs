//! Simulator error types.

use coordinator::CoordinatorError;
use thiserror::Error;
use tx_log::LogError;

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
