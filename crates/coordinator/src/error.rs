//! Coordinator error types.

use std::time::Duration;

use common::{ParticipantId, TransactionId, TransactionState};
use thiserror::Error;
use tx_log::LogError;

use crate::executor::Operation;

/// Errors that can occur during coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No live transaction has this ID.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    /// The transaction is in a lifecycle state that disallows the operation.
    #[error("Invalid state for transaction {transaction_id}: expected {expected}, actual {actual}")]
    InvalidTransactionState {
        transaction_id: TransactionId,
        expected: String,
        actual: TransactionState,
    },

    /// The participant is already enlisted in this transaction.
    #[error("Participant {participant} is already enlisted in transaction {transaction_id}")]
    DuplicateParticipant {
        transaction_id: TransactionId,
        participant: ParticipantId,
    },

    /// A logged participant is not registered with the coordinator.
    #[error("Participant {participant} of transaction {transaction_id} is not registered")]
    UnknownParticipant {
        transaction_id: TransactionId,
        participant: ParticipantId,
    },

    /// The write-ahead log could not record an entry.
    #[error("Log write failed for transaction {transaction_id}: {source}")]
    LogWrite {
        transaction_id: TransactionId,
        #[source]
        source: LogError,
    },

    /// The write-ahead log could not be read.
    #[error("Log read failed: {0}")]
    LogRead(#[source] LogError),

    /// Recovery was requested for a transaction that was never logged.
    #[error("No log entry found for transaction {0}")]
    NoLogFound(TransactionId),

    /// The latest log entry for a transaction carries no decision.
    #[error("Log entry for transaction {0} carries no decision")]
    UndecidedLogEntry(TransactionId),

    /// The transaction committed but some participants never acknowledged
    /// the commit. Only returned under `CommitFailurePolicy::Escalate`.
    #[error(
        "Transaction {transaction_id} committed but {} participant(s) never acknowledged",
        .unacknowledged.len()
    )]
    CommitIncomplete {
        transaction_id: TransactionId,
        unacknowledged: Vec<ParticipantId>,
    },
}

/// Errors a participant reports from a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticipantError {
    /// The participant could not be reached.
    #[error("Participant unavailable: {0}")]
    Unavailable(String),

    /// The participant refused the call.
    #[error("Participant rejected call: {0}")]
    Rejected(String),

    /// The call did not resolve before the per-call timeout.
    #[error("Call timed out after {0:?}")]
    TimedOut(Duration),
}

/// A participant call that failed after exhausting its retries.
///
/// Recorded as data in the phase outcome, never raised from `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} on participant {participant} failed after {attempts} attempt(s): {last_error}")]
pub struct ParticipantCallFailed {
    pub participant: ParticipantId,
    pub operation: Operation,
    pub attempts: u32,
    pub last_error: ParticipantError,
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
