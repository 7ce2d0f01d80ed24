use thiserror::Error;

use crate::TransactionId;

/// Errors raised by write-ahead log backends.
#[derive(Debug, Error)]
pub enum LogError {
    /// The durable medium refused the write or read.
    #[error("Log medium unavailable: {0}")]
    Unavailable(String),

    /// An entry was appended out of order for its transaction.
    #[error("Entry for transaction {transaction_id} rejected: {reason}")]
    Rejected {
        transaction_id: TransactionId,
        reason: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
