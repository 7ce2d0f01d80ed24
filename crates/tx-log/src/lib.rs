//! Write-ahead log for the atomic commit coordinator.
//!
//! The log is an append-only record of phase transitions keyed by
//! transaction ID. The latest entry for a transaction is authoritative
//! for recovery. Backing stores implement [`TransactionLog`].

pub mod entry;
pub mod error;
pub mod memory;
pub mod store;

pub use common::{ParticipantId, TransactionId, TransactionState, Verdict, Vote};
pub use entry::{LogEntry, LogEntryBuilder, LogPhase, Lsn, VoteRecord};
pub use error::{LogError, Result};
pub use memory::InMemoryTransactionLog;
pub use store::{TransactionLog, TransactionLogExt};
