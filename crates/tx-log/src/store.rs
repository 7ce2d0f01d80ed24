use async_trait::async_trait;

use crate::{LogEntry, LogError, LogPhase, Lsn, Result, TransactionId, Verdict};

/// Core trait for write-ahead log backends.
///
/// Implementations must be thread-safe and must have made an entry durable
/// before `append` returns `Ok`.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Appends an entry and returns the sequence number assigned to it.
    ///
    /// Prior entries are never modified. Fails with
    /// [`LogError::Unavailable`] if the medium cannot record the entry.
    async fn append(&self, entry: LogEntry) -> Result<Lsn>;

    /// Returns the most recent entry for a transaction, if any.
    async fn read_latest(&self, transaction_id: TransactionId) -> Result<Option<LogEntry>>;

    /// Returns every entry for a transaction, oldest first.
    async fn entries(&self, transaction_id: TransactionId) -> Result<Vec<LogEntry>>;

    /// Returns the transactions whose latest entry is not `Complete`,
    /// in order of their first appearance in the log.
    async fn in_doubt(&self) -> Result<Vec<TransactionId>>;
}

/// Extension trait providing convenience methods for logs.
#[async_trait]
pub trait TransactionLogExt: TransactionLog {
    /// Checks whether anything was ever logged for a transaction.
    async fn contains(&self, transaction_id: TransactionId) -> Result<bool> {
        Ok(self.read_latest(transaction_id).await?.is_some())
    }

    /// Returns the logged verdict of a transaction, if it was decided.
    async fn logged_verdict(&self, transaction_id: TransactionId) -> Result<Option<Verdict>> {
        Ok(self
            .read_latest(transaction_id)
            .await?
            .and_then(|entry| entry.verdict()))
    }
}

// Blanket implementation for all TransactionLog implementations
impl<T: TransactionLog + ?Sized> TransactionLogExt for T {}

/// Validates an entry against the latest entry already logged for its
/// transaction.
///
/// A transaction is never re-decided and nothing follows `Complete`.
pub fn validate_entry_for_append(entry: &LogEntry, latest: Option<&LogEntry>) -> Result<()> {
    if entry.phase != LogPhase::Prepare && entry.verdict().is_none() {
        return Err(LogError::Rejected {
            transaction_id: entry.transaction_id,
            reason: format!("{} entry in undecided state {}", entry.phase, entry.state),
        });
    }

    let Some(latest) = latest else {
        return Ok(());
    };

    if latest.is_complete() {
        return Err(LogError::Rejected {
            transaction_id: entry.transaction_id,
            reason: "transaction is already complete".to_string(),
        });
    }

    if let (Some(previous), Some(next)) = (latest.verdict(), entry.verdict())
        && previous != next
    {
        return Err(LogError::Rejected {
            transaction_id: entry.transaction_id,
            reason: format!("verdict {previous} cannot change to {next}"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionState;

    fn entry(tx: TransactionId, phase: LogPhase, state: TransactionState) -> LogEntry {
        LogEntry::builder(tx, phase, state).build()
    }

    #[test]
    fn first_entry_is_accepted() {
        let tx = TransactionId::new();
        let e = entry(tx, LogPhase::Prepare, TransactionState::Prepared);
        assert!(validate_entry_for_append(&e, None).is_ok());
    }

    #[test]
    fn decision_follows_prepare_with_same_verdict() {
        let tx = TransactionId::new();
        let prepare = entry(tx, LogPhase::Prepare, TransactionState::Prepared);
        let complete = entry(tx, LogPhase::Complete, TransactionState::Committed);
        assert!(validate_entry_for_append(&complete, Some(&prepare)).is_ok());
    }

    #[test]
    fn verdict_cannot_flip() {
        let tx = TransactionId::new();
        let prepare = entry(tx, LogPhase::Prepare, TransactionState::Aborting);
        let complete = entry(tx, LogPhase::Complete, TransactionState::Committed);
        assert!(matches!(
            validate_entry_for_append(&complete, Some(&prepare)),
            Err(LogError::Rejected { .. })
        ));
    }

    #[test]
    fn nothing_follows_complete() {
        let tx = TransactionId::new();
        let complete = entry(tx, LogPhase::Complete, TransactionState::RolledBack);
        let again = entry(tx, LogPhase::Complete, TransactionState::RolledBack);
        assert!(validate_entry_for_append(&again, Some(&complete)).is_err());
    }

    #[test]
    fn undecided_terminal_entry_is_rejected() {
        let tx = TransactionId::new();
        let bogus = entry(tx, LogPhase::Complete, TransactionState::Preparing);
        assert!(validate_entry_for_append(&bogus, None).is_err());
    }
}
