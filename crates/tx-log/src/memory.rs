use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    LogEntry, LogError, LogPhase, Lsn, Result, TransactionId,
    store::{TransactionLog, validate_entry_for_append},
};

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    unavailable: bool,
    fail_on_phase: Option<LogPhase>,
}

/// In-memory write-ahead log.
///
/// Clones share the same underlying entries, so a log handed to one
/// coordinator can be handed to a second one to model a process restart.
/// Write failures can be injected for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionLog {
    entries: Arc<RwLock<Vec<LogEntry>>>,
    faults: Arc<StdRwLock<Faults>>,
}

impl InMemoryTransactionLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent append and read fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    /// Makes appends of the given phase fail until reset with `None`.
    pub fn fail_on_phase(&self, phase: Option<LogPhase>) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_phase = phase;
    }

    /// Returns the total number of entries stored.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns a copy of every entry, in append order.
    pub async fn all_entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }

    /// Clears all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn faults(&self) -> Faults {
        *self.faults.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_readable(&self) -> Result<()> {
        if self.faults().unavailable {
            return Err(LogError::Unavailable("log medium offline".to_string()));
        }
        Ok(())
    }

    fn check_faults(&self, entry: &LogEntry) -> Result<()> {
        self.check_readable()?;
        let faults = self.faults();
        if faults.fail_on_phase == Some(entry.phase) {
            return Err(LogError::Unavailable(format!(
                "write of {} entry refused",
                entry.phase
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn append(&self, mut entry: LogEntry) -> Result<Lsn> {
        if let Err(e) = self.check_faults(&entry) {
            metrics::counter!("wal_append_failures_total").increment(1);
            tracing::warn!(transaction_id = %entry.transaction_id, phase = %entry.phase, error = %e, "log append failed");
            return Err(e);
        }

        let mut store = self.entries.write().await;

        let latest = store
            .iter()
            .rev()
            .find(|e| e.transaction_id == entry.transaction_id);
        validate_entry_for_append(&entry, latest)?;

        let lsn = store.last().map(|e| e.lsn).unwrap_or_default().next();
        entry.lsn = lsn;
        store.push(entry);

        metrics::counter!("wal_appends_total").increment(1);
        Ok(lsn)
    }

    async fn read_latest(&self, transaction_id: TransactionId) -> Result<Option<LogEntry>> {
        self.check_readable()?;
        let store = self.entries.read().await;
        Ok(store
            .iter()
            .rev()
            .find(|e| e.transaction_id == transaction_id)
            .cloned())
    }

    async fn entries(&self, transaction_id: TransactionId) -> Result<Vec<LogEntry>> {
        self.check_readable()?;
        let store = self.entries.read().await;
        Ok(store
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn in_doubt(&self) -> Result<Vec<TransactionId>> {
        self.check_readable()?;
        let store = self.entries.read().await;
        let mut complete = HashMap::new();
        let mut order = Vec::new();
        for entry in store.iter() {
            if complete
                .insert(entry.transaction_id, entry.is_complete())
                .is_none()
            {
                order.push(entry.transaction_id);
            }
        }
        Ok(order
            .into_iter()
            .filter(|tx| !complete[tx])
            .collect())
    }
}
