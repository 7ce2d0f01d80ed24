//! Coordinator owning the transaction registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use common::{ParticipantId, TransactionId, TransactionState, Verdict, Vote};
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{Mutex, watch};
use tx_log::{LogEntry, TransactionLog};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::executor::PhaseExecutor;
use crate::participant::{OperationData, SharedParticipant};
use crate::transaction::Transaction;

/// Registry entry for one transaction.
///
/// The state receiver lets queries read the state without waiting for an
/// execution that holds the transaction lock.
struct TransactionHandle {
    state: watch::Receiver<TransactionState>,
    inner: Mutex<Transaction>,
}

impl TransactionHandle {
    fn new(transaction: Transaction) -> Self {
        Self {
            state: transaction.subscribe(),
            inner: Mutex::new(transaction),
        }
    }
}

/// Outcome of looking a transaction up for recovery.
enum Recovery {
    /// Held in the registry, possibly just rebuilt from an unfinished entry.
    Live(Arc<TransactionHandle>),
    /// The log records the transaction as complete.
    Complete(Verdict),
}

/// Drives atomic commits across participants and recovers them from the log.
///
/// Each transaction sits behind its own lock, so distinct transactions run
/// in parallel while concurrent calls on the same transaction serialize.
pub struct Coordinator<L: TransactionLog> {
    config: CoordinatorConfig,
    executor: PhaseExecutor,
    log: L,
    transactions: DashMap<TransactionId, Arc<TransactionHandle>>,
    directory: DashMap<ParticipantId, SharedParticipant>,
    rebuild_lock: Mutex<()>,
}

impl<L: TransactionLog> Coordinator<L> {
    /// Creates a new coordinator writing to `log`.
    pub fn new(log: L, config: CoordinatorConfig) -> Self {
        Self {
            executor: PhaseExecutor::new(config.retry_policy()),
            config,
            log,
            transactions: DashMap::new(),
            directory: DashMap::new(),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Returns the configuration the coordinator was built with.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the write-ahead log.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Registers a new `Pending` transaction and returns its ID.
    pub fn begin_transaction(&self) -> TransactionId {
        let transaction_id = TransactionId::new();
        let transaction = Transaction::new(transaction_id, self.config.decision_policy());
        self.transactions
            .insert(transaction_id, Arc::new(TransactionHandle::new(transaction)));

        metrics::counter!("transactions_begun_total").increment(1);
        tracing::debug!(%transaction_id, "transaction begun");
        transaction_id
    }

    /// Enlists a participant with the data its prepare call receives.
    #[tracing::instrument(skip(self, participant, data), fields(participant = %participant.id()))]
    pub async fn enlist(
        &self,
        transaction_id: TransactionId,
        participant: SharedParticipant,
        data: OperationData,
    ) -> Result<()> {
        let handle = self.handle(transaction_id)?;
        let mut transaction = handle.inner.lock().await;
        transaction.enlist(Arc::clone(&participant), data)?;
        self.directory.insert(participant.id(), participant);
        Ok(())
    }

    /// Makes a participant available to recovery after a restart.
    pub fn register_participant(&self, participant: SharedParticipant) {
        self.directory.insert(participant.id(), participant);
    }

    /// Runs the transaction to completion and returns its verdict.
    ///
    /// Executing a terminal transaction returns the recorded verdict without
    /// calling any participant.
    #[tracing::instrument(skip(self))]
    pub async fn execute(&self, transaction_id: TransactionId) -> Result<Verdict> {
        let handle = self.handle(transaction_id)?;
        let start = Instant::now();

        let mut transaction = handle.inner.lock().await;
        let was_terminal = transaction.state().is_terminal();
        let result = transaction.execute(&self.executor, &self.log).await;
        if !was_terminal {
            record_outcome(&transaction, start);
        }
        let complete = transaction.is_complete();
        drop(transaction);

        self.evict_if_complete(transaction_id, complete);
        result
    }

    /// Finishes a transaction from its latest log entry.
    ///
    /// A `Complete` entry returns its verdict without any participant call.
    /// Otherwise the decision phase is re-driven for the participants that
    /// have not acknowledged it. Prepare is never repeated. Transactions
    /// missing from the registry are rebuilt from the log and the
    /// participant directory.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self, transaction_id: TransactionId) -> Result<Verdict> {
        let handle = match self.load_for_recovery(transaction_id).await? {
            Recovery::Live(handle) => handle,
            Recovery::Complete(verdict) => return Ok(verdict),
        };
        let start = Instant::now();

        let mut transaction = handle.inner.lock().await;
        let was_terminal = transaction.state().is_terminal();
        let result = transaction.recover(&self.executor, &self.log).await;
        if !was_terminal {
            record_outcome(&transaction, start);
        }
        let complete = transaction.is_complete();
        drop(transaction);

        if result.is_ok() {
            metrics::counter!("transactions_recovered_total").increment(1);
        }
        self.evict_if_complete(transaction_id, complete);
        result
    }

    /// Recovers every transaction the log holds in doubt.
    ///
    /// Transactions are recovered concurrently. Results are returned in the
    /// order the transactions first appear in the log.
    #[tracing::instrument(skip(self))]
    pub async fn recover_all(&self) -> Result<Vec<(TransactionId, Result<Verdict>)>> {
        let in_doubt = self.log.in_doubt().await.map_err(CoordinatorError::LogRead)?;
        tracing::info!(count = in_doubt.len(), "recovering in-doubt transactions");

        let results = join_all(in_doubt.iter().map(|&id| self.recover(id))).await;
        Ok(in_doubt.into_iter().zip(results).collect())
    }

    /// Current state of a transaction. Never waits on a running execution.
    pub fn state(&self, transaction_id: TransactionId) -> Result<TransactionState> {
        let handle = self.handle(transaction_id)?;
        let state = *handle.state.borrow();
        Ok(state)
    }

    /// Receiver notified on every state change of a transaction.
    pub fn subscribe(&self, transaction_id: TransactionId) -> Result<watch::Receiver<TransactionState>> {
        Ok(self.handle(transaction_id)?.state.clone())
    }

    /// Prepare votes recorded for a transaction.
    pub async fn votes(&self, transaction_id: TransactionId) -> Result<HashMap<ParticipantId, Vote>> {
        let handle = self.handle(transaction_id)?;
        let transaction = handle.inner.lock().await;
        Ok(transaction.votes().clone())
    }

    /// Attempts per participant in the most recent phase of a transaction.
    pub async fn attempts(&self, transaction_id: TransactionId) -> Result<HashMap<ParticipantId, u32>> {
        let handle = self.handle(transaction_id)?;
        let transaction = handle.inner.lock().await;
        Ok(transaction.attempts().clone())
    }

    /// IDs of the transactions held in the registry.
    pub fn live_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.transactions.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Removes a complete transaction from the registry.
    ///
    /// Only a transaction whose terminal state and acknowledgements are
    /// durably logged can be retired. Its log entries stay, so it can still
    /// be recovered.
    pub async fn retire(&self, transaction_id: TransactionId) -> Result<()> {
        let handle = self.handle(transaction_id)?;
        let transaction = handle.inner.lock().await;
        if !transaction.is_complete() {
            return Err(CoordinatorError::InvalidTransactionState {
                transaction_id,
                expected: "Committed or RolledBack with a Complete log entry".to_string(),
                actual: transaction.state(),
            });
        }
        self.transactions.remove(&transaction_id);
        tracing::debug!(%transaction_id, "transaction retired");
        Ok(())
    }

    fn registered(&self, transaction_id: TransactionId) -> Option<Arc<TransactionHandle>> {
        self.transactions
            .get(&transaction_id)
            .map(|handle| Arc::clone(handle.value()))
    }

    fn handle(&self, transaction_id: TransactionId) -> Result<Arc<TransactionHandle>> {
        self.registered(transaction_id)
            .ok_or(CoordinatorError::UnknownTransaction(transaction_id))
    }

    /// Finds the transaction in the registry or rebuilds it from the log.
    ///
    /// Registry entries are only removed once their `Complete` entry is
    /// durable, and rebuilds run one at a time with the registry checked
    /// again under the lock. A log entry read here is therefore never older
    /// than a transaction that was just finished and evicted.
    async fn load_for_recovery(&self, transaction_id: TransactionId) -> Result<Recovery> {
        if let Some(handle) = self.registered(transaction_id) {
            return Ok(Recovery::Live(handle));
        }

        let _rebuilding = self.rebuild_lock.lock().await;
        if let Some(handle) = self.registered(transaction_id) {
            return Ok(Recovery::Live(handle));
        }

        let entry = self
            .log
            .read_latest(transaction_id)
            .await
            .map_err(CoordinatorError::LogRead)?
            .ok_or(CoordinatorError::NoLogFound(transaction_id))?;

        if entry.is_complete() {
            tracing::debug!(%transaction_id, "transaction already complete");
            return entry
                .verdict()
                .map(Recovery::Complete)
                .ok_or(CoordinatorError::UndecidedLogEntry(transaction_id));
        }

        let handle = Arc::new(TransactionHandle::new(self.rebuild(&entry)?));
        self.transactions
            .insert(transaction_id, Arc::clone(&handle));
        Ok(Recovery::Live(handle))
    }

    fn rebuild(&self, entry: &LogEntry) -> Result<Transaction> {
        let transaction_id = entry.transaction_id;
        let participants = entry
            .participants
            .iter()
            .map(|id| {
                self.directory
                    .get(id)
                    .map(|participant| Arc::clone(participant.value()))
                    .ok_or_else(|| CoordinatorError::UnknownParticipant {
                        transaction_id,
                        participant: id.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let transaction = Transaction::from_log(entry, participants, self.config.decision_policy())?;
        tracing::info!(%transaction_id, phase = %entry.phase, state = %entry.state, "rebuilt transaction from log");
        Ok(transaction)
    }

    fn evict_if_complete(&self, transaction_id: TransactionId, complete: bool) {
        if self.config.evict_on_complete && complete {
            self.transactions.remove(&transaction_id);
            tracing::debug!(%transaction_id, "completed transaction evicted");
        }
    }
}

fn record_outcome(transaction: &Transaction, start: Instant) {
    let Some(verdict) = transaction.verdict().filter(|_| transaction.state().is_terminal()) else {
        return;
    };
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!("transaction_duration_seconds").record(duration);
    match verdict {
        Verdict::Committed => metrics::counter!("transactions_committed").increment(1),
        Verdict::RolledBack => metrics::counter!("transactions_rolled_back").increment(1),
    }
    tracing::info!(
        transaction_id = %transaction.id(),
        %verdict,
        participants = transaction.participant_ids().len(),
        duration,
        "transaction decided"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor::Operation;
    use crate::participant::ScriptedParticipant;
    use tx_log::{InMemoryTransactionLog, LogPhase};

    fn coordinator() -> Coordinator<InMemoryTransactionLog> {
        Coordinator::new(InMemoryTransactionLog::new(), fast_config())
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_timeout(Duration::from_millis(200))
            .with_max_retries(2)
            .with_base_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_begin_registers_pending_transaction() {
        let coordinator = coordinator();
        let tx = coordinator.begin_transaction();

        assert_eq!(coordinator.state(tx).unwrap(), TransactionState::Pending);
        assert_eq!(coordinator.live_transactions(), vec![tx]);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let coordinator = coordinator();
        let missing = TransactionId::new();

        let result = coordinator
            .enlist(missing, Arc::new(ScriptedParticipant::new("a")), OperationData::Null)
            .await;
        assert!(matches!(result, Err(CoordinatorError::UnknownTransaction(id)) if id == missing));
        assert!(matches!(
            coordinator.execute(missing).await,
            Err(CoordinatorError::UnknownTransaction(_))
        ));
        assert!(matches!(
            coordinator.state(missing),
            Err(CoordinatorError::UnknownTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_commits_and_exposes_votes() {
        let coordinator = coordinator();
        let a = ScriptedParticipant::new("a");
        let tx = coordinator.begin_transaction();
        coordinator
            .enlist(tx, Arc::new(a.clone()), serde_json::json!({"sku": "x"}))
            .await
            .unwrap();

        let verdict = coordinator.execute(tx).await.unwrap();

        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(coordinator.state(tx).unwrap(), TransactionState::Committed);
        let votes = coordinator.votes(tx).await.unwrap();
        assert_eq!(votes.get(&"a".into()), Some(&Vote::Commit));
        let attempts = coordinator.attempts(tx).await.unwrap();
        assert_eq!(attempts.get(&"a".into()), Some(&1));
    }

    #[tokio::test]
    async fn test_retire_requires_terminal_state() {
        let coordinator = coordinator();
        let tx = coordinator.begin_transaction();

        assert!(matches!(
            coordinator.retire(tx).await,
            Err(CoordinatorError::InvalidTransactionState { .. })
        ));

        coordinator.execute(tx).await.unwrap();
        coordinator.retire(tx).await.unwrap();
        assert!(coordinator.live_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_retire_waits_for_durable_completion() {
        let log = InMemoryTransactionLog::new();
        let coordinator = Coordinator::new(log.clone(), fast_config());
        let a = ScriptedParticipant::new("a");
        let tx = coordinator.begin_transaction();
        coordinator
            .enlist(tx, Arc::new(a.clone()), OperationData::Null)
            .await
            .unwrap();

        log.fail_on_phase(Some(LogPhase::Complete));
        assert!(matches!(
            coordinator.execute(tx).await,
            Err(CoordinatorError::LogWrite { .. })
        ));
        assert_eq!(coordinator.state(tx).unwrap(), TransactionState::Committed);
        log.fail_on_phase(None);

        assert!(matches!(
            coordinator.retire(tx).await,
            Err(CoordinatorError::InvalidTransactionState {
                actual: TransactionState::Committed,
                ..
            })
        ));
        assert_eq!(coordinator.recover(tx).await.unwrap(), Verdict::Committed);
        assert_eq!(a.commits_for(tx), 1);
        assert_eq!(a.calls(Operation::Commit), 1);

        coordinator.retire(tx).await.unwrap();
        assert_eq!(coordinator.recover(tx).await.unwrap(), Verdict::Committed);
        assert_eq!(a.calls(Operation::Commit), 1);
    }

    #[tokio::test]
    async fn test_evict_waits_for_durable_completion() {
        let log = InMemoryTransactionLog::new();
        let coordinator = Coordinator::new(log.clone(), fast_config().with_evict_on_complete(true));
        let a = ScriptedParticipant::new("a");
        let tx = coordinator.begin_transaction();
        coordinator
            .enlist(tx, Arc::new(a.clone()), OperationData::Null)
            .await
            .unwrap();

        log.fail_on_phase(Some(LogPhase::Complete));
        assert!(coordinator.execute(tx).await.is_err());
        assert_eq!(coordinator.live_transactions(), vec![tx]);
        log.fail_on_phase(None);

        assert_eq!(coordinator.recover(tx).await.unwrap(), Verdict::Committed);
        assert!(coordinator.live_transactions().is_empty());
        assert_eq!(coordinator.recover(tx).await.unwrap(), Verdict::Committed);
        assert_eq!(a.commits_for(tx), 1);
        assert_eq!(a.calls(Operation::Commit), 1);
    }

    #[tokio::test]
    async fn test_evict_on_complete() {
        let coordinator = Coordinator::new(
            InMemoryTransactionLog::new(),
            fast_config().with_evict_on_complete(true),
        );
        let tx = coordinator.begin_transaction();
        coordinator
            .enlist(tx, Arc::new(ScriptedParticipant::new("a")), OperationData::Null)
            .await
            .unwrap();

        coordinator.execute(tx).await.unwrap();

        assert!(coordinator.live_transactions().is_empty());
        assert_eq!(coordinator.recover(tx).await.unwrap(), Verdict::Committed);
    }

    #[tokio::test]
    async fn test_recover_without_log_entry() {
        let coordinator = coordinator();
        let tx = coordinator.begin_transaction();

        assert!(matches!(
            coordinator.recover(tx).await,
            Err(CoordinatorError::NoLogFound(id)) if id == tx
        ));
    }

    #[tokio::test]
    async fn test_recover_complete_transaction_makes_no_calls() {
        let coordinator = coordinator();
        let a = ScriptedParticipant::new("a");
        let tx = coordinator.begin_transaction();
        coordinator
            .enlist(tx, Arc::new(a.clone()), OperationData::Null)
            .await
            .unwrap();
        coordinator.execute(tx).await.unwrap();

        let verdict = coordinator.recover(tx).await.unwrap();

        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(a.calls(Operation::Prepare), 1);
        assert_eq!(a.calls(Operation::Commit), 1);
    }

    #[tokio::test]
    async fn test_recover_requires_registered_participants() {
        let log = InMemoryTransactionLog::new();
        let tx = TransactionId::new();
        log.append(
            LogEntry::builder(tx, LogPhase::Prepare, TransactionState::Prepared)
                .participants([ParticipantId::from("ghost")])
                .votes([(ParticipantId::from("ghost"), Vote::Commit)])
                .build(),
        )
        .await
        .unwrap();

        let coordinator = Coordinator::new(log, fast_config());
        let result = coordinator.recover(tx).await;

        assert!(matches!(
            result,
            Err(CoordinatorError::UnknownParticipant { participant, .. }) if participant.as_str() == "ghost"
        ));
        assert!(coordinator.live_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_recover_read_failure() {
        let log = InMemoryTransactionLog::new();
        log.set_unavailable(true);
        let coordinator = Coordinator::new(log, fast_config());

        assert!(matches!(
            coordinator.recover(TransactionId::new()).await,
            Err(CoordinatorError::LogRead(_))
        ));
    }

    #[tokio::test]
    async fn test_recover_all_finishes_in_doubt_transactions() {
        let log = InMemoryTransactionLog::new();
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::new("b");
        let committed = TransactionId::new();
        let aborted = TransactionId::new();

        log.append(
            LogEntry::builder(committed, LogPhase::Prepare, TransactionState::Prepared)
                .participants([ParticipantId::from("a")])
                .votes([(ParticipantId::from("a"), Vote::Commit)])
                .build(),
        )
        .await
        .unwrap();
        log.append(
            LogEntry::builder(aborted, LogPhase::Prepare, TransactionState::Aborting)
                .participants([ParticipantId::from("a"), ParticipantId::from("b")])
                .votes([
                    (ParticipantId::from("a"), Vote::Commit),
                    (ParticipantId::from("b"), Vote::Abort),
                ])
                .build(),
        )
        .await
        .unwrap();

        let coordinator = Coordinator::new(log.clone(), fast_config());
        coordinator.register_participant(Arc::new(a.clone()));
        coordinator.register_participant(Arc::new(b.clone()));

        let results = coordinator.recover_all().await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, committed);
        assert_eq!(*results[0].1.as_ref().unwrap(), Verdict::Committed);
        assert_eq!(results[1].0, aborted);
        assert_eq!(*results[1].1.as_ref().unwrap(), Verdict::RolledBack);

        assert_eq!(a.commits_for(committed), 1);
        assert_eq!(a.rollbacks_for(aborted), 1);
        assert_eq!(b.calls(Operation::Rollback), 0);
        assert!(log.in_doubt().await.unwrap().is_empty());
    }
}
