//! Per-transaction state machine.

use std::collections::HashMap;
use std::sync::Arc;

use common::{ParticipantId, TransactionId, TransactionState, Verdict, Vote};
use tokio::sync::watch;
use tx_log::{LogEntry, LogPhase, TransactionLog};

use crate::config::{CommitFailurePolicy, DecisionPolicy, RollbackScope};
use crate::error::{CoordinatorError, Result};
use crate::executor::{Operation, PhaseExecutor, PhaseTarget};
use crate::participant::{OperationData, SharedParticipant};

/// An enlisted participant together with its coordinator-side guards.
struct ParticipantRecord {
    id: ParticipantId,
    participant: SharedParticipant,
    data: Arc<OperationData>,
    commit_executed: bool,
    rollback_executed: bool,
}

impl ParticipantRecord {
    fn target(&self) -> PhaseTarget {
        PhaseTarget::new(Arc::clone(&self.participant), Arc::clone(&self.data))
    }

    fn terminal_executed(&self, verdict: Verdict) -> bool {
        match verdict {
            Verdict::Committed => self.commit_executed,
            Verdict::RolledBack => self.rollback_executed,
        }
    }

    fn mark_executed(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Committed => self.commit_executed = true,
            Verdict::RolledBack => self.rollback_executed = true,
        }
    }
}

/// A single distributed transaction.
///
/// State transitions:
/// ```text
/// Pending ──► Preparing ──┬──► Prepared ──► Committing ──► Committed
///                         └──► Aborting ─────────────────► RolledBack
/// ```
///
/// Execution is driven as a loop over the current state, so a call that
/// stopped early (a failed log write, a dropped future) resumes where it
/// left off instead of repeating finished phases. Each participant
/// receives at most one successful commit or rollback, however often the
/// transaction is executed or recovered.
pub struct Transaction {
    id: TransactionId,
    participants: Vec<ParticipantRecord>,
    state: TransactionState,
    votes: HashMap<ParticipantId, Vote>,
    attempts: HashMap<ParticipantId, u32>,
    policy: DecisionPolicy,
    /// Prepare never finished; every enlisted participant is rolled back.
    prepare_interrupted: bool,
    prepare_logged: bool,
    /// Phase of the last durable entry written after the decision was delivered.
    decision_logged: Option<LogPhase>,
    state_tx: watch::Sender<TransactionState>,
}

impl Transaction {
    /// Creates a new `Pending` transaction.
    pub fn new(id: TransactionId, policy: DecisionPolicy) -> Self {
        let (state_tx, _) = watch::channel(TransactionState::Pending);
        Self {
            id,
            participants: Vec::new(),
            state: TransactionState::Pending,
            votes: HashMap::new(),
            attempts: HashMap::new(),
            policy,
            prepare_interrupted: false,
            prepare_logged: false,
            decision_logged: None,
            state_tx,
        }
    }

    /// Rebuilds a transaction from its latest log entry.
    ///
    /// `participants` must be in the entry's enlistment order. Operation
    /// data is not logged, so rebuilt participants carry `null`; it is only
    /// needed by prepare, which is never repeated.
    pub fn from_log(
        entry: &LogEntry,
        participants: Vec<SharedParticipant>,
        policy: DecisionPolicy,
    ) -> Result<Self> {
        let verdict = entry
            .verdict()
            .ok_or(CoordinatorError::UndecidedLogEntry(entry.transaction_id))?;

        let mut transaction = Self::new(entry.transaction_id, policy);
        transaction.participants = entry
            .participants
            .iter()
            .cloned()
            .zip(participants)
            .map(|(id, participant)| {
                let acknowledged = entry.phase != LogPhase::Prepare && entry.is_acknowledged(&id);
                ParticipantRecord {
                    id,
                    participant,
                    data: Arc::new(OperationData::Null),
                    commit_executed: acknowledged && verdict == Verdict::Committed,
                    rollback_executed: acknowledged && verdict == Verdict::RolledBack,
                }
            })
            .collect();
        transaction.votes = transaction
            .participants
            .iter()
            .map(|p| (p.id.clone(), entry.vote_of(&p.id)))
            .collect();
        transaction.prepare_logged = true;
        transaction.decision_logged = match entry.phase {
            LogPhase::Prepare => None,
            phase => Some(phase),
        };
        transaction.set_state(entry.state);
        Ok(transaction)
    }

    /// Returns the transaction's ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<TransactionState> {
        self.state_tx.subscribe()
    }

    /// Enlisted participant IDs in enlistment order.
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    /// Recorded prepare votes. Empty until prepare finishes.
    pub fn votes(&self) -> &HashMap<ParticipantId, Vote> {
        &self.votes
    }

    /// Call attempts per participant in the most recent phase.
    pub fn attempts(&self) -> &HashMap<ParticipantId, u32> {
        &self.attempts
    }

    /// The decision, once made.
    pub fn verdict(&self) -> Option<Verdict> {
        self.state.verdict()
    }

    /// True once the terminal state and every acknowledgement are durable.
    pub fn is_complete(&self) -> bool {
        self.decision_logged == Some(LogPhase::Complete)
    }

    /// Adds a participant. Only allowed while `Pending`.
    pub fn enlist(&mut self, participant: SharedParticipant, data: OperationData) -> Result<()> {
        if !self.state.can_enlist() {
            return Err(CoordinatorError::InvalidTransactionState {
                transaction_id: self.id,
                expected: TransactionState::Pending.to_string(),
                actual: self.state,
            });
        }

        let id = participant.id();
        if self.participants.iter().any(|p| p.id == id) {
            return Err(CoordinatorError::DuplicateParticipant {
                transaction_id: self.id,
                participant: id,
            });
        }

        self.participants.push(ParticipantRecord {
            id,
            participant,
            data: Arc::new(data),
            commit_executed: false,
            rollback_executed: false,
        });
        Ok(())
    }

    /// Drives the transaction to a terminal state and returns the verdict.
    ///
    /// On a terminal transaction this only returns the recorded verdict.
    pub async fn execute(
        &mut self,
        executor: &PhaseExecutor,
        log: &dyn TransactionLog,
    ) -> Result<Verdict> {
        loop {
            match self.state {
                TransactionState::Pending => self.prepare(executor).await,
                TransactionState::Preparing => self.presume_abort(),
                TransactionState::Prepared | TransactionState::Aborting
                    if !self.prepare_logged =>
                {
                    self.log_prepare(log).await?
                }
                TransactionState::Prepared => self.set_state(TransactionState::Committing),
                TransactionState::Committing | TransactionState::Aborting => {
                    self.deliver_decision(executor).await
                }
                TransactionState::Committed | TransactionState::RolledBack => {
                    if self.decision_logged.is_none() {
                        self.log_decision(log).await?;
                    }
                    return self.finish();
                }
            }
        }
    }

    /// Re-drives the decision phase from the logged votes.
    ///
    /// Prepare is never repeated. Participants that already acknowledged
    /// the decision are not called again.
    pub async fn recover(
        &mut self,
        executor: &PhaseExecutor,
        log: &dyn TransactionLog,
    ) -> Result<Verdict> {
        if !self.prepare_logged {
            return Err(CoordinatorError::NoLogFound(self.id));
        }

        if self.state.is_terminal() && self.decision_logged == Some(LogPhase::Decision) {
            self.deliver_decision(executor).await;
        }

        self.execute(executor, log).await
    }

    async fn prepare(&mut self, executor: &PhaseExecutor) {
        self.set_state(TransactionState::Preparing);
        tracing::debug!(transaction_id = %self.id, participants = self.participants.len(), "prepare started");

        let targets: Vec<PhaseTarget> = self.participants.iter().map(ParticipantRecord::target).collect();
        let outcome = executor.run(self.id, Operation::Prepare, &targets).await;

        self.attempts = outcome
            .iter()
            .map(|result| (result.participant.clone(), result.attempts))
            .collect();
        for failure in outcome.failures() {
            tracing::warn!(transaction_id = %self.id, error = %failure, "prepare failed");
        }
        self.votes = outcome
            .iter()
            .map(|result| (result.participant.clone(), result.vote()))
            .collect();

        match Verdict::from_votes(self.votes.values()) {
            Verdict::Committed => self.set_state(TransactionState::Prepared),
            Verdict::RolledBack => {
                tracing::warn!(transaction_id = %self.id, "prepare did not reach unanimity, rolling back");
                self.set_state(TransactionState::Aborting);
            }
        }
    }

    /// Prepare was interrupted before every vote arrived.
    fn presume_abort(&mut self) {
        tracing::warn!(transaction_id = %self.id, "prepare was interrupted, presuming abort");
        for record in &self.participants {
            self.votes.entry(record.id.clone()).or_insert(Vote::Unknown);
        }
        self.prepare_interrupted = true;
        self.set_state(TransactionState::Aborting);
    }

    /// Sends the decision to every target that has not acknowledged it yet.
    async fn deliver_decision(&mut self, executor: &PhaseExecutor) {
        let Some(verdict) = self.verdict() else {
            return;
        };
        let operation = match verdict {
            Verdict::Committed => Operation::Commit,
            Verdict::RolledBack => Operation::Rollback,
        };

        let targets: Vec<PhaseTarget> = self
            .decision_targets()
            .filter(|&i| !self.participants[i].terminal_executed(verdict))
            .map(|i| self.participants[i].target())
            .collect();

        if !targets.is_empty() {
            // Acknowledgements must be recorded before the phase yields again.
            let participants = &mut self.participants;
            let outcome = executor
                .run_with(self.id, operation, &targets, |result| {
                    if result.succeeded()
                        && let Some(record) =
                            participants.iter_mut().find(|p| p.id == result.participant)
                    {
                        record.mark_executed(verdict);
                    }
                })
                .await;

            self.attempts = outcome
                .iter()
                .map(|result| (result.participant.clone(), result.attempts))
                .collect();
            for failure in outcome.failures() {
                match verdict {
                    Verdict::Committed => {
                        tracing::error!(transaction_id = %self.id, error = %failure, "commit not acknowledged")
                    }
                    Verdict::RolledBack => {
                        tracing::warn!(transaction_id = %self.id, error = %failure, "rollback not acknowledged")
                    }
                }
            }
        }

        self.decision_logged = None;
        self.set_state(verdict.into());
    }

    /// Indices of the participants that receive the decision, in the order
    /// the calls are issued. Rollback runs in reverse enlistment order.
    fn decision_targets(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        let all = 0..self.participants.len();
        match self.verdict() {
            Some(Verdict::Committed) => Box::new(all),
            Some(Verdict::RolledBack) => {
                let prepared_only = self.policy.rollback_scope == RollbackScope::PreparedOnly
                    && !self.prepare_interrupted;
                Box::new(all.rev().filter(move |&i| {
                    !prepared_only
                        || self
                            .votes
                            .get(&self.participants[i].id)
                            .is_some_and(Vote::is_commit)
                }))
            }
            None => Box::new(std::iter::empty()),
        }
    }

    fn unacknowledged(&self) -> Vec<ParticipantId> {
        let Some(verdict) = self.verdict() else {
            return Vec::new();
        };
        self.decision_targets()
            .filter(|&i| !self.participants[i].terminal_executed(verdict))
            .map(|i| self.participants[i].id.clone())
            .collect()
    }

    fn has_unacknowledged(&self) -> bool {
        !self.unacknowledged().is_empty()
    }

    async fn log_prepare(&mut self, log: &dyn TransactionLog) -> Result<()> {
        let entry = LogEntry::builder(self.id, LogPhase::Prepare, self.state)
            .participants(self.participant_ids())
            .votes(self.ordered_votes())
            .build();
        self.append(log, entry).await?;
        self.prepare_logged = true;
        Ok(())
    }

    async fn log_decision(&mut self, log: &dyn TransactionLog) -> Result<()> {
        let phase = if self.has_unacknowledged() {
            LogPhase::Decision
        } else {
            LogPhase::Complete
        };
        let acknowledged: Vec<ParticipantId> = match self.verdict() {
            Some(verdict) => self
                .participants
                .iter()
                .filter(|p| p.terminal_executed(verdict))
                .map(|p| p.id.clone())
                .collect(),
            None => Vec::new(),
        };

        let entry = LogEntry::builder(self.id, phase, self.state)
            .participants(self.participant_ids())
            .votes(self.ordered_votes())
            .acknowledged(acknowledged)
            .build();
        self.append(log, entry).await?;
        self.decision_logged = Some(phase);
        Ok(())
    }

    async fn append(&self, log: &dyn TransactionLog, entry: LogEntry) -> Result<()> {
        let phase = entry.phase;
        match log.append(entry).await {
            Ok(lsn) => {
                tracing::debug!(transaction_id = %self.id, %phase, %lsn, "log entry written");
                Ok(())
            }
            Err(source) => {
                tracing::error!(transaction_id = %self.id, %phase, error = %source, "log write failed");
                Err(CoordinatorError::LogWrite {
                    transaction_id: self.id,
                    source,
                })
            }
        }
    }

    fn ordered_votes(&self) -> Vec<(ParticipantId, Vote)> {
        self.participants
            .iter()
            .map(|p| {
                let vote = self.votes.get(&p.id).copied().unwrap_or_default();
                (p.id.clone(), vote)
            })
            .collect()
    }

    fn finish(&self) -> Result<Verdict> {
        let verdict = match self.state {
            TransactionState::Committed => Verdict::Committed,
            _ => Verdict::RolledBack,
        };

        if verdict == Verdict::Committed
            && self.policy.commit_failure == CommitFailurePolicy::Escalate
        {
            let unacknowledged = self.unacknowledged();
            if !unacknowledged.is_empty() {
                return Err(CoordinatorError::CommitIncomplete {
                    transaction_id: self.id,
                    unacknowledged,
                });
            }
        }

        Ok(verdict)
    }

    fn set_state(&mut self, state: TransactionState) {
        if self.state != state {
            tracing::debug!(transaction_id = %self.id, from = %self.state, to = %state, "state transition");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("participants", &self.participant_ids())
            .field("votes", &self.votes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor::RetryPolicy;
    use crate::participant::{Participant, ScriptedParticipant};
    use tx_log::{InMemoryTransactionLog, TransactionLog};

    fn executor() -> PhaseExecutor {
        PhaseExecutor::new(RetryPolicy::new(
            Duration::from_millis(200),
            2,
            Duration::from_millis(1),
        ))
    }

    fn transaction_with(participants: &[&ScriptedParticipant]) -> Transaction {
        let mut tx = Transaction::new(TransactionId::new(), DecisionPolicy::default());
        for p in participants {
            tx.enlist(Arc::new((*p).clone()), serde_json::json!({"id": p.id().to_string()}))
                .unwrap();
        }
        tx
    }

    #[tokio::test]
    async fn test_unanimous_commit() {
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::new("b");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a, &b]);

        let verdict = tx.execute(&executor(), &log).await.unwrap();

        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.is_complete());
        assert_eq!(a.commits_for(tx.id()), 1);
        assert_eq!(b.commits_for(tx.id()), 1);
        assert_eq!(a.calls(Operation::Rollback), 0);

        let history = log.entries(tx.id()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].phase, LogPhase::Prepare);
        assert_eq!(history[0].state, TransactionState::Prepared);
        assert_eq!(history[1].phase, LogPhase::Complete);
        assert_eq!(history[1].state, TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_abort_vote_rolls_back_prepared_only() {
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::aborting("b");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a, &b]);

        let verdict = tx.execute(&executor(), &log).await.unwrap();

        assert_eq!(verdict, Verdict::RolledBack);
        assert_eq!(a.rollbacks_for(tx.id()), 1);
        assert_eq!(b.calls(Operation::Rollback), 0);
        assert_eq!(a.calls(Operation::Commit), 0);
        assert_eq!(tx.votes().get(&"b".into()), Some(&Vote::Abort));
    }

    #[tokio::test]
    async fn test_all_enlisted_scope_rolls_back_everyone() {
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::aborting("b");
        let log = InMemoryTransactionLog::new();
        let mut tx = Transaction::new(
            TransactionId::new(),
            DecisionPolicy {
                rollback_scope: RollbackScope::AllEnlisted,
                ..DecisionPolicy::default()
            },
        );
        tx.enlist(Arc::new(a.clone()), OperationData::Null).unwrap();
        tx.enlist(Arc::new(b.clone()), OperationData::Null).unwrap();

        tx.execute(&executor(), &log).await.unwrap();

        assert_eq!(a.rollbacks_for(tx.id()), 1);
        assert_eq!(b.rollbacks_for(tx.id()), 1);
    }

    #[tokio::test]
    async fn test_enlist_rejected_after_execution() {
        let a = ScriptedParticipant::new("a");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a]);
        tx.execute(&executor(), &log).await.unwrap();

        let result = tx.enlist(
            Arc::new(ScriptedParticipant::new("late")),
            OperationData::Null,
        );
        assert!(matches!(
            result,
            Err(CoordinatorError::InvalidTransactionState { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_enlistment_rejected() {
        let a = ScriptedParticipant::new("a");
        let mut tx = transaction_with(&[&a]);

        let result = tx.enlist(Arc::new(a.clone()), OperationData::Null);
        assert!(matches!(
            result,
            Err(CoordinatorError::DuplicateParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn test_reexecution_is_a_no_op() {
        let a = ScriptedParticipant::new("a");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a]);

        tx.execute(&executor(), &log).await.unwrap();
        let verdict = tx.execute(&executor(), &log).await.unwrap();

        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(a.calls(Operation::Prepare), 1);
        assert_eq!(a.calls(Operation::Commit), 1);
        assert_eq!(log.entry_count().await, 2);
    }

    #[tokio::test]
    async fn test_prepare_log_failure_is_fatal_and_resumable() {
        let a = ScriptedParticipant::new("a");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a]);

        log.set_unavailable(true);
        let result = tx.execute(&executor(), &log).await;
        assert!(matches!(result, Err(CoordinatorError::LogWrite { .. })));
        assert_eq!(tx.state(), TransactionState::Prepared);
        assert_eq!(a.calls(Operation::Commit), 0);

        log.set_unavailable(false);
        let verdict = tx.execute(&executor(), &log).await.unwrap();
        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(a.calls(Operation::Prepare), 1);
        assert_eq!(a.commits_for(tx.id()), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_verdict_and_logs_decision() {
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::new("b");
        b.fail_next(Operation::Commit, 10);
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a, &b]);

        let verdict = tx.execute(&executor(), &log).await.unwrap();
        assert_eq!(verdict, Verdict::Committed);
        assert!(!tx.is_complete());

        let latest = log.read_latest(tx.id()).await.unwrap().unwrap();
        assert_eq!(latest.phase, LogPhase::Decision);
        assert_eq!(latest.acknowledged, vec![ParticipantId::from("a")]);

        b.fail_next(Operation::Commit, 0);
        let verdict = tx.recover(&executor(), &log).await.unwrap();
        assert_eq!(verdict, Verdict::Committed);
        assert!(tx.is_complete());
        assert_eq!(a.commits_for(tx.id()), 1);
        assert_eq!(b.commits_for(tx.id()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_commit_phase_keeps_acknowledgements() {
        let fast = ScriptedParticipant::new("fast");
        let slow = ScriptedParticipant::new("slow");
        slow.set_delay(Duration::from_millis(100));
        let log = InMemoryTransactionLog::new();
        let executor = executor();
        let mut tx = transaction_with(&[&fast, &slow]);
        let id = tx.id();

        // Prepare ends at 100ms; slow's commit would end at 200ms.
        let interrupted =
            tokio::time::timeout(Duration::from_millis(150), tx.execute(&executor, &log)).await;
        assert!(interrupted.is_err());
        assert_eq!(tx.state(), TransactionState::Committing);
        assert_eq!(fast.commits_for(id), 1);
        assert_eq!(slow.commits_for(id), 0);

        let verdict = tx.execute(&executor, &log).await.unwrap();
        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(fast.commits_for(id), 1);
        assert_eq!(fast.calls(Operation::Commit), 1);
        assert_eq!(slow.commits_for(id), 1);
        assert!(tx.is_complete());
    }

    #[tokio::test]
    async fn test_escalate_policy_reports_incomplete_commit() {
        let a = ScriptedParticipant::new("a");
        a.fail_next(Operation::Commit, 10);
        let log = InMemoryTransactionLog::new();
        let mut tx = Transaction::new(
            TransactionId::new(),
            DecisionPolicy {
                commit_failure: CommitFailurePolicy::Escalate,
                ..DecisionPolicy::default()
            },
        );
        tx.enlist(Arc::new(a.clone()), OperationData::Null).unwrap();

        let result = tx.execute(&executor(), &log).await;
        match result {
            Err(CoordinatorError::CommitIncomplete { unacknowledged, .. }) => {
                assert_eq!(unacknowledged, vec![ParticipantId::from("a")]);
            }
            other => panic!("expected CommitIncomplete, got {other:?}"),
        }
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_interrupted_prepare_is_presumed_aborted() {
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::new("b");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a, &b]);
        tx.set_state(TransactionState::Preparing);

        let verdict = tx.execute(&executor(), &log).await.unwrap();

        assert_eq!(verdict, Verdict::RolledBack);
        assert_eq!(a.calls(Operation::Prepare), 0);
        assert_eq!(a.rollbacks_for(tx.id()), 1);
        assert_eq!(b.rollbacks_for(tx.id()), 1);
        assert_eq!(tx.votes().get(&"a".into()), Some(&Vote::Unknown));
    }

    #[tokio::test]
    async fn test_empty_transaction_commits() {
        let log = InMemoryTransactionLog::new();
        let mut tx = Transaction::new(TransactionId::new(), DecisionPolicy::default());

        let verdict = tx.execute(&executor(), &log).await.unwrap();
        assert_eq!(verdict, Verdict::Committed);
        assert!(tx.is_complete());
    }

    #[tokio::test]
    async fn test_from_log_restores_acknowledgements() {
        let a = ScriptedParticipant::new("a");
        let b = ScriptedParticipant::new("b");
        let tx_id = TransactionId::new();
        let entry = LogEntry::builder(tx_id, LogPhase::Decision, TransactionState::Committed)
            .participants([ParticipantId::from("a"), ParticipantId::from("b")])
            .votes([
                (ParticipantId::from("a"), Vote::Commit),
                (ParticipantId::from("b"), Vote::Commit),
            ])
            .acknowledged([ParticipantId::from("a")])
            .build();
        let log = InMemoryTransactionLog::new();
        log.append(
            LogEntry::builder(tx_id, LogPhase::Prepare, TransactionState::Prepared).build(),
        )
        .await
        .unwrap();
        log.append(entry.clone()).await.unwrap();

        let mut tx = Transaction::from_log(
            &entry,
            vec![Arc::new(a.clone()), Arc::new(b.clone())],
            DecisionPolicy::default(),
        )
        .unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);

        let verdict = tx.recover(&executor(), &log).await.unwrap();
        assert_eq!(verdict, Verdict::Committed);
        assert_eq!(a.calls(Operation::Commit), 0);
        assert_eq!(b.commits_for(tx_id), 1);
        assert!(tx.is_complete());
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let a = ScriptedParticipant::new("a");
        let log = InMemoryTransactionLog::new();
        let mut tx = transaction_with(&[&a]);
        let rx = tx.subscribe();
        assert_eq!(*rx.borrow(), TransactionState::Pending);

        tx.execute(&executor(), &log).await.unwrap();
        assert_eq!(*rx.borrow(), TransactionState::Committed);
    }
}
