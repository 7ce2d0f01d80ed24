//! Scripted in-memory participant for tests and simulations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{ParticipantId, TransactionId, Vote, vote::VOTE_COMMIT};

use crate::error::ParticipantError;
use crate::executor::Operation;
use crate::participant::{OperationData, Participant};

#[derive(Debug, Default, Clone, Copy)]
struct CallScript {
    failures_left: u32,
    hang: bool,
    calls: u32,
}

#[derive(Debug)]
struct ScriptedState {
    wire_vote: String,
    delay: Duration,
    prepare: CallScript,
    commit: CallScript,
    rollback: CallScript,
    staged: HashMap<TransactionId, OperationData>,
    committed: Vec<TransactionId>,
    rolled_back: Vec<TransactionId>,
}

impl Default for ScriptedState {
    fn default() -> Self {
        Self {
            wire_vote: VOTE_COMMIT.to_string(),
            delay: Duration::ZERO,
            prepare: CallScript::default(),
            commit: CallScript::default(),
            rollback: CallScript::default(),
            staged: HashMap::new(),
            committed: Vec::new(),
            rolled_back: Vec::new(),
        }
    }
}

impl ScriptedState {
    fn script(&mut self, operation: Operation) -> &mut CallScript {
        match operation {
            Operation::Prepare => &mut self.prepare,
            Operation::Commit => &mut self.commit,
            Operation::Rollback => &mut self.rollback,
        }
    }
}

/// A participant whose behaviour is scripted in advance.
///
/// Clones share state, so a test can keep a clone to inspect call counts
/// after handing another to the coordinator. By default it votes commit
/// and every call succeeds immediately.
#[derive(Debug, Clone)]
pub struct ScriptedParticipant {
    id: ParticipantId,
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedParticipant {
    /// Creates a participant that votes commit.
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(ScriptedState::default())),
        }
    }

    /// Creates a participant that answers prepare with a raw wire vote.
    pub fn with_wire_vote(id: impl Into<ParticipantId>, wire_vote: impl Into<String>) -> Self {
        let participant = Self::new(id);
        participant.set_wire_vote(wire_vote);
        participant
    }

    /// Creates a participant that votes abort.
    pub fn aborting(id: impl Into<ParticipantId>) -> Self {
        Self::with_wire_vote(id, common::vote::VOTE_ABORT)
    }

    /// Replaces the raw vote string returned by later prepare calls.
    pub fn set_wire_vote(&self, wire_vote: impl Into<String>) {
        self.lock().wire_vote = wire_vote.into();
    }

    /// Delays every call by `delay` before it resolves.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Makes the next `count` calls of `operation` fail.
    pub fn fail_next(&self, operation: Operation, count: u32) {
        self.lock().script(operation).failures_left = count;
    }

    /// Makes every call of `operation` hang forever.
    pub fn set_hang(&self, operation: Operation, hang: bool) {
        self.lock().script(operation).hang = hang;
    }

    /// Number of times `operation` was invoked, including failed attempts.
    pub fn calls(&self, operation: Operation) -> u32 {
        self.lock().script(operation).calls
    }

    /// Number of successful commits for a transaction.
    pub fn commits_for(&self, transaction_id: TransactionId) -> usize {
        self.lock()
            .committed
            .iter()
            .filter(|tx| **tx == transaction_id)
            .count()
    }

    /// Number of successful rollbacks for a transaction.
    pub fn rollbacks_for(&self, transaction_id: TransactionId) -> usize {
        self.lock()
            .rolled_back
            .iter()
            .filter(|tx| **tx == transaction_id)
            .count()
    }

    /// Returns true if prepare staged work that is neither committed nor rolled back.
    pub fn is_staged(&self, transaction_id: TransactionId) -> bool {
        self.lock().staged.contains_key(&transaction_id)
    }

    /// The operation data received by prepare for a transaction.
    pub fn staged_data(&self, transaction_id: TransactionId) -> Option<OperationData> {
        self.lock().staged.get(&transaction_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and applies its delay, hang and failure script.
    async fn enter(&self, operation: Operation) -> Result<(), ParticipantError> {
        let (delay, hang, fail) = {
            let mut state = self.lock();
            let delay = state.delay;
            let script = state.script(operation);
            script.calls += 1;
            let fail = script.failures_left > 0;
            if fail {
                script.failures_left -= 1;
            }
            (delay, script.hang, fail)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ParticipantError::Unavailable(format!(
                "{} scripted to fail {operation}",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Participant for ScriptedParticipant {
    fn id(&self) -> ParticipantId {
        self.id.clone()
    }

    async fn prepare(
        &self,
        transaction_id: TransactionId,
        data: &OperationData,
    ) -> Result<Vote, ParticipantError> {
        self.enter(Operation::Prepare).await?;

        let mut state = self.lock();
        let vote = Vote::from_wire(&state.wire_vote);
        if vote.is_commit() {
            state.staged.insert(transaction_id, data.clone());
        }
        Ok(vote)
    }

    async fn commit(&self, transaction_id: TransactionId) -> Result<(), ParticipantError> {
        self.enter(Operation::Commit).await?;

        let mut state = self.lock();
        state.staged.remove(&transaction_id);
        state.committed.push(transaction_id);
        Ok(())
    }

    async fn rollback(&self, transaction_id: TransactionId) -> Result<(), ParticipantError> {
        self.enter(Operation::Rollback).await?;

        let mut state = self.lock();
        state.staged.remove(&transaction_id);
        state.rolled_back.push(transaction_id);
        Ok(())
    }
}
