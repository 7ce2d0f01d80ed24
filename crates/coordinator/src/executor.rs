//! Concurrent fan-out of one operation across a set of participants.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::{ParticipantId, TransactionId, Vote};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{ParticipantCallFailed, ParticipantError};
use crate::participant::{OperationData, SharedParticipant};

/// The operation a phase runs on every participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Prepare,
    Commit,
    Rollback,
}

impl Operation {
    /// Returns the operation name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Prepare => "Prepare",
            Operation::Commit => "Commit",
            Operation::Rollback => "Rollback",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call timeout and bounded exponential backoff.
///
/// `max_retries` is the total number of attempts per call and is never
/// below 1. The delay after failed attempt `n` (0-based) is
/// `base_backoff * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `max_retries` below 1 is raised to 1.
    pub fn new(timeout: Duration, max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            timeout,
            max_retries: max_retries.max(1),
            base_backoff,
        }
    }

    /// Time a single attempt may take before it is abandoned.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Total attempts per call, the first one included.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay after the first failed attempt.
    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Delay before the attempt following failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Upper bound on how long one participant call can take, retries included.
    pub fn worst_case(&self) -> Duration {
        let waits = (0..self.max_retries.saturating_sub(1))
            .map(|attempt| self.backoff(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        self.timeout
            .saturating_mul(self.max_retries)
            .saturating_add(waits)
    }
}

/// A participant and the data its calls carry.
#[derive(Clone)]
pub struct PhaseTarget {
    pub participant: SharedParticipant,
    pub data: Arc<OperationData>,
}

impl PhaseTarget {
    /// Pairs a participant with the data its prepare call receives.
    pub fn new(participant: SharedParticipant, data: Arc<OperationData>) -> Self {
        Self { participant, data }
    }
}

impl std::fmt::Debug for PhaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseTarget")
            .field("participant", &self.participant.id())
            .field("data", &self.data)
            .finish()
    }
}

/// A successful participant response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Prepare returned a vote.
    Voted(Vote),
    /// Commit or rollback succeeded.
    Acknowledged,
}

/// Final result of one participant's call in a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// An attempt succeeded within the policy.
    Success(Response),
    /// Every attempt failed or timed out.
    Failed(ParticipantCallFailed),
}

/// One participant's final result in a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantOutcome {
    pub participant: ParticipantId,
    pub attempts: u32,
    pub outcome: CallOutcome,
}

impl ParticipantOutcome {
    /// Returns true if the call succeeded on some attempt.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, CallOutcome::Success(_))
    }

    /// The recorded vote. Failed calls and non-prepare responses are `Unknown`.
    pub fn vote(&self) -> Vote {
        match self.outcome {
            CallOutcome::Success(Response::Voted(vote)) => vote,
            _ => Vote::Unknown,
        }
    }
}

/// Outcomes of a phase, in target order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub operation: Operation,
    pub outcomes: Vec<ParticipantOutcome>,
}

impl PhaseOutcome {
    /// Looks up the outcome of a participant.
    pub fn get(&self, participant: &ParticipantId) -> Option<&ParticipantOutcome> {
        self.outcomes.iter().find(|o| &o.participant == participant)
    }

    /// Iterates over the outcomes in target order.
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantOutcome> {
        self.outcomes.iter()
    }

    /// Returns true if no call failed. Vacuously true for an empty phase.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(ParticipantOutcome::succeeded)
    }

    /// Iterates over the calls that exhausted their retries.
    pub fn failures(&self) -> impl Iterator<Item = &ParticipantCallFailed> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            CallOutcome::Failed(failure) => Some(failure),
            CallOutcome::Success(_) => None,
        })
    }

    /// Returns the number of participants in the phase.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if the phase had no targets.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Runs one operation on many participants concurrently.
///
/// Each call races a timer; a call that loses is abandoned and counts as a
/// failed attempt. Failed attempts are retried with exponential backoff
/// until the policy's attempts are spent. Individual failures come back as
/// data in the [`PhaseOutcome`], never as an error. The executor keeps no
/// state between runs.
#[derive(Debug, Clone, Copy)]
pub struct PhaseExecutor {
    policy: RetryPolicy,
}

impl PhaseExecutor {
    /// Creates an executor applying `policy` to every call.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs `operation` on every target and waits until each has a final outcome.
    pub async fn run(
        &self,
        transaction_id: TransactionId,
        operation: Operation,
        targets: &[PhaseTarget],
    ) -> PhaseOutcome {
        self.run_with(transaction_id, operation, targets, |_| {})
            .await
    }

    /// Like [`PhaseExecutor::run`], but hands each outcome to `on_outcome`
    /// as soon as that participant's call is final.
    ///
    /// `on_outcome` runs before the phase yields again, so whatever it
    /// records survives the phase future being dropped.
    #[tracing::instrument(skip(self, targets, on_outcome), fields(participants = targets.len()))]
    pub async fn run_with<F>(
        &self,
        transaction_id: TransactionId,
        operation: Operation,
        targets: &[PhaseTarget],
        on_outcome: F,
    ) -> PhaseOutcome
    where
        F: FnMut(&ParticipantOutcome) + Send,
    {
        let on_outcome = Mutex::new(on_outcome);
        let calls = targets.iter().map(|target| {
            let on_outcome = &on_outcome;
            async move {
                let outcome = self
                    .call_with_retry(transaction_id, operation, target)
                    .await;
                {
                    let mut on_outcome = on_outcome.lock().unwrap_or_else(PoisonError::into_inner);
                    (*on_outcome)(&outcome);
                }
                outcome
            }
        });
        let outcomes = join_all(calls).await;

        PhaseOutcome {
            operation,
            outcomes,
        }
    }

    async fn call_with_retry(
        &self,
        transaction_id: TransactionId,
        operation: Operation,
        target: &PhaseTarget,
    ) -> ParticipantOutcome {
        let participant = target.participant.id();
        let mut attempts = 0;

        let last_error = loop {
            attempts += 1;
            let call = invoke(transaction_id, operation, target);
            let error = match tokio::time::timeout(self.policy.timeout, call).await {
                Ok(Ok(response)) => {
                    return ParticipantOutcome {
                        participant,
                        attempts,
                        outcome: CallOutcome::Success(response),
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => ParticipantError::TimedOut(self.policy.timeout),
            };

            if attempts >= self.policy.max_retries {
                break error;
            }

            let delay = self.policy.backoff(attempts - 1);
            metrics::counter!("participant_call_retries_total", "operation" => operation.as_str())
                .increment(1);
            tracing::warn!(
                %transaction_id,
                %participant,
                %operation,
                attempt = attempts,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "participant call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        metrics::counter!("participant_call_failures_total", "operation" => operation.as_str())
            .increment(1);
        ParticipantOutcome {
            participant: participant.clone(),
            attempts,
            outcome: CallOutcome::Failed(ParticipantCallFailed {
                participant,
                operation,
                attempts,
                last_error,
            }),
        }
    }
}

async fn invoke(
    transaction_id: TransactionId,
    operation: Operation,
    target: &PhaseTarget,
) -> Result<Response, ParticipantError> {
    match operation {
        Operation::Prepare => target
            .participant
            .prepare(transaction_id, &target.data)
            .await
            .map(Response::Voted),
        Operation::Commit => target
            .participant
            .commit(transaction_id)
            .await
            .map(|()| Response::Acknowledged),
        Operation::Rollback => target
            .participant
            .rollback(transaction_id)
            .await
            .map(|()| Response::Acknowledged),
    }
}
