//! Atomic commit coordinator.
//!
//! Drives a two-phase commit across independent participants:
//! 1. Prepare runs on every enlisted participant concurrently
//! 2. A unanimous commit vote commits; anything else rolls back
//! 3. The decision is delivered to the participants, at most once each
//!
//! Every phase outcome is recorded in a write-ahead log before it is
//! reported, so an interrupted transaction can be recovered from the log.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod participant;
pub mod transaction;

pub use common::{ParticipantId, TransactionId, TransactionState, Verdict, Vote};
pub use config::{CommitFailurePolicy, CoordinatorConfig, DecisionPolicy, RollbackScope};
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, ParticipantCallFailed, ParticipantError, Result};
pub use executor::{
    CallOutcome, Operation, ParticipantOutcome, PhaseExecutor, PhaseOutcome, PhaseTarget,
    Response, RetryPolicy,
};
pub use participant::{OperationData, Participant, ScriptedParticipant, SharedParticipant};
pub use transaction::Transaction;
