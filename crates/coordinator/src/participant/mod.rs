//! The participant capability and a scripted in-memory implementation.

pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use common::{ParticipantId, TransactionId, Vote};

use crate::error::ParticipantError;

pub use scripted::ScriptedParticipant;

/// Opaque payload handed to a participant's prepare call.
pub type OperationData = serde_json::Value;

/// Shared handle to a participant. The coordinator only ever holds references.
pub type SharedParticipant = Arc<dyn Participant>;

/// An independently failable unit of work enlisted into a transaction.
///
/// All three calls may be retried, so they must be idempotent on the
/// participant's side. The coordinator additionally guarantees that at
/// most one commit or rollback per transaction succeeds from its side.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Stable identity used to key votes and log entries.
    fn id(&self) -> ParticipantId;

    /// Stages the work described by `data` and votes on the transaction.
    ///
    /// Participants speaking the string protocol can use [`Vote::from_wire`].
    async fn prepare(
        &self,
        transaction_id: TransactionId,
        data: &OperationData,
    ) -> Result<Vote, ParticipantError>;

    /// Makes the staged work permanent.
    async fn commit(&self, transaction_id: TransactionId) -> Result<(), ParticipantError>;

    /// Discards the staged work.
    async fn rollback(&self, transaction_id: TransactionId) -> Result<(), ParticipantError>;
}
