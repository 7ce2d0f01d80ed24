//! Shared types used across the coordinator workspace.

pub mod state;
pub mod types;
pub mod vote;

pub use state::TransactionState;
pub use types::{ParticipantId, TransactionId};
pub use vote::{Verdict, Vote};
