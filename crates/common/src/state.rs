//! Transaction lifecycle states.

use serde::{Deserialize, Serialize};

use crate::vote::Verdict;

/// The state of a transaction in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Preparing ──┬──► Prepared ──► Committing ──► Committed
///                         └──► Aborting ─────────────────► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransactionState {
    /// Created, accepting enlistment.
    #[default]
    Pending,

    /// Prepare calls are in flight.
    Preparing,

    /// Every participant voted commit; the decision is commit.
    Prepared,

    /// The decision is rollback; rollback calls are pending or in flight.
    Aborting,

    /// Commit calls are in flight.
    Committing,

    /// Terminal: the transaction committed.
    Committed,

    /// Terminal: the transaction rolled back.
    RolledBack,
}

impl TransactionState {
    /// Returns true if participants may still be enlisted.
    pub fn can_enlist(&self) -> bool {
        matches!(self, TransactionState::Pending)
    }

    /// Returns true once the global decision has been made.
    pub fn is_decided(&self) -> bool {
        self.verdict().is_some()
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack
        )
    }

    /// Returns the verdict implied by this state, if a decision has been made.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            TransactionState::Prepared
            | TransactionState::Committing
            | TransactionState::Committed => Some(Verdict::Committed),
            TransactionState::Aborting | TransactionState::RolledBack => Some(Verdict::RolledBack),
            TransactionState::Pending | TransactionState::Preparing => None,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "Pending",
            TransactionState::Preparing => "Preparing",
            TransactionState::Prepared => "Prepared",
            TransactionState::Aborting => "Aborting",
            TransactionState::Committing => "Committing",
            TransactionState::Committed => "Committed",
            TransactionState::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Verdict> for TransactionState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Committed => TransactionState::Committed,
            Verdict::RolledBack => TransactionState::RolledBack,
        }
    }
}
