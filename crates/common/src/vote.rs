//! Prepare-phase votes and transaction verdicts.

use serde::{Deserialize, Serialize};

/// Wire value a participant returns to accept the transaction.
pub const VOTE_COMMIT: &str = "vote_commit";

/// Wire value a participant returns to refuse the transaction.
pub const VOTE_ABORT: &str = "vote_abort";

/// A participant's answer to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Vote {
    /// The participant staged its work and will commit if asked.
    Commit,

    /// The participant refuses the transaction.
    Abort,

    /// No vote was recorded: the participant failed, timed out, or was never asked.
    #[default]
    Unknown,
}

impl Vote {
    /// Parses a wire vote. Anything other than `"vote_commit"` counts as abort.
    pub fn from_wire(value: &str) -> Self {
        match value {
            VOTE_COMMIT => Vote::Commit,
            _ => Vote::Abort,
        }
    }

    /// Returns true for an explicit commit vote.
    pub fn is_commit(&self) -> bool {
        matches!(self, Vote::Commit)
    }

    /// Returns the vote name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Commit => VOTE_COMMIT,
            Vote::Abort => VOTE_ABORT,
            Vote::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transaction-wide outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Committed,
    RolledBack,
}

impl Verdict {
    /// Derives the verdict from a set of votes.
    ///
    /// Only a unanimous commit commits. An empty vote set commits vacuously.
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        if votes.into_iter().all(Vote::is_commit) {
            Verdict::Committed
        } else {
            Verdict::RolledBack
        }
    }

    /// Returns the verdict name as logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Committed => "Committed",
            Verdict::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
