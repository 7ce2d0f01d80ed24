use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ParticipantId, Result, TransactionId, TransactionState, Verdict, Vote};

/// Log sequence number, assigned by the log on append.
///
/// Sequence numbers start at 1 and increase by 1 for every entry in the
/// log, across all transactions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Lsn(u64);

impl Lsn {
    /// Wraps a raw sequence number.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Sequence number of an entry that has not been appended yet.
    pub fn unassigned() -> Self {
        Self(0)
    }

    /// Returns the following sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw sequence number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The protocol point an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogPhase {
    /// Prepare finished: votes and the derived decision are recorded.
    Prepare,

    /// The decision phase ran but some participants never acknowledged
    /// their terminal call. Recovery re-drives the rest.
    Decision,

    /// Every participant acknowledged its terminal call.
    Complete,
}

impl LogPhase {
    /// Returns the phase name as written to the log.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogPhase::Prepare => "Prepare",
            LogPhase::Decision => "Decision",
            LogPhase::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for LogPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single participant's recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub participant: ParticipantId,
    pub vote: Vote,
}

/// One record in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log. [`Lsn::unassigned`] until appended.
    pub lsn: Lsn,

    pub transaction_id: TransactionId,

    pub phase: LogPhase,

    /// Transaction state at the time of writing.
    pub state: TransactionState,

    /// Enlisted participants in enlistment order.
    pub participants: Vec<ParticipantId>,

    /// Prepare votes in enlistment order.
    pub votes: Vec<VoteRecord>,

    /// Participants whose terminal call (commit or rollback) succeeded.
    pub acknowledged: Vec<ParticipantId>,

    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    /// Creates a builder for an entry of the given transaction.
    pub fn builder(
        transaction_id: TransactionId,
        phase: LogPhase,
        state: TransactionState,
    ) -> LogEntryBuilder {
        LogEntryBuilder {
            transaction_id,
            phase,
            state,
            participants: Vec::new(),
            votes: Vec::new(),
            acknowledged: Vec::new(),
            recorded_at: None,
        }
    }

    /// The decision this entry records, if any.
    pub fn verdict(&self) -> Option<Verdict> {
        self.state.verdict()
    }

    /// True once nothing is left to do for this transaction.
    pub fn is_complete(&self) -> bool {
        self.phase == LogPhase::Complete
    }

    /// Looks up the recorded vote of a participant.
    pub fn vote_of(&self, participant: &ParticipantId) -> Vote {
        self.votes
            .iter()
            .find(|r| &r.participant == participant)
            .map(|r| r.vote)
            .unwrap_or_default()
    }

    /// Returns true if the participant acknowledged the decision.
    pub fn is_acknowledged(&self, participant: &ParticipantId) -> bool {
        self.acknowledged.contains(participant)
    }

    /// Encodes the entry as a JSON record for a durable backend.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an entry previously written with [`LogEntry::to_json`].
    pub fn from_json(record: &str) -> Result<Self> {
        Ok(serde_json::from_str(record)?)
    }
}

/// Builder for [`LogEntry`].
#[derive(Debug)]
pub struct LogEntryBuilder {
    transaction_id: TransactionId,
    phase: LogPhase,
    state: TransactionState,
    participants: Vec<ParticipantId>,
    votes: Vec<VoteRecord>,
    acknowledged: Vec<ParticipantId>,
    recorded_at: Option<DateTime<Utc>>,
}

impl LogEntryBuilder {
    pub fn participants(mut self, participants: impl IntoIterator<Item = ParticipantId>) -> Self {
        self.participants = participants.into_iter().collect();
        self
    }

    pub fn votes(mut self, votes: impl IntoIterator<Item = (ParticipantId, Vote)>) -> Self {
        self.votes = votes
            .into_iter()
            .map(|(participant, vote)| VoteRecord { participant, vote })
            .collect();
        self
    }

    pub fn acknowledged(mut self, acknowledged: impl IntoIterator<Item = ParticipantId>) -> Self {
        self.acknowledged = acknowledged.into_iter().collect();
        self
    }

    /// Sets the timestamp. If not set, the current time is used.
    pub fn recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    /// Finishes the entry. Without an explicit timestamp the current time is used.
    pub fn build(self) -> LogEntry {
        LogEntry {
            lsn: Lsn::unassigned(),
            transaction_id: self.transaction_id,
            phase: self.phase,
            state: self.state,
            participants: self.participants,
            votes: self.votes,
            acknowledged: self.acknowledged,
            recorded_at: self.recorded_at.unwrap_or_else(Utc::now),
        }
    }
}
