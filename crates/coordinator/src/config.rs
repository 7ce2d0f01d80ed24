//! Coordinator configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::executor::RetryPolicy;

/// What the coordinator does when a commit call fails after its retries.
///
/// The verdict never changes: every vote was commit, so the transaction is
/// committed either way. The policy only decides what the caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitFailurePolicy {
    /// Log the failure and report `Committed`.
    #[default]
    LogAndContinue,

    /// Report `CoordinatorError::CommitIncomplete` so the caller can
    /// schedule a `recover`.
    Escalate,
}

impl FromStr for CommitFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "log_and_continue" => Ok(CommitFailurePolicy::LogAndContinue),
            "escalate" => Ok(CommitFailurePolicy::Escalate),
            other => Err(format!("unknown commit failure policy: {other}")),
        }
    }
}

/// Which participants receive rollback calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackScope {
    /// Only participants that voted commit during prepare.
    #[default]
    PreparedOnly,

    /// Every enlisted participant, whatever its vote.
    AllEnlisted,
}

impl FromStr for RollbackScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prepared" | "prepared_only" => Ok(RollbackScope::PreparedOnly),
            "all" | "all_enlisted" => Ok(RollbackScope::AllEnlisted),
            other => Err(format!("unknown rollback scope: {other}")),
        }
    }
}

/// Policies a transaction applies while delivering its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionPolicy {
    pub commit_failure: CommitFailurePolicy,
    pub rollback_scope: RollbackScope,
}

/// Coordinator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `TX_TIMEOUT_MS`: per-call timeout (default: `5000`)
/// - `TX_MAX_RETRIES`: attempts per participant call, at least 1 (default: `3`)
/// - `TX_BASE_BACKOFF_MS`: delay before the first retry (default: `50`)
/// - `TX_COMMIT_FAILURE_POLICY`: `log_and_continue` or `escalate`
/// - `TX_ROLLBACK_SCOPE`: `prepared_only` or `all_enlisted`
/// - `TX_EVICT_ON_COMPLETE`: `true` to retire completed transactions
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub commit_failure_policy: CommitFailurePolicy,
    pub rollback_scope: RollbackScope,
    pub evict_on_complete: bool,
}

impl CoordinatorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            timeout: parse_or(&lookup, "TX_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            max_retries: parse_or(&lookup, "TX_MAX_RETRIES")
                .unwrap_or(defaults.max_retries)
                .max(1),
            base_backoff: parse_or(&lookup, "TX_BASE_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
            commit_failure_policy: parse_or(&lookup, "TX_COMMIT_FAILURE_POLICY")
                .unwrap_or(defaults.commit_failure_policy),
            rollback_scope: parse_or(&lookup, "TX_ROLLBACK_SCOPE")
                .unwrap_or(defaults.rollback_scope),
            evict_on_complete: parse_or(&lookup, "TX_EVICT_ON_COMPLETE")
                .unwrap_or(defaults.evict_on_complete),
        }
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of attempts per call. Values below 1 are raised to 1.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Sets the backoff before the first retry. Later retries double it.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Sets how unacknowledged commits are reported.
    pub fn with_commit_failure_policy(mut self, policy: CommitFailurePolicy) -> Self {
        self.commit_failure_policy = policy;
        self
    }

    /// Sets which participants receive rollback.
    pub fn with_rollback_scope(mut self, scope: RollbackScope) -> Self {
        self.rollback_scope = scope;
        self
    }

    /// Removes transactions from the registry once they are durably complete.
    pub fn with_evict_on_complete(mut self, evict: bool) -> Self {
        self.evict_on_complete = evict;
        self
    }

    /// Returns the retry policy handed to the phase executor.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.timeout, self.max_retries, self.base_backoff)
    }

    /// Returns the policies applied when delivering a decision.
    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            commit_failure: self.commit_failure_policy,
            rollback_scope: self.rollback_scope,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_retries: 3,
            base_backoff: Duration::from_millis(50),
            commit_failure_policy: CommitFailurePolicy::default(),
            rollback_scope: RollbackScope::default(),
            evict_on_complete: false,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}
