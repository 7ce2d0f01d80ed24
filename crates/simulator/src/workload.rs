//! Simulated transaction workload.

use std::fmt;
use std::sync::Arc;

use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorError, Operation, ScriptedParticipant, Verdict,
};
use futures_util::{StreamExt, stream};
use tx_log::{InMemoryTransactionLog, TransactionLog};

use crate::config::SimulatorConfig;
use crate::error::Result;

/// What a simulated transaction runs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Every participant votes commit and acknowledges.
    Clean,
    /// The last participant votes abort.
    Abort,
    /// The first participant fails one commit attempt.
    Flaky,
    /// The first participant fails every commit attempt of the first run.
    Stuck,
}

impl Scenario {
    /// Picks the scenario of the `index`-th transaction.
    ///
    /// Within every block of 100 transactions the scenarios occur exactly at
    /// the configured percentages.
    pub fn for_index(index: usize, config: &SimulatorConfig) -> Self {
        let bucket = ((index * 37) % 100) as u32;
        let abort = config.abort_percent;
        let stuck = abort + config.stuck_percent;
        let flaky = stuck + config.flaky_percent;

        if bucket < abort {
            Scenario::Abort
        } else if bucket < stuck {
            Scenario::Stuck
        } else if bucket < flaky {
            Scenario::Flaky
        } else {
            Scenario::Clean
        }
    }

    /// Verdict a correct coordinator must reach for this workload.
    pub fn expected_verdict(self) -> Verdict {
        match self {
            Scenario::Abort => Verdict::RolledBack,
            _ => Verdict::Committed,
        }
    }
}

/// Tally of a simulation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub committed: usize,
    pub rolled_back: usize,
    /// Committed, but some participant never acknowledged during execution.
    pub incomplete: usize,
    /// Verdicts that differ from the scenario's expectation.
    pub mismatched: usize,
    pub errors: usize,
    pub recovered: usize,
    /// Transactions the log still holds in doubt after recovery.
    pub in_doubt: usize,
}

impl Report {
    /// True when every verdict matched and nothing is left in doubt.
    pub fn is_consistent(&self) -> bool {
        self.mismatched == 0 && self.errors == 0 && self.in_doubt == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "committed={} rolled_back={} incomplete={} mismatched={} errors={} recovered={} in_doubt={}",
            self.committed,
            self.rolled_back,
            self.incomplete,
            self.mismatched,
            self.errors,
            self.recovered,
            self.in_doubt
        )
    }
}

/// Runs the configured workload and recovers every in-doubt transaction.
#[tracing::instrument(skip_all, fields(transactions = config.transactions))]
pub async fn run(config: &SimulatorConfig, coordinator_config: CoordinatorConfig) -> Result<Report> {
    let log = InMemoryTransactionLog::new();
    let coordinator = Coordinator::new(log.clone(), coordinator_config);
    let mut report = Report::default();

    let coordinator_ref = &coordinator;
    let outcomes: Vec<(Scenario, coordinator::Result<Verdict>)> = stream::iter(0..config.transactions)
        .map(move |index| {
            let scenario = Scenario::for_index(index, config);
            async move {
                let result =
                    run_transaction(coordinator_ref, index, scenario, config.participants).await;
                (scenario, result)
            }
        })
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    for (scenario, result) in outcomes {
        match result {
            Ok(verdict) if verdict != scenario.expected_verdict() => {
                tracing::error!(?scenario, %verdict, "unexpected verdict");
                report.mismatched += 1;
            }
            Ok(Verdict::Committed) => report.committed += 1,
            Ok(Verdict::RolledBack) => report.rolled_back += 1,
            Err(CoordinatorError::CommitIncomplete { .. }) => report.incomplete += 1,
            Err(e) => {
                tracing::error!(?scenario, error = %e, "transaction failed");
                report.errors += 1;
            }
        }
    }

    for (transaction_id, result) in coordinator.recover_all().await? {
        match result {
            Ok(_) => report.recovered += 1,
            Err(e) => {
                tracing::error!(%transaction_id, error = %e, "recovery failed");
                report.errors += 1;
            }
        }
    }

    report.in_doubt = log.in_doubt().await?.len();
    metrics::gauge!("transactions_in_doubt").set(report.in_doubt as f64);

    tracing::info!(%report, "simulation finished");
    Ok(report)
}

async fn run_transaction(
    coordinator: &Coordinator<InMemoryTransactionLog>,
    index: usize,
    scenario: Scenario,
    participants: usize,
) -> coordinator::Result<Verdict> {
    let tx = coordinator.begin_transaction();
    let max_retries = coordinator.config().max_retries;

    for slot in 0..participants {
        let id = format!("tx{index}-p{slot}");
        let participant = if scenario == Scenario::Abort && slot == participants - 1 {
            ScriptedParticipant::aborting(id)
        } else {
            ScriptedParticipant::new(id)
        };
        if slot == 0 {
            match scenario {
                Scenario::Flaky => participant.fail_next(Operation::Commit, 1),
                Scenario::Stuck => participant.fail_next(Operation::Commit, max_retries),
                Scenario::Clean | Scenario::Abort => {}
            }
        }

        let data = serde_json::json!({ "transaction": index, "slot": slot });
        coordinator.enlist(tx, Arc::new(participant), data).await?;
    }

    coordinator.execute(tx).await
}
