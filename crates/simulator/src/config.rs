//! Simulator configuration loaded from environment variables.

/// Workload shape with sensible defaults.
///
/// Reads from environment variables:
/// - `SIM_TRANSACTIONS`: transactions to run (default: `200`)
/// - `SIM_PARTICIPANTS`: participants per transaction (default: `3`)
/// - `SIM_CONCURRENCY`: transactions in flight at once (default: `16`)
/// - `SIM_ABORT_PERCENT`: share of transactions with an abort vote (default: `10`)
/// - `SIM_FLAKY_PERCENT`: share with one transient commit failure (default: `10`)
/// - `SIM_STUCK_PERCENT`: share whose commit fails past every retry (default: `5`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
///
/// The coordinator itself reads the `TX_*` variables.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub transactions: usize,
    pub participants: usize,
    pub concurrency: usize,
    pub abort_percent: u32,
    pub flaky_percent: u32,
    pub stuck_percent: u32,
    pub log_level: String,
}

impl SimulatorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());
        let percent = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .map(|p| p.min(100))
        };

        Self {
            transactions: number("SIM_TRANSACTIONS").unwrap_or(defaults.transactions),
            participants: number("SIM_PARTICIPANTS")
                .unwrap_or(defaults.participants)
                .max(1),
            concurrency: number("SIM_CONCURRENCY")
                .unwrap_or(defaults.concurrency)
                .max(1),
            abort_percent: percent("SIM_ABORT_PERCENT").unwrap_or(defaults.abort_percent),
            flaky_percent: percent("SIM_FLAKY_PERCENT").unwrap_or(defaults.flaky_percent),
            stuck_percent: percent("SIM_STUCK_PERCENT").unwrap_or(defaults.stuck_percent),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            transactions: 200,
            participants: 3,
            concurrency: 16,
            abort_percent: 10,
            flaky_percent: 10,
            stuck_percent: 5,
            log_level: "info".to_string(),
        }
    }
}
