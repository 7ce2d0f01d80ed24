//! Simulator entry point.

use coordinator::CoordinatorConfig;
use simulator::SimulatorConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let config = SimulatorConfig::from_env();
    let coordinator_config = CoordinatorConfig::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Run the workload
    tracing::info!(?config, ?coordinator_config, "starting simulation");
    let report = simulator::run(&config, coordinator_config)
        .await
        .expect("simulation failed");

    // 4. Report
    println!("{report}");
    println!("{}", metrics_handle.render());

    if !report.is_consistent() {
        tracing::error!(%report, "simulation found inconsistent transactions");
        std::process::exit(1);
    }
}
