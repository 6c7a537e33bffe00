//! Stock Monitor - end-of-day A-share ingestion and screening service.
//!
//! Keeps the trading calendar in sync, stores one cross-section per trading
//! day and screens the stored history on demand.

use anyhow::Result;
use monitor_common::logging::init_from_config;
use monitor_common::Config;
use stock_monitor::MonitorService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_from_config(&config.observability);

    tracing::info!("Stock Monitor v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let service = MonitorService::new(config)?;

    // Log startup timing before entering main service loop
    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
