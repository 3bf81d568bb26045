//! Test Governor - adaptive test execution daemon
//!
//! Runs the governor's optimization loops against an in-memory storage
//! handle, drives a synthetic soak workload through it and serves health,
//! metrics and state over HTTP.

use anyhow::{Context, Result};
use governor_lib::storage::InMemoryStorage;
use governor_lib::telemetry::ExportFormat;
use governor_lib::{Governor, GovernorSettings};
use std::sync::Arc;
use std::time::Duration;
use test_governor::{api, config::DaemonConfig, workload};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = GovernorSettings::from_env().context("failed to load governor settings")?;

    // VERBOSE / ERRORS_ONLY win over RUST_LOG
    let filter = match settings.log_filter() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    info!(
        environment = %settings.environment,
        engine = %settings.storage_engine,
        "Starting test-governor"
    );

    let daemon = DaemonConfig::load()?;
    info!(api_port = daemon.api_port, workload_tests = daemon.workload_tests, "Daemon configured");

    let storage = InMemoryStorage::new(
        settings.storage_engine,
        InMemoryStorage::default_settings(10),
    );
    storage.set_failure_interval(daemon.failure_interval);

    let governor = Arc::new(
        Governor::builder(settings, Arc::new(storage.clone()))
            .build()
            .context("failed to build governor")?,
    );
    governor.start().await;

    let app_state = Arc::new(api::AppState::new(Arc::clone(&governor)));
    let api_handle = tokio::spawn(api::serve(daemon.api_port, app_state));

    if daemon.workload_tests > 0 {
        let governor = Arc::clone(&governor);
        let work = Duration::from_millis(daemon.work_ms);
        let tests = daemon.workload_tests;
        tokio::spawn(async move {
            workload::run_workload(Arc::clone(&governor), storage, tests, work).await;
            for format in [ExportFormat::Json, ExportFormat::Summary] {
                if let Err(e) = governor.export_metrics(format).await {
                    warn!(error = %e, format = format.as_str(), "Metrics export failed");
                }
            }
        });
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            governor.shutdown("SIGINT received").await;
        }
        result = api_handle => {
            governor.shutdown("API server stopped").await;
            result.context("API server task failed")??;
        }
    }

    info!("Shutting down");
    Ok(())
}
