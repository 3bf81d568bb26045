//! Connection pool optimizer commands

use anyhow::Result;
use colored::Colorize;
use governor_lib::pool::{PoolMetrics, PoolOptimizationEvent};
use tabled::Tabled;

use crate::client::{ApiClient, HistoryResponse};
use crate::output::{
    color_ratio, color_reason, format_ratio, format_timestamp, print_heading, print_info,
    print_json, print_rows, print_success, OutputFormat,
};

/// Row for the pool decision history table
#[derive(Tabled)]
struct PoolEventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Max Conn")]
    max_connections: String,
    #[tabled(rename = "Max Idle")]
    max_idle: String,
    #[tabled(rename = "Lifetime")]
    lifetime: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn transition<T: PartialEq + std::fmt::Display>(old: T, new: T) -> String {
    if old == new {
        new.to_string()
    } else {
        format!("{} -> {}", old, new)
    }
}

fn event_row(event: &PoolOptimizationEvent) -> PoolEventRow {
    PoolEventRow {
        time: format_timestamp(&event.timestamp),
        max_connections: transition(event.old.max_connections, event.new.max_connections),
        max_idle: transition(event.old.max_idle, event.new.max_idle),
        lifetime: transition(
            event.old.conn_max_lifetime.as_secs(),
            event.new.conn_max_lifetime.as_secs(),
        ),
        cpu: format_ratio(event.snapshot.cpu_utilization),
        reason: color_reason(&event.reason),
    }
}

/// Show live pool statistics and the active configuration
pub async fn show_pool(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let metrics: PoolMetrics = client.get("api/v1/pool").await?;

    match format {
        OutputFormat::Json => print_json(&metrics)?,
        OutputFormat::Table => {
            let config = &metrics.config;
            print_heading("Connection Pool");
            println!("Engine:                 {}", config.engine.to_string().cyan());
            println!(
                "Connections:            {} in use / {} open / {} max",
                metrics.stats.in_use, metrics.stats.open, metrics.stats.max_open
            );
            println!("Utilization:            {}", color_ratio(metrics.utilization));
            println!(
                "Waits:                  {} ({} ms total)",
                metrics.stats.wait_count, metrics.stats.wait_duration_ms
            );
            println!();
            println!("{}", "Configuration".bold());
            println!("{}", "-".repeat(50));
            println!(
                "Bounds:                 min {} / max {} / idle {}",
                config.min_connections, config.max_connections, config.max_idle
            );
            println!(
                "Lifetime:               {}s (idle {}s)",
                config.conn_max_lifetime.as_secs(),
                config.conn_max_idle_time.as_secs()
            );
            println!(
                "Auto-optimize:          {} every {}s",
                config.auto_optimize,
                config.optimize_interval.as_secs()
            );
            println!();
            println!("{}", "Resources".bold());
            println!("{}", "-".repeat(50));
            println!(
                "CPU:                    {}",
                color_ratio(metrics.snapshot.cpu_utilization)
            );
            println!(
                "Memory:                 {}",
                color_ratio(metrics.snapshot.memory_utilization)
            );
        }
    }

    Ok(())
}

/// Show recorded pool decisions
pub async fn show_history(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let history: HistoryResponse<PoolOptimizationEvent> =
        client.get("api/v1/pool/history").await?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            print_heading("Pool Optimization History");
            let rows: Vec<PoolEventRow> = history.events.iter().map(event_row).collect();
            print_rows(&rows, "No pool decisions recorded yet");
            println!(
                "\nTotal: {} decisions, {} adjustments ({})",
                history.summary.total_events,
                history.summary.adjustments,
                format_ratio(history.summary.adjustment_rate())
            );
        }
    }

    Ok(())
}

/// Run one pool decision now
pub async fn optimize(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let event: PoolOptimizationEvent = client.post("api/v1/pool/optimize").await?;

    match format {
        OutputFormat::Json => print_json(&event)?,
        OutputFormat::Table => {
            if event.changed() {
                print_success(&format!("Pool adjusted: {}", event.reason));
            } else {
                print_info("Pool configuration unchanged");
            }
            print_rows(&[event_row(&event)], "");
        }
    }

    Ok(())
}
