//! Parallelism controller commands

use anyhow::Result;
use colored::Colorize;
use governor_lib::parallelism::{ParallelismEvent, ParallelismMetrics};
use tabled::Tabled;

use crate::client::{ApiClient, HistoryResponse};
use crate::output::{
    color_ratio, color_reason, format_ms, format_ratio, format_timestamp, print_heading,
    print_info, print_json, print_rows, print_success, OutputFormat,
};

/// Row for the ceiling decision history table
#[derive(Tabled)]
struct CeilingEventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Ceiling")]
    ceiling: String,
    #[tabled(rename = "Active")]
    active: usize,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn event_row(event: &ParallelismEvent) -> CeilingEventRow {
    let ceiling = if event.old_ceiling == event.new_ceiling {
        event.new_ceiling.to_string()
    } else {
        format!("{} -> {}", event.old_ceiling, event.new_ceiling)
    };
    CeilingEventRow {
        time: format_timestamp(&event.timestamp),
        ceiling,
        active: event.active_tests,
        cpu: format_ratio(event.snapshot.cpu_utilization),
        memory: format_ratio(event.snapshot.memory_utilization),
        reason: color_reason(&event.reason),
    }
}

/// Show the current ceiling and execution counters
pub async fn show_parallelism(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let metrics: ParallelismMetrics = client.get("api/v1/parallelism").await?;

    match format {
        OutputFormat::Json => print_json(&metrics)?,
        OutputFormat::Table => {
            print_heading("Parallelism");
            println!(
                "Ceiling:                {} (max {})",
                metrics.ceiling.to_string().cyan(),
                metrics.max_ceiling
            );
            println!("Active Tests:           {}", metrics.active_tests);
            println!("Completed:              {}", metrics.completed_tests);
            println!("Failed:                 {}", metrics.failed_tests);
            println!(
                "Avg Active Duration:    {}",
                format_ms(metrics.average_duration_ms)
            );
            let auto = if metrics.auto_optimizing {
                "running".green()
            } else {
                "stopped".yellow()
            };
            println!("Auto-optimization:      {}", auto);
            println!();
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

/// Show recorded ceiling decisions
pub async fn show_history(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let history: HistoryResponse<ParallelismEvent> =
        client.get("api/v1/parallelism/history").await?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            print_heading("Parallelism History");
            let rows: Vec<CeilingEventRow> = history.events.iter().map(event_row).collect();
            print_rows(&rows, "No ceiling decisions recorded yet");

            if !history.summary.by_reason.is_empty() {
                println!();
                for (reason, count) in &history.summary.by_reason {
                    println!("  {:<28} {}", reason, count);
                }
            }
        }
    }

    Ok(())
}

/// Run one ceiling decision now
pub async fn optimize(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let event: ParallelismEvent = client.post("api/v1/parallelism/optimize").await?;

    match format {
        OutputFormat::Json => print_json(&event)?,
        OutputFormat::Table => {
            if event.old_ceiling != event.new_ceiling {
                print_success(&format!(
                    "Ceiling moved {} -> {} ({})",
                    event.old_ceiling, event.new_ceiling, event.reason
                ));
            } else {
                print_info(&format!("Ceiling unchanged at {}", event.new_ceiling));
            }
        }
    }

    Ok(())
}
