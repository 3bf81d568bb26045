//! Skip governor commands

use anyhow::Result;
use governor_lib::skip::{PriorityAdjustment, SkipEvent, SkipStatistics};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_ratio, format_timestamp, print_heading, print_info, print_json,
    print_rows, print_success, OutputFormat,
};

/// Row for the condition table
#[derive(Tabled)]
struct ConditionRow {
    #[tabled(rename = "Condition")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Priority")]
    priority: u8,
    #[tabled(rename = "Checked")]
    checked: u64,
    #[tabled(rename = "Skipped")]
    skipped: u64,
    #[tabled(rename = "Rate")]
    rate: String,
}

/// Row for the evaluation history table
#[derive(Tabled)]
struct SkipEventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Test")]
    test: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Show aggregate skip statistics and per-condition counters
pub async fn show_statistics(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: SkipStatistics = client.get("api/v1/skips").await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => {
            print_heading(&format!("Skip Conditions ({})", stats.environment));
            println!(
                "Evaluated: {}  Skipped: {}  Skip ratio: {}",
                stats.total_evaluations,
                stats.total_skipped,
                format_ratio(stats.skip_ratio)
            );
            println!();

            let rows: Vec<ConditionRow> = stats
                .conditions
                .iter()
                .map(|c| ConditionRow {
                    name: c.name.clone(),
                    category: c.category.to_string(),
                    priority: c.priority,
                    checked: c.checked,
                    skipped: c.skipped,
                    rate: format_ratio(c.skip_rate),
                })
                .collect();
            print_rows(&rows, "No skip conditions registered");
        }
    }

    Ok(())
}

/// Show the latest skip evaluations
pub async fn show_history(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/skips/history?limit={}", limit);
    let events: Vec<SkipEvent> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&events)?,
        OutputFormat::Table => {
            print_heading("Skip History");
            let rows: Vec<SkipEventRow> = events
                .iter()
                .map(|e| SkipEventRow {
                    time: format_timestamp(&e.timestamp),
                    test: e.test_name.clone(),
                    outcome: color_status(if e.should_run { "run" } else { "skipped" }),
                    reason: e.reason.clone(),
                })
                .collect();
            print_rows(&rows, "No skip evaluations recorded yet");
        }
    }

    Ok(())
}

/// Print the daemon's text skip report
pub async fn show_report(client: &ApiClient, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let report: serde_json::Value = client.get("api/v1/skips/report").await?;
            print_json(&report)?;
        }
        OutputFormat::Table => {
            let report = client.get_text("api/v1/skips/report?format=text").await?;
            print!("{}", report);
        }
    }

    Ok(())
}

/// Re-rank conditions by observed skip rate
pub async fn optimize(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let adjustments: Vec<PriorityAdjustment> = client.post("api/v1/skips/optimize").await?;

    match format {
        OutputFormat::Json => print_json(&adjustments)?,
        OutputFormat::Table => {
            if adjustments.is_empty() {
                print_info("No condition priorities changed");
                return Ok(());
            }
            for adjustment in &adjustments {
                print_success(&format!(
                    "{}: priority {} -> {} (skip rate {})",
                    adjustment.condition,
                    adjustment.old_priority,
                    adjustment.new_priority,
                    format_ratio(adjustment.skip_rate)
                ));
            }
        }
    }

    Ok(())
}
