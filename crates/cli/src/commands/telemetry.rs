//! Telemetry summary, export and offline report commands

use anyhow::{Context, Result};
use colored::Colorize;
use governor_lib::telemetry::{
    load_metrics, ExportDocument, ExportFormat, MetricsSummary, TestMetrics,
};
use governor_lib::TestStatus;
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, ExportResponse};
use crate::output::{
    color_status, format_ms, format_ratio, format_timestamp, print_heading, print_json,
    print_rows, print_success, OutputFormat,
};

/// Row for the per-test table of an offline report
#[derive(Tabled)]
struct TestRow {
    #[tabled(rename = "Test")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Assertions")]
    assertions: String,
    #[tabled(rename = "Queries")]
    queries: u64,
    #[tabled(rename = "Error")]
    error: String,
}

fn test_row(test: &TestMetrics) -> TestRow {
    TestRow {
        name: test.name.clone(),
        status: color_status(test.status.as_str()),
        duration: format_ms(test.duration_ms),
        assertions: format!("{}/{}", test.assertions.passed, test.assertions.total),
        queries: test.database.queries,
        error: test.error.clone().unwrap_or_default(),
    }
}

/// Tests to list in an offline report, slowest first
fn select_tests(tests: &[TestMetrics], failed_only: bool, limit: usize) -> Vec<&TestMetrics> {
    let mut selected: Vec<&TestMetrics> = tests
        .iter()
        .filter(|t| !failed_only || t.status == TestStatus::Failed)
        .collect();
    selected.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
    selected.truncate(limit);
    selected
}

fn print_summary_table(summary: &MetricsSummary) {
    println!("Total Tests:            {}", summary.total);
    println!("Passed:                 {}", summary.passed.to_string().green());
    println!("Failed:                 {}", summary.failed.to_string().red());
    println!("Skipped:                {}", summary.skipped.to_string().yellow());
    println!("Success Rate:           {}", format_ratio(summary.success_rate));
    println!(
        "Average Duration:       {}",
        format_ms(summary.average_duration_ms)
    );
    println!("Assertions:             {}", summary.total_assertions);
    println!("Queries:                {}", summary.total_queries);

    if !summary.slowest.is_empty() {
        println!();
        println!("{}", "Slowest Tests".bold());
        println!("{}", "-".repeat(50));
        for (rank, test) in summary.slowest.iter().enumerate() {
            println!(
                "{}. {} ({}, {})",
                rank + 1,
                test.name,
                format_ms(test.duration_ms),
                color_status(test.status.as_str())
            );
        }
    }
}

/// Show the daemon's telemetry summary
pub async fn show_summary(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let summary: MetricsSummary = client.get("api/v1/summary").await?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_heading("Test Metrics Summary");
            print_summary_table(&summary);
        }
    }

    Ok(())
}

/// Ask the daemon to write its metrics to disk
pub async fn export(
    client: &ApiClient,
    export_format: ExportFormat,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("api/v1/export?format={}", export_format.as_str());
    let result: ExportResponse = client.post(&path).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Exported {} records as {} to {}",
                result.records, result.format, result.path
            ));
        }
    }

    Ok(())
}

/// Summarize a JSON export without a running daemon
pub async fn report(
    path: &Path,
    failed_only: bool,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let document: ExportDocument = load_metrics(path)
        .await
        .with_context(|| format!("Failed to load export {}", path.display()))?;

    match format {
        OutputFormat::Json => print_json(&document.summary)?,
        OutputFormat::Table => {
            print_heading(&format!("Test Report ({})", document.environment));
            println!(
                "Exported:               {}",
                format_timestamp(&document.exported_at).dimmed()
            );
            println!();
            print_summary_table(&document.summary);
            println!();

            let rows: Vec<TestRow> = select_tests(&document.tests, failed_only, limit)
                .into_iter()
                .map(test_row)
                .collect();
            let empty = if failed_only {
                "No failed tests"
            } else {
                "No tests recorded"
            };
            print_rows(&rows, empty);
        }
    }

    Ok(())
}
