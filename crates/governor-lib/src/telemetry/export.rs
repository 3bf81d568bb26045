//! Export formats for the telemetry log

use super::{MetricsSummary, TestMetrics};
use crate::error::{GovernorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

pub const CSV_HEADER: &str = "name,status,duration_ms,database_engine,parallel,\
assertions_total,assertions_passed,assertions_failed,queries,query_time_ms,\
records_created,records_updated,records_deleted,error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    /// Human-readable summary text
    Summary,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Summary => "summary",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Summary => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "summary" | "text" | "txt" => Ok(ExportFormat::Summary),
            other => Err(GovernorError::Export(format!("unknown format: {}", other))),
        }
    }
}

/// On-disk JSON layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub environment: String,
    pub summary: MetricsSummary,
    pub tests: Vec<TestMetrics>,
}

fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv(tests: &[TestMetrics]) -> String {
    let mut out = String::with_capacity(64 * (tests.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');

    for test in tests {
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{:.3},{},{},{},{},{},{},{:.3},{},{},{},{}",
            csv_field(&test.name),
            test.status,
            test.duration_ms,
            test.database_engine,
            test.parallel,
            test.assertions.total,
            test.assertions.passed,
            test.assertions.failed,
            test.database.queries,
            test.database.query_time_ms,
            test.database.records_created,
            test.database.records_updated,
            test.database.records_deleted,
            csv_field(test.error.as_deref().unwrap_or("")),
        );
    }
    out
}

pub(crate) fn render(document: &ExportDocument, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(document)?),
        ExportFormat::Csv => Ok(render_csv(&document.tests)),
        ExportFormat::Summary => Ok(document.summary.to_string()),
    }
}

/// Read a JSON export back
pub async fn load_metrics(path: &Path) -> Result<ExportDocument> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| GovernorError::Export(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&raw)?)
}
