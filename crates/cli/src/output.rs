//! Terminal rendering helpers shared by the commands

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// How command results are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables and key/value lines
    #[default]
    Table,
    /// The daemon's JSON, pretty-printed
    Json,
}

impl OutputFormat {
    /// Parse a format name stored in the config file
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table, or a notice when empty
pub fn print_rows<T: Tabled>(rows: &[T], empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Print a section heading
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

fn marked(mark: ColoredString, message: &str) -> String {
    format!("{} {}", mark.bold(), message)
}

pub fn print_success(message: &str) {
    println!("{}", marked("✓".green(), message));
}

/// Errors go to stderr so `--format json` output stays parseable
pub fn print_error(message: &str) {
    eprintln!("{}", marked("✗".red(), message));
}

pub fn print_warning(message: &str) {
    println!("{}", marked("⚠".yellow(), message));
}

pub fn print_info(message: &str) {
    println!("{}", marked("ℹ".blue(), message));
}

/// Format a 0-1 ratio as a percentage
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Format milliseconds, switching to seconds past one second
pub fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.1}ms", ms)
    }
}

/// Format a timestamp for table cells
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Color a utilization ratio against the governor's thresholds
pub fn color_ratio(ratio: f64) -> String {
    let formatted = format_ratio(ratio);
    if ratio > 0.8 {
        formatted.red().to_string()
    } else if ratio > 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Color a test, component or readiness state
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "passed" | "healthy" | "ready" => status.green().to_string(),
        "skipped" | "degraded" => status.yellow().to_string(),
        "failed" | "unhealthy" | "not ready" => status.red().to_string(),
        "running" => status.blue().to_string(),
        _ => status.to_string(),
    }
}

/// Color an optimization reason; anything but "stable" changed a value
pub fn color_reason(reason: &str) -> String {
    if reason == "stable" {
        reason.dimmed().to_string()
    } else {
        reason.cyan().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(0.0), "0.0%");
        assert_eq!(format_ratio(0.456), "45.6%");
        assert_eq!(format_ratio(1.0), "100.0%");
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(12.34), "12.3ms");
        assert_eq!(format_ms(1500.0), "1.50s");
    }

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-09 14:05:00");
    }

    #[test]
    fn test_output_format_from_name() {
        assert_eq!(OutputFormat::from_name("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_name("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_name("yaml"), None);
    }

    #[test]
    fn test_color_status_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_status("passed"), "passed");
        assert_eq!(color_reason("stable"), "stable");
        assert_eq!(color_ratio(0.9), "90.0%");
    }
}
