//! Daemon status and health commands

use anyhow::Result;
use colored::Colorize;
use governor_lib::health::{HealthResponse, ReadinessResponse};
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, StatusResponse};
use crate::output::{color_status, print_heading, print_json, print_rows, print_warning, OutputFormat};

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct HealthReport {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

/// Show a condensed view of every component
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: StatusResponse = client.get("api/v1/status").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_heading("Governor Status");
            println!("Version:                {}", status.version);
            println!("Environment:            {}", status.environment.cyan());
            println!("Storage Engine:         {}", status.storage_engine);
            let ready = if status.ready { "ready" } else { "not ready" };
            println!("Readiness:              {}", color_status(ready));
            println!();
            println!("{}", "Execution".bold());
            println!("{}", "-".repeat(50));
            println!("Parallelism Ceiling:    {}", status.parallelism_ceiling);
            println!("Active Tests:           {}", status.active_tests);
            println!("Tests Recorded:         {}", status.tests_recorded);
            println!("Tests Skipped:          {}", status.tests_skipped);
            println!("Skip Conditions:        {}", status.skip_conditions);
            match status.max_connections {
                Some(max) => println!("Max Connections:        {}", max),
                None => println!("Max Connections:        {}", "unavailable".red()),
            }
        }
    }

    Ok(())
}

/// Show component health and readiness
///
/// Returns whether the daemon is both operational and ready.
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<bool> {
    let health: HealthResponse = client.probe("healthz").await?;
    let readiness: ReadinessResponse = client.probe("readyz").await?;
    let serving = health.status.is_operational() && readiness.ready;

    match format {
        OutputFormat::Json => print_json(&HealthReport { health, readiness })?,
        OutputFormat::Table => {
            print_heading("Governor Health");
            println!(
                "Overall:                {}",
                color_status(health.status.as_str())
            );
            let ready = if readiness.ready { "ready" } else { "not ready" };
            println!("Readiness:              {}", color_status(ready));
            if let Some(reason) = &readiness.reason {
                print_warning(reason);
            }
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status.as_str()),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(&rows, "No components registered");
        }
    }

    Ok(serving)
}
