//! Test Governor CLI
//!
//! A command-line tool for inspecting and nudging a running governor
//! daemon, and for summarizing exported test metrics offline.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{parallelism, pool, skips, status, telemetry};
use governor_lib::telemetry::ExportFormat;
use std::path::PathBuf;

/// Test Governor CLI
#[derive(Parser)]
#[command(name = "govctl")]
#[command(author, version, about = "CLI for the Test Governor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via GOVCTL_API_URL env var)
    #[arg(long, env = "GOVCTL_API_URL")]
    pub api_url: Option<String>,

    /// Config file (defaults to ~/.config/govctl/config.json)
    #[arg(long, env = "GOVCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a condensed view of every component
    Status,

    /// Show component health and readiness
    Health,

    /// Connection pool optimizer
    #[command(subcommand)]
    Pool(PoolCommands),

    /// Parallelism controller
    #[command(subcommand)]
    Parallelism(ParallelismCommands),

    /// Skip governor
    #[command(subcommand)]
    Skips(SkipCommands),

    /// Show the telemetry summary
    Summary,

    /// Write collected metrics to the daemon's metrics directory
    Export {
        /// Export format (json, csv, summary)
        #[arg(long = "as", default_value = "json")]
        export_format: String,
    },

    /// Summarize a JSON metrics export without a daemon
    Report {
        /// Path to a test-metrics-*.json file
        path: PathBuf,

        /// List only failed tests
        #[arg(long)]
        failed: bool,

        /// Maximum tests to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum PoolCommands {
    /// Show live pool statistics and configuration
    Show,
    /// Show recorded pool decisions
    History,
    /// Run one pool decision now
    Optimize,
}

#[derive(Subcommand)]
pub enum ParallelismCommands {
    /// Show the current ceiling and execution counters
    Show,
    /// Show recorded ceiling decisions
    History,
    /// Run one ceiling decision now
    Optimize,
}

#[derive(Subcommand)]
pub enum SkipCommands {
    /// Show skip statistics per condition
    Stats,
    /// Show the latest skip evaluations
    History {
        /// Number of evaluations to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the skip report
    Report,
    /// Re-rank conditions by observed skip rate
    Optimize,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Store defaults in the config file
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format (table, json)
        #[arg(long)]
        default_format: Option<String>,
    },
}

/// Run the selected command; `Ok(false)` means a check failed
async fn run(cli: Cli) -> Result<bool> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config::Config::config_path()?,
    };
    let config = config::Config::load_from(&config_path)?;
    let format = config.resolve_format(cli.format);
    let api_url = config.resolve_api_url(cli.api_url.as_deref());

    let command = match cli.command {
        Commands::Report {
            path,
            failed,
            limit,
        } => {
            telemetry::report(&path, failed, limit, format).await?;
            return Ok(true);
        }
        Commands::Config(config_cmd) => {
            match config_cmd {
                ConfigCommands::Show => {
                    output::print_info(&format!("Config file: {}", config_path.display()));
                    println!("api_url:        {}", api_url);
                    println!("default_format: {:?}", format);
                }
                ConfigCommands::Set {
                    api_url,
                    default_format,
                } => {
                    if let Some(name) = &default_format {
                        if output::OutputFormat::from_name(name).is_none() {
                            anyhow::bail!("Unknown output format: {}", name);
                        }
                    }
                    let mut updated = config.clone();
                    if api_url.is_some() {
                        updated.api_url = api_url;
                    }
                    if default_format.is_some() {
                        updated.default_format = default_format;
                    }
                    updated.save_to(&config_path)?;
                    output::print_success(&format!("Saved {}", config_path.display()));
                }
            }
            return Ok(true);
        }
        command => command,
    };

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match command {
        Commands::Status => status::show_status(&client, format).await?,
        Commands::Health => return status::show_health(&client, format).await,
        Commands::Pool(pool_cmd) => match pool_cmd {
            PoolCommands::Show => pool::show_pool(&client, format).await?,
            PoolCommands::History => pool::show_history(&client, format).await?,
            PoolCommands::Optimize => pool::optimize(&client, format).await?,
        },
        Commands::Parallelism(parallelism_cmd) => match parallelism_cmd {
            ParallelismCommands::Show => parallelism::show_parallelism(&client, format).await?,
            ParallelismCommands::History => parallelism::show_history(&client, format).await?,
            ParallelismCommands::Optimize => parallelism::optimize(&client, format).await?,
        },
        Commands::Skips(skip_cmd) => match skip_cmd {
            SkipCommands::Stats => skips::show_statistics(&client, format).await?,
            SkipCommands::History { limit } => skips::show_history(&client, limit, format).await?,
            SkipCommands::Report => skips::show_report(&client, format).await?,
            SkipCommands::Optimize => skips::optimize(&client, format).await?,
        },
        Commands::Summary => telemetry::show_summary(&client, format).await?,
        Commands::Export { export_format } => {
            let export_format: ExportFormat = export_format.parse()?;
            telemetry::export(&client, export_format, format).await?
        }
        Commands::Report { .. } | Commands::Config(_) => {}
    }

    Ok(true)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
