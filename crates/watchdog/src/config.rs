//! Command line and configuration loading
//!
//! Sources are layered lowest first: optional config file, `WATCHDOG_*`
//! environment variables, then command line flags.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use watchdog_lib::WatchdogConfig;

/// Watch running containers and alert on sustained CPU or memory usage
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "container-watchdog", version, about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "WATCHDOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds between evaluations
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,

    /// CPU usage percentage that triggers a warning
    #[arg(short = 'c', long)]
    pub cpu_threshold: Option<f64>,

    /// Memory usage percentage that triggers a warning
    #[arg(short = 'm', long)]
    pub mem_threshold: Option<f64>,

    /// Report usage of every container on every evaluation
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Skip containers whose name matches this regex
    #[arg(short = 'x', long)]
    pub exclude: Option<String>,

    /// Slack incoming webhook URL
    #[arg(short = 'l', long, env = "SLACK_HOOK")]
    pub slack_hook: Option<String>,

    /// Emoji used as the Slack bot icon
    #[arg(short = 'e', long)]
    pub emoji: Option<String>,

    /// Minimum seconds between repeated Slack reports
    #[arg(short = 'r', long)]
    pub slack_report_rate: Option<u64>,

    /// Port for health and metrics endpoints, 0 disables
    #[arg(long)]
    pub api_port: Option<u16>,
}

/// Load configuration from file, environment and flags
pub fn load(cli: &Cli) -> Result<WatchdogConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }

    builder = builder
        .add_source(
            config::Environment::with_prefix("WATCHDOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("interval_secs", cli.interval.map(|v| v as i64))?
        .set_override_option("cpu_threshold", cli.cpu_threshold)?
        .set_override_option("memory_threshold", cli.mem_threshold)?
        .set_override_option("exclude", cli.exclude.clone())?
        .set_override_option("slack.webhook_url", cli.slack_hook.clone())?
        .set_override_option("slack.emoji", cli.emoji.clone())?
        .set_override_option("slack.report_rate_secs", cli.slack_report_rate.map(|v| v as i64))?
        .set_override_option("api_port", cli.api_port.map(i64::from))?;

    if cli.verbose {
        builder = builder.set_override("verbose", true)?;
    }

    let config: WatchdogConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(config)
}
