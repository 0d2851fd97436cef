//! Container watchdog
//!
//! Samples CPU and memory of every running container, smooths the values
//! and alerts on the console or Slack when a threshold is crossed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchdog_lib::{
    collector::{detect_cgroup_version, CgroupRuntime, CgroupVersion},
    health::{components, HealthRegistry},
    notify::{ConsoleChannel, Notifier, SlackChannel, TagFilter},
    observability::{StructuredLogger, WatchdogMetrics},
    SamplingOrchestratorBuilder, WatchdogConfig,
};

mod api;
mod config;

const WATCHDOG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let config = config::load(&cli)?;
    config.validate().context("Invalid configuration")?;

    match detect_cgroup_version(&config.cgroup_root).await {
        CgroupVersion::V2 => {}
        CgroupVersion::V1 => bail!(
            "cgroup v1 hierarchy found at {}, only cgroup v2 is supported",
            config.cgroup_root.display()
        ),
        CgroupVersion::Unknown => warn!(
            cgroup_root = %config.cgroup_root.display(),
            "Could not detect cgroup version, assuming v2"
        ),
    }

    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let logger = StructuredLogger::new(host);

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::EVALUATOR).await;
    health_registry.register(components::NOTIFIER).await;

    let metrics = WatchdogMetrics::new();

    let notifier = Arc::new(build_notifier(&config)?);
    logger.log_startup(
        WATCHDOG_VERSION,
        config.interval_secs,
        config.cpu_threshold,
        config.memory_threshold,
        notifier.channel_count(),
    );

    let mut runtime = CgroupRuntime::new(&config.cgroup_root).with_proc_path(&config.proc_root);
    if let Some(docker_root) = &config.docker_root {
        runtime = runtime.with_docker_root(docker_root);
    }

    let orchestrator = SamplingOrchestratorBuilder::from_config(&config)?
        .runtime(Arc::new(runtime))
        .notifier(notifier)
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start health and metrics server
    if config.api_port != 0 {
        let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
        let port = config.api_port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                warn!(error = %e, "API server stopped");
            }
        });
    }

    let orchestrator_handle = tokio::spawn(orchestrator.run(shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = orchestrator_handle.await {
        warn!(error = %e, "Orchestrator task ended abnormally");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Console always, Slack when a webhook is configured
fn build_notifier(config: &WatchdogConfig) -> Result<Notifier> {
    let mut notifier = Notifier::new();

    if config.console.enabled {
        let mut console = ConsoleChannel::new();
        if config.console.throttle_secs > 0 {
            console = console.with_throttle(Duration::from_secs(config.console.throttle_secs));
        }
        if let Some(tags) = &config.console.tags {
            console = console.with_filter(TagFilter::new(tags.iter().cloned()));
        }
        notifier.add_channel(Arc::new(console));
    }

    if let Some(url) = &config.slack.webhook_url {
        let mut slack = SlackChannel::new(url.clone())
            .context("Failed to create Slack channel")?
            .with_emoji(config.slack.emoji.clone());
        if config.slack.report_rate_secs > 0 {
            slack = slack.with_report_rate(Duration::from_secs(config.slack.report_rate_secs));
        }
        // An empty list lifts the default alerts-only filter
        if let Some(tags) = &config.slack.tags {
            let filter = (!tags.is_empty()).then(|| TagFilter::new(tags.iter().cloned()));
            slack = slack.with_filter(filter);
        }
        notifier.add_channel(Arc::new(slack));
        info!("Slack notifications enabled");
    }

    Ok(notifier)
}
