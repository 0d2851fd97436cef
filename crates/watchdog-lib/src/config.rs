//! Watchdog configuration
//!
//! Loaded by the binary from a file, the environment and CLI flags. Values
//! are validated once at startup; a bad value is fatal before any loop runs.

use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds between evaluation cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Warn when smoothed CPU usage reaches this percentage
    #[serde(default = "default_threshold")]
    pub cpu_threshold: f64,

    /// Warn when memory usage reaches this percentage of the limit
    #[serde(default = "default_threshold")]
    pub memory_threshold: f64,

    /// Emit an `info` event for every entity on every cycle
    #[serde(default)]
    pub verbose: bool,

    /// Ignore containers whose display name matches this regex
    #[serde(default)]
    pub exclude: Option<String>,

    /// Upper bound on a single stats fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Forget state of containers not listed for this many seconds, 0 = never
    #[serde(default)]
    pub state_retention_secs: u64,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Docker data root for container names
    #[serde(default = "default_docker_root")]
    pub docker_root: Option<PathBuf>,

    /// Port for /healthz, /readyz and /metrics; 0 disables the server
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub console: ConsoleConfig,

    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between console lines sharing a throttle key, 0 = unthrottled
    #[serde(default)]
    pub throttle_secs: u64,

    /// Only print events carrying one of these tags; unset prints everything
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Incoming webhook URL; the channel is disabled when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_emoji")]
    pub emoji: String,

    /// Seconds between Slack reports sharing a throttle key, 0 = unthrottled
    #[serde(default)]
    pub report_rate_secs: u64,

    /// Only post events carrying one of these tags; unset posts alerts only,
    /// an empty list posts everything
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

fn default_interval() -> u64 {
    10
}

fn default_threshold() -> f64 {
    90.0
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_docker_root() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/docker"))
}

fn default_api_port() -> u16 {
    9102
}

fn default_true() -> bool {
    true
}

fn default_emoji() -> String {
    crate::notify::DEFAULT_EMOJI.to_string()
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            cpu_threshold: default_threshold(),
            memory_threshold: default_threshold(),
            verbose: false,
            exclude: None,
            fetch_timeout_secs: default_fetch_timeout(),
            state_retention_secs: 0,
            cgroup_root: default_cgroup_root(),
            proc_root: default_proc_root(),
            docker_root: default_docker_root(),
            api_port: default_api_port(),
            console: ConsoleConfig::default(),
            slack: SlackConfig::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_secs: 0,
            tags: None,
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            emoji: default_emoji(),
            report_rate_secs: 0,
            tags: None,
        }
    }
}

impl WatchdogConfig {
    /// Reject values the loops cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config("interval must be at least 1 second".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::Config("fetch timeout must be at least 1 second".into()));
        }
        if !(self.cpu_threshold.is_finite() && self.cpu_threshold > 0.0) {
            return Err(Error::Config(format!(
                "cpu threshold must be a positive percentage, got {}",
                self.cpu_threshold
            )));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 100.0) {
            return Err(Error::Config(format!(
                "memory threshold must be within (0, 100], got {}",
                self.memory_threshold
            )));
        }
        if let Some(url) = &self.slack.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!("slack webhook is not an http(s) URL: {}", url)));
            }
        }
        self.exclusion_pattern()?;
        Ok(())
    }

    /// Compiled exclusion regex, `None` when no pattern is set
    pub fn exclusion_pattern(&self) -> Result<Option<Regex>> {
        match self.exclude.as_deref().filter(|p| !p.is_empty()) {
            Some(pattern) => Ok(Some(Regex::new(pattern)?)),
            None => Ok(None),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn state_retention(&self) -> Option<Duration> {
        (self.state_retention_secs > 0).then(|| Duration::from_secs(self.state_retention_secs))
    }
}
