//! Core data models for the watchdog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Live workload as reported by the container runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: String,
    /// Human labels in order of preference
    pub name_candidates: Vec<String>,
}

/// A workload tracked by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub id: String,
    pub display_name: String,
    /// Computed once, on first observation
    pub excluded: bool,
}

/// Cumulative CPU counters, all in nanoseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuCounters {
    /// CPU time consumed by the workload
    pub busy_time: u64,
    /// CPU time elapsed on the host across all processors
    pub total_time: u64,
    /// Per-processor counters; only the length is used
    pub per_cpu: Option<Vec<u64>>,
}

/// Point-in-time memory reading in bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCounters {
    pub usage: u64,
    pub limit: Option<u64>,
}

/// Raw stats returned by a single fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStats {
    pub cpu: CpuCounters,
    pub memory: MemoryCounters,
}

/// Metric kinds evaluated per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Cpu, MetricKind::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }

    /// Label used in rendered messages
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "Memory",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Restored,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Restored => "restored",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert produced by the evaluation cycle and handed to delivery channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub entity_id: String,
    pub display_name: String,
    pub metric: MetricKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    /// Consecutive breaching cycles (the count that ended, for `restored`)
    pub consecutive_breaches: u32,
    /// How long the metric has been breaching, for `warning`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breached_for: Option<Duration>,
    pub emitted_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

impl AlertEvent {
    pub fn new(
        entity: &MonitoredEntity,
        metric: MetricKind,
        severity: Severity,
        value: f64,
        threshold: f64,
    ) -> Self {
        let tags = [severity.as_str(), metric.as_str()]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            entity_id: entity.id.clone(),
            display_name: entity.display_name.clone(),
            metric,
            severity,
            value,
            threshold,
            consecutive_breaches: 0,
            breached_for: None,
            emitted_at: Utc::now(),
            tags,
        }
    }

    pub fn with_breaches(mut self, consecutive: u32, breached_for: Option<Duration>) -> Self {
        self.consecutive_breaches = consecutive;
        self.breached_for = breached_for;
        self
    }

    /// Key under which channels rate-limit this event
    pub fn throttle_key(&self) -> String {
        format!("{}:{}", self.metric, self.severity)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}
