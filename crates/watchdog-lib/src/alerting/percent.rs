//! Percentage calculators
//!
//! Turns raw runtime counters into percentages. CPU is delta based and needs
//! the previous cumulative counters; memory is a point-in-time ratio.

use crate::error::{Error, Result};
use crate::models::{CpuCounters, MemoryCounters};

/// Previous cumulative CPU counters kept between samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub busy_time: u64,
    pub total_time: u64,
}

impl From<&CpuCounters> for CpuSnapshot {
    fn from(counters: &CpuCounters) -> Self {
        Self {
            busy_time: counters.busy_time,
            total_time: counters.total_time,
        }
    }
}

/// CPU usage as a percentage of one processor
///
/// Ranges over `[0, 100 * processors]`. A zero delta on either counter,
/// including a counter that went backwards, is reported as 0.
pub fn cpu_percent(entity_id: &str, current: &CpuCounters, previous: &CpuSnapshot) -> Result<f64> {
    let processors = match current.per_cpu.as_deref() {
        Some(per_cpu) if !per_cpu.is_empty() => per_cpu.len(),
        _ => {
            return Err(Error::data_unavailable(
                entity_id,
                "per-processor counters missing",
            ))
        }
    };

    let busy_delta = current.busy_time.saturating_sub(previous.busy_time);
    let total_delta = current.total_time.saturating_sub(previous.total_time);

    if busy_delta == 0 || total_delta == 0 {
        return Ok(0.0);
    }

    Ok((busy_delta as f64 / total_delta as f64) * processors as f64 * 100.0)
}

/// Memory usage as a percentage of the limit, capped at 100
pub fn memory_percent(memory: &MemoryCounters) -> f64 {
    match memory.limit {
        Some(limit) if limit > 0 => (memory.usage as f64 / limit as f64 * 100.0).min(100.0),
        _ => 0.0,
    }
}
