//! Per-entity metric state
//!
//! State is keyed by entity id. Every entity sits behind its own async mutex
//! so updates to a single entity never interleave, while different entities
//! are sampled and evaluated independently.

use crate::alerting::{CpuSnapshot, RollingWindow};
use crate::error::{Error, Result};
use crate::models::{EntityDescriptor, MetricKind, MonitoredEntity};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// State for one (entity, metric) pair
#[derive(Debug, Clone, Default)]
pub struct MetricSeries {
    window: RollingWindow,
    latest: Option<f64>,
    /// Consecutive breaching evaluations
    pub breaches: u32,
}

impl MetricSeries {
    pub fn record(&mut self, timestamp: Instant, value: f64) {
        self.window.record(timestamp, value);
        self.latest = Some(value);
    }

    /// Trailing mean over the rolling window
    pub fn average(&self) -> Option<f64> {
        self.window.average()
    }

    /// Most recent instantaneous value
    pub fn latest(&self) -> Option<f64> {
        self.latest
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }
}

/// Everything tracked for one entity
#[derive(Debug, Clone)]
pub struct EntityState {
    pub entity: MonitoredEntity,
    /// Cumulative counters from the previous CPU sample
    pub previous_cpu: CpuSnapshot,
    pub cpu: MetricSeries,
    pub memory: MetricSeries,
    /// Sampling cycle in which the entity was last listed as live
    pub last_seen_cycle: u64,
    /// Sampling cycle of the last successful fetch
    pub last_sampled_cycle: u64,
    pub last_seen_at: Option<Instant>,
}

impl EntityState {
    pub fn new(entity: MonitoredEntity) -> Self {
        Self {
            entity,
            previous_cpu: CpuSnapshot::default(),
            cpu: MetricSeries::default(),
            memory: MetricSeries::default(),
            last_seen_cycle: 0,
            last_sampled_cycle: 0,
            last_seen_at: None,
        }
    }

    pub fn series(&self, metric: MetricKind) -> &MetricSeries {
        match metric {
            MetricKind::Cpu => &self.cpu,
            MetricKind::Memory => &self.memory,
        }
    }

    pub fn series_mut(&mut self, metric: MetricKind) -> &mut MetricSeries {
        match metric {
            MetricKind::Cpu => &mut self.cpu,
            MetricKind::Memory => &mut self.memory,
        }
    }

    /// Value compared against the threshold
    ///
    /// CPU uses the smoothed window average, memory the instantaneous value.
    pub fn evaluation_value(&self, metric: MetricKind) -> Result<f64> {
        let series = self.series(metric);
        let value = match metric {
            MetricKind::Cpu => series.average(),
            MetricKind::Memory => series.latest(),
        };
        value.ok_or_else(|| Error::InsufficientData {
            entity_id: self.entity.id.clone(),
            metric,
        })
    }

    /// Whether at least one sample has been recorded for `metric`
    pub fn has_samples(&self, metric: MetricKind) -> bool {
        !self.series(metric).window().is_empty()
    }
}

/// Handle to a single entity's state
pub type EntityHandle = Arc<Mutex<EntityState>>;

/// State store keyed by entity id
#[derive(Debug, Default)]
pub struct StateStore {
    entities: DashMap<String, EntityHandle>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity, creating its state on first observation
    ///
    /// `register` runs only for unseen ids, so naming and exclusion are
    /// computed once per entity.
    pub fn observe<F>(&self, descriptor: &EntityDescriptor, register: F) -> EntityHandle
    where
        F: FnOnce(&EntityDescriptor) -> MonitoredEntity,
    {
        self.entities
            .entry(descriptor.id.clone())
            .or_insert_with(|| {
                let entity = register(descriptor);
                debug!(
                    entity_id = %entity.id,
                    display_name = %entity.display_name,
                    excluded = entity.excluded,
                    "Tracking new entity"
                );
                Arc::new(Mutex::new(EntityState::new(entity)))
            })
            .clone()
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityHandle> {
        self.entities.get(entity_id).map(|r| r.value().clone())
    }

    /// Snapshot of all handles; no map guard is held afterwards
    pub fn handles(&self) -> Vec<EntityHandle> {
        self.entities.iter().map(|r| r.value().clone()).collect()
    }

    /// Drop an entity's state; only the host process decides when
    pub fn remove(&self, entity_id: &str) -> Option<EntityHandle> {
        self.entities.remove(entity_id).map(|(_, v)| v)
    }

    /// Drop entities not listed for longer than `retention`
    ///
    /// Returns the evicted ids. Entities never listed are kept.
    pub async fn evict_unseen(&self, now: Instant, retention: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        for handle in self.handles() {
            let (id, stale) = {
                let state = handle.lock().await;
                let stale = state
                    .last_seen_at
                    .is_some_and(|seen| now.saturating_duration_since(seen) > retention);
                (state.entity.id.clone(), stale)
            };
            if stale && self.remove(&id).is_some() {
                evicted.push(id);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Record a sample into an entity's rolling window
    pub async fn record(
        &self,
        entity_id: &str,
        metric: MetricKind,
        timestamp: Instant,
        value: f64,
    ) -> Result<()> {
        let handle = self
            .get(entity_id)
            .ok_or_else(|| Error::data_unavailable(entity_id, "entity not tracked"))?;
        handle
            .lock()
            .await
            .series_mut(metric)
            .record(timestamp, value);
        Ok(())
    }

    /// Trailing mean of an entity's rolling window
    pub async fn average(&self, entity_id: &str, metric: MetricKind) -> Result<f64> {
        let insufficient = || Error::InsufficientData {
            entity_id: entity_id.to_string(),
            metric,
        };
        let handle = self.get(entity_id).ok_or_else(insufficient)?;
        let state = handle.lock().await;
        state.series(metric).average().ok_or_else(insufficient)
    }
}
