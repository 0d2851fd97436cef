//! Sampling orchestrator
//!
//! Drives two periodic activities from a single task:
//! - a fast sampling cycle that fetches raw stats for every live container
//!   and records percentages into per-entity state
//! - a slower evaluation cycle that runs the threshold state machine and
//!   hands the resulting alerts to the notifier

use crate::alerting::{
    cpu_percent, memory_percent, CpuSnapshot, GracePeriod, ThresholdMonitor, Transition,
};
use crate::collector::{display_name, ContainerRuntime};
use crate::config::WatchdogConfig;
use crate::error::{Error, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{AlertEvent, EntityDescriptor, MetricKind, MonitoredEntity, RawStats, Severity};
use crate::notify::Notifier;
use crate::observability::{StructuredLogger, WatchdogMetrics};
use crate::store::{EntityHandle, StateStore};
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Cadence of the sampling cycle
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for the orchestrator loops
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub sample_interval: Duration,
    /// Evaluation cadence (default: 10 seconds)
    pub evaluation_interval: Duration,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub verbose: bool,
    /// Upper bound on a single stats fetch (default: 5 seconds)
    pub fetch_timeout: Duration,
    /// Forget entities not listed for this long; `None` keeps them forever
    pub state_retention: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sample_interval: SAMPLE_INTERVAL,
            evaluation_interval: Duration::from_secs(10),
            cpu_threshold: 90.0,
            memory_threshold: 90.0,
            verbose: false,
            fetch_timeout: Duration::from_secs(5),
            state_retention: None,
        }
    }
}

impl From<&WatchdogConfig> for OrchestratorConfig {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            sample_interval: SAMPLE_INTERVAL,
            evaluation_interval: config.interval(),
            cpu_threshold: config.cpu_threshold,
            memory_threshold: config.memory_threshold,
            verbose: config.verbose,
            fetch_timeout: config.fetch_timeout(),
            state_retention: config.state_retention(),
        }
    }
}

/// Outcome of one sampling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleReport {
    pub listed: usize,
    pub excluded: usize,
    pub sampled: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Owns per-entity state and runs the sampling and evaluation cycles
pub struct SamplingOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    notifier: Arc<Notifier>,
    store: StateStore,
    config: OrchestratorConfig,
    exclude: Option<Regex>,
    cpu_monitor: ThresholdMonitor,
    memory_monitor: ThresholdMonitor,
    grace: GracePeriod,
    /// Number of successful listings so far
    cycle: u64,
    /// Value of `cycle` at the previous evaluation
    evaluated_through: u64,
    metrics: WatchdogMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl SamplingOrchestrator {
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Whether alert evaluation is still suppressed at `now`
    pub fn in_grace_period(&self, now: Instant) -> bool {
        self.grace.is_active(now)
    }

    /// Run both loops until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            sample_interval_secs = self.config.sample_interval.as_secs(),
            evaluation_interval_secs = self.config.evaluation_interval.as_secs(),
            "Starting sampling orchestrator"
        );

        let mut sample_ticker = interval(self.config.sample_interval);
        sample_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let first_evaluation = tokio::time::Instant::now() + self.config.evaluation_interval;
        let mut evaluation_ticker = interval_at(first_evaluation, self.config.evaluation_interval);
        evaluation_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Some(health) = &self.health {
            health.set_started(true).await;
            health.set_warming_up(self.in_grace_period(Instant::now())).await;
        }

        loop {
            tokio::select! {
                _ = sample_ticker.tick() => {
                    self.sample_cycle(Instant::now()).await;
                }
                _ = evaluation_ticker.tick() => {
                    let now = Instant::now();
                    self.evaluate_cycle(now).await;
                    if let Some(health) = &self.health {
                        health.set_warming_up(self.in_grace_period(now)).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling orchestrator");
                    break;
                }
            }
        }

        if let Some(health) = &self.health {
            health.set_started(false).await;
        }
    }

    /// Fetch stats for every live, non-excluded entity and record them
    pub async fn sample_cycle(&mut self, now: Instant) -> SampleReport {
        let started = Instant::now();
        let mut report = SampleReport::default();

        let entities = match self.runtime.list_live_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(error = %e, "Failed to list containers, skipping sampling cycle");
                self.set_health(components::SAMPLER, Some(e.to_string()), true).await;
                return report;
            }
        };

        self.cycle += 1;
        report.listed = entities.len();

        let mut fetches = JoinSet::new();
        for descriptor in &entities {
            let handle = self
                .store
                .observe(descriptor, |d| register(d, self.exclude.as_ref()));

            let excluded = {
                let mut state = handle.lock().await;
                state.last_seen_cycle = self.cycle;
                state.last_seen_at = Some(now);
                state.entity.excluded
            };
            if excluded {
                report.excluded += 1;
                continue;
            }

            let runtime = Arc::clone(&self.runtime);
            let timeout = self.config.fetch_timeout;
            let entity_id = descriptor.id.clone();
            fetches.spawn(async move {
                let result = match tokio::time::timeout(timeout, runtime.fetch_stats(&entity_id)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::data_unavailable(
                        &entity_id,
                        format!("fetch timed out after {}ms", timeout.as_millis()),
                    )),
                };
                (entity_id, handle, result)
            });
        }

        while let Some(joined) = fetches.join_next().await {
            let (entity_id, handle, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Stats fetch task failed");
                    self.metrics.inc_fetch_errors();
                    report.failed += 1;
                    continue;
                }
            };

            match apply_stats(&handle, result, self.cycle, now).await {
                Ok(()) => report.sampled += 1,
                Err(e) => {
                    debug!(entity_id = %entity_id, error = %e, "Skipping entity this cycle");
                    self.metrics.inc_fetch_errors();
                    report.failed += 1;
                }
            }
        }

        if let Some(retention) = self.config.state_retention {
            let evicted = self.store.evict_unseen(now, retention).await;
            if !evicted.is_empty() {
                debug!(count = evicted.len(), ids = ?evicted, "Evicted state of vanished containers");
            }
            report.evicted = evicted.len();
        }

        self.metrics
            .observe_sampling_latency(started.elapsed().as_secs_f64());
        self.metrics
            .set_entities_monitored((report.listed - report.excluded) as i64);

        let problem = (report.failed > 0).then(|| {
            format!(
                "{} of {} fetches failed",
                report.failed,
                report.listed - report.excluded
            )
        });
        self.set_health(components::SAMPLER, problem, false).await;

        report
    }

    /// Run the threshold state machine for every live entity and dispatch alerts
    ///
    /// Returns every event produced this cycle, including `info` reports.
    pub async fn evaluate_cycle(&mut self, now: Instant) -> Vec<AlertEvent> {
        let in_grace = self.in_grace_period(now);
        let mut events = Vec::new();
        let mut defects = 0usize;

        for handle in self.store.handles() {
            let mut state = handle.lock().await;
            if state.entity.excluded || state.last_seen_cycle != self.cycle {
                continue;
            }
            if state.last_sampled_cycle <= self.evaluated_through {
                debug!(
                    entity_id = %state.entity.id,
                    last_sampled_cycle = state.last_sampled_cycle,
                    "No fresh sample since last evaluation, skipping"
                );
                continue;
            }

            for metric in MetricKind::ALL {
                if !state.has_samples(metric) {
                    continue;
                }

                let value = match state.evaluation_value(metric) {
                    Ok(value) => value,
                    Err(e) => {
                        error!(entity_id = %state.entity.id, metric = %metric, error = %e, "Evaluated metric without data");
                        self.metrics.inc_evaluation_errors();
                        defects += 1;
                        continue;
                    }
                };

                let monitor = self.monitor(metric);
                if self.config.verbose {
                    events.push(AlertEvent::new(
                        &state.entity,
                        metric,
                        Severity::Info,
                        value,
                        monitor.threshold(),
                    ));
                }

                if in_grace {
                    continue;
                }

                let transition = monitor.evaluate(&mut state.series_mut(metric).breaches, value);
                let event = match transition {
                    Some(Transition::Warning { consecutive }) => AlertEvent::new(
                        &state.entity,
                        metric,
                        Severity::Warning,
                        value,
                        monitor.threshold(),
                    )
                    .with_breaches(
                        consecutive,
                        Some(self.config.evaluation_interval * consecutive),
                    ),
                    Some(Transition::Restored { after }) => AlertEvent::new(
                        &state.entity,
                        metric,
                        Severity::Restored,
                        value,
                        monitor.threshold(),
                    )
                    .with_breaches(after, None),
                    None => continue,
                };
                events.push(event);
            }
        }

        self.evaluated_through = self.cycle;

        let problem = (defects > 0).then(|| format!("{} metrics evaluated without data", defects));
        self.set_health(components::EVALUATOR, problem, false).await;

        let mut failed = 0usize;
        for event in &events {
            self.logger.log_alert(event);
            self.metrics.inc_alerts_emitted(event);
            failed += self.notifier.dispatch(event, now).await.failed;
        }

        let problem = (failed > 0).then(|| format!("{} deliveries failed", failed));
        self.set_health(components::NOTIFIER, problem, false).await;

        events
    }

    fn monitor(&self, metric: MetricKind) -> ThresholdMonitor {
        match metric {
            MetricKind::Cpu => self.cpu_monitor,
            MetricKind::Memory => self.memory_monitor,
        }
    }

    async fn set_health(&self, component: &str, problem: Option<String>, fatal: bool) {
        let Some(health) = &self.health else {
            return;
        };
        match problem {
            None => health.set_healthy(component).await,
            Some(message) if fatal => health.set_unhealthy(component, message).await,
            Some(message) => health.set_degraded(component, message).await,
        }
    }
}

/// Name and exclusion flag for a newly observed entity
fn register(descriptor: &EntityDescriptor, exclude: Option<&Regex>) -> MonitoredEntity {
    let display_name = display_name(&descriptor.name_candidates);
    let excluded = exclude.is_some_and(|pattern| pattern.is_match(&display_name));
    if excluded {
        info!(entity_id = %descriptor.id, display_name = %display_name, "Excluding container");
    }

    MonitoredEntity {
        id: descriptor.id.clone(),
        display_name,
        excluded,
    }
}

/// Fold one fetch result into the entity's state
///
/// Nothing is recorded when the CPU percentage cannot be computed, so the
/// previous counters stay in place for the next cycle.
async fn apply_stats(
    handle: &EntityHandle,
    result: Result<RawStats>,
    cycle: u64,
    now: Instant,
) -> Result<()> {
    let stats = result?;
    let mut state = handle.lock().await;

    let cpu = cpu_percent(&state.entity.id, &stats.cpu, &state.previous_cpu)?;
    state.cpu.record(now, cpu);
    state.previous_cpu = CpuSnapshot::from(&stats.cpu);
    state.memory.record(now, memory_percent(&stats.memory));
    state.last_sampled_cycle = cycle;

    Ok(())
}

/// Builder for the sampling orchestrator
pub struct SamplingOrchestratorBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    notifier: Option<Arc<Notifier>>,
    config: OrchestratorConfig,
    exclude: Option<Regex>,
    started_at: Option<Instant>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl SamplingOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            notifier: None,
            config: OrchestratorConfig::default(),
            exclude: None,
            started_at: None,
            health: None,
            logger: None,
        }
    }

    /// Seed the builder from validated configuration
    pub fn from_config(config: &WatchdogConfig) -> Result<Self> {
        let mut builder = Self::new();
        builder.config = OrchestratorConfig::from(config);
        builder.exclude = config.exclusion_pattern()?;
        Ok(builder)
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn evaluation_interval(mut self, interval: Duration) -> Self {
        self.config.evaluation_interval = interval;
        self
    }

    pub fn cpu_threshold(mut self, percent: f64) -> Self {
        self.config.cpu_threshold = percent;
        self
    }

    pub fn memory_threshold(mut self, percent: f64) -> Self {
        self.config.memory_threshold = percent;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude = Some(pattern);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn state_retention(mut self, retention: Duration) -> Self {
        self.config.state_retention = Some(retention);
        self
    }

    /// Start of the grace period (default: build time)
    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<SamplingOrchestrator> {
        let runtime = self
            .runtime
            .ok_or_else(|| Error::Config("container runtime is required".into()))?;

        Ok(SamplingOrchestrator {
            runtime,
            notifier: self.notifier.unwrap_or_default(),
            store: StateStore::new(),
            cpu_monitor: ThresholdMonitor::new(self.config.cpu_threshold),
            memory_monitor: ThresholdMonitor::new(self.config.memory_threshold),
            grace: GracePeriod::starting_at(self.started_at.unwrap_or_else(Instant::now)),
            config: self.config,
            exclude: self.exclude,
            cycle: 0,
            evaluated_through: 0,
            metrics: WatchdogMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("localhost")),
            health: self.health,
        })
    }
}

impl Default for SamplingOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::{CpuCounters, MemoryCounters};
    use crate::notify::NotificationChannel;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRuntime {
        entities: Mutex<Vec<EntityDescriptor>>,
        stats: Mutex<HashMap<String, RawStats>>,
        failing: Mutex<HashSet<String>>,
        list_fails: Mutex<bool>,
    }

    impl MockRuntime {
        fn add(&self, id: &str, name: &str) {
            self.entities.lock().unwrap().push(EntityDescriptor {
                id: id.to_string(),
                name_candidates: vec![format!("/{}", name)],
            });
            self.stats.lock().unwrap().insert(
                id.to_string(),
                RawStats {
                    cpu: CpuCounters {
                        busy_time: 0,
                        total_time: 0,
                        per_cpu: Some(vec![0]),
                    },
                    memory: MemoryCounters {
                        usage: 0,
                        limit: Some(1000),
                    },
                },
            );
        }

        /// Advance counters so the next sample reads `percent` CPU
        fn burn(&self, id: &str, percent: u64) {
            let mut stats = self.stats.lock().unwrap();
            let cpu = &mut stats.get_mut(id).unwrap().cpu;
            cpu.busy_time += percent * 10;
            cpu.total_time += 1000;
        }

        fn set_memory(&self, id: &str, usage: u64) {
            self.stats.lock().unwrap().get_mut(id).unwrap().memory.usage = usage;
        }

        fn fail(&self, id: &str) {
            self.failing.lock().unwrap().insert(id.to_string());
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn list_live_entities(&self) -> Result<Vec<EntityDescriptor>> {
            if *self.list_fails.lock().unwrap() {
                return Err(Error::Runtime("daemon unreachable".into()));
            }
            Ok(self.entities.lock().unwrap().clone())
        }

        async fn fetch_stats(&self, entity_id: &str) -> Result<RawStats> {
            if self.failing.lock().unwrap().contains(entity_id) {
                return Err(Error::data_unavailable(entity_id, "container vanished"));
            }
            self.stats
                .lock()
                .unwrap()
                .get(entity_id)
                .cloned()
                .ok_or_else(|| Error::data_unavailable(entity_id, "unknown"))
        }
    }

    struct SlowRuntime;

    #[async_trait]
    impl ContainerRuntime for SlowRuntime {
        async fn list_live_entities(&self) -> Result<Vec<EntityDescriptor>> {
            Ok(vec![EntityDescriptor {
                id: "slow".to_string(),
                name_candidates: vec!["/slow".to_string()],
            }])
        }

        async fn fetch_stats(&self, _entity_id: &str) -> Result<RawStats> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RawStats::default())
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        delivered: tokio::sync::Mutex<Vec<AlertEvent>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, event: &AlertEvent) -> Result<()> {
            self.delivered.lock().await.push(event.clone());
            Ok(())
        }
    }

    fn orchestrator(runtime: Arc<MockRuntime>, started_at: Instant) -> SamplingOrchestratorBuilder {
        SamplingOrchestratorBuilder::new()
            .runtime(runtime)
            .started_at(started_at)
    }

    fn severities(events: &[AlertEvent]) -> Vec<Severity> {
        events.iter().map(|e| e.severity).collect()
    }

    fn cpu_events(events: &[AlertEvent]) -> Vec<AlertEvent> {
        events
            .iter()
            .filter(|e| e.metric == MetricKind::Cpu)
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_hysteresis_after_grace() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0).build().unwrap();

        let mut all = Vec::new();
        for (i, percent) in [95, 95, 95, 40].into_iter().enumerate() {
            let now = t0 + Duration::from_secs(61 + 10 * i as u64);
            runtime.burn("a", percent);
            orch.sample_cycle(now).await;
            all.extend(cpu_events(&orch.evaluate_cycle(now).await));
        }

        assert_eq!(
            severities(&all),
            vec![
                Severity::Warning,
                Severity::Warning,
                Severity::Warning,
                Severity::Restored
            ]
        );
        let counts: Vec<u32> = all.iter().map(|e| e.consecutive_breaches).collect();
        assert_eq!(counts, vec![1, 2, 3, 3]);
        assert_eq!(all[2].breached_for, Some(Duration::from_secs(30)));
        assert!((all[3].value - 81.25).abs() < 1e-9);

        let handle = orch.store().get("a").unwrap();
        assert_eq!(handle.lock().await.cpu.breaches, 0);
    }

    #[tokio::test]
    async fn test_grace_period_suppresses_alerts() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0).build().unwrap();

        for (i, percent) in [95, 95, 95, 40].into_iter().enumerate() {
            let now = t0 + Duration::from_secs(10 * i as u64);
            runtime.burn("a", percent);
            orch.sample_cycle(now).await;
            assert!(orch.evaluate_cycle(now).await.is_empty());
        }

        let handle = orch.store().get("a").unwrap();
        assert_eq!(handle.lock().await.cpu.breaches, 0);
    }

    #[tokio::test]
    async fn test_verbose_reports_during_grace() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0)
            .verbose(true)
            .build()
            .unwrap();

        runtime.burn("a", 95);
        orch.sample_cycle(t0).await;
        let events = orch.evaluate_cycle(t0).await;

        assert_eq!(severities(&events), vec![Severity::Info, Severity::Info]);
        assert_eq!(events[0].metric, MetricKind::Cpu);
        assert_eq!(events[1].metric, MetricKind::Memory);
    }

    #[tokio::test]
    async fn test_excluded_entity_never_alerts() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "k8s_POD_web");
        runtime.add("b", "api");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0)
            .exclude(Regex::new("^k8s_POD").unwrap())
            .verbose(true)
            .build()
            .unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 99);
        runtime.burn("b", 99);
        let report = orch.sample_cycle(now).await;
        let events = orch.evaluate_cycle(now).await;

        assert_eq!(report.excluded, 1);
        assert_eq!(report.sampled, 1);
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.entity_id == "b"));
        assert!(orch.store().get("a").unwrap().lock().await.entity.excluded);
    }

    #[tokio::test]
    async fn test_fetch_failure_isolated() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        runtime.add("b", "api");
        runtime.fail("b");
        let t0 = Instant::now();
        let health = HealthRegistry::new();
        let mut orch = orchestrator(runtime.clone(), t0)
            .health(health.clone())
            .build()
            .unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 95);
        let report = orch.sample_cycle(now).await;
        let events = orch.evaluate_cycle(now).await;

        assert_eq!(report.sampled, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(cpu_events(&events).len(), 1);
        assert_eq!(events[0].entity_id, "a");
        assert_eq!(
            health.health().await.components[components::SAMPLER].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let t0 = Instant::now();
        let mut orch = SamplingOrchestratorBuilder::new()
            .runtime(Arc::new(SlowRuntime))
            .fetch_timeout(Duration::from_millis(50))
            .started_at(t0)
            .build()
            .unwrap();

        let report = orch.sample_cycle(t0).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.sampled, 0);
    }

    #[tokio::test]
    async fn test_listing_failure_skips_cycle() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        *runtime.list_fails.lock().unwrap() = true;
        let health = HealthRegistry::new();
        let mut orch = orchestrator(runtime.clone(), Instant::now())
            .health(health.clone())
            .build()
            .unwrap();

        let report = orch.sample_cycle(Instant::now()).await;

        assert_eq!(report, SampleReport::default());
        assert!(orch.store().is_empty());
        assert_eq!(health.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_memory_threshold_uses_latest_value() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "db");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0)
            .memory_threshold(80.0)
            .build()
            .unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 10);
        runtime.set_memory("a", 850);
        orch.sample_cycle(now).await;
        let events = orch.evaluate_cycle(now).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, MetricKind::Memory);
        assert_eq!(events[0].severity, Severity::Warning);
        assert!((events[0].value - 85.0).abs() < 1e-9);

        let later = now + Duration::from_secs(10);
        runtime.burn("a", 10);
        runtime.set_memory("a", 300);
        orch.sample_cycle(later).await;
        let events = orch.evaluate_cycle(later).await;

        assert_eq!(severities(&events), vec![Severity::Restored]);
    }

    #[tokio::test]
    async fn test_vanished_entity_not_evaluated() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0).build().unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 95);
        orch.sample_cycle(now).await;
        runtime.entities.lock().unwrap().clear();
        orch.sample_cycle(now + Duration::from_secs(2)).await;

        assert!(orch.evaluate_cycle(now + Duration::from_secs(2)).await.is_empty());
        assert_eq!(orch.store().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_fetch_stops_warnings_on_stale_data() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "db");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0).build().unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 10);
        runtime.set_memory("a", 950);
        orch.sample_cycle(now).await;
        let events = orch.evaluate_cycle(now).await;
        assert_eq!(severities(&events), vec![Severity::Warning]);

        // Still listed, but every fetch fails from here on
        runtime.fail("a");
        for i in 1..=5 {
            let later = now + Duration::from_secs(120 * i);
            let report = orch.sample_cycle(later).await;
            assert_eq!(report.failed, 1);
            assert!(orch.evaluate_cycle(later).await.is_empty());
        }

        let handle = orch.store().get("a").unwrap();
        assert_eq!(handle.lock().await.memory.breaches, 1);
    }

    #[tokio::test]
    async fn test_entity_evaluated_again_after_fetch_recovers() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "db");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0).build().unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 10);
        runtime.set_memory("a", 950);
        runtime.fail("a");
        orch.sample_cycle(now).await;
        assert!(orch.evaluate_cycle(now).await.is_empty());

        runtime.failing.lock().unwrap().clear();
        let later = now + Duration::from_secs(10);
        orch.sample_cycle(later).await;
        let events = orch.evaluate_cycle(later).await;

        assert_eq!(severities(&events), vec![Severity::Warning]);
        assert_eq!(events[0].metric, MetricKind::Memory);
    }

    #[tokio::test]
    async fn test_state_retention_evicts_vanished_entities() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        runtime.add("b", "api");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0)
            .state_retention(Duration::from_secs(30))
            .build()
            .unwrap();

        orch.sample_cycle(t0).await;
        assert_eq!(orch.store().len(), 2);

        runtime.entities.lock().unwrap().retain(|d| d.id == "a");
        let report = orch.sample_cycle(t0 + Duration::from_secs(20)).await;
        assert_eq!(report.evicted, 0);
        assert_eq!(orch.store().len(), 2);

        let report = orch.sample_cycle(t0 + Duration::from_secs(40)).await;
        assert_eq!(report.evicted, 1);
        assert!(orch.store().get("a").is_some());
        assert!(orch.store().get("b").is_none());
    }

    #[tokio::test]
    async fn test_state_kept_without_retention() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0).build().unwrap();

        orch.sample_cycle(t0).await;
        runtime.entities.lock().unwrap().clear();
        let report = orch.sample_cycle(t0 + Duration::from_secs(3600)).await;

        assert_eq!(report.evicted, 0);
        assert_eq!(orch.store().len(), 1);
    }

    #[tokio::test]
    async fn test_events_reach_notifier() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.add("a", "web");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = Arc::new(Notifier::new().with_channel(channel.clone()));
        let t0 = Instant::now();
        let mut orch = orchestrator(runtime.clone(), t0)
            .notifier(notifier)
            .build()
            .unwrap();

        let now = t0 + Duration::from_secs(61);
        runtime.burn("a", 95);
        orch.sample_cycle(now).await;
        orch.evaluate_cycle(now).await;

        let delivered = channel.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].display_name, "web");
        assert_eq!(delivered[0].severity, Severity::Warning);
    }

    #[test]
    fn test_builder_requires_runtime() {
        let err = SamplingOrchestratorBuilder::new().build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_builder_from_config() {
        let config = WatchdogConfig {
            interval_secs: 30,
            verbose: true,
            exclude: Some("^skip".to_string()),
            ..Default::default()
        };

        let builder = SamplingOrchestratorBuilder::from_config(&config).unwrap();
        assert_eq!(builder.config.evaluation_interval, Duration::from_secs(30));
        assert_eq!(builder.config.sample_interval, SAMPLE_INTERVAL);
        assert!(builder.config.verbose);
        assert!(builder.exclude.is_some());
    }
}
