//! Alert routing and delivery
//!
//! This module provides:
//! - The [`NotificationChannel`] capability every delivery target implements
//! - Tag filtering and per-channel throttling in [`Notifier`]
//! - Console and Slack webhook channels

mod console;
mod slack;
mod throttle;

pub use console::ConsoleChannel;
pub use slack::{SlackChannel, SlackPayload, DEFAULT_EMOJI};
pub use throttle::Throttle;

use crate::error::Result;
use crate::models::AlertEvent;
use crate::observability::WatchdogMetrics;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Set of tags a channel accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: BTreeSet<String>,
}

impl TagFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Only warnings and recoveries, no verbose `info` reports
    pub fn alerts_only() -> Self {
        Self::new(["warning", "restored"])
    }

    /// Whether the event carries at least one accepted tag
    pub fn matches(&self, event: &AlertEvent) -> bool {
        event.tags.iter().any(|tag| self.tags.contains(tag))
    }
}

/// A destination for alert events
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Tags this channel accepts; `None` accepts everything
    fn filter(&self) -> Option<&TagFilter> {
        None
    }

    /// Minimum spacing between events sharing a throttle key
    fn throttle_window(&self) -> Option<Duration> {
        None
    }

    /// Deliver one event; failures are reported as `Error::DeliveryFailure`
    async fn deliver(&self, event: &AlertEvent) -> Result<()>;
}

/// What happened to one event across all channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub forwarded: usize,
    pub filtered: usize,
    pub throttled: usize,
    pub failed: usize,
}

struct Route {
    channel: Arc<dyn NotificationChannel>,
    throttle: Option<Mutex<Throttle>>,
}

/// Fans events out to channels, applying each channel's filter and throttle
pub struct Notifier {
    routes: Vec<Route>,
    metrics: WatchdogMetrics,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            metrics: WatchdogMetrics::new(),
        }
    }

    /// Register a channel
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.add_channel(channel);
        self
    }

    pub fn add_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        let throttle = channel
            .throttle_window()
            .filter(|window| !window.is_zero())
            .map(|window| Mutex::new(Throttle::new(window)));
        self.routes.push(Route { channel, throttle });
    }

    pub fn channel_count(&self) -> usize {
        self.routes.len()
    }

    /// Route one event to every channel
    ///
    /// A failing channel is logged and never stops delivery to the others.
    pub async fn dispatch(&self, event: &AlertEvent, now: Instant) -> DispatchReport {
        let mut report = DispatchReport::default();
        let key = event.throttle_key();

        for route in &self.routes {
            let channel = route.channel.name();

            if let Some(filter) = route.channel.filter() {
                if !filter.matches(event) {
                    report.filtered += 1;
                    continue;
                }
            }

            if let Some(throttle) = &route.throttle {
                let admitted = throttle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .admit(&key, now);
                if !admitted {
                    debug!(
                        channel = %channel,
                        throttle_key = %key,
                        entity_id = %event.entity_id,
                        "Alert throttled"
                    );
                    self.metrics.inc_alerts_throttled(channel);
                    report.throttled += 1;
                    continue;
                }
            }

            match route.channel.deliver(event).await {
                Ok(()) => report.forwarded += 1,
                Err(e) => {
                    warn!(
                        channel = %channel,
                        entity_id = %event.entity_id,
                        severity = %event.severity,
                        error = %e,
                        "Failed to deliver alert"
                    );
                    self.metrics.inc_delivery_failures(channel);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
