//! Terminal output channel

use super::{NotificationChannel, TagFilter};
use crate::error::Result;
use crate::models::{AlertEvent, Severity};
use async_trait::async_trait;
use colored::Colorize;
use std::time::Duration;

/// Prints one colored line per event to stdout
pub struct ConsoleChannel {
    filter: Option<TagFilter>,
    throttle: Option<Duration>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            filter: None,
            throttle: None,
        }
    }

    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_throttle(mut self, window: Duration) -> Self {
        self.throttle = Some(window);
        self
    }

    /// Plain-text rendering of an event
    pub fn format_line(event: &AlertEvent) -> String {
        let metric = event.metric.label();
        match event.severity {
            Severity::Warning => {
                let duration = event
                    .breached_for
                    .map(|d| format!(" for {} seconds", d.as_secs()))
                    .unwrap_or_default();
                format!(
                    "WARNING: Container {} has been at {:.0}% {} Usage{}",
                    event.display_name, event.value, metric, duration
                )
            }
            Severity::Restored => format!(
                "OKAY: Container {} {} is now at {:.0}%",
                event.display_name, metric, event.value
            ),
            Severity::Info => format!(
                "Container {} is using {:.0}% of its {} capacity",
                event.display_name, event.value, metric
            ),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn filter(&self) -> Option<&TagFilter> {
        self.filter.as_ref()
    }

    fn throttle_window(&self) -> Option<Duration> {
        self.throttle
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let line = Self::format_line(event);
        let line = match event.severity {
            Severity::Warning => line.yellow().bold().to_string(),
            Severity::Restored => line.green().to_string(),
            Severity::Info => line,
        };
        println!("{}", line);
        Ok(())
    }
}
