//! Slack incoming-webhook channel

use super::{console::ConsoleChannel, NotificationChannel, TagFilter};
use crate::error::{Error, Result};
use crate::models::{AlertEvent, Severity};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Emoji used as the bot icon when none is configured
pub const DEFAULT_EMOJI: &str = ":computer:";

/// Upper bound on a single webhook call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack webhook payload
#[derive(Debug, Clone, Serialize)]
pub struct SlackPayload {
    pub text: String,
    pub icon_emoji: String,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackAttachment {
    pub color: String,
    pub fields: Vec<SlackField>,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// Posts alerts to a Slack incoming webhook
///
/// Only warnings and recoveries are sent by default.
pub struct SlackChannel {
    client: Client,
    webhook_url: String,
    emoji: String,
    filter: Option<TagFilter>,
    report_rate: Option<Duration>,
}

impl SlackChannel {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            emoji: DEFAULT_EMOJI.to_string(),
            filter: Some(TagFilter::alerts_only()),
            report_rate: None,
        })
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = emoji.into();
        self
    }

    /// Minimum spacing between reports sharing a throttle key
    pub fn with_report_rate(mut self, rate: Duration) -> Self {
        self.report_rate = Some(rate);
        self
    }

    /// Replace the default tag filter; `None` forwards everything
    pub fn with_filter(mut self, filter: Option<TagFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn payload(&self, event: &AlertEvent) -> SlackPayload {
        let color = match event.severity {
            Severity::Warning => "warning",
            Severity::Restored => "good",
            Severity::Info => "#439FE0",
        };

        SlackPayload {
            text: ConsoleChannel::format_line(event),
            icon_emoji: self.emoji.clone(),
            attachments: vec![SlackAttachment {
                color: color.to_string(),
                fields: vec![
                    SlackField {
                        title: "Container".to_string(),
                        value: event.display_name.clone(),
                        short: true,
                    },
                    SlackField {
                        title: "Metric".to_string(),
                        value: event.metric.label().to_string(),
                        short: true,
                    },
                    SlackField {
                        title: "Value".to_string(),
                        value: format!("{:.1}%", event.value),
                        short: true,
                    },
                    SlackField {
                        title: "Threshold".to_string(),
                        value: format!("{:.1}%", event.threshold),
                        short: true,
                    },
                ],
                ts: event.emitted_at.timestamp(),
            }],
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn filter(&self) -> Option<&TagFilter> {
        self.filter.as_ref()
    }

    fn throttle_window(&self) -> Option<Duration> {
        self.report_rate
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(event))
            .send()
            .await
            .map_err(|e| Error::delivery("slack", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::delivery(
                "slack",
                format!("webhook returned {}: {}", status, body),
            ));
        }

        debug!(entity_id = %event.entity_id, severity = %event.severity, "Slack notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricKind, MonitoredEntity};

    fn event(severity: Severity) -> AlertEvent {
        let entity = MonitoredEntity {
            id: "abc123".to_string(),
            display_name: "web".to_string(),
            excluded: false,
        };
        AlertEvent::new(&entity, MetricKind::Cpu, severity, 97.0, 90.0)
    }

    #[test]
    fn test_payload() {
        let channel = SlackChannel::new("http://localhost/hook")
            .unwrap()
            .with_emoji(":whale:");
        let payload = channel.payload(&event(Severity::Warning));

        assert_eq!(payload.icon_emoji, ":whale:");
        assert!(payload.text.starts_with("WARNING: Container web"));
        assert_eq!(payload.attachments[0].color, "warning");
        assert_eq!(payload.attachments[0].fields[2].value, "97.0%");
    }

    #[test]
    fn test_default_filter_and_rate() {
        let channel = SlackChannel::new("http://localhost/hook").unwrap();
        assert_eq!(channel.filter(), Some(&TagFilter::alerts_only()));
        assert_eq!(channel.throttle_window(), None);

        let channel = channel.with_report_rate(Duration::from_secs(300));
        assert_eq!(channel.throttle_window(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_with_filter() {
        let channel = SlackChannel::new("http://localhost/hook")
            .unwrap()
            .with_filter(Some(TagFilter::new(["memory"])));
        assert_eq!(channel.filter(), Some(&TagFilter::new(["memory"])));

        let channel = channel.with_filter(None);
        assert_eq!(channel.filter(), None);
    }

    #[tokio::test]
    async fn test_deliver_posts_to_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"icon_emoji": ":computer:"}"#.to_string(),
            ))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let channel = SlackChannel::new(format!("{}/hook", server.url())).unwrap();
        channel.deliver(&event(Severity::Warning)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_reports_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(404)
            .with_body("no_service")
            .create_async()
            .await;

        let channel = SlackChannel::new(format!("{}/hook", server.url())).unwrap();
        let err = channel.deliver(&event(Severity::Restored)).await.unwrap_err();

        assert!(matches!(err, Error::DeliveryFailure { .. }));
        assert!(err.to_string().contains("no_service"));
    }
}
