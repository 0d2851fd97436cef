//! Error types for the watchdog pipeline

use thiserror::Error;

use crate::models::MetricKind;

/// Result type alias using the watchdog's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the sampling-to-alert pipeline
///
/// None of these are fatal once the loops are running; only the
/// configuration variants abort startup.
#[derive(Error, Debug)]
pub enum Error {
    /// The runtime could not supply stats for an entity this cycle
    #[error("stats unavailable for {entity_id}: {reason}")]
    DataUnavailable { entity_id: String, reason: String },

    /// An average was requested before any sample was recorded
    #[error("no samples recorded for {entity_id} {metric}")]
    InsufficientData { entity_id: String, metric: MetricKind },

    /// A notification channel failed to deliver an event
    #[error("delivery via {channel} failed: {reason}")]
    DeliveryFailure { channel: String, reason: String },

    /// Listing live entities failed
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Exclusion pattern does not compile
    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl Error {
    pub fn data_unavailable(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }

    pub fn delivery(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailure {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must stop the process before the loops start
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::InvalidPattern(_))
    }
}
