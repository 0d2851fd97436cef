//! Container watchdog library
//!
//! This crate provides the core functionality for:
//! - Reading container CPU and memory counters from cgroups
//! - Rolling-window smoothing and threshold hysteresis
//! - Alert routing with tag filters and per-channel throttling
//! - Health checks and observability

pub mod alerting;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod store;

pub use config::WatchdogConfig;
pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use notify::{NotificationChannel, Notifier};
pub use observability::{StructuredLogger, WatchdogMetrics};
pub use orchestrator::{SamplingOrchestrator, SamplingOrchestratorBuilder};
pub use store::StateStore;
