//! Sampling-to-alert primitives
//!
//! This module provides:
//! - Percentage calculators for CPU and memory counters
//! - Rolling window averaging of CPU samples
//! - Threshold hysteresis with a global startup grace period

mod percent;
mod threshold;
mod window;

pub use percent::{cpu_percent, memory_percent, CpuSnapshot};
pub use threshold::{GracePeriod, ThresholdMonitor, Transition, GRACE_PERIOD};
pub use window::{RollingWindow, WINDOW_DURATION};
