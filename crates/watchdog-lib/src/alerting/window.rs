//! Rolling window averaging
//!
//! Smooths noisy instantaneous CPU samples into a trailing mean. Samples
//! older than the retention duration are pruned on every insert, so memory
//! stays bounded by retention / sample interval.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Retention of the rolling window (60 seconds)
pub const WINDOW_DURATION: Duration = Duration::from_secs(60);

/// Time-bounded buffer of `(timestamp, value)` samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<(Instant, f64)>,
    retention: Duration,
}

impl RollingWindow {
    /// Create a window with the given retention
    pub fn new(retention: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            retention,
        }
    }

    /// Insert a sample and drop everything older than `timestamp - retention`
    pub fn record(&mut self, timestamp: Instant, value: f64) {
        self.samples.push_back((timestamp, value));
        self.expire_old_samples(timestamp);
    }

    fn expire_old_samples(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return;
        };
        while let Some((ts, _)) = self.samples.front() {
            if *ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Arithmetic mean of the retained samples, `None` when empty
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(WINDOW_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_over_window() {
        let t = Instant::now();
        let mut window = RollingWindow::default();

        window.record(t, 10.0);
        window.record(t + Duration::from_secs(10), 20.0);
        window.record(t + Duration::from_secs(70), 60.0);

        // t is older than t+70-60 and is pruned, t+10 sits on the cutoff
        assert_eq!(window.len(), 2);
        assert!((window.average().unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_has_no_average() {
        let window = RollingWindow::default();
        assert!(window.is_empty());
        assert!(window.average().is_none());
    }

    #[test]
    fn test_memory_bounded_by_retention() {
        let t = Instant::now();
        let mut window = RollingWindow::default();

        // Ten minutes of 2 second samples
        for i in 0..300u64 {
            window.record(t + Duration::from_secs(i * 2), 50.0);
        }

        assert!(window.len() <= 31);
        assert!(window.len() >= 30);
    }

    #[test]
    fn test_custom_retention() {
        let t = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(5));

        window.record(t, 100.0);
        window.record(t + Duration::from_secs(6), 0.0);

        assert_eq!(window.len(), 1);
        assert_eq!(window.average(), Some(0.0));
        assert_eq!(window.retention(), Duration::from_secs(5));
    }
}
