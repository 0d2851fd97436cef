//! Threshold hysteresis
//!
//! Each (entity, metric) is either NORMAL (breach counter 0) or BREACHING
//! (counter >= 1). A breaching metric warns on every evaluation; the first
//! evaluation back under the threshold reports recovery once.

use std::time::{Duration, Instant};

/// Startup window during which warnings and recoveries are not evaluated
pub const GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Value at or above threshold; `consecutive` includes this cycle
    Warning { consecutive: u32 },
    /// Back under threshold after `after` breaching cycles
    Restored { after: u32 },
}

/// Per-metric threshold evaluator
#[derive(Debug, Clone, Copy)]
pub struct ThresholdMonitor {
    threshold: f64,
}

impl ThresholdMonitor {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_breach(&self, value: f64) -> bool {
        value >= self.threshold
    }

    /// Apply one observation to the breach counter
    pub fn evaluate(&self, breaches: &mut u32, value: f64) -> Option<Transition> {
        if self.is_breach(value) {
            *breaches = breaches.saturating_add(1);
            return Some(Transition::Warning {
                consecutive: *breaches,
            });
        }

        if *breaches > 0 {
            let after = *breaches;
            *breaches = 0;
            return Some(Transition::Restored { after });
        }

        None
    }
}

/// Global startup grace period, shared by every entity
#[derive(Debug, Clone, Copy)]
pub struct GracePeriod {
    started_at: Instant,
    length: Duration,
}

impl GracePeriod {
    pub fn starting_at(started_at: Instant) -> Self {
        Self {
            started_at,
            length: GRACE_PERIOD,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Whether alert evaluation is still suppressed at `now`
    pub fn is_active(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) < self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_warning_warning_restored() {
        let monitor = ThresholdMonitor::new(90.0);
        let mut breaches = 0;

        let outcomes: Vec<_> = [95.0, 95.0, 95.0, 40.0]
            .into_iter()
            .map(|value| {
                let transition = monitor.evaluate(&mut breaches, value);
                (transition, breaches)
            })
            .collect();

        assert_eq!(
            outcomes,
            vec![
                (Some(Transition::Warning { consecutive: 1 }), 1),
                (Some(Transition::Warning { consecutive: 2 }), 2),
                (Some(Transition::Warning { consecutive: 3 }), 3),
                (Some(Transition::Restored { after: 3 }), 0),
            ]
        );
    }

    #[test]
    fn test_steady_normal_is_silent() {
        let monitor = ThresholdMonitor::new(90.0);
        let mut breaches = 0;

        for value in [10.0, 50.0, 89.99] {
            assert_eq!(monitor.evaluate(&mut breaches, value), None);
        }
        assert_eq!(breaches, 0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let monitor = ThresholdMonitor::new(90.0);
        let mut breaches = 0;

        assert_eq!(
            monitor.evaluate(&mut breaches, 90.0),
            Some(Transition::Warning { consecutive: 1 })
        );
    }

    #[test]
    fn test_restored_only_once() {
        let monitor = ThresholdMonitor::new(90.0);
        let mut breaches = 0;

        monitor.evaluate(&mut breaches, 99.0);
        assert_eq!(
            monitor.evaluate(&mut breaches, 10.0),
            Some(Transition::Restored { after: 1 })
        );
        assert_eq!(monitor.evaluate(&mut breaches, 10.0), None);
    }

    #[test]
    fn test_grace_period() {
        let start = Instant::now();
        let grace = GracePeriod::starting_at(start);

        assert!(grace.is_active(start));
        assert!(grace.is_active(start + Duration::from_secs(59)));
        assert!(!grace.is_active(start + Duration::from_secs(60)));
        assert!(!grace.is_active(start + Duration::from_secs(3600)));
    }
}
