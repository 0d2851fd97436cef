//! Per-key rate limiting
//!
//! The first event for a key passes; later events for that key are dropped
//! until the window has elapsed since the last forwarded one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Drop-based throttle keyed by routing tag
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    /// key -> when the last event for that key was forwarded
    last_forwarded: HashMap<String, Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_forwarded: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether an event with `key` may be forwarded at `now`
    ///
    /// Admitting an event starts a new window for its key.
    pub fn admit(&mut self, key: &str, now: Instant) -> bool {
        if self.window.is_zero() {
            return true;
        }

        if let Some(last) = self.last_forwarded.get(key) {
            // A reading earlier than `last` counts as zero elapsed time
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        self.last_forwarded.insert(key.to_string(), now);
        self.cleanup(now);
        true
    }

    /// Forget keys whose window has already elapsed
    fn cleanup(&mut self, now: Instant) {
        let window = self.window;
        self.last_forwarded
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    pub fn tracked_keys(&self) -> usize {
        self.last_forwarded.len()
    }
}
