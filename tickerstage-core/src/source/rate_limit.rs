//! Minimum spacing between requests to one upstream.
//!
//! Spacing is measured from the *completion* of the previous request, so a
//! burst of fast responses still honours the floor. The lock is held for the
//! duration of the request: every caller sharing a limiter is serialised.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_completed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_completed: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the floor has elapsed since the last request completed,
    /// then run `request`.
    pub fn run<T>(&self, request: impl FnOnce() -> T) -> T {
        let mut last = self
            .last_completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limit wait");
                std::thread::sleep(wait);
            }
        }

        let result = request();
        *last = Some(Instant::now());
        result
    }
}
