// SPDX-License-Identifier: GPL-3.0-only

use std::time::{Duration, Instant};

/// Default minimum interval between two progress reports
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub fn compute_fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64).clamp(0.0, 1.0)
}

/// Lets at most one report through per interval
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when a report may be sent at `now`; the first call always passes
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(REPORT_INTERVAL)
    }
}
