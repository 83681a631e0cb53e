//! Exponential backoff with jitter for the coordinator's retry paths.
//!
//! Time is passed in explicitly so the coordinator can be driven by a test
//! clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    next_attempt_at: Option<DateTime<Utc>>,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            next_attempt_at: None,
            jitter_ratio: 0.2,
        }
    }

    pub fn ready(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| now >= at)
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.next_attempt_at = None;
    }

    /// Record a failure at `now` and return the delay before the next attempt.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.next_attempt_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        delay
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) {
        return delay;
    }

    let delay_ms = delay.as_millis();
    if delay_ms == 0 {
        return delay;
    }

    let jitter_ms_max = ((delay_ms as f64) * ratio) as u128;
    if jitter_ms_max == 0 {
        return delay;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter_ms = (now_nanos as u128) % (jitter_ms_max + 1);
    delay + Duration::from_millis(jitter_ms as u64)
}
