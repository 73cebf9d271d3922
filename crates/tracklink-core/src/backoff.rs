// ── Retry backoff ──
//
// Deterministic exponential backoff (no jitter) plus the in-memory retry
// gate the fetch cycle consults before touching the network.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::add_duration;
use crate::grace::GraceState;

/// Exponential backoff: `min(base * 2^failure_count, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(15 * 60),
        }
    }
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt. `failure_count` 0 is the first retry
    /// and yields `base`; the result never exceeds `max`.
    pub fn next_delay(&self, failure_count: u32) -> Duration {
        let factor = 1u32.checked_shl(failure_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Consecutive failures and the earliest instant the next attempt may run.
///
/// Lives only in memory; after a restart it is rebuilt from the persisted
/// failure count with no pending deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub failures: u32,
    pub next_eligible_retry: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn from_grace(grace: &GraceState) -> Self {
        Self {
            failures: grace.failure_count,
            next_eligible_retry: None,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_retry.is_none_or(|at| now >= at)
    }

    /// Count a failure and schedule the next attempt. Returns the delay.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &BackoffPolicy) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = policy.next_delay(self.failures - 1);
        self.next_eligible_retry = Some(add_duration(now, delay));
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next_eligible_retry = None;
    }
}
