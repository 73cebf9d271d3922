// ── Grace period tracking ──
//
// Decides, from the history of poll outcomes, whether cached snapshots
// may still be served. Transitions are pure: `record_outcome` returns the
// next state and the caller persists it alongside the cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::elapsed;

/// Default window during which cached snapshots stay available.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);

/// Upstream connectivity as seen by consumers.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GraceMode {
    #[default]
    Connected,
    Reconnecting,
    GraceExpired,
}

/// Persisted grace bookkeeping.
///
/// `first_failure_time` is set exactly when `mode != Connected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceState {
    #[serde(rename = "grace_mode")]
    pub mode: GraceMode,
    pub first_failure_time: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub last_success_time: Option<DateTime<Utc>>,
}

impl GraceState {
    /// Apply one poll outcome observed at `now`.
    pub fn record_outcome(&self, success: bool, now: DateTime<Utc>, window: Duration) -> Self {
        if success {
            return Self {
                mode: GraceMode::Connected,
                first_failure_time: None,
                failure_count: 0,
                last_success_time: Some(now),
            };
        }

        let failure_count = self.failure_count.saturating_add(1);
        let first_failure = match (self.mode, self.first_failure_time) {
            (GraceMode::Connected, _) | (_, None) => now,
            (_, Some(first)) => first,
        };

        let mode = if self.mode == GraceMode::GraceExpired || elapsed(first_failure, now) >= window
        {
            GraceMode::GraceExpired
        } else {
            GraceMode::Reconnecting
        };

        Self {
            mode,
            first_failure_time: Some(first_failure),
            failure_count,
            last_success_time: self.last_success_time,
        }
    }

    /// Cached snapshots are served in every mode except `GraceExpired`.
    pub fn should_serve_cache(&self) -> bool {
        self.mode != GraceMode::GraceExpired
    }

    /// Whether `Reconnecting` has outlived `window` at `now` without a
    /// failure recording it yet.
    pub fn has_lapsed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.mode == GraceMode::Reconnecting && self.downtime(now) >= window
    }

    /// Move a lapsed `Reconnecting` state to `GraceExpired`. Counters and
    /// timestamps are kept.
    #[must_use]
    pub fn expire_lapsed(self, now: DateTime<Utc>, window: Duration) -> Self {
        if self.has_lapsed(now, window) {
            Self {
                mode: GraceMode::GraceExpired,
                ..self
            }
        } else {
            self
        }
    }

    /// Time spent failing as of `now`; zero while connected.
    pub fn downtime(&self, now: DateTime<Utc>) -> Duration {
        self.first_failure_time
            .map_or(Duration::ZERO, |first| elapsed(first, now))
    }

    /// Repair a loaded state whose fields contradict each other.
    ///
    /// A non-connected mode without a first failure time, or a connected
    /// mode carrying one, falls back to the default state.
    #[must_use]
    pub fn normalized(self) -> Self {
        let consistent = match self.mode {
            GraceMode::Connected => self.first_failure_time.is_none(),
            GraceMode::Reconnecting | GraceMode::GraceExpired => {
                self.first_failure_time.is_some()
            }
        };
        if consistent {
            self
        } else {
            Self {
                last_success_time: self.last_success_time,
                ..Self::default()
            }
        }
    }
}
