// ── Runtime tracker configuration ──
//
// These types describe *how* to reach a tracking server and how patient
// to be with it. They carry credential data and tuning, but never touch
// disk. The CLI constructs a `TrackerConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use tracklink_api::{Credentials, TlsMode, TransportConfig};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::grace::DEFAULT_GRACE_WINDOW;
use crate::model::Attributes;
use crate::session::SessionPolicy;

/// Polls faster than this are clamped.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-hosted servers with self-signed certs).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Drops imprecise fixes before they reach the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionFilter {
    /// Maximum accepted accuracy in meters. `0` disables the filter.
    pub max_accuracy: f64,
    /// Positions carrying any of these attributes bypass the filter.
    pub skip_for: Vec<String>,
}

impl PositionFilter {
    pub fn accepts(&self, accuracy: f64, attributes: &Attributes) -> bool {
        if self.max_accuracy <= 0.0 {
            return true;
        }
        if self.skip_for.iter().any(|key| attributes.contains_key(key)) {
            return true;
        }
        accuracy <= self.max_accuracy
    }
}

/// Configuration for tracking a single server account.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Server base URL (e.g., `https://demo.traccar.org`).
    pub url: Url,
    pub credentials: Credentials,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Interval between scheduled polls. See [`Self::effective_poll_interval`].
    pub poll_interval: Duration,
    /// How long cached snapshots are served after the first failure.
    pub grace_window: Duration,
    /// Spacing of retries after failed polls.
    pub backoff: BackoffPolicy,
    pub session: SessionPolicy,
    pub filter: PositionFilter,
    /// Event types to import; empty disables event import.
    pub event_types: Vec<String>,
    pub event_interval: Duration,
}

impl TrackerConfig {
    pub fn new(url: Url, credentials: Credentials) -> Self {
        Self {
            url,
            credentials,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            grace_window: DEFAULT_GRACE_WINDOW,
            backoff: BackoffPolicy::default(),
            session: SessionPolicy::default(),
            filter: PositionFilter::default(),
            event_types: Vec::new(),
            event_interval: Duration::from_secs(30),
        }
    }

    /// Poll interval clamped to [`MIN_POLL_INTERVAL`].
    pub fn effective_poll_interval(&self) -> Duration {
        if self.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested = ?self.poll_interval,
                minimum = ?MIN_POLL_INTERVAL,
                "poll interval below minimum, clamping"
            );
            MIN_POLL_INTERVAL
        } else {
            self.poll_interval
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}
