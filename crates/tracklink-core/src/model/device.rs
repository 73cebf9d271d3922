// ── Device snapshot types ──

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Attributes;

// ── DeviceId ────────────────────────────────────────────────────────

/// Upstream device identifier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for DeviceId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

/// A validated position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters; 0 when the device did not report it.
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub altitude: f64,
    /// Knots.
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub course: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// The geofence a device is currently inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeofenceRef {
    pub id: i64,
    pub name: String,
}

/// Last known state of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence: Option<GeofenceRef>,
    #[serde(default)]
    pub attributes: Attributes,
    /// When this snapshot was taken from a successful fetch.
    pub captured_at: DateTime<Utc>,
}

// ── Availability ────────────────────────────────────────────────────

/// What a consumer may show for a device after a poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    /// Serve this snapshot (fresh, or cached within the grace window).
    Available { snapshot: Arc<DeviceSnapshot> },
    /// Grace window expired; show the device as unavailable.
    Unavailable { last_captured: DateTime<Utc> },
}

impl Availability {
    pub fn snapshot(&self) -> Option<&DeviceSnapshot> {
        match self {
            Self::Available { snapshot } => Some(snapshot),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}
