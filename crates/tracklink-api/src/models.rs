// Tracking server response types
//
// Wire models for the REST API. Identity and coordinate fields are
// required so that a payload missing them fails to decode; measurement
// extras are optional because firmware and protocol adapters disagree on
// which ones they send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form `attributes` object carried by most resources.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

// ── Device ───────────────────────────────────────────────────────────

/// A tracked device from `GET /api/devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    /// `online`, `offline`, or `unknown`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position_id: Option<i64>,
    #[serde(default)]
    pub geofence_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

// ── Position ─────────────────────────────────────────────────────────

/// Latest fix for a device from `GET /api/positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub device_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Speed in knots.
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub course: Option<f64>,
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub fix_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub geofence_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

impl PositionRecord {
    /// Best available timestamp: fix time, then device time, then the
    /// time the server received it.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.fix_time.or(self.device_time).or(self.server_time)
    }
}

// ── Geofence ─────────────────────────────────────────────────────────

/// A geofence from `GET /api/geofences`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// WKT area definition.
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

// ── Server ───────────────────────────────────────────────────────────

/// Server information from `GET /api/server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub version: Option<String>,
    /// Catch-all for server settings we don't model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Reports ──────────────────────────────────────────────────────────

/// A device event from `GET /api/reports/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub device_id: i64,
    /// camelCase event type, e.g. `geofenceEnter`, `ignitionOn`.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position_id: Option<i64>,
    #[serde(default)]
    pub geofence_id: Option<i64>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

/// Filter for an event report request.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub device_ids: Vec<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
    /// Event types to include; empty means all.
    pub types: Vec<String>,
}
