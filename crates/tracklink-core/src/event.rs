// ── Tracker events ──
//
// Pushed to subscribers over a broadcast channel. Connectivity changes
// fire on every grace-mode transition; device events come from the
// upstream event report when event import is enabled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::grace::GraceMode;
use crate::model::{Attributes, DeviceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    ConnectivityChanged(ConnectivityChanged),
    Device(DeviceEvent),
}

/// The grace mode moved from `previous` to `current`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityChanged {
    pub previous: GraceMode,
    pub current: GraceMode,
    /// Time since the first failure of the current (or just ended) outage.
    #[serde(with = "duration_secs")]
    pub downtime: Duration,
    pub at: DateTime<Utc>,
}

/// An event reported by the tracking server for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    pub device_id: DeviceId,
    pub device_name: Option<String>,
    /// snake_case form of `event_type`, e.g. `geofence_enter`.
    pub kind: String,
    pub event_type: String,
    pub time: Option<DateTime<Utc>>,
    pub geofence_id: Option<i64>,
    pub attributes: Attributes,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn connectivity_event_serializes_flat() {
        let event = TrackerEvent::ConnectivityChanged(ConnectivityChanged {
            previous: GraceMode::Reconnecting,
            current: GraceMode::Connected,
            downtime: Duration::from_secs(5400),
            at: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connectivity_changed");
        assert_eq!(json["previous"], "RECONNECTING");
        assert_eq!(json["downtime"], 5400);
    }
}
