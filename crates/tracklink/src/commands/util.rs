//! Shared helpers for command handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabled::Tabled;
use tracklink_core::{Availability, DeviceId, FileStateStore, Tracker};

use crate::config::Resolved;
use crate::error::CliError;

/// Build a tracker backed by the profile's state file. No network I/O.
pub fn build_tracker(resolved: &Resolved) -> Result<Tracker, CliError> {
    let store = Arc::new(FileStateStore::new(&resolved.state_path));
    Ok(Tracker::new(resolved.tracker.clone(), store)?)
}

pub fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Whole-second humantime rendering, e.g. `1h 5m 3s`.
pub fn format_duration(d: std::time::Duration) -> String {
    humantime::format_duration(std::time::Duration::from_secs(d.as_secs())).to_string()
}

// ── Availability table ──────────────────────────────────────────────

#[derive(Tabled)]
pub struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Latitude")]
    latitude: String,
    #[tabled(rename = "Longitude")]
    longitude: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Fix")]
    fix: String,
    #[tabled(rename = "Geofence")]
    geofence: String,
}

impl DeviceRow {
    pub fn new(id: DeviceId, availability: &Availability) -> Self {
        let Some(snap) = availability.snapshot() else {
            let last = match availability {
                Availability::Unavailable { last_captured } => Some(*last_captured),
                Availability::Available { .. } => None,
            };
            return Self {
                id: id.to_string(),
                name: String::new(),
                state: "unavailable".into(),
                latitude: "-".into(),
                longitude: "-".into(),
                accuracy: "-".into(),
                fix: format_time(last),
                geofence: "-".into(),
            };
        };

        let pos = snap.position.as_ref();
        Self {
            id: id.to_string(),
            name: snap.name.clone(),
            state: snap.status.clone().unwrap_or_else(|| "available".into()),
            latitude: pos.map_or_else(|| "-".into(), |p| format!("{:.5}", p.latitude)),
            longitude: pos.map_or_else(|| "-".into(), |p| format!("{:.5}", p.longitude)),
            accuracy: pos.map_or_else(|| "-".into(), |p| format!("{:.0} m", p.accuracy)),
            fix: format_time(pos.map(|p| p.timestamp)),
            geofence: snap
                .geofence
                .as_ref()
                .map_or_else(|| "-".into(), |g| g.name.clone()),
        }
    }
}

/// Render availability as a rounded table.
pub fn availability_table<'a>(
    entries: impl IntoIterator<Item = (&'a DeviceId, &'a Availability)>,
) -> String {
    let rows: Vec<DeviceRow> = entries
        .into_iter()
        .map(|(id, availability)| DeviceRow::new(*id, availability))
        .collect();
    if rows.is_empty() {
        return "No devices".into();
    }
    tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string()
}
