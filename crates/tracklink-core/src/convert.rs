// ── API-to-domain conversions ──
//
// Turns one cycle's raw device, position and geofence listings into
// validated `DeviceSnapshot`s. Validation is strict: a position with
// unusable coordinates or no timestamp fails the whole cycle, so a
// half-parsed payload never overwrites good cached data.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use tracklink_api::{DeviceRecord, EventRecord, GeofenceRecord, PositionRecord};

use crate::config::PositionFilter;
use crate::error::UpstreamError;
use crate::event::DeviceEvent;
use crate::model::{Attributes, DeviceId, DeviceSnapshot, GeofenceRef, Position};

/// Raw listings fetched in one cycle.
#[derive(Debug, Default)]
pub(crate) struct Fetched {
    pub devices: Vec<DeviceRecord>,
    pub positions: Vec<PositionRecord>,
    pub geofences: Vec<GeofenceRecord>,
}

// ── Helpers ────────────────────────────────────────────────────────

fn malformed(message: String) -> UpstreamError {
    UpstreamError::MalformedResponse { message }
}

fn validate_position(record: &PositionRecord) -> Result<Position, UpstreamError> {
    let device = record.device_id;
    let lat = record.latitude;
    let lon = record.longitude;

    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(malformed(format!(
            "position for device {device} has latitude {lat} out of range"
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(malformed(format!(
            "position for device {device} has longitude {lon} out of range"
        )));
    }
    let Some(timestamp) = record.timestamp() else {
        return Err(malformed(format!(
            "position for device {device} has no timestamp"
        )));
    };

    Ok(Position {
        latitude: lat,
        longitude: lon,
        accuracy: finite_or_zero(record.accuracy),
        altitude: finite_or_zero(record.altitude),
        speed: finite_or_zero(record.speed),
        course: finite_or_zero(record.course),
        timestamp,
        address: record.address.clone(),
    })
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Position attributes overlaid with device attributes; the device wins.
fn merge_attributes(position: Option<&PositionRecord>, device: &DeviceRecord) -> Attributes {
    let mut merged = position
        .and_then(|p| p.attributes.clone())
        .unwrap_or_default();
    if let Some(device_attrs) = &device.attributes {
        for (key, value) in device_attrs {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// First geofence (in listing order) among the ids the position reports,
/// falling back to the ids on the device.
fn resolve_geofence(
    position: Option<&PositionRecord>,
    device: &DeviceRecord,
    geofences: &[GeofenceRecord],
) -> Option<GeofenceRef> {
    let ids = position
        .and_then(|p| p.geofence_ids.as_deref())
        .filter(|ids| !ids.is_empty())
        .or(device.geofence_ids.as_deref())?;

    geofences
        .iter()
        .find(|g| ids.contains(&g.id))
        .map(|g| GeofenceRef {
            id: g.id,
            name: g.name.clone(),
        })
}

// ── Snapshots ──────────────────────────────────────────────────────

/// Build the next cache contents from one cycle's listings.
///
/// `previous` supplies the last cached snapshot per device; it is used
/// to keep the old position when the filter drops a new fix.
pub(crate) fn build_snapshots<F>(
    fetched: &Fetched,
    previous: F,
    filter: &PositionFilter,
    captured_at: DateTime<Utc>,
) -> Result<BTreeMap<DeviceId, Arc<DeviceSnapshot>>, UpstreamError>
where
    F: Fn(DeviceId) -> Option<Arc<DeviceSnapshot>>,
{
    let mut latest: HashMap<i64, (&PositionRecord, Position)> = HashMap::new();
    for record in &fetched.positions {
        let position = validate_position(record)?;
        let newer = latest
            .get(&record.device_id)
            .is_none_or(|(_, current)| position.timestamp > current.timestamp);
        if newer {
            latest.insert(record.device_id, (record, position));
        }
    }

    let mut snapshots = BTreeMap::new();
    for device in &fetched.devices {
        let id = DeviceId(device.id);
        let entry = latest.remove(&device.id);
        let record = entry.as_ref().map(|(r, _)| *r);
        let attributes = merge_attributes(record, device);

        let position = match entry {
            Some((_, position)) if filter.accepts(position.accuracy, &attributes) => {
                Some(position)
            }
            Some((_, rejected)) => {
                debug!(
                    device = device.id,
                    accuracy = rejected.accuracy,
                    "position above accuracy limit, keeping previous"
                );
                previous(id).and_then(|snap| snap.position.clone())
            }
            None => previous(id).and_then(|snap| snap.position.clone()),
        };

        let snapshot = DeviceSnapshot {
            id,
            name: device.name.clone(),
            status: device.status.clone(),
            position,
            geofence: resolve_geofence(record, device, &fetched.geofences),
            attributes,
            captured_at,
        };
        snapshots.insert(id, Arc::new(snapshot));
    }

    if !latest.is_empty() {
        debug!(orphans = latest.len(), "positions for unknown devices ignored");
    }

    Ok(snapshots)
}

// ── Events ─────────────────────────────────────────────────────────

/// `geofenceEnter` -> `geofence_enter`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub(crate) fn device_event(record: EventRecord, device_name: Option<String>) -> DeviceEvent {
    DeviceEvent {
        device_id: DeviceId(record.device_id),
        device_name,
        kind: to_snake_case(&record.event_type),
        event_type: record.event_type,
        time: record.event_time,
        geofence_id: record.geofence_id,
        attributes: record.attributes.unwrap_or_default(),
    }
}
