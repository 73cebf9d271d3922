// ── Domain model ──
//
// Normalized, validated view of a tracked device. Snapshots are what the
// cache stores, what persistence writes, and what consumers read.

mod device;

pub use device::{Availability, DeviceId, DeviceSnapshot, GeofenceRef, Position};

/// Free-form attributes merged from the device and its latest position.
pub type Attributes = tracklink_api::Attributes;
