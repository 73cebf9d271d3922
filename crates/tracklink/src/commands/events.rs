//! `tracklink events`: import recent device events once.

use tabled::Tabled;
use tokio::sync::broadcast::error::TryRecvError;
use tracklink_core::{DeviceEvent, PollOutcome, TrackerEvent};

use crate::cli::{EventsArgs, GlobalOpts};
use crate::config::{self, Resolved};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Event")]
    kind: String,
    #[tabled(rename = "Geofence")]
    geofence: String,
}

impl EventRow {
    fn new(e: &DeviceEvent) -> Self {
        Self {
            time: util::format_time(e.time),
            device: e
                .device_name
                .clone()
                .unwrap_or_else(|| e.device_id.to_string()),
            kind: e.kind.clone(),
            geofence: e
                .geofence_id
                .map_or_else(|| "-".into(), |id| id.to_string()),
        }
    }
}

pub async fn handle(
    mut resolved: Resolved,
    args: EventsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if !args.event_types.is_empty() {
        resolved.tracker.event_types = args.event_types;
    }
    if resolved.tracker.event_types.is_empty() {
        return Err(CliError::Validation {
            field: "type".into(),
            reason: "no event types given; pass --type or set event_types on the profile".into(),
        });
    }
    resolved.tracker.event_interval = config::parse_duration_flag("since", &args.since)?;

    let tracker = util::build_tracker(&resolved)?;

    // The device list scopes the query; refresh it unless the cache will do.
    let result = tracker.poll().await;
    if let Some(err) = result.fatal_auth_error {
        tracker.session().logout().await;
        return Err(CliError::from(err).for_profile(&resolved.profile_name));
    }
    if let PollOutcome::Failed { error } = result.outcome {
        if tracker.snapshots().is_empty() {
            tracker.session().logout().await;
            return Err(error.into());
        }
        tracing::warn!(error = %error, "device refresh failed, using cached device list");
    }

    let mut rx = tracker.events();
    tracker.import_events().await;
    tracker.session().logout().await;

    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(TrackerEvent::Device(event)) => events.push(event),
            Ok(TrackerEvent::ConnectivityChanged(_)) => {}
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event buffer overflowed");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let out = output::render_list(&global.output, &events, EventRow::new, |e| {
        format!("{} {}", e.device_id, e.kind)
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
