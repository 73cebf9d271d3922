//! `tracklink watch`: run the scheduler until interrupted.
//!
//! Prints one line per connectivity change, device event, and snapshot
//! update. With `-o json`/`json-compact` each line is a JSON object.

use tokio::sync::broadcast::error::RecvError;
use tracklink_core::{Tracker, TrackerEvent};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::{self, Resolved};
use crate::error::CliError;
use crate::output;

use super::util;

fn event_line(event: &TrackerEvent, color: bool) -> String {
    match event {
        TrackerEvent::ConnectivityChanged(change) => format!(
            "{}  connectivity {} -> {} (down {})",
            util::format_time(Some(change.at)),
            output::mode_label(change.previous, color),
            output::mode_label(change.current, color),
            util::format_duration(change.downtime),
        ),
        TrackerEvent::Device(event) => format!(
            "{}  {} {}",
            util::format_time(event.time),
            event
                .device_name
                .clone()
                .unwrap_or_else(|| event.device_id.to_string()),
            event.kind,
        ),
    }
}

fn json_lines(format: &OutputFormat) -> bool {
    matches!(format, OutputFormat::Json | OutputFormat::JsonCompact)
}

async fn snapshot_line(tracker: &Tracker, color: bool) -> String {
    let current = tracker.current().await;
    format!(
        "{}  {} device(s) available, mode {}",
        util::format_time(current.last_success_time),
        current.available().count(),
        output::mode_label(current.mode, color),
    )
}

pub async fn handle(
    mut resolved: Resolved,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(ref interval) = args.interval {
        resolved.tracker.poll_interval = config::parse_duration_flag("interval", interval)?;
        resolved.tracker.event_interval = resolved.tracker.effective_poll_interval();
    }
    if !args.event_types.is_empty() {
        resolved.tracker.event_types = args.event_types;
    }

    let tracker = util::build_tracker(&resolved)?;
    let color = output::should_color(&global.color);
    let json = json_lines(&global.output);

    let mut events = tracker.events();
    let mut snapshots = tracker.subscribe_snapshots();
    tracker.start().await;

    if !global.quiet {
        eprintln!(
            "Watching profile '{}' (Ctrl-C to stop)",
            resolved.profile_name
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            received = events.recv() => match received {
                Ok(event) => {
                    let line = if json {
                        serde_json::to_string(&event).unwrap_or_default()
                    } else {
                        event_line(&event, color)
                    };
                    output::print_output(&line, global.quiet);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                if !json {
                    output::print_output(&snapshot_line(&tracker, color).await, global.quiet);
                }
            }
        }
    }

    tracker.shutdown().await;
    Ok(())
}
