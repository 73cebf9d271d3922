//! `tracklink status`: cached state from the state file. No network I/O.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;
use tracklink_core::{Availability, DeviceId, Diagnostics};

use crate::cli::GlobalOpts;
use crate::config::{self, Resolved};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct StatusView {
    profile: String,
    state_file: String,
    tls: String,
    diagnostics: Diagnostics,
    availability: BTreeMap<DeviceId, Availability>,
}

fn detail(view: &StatusView, color: bool) -> String {
    let d = &view.diagnostics;
    let mut out = String::new();
    let _ = writeln!(out, "Profile:       {}", view.profile);
    let _ = writeln!(out, "Server:        {}", d.url);
    let _ = writeln!(out, "TLS:           {}", view.tls);
    let _ = writeln!(out, "State file:    {}", view.state_file);
    let _ = writeln!(
        out,
        "Mode:          {}",
        output::mode_label(d.grace.mode, color)
    );
    let _ = writeln!(
        out,
        "Last success:  {}",
        util::format_time(d.grace.last_success_time)
    );
    if let Some(first) = d.grace.first_failure_time {
        let _ = writeln!(out, "Failing since: {}", util::format_time(Some(first)));
        let _ = writeln!(out, "Failures:      {}", d.grace.failure_count);
    }
    let _ = writeln!(
        out,
        "Poll every:    {}",
        util::format_duration(std::time::Duration::from_secs(d.poll_interval_secs))
    );
    let _ = writeln!(
        out,
        "Grace window:  {}",
        util::format_duration(std::time::Duration::from_secs(d.grace_window_secs))
    );
    let _ = writeln!(out);
    out.push_str(&util::availability_table(&view.availability));
    out
}

pub async fn handle(resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let tracker = util::build_tracker(&resolved)?;
    let current = tracker.current().await;

    let view = StatusView {
        profile: resolved.profile_name.clone(),
        state_file: resolved.state_path.display().to_string(),
        tls: config::describe_tls(&resolved.tracker.tls),
        diagnostics: tracker.diagnostics().await,
        availability: current.availability,
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| detail(v, color),
        |v| v.diagnostics.grace.mode.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
