//! `tracklink poll`: one cycle, then print what consumers would see.

use std::fmt::Write;

use tracklink_core::{GraceMode, PollOutcome, PollResult};

use crate::cli::{GlobalOpts, PollArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

fn summary(result: &PollResult, color: bool) -> String {
    let mut out = String::new();
    let outcome = match &result.outcome {
        PollOutcome::Refreshed { devices } => format!("refreshed {devices} device(s)"),
        PollOutcome::Failed { error } => format!("failed: {error}"),
        PollOutcome::BackingOff { until } => {
            format!("skipped, backing off until {}", util::format_time(Some(*until)))
        }
        PollOutcome::CredentialsRejected => "credentials rejected".into(),
    };
    let _ = writeln!(out, "Mode:         {}", output::mode_label(result.mode, color));
    let _ = writeln!(out, "Outcome:      {outcome}");
    let _ = writeln!(
        out,
        "Last success: {}",
        util::format_time(result.last_success_time)
    );
    if let Some(next) = result.next_retry {
        let _ = writeln!(out, "Next retry:   {}", util::format_time(Some(next)));
    }
    out
}

pub async fn handle(
    resolved: Resolved,
    args: PollArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let tracker = util::build_tracker(&resolved)?;
    let result = if args.force {
        tracker.refresh().await
    } else {
        tracker.poll().await
    };
    tracker.session().logout().await;

    if let Some(err) = result.fatal_auth_error.clone() {
        return Err(CliError::from(err).for_profile(&resolved.profile_name));
    }

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &result,
        |r| {
            format!(
                "{}\n{}",
                summary(r, color),
                util::availability_table(&r.availability)
            )
        },
        |r| {
            r.available()
                .map(|snap| snap.id.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    output::print_output(&out, global.quiet);

    if result.mode == GraceMode::GraceExpired {
        return Err(CliError::GraceExpired);
    }
    Ok(())
}
