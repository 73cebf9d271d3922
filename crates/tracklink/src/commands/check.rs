//! `tracklink check`: verify URL, TLS and credentials.

use tracklink_core::ServerInfo;

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

fn detail(info: &ServerInfo) -> String {
    let mut lines = vec![
        "Login:    ok".to_string(),
        format!("Version:  {}", info.version.as_deref().unwrap_or("-")),
    ];
    if let Some(id) = info.id {
        lines.push(format!("Server:   #{id}"));
    }
    lines.join("\n")
}

pub async fn handle(resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let tracker = util::build_tracker(&resolved)?;
    let checked = tracker.check().await;
    tracker.session().logout().await;
    let info = checked.map_err(|e| CliError::from(e).for_profile(&resolved.profile_name))?;

    let out = output::render_single(&global.output, &info, detail, |i| {
        i.version.clone().unwrap_or_default()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
