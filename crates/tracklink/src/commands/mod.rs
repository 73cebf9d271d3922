//! Command dispatch: bridges CLI args -> tracker operations -> output.

pub mod check;
pub mod config_cmd;
pub mod events;
pub mod poll;
pub mod status;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a server-bound command to its handler.
pub async fn dispatch(
    cmd: Command,
    resolved: Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Poll(args) => poll::handle(resolved, args, global).await,
        Command::Watch(args) => watch::handle(resolved, args, global).await,
        Command::Status => status::handle(resolved, global).await,
        Command::Check => check::handle(resolved, global).await,
        Command::Events(args) => events::handle(resolved, args, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "handled before dispatch".into(),
        }),
    }
}
