//! CLI configuration: thin wrapper around `tracklink_config`.
//!
//! Adds resolution that respects `GlobalOpts` overrides (--server,
//! --email, --insecure, --timeout, --state-file).

use std::path::PathBuf;
use std::time::Duration;

use tracklink_core::{TlsVerification, TrackerConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use tracklink_config::{
    Config, Profile, config_path, keyring_key, load_config_or_default, save_config,
};

/// Everything a command needs to build a `Tracker`.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub tracker: TrackerConfig,
    pub state_path: PathBuf,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve the active profile plus flag overrides into a tracker config.
///
/// Without a matching profile, `--server` alone is enough; credentials
/// then come from `--email` and the password chain.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.server.is_some() => Profile::default(),
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: cfg.available_profiles(),
            });
        }
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    // Flags win over profile values
    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }
    if let Some(ref email) = global.email {
        profile.email = Some(email.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    if let Some(ref path) = global.state_file {
        profile.state_file = Some(path.clone());
    }

    let tracker = tracklink_config::profile_to_tracker_config(&profile, &profile_name, &cfg.defaults)
        .map_err(|e| CliError::from(e).for_profile(&profile_name))?;
    let state_path = tracklink_config::state_path(&profile, &profile_name);

    Ok(Resolved {
        profile_name,
        tracker,
        state_path,
    })
}

/// Parse a humantime duration flag.
pub fn parse_duration_flag(flag: &str, value: &str) -> Result<Duration, CliError> {
    Ok(tracklink_config::parse_duration(flag, value)?)
}

/// One-line TLS description for `status` and `config path`.
pub fn describe_tls(tls: &TlsVerification) -> String {
    match tls {
        TlsVerification::SystemDefaults => "system CA store".into(),
        TlsVerification::CustomCa(path) => format!("custom CA ({})", path.display()),
        TlsVerification::DangerAcceptInvalid => "verification disabled".into(),
    }
}
