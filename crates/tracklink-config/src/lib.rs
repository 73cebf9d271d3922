//! Shared configuration for tracklink.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! state-file locations, and translation to `tracklink_core::TrackerConfig`.
//! The CLI layers its `GlobalOpts` overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tracklink_core::{
    BackoffPolicy, Credentials, PositionFilter, TlsVerification, TrackerConfig,
};

/// Keyring service name for stored passwords.
pub const KEYRING_SERVICE: &str = "tracklink";

/// Environment prefix for config overrides (`TRACKLINK_DEFAULTS__TIMEOUT=10`).
pub const ENV_PREFIX: &str = "TRACKLINK_";

pub const PASSWORD_ENV: &str = "TRACKLINK_PASSWORD";
pub const EMAIL_ENV: &str = "TRACKLINK_EMAIL";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server accounts.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, listing the known names on failure.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.available_profiles(),
            })
    }

    /// Comma-separated sorted profile names, or `(none)`.
    pub fn available_profiles(&self) -> String {
        let mut names: Vec<_> = self.profiles.keys().map(String::as_str).collect();
        if names.is_empty() {
            return "(none)".into();
        }
        names.sort_unstable();
        names.join(", ")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// humantime duration, e.g. `"30s"`, `"2m"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// humantime duration, e.g. `"12h"`.
    #[serde(default = "default_grace_window")]
    pub grace_window: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            grace_window: default_grace_window(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> String {
    "30s".into()
}
fn default_grace_window() -> String {
    "12h".into()
}

/// A named server account.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g., "https://demo.traccar.org").
    pub server: String,

    /// Login email. `username` is accepted for older configs.
    #[serde(alias = "username", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name containing the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Path to custom CA certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_window: Option<String>,

    /// First retry delay after a failed poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base: Option<String>,

    /// Upper bound on the retry delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max: Option<String>,

    /// Discard fixes less precise than this many meters. `0` disables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_accuracy: Option<f64>,

    /// Attributes that exempt a position from the accuracy filter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_accuracy_filter_for: Vec<String>,

    /// Upstream event types to import (camelCase, e.g. "ignitionOn").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,

    /// Override the state file location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl Profile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "tracklink", "tracklink")
}

fn home_fallback(sub: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(sub);
    p.push("tracklink");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding persisted tracker state.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

/// State file for a profile: its `state_file`, else
/// `<data_dir>/state-<profile>.json`.
pub fn state_path(profile: &Profile, profile_name: &str) -> PathBuf {
    profile
        .state_file
        .clone()
        .unwrap_or_else(|| data_dir().join(format!("state-{profile_name}.json")))
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Layer defaults, the TOML file at `path`, then `TRACKLINK_` env vars.
///
/// Nested keys use a double underscore:
/// `TRACKLINK_PROFILES__HOME__POLL_INTERVAL=1m`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account name for a profile's password.
pub fn keyring_key(profile_name: &str) -> String {
    format!("{profile_name}/password")
}

/// Resolve the login email: profile, then `TRACKLINK_EMAIL`.
pub fn resolve_email(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .email
        .clone()
        .or_else(|| std::env::var(EMAIL_ENV).ok())
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Resolve the password from the credential chain.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env, then TRACKLINK_PASSWORD
    let env_names = profile.password_env.as_deref().into_iter().chain([PASSWORD_ENV]);
    for name in env_names {
        if let Ok(pw) = std::env::var(name) {
            return Ok(SecretString::from(pw));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_key(profile_name)) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Credentials, ConfigError> {
    let email = resolve_email(profile, profile_name)?;
    let password = resolve_password(profile, profile_name)?;
    Ok(Credentials::new(email, password))
}

// ── Translation to TrackerConfig ────────────────────────────────────

/// Parse a humantime duration (`"30s"`, `"12h"`), naming the field on error.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}' is not a duration: {e}"),
    })
}

pub fn parse_server_url(value: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = value.parse().map_err(|_| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {value}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "server".into(),
            reason: format!("expected http or https, got '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// Build a `TrackerConfig` from a profile and the global defaults.
///
/// Profile values win over `[defaults]`; unset values keep the
/// `TrackerConfig::new` defaults.
pub fn profile_to_tracker_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<TrackerConfig, ConfigError> {
    let url = parse_server_url(&profile.server)?;
    let credentials = resolve_credentials(profile, profile_name)?;
    let mut config = TrackerConfig::new(url, credentials);

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    let poll = profile.poll_interval.as_deref().unwrap_or(&defaults.poll_interval);
    config.poll_interval = parse_duration("poll_interval", poll)?;
    config.event_interval = config.poll_interval;

    let grace = profile.grace_window.as_deref().unwrap_or(&defaults.grace_window);
    config.grace_window = parse_duration("grace_window", grace)?;

    let backoff = BackoffPolicy::default();
    config.backoff = BackoffPolicy::new(
        match profile.backoff_base.as_deref() {
            Some(v) => parse_duration("backoff_base", v)?,
            None => backoff.base,
        },
        match profile.backoff_max.as_deref() {
            Some(v) => parse_duration("backoff_max", v)?,
            None => backoff.max,
        },
    );
    if config.backoff.max < config.backoff.base {
        return Err(ConfigError::Validation {
            field: "backoff_max".into(),
            reason: "must not be shorter than backoff_base".into(),
        });
    }

    let max_accuracy = profile.max_accuracy.unwrap_or(0.0);
    if !max_accuracy.is_finite() || max_accuracy < 0.0 {
        return Err(ConfigError::Validation {
            field: "max_accuracy".into(),
            reason: "must be a non-negative number of meters".into(),
        });
    }
    config.filter = PositionFilter {
        max_accuracy,
        skip_for: profile.skip_accuracy_filter_for.clone(),
    };
    config.event_types.clone_from(&profile.event_types);

    Ok(config)
}
