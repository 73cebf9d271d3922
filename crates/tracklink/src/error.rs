//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable help.

use miette::Diagnostic;
use thiserror::Error;

use tracklink_config::ConfigError;
use tracklink_core::{AuthError, CoreError, FetchError, UpstreamError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const UNAVAILABLE: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach tracking server at {url}")]
    #[diagnostic(
        code(tracklink::connection_failed),
        help(
            "Check that the server is running and accessible.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out: {message}")]
    #[diagnostic(
        code(tracklink::timeout),
        help("Increase timeout with --timeout or check server responsiveness.")
    )]
    Timeout { message: String },

    #[error("Unexpected response from server: {message}")]
    #[diagnostic(code(tracklink::malformed_response))]
    MalformedResponse { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tracklink::auth_failed),
        help(
            "Verify the email and password for this profile.\n\
             Run: tracklink config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(tracklink::no_credentials),
        help(
            "Configure credentials with: tracklink config init\n\
             Or set TRACKLINK_EMAIL and TRACKLINK_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Availability ─────────────────────────────────────────────────
    #[error("Server unreachable for longer than the grace window")]
    #[diagnostic(
        code(tracklink::grace_expired),
        help("Cached positions are no longer served. Run: tracklink poll --force")
    )]
    GraceExpired,

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tracklink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tracklink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: tracklink config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(tracklink::no_config),
        help(
            "Create one with: tracklink config init\n\
             Or pass --server and --email.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(tracklink::config))]
    Config { message: String },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::MalformedResponse { .. } => {
                exit_code::CONNECTION
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::GraceExpired => exit_code::UNAVAILABLE,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::Config { .. } => exit_code::USAGE,
            Self::Io(_) => exit_code::GENERAL,
        }
    }

    /// Attach the active profile to an auth error.
    pub fn for_profile(self, name: &str) -> Self {
        match self {
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                profile: name.into(),
                message,
            },
            Self::NoCredentials { .. } => Self::NoCredentials {
                profile: name.into(),
            },
            other => other,
        }
    }
}

// ── Core → CliError mapping ──────────────────────────────────────────

impl From<AuthError> for CliError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials { message } => Self::AuthFailed {
                profile: "default".into(),
                message,
            },
            AuthError::Transient { message } => Self::ConnectionFailed {
                url: "(login)".into(),
                reason: message,
            },
        }
    }
}

impl From<UpstreamError> for CliError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout { message } => Self::Timeout { message },
            UpstreamError::MalformedResponse { message } => Self::MalformedResponse { message },
            UpstreamError::Network { message } | UpstreamError::SessionRejected { message } => {
                Self::ConnectionFailed {
                    url: "(upstream)".into(),
                    reason: message,
                }
            }
        }
    }
}

impl From<FetchError> for CliError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(e) => e.into(),
            FetchError::Upstream(e) => e.into(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Auth(e) => e.into(),
            CoreError::Upstream(e) => e.into(),
            CoreError::Config { message } => Self::Config { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => {
                Self::ProfileNotFound { name, available }
            }
            ConfigError::Io(e) => Self::Io(e),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
