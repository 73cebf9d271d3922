// ── Core error types ──
//
// Errors surfaced by tracklink-core. Consumers never see HTTP status codes
// or raw decode failures: the `From<tracklink_api::Error>` impls fold
// transport-layer errors into the categories the fetch cycle reacts to.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Outcome of a failed authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthError {
    /// The server refused the credentials. Fatal until they change.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// Login could not complete (network, timeout, 5xx). Retried later.
    #[error("login failed: {message}")]
    Transient { message: String },
}

impl AuthError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidCredentials { .. })
    }
}

/// Failure of a data call against the upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// The session was refused; the caller should re-authenticate.
    #[error("session rejected: {message}")]
    SessionRejected { message: String },
}

impl UpstreamError {
    pub fn is_session_rejected(&self) -> bool {
        matches!(self, Self::SessionRejected { .. })
    }
}

/// Why a fetch cycle did not produce fresh data.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(untagged)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Failure reading or writing persisted state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Unified error type for setup and one-shot operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Cannot connect to tracking server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tracklink_api::Error> for UpstreamError {
    fn from(err: tracklink_api::Error) -> Self {
        use tracklink_api::Error as Api;

        if err.is_timeout() {
            return Self::Timeout {
                message: err.to_string(),
            };
        }

        match err {
            Api::SessionRejected { message } | Api::InvalidCredentials { message } => {
                Self::SessionRejected { message }
            }
            Api::MalformedResponse { message, .. } => Self::MalformedResponse { message },
            other @ (Api::Transport(_)
            | Api::InvalidUrl(_)
            | Api::Timeout { .. }
            | Api::Tls(_)
            | Api::Http { .. }) => Self::Network {
                message: other.to_string(),
            },
        }
    }
}

impl From<tracklink_api::Error> for AuthError {
    fn from(err: tracklink_api::Error) -> Self {
        match err {
            tracklink_api::Error::InvalidCredentials { message } => {
                Self::InvalidCredentials { message }
            }
            other => Self::Transient {
                message: other.to_string(),
            },
        }
    }
}

impl From<tracklink_api::Error> for CoreError {
    fn from(err: tracklink_api::Error) -> Self {
        match err {
            tracklink_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            tracklink_api::Error::Tls(reason) => Self::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {reason}"),
            },
            other => Self::Upstream(other.into()),
        }
    }
}

impl From<FetchError> for CoreError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(e) => Self::Auth(e),
            FetchError::Upstream(e) => Self::Upstream(e),
        }
    }
}
