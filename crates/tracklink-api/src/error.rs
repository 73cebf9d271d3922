use thiserror::Error;

/// Top-level error type for the `tracklink-api` crate.
///
/// Covers every failure mode of the tracking server API: authentication,
/// transport, HTTP status, and payload decoding. `tracklink-core` maps these
/// into the retriable / fatal taxonomy the fetch cycle works with.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server rejected the account credentials at login.
    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// The server no longer accepts the session cookie.
    #[error("Session rejected by server: {message}")]
    SessionRejected { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Server ──────────────────────────────────────────────────────
    /// Non-2xx response that is not an auth signal.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The response body did not match the expected shape, with the raw
    /// body kept for debugging.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, body: String },
}

impl Error {
    /// Returns `true` if the server refused the session itself, meaning a
    /// fresh login might resolve it.
    pub fn is_session_rejected(&self) -> bool {
        matches!(self, Self::SessionRejected { .. })
    }

    /// Returns `true` if the account credentials were refused.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::InvalidCredentials { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` if the request exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
