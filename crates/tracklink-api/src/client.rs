// Tracking server HTTP client
//
// Wraps `reqwest::Client` with URL construction, session cookie injection,
// and response classification. Endpoint groups (auth, resources, reports)
// are implemented as inherent methods in separate files to keep this
// module focused on transport mechanics.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, COOKIE};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::auth::SessionCookie;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Error code the server returns (with HTTP 400) for both a bad login and
/// a request made with a session it no longer recognises.
pub(crate) const AUTH_REJECTED_CODE: &str = "ERROR_004";

const BODY_PREVIEW_CHARS: usize = 200;

/// Error body shape: `{"error": "ERROR_004", "message": "..."}`.
#[derive(serde::Deserialize)]
struct ErrorBody {
    error: Option<serde_json::Value>,
    message: Option<String>,
}

/// Raw HTTP client for a tracking server's REST API.
///
/// Stateless with respect to authentication: every data call takes the
/// [`SessionCookie`] to present, so session ownership stays with the caller.
#[derive(Clone)]
pub struct TrackClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl TrackClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the server root (e.g. `https://app.example.com:443`);
    /// the `/api` prefix is added per request.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
        }
    }

    /// The underlying HTTP client (for auth flows that need direct access).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for an API path: `{base}/api/{path}`.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send an authenticated GET and decode the JSON body.
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        session: &SessionCookie,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .query(query)
            .header(COOKIE, session.header_value())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.parse_response(resp).await
    }

    /// Map a reqwest send/read failure, folding deadline overruns into
    /// [`Error::Timeout`].
    pub(crate) fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    /// Classify the response and decode a success body.
    ///
    /// HTTP 401, and HTTP 400 carrying the auth-rejected code, mean the
    /// session is no longer accepted. Any other non-2xx is [`Error::Http`];
    /// a 2xx body that does not decode is [`Error::MalformedResponse`].
    async fn parse_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::SessionRejected {
                message: "HTTP 401".into(),
            });
        }

        if !status.is_success() {
            if status == StatusCode::BAD_REQUEST {
                if let Some(message) = auth_rejection(&body) {
                    return Err(Error::SessionRejected { message });
                }
            }
            return Err(Error::Http {
                status: status.as_u16(),
                message: preview(&body),
            });
        }

        trace!(bytes = body.len(), "decoding response body");

        serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }
}

/// If `body` is the server's auth-rejected error, return its message.
pub(crate) fn auth_rejection(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let code = match parsed.error? {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    (code == AUTH_REJECTED_CODE).then(|| parsed.message.unwrap_or(code))
}

/// First few characters of a body, for error messages.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}
