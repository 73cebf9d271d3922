// Session authentication
//
// Cookie-based login/logout. The login endpoint answers with a
// `Set-Cookie` session; the cookie is handed back to the caller as a
// `SessionCookie` instead of living in a shared jar, so whoever owns the
// session decides when it is dropped.

use reqwest::StatusCode;
use reqwest::header::{COOKIE, HeaderMap, SET_COOKIE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::client::{TrackClient, auth_rejection, preview};
use crate::error::Error;

/// Account credentials for the tracking server.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
        }
    }
}

/// The `Cookie` header value identifying an authenticated session.
#[derive(Debug, Clone)]
pub struct SessionCookie(SecretString);

impl SessionCookie {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Raw header value (e.g. `"JSESSIONID=abc123"`).
    pub fn header_value(&self) -> &str {
        self.0.expose_secret()
    }
}

impl TrackClient {
    /// Authenticate with email/password and return the session cookie.
    ///
    /// `POST /api/session`. HTTP 401, or HTTP 400 with the auth-rejected
    /// error code, is reported as [`Error::InvalidCredentials`]; anything
    /// else non-2xx is [`Error::Http`].
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionCookie, Error> {
        let url = self.api_url("session")?;

        debug!("logging in at {}", url);

        let body = json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
            "remember_me": "true",
        });

        let resp = self
            .http()
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if status.is_success() {
            let cookie =
                session_cookie(resp.headers()).ok_or_else(|| Error::MalformedResponse {
                    message: "login succeeded but no session cookie was set".into(),
                    body: String::new(),
                })?;
            debug!("login successful");
            return Ok(cookie);
        }

        let text = resp.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidCredentials {
                message: "HTTP 401".into(),
            });
        }
        if status == StatusCode::BAD_REQUEST {
            if let Some(message) = auth_rejection(&text) {
                return Err(Error::InvalidCredentials { message });
            }
        }

        Err(Error::Http {
            status: status.as_u16(),
            message: format!("login failed: {}", preview(&text)),
        })
    }

    /// End the session on the server (`DELETE /api/session`).
    pub async fn logout(&self, session: &SessionCookie) -> Result<(), Error> {
        let url = self.api_url("session")?;

        debug!("logging out at {}", url);

        let _resp = self
            .http()
            .delete(url)
            .header(COOKIE, session.header_value())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        debug!("logout complete");
        Ok(())
    }
}

/// Collect the `name=value` pairs of every `Set-Cookie` header into a
/// single `Cookie` header value.
fn session_cookie(headers: &HeaderMap) -> Option<SessionCookie> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(SessionCookie::new(pairs.join("; ")))
    }
}
