// ── Session manager ──
//
// Owns the authenticated session for one account. Logins are single
// flight: callers that arrive while a login is running wait for it and
// share its outcome instead of starting their own. A credential
// rejection latches until `set_credentials` is called, so a bad password
// never hammers the server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracklink_api::{Credentials, SessionCookie, TrackClient};

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, add_duration};
use crate::error::AuthError;

/// Login tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// A session older than this is renewed before use.
    pub max_age: Duration,
    /// Login attempts per `ensure_valid` call before giving up.
    pub login_attempts: u32,
    /// Pause between those attempts.
    pub login_backoff: BackoffPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(6 * 60 * 60),
            login_attempts: 3,
            login_backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    cookie: SessionCookie,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Point-in-time view of the session manager.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ever_authenticated: bool,
    pub credentials_rejected: bool,
    pub logins: u64,
}

struct Slot {
    credentials: Credentials,
    session: Option<Session>,
    rejected: Option<String>,
    last_error: Option<AuthError>,
    ever_authenticated: bool,
    next_id: u64,
}

pub struct SessionManager {
    client: TrackClient,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    slot: Mutex<Slot>,
    /// Completed login attempts; lets waiters detect a login they queued behind.
    logins: AtomicU64,
}

impl SessionManager {
    pub fn new(
        client: TrackClient,
        credentials: Credentials,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            clock,
            policy,
            slot: Mutex::new(Slot {
                credentials,
                session: None,
                rejected: None,
                last_error: None,
                ever_authenticated: false,
                next_id: 1,
            }),
            logins: AtomicU64::new(0),
        }
    }

    /// Return a usable session, logging in if there is none or it aged out.
    pub async fn ensure_valid(&self) -> Result<Session, AuthError> {
        let observed = self.logins.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if let Some(message) = &slot.rejected {
            return Err(AuthError::InvalidCredentials {
                message: message.clone(),
            });
        }

        // A login finished while we waited for the lock: share its outcome.
        if self.logins.load(Ordering::Acquire) != observed {
            if let Some(err) = &slot.last_error {
                return Err(err.clone());
            }
        }

        let now = self.clock.now();
        if let Some(session) = slot.session.as_ref().filter(|s| s.is_valid_at(now)) {
            return Ok(session.clone());
        }
        slot.session = None;

        let outcome = self.login(&slot.credentials).await;
        self.logins.fetch_add(1, Ordering::Release);

        match outcome {
            Ok(cookie) => {
                let issued_at = self.clock.now();
                let session = Session {
                    id: slot.next_id,
                    cookie,
                    issued_at,
                    expires_at: add_duration(issued_at, self.policy.max_age),
                };
                slot.next_id += 1;
                slot.session = Some(session.clone());
                slot.last_error = None;
                slot.ever_authenticated = true;
                debug!(expires_at = %session.expires_at, "session established");
                Ok(session)
            }
            Err(err) => {
                if let AuthError::InvalidCredentials { message } = &err {
                    slot.rejected = Some(message.clone());
                }
                slot.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Drop the current session so the next `ensure_valid` logs in again.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.session.take().is_some() {
            debug!("session invalidated");
        }
    }

    /// Drop `session` if it is still the current one. A newer session
    /// obtained by another caller is left alone.
    pub async fn invalidate_session(&self, session: &Session) {
        let mut slot = self.slot.lock().await;
        if slot.session.as_ref().is_some_and(|s| s.id == session.id) {
            slot.session = None;
            debug!("session rejected by server, invalidated");
        }
    }

    /// Replace the credentials and clear any rejection latch.
    pub async fn set_credentials(&self, credentials: Credentials) {
        let mut slot = self.slot.lock().await;
        slot.credentials = credentials;
        slot.session = None;
        slot.rejected = None;
        slot.last_error = None;
        info!("credentials updated");
    }

    /// The latched credential rejection, if any.
    pub async fn rejection(&self) -> Option<AuthError> {
        let slot = self.slot.lock().await;
        slot.rejected
            .as_ref()
            .map(|message| AuthError::InvalidCredentials {
                message: message.clone(),
            })
    }

    pub async fn ever_authenticated(&self) -> bool {
        self.slot.lock().await.ever_authenticated
    }

    /// End the session server-side. Failures are logged, not returned.
    pub async fn logout(&self) {
        let session = self.slot.lock().await.session.take();
        if let Some(session) = session {
            if let Err(e) = self.client.logout(session.cookie()).await {
                warn!(error = %e, "logout failed");
            }
        }
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.slot.lock().await;
        let now = self.clock.now();
        let live = slot.session.as_ref().filter(|s| s.is_valid_at(now));
        SessionStatus {
            authenticated: live.is_some(),
            issued_at: live.map(Session::issued_at),
            expires_at: live.map(Session::expires_at),
            ever_authenticated: slot.ever_authenticated,
            credentials_rejected: slot.rejected.is_some(),
            logins: self.logins.load(Ordering::Acquire),
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn login(&self, credentials: &Credentials) -> Result<SessionCookie, AuthError> {
        let attempts = self.policy.login_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.client.login(credentials).await {
                Ok(cookie) => return Ok(cookie),
                Err(e) if e.is_invalid_credentials() => {
                    warn!(error = %e, "server rejected credentials");
                    return Err(e.into());
                }
                Err(e) if !e.is_transient() => {
                    debug!(error = %e, "login failed, not retrying");
                    return Err(e.into());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        debug!(error = %e, attempts, "login failed");
                        return Err(e.into());
                    }
                    let pause = self.policy.login_backoff.next_delay(attempt - 1);
                    debug!(error = %e, attempt, ?pause, "login failed, retrying");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}
