// ── Tracker ──
//
// Drives poll cycles for one account: session, fetch, snapshot build,
// grace transition, persistence, and the availability consumers see.
// Cycles are serialized by an async mutex, so grace transitions are
// totally ordered and never persisted out of order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracklink_api::{Credentials, EventQuery, ServerInfo, TrackClient};

use crate::backoff::RetryState;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::convert::{Fetched, build_snapshots, device_event};
use crate::error::{AuthError, CoreError, FetchError, UpstreamError};
use crate::event::{ConnectivityChanged, TrackerEvent};
use crate::grace::{GraceMode, GraceState};
use crate::model::{Availability, DeviceId, DeviceSnapshot};
use crate::session::{Session, SessionManager, SessionStatus};
use crate::store::{PersistedState, SnapshotCache, StateStore};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── PollResult ───────────────────────────────────────────────────

/// What happened in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Fresh data fetched and cached.
    Refreshed { devices: usize },
    /// The cycle failed; cached data stays visible per the grace mode.
    Failed { error: FetchError },
    /// Skipped without a network call; the retry gate is closed.
    BackingOff { until: DateTime<Utc> },
    /// Credentials were refused; nothing is fetched until they change.
    CredentialsRejected,
}

/// Returned to the scheduler after every `poll`/`refresh`.
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub availability: BTreeMap<DeviceId, Availability>,
    pub mode: GraceMode,
    pub outcome: PollOutcome,
    pub last_success_time: Option<DateTime<Utc>>,
    pub next_retry: Option<DateTime<Utc>>,
    /// Set on every cycle while the credentials are rejected.
    pub fatal_auth_error: Option<AuthError>,
}

impl PollResult {
    pub fn is_fatal(&self) -> bool {
        self.fatal_auth_error.is_some()
    }

    pub fn available(&self) -> impl Iterator<Item = &DeviceSnapshot> {
        self.availability.values().filter_map(Availability::snapshot)
    }
}

/// Serializable health report. Never contains credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub url: String,
    pub grace: GraceState,
    pub retry: RetryState,
    pub session: SessionStatus,
    pub devices: usize,
    pub poll_interval_secs: u64,
    pub grace_window_secs: u64,
    pub last_event_import: Option<DateTime<Utc>>,
}

// ── Tracker ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<TrackerInner>`.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    config: TrackerConfig,
    client: TrackClient,
    session: SessionManager,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    cache: SnapshotCache,
    cycle: Mutex<CycleState>,
    last_event_import: Mutex<Option<DateTime<Utc>>>,
    health: watch::Sender<GraceMode>,
    event_tx: broadcast::Sender<TrackerEvent>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

struct CycleState {
    grace: GraceState,
    retry: RetryState,
}

impl Tracker {
    /// Build a tracker and restore persisted state. Does not touch the
    /// network; the first `poll` logs in.
    pub fn new(config: TrackerConfig, store: Arc<dyn StateStore>) -> Result<Self, CoreError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: TrackerConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        let client = TrackClient::new(config.url.clone(), &config.transport())?;
        Ok(Self::with_client(config, client, store, clock))
    }

    /// Build around an existing HTTP client.
    pub fn with_client(
        config: TrackerConfig,
        client: TrackClient,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let persisted = match store.load() {
            Ok(Some(state)) => {
                info!(
                    devices = state.snapshots.len(),
                    mode = %state.grace_mode,
                    "resumed persisted state"
                );
                state
            }
            Ok(None) => {
                debug!("no persisted state, cold start");
                PersistedState::default()
            }
            Err(e) => {
                warn!(error = %e, "persisted state unreadable, cold start");
                PersistedState::default()
            }
        };

        let restored = persisted.grace();
        let grace = restored
            .clone()
            .expire_lapsed(clock.now(), config.grace_window);
        if grace.mode != restored.mode {
            warn!(
                first_failure = ?grace.first_failure_time,
                "grace window ran out while stopped, devices unavailable"
            );
        }
        let cache = SnapshotCache::new();
        cache.replace_all(&persisted.into_snapshots());

        let (health, _) = watch::channel(grace.mode);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let session = SessionManager::new(
            client.clone(),
            config.credentials.clone(),
            config.session,
            Arc::clone(&clock),
        );

        Self {
            inner: Arc::new(TrackerInner {
                client,
                session,
                clock,
                store,
                cache,
                cycle: Mutex::new(CycleState {
                    retry: RetryState::from_grace(&grace),
                    grace,
                }),
                last_event_import: Mutex::new(None),
                health,
                event_tx,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    // ── Poll cycles ──────────────────────────────────────────────

    /// Run one scheduled cycle, honouring the retry gate.
    pub async fn poll(&self) -> PollResult {
        self.run_cycle(false).await
    }

    /// Run a cycle now, ignoring the retry gate (manual reload).
    pub async fn refresh(&self) -> PollResult {
        self.run_cycle(true).await
    }

    async fn run_cycle(&self, force: bool) -> PollResult {
        let inner = &self.inner;
        let mut cycle = inner.cycle.lock().await;

        if let Some(err) = inner.session.rejection().await {
            error!(error = %err, "credentials rejected, update them to resume polling");
            self.record_failure(&mut cycle, false);
            return self.result(&mut cycle, PollOutcome::CredentialsRejected, Some(err));
        }

        let now = inner.clock.now();
        let gate = cycle
            .retry
            .next_eligible_retry
            .filter(|_| !force && !cycle.retry.is_eligible(now));
        if let Some(until) = gate {
            debug!(%until, "backing off, serving cached data");
            return self.result(&mut cycle, PollOutcome::BackingOff { until }, None);
        }

        let fetched = match self.fetch().await {
            Ok(fetched) => fetched,
            Err(FetchError::Auth(err)) if err.is_fatal() => {
                error!(error = %err, "credentials rejected, update them to resume polling");
                self.record_failure(&mut cycle, false);
                return self.result(&mut cycle, PollOutcome::CredentialsRejected, Some(err));
            }
            Err(err) => {
                return self.fail_cycle(&mut cycle, err);
            }
        };

        let now = inner.clock.now();
        let snapshots = match build_snapshots(
            &fetched,
            |id| inner.cache.get(id),
            &inner.config.filter,
            now,
        ) {
            Ok(snapshots) => snapshots,
            Err(err) => return self.fail_cycle(&mut cycle, err.into()),
        };

        let devices = snapshots.len();
        let next = cycle.grace.record_outcome(true, now, inner.config.grace_window);
        self.commit(&mut cycle, next, Some(&snapshots), now);
        cycle.retry.reset();
        debug!(devices, "poll succeeded");

        self.result(&mut cycle, PollOutcome::Refreshed { devices }, None)
    }

    fn fail_cycle(&self, cycle: &mut CycleState, err: FetchError) -> PollResult {
        let delay = self.record_failure(cycle, true);
        debug!(
            error = %err,
            failures = cycle.retry.failures,
            retry_in = ?delay,
            "poll failed"
        );
        self.result(cycle, PollOutcome::Failed { error: err }, None)
    }

    /// Apply a failed outcome to grace (and optionally the retry gate),
    /// then persist.
    fn record_failure(&self, cycle: &mut CycleState, gate: bool) -> Option<Duration> {
        let now = self.inner.clock.now();
        let delay = gate.then(|| cycle.retry.record_failure(now, &self.inner.config.backoff));
        let next = cycle
            .grace
            .record_outcome(false, now, self.inner.config.grace_window);
        self.commit(cycle, next, None, now);
        delay
    }

    async fn fetch(&self) -> Result<Fetched, FetchError> {
        let session = self.inner.session.ensure_valid().await?;
        match self.fetch_with(&session).await {
            Err(err) if err.is_session_rejected() => {
                debug!(error = %err, "session rejected, logging in again");
                self.inner.session.invalidate_session(&session).await;

                let session = self.inner.session.ensure_valid().await?;
                let retried = self.fetch_with(&session).await;
                if retried.as_ref().is_err_and(UpstreamError::is_session_rejected) {
                    self.inner.session.invalidate_session(&session).await;
                }
                retried.map_err(FetchError::from)
            }
            other => other.map_err(FetchError::from),
        }
    }

    async fn fetch_with(&self, session: &Session) -> Result<Fetched, UpstreamError> {
        let client = &self.inner.client;
        let cookie = session.cookie();
        let (devices, positions, geofences) = tokio::join!(
            client.list_devices(cookie),
            client.list_positions(cookie),
            client.list_geofences(cookie),
        );

        let geofences = geofences.unwrap_or_else(|e| {
            debug!(error = %e, "geofence listing failed, continuing without");
            Vec::new()
        });

        Ok(Fetched {
            devices: devices?,
            positions: positions?,
            geofences,
        })
    }

    /// Persist the next grace state together with the cache it belongs
    /// to, then apply both in memory and announce any mode change.
    fn commit(
        &self,
        cycle: &mut CycleState,
        next: GraceState,
        fresh: Option<&BTreeMap<DeviceId, Arc<DeviceSnapshot>>>,
        now: DateTime<Utc>,
    ) {
        let inner = &self.inner;
        let record = match fresh {
            Some(snapshots) => PersistedState::new(&next, snapshots),
            None => PersistedState::new(&next, &inner.cache.to_map()),
        };
        if let Err(e) = inner.store.save(&record) {
            warn!(error = %e, "failed to persist tracker state");
        }

        if let Some(snapshots) = fresh {
            inner.cache.replace_all(snapshots);
        }

        let previous = std::mem::replace(&mut cycle.grace, next);
        let current = cycle.grace.mode;
        if previous.mode == current {
            return;
        }

        let downtime = if previous.first_failure_time.is_some() {
            previous.downtime(now)
        } else {
            cycle.grace.downtime(now)
        };

        match current {
            GraceMode::Connected => {
                info!(previous = %previous.mode, ?downtime, "connection restored");
            }
            GraceMode::Reconnecting => {
                info!("upstream unreachable, serving cached data");
            }
            GraceMode::GraceExpired => {
                warn!(?downtime, "grace window expired, devices unavailable");
            }
        }

        inner.health.send_replace(current);
        // No receivers is fine.
        let _ = inner
            .event_tx
            .send(TrackerEvent::ConnectivityChanged(ConnectivityChanged {
                previous: previous.mode,
                current,
                downtime,
                at: now,
            }));
    }

    /// Enforce the grace window on an idle tracker: a `Reconnecting` state
    /// that outlived it expires now instead of at the next failed cycle.
    fn expire_lapsed(&self, cycle: &mut CycleState) {
        let now = self.inner.clock.now();
        if cycle.grace.has_lapsed(now, self.inner.config.grace_window) {
            let next = cycle
                .grace
                .clone()
                .expire_lapsed(now, self.inner.config.grace_window);
            self.commit(cycle, next, None, now);
        }
    }

    fn availability(&self, grace: &GraceState) -> BTreeMap<DeviceId, Availability> {
        let serve = grace.should_serve_cache();
        self.inner
            .cache
            .snapshot()
            .iter()
            .map(|snap| {
                let availability = if serve {
                    Availability::Available {
                        snapshot: Arc::clone(snap),
                    }
                } else {
                    Availability::Unavailable {
                        last_captured: snap.captured_at,
                    }
                };
                (snap.id, availability)
            })
            .collect()
    }

    fn result(
        &self,
        cycle: &mut CycleState,
        outcome: PollOutcome,
        fatal_auth_error: Option<AuthError>,
    ) -> PollResult {
        self.expire_lapsed(cycle);
        PollResult {
            availability: self.availability(&cycle.grace),
            mode: cycle.grace.mode,
            outcome,
            last_success_time: cycle.grace.last_success_time,
            next_retry: cycle.retry.next_eligible_retry,
            fatal_auth_error,
        }
    }

    // ── Events ───────────────────────────────────────────────────

    /// Import device events reported since the previous import and
    /// broadcast them. Failures are logged and yield zero events.
    pub async fn import_events(&self) -> usize {
        let inner = &self.inner;
        if inner.config.event_types.is_empty() {
            return 0;
        }

        let mut last = inner.last_event_import.lock().await;
        let now = inner.clock.now();
        let from = last.unwrap_or_else(|| {
            chrono::TimeDelta::from_std(inner.config.event_interval)
                .ok()
                .and_then(|lookback| now.checked_sub_signed(lookback))
                .unwrap_or(now)
        });

        let devices = inner.cache.snapshot();
        if devices.is_empty() {
            *last = Some(now);
            return 0;
        }

        let query = EventQuery {
            device_ids: devices.iter().map(|snap| snap.id.0).collect(),
            from: Some(from),
            to: now,
            types: inner.config.event_types.clone(),
        };

        let session = match inner.session.ensure_valid().await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "event import skipped");
                return 0;
            }
        };

        let records = match inner.client.list_events(session.cookie(), &query).await {
            Ok(records) => records,
            Err(e) => {
                if e.is_session_rejected() {
                    inner.session.invalidate_session(&session).await;
                }
                debug!(error = %e, "event import failed");
                return 0;
            }
        };

        *last = Some(now);
        let count = records.len();
        for record in records {
            let name = inner
                .cache
                .get(DeviceId(record.device_id))
                .map(|snap| snap.name.clone());
            let _ = inner.event_tx.send(TrackerEvent::Device(device_event(record, name)));
        }
        if count > 0 {
            debug!(count, "imported device events");
        }
        count
    }

    // ── Credentials & lifecycle ──────────────────────────────────

    /// Replace credentials and clear a rejection. The next cycle logs in
    /// and runs regardless of the retry gate.
    pub async fn set_credentials(&self, credentials: Credentials) {
        self.inner.session.set_credentials(credentials).await;
        self.inner.cycle.lock().await.retry.next_eligible_retry = None;
    }

    /// Log in and fetch server info. Does not change grace state.
    pub async fn check(&self) -> Result<ServerInfo, CoreError> {
        let session = self.inner.session.ensure_valid().await?;
        match self.inner.client.server_info(session.cookie()).await {
            Ok(info) => Ok(info),
            Err(e) => {
                if e.is_session_rejected() {
                    self.inner.session.invalidate_session(&session).await;
                }
                Err(e.into())
            }
        }
    }

    /// Spawn the background poll loop (and event import when configured).
    pub async fn start(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        let period = self.inner.config.effective_poll_interval();
        handles.push(tokio::spawn(poll_task(
            self.clone(),
            period,
            self.inner.cancel.clone(),
        )));

        if !self.inner.config.event_types.is_empty() {
            handles.push(tokio::spawn(event_task(
                self.clone(),
                self.inner.config.event_interval,
                self.inner.cancel.clone(),
            )));
        }
        info!(interval = ?period, "tracker started");
    }

    /// Stop background tasks and end the session.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.session.logout().await;
        debug!("tracker stopped");
    }

    // ── State accessors ──────────────────────────────────────────

    /// Current grace mode, pushed on every transition.
    pub fn health(&self) -> watch::Receiver<GraceMode> {
        self.inner.health.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn snapshots(&self) -> Arc<Vec<Arc<DeviceSnapshot>>> {
        self.inner.cache.snapshot()
    }

    pub fn snapshot(&self, id: DeviceId) -> Option<Arc<DeviceSnapshot>> {
        self.inner.cache.get(id)
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<Vec<Arc<DeviceSnapshot>>>> {
        self.inner.cache.subscribe()
    }

    pub async fn grace_state(&self) -> GraceState {
        let mut cycle = self.inner.cycle.lock().await;
        self.expire_lapsed(&mut cycle);
        cycle.grace.clone()
    }

    /// Availability as of the last completed cycle, without polling.
    pub async fn current(&self) -> PollResult {
        let mut cycle = self.inner.cycle.lock().await;
        let outcome = match cycle.retry.next_eligible_retry {
            Some(until) => PollOutcome::BackingOff { until },
            None => PollOutcome::Refreshed {
                devices: self.inner.cache.len(),
            },
        };
        let fatal = self.inner.session.rejection().await;
        self.result(&mut cycle, outcome, fatal)
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let (grace, retry) = {
            let mut cycle = self.inner.cycle.lock().await;
            self.expire_lapsed(&mut cycle);
            (cycle.grace.clone(), cycle.retry.clone())
        };
        Diagnostics {
            url: self.inner.config.url.to_string(),
            grace,
            retry,
            session: self.inner.session.status().await,
            devices: self.inner.cache.len(),
            poll_interval_secs: self.inner.config.effective_poll_interval().as_secs(),
            grace_window_secs: self.inner.config.grace_window.as_secs(),
            last_event_import: *self.inner.last_event_import.lock().await,
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn poll_task(tracker: Tracker, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tracker.poll().await;
            }
        }
    }
}

async fn event_task(tracker: Tracker, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // first poll runs before the first import

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tracker.import_events().await;
            }
        }
    }
}
