#![allow(clippy::unwrap_used)]
// Integration tests for `Tracker` poll cycles against a wiremock upstream.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tracklink_core::{
    Availability, BackoffPolicy, Clock, Credentials, DeviceId, DeviceSnapshot, FetchError,
    FileStateStore, GraceMode, ManualClock, MemoryStateStore, PersistedState, PollOutcome,
    Position, SessionPolicy, StateStore, Tracker, TrackerConfig, TrackerEvent, UpstreamError,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
}

fn credentials(password: &str) -> Credentials {
    Credentials::new("fleet@example.com", SecretString::from(password.to_string()))
}

fn config(server: &MockServer) -> TrackerConfig {
    let mut config = TrackerConfig::new(Url::parse(&server.uri()).unwrap(), credentials("pw"));
    config.timeout = Duration::from_secs(5);
    config.session = SessionPolicy {
        max_age: Duration::from_secs(6 * 3600),
        login_attempts: 2,
        login_backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5)),
    };
    config
}

struct Harness {
    server: MockServer,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStateStore>,
    tracker: Tracker,
}

async fn harness_with(store: MemoryStateStore, tweak: impl FnOnce(&mut TrackerConfig)) -> Harness {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(store);
    let mut cfg = config(&server);
    tweak(&mut cfg);
    let tracker = Tracker::with_clock(cfg, store.clone(), clock.clone()).unwrap();
    Harness {
        server,
        clock,
        store,
        tracker,
    }
}

async fn harness() -> Harness {
    harness_with(MemoryStateStore::new(), |_| {}).await
}

fn login_ok() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", "JSESSIONID=live; Path=/; HttpOnly")
        .set_body_json(json!({ "id": 1 }))
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/session"))
        .respond_with(login_ok())
        .mount(server)
        .await;
}

fn devices_body() -> serde_json::Value {
    json!([
        { "id": 1, "name": "Van", "status": "online" },
        { "id": 2, "name": "Bike", "status": "offline" }
    ])
}

fn positions_body(van_lat: f64) -> serde_json::Value {
    json!([
        {
            "deviceId": 1,
            "latitude": van_lat,
            "longitude": 9.19,
            "accuracy": 5.0,
            "speed": 12.0,
            "course": 90.0,
            "fixTime": "2025-06-01T07:59:00Z",
            "attributes": { "ignition": true }
        },
        {
            "deviceId": 2,
            "latitude": 41.9028,
            "longitude": 12.4964,
            "fixTime": "2025-06-01T07:58:00Z"
        }
    ])
}

async fn mount_fleet(server: &MockServer, van_lat: f64) {
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/positions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(positions_body(van_lat)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/geofences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mount_outage(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(server)
        .await;
}

fn van_latitude(availability: &Availability) -> f64 {
    availability
        .snapshot()
        .and_then(|snap| snap.position.as_ref())
        .map(|pos| pos.latitude)
        .unwrap()
}

fn cached_snapshot(id: i64, lat: f64, captured_at: DateTime<Utc>) -> DeviceSnapshot {
    DeviceSnapshot {
        id: DeviceId(id),
        name: "Van".into(),
        status: Some("online".into()),
        position: Some(Position {
            latitude: lat,
            longitude: 9.19,
            accuracy: 5.0,
            altitude: 0.0,
            speed: 0.0,
            course: 0.0,
            timestamp: captured_at,
            address: None,
        }),
        geofence: None,
        attributes: tracklink_core::Attributes::new(),
        captured_at,
    }
}

fn seeded(mode: GraceMode, first_failure: Option<DateTime<Utc>>) -> MemoryStateStore {
    let captured = t0() - TimeDelta::hours(14);
    MemoryStateStore::with_state(PersistedState {
        grace_mode: mode,
        first_failure_time: first_failure,
        failure_count: 5,
        last_success_time: Some(captured),
        snapshots: [(DeviceId(1), cached_snapshot(1, 44.0, captured))]
            .into_iter()
            .collect(),
    })
}

// ── Scenario tests ──────────────────────────────────────────────────

#[tokio::test]
async fn test_fresh_start_first_poll_succeeds() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.4642).await;

    let result = h.tracker.poll().await;

    assert_eq!(result.outcome, PollOutcome::Refreshed { devices: 2 });
    assert_eq!(result.mode, GraceMode::Connected);
    assert_eq!(result.last_success_time, Some(t0()));
    assert!(result.fatal_auth_error.is_none());
    assert_eq!(result.availability.len(), 2);
    assert!((van_latitude(&result.availability[&DeviceId(1)]) - 45.4642).abs() < 1e-9);

    let bike = result.availability[&DeviceId(2)].snapshot().unwrap();
    let pos = bike.position.as_ref().unwrap();
    assert!((pos.latitude - 41.9028).abs() < 1e-9);
    assert!((pos.longitude - 12.4964).abs() < 1e-9);

    let saved = h.store.current().unwrap();
    assert_eq!(saved.grace_mode, GraceMode::Connected);
    assert_eq!(saved.snapshots.len(), 2);
}

#[tokio::test]
async fn test_failures_within_window_keep_serving_cache() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.4642).await;
    h.tracker.poll().await;

    h.server.reset().await;
    mount_login(&h.server).await;
    mount_outage(&h.server).await;

    let mut delays = Vec::new();
    for _ in 0..3 {
        h.clock.advance(Duration::from_secs(5 * 60));
        let result = h.tracker.poll().await;

        assert!(matches!(result.outcome, PollOutcome::Failed { .. }));
        assert_eq!(result.mode, GraceMode::Reconnecting);
        assert!((van_latitude(&result.availability[&DeviceId(1)]) - 45.4642).abs() < 1e-9);

        let next = result.next_retry.unwrap();
        delays.push((next - h.clock.now()).num_seconds());
    }

    assert_eq!(delays, vec![30, 60, 120]);
    let grace = h.tracker.grace_state().await;
    assert_eq!(grace.failure_count, 3);
    assert_eq!(grace.first_failure_time, Some(t0() + TimeDelta::minutes(5)));
    assert_eq!(h.store.current().unwrap().grace_mode, GraceMode::Reconnecting);
}

#[tokio::test]
async fn test_failure_past_window_expires_grace() {
    let first_failure = t0() - TimeDelta::hours(11);
    let h = harness_with(seeded(GraceMode::Reconnecting, Some(first_failure)), |_| {}).await;
    mount_login(&h.server).await;
    mount_outage(&h.server).await;

    let mut health = h.tracker.health();
    let mut events = h.tracker.events();
    assert_eq!(*health.borrow_and_update(), GraceMode::Reconnecting);

    h.clock.advance(Duration::from_secs(2 * 3600));
    let result = h.tracker.poll().await;

    assert_eq!(result.mode, GraceMode::GraceExpired);
    assert_eq!(
        result.availability[&DeviceId(1)],
        Availability::Unavailable {
            last_captured: t0() - TimeDelta::hours(14)
        }
    );
    assert_eq!(result.available().count(), 0);
    assert!(health.has_changed().unwrap());
    assert_eq!(*health.borrow_and_update(), GraceMode::GraceExpired);

    match events.try_recv().unwrap() {
        TrackerEvent::ConnectivityChanged(change) => {
            assert_eq!(change.previous, GraceMode::Reconnecting);
            assert_eq!(change.current, GraceMode::GraceExpired);
            assert_eq!(change.downtime, Duration::from_secs(13 * 3600));
        }
        other => panic!("expected connectivity change, got {other:?}"),
    }

    let saved = h.store.current().unwrap();
    assert_eq!(saved.grace_mode, GraceMode::GraceExpired);
    assert_eq!(saved.first_failure_time, Some(first_failure));
}

#[tokio::test]
async fn test_restored_state_past_window_is_unavailable() {
    let first_failure = t0() - TimeDelta::hours(13);
    let h = harness_with(seeded(GraceMode::Reconnecting, Some(first_failure)), |_| {}).await;

    assert_eq!(*h.tracker.health().borrow(), GraceMode::GraceExpired);

    let result = h.tracker.current().await;
    assert_eq!(result.mode, GraceMode::GraceExpired);
    assert_eq!(result.available().count(), 0);
    assert_eq!(
        result.availability[&DeviceId(1)],
        Availability::Unavailable {
            last_captured: t0() - TimeDelta::hours(14)
        }
    );

    let grace = h.tracker.grace_state().await;
    assert_eq!(grace.first_failure_time, Some(first_failure));
    assert_eq!(grace.failure_count, 5);
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_idle_tracker_expires_when_window_lapses() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.0).await;
    h.tracker.poll().await;

    h.server.reset().await;
    mount_login(&h.server).await;
    mount_outage(&h.server).await;
    assert_eq!(h.tracker.poll().await.mode, GraceMode::Reconnecting);

    let mut events = h.tracker.events();
    h.clock.advance(Duration::from_secs(12 * 3600));
    let result = h.tracker.current().await;

    assert_eq!(result.mode, GraceMode::GraceExpired);
    assert!(result.availability.values().all(|a| !a.is_available()));
    assert_eq!(*h.tracker.health().borrow(), GraceMode::GraceExpired);
    match events.try_recv().unwrap() {
        TrackerEvent::ConnectivityChanged(change) => {
            assert_eq!(change.previous, GraceMode::Reconnecting);
            assert_eq!(change.current, GraceMode::GraceExpired);
            assert_eq!(change.downtime, Duration::from_secs(12 * 3600));
        }
        other => panic!("expected connectivity change, got {other:?}"),
    }
    assert_eq!(h.store.current().unwrap().grace_mode, GraceMode::GraceExpired);
}

#[tokio::test]
async fn test_recovery_from_expired_clears_unavailability() {
    let first_failure = t0() - TimeDelta::hours(13);
    let h = harness_with(seeded(GraceMode::GraceExpired, Some(first_failure)), |_| {}).await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.5).await;
    let mut events = h.tracker.events();

    let result = h.tracker.poll().await;

    assert_eq!(result.mode, GraceMode::Connected);
    assert_eq!(result.last_success_time, Some(t0()));
    assert!(result.availability.values().all(Availability::is_available));
    assert!((van_latitude(&result.availability[&DeviceId(1)]) - 45.5).abs() < 1e-9);

    match events.try_recv().unwrap() {
        TrackerEvent::ConnectivityChanged(change) => {
            assert_eq!(change.previous, GraceMode::GraceExpired);
            assert_eq!(change.current, GraceMode::Connected);
            assert_eq!(change.downtime, Duration::from_secs(13 * 3600));
        }
        other => panic!("expected connectivity change, got {other:?}"),
    }

    let grace = h.tracker.grace_state().await;
    assert_eq!(grace.failure_count, 0);
    assert_eq!(grace.first_failure_time, None);
}

#[tokio::test]
async fn test_invalid_credentials_are_fatal_until_replaced() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/session"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "ERROR_004" })))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_fleet(&h.server, 45.0).await;

    for _ in 0..4 {
        let result = h.tracker.poll().await;
        assert!(result.is_fatal(), "expected fatal result, got {result:?}");
        assert_eq!(result.outcome, PollOutcome::CredentialsRejected);
        h.clock.advance(Duration::from_secs(60));
    }
    let manual = h.tracker.refresh().await;
    assert!(manual.is_fatal());
    h.server.verify().await;

    h.server.reset().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.0).await;
    h.tracker.set_credentials(credentials("correct")).await;

    let result = h.tracker.poll().await;
    assert!(!result.is_fatal());
    assert_eq!(result.outcome, PollOutcome::Refreshed { devices: 2 });
    assert_eq!(result.mode, GraceMode::Connected);
}

// ── Retry gate tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_retry_gate_skips_network() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_outage(&h.server).await;

    let failed = h.tracker.poll().await;
    assert!(matches!(failed.outcome, PollOutcome::Failed { .. }));
    let requests_after_failure = h.server.received_requests().await.unwrap().len();

    h.clock.advance(Duration::from_secs(10));
    let skipped = h.tracker.poll().await;
    assert_eq!(
        skipped.outcome,
        PollOutcome::BackingOff {
            until: t0() + TimeDelta::seconds(30)
        }
    );
    assert_eq!(
        h.server.received_requests().await.unwrap().len(),
        requests_after_failure
    );

    let forced = h.tracker.refresh().await;
    assert!(matches!(forced.outcome, PollOutcome::Failed { .. }));
    assert!(h.server.received_requests().await.unwrap().len() > requests_after_failure);
}

#[tokio::test]
async fn test_success_resets_retry_gate() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_outage(&h.server).await;
    h.tracker.poll().await;

    h.server.reset().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.0).await;
    h.clock.advance(Duration::from_secs(30));

    let result = h.tracker.poll().await;
    assert_eq!(result.outcome, PollOutcome::Refreshed { devices: 2 });
    assert_eq!(result.next_retry, None);
    assert_eq!(h.tracker.diagnostics().await.retry.failures, 0);
}

// ── Upstream behaviour tests ────────────────────────────────────────

#[tokio::test]
async fn test_rejected_session_relogs_within_cycle() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/session"))
        .respond_with(login_ok())
        .expect(2)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    mount_fleet(&h.server, 45.0).await;

    let result = h.tracker.poll().await;

    assert_eq!(result.outcome, PollOutcome::Refreshed { devices: 2 });
    assert_eq!(result.mode, GraceMode::Connected);
}

#[tokio::test]
async fn test_malformed_positions_fail_cycle_and_keep_cache() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.0).await;
    h.tracker.poll().await;

    h.server.reset().await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 123.0).await;
    h.clock.advance(Duration::from_secs(60));

    let result = h.tracker.poll().await;

    match &result.outcome {
        PollOutcome::Failed {
            error: FetchError::Upstream(UpstreamError::MalformedResponse { .. }),
        } => {}
        other => panic!("expected malformed failure, got {other:?}"),
    }
    assert_eq!(result.mode, GraceMode::Reconnecting);
    assert!((van_latitude(&result.availability[&DeviceId(1)]) - 45.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_geofence_failure_is_not_fatal() {
    let h = harness().await;
    mount_login(&h.server).await;
    Mock::given(method("GET"))
        .and(path("/api/geofences"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;
    mount_fleet(&h.server, 45.0).await;

    let result = h.tracker.poll().await;
    assert_eq!(result.outcome, PollOutcome::Refreshed { devices: 2 });
}

#[tokio::test]
async fn test_removed_devices_are_pruned() {
    let h = harness_with(seeded(GraceMode::Connected, None), |_| {}).await;
    mount_login(&h.server).await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": 2, "name": "Bike" }])),
        )
        .mount(&h.server)
        .await;
    mount_fleet(&h.server, 45.0).await;

    let result = h.tracker.poll().await;

    assert_eq!(result.availability.keys().copied().collect::<Vec<_>>(), vec![DeviceId(2)]);
    assert!(h.tracker.snapshot(DeviceId(1)).is_none());
}

// ── Concurrency tests ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_login() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/session"))
        .respond_with(login_ok().set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&h.server)
        .await;

    let calls = (0..8).map(|_| {
        let tracker = h.tracker.clone();
        tokio::spawn(async move { tracker.session().ensure_valid().await })
    });
    let sessions = futures_util::future::join_all(calls).await;

    for session in sessions {
        let session = session.unwrap().unwrap();
        assert_eq!(session.cookie().header_value(), "JSESSIONID=live");
    }
    assert_eq!(h.tracker.session().status().await.logins, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_poll_and_reload_are_serialized() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/session"))
        .respond_with(login_ok())
        .expect(1)
        .mount(&h.server)
        .await;
    mount_fleet(&h.server, 45.0).await;

    let (scheduled, manual) = tokio::join!(h.tracker.poll(), h.tracker.refresh());

    assert_eq!(scheduled.mode, GraceMode::Connected);
    assert_eq!(manual.mode, GraceMode::Connected);
    assert_eq!(h.store.current().unwrap().snapshots.len(), 2);
}

// ── Persistence tests ───────────────────────────────────────────────

#[tokio::test]
async fn test_restart_resumes_downtime_accounting() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state-default.json");
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::new(t0()));

    mount_login(&server).await;
    mount_fleet(&server, 45.0).await;
    {
        let store = Arc::new(FileStateStore::new(&state_path));
        let tracker = Tracker::with_clock(config(&server), store, clock.clone()).unwrap();
        tracker.poll().await;

        server.reset().await;
        mount_login(&server).await;
        mount_outage(&server).await;
        clock.advance(Duration::from_secs(3600));
        assert_eq!(tracker.poll().await.mode, GraceMode::Reconnecting);
    }

    clock.advance(Duration::from_secs(11 * 3600));
    let store = Arc::new(FileStateStore::new(&state_path));
    let tracker = Tracker::with_clock(config(&server), store, clock.clone()).unwrap();

    assert_eq!(*tracker.health().borrow(), GraceMode::Reconnecting);
    assert_eq!(tracker.snapshots().len(), 2);
    let grace = tracker.grace_state().await;
    assert_eq!(grace.first_failure_time, Some(t0() + TimeDelta::hours(1)));

    clock.advance(Duration::from_secs(2 * 3600));
    let result = tracker.poll().await;
    assert_eq!(result.mode, GraceMode::GraceExpired);
}

#[tokio::test]
async fn test_unreadable_state_is_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::write(&state_path, "{\"grace_mode\": 17").unwrap();

    let server = MockServer::start().await;
    let store = Arc::new(FileStateStore::new(&state_path));
    assert!(store.load().is_err());

    let tracker = Tracker::with_clock(
        config(&server),
        store,
        Arc::new(ManualClock::new(t0())),
    )
    .unwrap();

    assert_eq!(*tracker.health().borrow(), GraceMode::Connected);
    assert!(tracker.snapshots().is_empty());
}

// ── Event import tests ──────────────────────────────────────────────

#[tokio::test]
async fn test_import_events_broadcasts_device_events() {
    let h = harness_with(MemoryStateStore::new(), |cfg| {
        cfg.event_types = vec!["ignitionOn".into()];
    })
    .await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.0).await;
    Mock::given(method("GET"))
        .and(path("/api/reports/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 77,
            "deviceId": 1,
            "type": "ignitionOn",
            "eventTime": "2025-06-01T07:59:30Z"
        }])))
        .mount(&h.server)
        .await;

    h.tracker.poll().await;
    let mut events = h.tracker.events();

    assert_eq!(h.tracker.import_events().await, 1);
    match events.try_recv().unwrap() {
        TrackerEvent::Device(event) => {
            assert_eq!(event.device_id, DeviceId(1));
            assert_eq!(event.device_name.as_deref(), Some("Van"));
            assert_eq!(event.kind, "ignition_on");
        }
        other => panic!("expected device event, got {other:?}"),
    }
    assert_eq!(h.tracker.diagnostics().await.last_event_import, Some(t0()));
}

#[tokio::test]
async fn test_import_events_swallows_failures() {
    let h = harness_with(MemoryStateStore::new(), |cfg| {
        cfg.event_types = vec!["alarm".into()];
    })
    .await;
    mount_login(&h.server).await;
    mount_fleet(&h.server, 45.0).await;
    Mock::given(method("GET"))
        .and(path("/api/reports/events"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    h.tracker.poll().await;
    assert_eq!(h.tracker.import_events().await, 0);
    assert_eq!(h.tracker.grace_state().await.mode, GraceMode::Connected);
}
