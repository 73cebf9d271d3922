//! Config layering and profile resolution, isolated with `figment::Jail`.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use tracklink_config::{
    Config, ConfigError, Profile, load_config_from, profile_to_tracker_config, resolve_password,
    save_config_to,
};
use tracklink_core::TlsVerification;

const SAMPLE: &str = r#"
default_profile = "fleet"

[defaults]
timeout = 15
poll_interval = "45s"

[profiles.fleet]
server = "https://track.example.com"
email = "ops@example.com"
password = "from-file"
max_accuracy = 50.0
skip_accuracy_filter_for = ["rtk"]
event_types = ["ignitionOn", "geofenceEnter"]

[profiles.legacy]
server = "http://10.0.0.5:8082"
username = "old@example.com"
insecure = true
grace_window = "2h"
backoff_base = "10s"
backoff_max = "1m"
"#;

fn load(jail: &Jail) -> Config {
    jail.create_file("config.toml", SAMPLE).unwrap();
    load_config_from(Path::new("config.toml")).unwrap()
}

#[test]
fn test_missing_file_yields_defaults() {
    Jail::expect_with(|_jail| {
        let cfg = load_config_from(Path::new("absent.toml")).map_err(|e| e.to_string())?;
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert_eq!(cfg.defaults.timeout, 30);
        assert_eq!(cfg.defaults.grace_window, "12h");
        assert!(cfg.profiles.is_empty());
        Ok(())
    });
}

#[test]
fn test_file_values_override_defaults() {
    Jail::expect_with(|jail| {
        let cfg = load(jail);
        assert_eq!(cfg.default_profile.as_deref(), Some("fleet"));
        assert_eq!(cfg.defaults.timeout, 15);
        assert_eq!(cfg.defaults.poll_interval, "45s");
        assert_eq!(cfg.defaults.output, "table");

        let legacy = cfg.profile("legacy").map_err(|e| e.to_string())?;
        assert_eq!(legacy.email.as_deref(), Some("old@example.com"));
        Ok(())
    });
}

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.set_env("TRACKLINK_DEFAULT_PROFILE", "legacy");
        jail.set_env("TRACKLINK_PROFILES__FLEET__POLL_INTERVAL", "2m");
        let cfg = load(jail);

        assert_eq!(cfg.default_profile.as_deref(), Some("legacy"));
        assert_eq!(
            cfg.profiles["fleet"].poll_interval.as_deref(),
            Some("2m")
        );
        Ok(())
    });
}

#[test]
fn test_profile_translates_to_tracker_config() {
    Jail::expect_with(|jail| {
        let cfg = load(jail);
        let profile = cfg.profile("fleet").map_err(|e| e.to_string())?;
        let tracker = profile_to_tracker_config(profile, "fleet", &cfg.defaults)
            .map_err(|e| e.to_string())?;

        assert_eq!(tracker.url.as_str(), "https://track.example.com/");
        assert_eq!(tracker.credentials.email, "ops@example.com");
        assert_eq!(tracker.credentials.password.expose_secret(), "from-file");
        assert_eq!(tracker.timeout, Duration::from_secs(15));
        assert_eq!(tracker.poll_interval, Duration::from_secs(45));
        assert_eq!(tracker.grace_window, Duration::from_secs(12 * 3600));
        assert_eq!(tracker.tls, TlsVerification::SystemDefaults);
        assert!((tracker.filter.max_accuracy - 50.0).abs() < f64::EPSILON);
        assert_eq!(tracker.filter.skip_for, vec!["rtk".to_string()]);
        assert_eq!(tracker.event_types.len(), 2);
        Ok(())
    });
}

#[test]
fn test_profile_overrides_tuning() {
    Jail::expect_with(|jail| {
        jail.set_env("TRACKLINK_PASSWORD", "from-env");
        let cfg = load(jail);
        let profile = cfg.profile("legacy").map_err(|e| e.to_string())?;
        let tracker = profile_to_tracker_config(profile, "legacy", &cfg.defaults)
            .map_err(|e| e.to_string())?;

        assert_eq!(tracker.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(tracker.grace_window, Duration::from_secs(2 * 3600));
        assert_eq!(tracker.backoff.base, Duration::from_secs(10));
        assert_eq!(tracker.backoff.max, Duration::from_secs(60));
        assert_eq!(tracker.credentials.password.expose_secret(), "from-env");
        Ok(())
    });
}

#[test]
fn test_password_env_takes_priority_over_plaintext() {
    Jail::expect_with(|jail| {
        jail.set_env("FLEET_SECRET", "custom-env");
        let profile = Profile {
            email: Some("ops@example.com".into()),
            password: Some("plain".into()),
            password_env: Some("FLEET_SECRET".into()),
            ..Profile::new("https://track.example.com")
        };
        let pw = resolve_password(&profile, "tracklink-test-env").map_err(|e| e.to_string())?;
        assert_eq!(pw.expose_secret(), "custom-env");
        Ok(())
    });
}

#[test]
fn test_missing_credentials_is_an_error() {
    Jail::expect_with(|_jail| {
        let profile = Profile::new("https://track.example.com");
        let err = profile_to_tracker_config(
            &profile,
            "tracklink-test-none",
            &tracklink_config::Defaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
        Ok(())
    });
}

#[test]
fn test_invalid_backoff_is_rejected() {
    Jail::expect_with(|jail| {
        jail.set_env("TRACKLINK_PASSWORD", "pw");
        let profile = Profile {
            email: Some("ops@example.com".into()),
            backoff_base: Some("5m".into()),
            backoff_max: Some("1m".into()),
            ..Profile::new("https://track.example.com")
        };
        let err = profile_to_tracker_config(
            &profile,
            "tracklink-test-backoff",
            &tracklink_config::Defaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "backoff_max"));
        Ok(())
    });
}

#[test]
fn test_save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.profiles.insert(
        "home".into(),
        Profile {
            email: Some("me@example.com".into()),
            event_types: vec!["alarm".into()],
            ..Profile::new("https://track.example.com")
        },
    );
    cfg.default_profile = Some("home".into());
    save_config_to(&cfg, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[profiles.home]"));
    assert!(!text.contains("password"));

    let loaded: Config = toml::from_str(&text).unwrap();
    assert_eq!(loaded.default_profile.as_deref(), Some("home"));
    assert_eq!(loaded.profiles["home"].event_types, vec!["alarm".to_string()]);
}
