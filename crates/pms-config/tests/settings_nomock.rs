//! No-mock settings loading tests against real files on disk.
//!
//! Covers:
//! - Explicit path loading, hashing and validation
//! - Resolution via PMS_CONFIG_DIR
//! - Rejection of malformed and semantically invalid files

use pms_config::resolve::{ConfigSource, ENV_CONFIG_DIR, ENV_SETTINGS_PATH};
use pms_config::{load_settings, ConfigError, LossSpec, SettingsSnapshot};
use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let mut saved = Vec::with_capacity(keys.len());
        for key in keys {
            saved.push(env::var(key).ok());
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (idx, key) in self.keys.iter().enumerate() {
            match self.saved.get(idx).and_then(|v| v.as_ref()) {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned");
    f()
}

const SETTINGS: &str = r#"{
  "schema_version": "1.0.0",
  "description": "paper figure settings",
  "utility": { "omega_count": 40, "base_seed": 7, "parallel": false },
  "loss": { "kind": "classification", "threshold": 0.15 }
}"#;

#[test]
fn explicit_path_is_loaded_and_hashed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, SETTINGS).unwrap();

    let resolved = load_settings(Some(&path)).expect("load settings");
    assert_eq!(resolved.source, ConfigSource::CliArgument);
    assert_eq!(resolved.settings.utility.omega_count, 40);
    assert_eq!(resolved.settings.utility.base_seed, 7);
    assert_eq!(
        resolved.settings.loss,
        LossSpec::Classification { threshold: 0.15 }
    );

    let snapshot = SettingsSnapshot::from_resolved(&resolved);
    assert_eq!(Some(snapshot.content_hash), resolved.content_hash);
    assert_eq!(snapshot.summary.omega_count, 40);
}

#[test]
fn config_dir_env_is_honoured() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_SETTINGS_PATH, ENV_CONFIG_DIR]);
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("settings.json"), SETTINGS).unwrap();
        env::remove_var(ENV_SETTINGS_PATH);
        env::set_var(ENV_CONFIG_DIR, dir.path());

        let resolved = load_settings(None).expect("load settings");
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.settings.utility.omega_count, 40);
    });
}

#[test]
fn malformed_json_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();
    let err = load_settings(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn invalid_values_are_validation_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, r#"{"mcmc": {"step_size": -1.0}}"#).unwrap();
    let err = load_settings(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("mcmc.step_size"));
}
