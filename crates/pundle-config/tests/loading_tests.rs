//! Loading tests against real config files in temp directories.
//!
//! Every test is `#[serial]` because loading reads `PUNDLE_` variables from
//! the process environment.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use pundle_config::{ConfigError, ConfigOverrides, load};
use pundle_core::{ErrorCode, PundleError};
use serial_test::serial;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

struct EnvGuard(&'static str);

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        // SAFETY: env-touching tests are serialized
        unsafe { std::env::set_var(key, value) };
        EnvGuard(key)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: see above
        unsafe { std::env::remove_var(self.0) };
    }
}

#[test]
#[serial]
fn test_json_file_is_discovered() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "pundle.config.json",
        r#"{
            "entries": ["./src/index.js"],
            "output": { "formats": { "js": "[name].js" } },
            "workers": { "count": 2, "timeoutMs": 1000 }
        }"#,
    );

    let loaded = load(dir.path(), None, &ConfigOverrides::default()).unwrap();
    let config = &loaded.config;
    assert_eq!(loaded.path, Some(dir.path().join("pundle.config.json")));
    assert_eq!(config.root(), dir.path());
    assert_eq!(config.entries, vec!["./src/index.js"]);
    assert_eq!(config.workers.count, 2);
    assert_eq!(config.timeout(), Some(Duration::from_secs(1)));
    assert_eq!(config.output_dir(), dir.path().join("dist"));
    assert_eq!(config.cache_dir(), dir.path().join(".pundle/cache"));
}

#[test]
#[serial]
fn test_toml_file_is_discovered() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "pundle.config.toml",
        r#"
entries = ["./main.js"]

[output]
rootDirectory = "build"

[watch]
debounceMs = 200
"#,
    );

    let config = load(dir.path(), None, &ConfigOverrides::default()).unwrap().config;
    assert_eq!(config.output_dir(), dir.path().join("build"));
    assert_eq!(config.debounce(), Duration::from_millis(200));
}

#[test]
#[serial]
fn test_missing_explicit_path_is_config_not_found() {
    let dir = TempDir::new().unwrap();
    let err = load(
        dir.path(),
        Some(&PathBuf::from("nope.json")),
        &ConfigOverrides::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(ref p) if p == &dir.path().join("nope.json")));

    let err: PundleError = err.into();
    assert_eq!(err.code, ErrorCode::ConfigNotFound);
}

#[test]
#[serial]
fn test_no_file_and_no_entries_is_invalid() {
    let dir = TempDir::new().unwrap();
    let err = load(dir.path(), None, &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::NoEntries));
    assert_eq!(err.code(), ErrorCode::InvalidConfig);
}

#[test]
#[serial]
fn test_unknown_field_is_invalid() {
    let dir = TempDir::new().unwrap();
    write(&dir, "pundle.config.json", r#"{ "entries": ["./a.js"], "outDir": "x" }"#);
    let err = load(dir.path(), None, &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
    assert_eq!(err.code(), ErrorCode::InvalidConfig);
}

#[test]
#[serial]
fn test_cli_overrides_win() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "pundle.config.json",
        r#"{ "entries": ["./a.js"], "workers": { "count": 2 } }"#,
    );

    let overrides = ConfigOverrides {
        entries: vec!["./b.js".into()],
        output_dir: Some(PathBuf::from("out")),
        no_cache: true,
        ..Default::default()
    };
    let config = load(dir.path(), None, &overrides).unwrap().config;
    assert_eq!(config.entries, vec!["./b.js"]);
    assert_eq!(config.workers.count, 2);
    assert_eq!(config.output_dir(), dir.path().join("out"));
    assert!(!config.cache.enabled);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "pundle.config.json",
        r#"{ "entries": ["./a.js"], "workers": { "count": 2 } }"#,
    );

    let _count = EnvGuard::set("PUNDLE_WORKERS__COUNT", "5");
    let _timeout = EnvGuard::set("PUNDLE_WORKERS__TIMEOUT_MS", "250");
    let config = load(dir.path(), None, &ConfigOverrides::default()).unwrap().config;
    assert_eq!(config.workers.count, 5);
    assert_eq!(config.workers.timeout_ms, Some(250));

    // CLI still beats the environment
    let overrides = ConfigOverrides {
        workers: Some(1),
        ..Default::default()
    };
    let config = load(dir.path(), None, &overrides).unwrap().config;
    assert_eq!(config.workers.count, 1);
}

#[test]
#[serial]
fn test_root_directory_is_relative_to_config_file() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("conf")).unwrap();
    let path = write(
        &dir,
        "conf/custom.json",
        r#"{ "rootDirectory": "../app", "entries": ["./a.js"] }"#,
    );

    let loaded = load(dir.path(), Some(&path), &ConfigOverrides::default()).unwrap();
    assert_eq!(loaded.config.root(), dir.path().join("app"));
}

#[test]
#[serial]
fn test_epoch_changes_with_config() {
    let dir = TempDir::new().unwrap();
    write(&dir, "pundle.config.json", r#"{ "entries": ["./a.js"] }"#);
    let first = load(dir.path(), None, &ConfigOverrides::default()).unwrap().epoch;
    let again = load(dir.path(), None, &ConfigOverrides::default()).unwrap().epoch;
    assert_eq!(first, again);

    write(&dir, "pundle.config.json", r#"{ "entries": ["./b.js"] }"#);
    let changed = load(dir.path(), None, &ConfigOverrides::default()).unwrap().epoch;
    assert_ne!(first, changed);
}

#[test]
#[serial]
fn test_invalid_template_rejected() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "pundle.config.json",
        r#"{ "entries": ["./a.js"], "output": { "formats": { "js": "../escape.js" } } }"#,
    );
    let err = load(dir.path(), None, &ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("output.formats.js"));
}
