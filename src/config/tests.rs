use std::collections::HashMap;

use serial_test::serial;
use tempfile::TempDir;

use super::*;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

// --- defaults ---

#[test]
fn defaults_use_in_memory_databases() {
    let config = Config::default();
    assert_eq!(config.reference.label, "reference");
    assert_eq!(config.candidate.path, ":memory:");
    assert_eq!(config.history.retention, 1000);
    assert_eq!(config.diff.log, None);
}

// --- file layer ---

#[test]
fn toml_overrides_only_given_keys() {
    let mut config = Config::default();
    config
        .apply_toml(
            r#"
[reference]
path = "/data/ref.db"

[candidate]
label = "next"

[history]
retention = 5
"#,
        )
        .unwrap();
    assert_eq!(config.reference.path, "/data/ref.db");
    assert_eq!(config.reference.label, "reference");
    assert_eq!(config.candidate.label, "next");
    assert_eq!(config.candidate.path, ":memory:");
    assert_eq!(config.history.retention, 5);
}

#[test]
fn toml_rejects_unknown_keys() {
    let mut config = Config::default();
    assert!(config.apply_toml("[reference]\nhost = \"x\"\n").is_err());
}

#[test]
fn toml_rejects_wrong_types() {
    let mut config = Config::default();
    assert!(config.apply_toml("[history]\nretention = \"many\"\n").is_err());
}

#[test]
fn explicit_file_is_loaded() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[diff]\nlog = \"/tmp/d.log\"\n").unwrap();
    let mut config = Config::default();
    config.apply_file(&path).unwrap();
    assert_eq!(config.diff.log, Some(PathBuf::from("/tmp/d.log")));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read config"));
}

// --- env layer ---

#[test]
fn env_overrides_file() {
    let mut config = Config::default();
    config
        .apply_toml("[reference]\npath = \"file.db\"\n")
        .unwrap();
    config
        .apply_env(env(&[
            ("SQLDIFF_REFERENCE", "env.db"),
            ("SQLDIFF_HISTORY_RETENTION", " 42 "),
            ("SQLDIFF_DIFF_LOG", "/tmp/x"),
        ]))
        .unwrap();
    assert_eq!(config.reference.path, "env.db");
    assert_eq!(config.history.retention, 42);
    assert_eq!(config.diff.log, Some(PathBuf::from("/tmp/x")));
}

#[test]
fn empty_env_values_are_ignored() {
    let mut config = Config::default();
    config
        .apply_env(env(&[("SQLDIFF_CANDIDATE", "")]))
        .unwrap();
    assert_eq!(config.candidate.path, ":memory:");
}

#[test]
fn invalid_retention_is_an_error() {
    let mut config = Config::default();
    let err = config
        .apply_env(env(&[("SQLDIFF_HISTORY_RETENTION", "lots")]))
        .unwrap_err();
    assert!(err.to_string().contains("SQLDIFF_HISTORY_RETENTION"));
}

// --- cli layer ---

#[test]
fn overrides_win_last() {
    let mut config = Config::default();
    config
        .apply_env(env(&[("SQLDIFF_CANDIDATE", "env.db")]))
        .unwrap();
    config.apply_overrides(Overrides {
        candidate: Some("flag.db".to_string()),
        ..Overrides::default()
    });
    assert_eq!(config.candidate.path, "flag.db");
    assert_eq!(config.reference.path, ":memory:");
}

// --- full load ---

#[test]
#[serial]
fn load_reads_user_dir_config_and_env() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("config.toml"),
        "[reference]\npath = \"from-file.db\"\n[candidate]\npath = \"cand-file.db\"\n",
    )
    .unwrap();
    // SAFETY: test-only env mutation; #[serial] prevents races.
    unsafe {
        std::env::set_var("SQLDIFF_HOME", dir.path());
        std::env::set_var("SQLDIFF_CANDIDATE", "cand-env.db");
    }
    let config = Config::load(None);
    let history = config
        .as_ref()
        .ok()
        .and_then(|c| c.history.resolved_path());
    unsafe {
        std::env::remove_var("SQLDIFF_HOME");
        std::env::remove_var("SQLDIFF_CANDIDATE");
    }
    let config = config.unwrap();
    assert_eq!(config.reference.path, "from-file.db");
    assert_eq!(config.candidate.path, "cand-env.db");
    assert_eq!(history, Some(dir.path().join("history")));
}

#[test]
#[serial]
fn load_without_file_uses_defaults() {
    let dir = TempDir::new().expect("tempdir");
    unsafe { std::env::set_var("SQLDIFF_HOME", dir.path()) };
    let config = Config::load(None);
    unsafe { std::env::remove_var("SQLDIFF_HOME") };
    assert_eq!(config.unwrap().reference.path, ":memory:");
}

#[test]
fn explicit_history_path_wins() {
    let config = HistoryConfig {
        retention: 1,
        path: Some(PathBuf::from("/tmp/h")),
    };
    assert_eq!(config.resolved_path(), Some(PathBuf::from("/tmp/h")));
}
