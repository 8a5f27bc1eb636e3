//! Runtime configuration, merged from defaults, an optional TOML file and
//! environment variables. Command-line flags are applied last by the caller
//! through [`Config::apply_overrides`].
//!
//! ```toml
//! [reference]
//! label = "sqlite-3.45"
//! path = "/var/db/reference.db"
//!
//! [candidate]
//! path = "/var/db/candidate.db"
//!
//! [history]
//! retention = 500
//! path = "/tmp/sqldiff_history"
//!
//! [diff]
//! log = "/tmp/sqldiff.diff"
//! ```
//!
//! Environment variables take precedence over the file:
//! - `SQLDIFF_REFERENCE`: reference database path
//! - `SQLDIFF_CANDIDATE`: candidate database path
//! - `SQLDIFF_HISTORY_RETENTION`: number of history entries to keep
//! - `SQLDIFF_DIFF_LOG`: file receiving a diff trace per query

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

use crate::history::DEFAULT_RETENTION;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub label: String,
    /// Database path; `:memory:` for a private in-memory database.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    pub retention: usize,
    /// History file; defaults to `history` in the user directory.
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            path: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(paths::history_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffConfig {
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub reference: BackendConfig,
    pub candidate: BackendConfig,
    pub history: HistoryConfig,
    pub diff: DiffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference: BackendConfig {
                label: "reference".to_string(),
                path: ":memory:".to_string(),
            },
            candidate: BackendConfig {
                label: "candidate".to_string(),
                path: ":memory:".to_string(),
            },
            history: HistoryConfig::default(),
            diff: DiffConfig::default(),
        }
    }
}

/// Values given on the command line; `None` leaves the loaded value alone.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub reference: Option<String>,
    pub candidate: Option<String>,
    pub diff_log: Option<PathBuf>,
}

// Private: the file layer, where every key is optional.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    reference: Option<FileBackend>,
    candidate: Option<FileBackend>,
    history: Option<FileHistory>,
    diff: Option<FileDiff>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBackend {
    label: Option<String>,
    path: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileHistory {
    retention: Option<usize>,
    path: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDiff {
    log: Option<PathBuf>,
}

impl Config {
    /// Load from `explicit` if given, else from `{user_dir}/config.toml` if it
    /// exists, then apply environment variables.
    ///
    /// # Errors
    /// Returns an error if an explicit file is missing, if any config file
    /// cannot be parsed, or if an environment variable has an invalid value.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        match explicit {
            Some(path) => config.apply_file(path)?,
            None => {
                if let Some(path) = paths::config_path()
                    && path.exists()
                {
                    config.apply_file(&path)?;
                }
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        self.apply_toml(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Layer a TOML document over the current values.
    ///
    /// # Errors
    /// Returns an error if `content` is not valid TOML or has unknown keys.
    pub fn apply_toml(&mut self, content: &str) -> anyhow::Result<()> {
        let file: FileConfig = toml::from_str(content)?;
        if let Some(b) = file.reference {
            merge_backend(&mut self.reference, b);
        }
        if let Some(b) = file.candidate {
            merge_backend(&mut self.candidate, b);
        }
        if let Some(h) = file.history {
            if let Some(retention) = h.retention {
                self.history.retention = retention;
            }
            if h.path.is_some() {
                self.history.path = h.path;
            }
        }
        if let Some(d) = file.diff
            && d.log.is_some()
        {
            self.diff.log = d.log;
        }
        Ok(())
    }

    /// Layer environment variables, read through `lookup`, over the current values.
    ///
    /// # Errors
    /// Returns an error if `SQLDIFF_HISTORY_RETENTION` is not a number.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(path) = non_empty(lookup("SQLDIFF_REFERENCE")) {
            self.reference.path = path;
        }
        if let Some(path) = non_empty(lookup("SQLDIFF_CANDIDATE")) {
            self.candidate.path = path;
        }
        if let Some(raw) = non_empty(lookup("SQLDIFF_HISTORY_RETENTION")) {
            self.history.retention = raw
                .trim()
                .parse()
                .with_context(|| format!("SQLDIFF_HISTORY_RETENTION: invalid count {raw:?}"))?;
        }
        if let Some(log) = non_empty(lookup("SQLDIFF_DIFF_LOG")) {
            self.diff.log = Some(PathBuf::from(log));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(path) = overrides.reference {
            self.reference.path = path;
        }
        if let Some(path) = overrides.candidate {
            self.candidate.path = path;
        }
        if overrides.diff_log.is_some() {
            self.diff.log = overrides.diff_log;
        }
    }
}

fn merge_backend(target: &mut BackendConfig, file: FileBackend) {
    if let Some(label) = file.label {
        target.label = label;
    }
    if let Some(path) = file.path {
        target.path = path;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests;
