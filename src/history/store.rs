use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use super::{HistoryLog, format_line};

/// Reads and writes a [`HistoryLog`] at a fixed path.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    retention: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            path: path.into(),
            retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the log. A missing file is an empty log; lines that are not
    /// valid UTF-8 are skipped like any other malformed line.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub fn load(&self) -> anyhow::Result<HistoryLog> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(HistoryLog::from_lines(
                bytes
                    .split(|&b| b == b'\n')
                    .filter_map(|line| std::str::from_utf8(line).ok())
                    .map(|line| line.strip_suffix('\r').unwrap_or(line)),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HistoryLog::new()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read history {}", self.path.display()))
            }
        }
    }

    /// Rewrite the file from `log`, dropping entries beyond the retention limit.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the file written.
    pub fn save(&self, log: &mut HistoryLog) -> anyhow::Result<()> {
        log.truncate(self.retention);
        self.ensure_parent()?;
        std::fs::write(&self.path, log.to_lines())
            .with_context(|| format!("failed to write history {}", self.path.display()))
    }

    /// Append a single entry without rewriting the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, ts: i64, text: &str) -> anyhow::Result<()> {
        self.ensure_parent()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open history {}", self.path.display()))?;
        writeln!(file, "{}", format_line(ts, text))
            .with_context(|| format!("failed to append to history {}", self.path.display()))
    }

    fn ensure_parent(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }
}
