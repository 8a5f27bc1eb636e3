//! Query history: a deduplicated list of executed query texts ordered by
//! when each was last used, persisted one entry per line as `<unix-ts>|<text>`.

mod store;

use std::collections::HashMap;

use regex::Regex;

pub use store::HistoryStore;

/// Entries kept when no retention is configured.
pub const DEFAULT_RETENTION: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HistoryEntry {
    pub text: String,
    /// Unix timestamp in seconds.
    pub last_used: i64,
}

/// Ordered history with a text index.
///
/// Entries are sorted by `last_used`, most recent first; ties keep their
/// insertion order. The index always maps each text to its current position.
#[derive(Debug, Default, Clone)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    index: HashMap<String, usize>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use of `text` at `ts`, overwriting any earlier timestamp.
    pub fn record(&mut self, ts: i64, text: &str) {
        self.upsert(ts, text, |_, new| new);
    }

    /// Add `text` at `ts`, keeping whichever timestamp is later if it is
    /// already present.
    pub fn merge(&mut self, ts: i64, text: &str) {
        self.upsert(ts, text, i64::max);
    }

    fn upsert(&mut self, ts: i64, text: &str, pick: impl Fn(i64, i64) -> i64) {
        if let Some(&pos) = self.index.get(text) {
            let entry = &mut self.entries[pos];
            entry.last_used = pick(entry.last_used, ts);
        } else {
            self.index.insert(text.to_string(), self.entries.len());
            self.entries.push(HistoryEntry {
                text: text.to_string(),
                last_used: ts,
            });
        }
        self.resort();
    }

    /// Remove the entry at `index`. Returns false if out of range.
    pub fn delete(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        self.entries.remove(index);
        self.reindex();
        true
    }

    pub fn items(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, text: &str) -> Option<&HistoryEntry> {
        self.index.get(text).map(|&pos| &self.entries[pos])
    }

    /// Stable sort by `last_used`, most recent first.
    pub fn resort(&mut self) {
        self.entries.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        self.reindex();
    }

    /// Keep only the `max` most recent entries.
    pub fn truncate(&mut self, max: usize) {
        if self.entries.len() > max {
            self.entries.truncate(max);
            self.reindex();
        }
    }

    /// Entries whose text matches `pattern`, with their positions.
    pub fn search(&self, pattern: &Regex) -> Vec<(usize, &HistoryEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| pattern.is_match(&e.text))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.text.clone(), pos);
        }
    }

    /// Build a log from persisted lines. Malformed lines are skipped and
    /// duplicate texts keep their latest timestamp.
    pub fn parse(content: &str) -> Self {
        Self::from_lines(content.lines())
    }

    /// [`HistoryLog::parse`] over already split lines. Sorts once at the end.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut log = Self::new();
        for (ts, text) in lines.into_iter().filter_map(parse_line) {
            match log.index.get(&text) {
                Some(&pos) => {
                    let entry = &mut log.entries[pos];
                    entry.last_used = entry.last_used.max(ts);
                }
                None => {
                    log.index.insert(text.clone(), log.entries.len());
                    log.entries.push(HistoryEntry {
                        text,
                        last_used: ts,
                    });
                }
            }
        }
        log.resort();
        log
    }

    /// Serialize every entry, one line each, in display order.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format_line(entry.last_used, &entry.text));
            out.push('\n');
        }
        out
    }
}

/// Current time as a history timestamp.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Parse one `<unix-ts>|<text>` line. Returns `None` for a missing separator,
/// a non-numeric timestamp, or empty text.
pub fn parse_line(line: &str) -> Option<(i64, String)> {
    let (ts, text) = line.split_once('|')?;
    let ts = ts.trim().parse().ok()?;
    let text = unescape(text);
    if text.trim().is_empty() {
        return None;
    }
    Some((ts, text))
}

pub fn format_line(ts: i64, text: &str) -> String {
    format!("{ts}|{}", escape(text))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
