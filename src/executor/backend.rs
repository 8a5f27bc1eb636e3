use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Context as _;
use rusqlite::Connection;
use rusqlite::types::ValueRef;

/// Column names plus rows of raw cell bytes, fully read from a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Vec<u8>>>,
}

/// A failure reported by one backend while executing a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new("query cancelled")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// One side of the comparison.
///
/// Implementations must read the whole result before returning so that no
/// cursor outlives `execute`, and should abort promptly once `ctx` is
/// cancelled.
pub trait Backend: Send + Sync {
    /// Short display name, e.g. `reference`.
    fn label(&self) -> &str;

    /// Identity shown in reports, e.g. `host:port` or a database path.
    fn address(&self) -> &str;

    /// Run one statement.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the statement fails or is cancelled.
    fn execute(&self, sql: &str, ctx: &ExecContext) -> Result<ResultSet, BackendError>;
}

type CancelHook = Box<dyn Fn() + Send + Sync>;

/// Per-query execution context shared by both backend tasks.
///
/// Calling [`ExecContext::cancel`] from any thread marks the query as
/// abandoned and fires the interrupt hooks backends registered for their
/// in-flight statements.
#[derive(Default)]
pub struct ExecContext {
    cancelled: AtomicBool,
    next_hook: AtomicU64,
    hooks: Mutex<Vec<(u64, CancelHook)>>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, hook) in hooks.iter() {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Register `hook` to run on cancellation until the returned guard drops.
    /// Runs it immediately if the context is already cancelled.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) -> CancelGuard<'_> {
        let id = self.next_hook.fetch_add(1, Ordering::Relaxed);
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            hook();
        }
        hooks.push((id, Box::new(hook)));
        CancelGuard { ctx: self, id }
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Unregisters a cancel hook when dropped.
pub struct CancelGuard<'a> {
    ctx: &'a ExecContext,
    id: u64,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let mut hooks = self
            .ctx
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        hooks.retain(|(id, _)| *id != self.id);
    }
}

/// A SQLite database accessed through `rusqlite`.
pub struct SqliteBackend {
    label: String,
    address: String,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open the database at `path`; `:memory:` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(label: &str, path: &str) -> anyhow::Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .with_context(|| format!("open {label} database at {path}"))?;
        Ok(Self::from_connection(label, path, conn))
    }

    pub fn from_connection(label: &str, address: &str, conn: Connection) -> Self {
        Self {
            label: label.to_string(),
            address: address.to_string(),
            conn: Mutex::new(conn),
        }
    }
}

impl Backend for SqliteBackend {
    fn label(&self) -> &str {
        &self.label
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn execute(&self, sql: &str, ctx: &ExecContext) -> Result<ResultSet, BackendError> {
        if ctx.is_cancelled() {
            return Err(BackendError::cancelled());
        }
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let interrupt = conn.get_interrupt_handle();
        let _guard = ctx.on_cancel(move || interrupt.interrupt());

        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(cell_bytes(row.get_ref(idx)?));
            }
            out.push(cells);
        }
        Ok(ResultSet { columns, rows: out })
    }
}

/// Untyped cell bytes, the way a text-protocol client would receive them.
fn cell_bytes(value: ValueRef<'_>) -> Vec<u8> {
    match value {
        ValueRef::Null => b"NULL".to_vec(),
        ValueRef::Integer(i) => i.to_string().into_bytes(),
        ValueRef::Real(f) => f.to_string().into_bytes(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
    }
}
