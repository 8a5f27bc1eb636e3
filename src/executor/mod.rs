//! Dual-backend query execution and comparison.
//!
//! [`Executor::query`] runs one statement against the reference and the
//! candidate backend at the same time and waits for both. [`Executor::report`]
//! renders the pair side by side with divergent characters highlighted, and
//! [`Executor::do_diff`] runs a batch, stopping at the first divergence.

pub mod backend;
pub mod diff;
pub mod outcome;

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use crate::directive::{self, ExpandError, Expander};

pub use backend::{Backend, BackendError, ExecContext, ResultSet, SqliteBackend};
pub use diff::Highlight;
pub use outcome::{EMPTY_SET, QueryOutcome};

/// Failures that prevent a query from being dispatched or reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The query was empty or whitespace only; no backend was contacted.
    EmptyQuery,
    Template(ExpandError),
    /// The execution context was cancelled before both backends finished.
    Cancelled,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyQuery => f.write_str("empty query"),
            Self::Template(e) => write!(f, "{e}"),
            Self::Cancelled => f.write_str("query cancelled"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ExpandError> for QueryError {
    fn from(e: ExpandError) -> Self {
        Self::Template(e)
    }
}

/// Result of a batch comparison that did not run cleanly.
#[derive(Debug)]
pub enum DiffError {
    Query { query: String, source: QueryError },
    /// The first divergent query, with both sides rendered.
    Divergence(Box<Report>),
    /// Number of divergent queries when the batch kept going.
    Divergences(usize),
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query { query, source } => write!(f, "{query}: {source}"),
            Self::Divergence(report) => write!(f, "{report}"),
            Self::Divergences(n) => write!(f, "{n} queries produced different results"),
        }
    }
}

impl std::error::Error for DiffError {}

/// What `do_diff` does after a divergent query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    #[default]
    StopOnDivergence,
    /// Report every divergence and fail once at the end.
    KeepGoing,
}

/// Both outcomes of one dispatched query.
#[derive(Debug, Clone)]
pub struct QueryPair {
    /// The trimmed query as submitted.
    pub query: String,
    /// The text actually sent to the backends (expanded if templated).
    pub executed: String,
    /// The text to show and record in history.
    pub canonical: String,
    pub reference: QueryOutcome,
    pub candidate: QueryOutcome,
}

impl QueryPair {
    pub fn both_succeeded(&self) -> bool {
        !self.reference.failed && !self.candidate.failed
    }

    /// Divergence is decided on the rendered text, before highlighting.
    pub fn diverged(&self) -> bool {
        self.reference.rendered != self.candidate.rendered
    }
}

/// One backend's column in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Side {
    pub label: String,
    pub address: String,
    /// Rendered body, highlighted when both backends succeeded.
    pub body: String,
    pub stat: String,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.body.is_empty() {
            writeln!(f, "{}", self.body)?;
        }
        writeln!(f, "{}", self.stat)
    }
}

/// A query's two sides ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub query: String,
    pub reference: Side,
    pub candidate: Side,
    pub diverged: bool,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for side in [&self.reference, &self.candidate] {
            writeln!(f, "{}({})> {}", side.label, side.address, self.query)?;
            write!(f, "{side}")?;
        }
        Ok(())
    }
}

/// Runs every query against a reference and a candidate backend.
pub struct Executor {
    reference: Box<dyn Backend>,
    candidate: Box<dyn Backend>,
    expander: Mutex<Expander>,
    highlight: Highlight,
    diff_log: Option<Mutex<Box<dyn Write + Send>>>,
}

impl Executor {
    pub fn new(reference: Box<dyn Backend>, candidate: Box<dyn Backend>) -> Self {
        Self {
            reference,
            candidate,
            expander: Mutex::new(Expander::new()),
            highlight: Highlight::default(),
            diff_log: None,
        }
    }

    #[must_use]
    pub fn with_expander(mut self, expander: Expander) -> Self {
        self.expander = Mutex::new(expander);
        self
    }

    #[must_use]
    pub const fn with_highlight(mut self, highlight: Highlight) -> Self {
        self.highlight = highlight;
        self
    }

    /// Write a diff trace of every successfully executed query to `sink`.
    pub fn set_diff_log(&mut self, sink: Box<dyn Write + Send>) {
        self.diff_log = Some(Mutex::new(sink));
    }

    pub fn reference(&self) -> &dyn Backend {
        self.reference.as_ref()
    }

    pub fn candidate(&self) -> &dyn Backend {
        self.candidate.as_ref()
    }

    /// Expand a templated query without executing it.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyQuery`] or [`QueryError::Template`].
    pub fn expand(&self, text: &str) -> Result<String, QueryError> {
        let query = text.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let mut expander = self.expander.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(expander.expand_query(query)?)
    }

    /// Run `text` against both backends.
    ///
    /// Backend failures are captured in the returned outcomes; only
    /// validation failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyQuery`] for blank input and
    /// [`QueryError::Template`] if a templated query does not expand.
    pub fn query(&self, text: &str) -> Result<QueryPair, QueryError> {
        self.query_with(text, &ExecContext::new())
    }

    /// Like [`Executor::query`], with a caller-owned cancellation context.
    ///
    /// # Errors
    ///
    /// As [`Executor::query`], plus [`QueryError::Cancelled`] if `ctx` was
    /// cancelled; no outcomes are returned in that case.
    pub fn query_with(&self, text: &str, ctx: &ExecContext) -> Result<QueryPair, QueryError> {
        let query = text.trim();
        let executed = self.expand(query)?;
        let canonical = if directive::records_expansion(query) {
            executed.clone()
        } else {
            query.to_string()
        };

        let (reference, candidate) = self.dispatch(&executed, ctx);
        if ctx.is_cancelled() {
            tracing::debug!(sql = %executed, "query abandoned");
            return Err(QueryError::Cancelled);
        }

        Ok(QueryPair {
            query: query.to_string(),
            executed,
            canonical,
            reference,
            candidate,
        })
    }

    /// Send `sql` to both backends concurrently and wait for both outcomes.
    pub fn dispatch(&self, sql: &str, ctx: &ExecContext) -> (QueryOutcome, QueryOutcome) {
        tracing::debug!(
            reference = self.reference.address(),
            candidate = self.candidate.address(),
            sql,
            "dispatching query"
        );
        let (reference, candidate) = thread::scope(|s| {
            let reference = s.spawn(|| run(self.reference.as_ref(), sql, ctx));
            let candidate = s.spawn(|| run(self.candidate.as_ref(), sql, ctx));
            (join(reference), join(candidate))
        });
        tracing::debug!(
            reference_ms = reference.elapsed.as_millis(),
            candidate_ms = candidate.elapsed.as_millis(),
            reference_failed = reference.failed,
            candidate_failed = candidate.failed,
            "query finished"
        );
        (reference, candidate)
    }

    /// Render a pair for display, highlighting differences when both sides
    /// succeeded, and append the diff trace to the diff log if one is set.
    pub fn report(&self, pair: &QueryPair) -> Report {
        let (reference_body, candidate_body) = if pair.both_succeeded() {
            let spans = diff::diff(&pair.reference.rendered, &pair.candidate.rendered);
            self.log_diff(&pair.canonical, &spans);
            diff::highlight(&spans, self.highlight)
        } else {
            (
                pair.reference.rendered.clone(),
                pair.candidate.rendered.clone(),
            )
        };

        Report {
            query: pair.canonical.clone(),
            reference: Side {
                label: self.reference.label().to_string(),
                address: self.reference.address().to_string(),
                body: reference_body,
                stat: pair.reference.stat_line(),
            },
            candidate: Side {
                label: self.candidate.label().to_string(),
                address: self.candidate.address().to_string(),
                body: candidate_body,
                stat: pair.candidate.stat_line(),
            },
            diverged: pair.diverged(),
        }
    }

    fn log_diff(&self, query: &str, spans: &[diff::Span]) {
        let Some(sink) = &self.diff_log else {
            return;
        };
        let trace = diff::pretty(spans, Highlight::Plain);
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let written = writeln!(sink, "-- {query}\n{trace}\n").and_then(|()| sink.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write diff log");
        }
    }

    /// Run `queries` in order, stopping at the first error or divergence.
    ///
    /// `on_each` sees the report of every query that executed, divergent or not.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Query`] if a query fails validation and
    /// [`DiffError::Divergence`] for the first query whose results differ.
    pub fn do_diff<S: AsRef<str>>(
        &self,
        queries: &[S],
        on_each: Option<&mut dyn FnMut(&Report)>,
    ) -> Result<(), DiffError> {
        self.do_diff_with_policy(queries, BatchPolicy::StopOnDivergence, on_each)
    }

    /// [`Executor::do_diff`] with an explicit divergence policy.
    ///
    /// # Errors
    ///
    /// Validation failures always stop the batch. Under
    /// [`BatchPolicy::KeepGoing`] divergences are counted and reported as
    /// [`DiffError::Divergences`] after the last query.
    pub fn do_diff_with_policy<S: AsRef<str>>(
        &self,
        queries: &[S],
        policy: BatchPolicy,
        mut on_each: Option<&mut dyn FnMut(&Report)>,
    ) -> Result<(), DiffError> {
        let mut divergences = 0;
        for query in queries {
            let query = query.as_ref();
            let pair = self.query(query).map_err(|source| DiffError::Query {
                query: query.to_string(),
                source,
            })?;
            let report = self.report(&pair);
            if let Some(callback) = on_each.as_mut() {
                callback(&report);
            }
            if !report.diverged {
                tracing::info!(query = %report.query, "results match");
                continue;
            }
            tracing::warn!(query = %report.query, "results diverge");
            match policy {
                BatchPolicy::StopOnDivergence => {
                    return Err(DiffError::Divergence(Box::new(report)));
                }
                BatchPolicy::KeepGoing => divergences += 1,
            }
        }
        if divergences > 0 {
            return Err(DiffError::Divergences(divergences));
        }
        Ok(())
    }
}

fn run(backend: &dyn Backend, sql: &str, ctx: &ExecContext) -> QueryOutcome {
    let start = Instant::now();
    let result = backend.execute(sql, ctx);
    QueryOutcome::from_result(result, start.elapsed())
}

fn join(handle: ScopedJoinHandle<'_, QueryOutcome>) -> QueryOutcome {
    handle
        .join()
        .unwrap_or_else(|_| QueryOutcome::failure("backend task panicked", Duration::ZERO))
}
