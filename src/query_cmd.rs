use std::io::{BufRead as _, IsTerminal as _, Read as _, Write as _};

use anyhow::Context as _;

use sqldiff::config::Config;
use sqldiff::directive::{self, Expander};
use sqldiff::executor::{
    BatchPolicy, DiffError, Executor, Highlight, QueryError, Report, SqliteBackend,
};
use sqldiff::history::{self, HistoryStore};
use sqldiff::script::{self, StatementBuffer};

/// Settings shared by every command that talks to the backends.
pub struct Session<'a> {
    pub config: &'a Config,
    pub highlight: Highlight,
    pub seed: Option<u64>,
}

impl Session<'_> {
    fn executor(&self) -> anyhow::Result<Executor> {
        let (reference, candidate) = (&self.config.reference, &self.config.candidate);
        let reference = SqliteBackend::open(&reference.label, &reference.path)?;
        let candidate = SqliteBackend::open(&candidate.label, &candidate.path)?;
        let mut exec = Executor::new(Box::new(reference), Box::new(candidate))
            .with_highlight(self.highlight)
            .with_expander(expander(self.seed));
        if let Some(path) = &self.config.diff.log {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open diff log {}", path.display()))?;
            exec.set_diff_log(Box::new(file));
        }
        Ok(exec)
    }

    fn history(&self) -> Option<HistoryStore> {
        let path = self.config.history.resolved_path()?;
        Some(HistoryStore::new(path, self.config.history.retention))
    }
}

fn expander(seed: Option<u64>) -> Expander {
    seed.map_or_else(Expander::new, Expander::seeded)
}

/// Record one query; history failures never fail the command.
fn remember(store: Option<&HistoryStore>, text: &str) {
    let Some(store) = store else {
        return;
    };
    let result = store.load().and_then(|mut log| {
        log.record(history::unix_now(), text);
        store.save(&mut log)
    });
    if let Err(e) = result {
        eprintln!("[sqldiff] warning: history not saved: {e:#}");
    }
}

/// History text for a query that failed to expand, so it can be recalled and fixed.
fn annotated(query: &str, error: &QueryError) -> String {
    format!("{} /* {error} */", query.trim())
}

pub fn cmd_query(words: &[String], session: &Session<'_>) -> anyhow::Result<i32> {
    let text = words.join(" ");
    let exec = session.executor()?;
    let pair = match exec.query(&text) {
        Ok(pair) => pair,
        Err(e @ QueryError::Template(_)) => {
            remember(session.history().as_ref(), &annotated(&text, &e));
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    remember(session.history().as_ref(), &pair.canonical);

    let report = exec.report(&pair);
    print!("{report}");
    Ok(i32::from(report.diverged))
}

pub fn cmd_diff(source: &str, keep_going: bool, session: &Session<'_>) -> anyhow::Result<i32> {
    let script = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read script from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    let statements = script::split(&script);
    if statements.is_empty() {
        eprintln!("[sqldiff] no statements in {source}");
        return Ok(0);
    }

    let exec = session.executor()?;
    let policy = if keep_going {
        BatchPolicy::KeepGoing
    } else {
        BatchPolicy::StopOnDivergence
    };
    let mut show = |report: &Report| print!("{report}");
    match exec.do_diff_with_policy(
        &statements,
        policy,
        Some(&mut show as &mut dyn FnMut(&Report)),
    ) {
        Ok(()) => {
            eprintln!("[sqldiff] {} statements, no divergence", statements.len());
            Ok(0)
        }
        Err(DiffError::Divergence(report)) => {
            eprintln!("[sqldiff] results diverge at: {}", report.query);
            Ok(1)
        }
        Err(e @ DiffError::Divergences(_)) => {
            eprintln!("[sqldiff] {e}");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn cmd_expand(template: &str, seed: Option<u64>) -> anyhow::Result<i32> {
    let body = directive::strip_marker(template.trim());
    let expanded = expander(seed).expand(body)?;
    println!("{expanded}");
    Ok(0)
}

/// Read statements from stdin until EOF or `exit`, comparing each one.
pub fn cmd_shell(session: &Session<'_>) -> anyhow::Result<i32> {
    let exec = session.executor()?;
    let store = session.history();
    let interactive = std::io::stdin().is_terminal();
    let mut buffer = StatementBuffer::new();
    let mut diverged = 0usize;

    prompt(interactive, buffer.is_empty());
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if buffer.is_empty() && matches!(line.trim(), "exit" | "quit") {
            break;
        }
        for statement in buffer.push_line(&line) {
            if run_one(&exec, store.as_ref(), &statement) {
                diverged += 1;
            }
        }
        prompt(interactive, buffer.is_empty());
    }
    if let Some(statement) = buffer.finish()
        && run_one(&exec, store.as_ref(), &statement)
    {
        diverged += 1;
    }

    if let Some(store) = &store {
        let mut log = store.load()?;
        store.save(&mut log)?;
    }
    if diverged > 0 {
        eprintln!("[sqldiff] {diverged} statements diverged");
    }
    Ok(i32::from(diverged > 0))
}

fn prompt(interactive: bool, fresh: bool) {
    if !interactive {
        return;
    }
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}", if fresh { "sqldiff> " } else { "      -> " });
    let _ = stderr.flush();
}

/// Run one shell statement; returns true if the results diverged.
fn run_one(exec: &Executor, store: Option<&HistoryStore>, statement: &str) -> bool {
    let pair = match exec.query(statement) {
        Ok(pair) => pair,
        Err(QueryError::EmptyQuery) => return false,
        Err(e) => {
            eprintln!("[sqldiff] error: {e}");
            if matches!(e, QueryError::Template(_)) {
                append(store, &annotated(statement, &e));
            }
            return false;
        }
    };
    append(store, &pair.canonical);
    let report = exec.report(&pair);
    print!("{report}");
    report.diverged
}

fn append(store: Option<&HistoryStore>, text: &str) {
    if let Some(store) = store
        && let Err(e) = store.append(history::unix_now(), text)
    {
        eprintln!("[sqldiff] warning: history not saved: {e:#}");
    }
}
