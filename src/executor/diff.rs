//! Character-level diff between two rendered results.

use std::time::{Duration, Instant};

use similar::{Algorithm, ChangeTag, DiffTag, TextDiff, TextDiffConfig};

/// Time allowed for each diff pass before it settles for a coarser result.
const DIFF_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    /// Present only in the reference text.
    Delete,
    /// Present only in the candidate text.
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub op: Op,
    pub text: String,
}

/// How divergent spans are marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Highlight {
    /// Red for deletions, green for insertions.
    #[default]
    Ansi,
    /// `[-deleted-]` and `{+inserted+}`, for logs and non-terminals.
    Plain,
}

impl Highlight {
    fn deleted(self, out: &mut String, text: &str) {
        match self {
            Self::Ansi => {
                out.push_str("\x1b[31m");
                out.push_str(text);
                out.push_str("\x1b[0m");
            }
            Self::Plain => {
                out.push_str("[-");
                out.push_str(text);
                out.push_str("-]");
            }
        }
    }

    fn inserted(self, out: &mut String, text: &str) {
        match self {
            Self::Ansi => {
                out.push_str("\x1b[32m");
                out.push_str(text);
                out.push_str("\x1b[0m");
            }
            Self::Plain => {
                out.push_str("{+");
                out.push_str(text);
                out.push_str("+}");
            }
        }
    }
}

/// Compute an edit script turning `reference` into `candidate`.
///
/// Lines are aligned first; changed lines are then compared character by
/// character, pairwise when both sides changed the same number of lines.
/// Adjacent text with the same operation is merged into one span.
pub fn diff(reference: &str, candidate: &str) -> Vec<Span> {
    let lines = config().diff_lines(reference, candidate);
    let (old, new) = (lines.old_slices(), lines.new_slices());
    let mut spans = Vec::new();
    for op in lines.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        let (old, new) = (&old[old_range], &new[new_range]);
        match tag {
            DiffTag::Equal => push(&mut spans, Op::Equal, &old.concat()),
            DiffTag::Delete => push(&mut spans, Op::Delete, &old.concat()),
            DiffTag::Insert => push(&mut spans, Op::Insert, &new.concat()),
            DiffTag::Replace if old.len() == new.len() => {
                for (a, b) in old.iter().zip(new) {
                    diff_chars(&mut spans, a, b);
                }
            }
            DiffTag::Replace => diff_chars(&mut spans, &old.concat(), &new.concat()),
        }
    }
    spans
}

fn config() -> TextDiffConfig {
    let mut config = TextDiff::configure();
    config
        .algorithm(Algorithm::Myers)
        .deadline(Instant::now() + DIFF_TIMEOUT);
    config
}

fn diff_chars(spans: &mut Vec<Span>, reference: &str, candidate: &str) {
    let chars = config().diff_chars(reference, candidate);
    for change in chars.iter_all_changes() {
        let op = match change.tag() {
            ChangeTag::Equal => Op::Equal,
            ChangeTag::Delete => Op::Delete,
            ChangeTag::Insert => Op::Insert,
        };
        push(spans, op, change.value());
    }
}

fn push(spans: &mut Vec<Span>, op: Op, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = spans.last_mut()
        && last.op == op
    {
        last.text.push_str(text);
        return;
    }
    spans.push(Span {
        op,
        text: text.to_string(),
    });
}

/// Build the two annotated bodies: deletions are marked in the reference copy,
/// insertions in the candidate copy, equal text goes to both.
pub fn highlight(spans: &[Span], style: Highlight) -> (String, String) {
    let mut reference = String::new();
    let mut candidate = String::new();
    for span in spans {
        match span.op {
            Op::Equal => {
                reference.push_str(&span.text);
                candidate.push_str(&span.text);
            }
            Op::Delete => style.deleted(&mut reference, &span.text),
            Op::Insert => style.inserted(&mut candidate, &span.text),
        }
    }
    (reference, candidate)
}

/// A single merged text showing both deletions and insertions in order.
pub fn pretty(spans: &[Span], style: Highlight) -> String {
    let mut out = String::new();
    for span in spans {
        match span.op {
            Op::Equal => out.push_str(&span.text),
            Op::Delete => style.deleted(&mut out, &span.text),
            Op::Insert => style.inserted(&mut out, &span.text),
        }
    }
    out
}

/// True if any span is not `Equal`.
pub fn has_changes(spans: &[Span]) -> bool {
    spans.iter().any(|s| s.op != Op::Equal)
}
