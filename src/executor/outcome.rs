use std::borrow::Cow;
use std::time::Duration;

use super::backend::{BackendError, ResultSet};

/// Rendered body for a successful query that returned no rows.
pub const EMPTY_SET: &str = "Empty set";

/// The rendered result of running one query against one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// The result table, `Empty set`, or the backend's error message.
    pub rendered: String,
    pub failed: bool,
    /// Number of rows read; zero when `failed`.
    pub row_count: usize,
    pub elapsed: Duration,
}

impl QueryOutcome {
    pub fn from_result(result: Result<ResultSet, BackendError>, elapsed: Duration) -> Self {
        match result {
            Ok(set) => Self {
                rendered: render_table(&set.columns, &set.rows),
                failed: false,
                row_count: set.rows.len(),
                elapsed,
            },
            Err(e) => Self::failure(e.message(), elapsed),
        }
    }

    pub fn failure(message: &str, elapsed: Duration) -> Self {
        Self {
            rendered: message.to_string(),
            failed: true,
            row_count: 0,
            elapsed,
        }
    }

    /// `N row in set (S.SSS sec)`, or `failure (S.SSS sec)`.
    pub fn stat_line(&self) -> String {
        let secs = self.elapsed.as_secs_f64();
        if self.failed {
            format!("failure ({secs:.3} sec)")
        } else {
            format!("{} row in set ({secs:.3} sec)", self.row_count)
        }
    }
}

/// Render rows as a bordered text table.
///
/// Each column is as wide as its longest header or cell plus one space on
/// either side. The output is compared byte-for-byte between backends, so
/// the layout must stay stable:
///
/// ```text
/// +----------+
/// | id | val |
/// +----------+
/// | 1  | a   |
/// +----------+
/// ```
pub fn render_table(columns: &[String], rows: &[Vec<Vec<u8>>]) -> String {
    if rows.is_empty() {
        return EMPTY_SET.to_string();
    }

    let cells: Vec<Vec<Cow<'_, str>>> = rows
        .iter()
        .map(|row| row.iter().map(|c| String::from_utf8_lossy(c)).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let total = widths.iter().map(|w| w + 2).sum::<usize>() + widths.len().saturating_sub(1);
    let border = format!("+{}+", "-".repeat(total));

    let mut lines = Vec::with_capacity(rows.len() + 4);
    lines.push(border.clone());
    lines.push(render_row(columns.iter().map(String::as_str), &widths));
    lines.push(border.clone());
    for row in &cells {
        lines.push(render_row(row.iter().map(|c| &**c), &widths));
    }
    lines.push(border);
    lines.join("\n")
}

fn render_row<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut line = String::from("|");
    for (value, width) in values.zip(widths) {
        let padding = width + 1 - value.chars().count();
        line.push(' ');
        line.push_str(value);
        line.push_str(&" ".repeat(padding));
        line.push('|');
    }
    line
}
