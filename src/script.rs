//! Splitting SQL scripts into statements.
//!
//! A statement ends at a `;` outside quotes and outside template actions.
//! Lines starting with `--` are comments and are dropped.

/// Accumulates input line by line and yields each completed statement.
#[derive(Debug, Default)]
pub struct StatementBuffer {
    pending: String,
    quote: Option<char>,
    action_depth: usize,
}

impl StatementBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its newline). Returns the statements it completed.
    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        let mut done = Vec::new();
        if self.quote.is_none() && line.trim_start().starts_with("--") {
            return done;
        }
        if !self.pending.is_empty() {
            self.pending.push('\n');
        }

        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            match (self.quote, ch) {
                (Some(q), c) if c == q => self.quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"' | '`') => self.quote = Some(ch),
                (None, '{') if chars.peek() == Some(&'{') => {
                    chars.next();
                    self.pending.push('{');
                    self.action_depth += 1;
                }
                (None, '}') if self.action_depth > 0 && chars.peek() == Some(&'}') => {
                    chars.next();
                    self.pending.push('}');
                    self.action_depth -= 1;
                }
                (None, ';') if self.action_depth == 0 => {
                    if let Some(stmt) = self.take() {
                        done.push(stmt);
                    }
                    continue;
                }
                _ => {}
            }
            self.pending.push(ch);
        }
        done
    }

    /// Return whatever is left once input ends, if it is not blank.
    pub fn finish(&mut self) -> Option<String> {
        self.quote = None;
        self.action_depth = 0;
        self.take()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.trim().is_empty()
    }

    fn take(&mut self) -> Option<String> {
        let stmt = std::mem::take(&mut self.pending);
        let stmt = stmt.trim();
        (!stmt.is_empty()).then(|| stmt.to_string())
    }
}

/// Split a whole script into statements.
pub fn split(script: &str) -> Vec<String> {
    let mut buffer = StatementBuffer::new();
    let mut out = Vec::new();
    for line in script.lines() {
        out.extend(buffer.push_line(line));
    }
    out.extend(buffer.finish());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons() {
        assert_eq!(
            split("select 1; select 2;\nselect 3"),
            vec!["select 1", "select 2", "select 3"]
        );
    }

    #[test]
    fn multi_line_statement_keeps_newlines() {
        assert_eq!(split("select 1\nfrom t;\n"), vec!["select 1\nfrom t"]);
    }

    #[test]
    fn comment_lines_are_dropped() {
        assert_eq!(split("-- setup\nselect 1;\n  -- done\n"), vec!["select 1"]);
    }

    #[test]
    fn semicolons_in_quotes_do_not_split() {
        assert_eq!(
            split("select 'a;b', \"c;\";select 2;"),
            vec!["select 'a;b', \"c;\"", "select 2"]
        );
    }

    #[test]
    fn semicolons_in_template_actions_do_not_split() {
        assert_eq!(
            split("!select {{\";\"}};"),
            vec!["!select {{\";\"}}"]
        );
    }

    #[test]
    fn blank_statements_are_skipped() {
        assert!(split(" ;;\n\n;").is_empty());
    }

    #[test]
    fn buffer_yields_when_statement_completes() {
        let mut buffer = StatementBuffer::new();
        assert!(buffer.push_line("select").is_empty());
        assert!(!buffer.is_empty());
        assert_eq!(buffer.push_line("1;"), vec!["select\n1"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.finish(), None);
    }
}
