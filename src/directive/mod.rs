//! Query templates ("directives").
//!
//! A query whose first character is [`MARKER`] is a template. The rest of the
//! text is copied verbatim except for `{{ ... }}` actions, which call the
//! generator functions in [`Function`] and control flow (`range`, `if`).
//!
//! ```text
//! !insert into t values {{range $i := count 3}}({{int 0 100}}, '{{char 8}}'){{if head $i}}, {{end}}{{end}}
//! ```
//!
//! Generators draw from a random source owned by the [`Expander`], so two
//! expansions of the same template normally differ.

mod functions;
mod parse;

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use functions::{Function, MAX_GENERATED, Value};
use parse::{Command, Node, Operand, Pipeline};

/// First character of a templated query.
pub const MARKER: char = '!';

/// Returns true if `query` should be expanded before execution.
pub fn is_template(query: &str) -> bool {
    query.len() > 1 && query.starts_with(MARKER)
}

/// Returns true if the expanded text (rather than the template) is the
/// canonical form of `query`, i.e. it starts with a doubled marker.
pub fn records_expansion(query: &str) -> bool {
    query.starts_with("!!")
}

/// Strip every leading marker from a templated query.
pub fn strip_marker(query: &str) -> &str {
    query.trim_start_matches(MARKER)
}

/// Why a template could not be expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax(String),
    UnknownFunction(String),
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },
    Type {
        function: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    UndefinedVariable(String),
    /// `last`/`head` called without a sequence outside any `range`.
    NoIterationContext(&'static str),
    Limit {
        function: &'static str,
        requested: i64,
        limit: i64,
    },
}

/// A template failure at byte offset `at` of the template body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandError {
    pub at: usize,
    pub kind: ErrorKind,
}

impl ExpandError {
    pub const fn new(at: usize, kind: ErrorKind) -> Self {
        Self { at, kind }
    }
}

impl fmt::Display for ExpandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template:{}: ", self.at)?;
        match &self.kind {
            ErrorKind::Syntax(msg) => f.write_str(msg),
            ErrorKind::UnknownFunction(name) => write!(f, "function {name:?} not defined"),
            ErrorKind::Arity {
                function,
                expected,
                got,
            } => write!(f, "wrong number of args for {function}: want {expected} got {got}"),
            ErrorKind::Type {
                function,
                expected,
                got,
            } => write!(f, "wrong type for {function}: want {expected} got {got}"),
            ErrorKind::UndefinedVariable(name) => write!(f, "undefined variable ${name}"),
            ErrorKind::NoIterationContext(function) => {
                write!(f, "{function} needs a sequence argument outside of range")
            }
            ErrorKind::Limit {
                function,
                requested,
                limit,
            } => write!(f, "{function}({requested}) exceeds the limit of {limit}"),
        }
    }
}

impl std::error::Error for ExpandError {}

/// Expands query templates using an owned random source.
pub struct Expander<R = StdRng> {
    rng: R,
}

impl Expander<StdRng> {
    /// Create an expander seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Create an expander with a fixed seed; expansions become reproducible.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for Expander<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> Expander<R> {
    pub const fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Expand a template body (without the leading marker).
    ///
    /// The whole template is parsed before anything is evaluated, so a
    /// failure never yields partial output. The result is trimmed.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpandError`] for syntax errors, unknown functions,
    /// wrong argument counts or types, and undefined variables.
    pub fn expand(&mut self, template: &str) -> Result<String, ExpandError> {
        let nodes = parse::parse(template)?;
        let mut eval = Evaluator {
            rng: &mut self.rng,
            vars: Vec::new(),
            loops: Vec::new(),
            dot: Value::Nil,
            out: String::new(),
        };
        eval.walk(&nodes)?;
        Ok(eval.out.trim().to_string())
    }

    /// Expand `query` if it is a template, otherwise return it unchanged.
    ///
    /// # Errors
    ///
    /// See [`Expander::expand`].
    pub fn expand_query(&mut self, query: &str) -> Result<String, ExpandError> {
        if is_template(query) {
            self.expand(strip_marker(query))
        } else {
            Ok(query.to_string())
        }
    }
}

struct Evaluator<'r, R: ?Sized> {
    rng: &'r mut R,
    /// Visible variables, innermost last.
    vars: Vec<(String, Value)>,
    /// Lengths of the enclosing `range` loops, innermost last.
    loops: Vec<usize>,
    dot: Value,
    out: String,
}

impl<R: Rng + ?Sized> Evaluator<'_, R> {
    fn walk(&mut self, nodes: &[Node]) -> Result<(), ExpandError> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Print(pipeline) => {
                    let value = self.pipeline(pipeline)?;
                    self.out.push_str(&value.to_string());
                }
                Node::Declare { name, value } => {
                    let value = self.pipeline(value)?;
                    self.vars.push((name.clone(), value));
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = otherwise.as_slice();
                    for (cond, body) in branches {
                        if self.pipeline(cond)?.truthy() {
                            taken = body.as_slice();
                            break;
                        }
                    }
                    self.scoped(taken)?;
                }
                Node::Range {
                    index,
                    element,
                    source,
                    body,
                    otherwise,
                } => {
                    let len = match self.pipeline(source)? {
                        Value::Seq(n) => n,
                        Value::Int(n) if n > MAX_GENERATED => {
                            return Err(ExpandError::new(
                                source.at,
                                ErrorKind::Limit {
                                    function: "range",
                                    requested: n,
                                    limit: MAX_GENERATED,
                                },
                            ));
                        }
                        Value::Int(n) => usize::try_from(n).unwrap_or(0),
                        other => {
                            return Err(ExpandError::new(
                                source.at,
                                ErrorKind::Type {
                                    function: "range",
                                    expected: "sequence",
                                    got: other.kind(),
                                },
                            ));
                        }
                    };
                    if len == 0 {
                        self.scoped(otherwise)?;
                    } else {
                        self.iterate(len, index.as_deref(), element.as_deref(), body)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn iterate(
        &mut self,
        len: usize,
        index: Option<&str>,
        element: Option<&str>,
        body: &[Node],
    ) -> Result<(), ExpandError> {
        self.loops.push(len);
        let outer_dot = std::mem::replace(&mut self.dot, Value::Nil);
        for i in 0..len {
            let item = Value::Int(i64::try_from(i).unwrap_or(i64::MAX));
            let mark = self.vars.len();
            if let Some(name) = index {
                self.vars.push((name.to_string(), item.clone()));
            }
            if let Some(name) = element {
                self.vars.push((name.to_string(), item.clone()));
            }
            self.dot = item;
            self.walk(body)?;
            self.vars.truncate(mark);
        }
        self.dot = outer_dot;
        self.loops.pop();
        Ok(())
    }

    fn scoped(&mut self, body: &[Node]) -> Result<(), ExpandError> {
        let mark = self.vars.len();
        self.walk(body)?;
        self.vars.truncate(mark);
        Ok(())
    }

    fn pipeline(&mut self, pipeline: &Pipeline) -> Result<Value, ExpandError> {
        let mut carried: Option<Value> = None;
        for command in &pipeline.commands {
            let value = match command {
                Command::Value(operand) => self.operand(operand)?,
                Command::Call { at, function, args } => {
                    let mut values = args
                        .iter()
                        .map(|arg| self.operand(arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    values.extend(carried.take());
                    function
                        .call(&values, self.loops.last().copied(), &mut *self.rng)
                        .map_err(|kind| ExpandError::new(*at, kind))?
                }
            };
            carried = Some(value);
        }
        carried.ok_or_else(|| {
            ExpandError::new(pipeline.at, ErrorKind::Syntax("missing value".to_string()))
        })
    }

    fn operand(&mut self, operand: &Operand) -> Result<Value, ExpandError> {
        match operand {
            Operand::Int(n) => Ok(Value::Int(*n)),
            Operand::Str(s) => Ok(Value::Str(s.clone())),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::Dot => Ok(self.dot.clone()),
            Operand::Var { at, name } => self
                .vars
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ExpandError::new(*at, ErrorKind::UndefinedVariable(name.clone()))),
            Operand::Nested(inner) => self.pipeline(inner),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests;
