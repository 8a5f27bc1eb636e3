use std::fmt;

use rand::Rng;

use super::ErrorKind;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Upper bound for generated string lengths and `count` sequences.
pub const MAX_GENERATED: i64 = 1 << 20;

/// A value produced while evaluating a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    /// Opaque sequence produced by `count`; only its length is observable.
    Seq(usize),
    Nil,
}

impl Value {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::Seq(_) => "sequence",
            Self::Nil => "nil",
        }
    }

    /// Truthiness used by `{{if}}`: zero, false, empty strings, empty sequences
    /// and nil are false.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Int(n) => *n != 0,
            Self::Bool(b) => *b,
            Self::Str(s) => !s.is_empty(),
            Self::Seq(n) => *n > 0,
            Self::Nil => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => f.write_str(s),
            Self::Seq(n) => {
                f.write_str("[")?;
                for i in 0..*n {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{i}")?;
                }
                f.write_str("]")
            }
            Self::Nil => Ok(()),
        }
    }
}

/// The closed set of generator functions a template may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `count(n)`: a sequence of `n` placeholders, usable as a `range` source.
    Count,
    /// `first(i)`: `i == 0`.
    First,
    /// `last(i[, seq])`: `i` is the final index of `seq`.
    Last,
    /// `head(i[, seq])`: `i` is before the final index of `seq`.
    Head,
    /// `tail(i)`: `i > 0`.
    Tail,
    /// `int(min, max)`: uniform integer in `[min, max)`.
    Int,
    /// `char(n)`: alphanumeric string of exactly `n` characters.
    Char,
    /// `varchar(max)`: alphanumeric string with length in `[max/2, max)`.
    Varchar,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            "head" => Some(Self::Head),
            "tail" => Some(Self::Tail),
            "int" => Some(Self::Int),
            "char" => Some(Self::Char),
            "varchar" => Some(Self::Varchar),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::First => "first",
            Self::Last => "last",
            Self::Head => "head",
            Self::Tail => "tail",
            Self::Int => "int",
            Self::Char => "char",
            Self::Varchar => "varchar",
        }
    }

    /// Apply the function to already-evaluated arguments.
    ///
    /// `iteration` is the length of the innermost enclosing `range`, used by
    /// `last`/`head` when no sequence argument is given.
    pub(super) fn call<R: Rng + ?Sized>(
        self,
        args: &[Value],
        iteration: Option<usize>,
        rng: &mut R,
    ) -> Result<Value, ErrorKind> {
        match self {
            Self::Count => {
                self.arity(args, 1, "1")?;
                let n = self.int_arg(args, 0)?;
                self.within_limit(n)?;
                Ok(Value::Seq(usize::try_from(n).unwrap_or(0)))
            }
            Self::First => {
                self.arity(args, 1, "1")?;
                Ok(Value::Bool(self.int_arg(args, 0)? == 0))
            }
            Self::Tail => {
                self.arity(args, 1, "1")?;
                Ok(Value::Bool(self.int_arg(args, 0)? > 0))
            }
            Self::Last | Self::Head => {
                if args.is_empty() || args.len() > 2 {
                    return Err(ErrorKind::Arity {
                        function: self.name(),
                        expected: "1 or 2",
                        got: args.len(),
                    });
                }
                let index = self.int_arg(args, 0)?;
                let len = match args.get(1) {
                    Some(Value::Seq(n)) => *n,
                    Some(other) => {
                        return Err(ErrorKind::Type {
                            function: self.name(),
                            expected: "sequence",
                            got: other.kind(),
                        });
                    }
                    None => iteration.ok_or(ErrorKind::NoIterationContext(self.name()))?,
                };
                let last = i64::try_from(len).unwrap_or(i64::MAX) - 1;
                Ok(Value::Bool(if self == Self::Last {
                    index == last
                } else {
                    index < last
                }))
            }
            Self::Int => {
                self.arity(args, 2, "2")?;
                let min = self.int_arg(args, 0)?;
                let max = self.int_arg(args, 1)?;
                Ok(Value::Int(random_int(rng, min, max)))
            }
            Self::Char => {
                self.arity(args, 1, "1")?;
                let n = self.int_arg(args, 0)?;
                self.within_limit(n)?;
                Ok(Value::Str(random_fixed(rng, n)))
            }
            Self::Varchar => {
                self.arity(args, 1, "1")?;
                let max = self.int_arg(args, 0)?;
                self.within_limit(max)?;
                Ok(Value::Str(random_varying(rng, max)))
            }
        }
    }

    fn arity(self, args: &[Value], want: usize, expected: &'static str) -> Result<(), ErrorKind> {
        if args.len() == want {
            Ok(())
        } else {
            Err(ErrorKind::Arity {
                function: self.name(),
                expected,
                got: args.len(),
            })
        }
    }

    fn int_arg(self, args: &[Value], idx: usize) -> Result<i64, ErrorKind> {
        match args.get(idx) {
            Some(Value::Int(n)) => Ok(*n),
            Some(other) => Err(ErrorKind::Type {
                function: self.name(),
                expected: "int",
                got: other.kind(),
            }),
            None => Err(ErrorKind::Arity {
                function: self.name(),
                expected: "more",
                got: args.len(),
            }),
        }
    }

    fn within_limit(self, n: i64) -> Result<(), ErrorKind> {
        if n > MAX_GENERATED {
            return Err(ErrorKind::Limit {
                function: self.name(),
                requested: n,
                limit: MAX_GENERATED,
            });
        }
        Ok(())
    }
}

/// Uniform integer in `[min, max)`, or `min` when the range is empty.
pub fn random_int<R: Rng + ?Sized>(rng: &mut R, min: i64, max: i64) -> i64 {
    if max <= min {
        return min;
    }
    rng.random_range(min..max)
}

/// Alphanumeric string of exactly `n` characters; empty for `n <= 0`.
pub fn random_fixed<R: Rng + ?Sized>(rng: &mut R, n: i64) -> String {
    if n <= 0 {
        return String::new();
    }
    (0..n)
        .map(|_| char::from(ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())]))
        .collect()
}

/// Alphanumeric string whose length falls in `[max/2, max)`; empty for `max < 2`.
pub fn random_varying<R: Rng + ?Sized>(rng: &mut R, max: i64) -> String {
    let half = max / 2;
    if half <= 0 {
        return String::new();
    }
    let len = half + rng.random_range(0..half);
    random_fixed(rng, len)
}
