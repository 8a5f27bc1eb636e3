use super::functions::Function;
use super::{ErrorKind, ExpandError};

/// A parsed template node.
#[derive(Debug)]
pub(super) enum Node {
    Text(String),
    Print(Pipeline),
    Declare {
        name: String,
        value: Pipeline,
    },
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        index: Option<String>,
        element: Option<String>,
        source: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// `cmd | cmd | ...`; the value of each command is appended as the last
/// argument of the next one.
#[derive(Debug)]
pub(super) struct Pipeline {
    pub at: usize,
    pub commands: Vec<Command>,
}

#[derive(Debug)]
pub(super) enum Command {
    Call {
        at: usize,
        function: Function,
        args: Vec<Operand>,
    },
    Value(Operand),
}

#[derive(Debug)]
pub(super) enum Operand {
    Int(i64),
    Str(String),
    Bool(bool),
    Var { at: usize, name: String },
    Dot,
    Nested(Box<Pipeline>),
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    /// Identifier immediately followed by `(`, e.g. `int(`.
    Call(String),
    Var(String),
    Dot,
    Int(i64),
    Str(String),
    Bool(bool),
    LParen,
    RParen,
    Comma,
    Pipe,
    Declare,
    If,
    Range,
    Else,
    End,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    at: usize,
}

enum Item {
    Text(String),
    Action { at: usize, tokens: Vec<Token> },
}

/// Deepest allowed nesting of blocks, and separately of parenthesised or
/// call-style expressions.
const MAX_NESTING: usize = 100;

fn syntax(at: usize, message: impl Into<String>) -> ExpandError {
    ExpandError::new(at, ErrorKind::Syntax(message.into()))
}

/// Parse a template into a node tree. Unknown function names are rejected here.
pub(super) fn parse(src: &str) -> Result<Vec<Node>, ExpandError> {
    let items = lex(src)?;
    let mut parser = Parser {
        items: items.into_iter(),
        depth: 0,
    };
    let (nodes, end) = parser.list()?;
    match end {
        Terminator::Eof => Ok(nodes),
        Terminator::End(at) => Err(syntax(at, "unexpected {{end}}")),
        Terminator::Else(at) | Terminator::ElseIf(_, at) => Err(syntax(at, "unexpected {{else}}")),
    }
}

// --- lexer ---

fn lex(src: &str) -> Result<Vec<Item>, ExpandError> {
    let mut items = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while let Some(offset) = src[pos..].find("{{") {
        let open = pos + offset;
        let mut text = &src[pos..open];
        if trim_next {
            text = text.trim_start();
        }
        let mut cursor = open + 2;
        let after_open = &src[cursor..];
        if after_open.starts_with('-') && after_open[1..].starts_with(char::is_whitespace) {
            text = text.trim_end();
            cursor += 1;
        }
        push_text(&mut items, text);

        let body = &src[cursor..];
        let skipped = body.len() - body.trim_start().len();
        if body[skipped..].starts_with("/*") {
            let comment_start = cursor + skipped;
            let close = src[comment_start..]
                .find("*/")
                .ok_or_else(|| syntax(open, "unclosed comment"))?;
            let (end, trim) = close_delimiter(src, comment_start + close + 2, open)?;
            trim_next = trim;
            pos = end;
            continue;
        }

        let (tokens, end, trim) = lex_action(src, cursor, open)?;
        items.push(Item::Action { at: open, tokens });
        trim_next = trim;
        pos = end;
    }

    let mut text = &src[pos..];
    if trim_next {
        text = text.trim_start();
    }
    push_text(&mut items, text);
    Ok(items)
}

fn push_text(items: &mut Vec<Item>, text: &str) {
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
}

/// Expect `}}` or ` -}}` at `at` (after optional whitespace).
/// Returns the byte offset after the delimiter and whether to trim what follows.
fn close_delimiter(src: &str, at: usize, open: usize) -> Result<(usize, bool), ExpandError> {
    let rest = &src[at..];
    let trimmed = rest.trim_start();
    let ws = rest.len() - trimmed.len();
    if ws > 0 && trimmed.starts_with("-}}") {
        Ok((at + ws + 3, true))
    } else if trimmed.starts_with("}}") {
        Ok((at + ws + 2, false))
    } else {
        Err(syntax(open, "comment must be the only content of an action"))
    }
}

fn lex_action(
    src: &str,
    start: usize,
    open: usize,
) -> Result<(Vec<Token>, usize, bool), ExpandError> {
    let mut tokens = Vec::new();
    let mut i = start;

    loop {
        let rest = &src[i..];
        let Some(c) = rest.chars().next() else {
            return Err(syntax(open, "unclosed action"));
        };

        if c.is_whitespace() {
            let trimmed = rest.trim_start();
            let ws = rest.len() - trimmed.len();
            if trimmed.starts_with("-}}") {
                return Ok((tokens, i + ws + 3, true));
            }
            i += ws;
            continue;
        }
        if rest.starts_with("}}") {
            return Ok((tokens, i + 2, false));
        }

        let (kind, len) = match c {
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            ',' => (TokenKind::Comma, 1),
            '|' => (TokenKind::Pipe, 1),
            '.' => (TokenKind::Dot, 1),
            ':' if rest.starts_with(":=") => (TokenKind::Declare, 2),
            '"' => lex_string(rest, i)?,
            '$' => {
                let name = ident_prefix(&rest[1..]);
                if name.is_empty() {
                    return Err(syntax(i, "expected variable name after '$'"));
                }
                (TokenKind::Var(name.to_string()), 1 + name.len())
            }
            '-' | '0'..='9' => lex_number(rest, i)?,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let name = ident_prefix(rest);
                let kind = match name {
                    "if" => TokenKind::If,
                    "range" => TokenKind::Range,
                    "else" => TokenKind::Else,
                    "end" => TokenKind::End,
                    "true" => TokenKind::Bool(true),
                    "false" => TokenKind::Bool(false),
                    _ if rest[name.len()..].starts_with('(') => {
                        tokens.push(Token {
                            kind: TokenKind::Call(name.to_string()),
                            at: i,
                        });
                        i += name.len() + 1;
                        continue;
                    }
                    _ => TokenKind::Ident(name.to_string()),
                };
                (kind, name.len())
            }
            other => return Err(syntax(i, format!("unexpected character {other:?}"))),
        };
        tokens.push(Token { kind, at: i });
        i += len;
    }
}

fn ident_prefix(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

fn lex_number(rest: &str, at: usize) -> Result<(TokenKind, usize), ExpandError> {
    let digits_from = usize::from(rest.starts_with('-'));
    let digits = rest[digits_from..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len() - digits_from);
    if digits == 0 {
        return Err(syntax(at, "unexpected '-'"));
    }
    let len = digits_from + digits;
    let n = rest[..len]
        .parse::<i64>()
        .map_err(|_| syntax(at, format!("integer out of range: {}", &rest[..len])))?;
    Ok((TokenKind::Int(n), len))
}

fn lex_string(rest: &str, at: usize) -> Result<(TokenKind, usize), ExpandError> {
    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => return Ok((TokenKind::Str(out), idx + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(syntax(at, "unterminated string"))
}

// --- parser ---

enum Action {
    Print(Pipeline),
    Declare(String, Pipeline),
    If(Pipeline),
    ElseIf(Pipeline),
    Else,
    End,
    Range {
        index: Option<String>,
        element: Option<String>,
        source: Pipeline,
    },
}

enum Terminator {
    Eof,
    End(usize),
    Else(usize),
    ElseIf(Pipeline, usize),
}

struct Parser {
    items: std::vec::IntoIter<Item>,
    depth: usize,
}

impl Parser {
    fn list(&mut self) -> Result<(Vec<Node>, Terminator), ExpandError> {
        let mut nodes = Vec::new();
        while let Some(item) = self.items.next() {
            let (at, tokens) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { at, tokens } => (at, tokens),
            };
            match classify(&tokens, at)? {
                Action::Print(pipeline) => nodes.push(Node::Print(pipeline)),
                Action::Declare(name, value) => nodes.push(Node::Declare { name, value }),
                Action::If(cond) => {
                    let node = self.nested(at, |p| p.if_block(cond, at))?;
                    nodes.push(node);
                }
                Action::Range {
                    index,
                    element,
                    source,
                } => {
                    let (body, otherwise) = self.nested(at, |p| p.range_block(at))?;
                    nodes.push(Node::Range {
                        index,
                        element,
                        source,
                        body,
                        otherwise,
                    });
                }
                Action::Else => return Ok((nodes, Terminator::Else(at))),
                Action::ElseIf(cond) => return Ok((nodes, Terminator::ElseIf(cond, at))),
                Action::End => return Ok((nodes, Terminator::End(at))),
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn nested<T>(
        &mut self,
        at: usize,
        block: impl FnOnce(&mut Self) -> Result<T, ExpandError>,
    ) -> Result<T, ExpandError> {
        if self.depth >= MAX_NESTING {
            return Err(syntax(at, "blocks nested too deeply"));
        }
        self.depth += 1;
        let result = block(self);
        self.depth -= 1;
        result
    }

    fn if_block(&mut self, first: Pipeline, at: usize) -> Result<Node, ExpandError> {
        let mut branches = Vec::new();
        let mut cond = first;
        loop {
            let (body, end) = self.list()?;
            branches.push((cond, body));
            match end {
                Terminator::End(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Terminator::ElseIf(next, _) => cond = next,
                Terminator::Else(_) => {
                    let otherwise = self.closing_branch(at, "if")?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                Terminator::Eof => return Err(syntax(at, "unclosed {{if}}")),
            }
        }
    }

    fn range_block(&mut self, at: usize) -> Result<(Vec<Node>, Vec<Node>), ExpandError> {
        let (body, end) = self.list()?;
        match end {
            Terminator::End(_) => Ok((body, Vec::new())),
            Terminator::Else(_) => Ok((body, self.closing_branch(at, "range")?)),
            Terminator::ElseIf(_, else_at) => {
                Err(syntax(else_at, "{{else if}} is not allowed in {{range}}"))
            }
            Terminator::Eof => Err(syntax(at, "unclosed {{range}}")),
        }
    }

    /// Parse the final `{{else}}` branch, which must be closed by `{{end}}`.
    fn closing_branch(&mut self, at: usize, block: &str) -> Result<Vec<Node>, ExpandError> {
        let (otherwise, end) = self.list()?;
        match end {
            Terminator::End(_) => Ok(otherwise),
            Terminator::Else(else_at) | Terminator::ElseIf(_, else_at) => {
                Err(syntax(else_at, "unexpected {{else}} after {{else}}"))
            }
            Terminator::Eof => Err(syntax(at, format!("unclosed {{{{{block}}}}}"))),
        }
    }
}

fn classify(tokens: &[Token], at: usize) -> Result<Action, ExpandError> {
    let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
    match kinds.as_slice() {
        [] => Err(syntax(at, "empty action")),
        [TokenKind::End] => Ok(Action::End),
        [TokenKind::Else] => Ok(Action::Else),
        [TokenKind::Else, TokenKind::If, ..] => Ok(Action::ElseIf(whole_pipeline(&tokens[2..], at)?)),
        [TokenKind::If, ..] => Ok(Action::If(whole_pipeline(&tokens[1..], at)?)),
        [TokenKind::Range, TokenKind::Var(i), TokenKind::Comma, TokenKind::Var(e), TokenKind::Declare, ..] => {
            Ok(Action::Range {
                index: Some(i.clone()),
                element: Some(e.clone()),
                source: whole_pipeline(&tokens[5..], at)?,
            })
        }
        [TokenKind::Range, TokenKind::Var(e), TokenKind::Declare, ..] => Ok(Action::Range {
            index: None,
            element: Some(e.clone()),
            source: whole_pipeline(&tokens[3..], at)?,
        }),
        [TokenKind::Range, ..] => Ok(Action::Range {
            index: None,
            element: None,
            source: whole_pipeline(&tokens[1..], at)?,
        }),
        [TokenKind::Var(name), TokenKind::Declare, ..] => Ok(Action::Declare(
            name.clone(),
            whole_pipeline(&tokens[2..], at)?,
        )),
        [TokenKind::End | TokenKind::Else, ..] => {
            Err(syntax(tokens[1].at, "unexpected token after keyword"))
        }
        _ => Ok(Action::Print(whole_pipeline(tokens, at)?)),
    }
}

/// Parse `tokens` as one pipeline that must consume every token.
fn whole_pipeline(tokens: &[Token], at: usize) -> Result<Pipeline, ExpandError> {
    let mut cursor = Cursor {
        tokens,
        pos: 0,
        at,
        depth: 0,
    };
    let pipeline = cursor.pipeline()?;
    if let Some(extra) = cursor.peek() {
        return Err(syntax(extra.at, format!("unexpected {}", describe(&extra.kind))));
    }
    Ok(pipeline)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) | TokenKind::Call(name) => format!("identifier {name:?}"),
        TokenKind::Var(name) => format!("variable ${name}"),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Int(n) => format!("number {n}"),
        TokenKind::Str(s) => format!("string {s:?}"),
        TokenKind::Bool(b) => format!("{b}"),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Pipe => "'|'".to_string(),
        TokenKind::Declare => "':='".to_string(),
        TokenKind::If => "keyword if".to_string(),
        TokenKind::Range => "keyword range".to_string(),
        TokenKind::Else => "keyword else".to_string(),
        TokenKind::End => "keyword end".to_string(),
    }
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    at: usize,
    depth: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next_at(&self) -> usize {
        self.peek().map_or(self.at, |t| t.at)
    }

    fn pipeline(&mut self) -> Result<Pipeline, ExpandError> {
        let at = self.next_at();
        if self.depth > MAX_NESTING {
            return Err(syntax(at, "expression nested too deeply"));
        }
        self.depth += 1;
        let pipeline = self.commands(at);
        self.depth -= 1;
        pipeline
    }

    fn commands(&mut self, at: usize) -> Result<Pipeline, ExpandError> {
        let mut commands = vec![self.command()?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Pipe)) {
            self.pos += 1;
            let next_at = self.next_at();
            let command = self.command()?;
            if matches!(command, Command::Value(_)) {
                return Err(syntax(next_at, "cannot pipe into a non-function"));
            }
            commands.push(command);
        }
        Ok(Pipeline { at, commands })
    }

    fn command(&mut self) -> Result<Command, ExpandError> {
        let Some(token) = self.peek().cloned() else {
            return Err(syntax(self.at, "missing value"));
        };
        match token.kind {
            TokenKind::Ident(name) => {
                self.pos += 1;
                let function = lookup(&name, token.at)?;
                let mut args = Vec::new();
                while let Some(operand) = self.operand()? {
                    args.push(operand);
                }
                Ok(Command::Call {
                    at: token.at,
                    function,
                    args,
                })
            }
            TokenKind::Call(name) => {
                self.pos += 1;
                self.call_style(&name, token.at)
            }
            _ => match self.operand()? {
                Some(operand) => Ok(Command::Value(operand)),
                None => Err(syntax(token.at, format!("unexpected {}", describe(&token.kind)))),
            },
        }
    }

    /// `name(arg, arg)` with the opening parenthesis already consumed.
    fn call_style(&mut self, name: &str, at: usize) -> Result<Command, ExpandError> {
        let function = lookup(name, at)?;
        let mut args = Vec::new();
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
            self.pos += 1;
            return Ok(Command::Call { at, function, args });
        }
        loop {
            args.push(Operand::Nested(Box::new(self.pipeline()?)));
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Comma) => self.pos += 1,
                Some(TokenKind::RParen) => {
                    self.pos += 1;
                    return Ok(Command::Call { at, function, args });
                }
                _ => return Err(syntax(self.next_at(), format!("expected ',' or ')' in call to {name}"))),
            }
        }
    }

    /// Parse one operand, or return `None` at a pipeline boundary.
    fn operand(&mut self) -> Result<Option<Operand>, ExpandError> {
        let Some(token) = self.peek().cloned() else {
            return Ok(None);
        };
        let operand = match token.kind {
            TokenKind::Pipe | TokenKind::RParen | TokenKind::Comma => return Ok(None),
            TokenKind::Int(n) => Operand::Int(n),
            TokenKind::Str(s) => Operand::Str(s),
            TokenKind::Bool(b) => Operand::Bool(b),
            TokenKind::Var(name) => Operand::Var { at: token.at, name },
            TokenKind::Dot => Operand::Dot,
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.pipeline()?;
                if !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
                    return Err(syntax(self.next_at(), "expected ')'"));
                }
                self.pos += 1;
                return Ok(Some(Operand::Nested(Box::new(inner))));
            }
            TokenKind::Call(name) => {
                self.pos += 1;
                let call = self.call_style(&name, token.at)?;
                return Ok(Some(Operand::Nested(Box::new(Pipeline {
                    at: token.at,
                    commands: vec![call],
                }))));
            }
            TokenKind::Ident(name) => {
                // A bare function name used as an argument is a call with no arguments.
                let function = lookup(&name, token.at)?;
                Operand::Nested(Box::new(Pipeline {
                    at: token.at,
                    commands: vec![Command::Call {
                        at: token.at,
                        function,
                        args: Vec::new(),
                    }],
                }))
            }
            TokenKind::Declare
            | TokenKind::If
            | TokenKind::Range
            | TokenKind::Else
            | TokenKind::End => {
                return Err(syntax(token.at, format!("unexpected {}", describe(&token.kind))));
            }
        };
        self.pos += 1;
        Ok(Some(operand))
    }
}

fn lookup(name: &str, at: usize) -> Result<Function, ExpandError> {
    Function::from_name(name)
        .ok_or_else(|| ExpandError::new(at, ErrorKind::UnknownFunction(name.to_string())))
}
