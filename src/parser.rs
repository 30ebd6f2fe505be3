// Template tag parser
// Splits template source into text and `{{...}}` tags, classifies each tag
// and parses the pipe expressions inside it.

use thiserror::Error;

use crate::ast::{Argument, Head, Literal, ObjectPath, PipeExpr, Stage};
use crate::functions::literal_slots;

/// Characters of source shown on each side of an offending tag.
const CONTEXT_CHARS: usize = 15;

/// Parse errors, raised before any output is produced
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Parse error: '{tag}' does not close the innermost open block (expected {expected}) near \"{context}\"")]
    Unbalanced {
        tag: String,
        expected: String,
        context: String,
    },

    #[error("Parse error: '{tag}' outside of an if block near \"{context}\"")]
    UnexpectedElse { tag: String, context: String },

    #[error("Parse error: '{tag}' is never closed near \"{context}\"")]
    Unclosed { tag: String, context: String },

    #[error("Parse error: {message} in '{tag}' near \"{context}\"")]
    Syntax {
        tag: String,
        message: String,
        context: String,
    },
}

impl ParseError {
    /// The offending tag, delimiters included.
    pub fn tag(&self) -> &str {
        match self {
            ParseError::Unbalanced { tag, .. }
            | ParseError::UnexpectedElse { tag, .. }
            | ParseError::Unclosed { tag, .. }
            | ParseError::Syntax { tag, .. } => tag,
        }
    }

    /// Source surrounding the offending tag.
    pub fn context(&self) -> &str {
        match self {
            ParseError::Unbalanced { context, .. }
            | ParseError::UnexpectedElse { context, .. }
            | ParseError::Unclosed { context, .. }
            | ParseError::Syntax { context, .. } => context,
        }
    }
}

// ── Template splitting ───────────────────────────────────────────────────────

/// Location of a `{{...}}` tag within its template source.
#[derive(Debug, Clone, Copy)]
pub struct TagSite<'a> {
    source: &'a str,
    start: usize,
    end: usize,
}

impl<'a> TagSite<'a> {
    /// The whole tag, delimiters included.
    pub fn text(&self) -> &'a str {
        &self.source[self.start..self.end]
    }

    /// Tag body with surrounding whitespace trimmed.
    pub fn body(&self) -> &'a str {
        self.source[self.start + 2..self.end - 2].trim()
    }

    /// The tag plus a few characters of source on each side.
    pub fn context(&self) -> String {
        let before = self.source[..self.start]
            .char_indices()
            .rev()
            .nth(CONTEXT_CHARS - 1)
            .map_or(0, |(i, _)| i);
        let after = self.source[self.end..]
            .char_indices()
            .nth(CONTEXT_CHARS)
            .map_or(self.source.len(), |(i, _)| self.end + i);
        self.source[before..after].to_string()
    }

    pub fn syntax_error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            tag: self.text().to_string(),
            message: message.into(),
            context: self.context(),
        }
    }
}

/// A run of literal text or a tag.
#[derive(Debug, Clone, Copy)]
pub enum Piece<'a> {
    Text(&'a str),
    Tag(TagSite<'a>),
}

/// Split `source` into text and tags. An opening `{{` without a matching
/// `}}` is kept as text.
pub fn split_template(source: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut position = 0;

    while let Some(offset) = source[position..].find("{{") {
        let start = position + offset;
        let Some(close) = source[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        if start > position {
            pieces.push(Piece::Text(&source[position..start]));
        }
        pieces.push(Piece::Tag(TagSite { source, start, end }));
        position = end;
    }

    if position < source.len() {
        pieces.push(Piece::Text(&source[position..]));
    }
    pieces
}

// ── Tag classification ───────────────────────────────────────────────────────

/// What a tag asks the compiler to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Comment,
    /// `{{/name}}`
    Close(String),
    Else,
    If { negate: bool, groups: Vec<PipeExpr> },
    Foreach(PipeExpr),
    Eval { expr: PipeExpr, raw: bool },
}

pub fn parse_tag(site: &TagSite<'_>) -> Result<Tag, ParseError> {
    let body = site.body();
    let syntax = |message: String| site.syntax_error(message);

    if body.starts_with('!') {
        return Ok(Tag::Comment);
    }
    if let Some(name) = body.strip_prefix('/') {
        return Ok(Tag::Close(name.trim().to_string()));
    }
    if body == "else" {
        return Ok(Tag::Else);
    }
    if let Some(rest) = body.strip_prefix(':').or_else(|| body.strip_prefix('&')) {
        return Ok(Tag::Eval {
            expr: parse_eval_body(rest).map_err(syntax)?,
            raw: true,
        });
    }
    if let Some(rest) = strip_keyword(body, "if") {
        let (negate, condition) = match strip_keyword(rest, "not") {
            Some(condition) => (true, condition),
            None => (false, rest),
        };
        let groups = parse_condition(condition).map_err(syntax)?;
        return Ok(Tag::If { negate, groups });
    }
    if let Some(rest) = strip_keyword(body, "foreach") {
        return Ok(Tag::Foreach(parse_pipe(rest).map_err(syntax)?));
    }
    Ok(Tag::Eval {
        expr: parse_eval_body(body).map_err(syntax)?,
        raw: false,
    })
}

/// A keyword counts only when followed by whitespace, `(` or the end.
fn strip_keyword<'a>(body: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = body.strip_prefix(keyword)?;
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() || c == '(' => Some(rest.trim_start()),
        Some(_) => None,
    }
}

/// An empty output tag emits the current iteration key.
fn parse_eval_body(body: &str) -> Result<PipeExpr, String> {
    if body.trim().is_empty() {
        Ok(PipeExpr::index())
    } else {
        parse_pipe(body)
    }
}

// ── Lexer ────────────────────────────────────────────────────────────────────

/// Token types inside a pipe expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    String(String),
    Number(f64),
    True,
    False,
    Null,
    /// Bare word: a path in head position, a stage name afterwards
    Identifier(String),
    /// `$path` argument
    Variable(String),
    Eof,
}

/// Lexer for the whitespace-separated tokens of a pipe expression
pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote_char: char) -> Result<String, String> {
        let mut result = String::new();
        self.advance(); // skip opening quote

        loop {
            match self.current() {
                None => return Err(format!("unclosed string literal {}{}", quote_char, result)),
                Some(ch) if ch == quote_char => {
                    self.advance(); // skip closing quote
                    return Ok(result);
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        None => return Err("unclosed string literal".to_string()),
                        Some(ch @ ('"' | '\'' | '\\')) => result.push(ch),
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        // Anything else is kept verbatim, so `\s` reaches regex patterns intact
                        Some(ch) => {
                            result.push('\\');
                            result.push(ch);
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_word(&mut self) -> String {
        let start = self.position;
        while self.current().map_or(false, |c| !c.is_whitespace()) {
            self.advance();
        }
        self.input[start..self.position].iter().collect()
    }

    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace();

        match self.current() {
            None => Ok(Token::Eof),
            Some(quote @ ('"' | '\'')) => self.read_string(quote).map(Token::String),
            Some(_) => Ok(classify_word(self.read_word())),
        }
    }
}

fn classify_word(word: String) -> Token {
    if word == "true" {
        Token::True
    } else if word == "false" {
        Token::False
    } else if word == "null" {
        Token::Null
    } else if let Some(path) = word.strip_prefix('$') {
        Token::Variable(path.to_string())
    } else if looks_numeric(&word) {
        match word.parse::<f64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Identifier(word),
        }
    } else {
        Token::Identifier(word)
    }
}

/// Keeps words like `inf` or `NaN` out of number parsing.
fn looks_numeric(word: &str) -> bool {
    let unsigned = word.strip_prefix(['-', '+']).unwrap_or(word);
    let unsigned = unsigned.strip_prefix('.').unwrap_or(unsigned);
    unsigned.starts_with(|c: char| c.is_ascii_digit())
}

fn into_literal(token: Token) -> Option<Literal> {
    match token {
        Token::String(s) => Some(Literal::String(s)),
        Token::Number(n) => Some(Literal::Number(n)),
        Token::True => Some(Literal::Boolean(true)),
        Token::False => Some(Literal::Boolean(false)),
        Token::Null => Some(Literal::Null),
        Token::Identifier(_) | Token::Variable(_) | Token::Eof => None,
    }
}

// ── Pipe expressions ─────────────────────────────────────────────────────────

/// Parse `head stage arg... stage arg...`.
///
/// After the head, a bare word starts a new stage unless the stage before it
/// is a built-in pipe with a parameter still open and the word is not itself
/// a built-in; then it is a string argument (`as who`, `choose yes no`).
/// Literals and `$path` tokens are arguments of the stage before them.
pub fn parse_pipe(text: &str) -> Result<PipeExpr, String> {
    let mut lexer = Lexer::new(text);

    let head = match lexer.next_token()? {
        Token::Eof => return Err("empty expression".to_string()),
        Token::Identifier(path) | Token::Variable(path) => Head::Path(ObjectPath::parse(&path)),
        token => match into_literal(token) {
            Some(literal) => Head::Literal(literal),
            None => return Err("expected a path or literal".to_string()),
        },
    };

    let mut stages: Vec<Stage> = Vec::new();
    loop {
        let argument = match lexer.next_token()? {
            Token::Eof => break,
            Token::Identifier(name) if takes_bare_word(stages.last(), &name) => {
                Argument::Literal(Literal::String(name))
            }
            Token::Identifier(name) => {
                stages.push(Stage {
                    name,
                    args: Vec::new(),
                });
                continue;
            }
            Token::Variable(path) => Argument::Path(ObjectPath::parse(&path)),
            token => match into_literal(token) {
                Some(literal) => Argument::Literal(literal),
                None => return Err("unexpected token".to_string()),
            },
        };
        match stages.last_mut() {
            Some(stage) => stage.args.push(argument),
            None => return Err("argument given before any pipe stage".to_string()),
        }
    }

    Ok(PipeExpr { head, stages })
}

fn takes_bare_word(stage: Option<&Stage>, word: &str) -> bool {
    let open = stage.map_or(false, |stage| {
        literal_slots(&stage.name).map_or(false, |slots| stage.args.len() < slots)
    });
    open && literal_slots(word).is_none()
}

/// Parse an `if` condition: `(pipe)(pipe)...` or a single bare pipe.
pub fn parse_condition(text: &str) -> Result<Vec<PipeExpr>, String> {
    let text = text.trim();
    if !text.starts_with('(') {
        return Ok(vec![parse_pipe(text)?]);
    }

    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' if depth > 0 => quote = Some(ch),
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err("unbalanced ')'".to_string());
                }
                depth -= 1;
                if depth == 0 {
                    groups.push(parse_pipe(&text[start..i])?);
                }
            }
            c if depth == 0 && !c.is_whitespace() => {
                return Err(format!("unexpected '{}' between condition groups", c));
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unclosed string literal".to_string());
    }
    if depth > 0 {
        return Err("unclosed '('".to_string());
    }
    Ok(groups)
}
