//! Character scanner plus layout shaper.
//!
//! The scanner produces physical tokens; the shaper wraps it and turns
//! newline runs into virtual `Begin` / `End` / `LineEnd` tokens driven by an
//! indent stack. Inside parentheses or brackets layout is suppressed, which
//! is what permits multi-line calls and array literals.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::language::{Diagnostic, DiagnosticCode};

/// Keywords take priority over identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keyword {
    If,
    Else,
    For,
    To,
    By,
    Break,
    Continue,
    Or,
    And,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    Ident,
    Keyword(Keyword),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Color(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Question,
    Colon,
    LPar,
    RPar,
    LSqb,
    RSqb,
    Comma,
    /// `=>` single-line function body marker.
    Arrow,
    /// `=` definition.
    Define,
    /// `:=` assignment to an existing binding.
    Assign,
    /// Virtual: block opened by deeper indentation.
    Begin,
    /// Virtual: block closed by shallower indentation.
    End,
    /// Virtual: logical line terminator.
    LineEnd,
    Eof,
}

impl TokenKind {
    /// Short human name for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Ident => "identifier",
            TokenKind::Keyword(_) => "keyword",
            TokenKind::Int(_) | TokenKind::Float(_) => "number",
            TokenKind::Str(_) => "string",
            TokenKind::Bool(_) => "boolean",
            TokenKind::Color(_) => "color",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::EqEq => "`==`",
            TokenKind::NotEq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::Le => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::Ge => "`>=`",
            TokenKind::Question => "`?`",
            TokenKind::Colon => "`:`",
            TokenKind::LPar => "`(`",
            TokenKind::RPar => "`)`",
            TokenKind::LSqb => "`[`",
            TokenKind::RSqb => "`]`",
            TokenKind::Comma => "`,`",
            TokenKind::Arrow => "`=>`",
            TokenKind::Define => "`=`",
            TokenKind::Assign => "`:=`",
            TokenKind::Begin => "indented block",
            TokenKind::End => "end of block",
            TokenKind::LineEnd => "end of line",
            TokenKind::Eof => "end of input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based source line.
    pub line: usize,
    /// 0-based source column.
    pub col: usize,
    /// Absolute character offset.
    pub offset: usize,
}

/// Tokenize a whole source text. Diagnostics are collected, never thrown;
/// layout problems are warnings, lexical problems are errors.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    loop {
        let tok = lexer.next_token();
        let done = tok.kind == TokenKind::Eof;
        out.push(tok);
        if done {
            break;
        }
    }
    (out, lexer.diags)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indent_stack: Vec<usize>,
    paren_depth: usize,
    pending: VecDeque<Token>,
    diags: Vec<Diagnostic>,
    drained: bool,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            indent_stack: vec![0],
            paren_depth: 0,
            pending: VecDeque::new(),
            diags: Vec::new(),
            drained: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push_virtual(&mut self, kind: TokenKind, line: usize, col: usize, offset: usize) {
        self.pending.push_back(Token {
            kind,
            text: String::new(),
            line,
            col,
            offset,
        });
    }

    fn next_token(&mut self) -> Token {
        loop {
            if let Some(tok) = self.pending.pop_front() {
                return tok;
            }
            self.skip_trivia();
            if !self.pending.is_empty() {
                continue;
            }
            if self.pos >= self.chars.len() {
                self.drain_at_eof();
                continue;
            }
            if let Some(tok) = self.scan_token() {
                // A real token at column 0 under open blocks is an implicit
                // dedent to the top level; deliver the dedents first.
                if tok.col == 0 && self.indent_stack.len() > 1 && self.paren_depth == 0 {
                    self.shape(0, tok.line, tok.col, tok.offset);
                    self.pending.push_back(tok);
                    continue;
                }
                return tok;
            }
        }
    }

    /// Skip spaces, comments, and (inside parens) hidden newlines. At a
    /// layout-significant newline, consume the whole run and shape it.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('\n') => {
                    if self.paren_depth > 0 {
                        self.bump();
                    } else {
                        self.consume_newline_run();
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Consume a run of newlines (blank and comment-only lines included) plus
    /// the indentation of the last line, then shape against the indent stack.
    fn consume_newline_run(&mut self) {
        let mut width;
        loop {
            self.bump(); // the newline itself
            width = 0;
            loop {
                match self.peek() {
                    Some(' ') => {
                        width += 1;
                        self.bump();
                    }
                    Some('\t') => {
                        // Tabs expand to four columns for measurement.
                        width += 4;
                        self.bump();
                    }
                    Some('\r') => {
                        self.bump();
                    }
                    _ => break,
                }
            }
            match self.peek() {
                Some('\n') => continue,
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    if self.peek().is_none() {
                        return; // EOF drain will close everything
                    }
                }
                None => return,
                _ => break,
            }
        }
        self.shape(width, self.line, self.col, self.pos);
    }

    /// Emit virtual tokens for a newline landing at indent `width`.
    fn shape(&mut self, width: usize, line: usize, col: usize, offset: usize) {
        let top = *self.indent_stack.last().expect("indent stack never empty");
        if width > top {
            self.indent_stack.push(width);
            self.push_virtual(TokenKind::Begin, line, col, offset);
        } else if width < top {
            // Terminate the statement that the dedent ends.
            self.push_virtual(TokenKind::LineEnd, line, col, offset);
            while *self.indent_stack.last().unwrap() > width {
                self.indent_stack.pop();
                self.push_virtual(TokenKind::End, line, col, offset);
            }
            let landing = *self.indent_stack.last().unwrap();
            if landing != width {
                tracing::warn!(line, width, landing, "inconsistent indentation");
                self.diags.push(Diagnostic::warning(
                    DiagnosticCode::InconsistentIndent,
                    format!(
                        "indentation of {width} columns matches no enclosing block; continuing at {landing}"
                    ),
                    line,
                    col,
                ));
            }
            // The newline doubles as a separator at the landing level.
            self.push_virtual(TokenKind::LineEnd, line, col, offset);
        } else {
            self.push_virtual(TokenKind::LineEnd, line, col, offset);
        }
    }

    fn drain_at_eof(&mut self) {
        let (line, col, offset) = (self.line, self.col, self.pos);
        if !self.drained {
            self.drained = true;
            self.push_virtual(TokenKind::LineEnd, line, col, offset);
            while self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                self.push_virtual(TokenKind::End, line, col, offset);
            }
        }
        self.push_virtual(TokenKind::Eof, line, col, offset);
    }

    fn scan_token(&mut self) -> Option<Token> {
        let (line, col, offset) = (self.line, self.col, self.pos);
        let start = self.pos;
        let c = self.peek()?;

        let kind = if c.is_ascii_alphabetic() || c == '_' {
            self.scan_word()
        } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            self.scan_number(line, col)
        } else if c == '"' || c == '\'' {
            self.scan_string(line, col)
        } else if c == '#' {
            self.scan_color(line, col)
        } else {
            match self.scan_operator() {
                Some(kind) => kind,
                None => {
                    self.diags.push(Diagnostic::error(
                        DiagnosticCode::UnexpectedCharacter,
                        format!("unexpected character `{c}`"),
                        line,
                        col,
                    ));
                    self.bump();
                    return None;
                }
            }
        };

        let text: String = self.chars[start..self.pos].iter().collect();
        Some(Token {
            kind,
            text,
            line,
            col,
            offset,
        })
    }

    fn scan_word(&mut self) -> TokenKind {
        let mut word = String::new();
        self.scan_ident_segment(&mut word);
        let mut dotted = false;
        while self.peek() == Some('.')
            && self
                .peek_at(1)
                .is_some_and(|d| d.is_ascii_alphabetic() || d == '_')
        {
            dotted = true;
            word.push('.');
            self.bump();
            self.scan_ident_segment(&mut word);
        }
        if dotted {
            return TokenKind::Ident;
        }
        match word.as_str() {
            "if" => TokenKind::Keyword(Keyword::If),
            "else" => TokenKind::Keyword(Keyword::Else),
            "for" => TokenKind::Keyword(Keyword::For),
            "to" => TokenKind::Keyword(Keyword::To),
            "by" => TokenKind::Keyword(Keyword::By),
            "break" => TokenKind::Keyword(Keyword::Break),
            "continue" => TokenKind::Keyword(Keyword::Continue),
            "or" => TokenKind::Keyword(Keyword::Or),
            "and" => TokenKind::Keyword(Keyword::And),
            "not" => TokenKind::Keyword(Keyword::Not),
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            _ => TokenKind::Ident,
        }
    }

    fn scan_ident_segment(&mut self, into: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                into.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }

    fn scan_number(&mut self, line: usize, col: usize) -> TokenKind {
        let start = self.pos;
        let mut fractional = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).map_or(true, |c| !c.is_ascii_alphabetic()) {
            fractional = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            fractional = true;
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.diags.push(Diagnostic::error(
                    DiagnosticCode::MalformedNumber,
                    "exponent has no digits",
                    line,
                    col,
                ));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if fractional {
            TokenKind::Float(text.parse().unwrap_or(f64::NAN))
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                // Out-of-range integer literals degrade to floating point.
                Err(_) => TokenKind::Float(text.parse().unwrap_or(f64::NAN)),
            }
        }
    }

    fn scan_string(&mut self, line: usize, col: usize) -> TokenKind {
        let quote = self.bump().expect("string start");
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.diags.push(Diagnostic::error(
                        DiagnosticCode::UnterminatedString,
                        "unterminated string literal",
                        line,
                        col,
                    ));
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let escaped = self.bump();
                    match escaped {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some(c) => value.push(c),
                        None => break,
                    }
                }
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
        TokenKind::Str(value)
    }

    fn scan_color(&mut self, line: usize, col: usize) -> TokenKind {
        self.bump(); // '#'
        let mut hex = String::new();
        while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            hex.push(self.peek().unwrap());
            self.bump();
        }
        if hex.len() != 6 && hex.len() != 8 {
            self.diags.push(Diagnostic::error(
                DiagnosticCode::MalformedColor,
                "color literals are #RRGGBB or #RRGGBBAA",
                line,
                col,
            ));
        }
        TokenKind::Color(format!("#{hex}"))
    }

    fn scan_operator(&mut self) -> Option<TokenKind> {
        let c = self.peek()?;
        let kind = match c {
            '+' => {
                self.bump();
                TokenKind::Plus
            }
            '-' => {
                self.bump();
                TokenKind::Minus
            }
            '*' => {
                self.bump();
                TokenKind::Star
            }
            '/' => {
                self.bump();
                TokenKind::Slash
            }
            '%' => {
                self.bump();
                TokenKind::Percent
            }
            '?' => {
                self.bump();
                TokenKind::Question
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '(' => {
                self.bump();
                self.paren_depth += 1;
                TokenKind::LPar
            }
            ')' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RPar
            }
            '[' => {
                self.bump();
                self.paren_depth += 1;
                TokenKind::LSqb
            }
            ']' => {
                self.bump();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RSqb
            }
            ':' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Assign
                } else {
                    TokenKind::Colon
                }
            }
            '=' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        TokenKind::EqEq
                    }
                    Some('>') => {
                        self.bump();
                        TokenKind::Arrow
                    }
                    _ => TokenKind::Define,
                }
            }
            '!' => {
                if self.peek_at(1) == Some('=') {
                    self.bump();
                    self.bump();
                    TokenKind::NotEq
                } else {
                    return None;
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            _ => return None,
        };
        Some(kind)
    }
}
