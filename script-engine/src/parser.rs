//! Recursive-descent parser over the shaped token stream.
//!
//! The parser never throws: problems become diagnostics, the offending
//! statement is abandoned with single-token panic-mode recovery to the next
//! `LineEnd`/`End`, and parsing continues with the next statement.

use crate::ast::{BinaryOp, Expr, FnBody, Literal, Pos, Script, Stmt, UnaryOp};
use crate::language::{Diagnostic, DiagnosticCode};
use crate::lexer::{Keyword, Token, TokenKind};

/// Parse a shaped token stream into a syntax tree plus diagnostics.
pub fn parse(tokens: Vec<Token>) -> (Script, Vec<Diagnostic>) {
    let mut parser = Parser {
        tokens,
        pos: 0,
        diags: Vec::new(),
    };
    let script = parser.parse_script();
    (script, parser.diags)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diags: Vec<Diagnostic>,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn kind_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        *self.kind() == kind
    }

    fn here(&self) -> Pos {
        let tok = self.peek();
        Pos {
            line: tok.line,
            col: tok.col,
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.eat(kind.clone()) {
            return true;
        }
        let found = self.peek().clone();
        self.error_at(
            &found,
            format!(
                "expected {}, found {}",
                kind.describe(),
                found.kind.describe()
            ),
        );
        false
    }

    fn error_at(&mut self, tok: &Token, message: impl Into<String>) {
        self.diags.push(Diagnostic::error(
            DiagnosticCode::UnexpectedToken,
            message,
            tok.line,
            tok.col,
        ));
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let tok = self.peek().clone();
        self.error_at(&tok, message);
    }

    /// Panic-mode recovery: skip to the next statement boundary.
    fn recover(&mut self) {
        while !matches!(
            self.kind(),
            TokenKind::LineEnd | TokenKind::End | TokenKind::Eof
        ) {
            self.advance();
        }
    }

    fn skip_line_ends(&mut self) {
        while self.at(TokenKind::LineEnd) {
            self.advance();
        }
    }

    // ---------- statements ---------------------------------------------

    fn parse_script(&mut self) -> Script {
        let mut stmts = Vec::new();
        self.skip_line_ends();
        while !self.at(TokenKind::Eof) {
            if matches!(self.kind(), TokenKind::Begin | TokenKind::End) {
                self.error_here("unexpected indentation at top level");
                self.advance();
                self.skip_line_ends();
                continue;
            }
            self.parse_stmt_line(&mut stmts);
            self.skip_line_ends();
        }
        Script { stmts }
    }

    /// One logical line: a statement, optionally followed by further
    /// comma-separated statements.
    fn parse_stmt_line(&mut self, into: &mut Vec<Stmt>) {
        loop {
            if matches!(
                self.kind(),
                TokenKind::LineEnd | TokenKind::End | TokenKind::Eof
            ) {
                break;
            }
            match self.parse_stmt() {
                Some(stmt) => into.push(stmt),
                None => {
                    self.recover();
                    break;
                }
            }
            if self.eat(TokenKind::Comma) {
                continue;
            }
            break;
        }
        if !matches!(
            self.kind(),
            TokenKind::LineEnd | TokenKind::End | TokenKind::Eof
        ) {
            self.error_here(format!(
                "expected end of statement, found {}",
                self.kind().describe()
            ));
            self.recover();
        }
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        match self.kind().clone() {
            TokenKind::Keyword(Keyword::Break) => {
                let pos = self.here();
                self.advance();
                Some(Stmt::Break { pos })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                let pos = self.here();
                self.advance();
                Some(Stmt::Continue { pos })
            }
            TokenKind::Ident => {
                if self.looks_like_fn_def() {
                    self.parse_fn_def()
                } else if *self.kind_at(1) == TokenKind::Define {
                    let pos = self.here();
                    let name = self.advance().text;
                    self.advance(); // `=`
                    let expr = self.parse_expr()?;
                    Some(Stmt::VarDef { name, expr, pos })
                } else if *self.kind_at(1) == TokenKind::Assign {
                    let pos = self.here();
                    let name = self.advance().text;
                    self.advance(); // `:=`
                    let expr = self.parse_expr()?;
                    Some(Stmt::Assign { name, expr, pos })
                } else {
                    let expr = self.parse_expr()?;
                    Some(Stmt::Expr { expr })
                }
            }
            TokenKind::LSqb if self.looks_like_destructure() => {
                let pos = self.here();
                self.advance(); // `[`
                let mut names = Vec::new();
                loop {
                    names.push(self.advance().text);
                    if self.eat(TokenKind::Comma) {
                        continue;
                    }
                    break;
                }
                self.expect(TokenKind::RSqb);
                self.expect(TokenKind::Define);
                let expr = self.parse_expr()?;
                Some(Stmt::Destructure { names, expr, pos })
            }
            _ => {
                let expr = self.parse_expr()?;
                Some(Stmt::Expr { expr })
            }
        }
    }

    /// `name(p1, p2, ...) =>`: identifiers only between the parens.
    fn looks_like_fn_def(&self) -> bool {
        if *self.kind_at(1) != TokenKind::LPar {
            return false;
        }
        let mut i = 2;
        if *self.kind_at(i) == TokenKind::RPar {
            return *self.kind_at(i + 1) == TokenKind::Arrow;
        }
        loop {
            if *self.kind_at(i) != TokenKind::Ident {
                return false;
            }
            i += 1;
            match self.kind_at(i) {
                TokenKind::Comma => i += 1,
                TokenKind::RPar => return *self.kind_at(i + 1) == TokenKind::Arrow,
                _ => return false,
            }
        }
    }

    fn looks_like_destructure(&self) -> bool {
        let mut i = 1;
        loop {
            if *self.kind_at(i) != TokenKind::Ident {
                return false;
            }
            i += 1;
            match self.kind_at(i) {
                TokenKind::Comma => i += 1,
                TokenKind::RSqb => return *self.kind_at(i + 1) == TokenKind::Define,
                _ => return false,
            }
        }
    }

    fn parse_fn_def(&mut self) -> Option<Stmt> {
        let pos = self.here();
        let name = self.advance().text;
        self.expect(TokenKind::LPar);
        let mut params = Vec::new();
        if !self.at(TokenKind::RPar) {
            loop {
                params.push(self.advance().text);
                if self.eat(TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RPar);
        self.expect(TokenKind::Arrow);

        let body = if self.at(TokenKind::Begin) {
            FnBody::Block(self.parse_block())
        } else {
            let mut stmts = Vec::new();
            loop {
                stmts.push(self.parse_stmt()?);
                if self.eat(TokenKind::Comma) {
                    continue;
                }
                break;
            }
            FnBody::Inline(stmts)
        };
        Some(Stmt::FnDef {
            name,
            params,
            body,
            pos,
        })
    }

    /// `Begin statement (LineEnd statement)* LineEnd? End`
    fn parse_block(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        self.expect(TokenKind::Begin);
        self.skip_line_ends();
        while !matches!(self.kind(), TokenKind::End | TokenKind::Eof) {
            self.parse_stmt_line(&mut stmts);
            self.skip_line_ends();
        }
        self.eat(TokenKind::End);
        stmts
    }

    // ---------- expressions ---------------------------------------------

    fn parse_expr(&mut self) -> Option<Expr> {
        match self.kind() {
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            _ => self.parse_ternary(),
        }
    }

    fn parse_if(&mut self) -> Option<Expr> {
        let pos = self.here();
        self.advance(); // `if`
        let cond = self.parse_ternary()?;
        if !self.at(TokenKind::Begin) {
            self.error_here("the body of `if` must be an indented block");
            return None;
        }
        let then_block = self.parse_block();

        // An `else` may sit after the separators that closed the block.
        let mut lookahead = self.pos;
        while self.tokens[lookahead].kind == TokenKind::LineEnd {
            lookahead += 1;
        }
        let else_block = if self.tokens[lookahead].kind == TokenKind::Keyword(Keyword::Else) {
            self.pos = lookahead + 1;
            if self.at(TokenKind::Keyword(Keyword::If)) {
                let chained = self.parse_if()?;
                Some(vec![Stmt::Expr { expr: chained }])
            } else if self.at(TokenKind::Begin) {
                Some(self.parse_block())
            } else {
                self.error_here("the body of `else` must be an indented block or `if`");
                return None;
            }
        } else {
            None
        };

        Some(Expr::If {
            cond: Box::new(cond),
            then_block,
            else_block,
            pos,
        })
    }

    fn parse_for(&mut self) -> Option<Expr> {
        let pos = self.here();
        self.advance(); // `for`
        if !self.at(TokenKind::Ident) {
            self.error_here("expected loop variable name");
            return None;
        }
        let var = self.advance().text;
        self.expect(TokenKind::Define);
        let start = self.parse_ternary()?;
        self.expect(TokenKind::Keyword(Keyword::To));
        let end = self.parse_ternary()?;
        let step = if self.eat(TokenKind::Keyword(Keyword::By)) {
            Some(Box::new(self.parse_ternary()?))
        } else {
            None
        };
        if !self.at(TokenKind::Begin) {
            self.error_here("the body of `for` must be an indented block");
            return None;
        }
        let body = self.parse_block();
        Some(Expr::For {
            var,
            start: Box::new(start),
            end: Box::new(end),
            step,
            body,
            pos,
        })
    }

    fn parse_ternary(&mut self) -> Option<Expr> {
        let cond = self.parse_or()?;
        if self.eat(TokenKind::Question) {
            let pos = cond.pos();
            let then_expr = self.parse_ternary()?;
            self.expect(TokenKind::Colon);
            let else_expr = self.parse_ternary()?;
            return Some(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                pos,
            });
        }
        Some(cond)
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_and()?;
        while self.at(TokenKind::Keyword(Keyword::Or)) {
            let pos = self.here();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.at(TokenKind::Keyword(Keyword::And)) {
            let pos = self.here();
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_equality(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => break,
            };
            let pos = self.here();
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            let pos = self.here();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let pos = self.here();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            let pos = self.here();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let op = match self.kind() {
            TokenKind::Keyword(Keyword::Not) => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            let pos = self.here();
            self.advance();
            let operand = self.parse_unary()?;
            return Some(Expr::Unary {
                op,
                operand: Box::new(operand),
                pos,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_atom()?;
        while self.at(TokenKind::LSqb) {
            let pos = self.here();
            self.advance();
            let index = self.parse_expr()?;
            self.expect(TokenKind::RSqb);
            expr = Expr::Subscript {
                base: Box::new(expr),
                index: Box::new(index),
                pos,
            };
        }
        Some(expr)
    }

    fn parse_atom(&mut self) -> Option<Expr> {
        let pos = self.here();
        match self.kind().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Some(Expr::Literal {
                    value: Literal::Int(v),
                    pos,
                })
            }
            TokenKind::Float(v) => {
                self.advance();
                Some(Expr::Literal {
                    value: Literal::Float(v),
                    pos,
                })
            }
            TokenKind::Str(s) => {
                self.advance();
                Some(Expr::Literal {
                    value: Literal::Str(s),
                    pos,
                })
            }
            TokenKind::Bool(b) => {
                self.advance();
                Some(Expr::Literal {
                    value: Literal::Bool(b),
                    pos,
                })
            }
            TokenKind::Color(c) => {
                self.advance();
                Some(Expr::Literal {
                    value: Literal::Color(c),
                    pos,
                })
            }
            TokenKind::Ident => {
                let name = self.advance().text;
                if self.at(TokenKind::LPar) {
                    self.parse_call(name, pos)
                } else {
                    Some(Expr::Ident { name, pos })
                }
            }
            TokenKind::LPar => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RPar);
                Some(inner)
            }
            TokenKind::LSqb => {
                self.advance();
                let mut items = Vec::new();
                if !self.at(TokenKind::RSqb) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(TokenKind::Comma) {
                            continue;
                        }
                        break;
                    }
                }
                self.expect(TokenKind::RSqb);
                Some(Expr::Array { items, pos })
            }
            other => {
                self.error_here(format!("expected expression, found {}", other.describe()));
                None
            }
        }
    }

    /// Positional arguments first, then keyword arguments; never interleaved.
    fn parse_call(&mut self, name: String, pos: Pos) -> Option<Expr> {
        self.expect(TokenKind::LPar);
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        if !self.at(TokenKind::RPar) {
            loop {
                if self.at(TokenKind::Ident) && *self.kind_at(1) == TokenKind::Define {
                    let key = self.advance().text;
                    self.advance(); // `=`
                    let value = self.parse_expr()?;
                    kwargs.push((key, value));
                } else {
                    let value = self.parse_expr()?;
                    if kwargs.is_empty() {
                        args.push(value);
                    } else {
                        self.diags.push(Diagnostic::error(
                            DiagnosticCode::KeywordBeforePositional,
                            "positional argument after keyword argument",
                            value.pos().line,
                            value.pos().col,
                        ));
                    }
                }
                if self.eat(TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RPar);
        Some(Expr::Call {
            name,
            args,
            kwargs,
            pos,
        })
    }
}
