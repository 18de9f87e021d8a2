//! Typed syntax tree produced by the parser and consumed by lowering.

use serde::{Deserialize, Serialize};

/// Source position of a node: 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Color(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// A whole script: the ordered top-level statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub stmts: Vec<Stmt>,
}

/// Body of a user function: either the statements of one logical line or an
/// indented block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FnBody {
    Inline(Vec<Stmt>),
    Block(Vec<Stmt>),
}

impl FnBody {
    pub fn stmts(&self) -> &[Stmt] {
        match self {
            FnBody::Inline(stmts) | FnBody::Block(stmts) => stmts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    FnDef {
        name: String,
        params: Vec<String>,
        body: FnBody,
        pos: Pos,
    },
    /// `name = expr`: introduces a binding.
    VarDef { name: String, expr: Expr, pos: Pos },
    /// `name := expr`: mutates an existing binding.
    Assign { name: String, expr: Expr, pos: Pos },
    /// `[a, b, ...] = expr`: binds each name to an element of the result.
    Destructure {
        names: Vec<String>,
        expr: Expr,
        pos: Pos,
    },
    Break { pos: Pos },
    Continue { pos: Pos },
    Expr { expr: Expr },
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::FnDef { pos, .. }
            | Stmt::VarDef { pos, .. }
            | Stmt::Assign { pos, .. }
            | Stmt::Destructure { pos, .. }
            | Stmt::Break { pos }
            | Stmt::Continue { pos } => *pos,
            Stmt::Expr { expr } => expr.pos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal {
        value: Literal,
        pos: Pos,
    },
    Ident {
        name: String,
        pos: Pos,
    },
    Array {
        items: Vec<Expr>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        pos: Pos,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
        pos: Pos,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        pos: Pos,
    },
    /// Usable in both statement and expression position; evaluates to the
    /// value of the last executed block statement, NaN if no branch ran.
    If {
        cond: Box<Expr>,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
        pos: Pos,
    },
    /// `for var = start to end [by step]`; evaluates like `If`.
    For {
        var: String,
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Vec<Stmt>,
        pos: Pos,
    },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Literal { pos, .. }
            | Expr::Ident { pos, .. }
            | Expr::Array { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Ternary { pos, .. }
            | Expr::Subscript { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::If { pos, .. }
            | Expr::For { pos, .. } => *pos,
        }
    }
}
