//! Lowering: scope and arity analysis over the syntax tree, producing the
//! executable [`BarProgram`].
//!
//! All problems are collected as diagnostics; the caller fails the compile
//! when any has error severity. The lowered body is the validated tree:
//! indicator state never lives in it, it lives in the per-context slot table
//! consumed in call order at runtime.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ast::{Expr, FnBody, Script, Stmt};
use crate::builtins;
use crate::language::{Diagnostic, DiagnosticCode};

/// A compiled script: validated statements plus the user-function table.
/// Created once per script and reused across every bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarProgram {
    pub(crate) stmts: Vec<Stmt>,
    pub(crate) functions: HashMap<String, UserFn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UserFn {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// Validate the tree and build the program. Diagnostics are appended to
/// `diags`; the returned program is only meaningful if none are errors.
pub fn lower(script: Script, diags: &mut Vec<Diagnostic>) -> BarProgram {
    let mut functions: HashMap<String, UserFn> = HashMap::new();
    let mut body = Vec::new();

    // Function and global names are visible to every function body
    // regardless of definition order; top-level code is checked lexically.
    let mut global_names: HashSet<String> = HashSet::new();
    for stmt in &script.stmts {
        match stmt {
            Stmt::FnDef { name, params, body, pos } => {
                if functions.contains_key(name) {
                    diags.push(Diagnostic::error(
                        DiagnosticCode::DuplicateDefinition,
                        format!("function `{name}` is defined twice"),
                        pos.line,
                        pos.col,
                    ));
                }
                functions.insert(
                    name.clone(),
                    UserFn {
                        params: params.clone(),
                        body: body.stmts().to_vec(),
                    },
                );
            }
            Stmt::VarDef { name, .. } => {
                global_names.insert(name.clone());
            }
            Stmt::Destructure { names, .. } => {
                global_names.extend(names.iter().cloned());
            }
            _ => {}
        }
    }

    let mut checker = Checker {
        diags,
        functions: &functions,
        global_names: &global_names,
    };

    // Top level: lexical-order visibility, no loop context.
    let mut scope = ScopeState::script();
    for stmt in &script.stmts {
        if matches!(stmt, Stmt::FnDef { .. }) {
            continue; // registered above, checked below
        }
        checker.check_stmt(stmt, &mut scope);
    }

    // Function bodies: parameters plus every global are visible.
    for stmt in &script.stmts {
        if let Stmt::FnDef { name, params, body, pos } = stmt {
            let mut fn_scope = ScopeState::function(params);
            for param in params {
                check_definable_name(param, pos.line, pos.col, checker.diags);
            }
            check_definable_name(name, pos.line, pos.col, checker.diags);
            match body {
                FnBody::Inline(stmts) | FnBody::Block(stmts) => {
                    for stmt in stmts {
                        checker.check_stmt(stmt, &mut fn_scope);
                    }
                }
            }
        }
    }

    for stmt in script.stmts {
        if !matches!(stmt, Stmt::FnDef { .. }) {
            body.push(stmt);
        }
    }

    tracing::debug!(
        statements = body.len(),
        functions = functions.len(),
        "lowered script"
    );
    BarProgram {
        stmts: body,
        functions,
    }
}

fn check_definable_name(name: &str, line: usize, col: usize, diags: &mut Vec<Diagnostic>) {
    if name.contains('.') {
        diags.push(Diagnostic::error(
            DiagnosticCode::UnexpectedToken,
            format!("`{name}`: namespaced names cannot be defined"),
            line,
            col,
        ));
    }
}

struct ScopeState {
    defined: HashSet<String>,
    loop_vars: Vec<String>,
    loop_depth: usize,
    in_function: bool,
}

impl ScopeState {
    fn script() -> Self {
        Self {
            defined: HashSet::new(),
            loop_vars: Vec::new(),
            loop_depth: 0,
            in_function: false,
        }
    }

    fn function(params: &[String]) -> Self {
        Self {
            defined: params.iter().cloned().collect(),
            loop_vars: Vec::new(),
            loop_depth: 0,
            in_function: true,
        }
    }
}

struct Checker<'a> {
    diags: &'a mut Vec<Diagnostic>,
    functions: &'a HashMap<String, UserFn>,
    global_names: &'a HashSet<String>,
}

impl Checker<'_> {
    fn error(&mut self, code: DiagnosticCode, message: String, line: usize, col: usize) {
        self.diags.push(Diagnostic::error(code, message, line, col));
    }

    fn is_visible(&self, name: &str, scope: &ScopeState) -> bool {
        if scope.loop_vars.iter().any(|v| v == name) {
            return true;
        }
        if scope.defined.contains(name) {
            return true;
        }
        if scope.in_function && self.global_names.contains(name) {
            return true;
        }
        builtins::is_market_var(name)
    }

    fn check_stmt(&mut self, stmt: &Stmt, scope: &mut ScopeState) {
        match stmt {
            Stmt::FnDef { pos, .. } => {
                self.error(
                    DiagnosticCode::NestedFunction,
                    "function definitions are only allowed at the top level".into(),
                    pos.line,
                    pos.col,
                );
            }
            Stmt::VarDef { name, expr, pos } => {
                self.check_expr(expr, scope);
                check_definable_name(name, pos.line, pos.col, self.diags);
                if !scope.defined.insert(name.clone()) {
                    self.error(
                        DiagnosticCode::DuplicateDefinition,
                        format!("`{name}` is already defined; use `:=` to assign"),
                        pos.line,
                        pos.col,
                    );
                }
            }
            Stmt::Assign { name, expr, pos } => {
                self.check_expr(expr, scope);
                let assignable = scope.defined.contains(name)
                    || scope.loop_vars.iter().any(|v| v == name)
                    || (scope.in_function && self.global_names.contains(name));
                if !assignable {
                    self.error(
                        DiagnosticCode::AssignBeforeDefinition,
                        format!("`{name}` is assigned with `:=` but never defined"),
                        pos.line,
                        pos.col,
                    );
                }
            }
            Stmt::Destructure { names, expr, pos } => {
                self.check_expr(expr, scope);
                for name in names {
                    check_definable_name(name, pos.line, pos.col, self.diags);
                    if !scope.defined.insert(name.clone()) {
                        self.error(
                            DiagnosticCode::DuplicateDefinition,
                            format!("`{name}` is already defined"),
                            pos.line,
                            pos.col,
                        );
                    }
                }
            }
            Stmt::Break { pos } | Stmt::Continue { pos } => {
                if scope.loop_depth == 0 {
                    self.error(
                        DiagnosticCode::MisplacedControl,
                        "`break`/`continue` outside of a loop".into(),
                        pos.line,
                        pos.col,
                    );
                }
            }
            Stmt::Expr { expr } => self.check_expr(expr, scope),
        }
    }

    fn check_expr(&mut self, expr: &Expr, scope: &mut ScopeState) {
        match expr {
            Expr::Literal { .. } => {}
            Expr::Ident { name, pos } => {
                if !self.is_visible(name, scope) {
                    let hint = if self.functions.contains_key(name)
                        || builtins::signature(name).is_some()
                    {
                        format!("`{name}` is a function; call it with `(...)`")
                    } else {
                        format!("`{name}` is not defined")
                    };
                    self.error(DiagnosticCode::UndefinedIdentifier, hint, pos.line, pos.col);
                }
            }
            Expr::Array { items, .. } => {
                for item in items {
                    self.check_expr(item, scope);
                }
            }
            Expr::Unary { operand, .. } => self.check_expr(operand, scope),
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs, scope);
                self.check_expr(rhs, scope);
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                self.check_expr(cond, scope);
                self.check_expr(then_expr, scope);
                self.check_expr(else_expr, scope);
            }
            Expr::Subscript { base, index, .. } => {
                self.check_expr(base, scope);
                self.check_expr(index, scope);
            }
            Expr::Call {
                name,
                args,
                kwargs,
                pos,
            } => {
                for arg in args {
                    self.check_expr(arg, scope);
                }
                for (_, value) in kwargs {
                    self.check_expr(value, scope);
                }
                self.check_call(name, args.len(), kwargs, pos.line, pos.col);
            }
            Expr::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.check_expr(cond, scope);
                for stmt in then_block {
                    self.check_stmt(stmt, scope);
                }
                if let Some(block) = else_block {
                    for stmt in block {
                        self.check_stmt(stmt, scope);
                    }
                }
            }
            Expr::For {
                var,
                start,
                end,
                step,
                body,
                pos,
            } => {
                self.check_expr(start, scope);
                self.check_expr(end, scope);
                if let Some(step) = step {
                    self.check_expr(step, scope);
                }
                check_definable_name(var, pos.line, pos.col, self.diags);
                scope.loop_vars.push(var.clone());
                scope.loop_depth += 1;
                for stmt in body {
                    self.check_stmt(stmt, scope);
                }
                scope.loop_depth -= 1;
                scope.loop_vars.pop();
            }
        }
    }

    fn check_call(
        &mut self,
        name: &str,
        positional: usize,
        kwargs: &[(String, Expr)],
        line: usize,
        col: usize,
    ) {
        if let Some(user) = self.functions.get(name) {
            let params = &user.params;
            if positional > params.len() {
                self.error(
                    DiagnosticCode::ArityMismatch,
                    format!(
                        "`{name}` takes {} argument(s) but got {positional}",
                        params.len()
                    ),
                    line,
                    col,
                );
                return;
            }
            let mut bound: HashSet<&str> =
                params[..positional].iter().map(|s| s.as_str()).collect();
            for (key, _) in kwargs {
                if !params.iter().any(|p| p == key) {
                    self.error(
                        DiagnosticCode::BadKeywordArgument,
                        format!("`{name}` has no parameter `{key}`"),
                        line,
                        col,
                    );
                } else if !bound.insert(key.as_str()) {
                    self.error(
                        DiagnosticCode::BadKeywordArgument,
                        format!("parameter `{key}` bound more than once"),
                        line,
                        col,
                    );
                }
            }
            if bound.len() < params.len() {
                self.error(
                    DiagnosticCode::ArityMismatch,
                    format!(
                        "`{name}` takes {} argument(s) but got {}",
                        params.len(),
                        bound.len()
                    ),
                    line,
                    col,
                );
            }
            return;
        }

        match builtins::signature(name) {
            Some(sig) => {
                if positional < sig.min_args || positional > sig.max_args {
                    self.error(
                        DiagnosticCode::ArityMismatch,
                        format!(
                            "`{name}` expects {} to {} argument(s), got {positional}",
                            sig.min_args, sig.max_args
                        ),
                        line,
                        col,
                    );
                }
                for (key, _) in kwargs {
                    if !sig.kwargs.contains(&key.as_str()) {
                        self.error(
                            DiagnosticCode::BadKeywordArgument,
                            format!("`{name}` does not accept keyword `{key}`"),
                            line,
                            col,
                        );
                    }
                }
            }
            None => {
                self.error(
                    DiagnosticCode::UndefinedIdentifier,
                    format!("unknown function `{name}`"),
                    line,
                    col,
                );
            }
        }
    }
}
