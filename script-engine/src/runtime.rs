//! Bar-execution runtime: the Context, the persistent-state slot table, and
//! the tree-walking evaluator that runs a [`BarProgram`] once per bar.

use std::collections::HashMap;

use bar_core::{Bar, Timestamp};
use serde::{Deserialize, Serialize};
use ta_engine::{
    AtrState, BollingerState, CciState, ChangeState, CrossState, DevState, EmaState, ExtremaState,
    MacdState, MomState, RmaState, RsiState, SmaState, StochState, SwmaState, TrState, WmaState,
};

use crate::ast::{BinaryOp, Expr, Literal, Stmt, UnaryOp};
use crate::builtins;
use crate::language::RuntimeError;
use crate::lower::BarProgram;
use crate::strategy::{PlotRegistry, Position, StrategyBook, Trade};

/// A runtime value. Numbers are f64 and NaN is the "no value" sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(String),
    Color(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn na() -> Self {
        Value::Num(f64::NAN)
    }

    pub fn is_na(&self) -> bool {
        matches!(self, Value::Num(v) if v.is_nan())
    }

    /// Numeric coercion: booleans become 0/1, everything else NaN.
    pub fn as_num(&self) -> f64 {
        match self {
            Value::Num(v) => *v,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            _ => f64::NAN,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(v) => !v.is_nan() && *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Color(_) => true,
            Value::Array(items) => !items.is_empty(),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Num(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Typed state owned by one indicator call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlotState {
    Sma(SmaState),
    Bollinger(BollingerState),
    Wma(WmaState),
    Ema(EmaState),
    Rma(RmaState),
    Extrema(ExtremaState),
    Mom(MomState),
    Change(ChangeState),
    Cross(CrossState),
    Rsi(RsiState),
    Macd(MacdState),
    Dev(DevState),
    Cci(CciState),
    Stoch(StochState),
    Atr(AtrState),
    Tr(TrState),
    Swma(SwmaState),
}

impl SlotState {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SlotState::Sma(_) => "sma",
            SlotState::Bollinger(_) => "bollinger",
            SlotState::Wma(_) => "wma",
            SlotState::Ema(_) => "ema",
            SlotState::Rma(_) => "rma",
            SlotState::Extrema(_) => "extrema",
            SlotState::Mom(_) => "mom",
            SlotState::Change(_) => "change",
            SlotState::Cross(_) => "cross",
            SlotState::Rsi(_) => "rsi",
            SlotState::Macd(_) => "macd",
            SlotState::Dev(_) => "dev",
            SlotState::Cci(_) => "cci",
            SlotState::Stoch(_) => "stoch",
            SlotState::Atr(_) => "atr",
            SlotState::Tr(_) => "tr",
            SlotState::Swma(_) => "swma",
        }
    }
}

/// Dense table of per-call-site indicator state.
///
/// The cursor resets at the start of every bar; each indicator call consumes
/// exactly one slot, so a stable call order maps every call site to the same
/// slot on every bar. That ordering is the correctness contract between the
/// runtime and the indicator engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateTable {
    slots: Vec<SlotState>,
    cursor: usize,
}

impl StateTable {
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Claim the next slot, creating it on first touch.
    pub fn get_or_init(&mut self, init: impl FnOnce() -> SlotState) -> (usize, &mut SlotState) {
        let idx = self.cursor;
        self.cursor += 1;
        if idx == self.slots.len() {
            self.slots.push(init());
        }
        (idx, &mut self.slots[idx])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot kinds in table order; used to pin call-order stability in tests.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.slots.iter().map(SlotState::kind_name).collect()
    }
}

/// Market fields plus all engine state for one run. Created once before the
/// bar loop, mutated by the runtime, dropped at end of run.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub time: Timestamp,
    pub bar_index: usize,
    pub states: StateTable,
    pub plots: PlotRegistry,
    pub broker: StrategyBook,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_call_counter(&mut self) {
        self.states.reset_cursor();
    }

    pub fn trades(&self) -> &[Trade] {
        self.broker.trades()
    }

    pub fn position(&self) -> &Position {
        &self.broker.position
    }

    pub fn cash(&self) -> f64 {
        self.broker.cash
    }

    /// Cash plus the open position marked at the current close.
    pub fn equity(&self) -> f64 {
        self.broker.equity(self.close)
    }
}

/// Run the program body once against the current bar fields.
pub fn execute_bar(program: &BarProgram, ctx: &mut Context) -> Result<(), RuntimeError> {
    ctx.reset_call_counter();
    let interp = Interp { program };
    let mut env = Env::new();
    interp.eval_stmts(&program.stmts, &mut env, ctx)?;
    Ok(())
}

/// Pad every plot series to the finalized length, then advance the bar index.
pub fn finalize_bar(ctx: &mut Context) {
    ctx.plots.finalize_bar(ctx.bar_index);
    ctx.bar_index += 1;
}

/// Apply one OHLCV row: assign market fields, execute, finalize.
pub fn feed(program: &BarProgram, ctx: &mut Context, bar: Bar) -> Result<(), RuntimeError> {
    ctx.open = bar.open;
    ctx.high = bar.high;
    ctx.low = bar.low;
    ctx.close = bar.close;
    ctx.volume = bar.volume;
    ctx.time = bar.time;
    execute_bar(program, ctx)?;
    finalize_bar(ctx);
    Ok(())
}

// ---------- evaluator --------------------------------------------------------

/// Statement outcome: a value, or control flow unwinding to the nearest loop.
pub(crate) enum Flow {
    Normal(Value),
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Global,
    Function,
    Loop,
}

struct Frame {
    vars: HashMap<String, Value>,
    kind: FrameKind,
}

struct Env {
    frames: Vec<Frame>,
}

impl Env {
    fn new() -> Self {
        Self {
            frames: vec![Frame {
                vars: HashMap::new(),
                kind: FrameKind::Global,
            }],
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.vars.get(name) {
                return Some(v);
            }
            if frame.kind == FrameKind::Function {
                break;
            }
        }
        self.frames[0].vars.get(name)
    }

    /// Bind a definition in the nearest non-loop frame.
    fn define(&mut self, name: &str, value: Value) {
        for frame in self.frames.iter_mut().rev() {
            if frame.kind != FrameKind::Loop {
                frame.vars.insert(name.to_string(), value);
                return;
            }
        }
    }

    fn assign(&mut self, name: &str, value: Value) {
        let mut idx = self.frames.len();
        while idx > 0 {
            idx -= 1;
            if self.frames[idx].vars.contains_key(name) {
                self.frames[idx].vars.insert(name.to_string(), value);
                return;
            }
            if self.frames[idx].kind == FrameKind::Function {
                break;
            }
        }
        if self.frames[0].vars.contains_key(name) {
            self.frames[0].vars.insert(name.to_string(), value);
        } else {
            // Lowering vouched for the name; late binding lands locally.
            self.define(name, value);
        }
    }
}

/// Unwrap a sub-expression value, bubbling break/continue outward.
macro_rules! value_of {
    ($self:ident, $expr:expr, $env:ident, $ctx:ident) => {
        match $self.eval($expr, $env, $ctx)? {
            Flow::Normal(v) => v,
            flow => return Ok(flow),
        }
    };
}

struct Interp<'p> {
    program: &'p BarProgram,
}

impl Interp<'_> {
    fn eval_stmts(
        &self,
        stmts: &[Stmt],
        env: &mut Env,
        ctx: &mut Context,
    ) -> Result<Flow, RuntimeError> {
        let mut last = Value::na();
        for stmt in stmts {
            match stmt {
                Stmt::VarDef { name, expr, .. } => {
                    let v = value_of!(self, expr, env, ctx);
                    env.define(name, v.clone());
                    last = v;
                }
                Stmt::Assign { name, expr, .. } => {
                    let v = value_of!(self, expr, env, ctx);
                    env.assign(name, v.clone());
                    last = v;
                }
                Stmt::Destructure { names, expr, .. } => {
                    let v = value_of!(self, expr, env, ctx);
                    let items: &[Value] = match &v {
                        Value::Array(items) => items,
                        _ => &[],
                    };
                    for (i, name) in names.iter().enumerate() {
                        let element = items.get(i).cloned().unwrap_or_else(Value::na);
                        env.define(name, element);
                    }
                    last = v;
                }
                Stmt::Break { .. } => return Ok(Flow::Break),
                Stmt::Continue { .. } => return Ok(Flow::Continue),
                Stmt::Expr { expr } => {
                    last = value_of!(self, expr, env, ctx);
                }
                // Stripped during lowering; nothing to execute.
                Stmt::FnDef { .. } => {}
            }
        }
        Ok(Flow::Normal(last))
    }

    fn eval(&self, expr: &Expr, env: &mut Env, ctx: &mut Context) -> Result<Flow, RuntimeError> {
        let value = match expr {
            Expr::Literal { value, .. } => match value {
                Literal::Int(v) => Value::Num(*v as f64),
                Literal::Float(v) => Value::Num(*v),
                Literal::Str(s) => Value::Str(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Color(c) => Value::Color(c.clone()),
            },
            Expr::Ident { name, pos: _ } => match env.lookup(name) {
                Some(v) => v.clone(),
                None => builtins::market_value(ctx, name).unwrap_or_else(Value::na),
            },
            Expr::Array { items, .. } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(value_of!(self, item, env, ctx));
                }
                Value::Array(out)
            }
            Expr::Unary { op, operand, .. } => {
                let v = value_of!(self, operand, env, ctx);
                match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Neg => Value::Num(-v.as_num()),
                    UnaryOp::Pos => Value::Num(v.as_num()),
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => match op {
                BinaryOp::Or => {
                    let l = value_of!(self, lhs, env, ctx);
                    if l.truthy() {
                        Value::Bool(true)
                    } else {
                        let r = value_of!(self, rhs, env, ctx);
                        Value::Bool(r.truthy())
                    }
                }
                BinaryOp::And => {
                    let l = value_of!(self, lhs, env, ctx);
                    if !l.truthy() {
                        Value::Bool(false)
                    } else {
                        let r = value_of!(self, rhs, env, ctx);
                        Value::Bool(r.truthy())
                    }
                }
                BinaryOp::Eq | BinaryOp::Ne => {
                    let l = value_of!(self, lhs, env, ctx);
                    let r = value_of!(self, rhs, env, ctx);
                    let eq = match (&l, &r) {
                        (Value::Num(_), _) | (_, Value::Num(_)) | (Value::Bool(_), Value::Bool(_)) => {
                            l.as_num() == r.as_num()
                        }
                        _ => l == r,
                    };
                    Value::Bool(if *op == BinaryOp::Eq { eq } else { !eq })
                }
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    let l = value_of!(self, lhs, env, ctx).as_num();
                    let r = value_of!(self, rhs, env, ctx).as_num();
                    Value::Bool(match op {
                        BinaryOp::Lt => l < r,
                        BinaryOp::Le => l <= r,
                        BinaryOp::Gt => l > r,
                        _ => l >= r,
                    })
                }
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                    let l = value_of!(self, lhs, env, ctx).as_num();
                    let r = value_of!(self, rhs, env, ctx).as_num();
                    // Division by zero follows IEEE-754: inf or NaN.
                    Value::Num(match op {
                        BinaryOp::Add => l + r,
                        BinaryOp::Sub => l - r,
                        BinaryOp::Mul => l * r,
                        BinaryOp::Div => l / r,
                        _ => l % r,
                    })
                }
            },
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let c = value_of!(self, cond, env, ctx);
                if c.truthy() {
                    value_of!(self, then_expr, env, ctx)
                } else {
                    value_of!(self, else_expr, env, ctx)
                }
            }
            Expr::Subscript { base, index, .. } => {
                let base = value_of!(self, base, env, ctx);
                let idx = value_of!(self, index, env, ctx).as_num();
                match base {
                    Value::Array(items) if idx.is_finite() => {
                        let len = items.len() as i64;
                        let mut i = idx.trunc() as i64;
                        if i < 0 {
                            i += len;
                        }
                        if (0..len).contains(&i) {
                            items[i as usize].clone()
                        } else {
                            Value::na()
                        }
                    }
                    _ => Value::na(),
                }
            }
            Expr::Call {
                name,
                args,
                kwargs,
                pos,
            } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(value_of!(self, arg, env, ctx));
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (key, expr) in kwargs {
                    kwarg_values.push((key.as_str(), value_of!(self, expr, env, ctx)));
                }
                if let Some(func) = self.program.functions.get(name) {
                    let mut frame = Frame {
                        vars: HashMap::new(),
                        kind: FrameKind::Function,
                    };
                    for (param, value) in func.params.iter().zip(arg_values) {
                        frame.vars.insert(param.clone(), value);
                    }
                    for (key, value) in kwarg_values {
                        frame.vars.insert(key.to_string(), value);
                    }
                    for param in &func.params {
                        frame.vars.entry(param.clone()).or_insert_with(Value::na);
                    }
                    env.frames.push(frame);
                    let flow = self.eval_stmts(&func.body, env, ctx);
                    env.frames.pop();
                    match flow? {
                        Flow::Normal(v) => v,
                        _ => Value::na(),
                    }
                } else {
                    builtins::call(ctx, name, &arg_values, &kwarg_values, *pos)?
                }
            }
            Expr::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let c = value_of!(self, cond, env, ctx);
                if c.truthy() {
                    match self.eval_stmts(then_block, env, ctx)? {
                        Flow::Normal(v) => v,
                        flow => return Ok(flow),
                    }
                } else if let Some(block) = else_block {
                    match self.eval_stmts(block, env, ctx)? {
                        Flow::Normal(v) => v,
                        flow => return Ok(flow),
                    }
                } else {
                    Value::na()
                }
            }
            Expr::For {
                var,
                start,
                end,
                step,
                body,
                ..
            } => {
                let start = value_of!(self, start, env, ctx).as_num();
                let end = value_of!(self, end, env, ctx).as_num();
                let step = match step {
                    Some(expr) => value_of!(self, expr, env, ctx).as_num(),
                    None => 1.0,
                };
                env.frames.push(Frame {
                    vars: HashMap::new(),
                    kind: FrameKind::Loop,
                });
                let mut last = Value::na();
                let mut i = start;
                let result = loop {
                    let in_range = if step >= 0.0 { i <= end } else { i >= end };
                    if !in_range {
                        break Ok(Flow::Normal(last));
                    }
                    let frame = env.frames.last_mut().expect("loop frame");
                    frame.vars.insert(var.clone(), Value::Num(i));
                    match self.eval_stmts(body, env, ctx) {
                        Ok(Flow::Normal(v)) => last = v,
                        Ok(Flow::Break) => break Ok(Flow::Normal(last)),
                        Ok(Flow::Continue) => {}
                        Err(e) => break Err(e),
                    }
                    i += step;
                };
                env.frames.pop();
                return result;
            }
        };
        Ok(Flow::Normal(value))
    }
}
