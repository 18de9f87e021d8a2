//! The standard-library symbol table: market variables, math, streaming
//! indicators, plotting, and strategy orders.
//!
//! Lowering consults [`signature`] for arity and keyword checks; the runtime
//! routes every call through [`call`]. Indicator builtins claim slots from
//! the context state table in call order, so each lexical call site owns the
//! same slot on every bar.

use ta_engine::{
    AtrState, BollingerState, CciState, ChangeState, CrossState, DevState, EmaState, ExtremaState,
    ExtremeKind, MacdState, MomState, RmaState, RsiState, SmaState, StochState, SwmaState,
    TrState, WmaState,
};

use crate::ast::Pos;
use crate::language::RuntimeError;
use crate::runtime::{Context, SlotState, Value};
use crate::strategy::Direction;

/// Compile-time shape of a builtin: positional-argument bounds plus the
/// keyword arguments it accepts.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub kwargs: &'static [&'static str],
}

const fn sig(name: &'static str, min_args: usize, max_args: usize) -> Signature {
    Signature {
        name,
        min_args,
        max_args,
        kwargs: &[],
    }
}

const SIGNATURES: &[Signature] = &[
    sig("sma", 2, 2),
    sig("ema", 2, 2),
    sig("rma", 2, 2),
    sig("wma", 2, 2),
    sig("vwma", 2, 2),
    sig("swma", 1, 1),
    sig("sum", 2, 2),
    sig("stdev", 2, 2),
    sig("dev", 2, 2),
    Signature {
        name: "bb",
        min_args: 2,
        max_args: 3,
        kwargs: &["mult"],
    },
    sig("rsi", 2, 2),
    sig("macd", 4, 4),
    sig("mom", 2, 2),
    sig("change", 1, 1),
    sig("cci", 2, 2),
    sig("stoch", 4, 4),
    sig("highest", 2, 2),
    sig("lowest", 2, 2),
    sig("highestbars", 2, 2),
    sig("lowestbars", 2, 2),
    sig("cross", 2, 2),
    sig("crossover", 2, 2),
    sig("crossunder", 2, 2),
    sig("atr", 1, 1),
    sig("tr", 0, 0),
    sig("nz", 1, 2),
    sig("abs", 1, 1),
    sig("sqrt", 1, 1),
    sig("exp", 1, 1),
    sig("log", 1, 1),
    sig("pow", 2, 2),
    sig("round", 1, 1),
    sig("floor", 1, 1),
    sig("ceil", 1, 1),
    sig("min", 2, 8),
    sig("max", 2, 8),
    Signature {
        name: "plot",
        min_args: 1,
        max_args: 2,
        kwargs: &["title"],
    },
    Signature {
        name: "strategy.entry",
        min_args: 2,
        max_args: 3,
        kwargs: &["qty"],
    },
    sig("strategy.close", 1, 1),
    sig("strategy.close_all", 0, 0),
];

/// `ta.` and `math.` are namespace aliases; bare names stay valid.
fn canonical(name: &str) -> &str {
    if let Some(stripped) = name.strip_prefix("ta.") {
        return stripped;
    }
    if let Some(stripped) = name.strip_prefix("math.") {
        return stripped;
    }
    name
}

pub fn signature(name: &str) -> Option<&'static Signature> {
    let name = canonical(name);
    SIGNATURES.iter().find(|s| s.name == name)
}

/// Builtin variables readable on every bar.
pub fn is_market_var(name: &str) -> bool {
    matches!(
        name,
        "open"
            | "high"
            | "low"
            | "close"
            | "volume"
            | "time"
            | "bar_index"
            | "hlc3"
            | "ohlc4"
            | "na"
            | "strategy.long"
            | "strategy.short"
            | "strategy.position_size"
            | "strategy.equity"
    )
}

pub fn market_value(ctx: &Context, name: &str) -> Option<Value> {
    let value = match name {
        "open" => Value::Num(ctx.open),
        "high" => Value::Num(ctx.high),
        "low" => Value::Num(ctx.low),
        "close" => Value::Num(ctx.close),
        "volume" => Value::Num(ctx.volume),
        "time" => Value::Num(ctx.time as f64),
        "bar_index" => Value::Num(ctx.bar_index as f64),
        "hlc3" => Value::Num((ctx.high + ctx.low + ctx.close) / 3.0),
        "ohlc4" => Value::Num((ctx.open + ctx.high + ctx.low + ctx.close) / 4.0),
        "na" => Value::na(),
        "strategy.long" => Value::Str("long".into()),
        "strategy.short" => Value::Str("short".into()),
        "strategy.position_size" => Value::Num(ctx.broker.position.size),
        "strategy.equity" => Value::Num(ctx.equity()),
        _ => return None,
    };
    Some(value)
}

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map(Value::as_num).unwrap_or(f64::NAN)
}

/// Window-length argument: non-positive or non-finite means "no window",
/// which every indicator answers with NaN.
fn window(args: &[Value], i: usize) -> usize {
    let v = num(args, i);
    if v.is_finite() && v >= 1.0 {
        v as usize
    } else {
        0
    }
}

fn kwarg<'a>(kwargs: &'a [(&str, Value)], key: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

fn text(args: &[Value], i: usize) -> Option<&str> {
    match args.get(i) {
        Some(Value::Str(s)) => Some(s),
        _ => None,
    }
}

/// Fetch this call's slot as `$variant` state, or abort the run on a
/// mismatch (the stable-order contract was broken).
macro_rules! slot {
    ($ctx:expr, $pos:expr, $variant:ident, $make:expr, $name:literal) => {{
        let (idx, slot) = $ctx.states.get_or_init(|| SlotState::$variant($make));
        match slot {
            SlotState::$variant(state) => state,
            _ => {
                return Err(RuntimeError::SlotTypeMismatch {
                    slot: idx,
                    expected: $name,
                    bar: $ctx.bar_index,
                    line: $pos.line,
                    col: $pos.col,
                })
            }
        }
    }};
}

fn extrema_slot<'c>(
    ctx: &'c mut Context,
    pos: Pos,
    kind: ExtremeKind,
    name: &'static str,
) -> Result<&'c mut ExtremaState, RuntimeError> {
    let bar = ctx.bar_index;
    let (idx, slot) = ctx
        .states
        .get_or_init(|| SlotState::Extrema(ExtremaState::new(kind)));
    match slot {
        SlotState::Extrema(state) if state.kind() == kind => Ok(state),
        _ => Err(RuntimeError::SlotTypeMismatch {
            slot: idx,
            expected: name,
            bar,
            line: pos.line,
            col: pos.col,
        }),
    }
}

/// Execute a builtin. `args` and `kwargs` are already evaluated, in program
/// order, so the slot cursor advances deterministically.
pub fn call(
    ctx: &mut Context,
    name: &str,
    args: &[Value],
    kwargs: &[(&str, Value)],
    pos: Pos,
) -> Result<Value, RuntimeError> {
    let value = match canonical(name) {
        "sma" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Sma, SmaState::new(), "sma");
            Value::Num(state.update(source, length))
        }
        "ema" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Ema, EmaState::new(), "ema");
            Value::Num(state.update(source, length))
        }
        "rma" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Rma, RmaState::new(), "rma");
            Value::Num(state.update(source, length))
        }
        "wma" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Wma, WmaState::new(), "wma");
            Value::Num(state.update(source, length))
        }
        "vwma" => {
            // sma(source * volume) / sma(volume); each sub-call owns a slot.
            let (source, length) = (num(args, 0), window(args, 1));
            let volume = ctx.volume;
            let pv = {
                let state = slot!(ctx, pos, Sma, SmaState::new(), "sma");
                state.update(source * volume, length)
            };
            let v = {
                let state = slot!(ctx, pos, Sma, SmaState::new(), "sma");
                state.update(volume, length)
            };
            Value::Num(pv / v)
        }
        "swma" => {
            let source = num(args, 0);
            let state = slot!(ctx, pos, Swma, SwmaState::new(), "swma");
            Value::Num(state.update(source))
        }
        "sum" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Sma, SmaState::new(), "sma");
            Value::Num(state.update(source, length) * length as f64)
        }
        "stdev" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Bollinger, BollingerState::new(), "stdev");
            Value::Num(state.stdev(source, length))
        }
        "dev" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Dev, DevState::new(), "dev");
            Value::Num(state.update(source, length).1)
        }
        "bb" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let mult = kwarg(kwargs, "mult")
                .map(Value::as_num)
                .or_else(|| args.get(2).map(Value::as_num))
                .unwrap_or(2.0);
            let state = slot!(ctx, pos, Bollinger, BollingerState::new(), "bb");
            let [basis, upper, lower] = state.bands(source, length, mult);
            Value::Array(vec![
                Value::Num(basis),
                Value::Num(upper),
                Value::Num(lower),
            ])
        }
        "rsi" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Rsi, RsiState::new(), "rsi");
            Value::Num(state.update(source, length))
        }
        "macd" => {
            let source = num(args, 0);
            let (fast, slow, signal) = (window(args, 1), window(args, 2), window(args, 3));
            let state = slot!(ctx, pos, Macd, MacdState::new(), "macd");
            let [line, sig_line, hist] = state.update(source, fast, slow, signal);
            Value::Array(vec![
                Value::Num(line),
                Value::Num(sig_line),
                Value::Num(hist),
            ])
        }
        "mom" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Mom, MomState::new(), "mom");
            Value::Num(state.update(source, length))
        }
        "change" => {
            let source = num(args, 0);
            let state = slot!(ctx, pos, Change, ChangeState::new(), "change");
            Value::Num(state.update(source))
        }
        "cci" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = slot!(ctx, pos, Cci, CciState::new(), "cci");
            Value::Num(state.update(source, length, 0.015))
        }
        "stoch" => {
            let (source, high, low) = (num(args, 0), num(args, 1), num(args, 2));
            let length = window(args, 3);
            let state = slot!(ctx, pos, Stoch, StochState::new(), "stoch");
            Value::Num(state.update(source, high, low, length))
        }
        "highest" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = extrema_slot(ctx, pos, ExtremeKind::Highest, "highest")?;
            Value::Num(state.update(source, length).0)
        }
        "lowest" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = extrema_slot(ctx, pos, ExtremeKind::Lowest, "lowest")?;
            Value::Num(state.update(source, length).0)
        }
        "highestbars" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = extrema_slot(ctx, pos, ExtremeKind::Highest, "highestbars")?;
            Value::Num(state.update(source, length).1)
        }
        "lowestbars" => {
            let (source, length) = (num(args, 0), window(args, 1));
            let state = extrema_slot(ctx, pos, ExtremeKind::Lowest, "lowestbars")?;
            Value::Num(state.update(source, length).1)
        }
        "cross" => {
            let (x, y) = (num(args, 0), num(args, 1));
            let state = slot!(ctx, pos, Cross, CrossState::new(), "cross");
            let (over, under) = state.update(x, y);
            Value::Bool(over || under)
        }
        "crossover" => {
            let (x, y) = (num(args, 0), num(args, 1));
            let state = slot!(ctx, pos, Cross, CrossState::new(), "crossover");
            Value::Bool(state.update(x, y).0)
        }
        "crossunder" => {
            let (x, y) = (num(args, 0), num(args, 1));
            let state = slot!(ctx, pos, Cross, CrossState::new(), "crossunder");
            Value::Bool(state.update(x, y).1)
        }
        "atr" => {
            let length = window(args, 0);
            let (high, low, close) = (ctx.high, ctx.low, ctx.close);
            let state = slot!(ctx, pos, Atr, AtrState::new(), "atr");
            Value::Num(state.update(high, low, close, length))
        }
        "tr" => {
            let (high, low, close) = (ctx.high, ctx.low, ctx.close);
            let state = slot!(ctx, pos, Tr, TrState::new(), "tr");
            Value::Num(state.update(high, low, close))
        }
        "nz" => {
            let first = args.first().cloned().unwrap_or_else(Value::na);
            if first.is_na() {
                args.get(1).cloned().unwrap_or(Value::Num(0.0))
            } else {
                first
            }
        }
        "abs" => Value::Num(num(args, 0).abs()),
        "sqrt" => Value::Num(num(args, 0).sqrt()),
        "exp" => Value::Num(num(args, 0).exp()),
        "log" => Value::Num(num(args, 0).ln()),
        "pow" => Value::Num(num(args, 0).powf(num(args, 1))),
        "round" => Value::Num(num(args, 0).round()),
        "floor" => Value::Num(num(args, 0).floor()),
        "ceil" => Value::Num(num(args, 0).ceil()),
        "min" => Value::Num(
            args.iter()
                .map(Value::as_num)
                .fold(f64::INFINITY, f64::min),
        ),
        "max" => Value::Num(
            args.iter()
                .map(Value::as_num)
                .fold(f64::NEG_INFINITY, f64::max),
        ),
        "plot" => {
            let value = num(args, 0);
            let title = match kwarg(kwargs, "title") {
                Some(Value::Str(s)) => s.clone(),
                _ => text(args, 1).unwrap_or("plot").to_string(),
            };
            ctx.plots.record(&title, value, ctx.bar_index);
            Value::Num(value)
        }
        "strategy.entry" => {
            let id = text(args, 0).unwrap_or("entry").to_string();
            let direction = match text(args, 1) {
                Some("short") => Direction::Short,
                _ => Direction::Long,
            };
            let qty = kwarg(kwargs, "qty")
                .map(Value::as_num)
                .or_else(|| args.get(2).map(Value::as_num))
                .unwrap_or(1.0);
            let (close, time) = (ctx.close, ctx.time);
            ctx.broker.entry(&id, direction, qty, close, time);
            Value::na()
        }
        "strategy.close" => {
            let id = text(args, 0).unwrap_or_default().to_string();
            let (close, time) = (ctx.close, ctx.time);
            ctx.broker.close(&id, close, time);
            Value::na()
        }
        "strategy.close_all" => {
            let (close, time) = (ctx.close, ctx.time);
            ctx.broker.close_all(close, time);
            Value::na()
        }
        _ => Value::na(),
    };
    Ok(value)
}
