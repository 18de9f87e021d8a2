//! Invariant tests for the pipeline and the runtime laws: layout balance,
//! plot alignment, slot stability, and streaming-vs-naive equivalence under
//! dynamic window lengths driven from script code.

use bar_core::Bar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use script_engine::lexer::{tokenize, TokenKind};
use script_engine::{compile, execute_bar, feed, finalize_bar, Context, RuntimeError};

fn bar(i: usize, close: f64) -> Bar {
    Bar::new(i as i64 * 60_000, close, close + 0.5, close - 0.5, close, 1.0)
}

fn random_walk(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = 100.0;
    (0..n)
        .map(|_| {
            price += rng.gen_range(-1.0..1.0);
            price
        })
        .collect()
}

// ---------- law 1: tokenization layout --------------------------------------

#[test]
fn layout_law_balances_for_arbitrary_indentation() {
    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..60 {
        let mut src = String::new();
        for i in 0..30 {
            let indent = [0usize, 2, 4, 6, 8][rng.gen_range(0..5)];
            src.push_str(&" ".repeat(indent));
            if rng.gen_bool(0.3) {
                src.push_str(&format!("if close > {i}\n"));
            } else {
                src.push_str(&format!("x{round}_{i} = {i}\n"));
            }
        }
        let (tokens, _) = tokenize(&src);
        let begins = tokens.iter().filter(|t| t.kind == TokenKind::Begin).count();
        let ends = tokens.iter().filter(|t| t.kind == TokenKind::End).count();
        assert_eq!(begins, ends, "unbalanced for source:\n{src}");
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }
}

// ---------- law 2: plot alignment -------------------------------------------

#[test]
fn plot_series_always_align_with_bar_index() {
    let src = "\
plot(close, \"always\")
if close > 100
    plot(1, \"sometimes\")
if bar_index > 7
    plot(2, \"late\")
";
    let program = compile(src).unwrap();
    for n in [1usize, 3, 8, 25, 100] {
        let mut ctx = Context::new();
        let closes = random_walk(n as u64, n);
        for (i, &close) in closes.iter().enumerate() {
            feed(&program, &mut ctx, bar(i, close)).unwrap();
            for (title, series) in ctx.plots.iter() {
                assert_eq!(
                    series.len(),
                    ctx.bar_index,
                    "series `{title}` misaligned after bar {i} (n={n})"
                );
            }
        }
    }
}

// ---------- law 3: state-slot stability -------------------------------------

#[test]
fn slot_layout_is_identical_across_bars() {
    let src = "\
plot(sma(close, 3), \"a\")
plot(ema(close, 4), \"b\")
plot(rsi(close, 5), \"c\")
plot(highest(high, 6), \"d\")
plot(vwma(close, 3), \"e\")
[m, s, h] = macd(close, 5, 8, 3)
plot(m, \"f\")
";
    let program = compile(src).unwrap();
    let mut ctx = Context::new();
    let closes = random_walk(9, 50);
    let mut first_layout: Option<Vec<&'static str>> = None;
    for (i, &close) in closes.iter().enumerate() {
        feed(&program, &mut ctx, bar(i, close)).unwrap();
        let layout = ctx.states.kinds();
        match &first_layout {
            None => {
                assert_eq!(
                    layout,
                    vec!["sma", "ema", "rsi", "extrema", "sma", "sma", "macd"]
                );
                first_layout = Some(layout);
            }
            Some(expected) => assert_eq!(&layout, expected, "layout changed on bar {i}"),
        }
    }
}

#[test]
fn reordered_call_sites_abort_with_position() {
    let src = "\
if bar_index == 0
    sma(close, 2)
else
    ema(close, 2)
";
    let program = compile(src).unwrap();
    let mut ctx = Context::new();
    feed(&program, &mut ctx, bar(0, 1.0)).unwrap();
    let err = feed(&program, &mut ctx, bar(1, 2.0)).unwrap_err();
    match err {
        RuntimeError::SlotTypeMismatch { slot, expected, bar, line, .. } => {
            assert_eq!(slot, 0);
            assert_eq!(expected, "ema");
            assert_eq!(bar, 1);
            assert_eq!(line, 4);
        }
    }
}

// ---------- laws 4/5: streaming equivalence from script code ----------------

fn naive_mean(data: &[f64], i: usize, length: usize) -> f64 {
    if length == 0 || i + 1 < length {
        return f64::NAN;
    }
    data[i + 1 - length..=i].iter().sum::<f64>() / length as f64
}

fn naive_wma(data: &[f64], i: usize, length: usize) -> f64 {
    if length == 0 || i + 1 < length {
        return f64::NAN;
    }
    let win = &data[i + 1 - length..=i];
    let num: f64 = win.iter().enumerate().map(|(k, v)| (k + 1) as f64 * v).sum();
    num / ((length * (length + 1)) as f64 / 2.0)
}

fn naive_highest(data: &[f64], i: usize, length: usize) -> f64 {
    if i + 1 < length {
        return f64::NAN;
    }
    data[i + 1 - length..=i]
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Offset of the window minimum, ties to the most recent bar.
fn naive_lowestbars(data: &[f64], i: usize, length: usize) -> f64 {
    if i + 1 < length {
        return f64::NAN;
    }
    let start = i + 1 - length;
    let mut best = start;
    for j in start..=i {
        if data[j] <= data[best] {
            best = j;
        }
    }
    -((i - best) as f64)
}

fn close_or_both_nan(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() <= 1e-6
}

#[test]
fn script_driven_dynamic_lengths_match_naive_references() {
    const N: usize = 5000;
    const WARMUP: usize = 100;
    let src = "\
len = 2 + (bar_index * 7) % 44
plot(sma(close, len), \"s\")
plot(wma(close, len), \"w\")
plot(highest(close, len), \"h\")
plot(lowestbars(close, len), \"lb\")
";
    let program = compile(src).unwrap();
    let mut ctx = Context::new();
    let closes = random_walk(31, N);
    for (i, &close) in closes.iter().enumerate() {
        feed(&program, &mut ctx, bar(i, close)).unwrap();
    }

    let sma = ctx.plots.get("s").unwrap();
    let wma = ctx.plots.get("w").unwrap();
    let highest = ctx.plots.get("h").unwrap();
    let lowestbars = ctx.plots.get("lb").unwrap();
    for i in WARMUP..N {
        let len = 2 + (i * 7) % 44;
        assert!(
            close_or_both_nan(sma[i], naive_mean(&closes, i, len)),
            "sma bar {i} len {len}"
        );
        assert!(
            close_or_both_nan(wma[i], naive_wma(&closes, i, len)),
            "wma bar {i} len {len}"
        );
        assert!(
            close_or_both_nan(highest[i], naive_highest(&closes, i, len)),
            "highest bar {i} len {len}"
        );
        assert!(
            close_or_both_nan(lowestbars[i], naive_lowestbars(&closes, i, len)),
            "lowestbars bar {i} len {len}"
        );
    }
}

// ---------- law 7: variance non-negativity ----------------------------------

#[test]
fn stdev_from_script_is_never_negative() {
    let src = "plot(stdev(close, 7), \"sd\")";
    let program = compile(src).unwrap();
    let mut ctx = Context::new();
    let mut rng = StdRng::seed_from_u64(77);
    for i in 0..1000 {
        let close = 1.0e9 + rng.gen_range(-1.0e-3..1.0e-3);
        feed(&program, &mut ctx, bar(i, close)).unwrap();
    }
    for &v in ctx.plots.get("sd").unwrap() {
        assert!(v.is_nan() || v >= 0.0);
    }
}

// ---------- split execute/finalize interface --------------------------------

#[test]
fn manual_execute_finalize_equals_feed() {
    let src = "plot(sma(close, 3), \"s\")";
    let program = compile(src).unwrap();
    let closes = random_walk(5, 40);

    let mut fed = Context::new();
    for (i, &close) in closes.iter().enumerate() {
        feed(&program, &mut fed, bar(i, close)).unwrap();
    }

    let mut manual = Context::new();
    for (i, &close) in closes.iter().enumerate() {
        let b = bar(i, close);
        manual.open = b.open;
        manual.high = b.high;
        manual.low = b.low;
        manual.close = b.close;
        manual.volume = b.volume;
        manual.time = b.time;
        execute_bar(&program, &mut manual).unwrap();
        finalize_bar(&mut manual);
    }

    let a = fed.plots.get("s").unwrap();
    let b = manual.plots.get("s").unwrap();
    assert_eq!(a.len(), b.len());
    for i in 0..a.len() {
        assert!(a[i].is_nan() && b[i].is_nan() || a[i] == b[i]);
    }
}
