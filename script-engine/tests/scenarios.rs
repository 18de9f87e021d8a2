//! End-to-end scenarios: compile a script, feed bars, inspect outputs.

use bar_core::Bar;
use script_engine::{compile, feed, Context, Direction};

fn bar(i: usize, close: f64) -> Bar {
    Bar::new(i as i64 * 60_000, close, close, close, close, 1.0)
}

fn run(source: &str, closes: &[f64]) -> Context {
    let program = compile(source).unwrap_or_else(|diags| panic!("compile failed: {diags:?}"));
    let mut ctx = Context::new();
    for (i, &close) in closes.iter().enumerate() {
        feed(&program, &mut ctx, bar(i, close)).expect("bar execution");
    }
    ctx
}

#[test]
fn arithmetic_precedence() {
    let ctx = run("x = 1 + 2 * 3\nplot(x, \"x\")", &[100.0]);
    assert_eq!(ctx.plots.get("x").unwrap(), &[7.0]);
}

#[test]
fn user_function_call() {
    let ctx = run("double(n) => n * 2\ny = double(10)\nplot(y, \"y\")", &[1.0]);
    assert_eq!(ctx.plots.get("y").unwrap(), &[20.0]);
}

#[test]
fn destructuring_from_function_result() {
    let src = "pair() => [1, 2]\n[a, b] = pair()\nplot(a, \"a\"), plot(b, \"b\")";
    let ctx = run(src, &[1.0]);
    assert_eq!(ctx.plots.get("a").unwrap(), &[1.0]);
    assert_eq!(ctx.plots.get("b").unwrap(), &[2.0]);
}

#[test]
fn sma_warmup_then_flat_value() {
    let closes = vec![100.0; 200];
    let ctx = run("plot(sma(close, 14), \"s\")", &closes);
    let series = ctx.plots.get("s").unwrap();
    assert_eq!(series.len(), 200);
    assert!(series[..13].iter().all(|v| v.is_nan()));
    assert!(series[13..].iter().all(|&v| (v - 100.0).abs() < 1e-9));
}

#[test]
fn highest_over_rising_closes() {
    let closes: Vec<f64> = (1..=50).map(|i| i as f64).collect();
    let ctx = run("plot(highest(close, 5), \"h\")", &closes);
    let series = ctx.plots.get("h").unwrap();
    for (i, &v) in series.iter().enumerate() {
        if i >= 4 {
            assert_eq!(v, (i + 1) as f64, "bar {i}");
        } else {
            assert!(v.is_nan(), "bar {i}");
        }
    }
}

#[test]
fn conditional_plot_leaves_gaps() {
    let closes: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 99.0 } else { 101.0 }).collect();
    let ctx = run("if close > 100\n    plot(1, \"signal\")\n", &closes);
    let series = ctx.plots.get("signal").unwrap();
    assert_eq!(series.len(), 10);
    for (i, &v) in series.iter().enumerate() {
        if i % 2 == 0 {
            assert!(v.is_nan(), "bar {i}");
        } else {
            assert_eq!(v, 1.0, "bar {i}");
        }
    }
}

#[test]
fn late_series_backfills_to_bar_zero() {
    let closes: Vec<f64> = (0..6).map(|i| i as f64).collect();
    // The plot only appears from bar 3 onward.
    let ctx = run("if bar_index >= 3\n    plot(close, \"late\")\n", &closes);
    let series = ctx.plots.get("late").unwrap();
    assert_eq!(series.len(), 6);
    assert!(series[..3].iter().all(|v| v.is_nan()));
    assert_eq!(&series[3..], &[3.0, 4.0, 5.0]);
}

#[test]
fn if_expression_value_and_else_branch() {
    let src = "m = if close > 10\n    close * 2\nelse\n    0 - 1\nplot(m, \"m\")";
    let ctx = run(src, &[5.0, 20.0]);
    assert_eq!(ctx.plots.get("m").unwrap(), &[-1.0, 40.0]);
}

#[test]
fn if_without_taken_branch_is_na() {
    let ctx = run("m = if close > 10\n    1\nplot(m, \"m\")", &[5.0]);
    assert!(ctx.plots.get("m").unwrap()[0].is_nan());
}

#[test]
fn for_loop_accumulates() {
    let src = "s = 0\nfor i = 1 to 4\n    s := s + i\nplot(s, \"s\")";
    let ctx = run(src, &[1.0]);
    assert_eq!(ctx.plots.get("s").unwrap(), &[10.0]);
}

#[test]
fn for_loop_with_step_and_value() {
    // The for expression itself carries the last body value.
    let src = "v = for i = 0 to 10 by 5\n    i * 2\nplot(v, \"v\")";
    let ctx = run(src, &[1.0]);
    assert_eq!(ctx.plots.get("v").unwrap(), &[20.0]);
}

#[test]
fn break_stops_the_loop() {
    let src = "s = 0\nfor i = 1 to 10\n    if i > 3\n        break\n    s := s + i\nplot(s, \"s\")";
    let ctx = run(src, &[1.0]);
    assert_eq!(ctx.plots.get("s").unwrap(), &[6.0]);
}

#[test]
fn continue_skips_even_iterations() {
    let src =
        "s = 0\nfor i = 1 to 5\n    if i % 2 == 0\n        continue\n    s := s + i\nplot(s, \"s\")";
    let ctx = run(src, &[1.0]);
    assert_eq!(ctx.plots.get("s").unwrap(), &[9.0]);
}

#[test]
fn ternary_and_nz() {
    let ctx = run("v = na\nplot(nz(v, 5), \"a\")\nplot(close > 0 ? 1 : 2, \"b\")", &[3.0]);
    assert_eq!(ctx.plots.get("a").unwrap(), &[5.0]);
    assert_eq!(ctx.plots.get("b").unwrap(), &[1.0]);
}

#[test]
fn bollinger_destructures_into_three_bands() {
    let src = "[basis, upper, lower] = bb(close, 3, 2)\nplot(basis, \"m\")\nplot(upper - lower, \"w\")";
    let closes = vec![10.0, 10.0, 10.0, 10.0];
    let ctx = run(src, &closes);
    let basis = ctx.plots.get("m").unwrap();
    let width = ctx.plots.get("w").unwrap();
    assert!(basis[1].is_nan());
    assert_eq!(basis[3], 10.0);
    assert_eq!(width[3], 0.0); // flat closes: zero deviation
}

#[test]
fn macd_parts_via_subscript() {
    let src = "parts = macd(close, 12, 26, 9)\nplot(parts[0] - parts[1], \"spread\")\nplot(parts[-1], \"hist\")";
    let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
    let ctx = run(src, &closes);
    let spread = ctx.plots.get("spread").unwrap();
    let hist = ctx.plots.get("hist").unwrap();
    for i in 0..closes.len() {
        // histogram == macd - signal, and a negative subscript reads from the end
        assert!((spread[i] - hist[i]).abs() < 1e-9, "bar {i}");
    }
}

#[test]
fn namespaced_aliases_share_nothing() {
    let src = "plot(ta.sma(close, 3), \"a\")\nplot(sma(close, 3), \"b\")";
    let closes = vec![1.0, 2.0, 3.0, 4.0];
    let ctx = run(src, &closes);
    assert_eq!(ctx.plots.get("a").unwrap()[3], 3.0);
    assert_eq!(ctx.plots.get("b").unwrap()[3], 3.0);
    assert_eq!(ctx.states.len(), 2);
}

#[test]
fn strategy_round_trip() {
    let src = "\
if bar_index == 1
    strategy.entry(\"l\", strategy.long, 2)
if bar_index == 3
    strategy.close(\"l\")
";
    let closes = vec![10.0, 11.0, 12.0, 13.0, 14.0];
    let ctx = run(src, &closes);
    assert_eq!(ctx.trades().len(), 1);
    let trade = &ctx.trades()[0];
    assert_eq!(trade.id, "l");
    assert_eq!(trade.entry_price, 11.0);
    assert_eq!(trade.exit_price, 13.0);
    assert_eq!(trade.quantity, 2.0);
    assert_eq!(trade.pnl, 4.0);
    assert_eq!(trade.direction, Direction::Long);
    assert_eq!(ctx.cash(), 4.0);
    assert!(ctx.position().is_flat());
}

#[test]
fn strategy_reversal_closes_then_flips() {
    let src = "\
if bar_index == 0
    strategy.entry(\"long\", strategy.long, 1)
if bar_index == 2
    strategy.entry(\"short\", strategy.short, 1)
";
    let closes = vec![100.0, 104.0, 108.0];
    let ctx = run(src, &closes);
    assert_eq!(ctx.trades().len(), 1);
    assert_eq!(ctx.trades()[0].pnl, 8.0);
    assert_eq!(ctx.position().direction(), Some(Direction::Short));
    assert_eq!(ctx.position().average_price, 108.0);
    // Equity marks the open short at the last close.
    assert_eq!(ctx.equity(), 8.0);
}

#[test]
fn crossover_strategy_on_crossing_series() {
    let src = "\
fast = sma(close, 2)
slow = sma(close, 4)
if crossover(fast, slow)
    strategy.entry(\"up\", strategy.long, 1)
if crossunder(fast, slow)
    strategy.close(\"up\")
";
    let closes = vec![
        10.0, 9.0, 8.0, 7.0, 8.5, 10.5, 12.0, 11.0, 8.0, 6.0, 5.0, 4.0,
    ];
    let ctx = run(src, &closes);
    assert_eq!(ctx.trades().len(), 1);
    let trade = &ctx.trades()[0];
    assert_eq!(trade.direction, Direction::Long);
    assert!(trade.exit_time > trade.entry_time);
    assert!((ctx.cash() - trade.pnl).abs() < 1e-12);
}

#[test]
fn keyword_arguments_reach_builtins() {
    let ctx = run("plot(close, title = \"named\")", &[42.0]);
    assert_eq!(ctx.plots.get("named").unwrap(), &[42.0]);
}

#[test]
fn multi_line_call_with_kwargs() {
    let src = "plot(\n    sma(close, 2),\n    title = \"wrapped\")";
    let ctx = run(src, &[1.0, 3.0]);
    assert_eq!(ctx.plots.get("wrapped").unwrap()[1], 2.0);
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let src = "// header comment\nx = 1\n\n// mid comment\nplot(x, \"x\") // trailing\n";
    let ctx = run(src, &[1.0]);
    assert_eq!(ctx.plots.get("x").unwrap(), &[1.0]);
}

#[test]
fn functions_can_use_indicators() {
    // Each call of the function body consumes its own slots per bar, in a
    // stable order across bars.
    let src = "spread(len) => sma(close, len) - sma(close, len * 2)\nplot(spread(2), \"s\")";
    let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
    let ctx = run(src, &closes);
    let series = ctx.plots.get("s").unwrap();
    // sma(close,2) at bar 19 = 19.5; sma(close,4) = 18.5
    assert!((series[19] - 1.0).abs() < 1e-9);
    assert_eq!(ctx.states.len(), 2);
}

#[test]
fn equity_tracks_open_position() {
    let src = "if bar_index == 0\n    strategy.entry(\"l\", strategy.long, 3)\nplot(strategy.equity, \"eq\")";
    let closes = vec![10.0, 12.0, 9.0];
    let ctx = run(src, &closes);
    let eq = ctx.plots.get("eq").unwrap();
    assert_eq!(eq[0], 0.0);
    assert_eq!(eq[1], 6.0);
    assert_eq!(eq[2], -3.0);
}
