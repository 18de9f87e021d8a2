//! An indentation-sensitive scripting language for technical-analysis
//! indicators and strategies, plus the bar-by-bar runtime that executes it.
//!
//! The pipeline is `tokenize` (layout-shaped tokens) → `parse` (syntax tree)
//! → `lower` (validated [`BarProgram`]). The program is compiled once and
//! driven with [`feed`] over a stream of OHLCV rows; indicator call sites
//! claim persistent state slots from the [`Context`] in stable call order.
//!
//! ```
//! use bar_core::Bar;
//! use script_engine::{compile, feed, Context};
//!
//! let program = compile("plot(sma(close, 3), \"avg\")").expect("compiles");
//! let mut ctx = Context::new();
//! for i in 0..5i64 {
//!     let price = 100.0 + i as f64;
//!     let bar = Bar::new(i * 60_000, price, price, price, price, 1.0);
//!     feed(&program, &mut ctx, bar).expect("runs");
//! }
//! assert_eq!(ctx.plots.get("avg").unwrap().len(), 5);
//! ```

pub mod ast;
pub mod builtins;
pub mod language;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod runtime;
pub mod strategy;

pub use language::{has_errors, Diagnostic, DiagnosticCode, RuntimeError, Severity};
pub use lower::BarProgram;
pub use runtime::{execute_bar, feed, finalize_bar, Context, SlotState, StateTable, Value};
pub use strategy::{Direction, PlotRegistry, Position, StrategyBook, Trade};

/// Compile source text to an executable bar program.
///
/// Runs the tokenizer, parser, and lowering; returns the program only when
/// no error-severity diagnostic was produced, otherwise the full diagnostic
/// list (warnings included).
pub fn compile(source: &str) -> Result<BarProgram, Vec<Diagnostic>> {
    let (tokens, mut diags) = lexer::tokenize(source);
    tracing::debug!(tokens = tokens.len(), "tokenized");
    let (script, parse_diags) = parser::parse(tokens);
    diags.extend(parse_diags);
    let program = lower::lower(script, &mut diags);
    if has_errors(&diags) {
        return Err(diags);
    }
    Ok(program)
}
