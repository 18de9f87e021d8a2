use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity used across tokenizer, parser, and lowering diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// Machine-readable codes so hosts can map diagnostics to remediations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    InconsistentIndent,
    UnexpectedCharacter,
    UnterminatedString,
    MalformedNumber,
    MalformedColor,
    UnexpectedToken,
    DuplicateDefinition,
    UndefinedIdentifier,
    AssignBeforeDefinition,
    ArityMismatch,
    KeywordBeforePositional,
    BadKeywordArgument,
    MisplacedControl,
    NestedFunction,
}

/// A compile-phase problem with its source position.
///
/// Lines are 1-based and columns 0-based, matching editor conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl Diagnostic {
    pub fn warning(code: DiagnosticCode, message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            line,
            col,
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            line,
            col,
        }
    }
}

/// Returns true when any diagnostic in the list is fatal to the compile.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.severity == Severity::Error)
}

/// Hard failures during bar execution. Everything recoverable follows the
/// NaN discipline instead of raising.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A call site reached a slot holding state for a different indicator.
    /// This means calls were reordered across bars; the run cannot continue.
    #[error("state slot {slot} does not hold `{expected}` state (bar {bar}, at {line}:{col}): indicator calls were reordered")]
    SlotTypeMismatch {
        slot: usize,
        expected: &'static str,
        bar: usize,
        line: usize,
        col: usize,
    },
}
