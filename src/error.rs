//! Rich diagnostic error types for the solve pipeline.
//!
//! Every failure a request can end in maps onto one [`ErrorKind`]. Syntax
//! and validation failures are detected locally before any engine call;
//! engine, timeout and internal failures are caught at the dispatcher
//! boundary and classified. Each variant carries a miette diagnostic code
//! and help text so the caller knows how to fix the input.

use std::fmt;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::mode::ModeTag;

/// Closed error taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SyntaxError,
    ValidationError,
    EngineError,
    Timeout,
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyntaxError => "SyntaxError",
            Self::ValidationError => "ValidationError",
            Self::EngineError => "EngineError",
            Self::Timeout => "Timeout",
            Self::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Syntax errors
// ---------------------------------------------------------------------------

/// Malformed input: splitting, normalization or clause grammar failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum SyntaxError {
    #[error("expression cannot be empty")]
    #[diagnostic(
        code(mathexpr::syntax::empty),
        help("Type an expression before the first `;`, e.g. `(x+2)(x+3)`.")
    )]
    EmptyExpression,

    #[error("illegal character '{ch}' at column {column}")]
    #[diagnostic(
        code(mathexpr::syntax::illegal_char),
        help(
            "Expressions may contain letters, digits, `+ - * / ^ ( ) . ,`, \
             whitespace and Unicode superscript digits. Remove or replace '{ch}'."
        )
    )]
    IllegalCharacter { ch: char, column: usize },

    #[error("unmatched parenthesis at column {column}")]
    #[diagnostic(
        code(mathexpr::syntax::unmatched_paren),
        help("Every `(` needs a closing `)`. Check the parenthesis at column {column}.")
    )]
    UnmatchedParen { column: usize },

    #[error("superscript at column {column} has no base")]
    #[diagnostic(
        code(mathexpr::syntax::dangling_superscript),
        help("A superscript must follow a number, a variable or `)`, e.g. `x²`.")
    )]
    DanglingSuperscript { column: usize },

    #[error("malformed number \"{text}\"")]
    #[diagnostic(
        code(mathexpr::syntax::number),
        help("Numbers use a single decimal point, e.g. `2.5` or `.5`.")
    )]
    MalformedNumber { text: String },

    #[error("function `{name}` is not followed by `(`")]
    #[diagnostic(
        code(mathexpr::syntax::bare_function),
        help("Function arguments must be parenthesized: write `{name}(x)`, not `{name} x`.")
    )]
    BareFunction { name: String },

    #[error("expression is nested more than {limit} levels deep")]
    #[diagnostic(
        code(mathexpr::syntax::too_deep),
        help("Remove redundant parentheses or split the expression into smaller parts.")
    )]
    NestingTooDeep { limit: usize },

    #[error("cannot parse \"{expression}\": {message}")]
    #[diagnostic(
        code(mathexpr::syntax::unparseable),
        help("Check for missing operands, e.g. a trailing `+` or an empty `()`.")
    )]
    Unparseable { expression: String, message: String },

    #[error("{mode} does not take arguments, but got \"{clause}\"")]
    #[diagnostic(
        code(mathexpr::syntax::unexpected_clause),
        help("Remove everything after the `;`. This mode only needs the expression.")
    )]
    UnexpectedClause { mode: ModeTag, clause: String },

    #[error("malformed {mode} arguments \"{clause}\": expected {expected}")]
    #[diagnostic(
        code(mathexpr::syntax::malformed_clause),
        help("The text after `;` must have the shape: {expected}.")
    )]
    MalformedClause {
        mode: ModeTag,
        clause: String,
        expected: &'static str,
    },

    #[error("arguments do not belong to {mode}")]
    #[diagnostic(
        code(mathexpr::syntax::wrong_arguments),
        help("Each mode accepts exactly one argument shape; see `mathexpr modes`.")
    )]
    WrongArguments { mode: ModeTag },

    #[error("an equation may contain only one `=`")]
    #[diagnostic(
        code(mathexpr::syntax::equation),
        help("Write a single equation such as `x^2 + y^2 = 1`.")
    )]
    MalformedEquation,

    #[error("`{name}` is a function name and cannot be used as a variable")]
    #[diagnostic(
        code(mathexpr::syntax::function_as_identifier),
        help("Pick a different variable name, e.g. `x`, `t` or `u`.")
    )]
    FunctionAsIdentifier { name: String },

    #[error("\"{token}\" is not a valid variable name")]
    #[diagnostic(
        code(mathexpr::syntax::identifier),
        help("Use one variable as the normalizer reads it: a single letter, a Greek name, or a name with `_` such as `x_1`.")
    )]
    InvalidIdentifier { token: String },

    #[error("\"{token}\" is not a valid differentiation order")]
    #[diagnostic(
        code(mathexpr::syntax::order),
        help("The order is a positive whole number, e.g. `x, 2` for a second derivative.")
    )]
    InvalidOrder { token: String },
}

/// Result type for locally detected syntax failures.
pub type SyntaxResult<T> = std::result::Result<T, SyntaxError>;

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Well-formed input that is semantically insufficient for its mode.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ValidationError {
    #[error("unknown mode \"{mode}\"")]
    #[diagnostic(
        code(mathexpr::validation::unknown_mode),
        help(
            "Valid modes: expand, simplify, factor, substitute, integrate, \
             differentiate, resimplify, laplace_t, fourier_t, mellin_t."
        )
    )]
    UnknownMode { mode: String },

    #[error("{mode} needs arguments after `;`: {expected}")]
    #[diagnostic(
        code(mathexpr::validation::missing_clause),
        help("Append `; {expected}` to the expression.")
    )]
    MissingClause {
        mode: ModeTag,
        expected: &'static str,
    },

    #[error("cannot choose an integration variable among {candidates}")]
    #[diagnostic(
        code(mathexpr::validation::ambiguous_variable),
        help("Name the variable explicitly, e.g. `x+a; x`.")
    )]
    AmbiguousVariable { candidates: String },

    #[error("expression has no free variable to integrate over")]
    #[diagnostic(
        code(mathexpr::validation::no_free_variable),
        help("Name the variable explicitly, e.g. `5; x`.")
    )]
    NoFreeVariable,

    #[error("variable `{name}` is bound more than once")]
    #[diagnostic(
        code(mathexpr::validation::duplicate_binding),
        help("Give each variable a single value, e.g. `x=1, y=2`.")
    )]
    DuplicateBinding { name: String },

    #[error("differentiation order must be at least 1")]
    #[diagnostic(
        code(mathexpr::validation::zero_order),
        help("Use `x, 1` for the first derivative.")
    )]
    ZeroOrder,

    #[error("input and transform variable are both `{name}`")]
    #[diagnostic(
        code(mathexpr::validation::identical_variables),
        help("The transform variable must differ from the input variable, e.g. `t, s`.")
    )]
    IdenticalVariables { name: String },
}

// ---------------------------------------------------------------------------
// Top-level solve error
// ---------------------------------------------------------------------------

/// Every way a single request can fail.
#[derive(Debug, Error, Diagnostic)]
pub enum SolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error("{message}")]
    #[diagnostic(
        code(mathexpr::engine::rejected),
        help("The symbolic engine could not carry out this operation on the given expression.")
    )]
    Engine { message: String },

    #[error("operation timed out after {budget_ms} ms")]
    #[diagnostic(
        code(mathexpr::engine::timeout),
        help("Simplify the expression or raise `timeout_ms` in the configuration.")
    )]
    Timeout { budget_ms: u64 },

    #[error("operation was cancelled")]
    #[diagnostic(code(mathexpr::engine::cancelled))]
    Cancelled,

    /// `detail` is logged, never displayed.
    #[error("internal error: the computation failed unexpectedly")]
    #[diagnostic(
        code(mathexpr::internal),
        help("This is a bug. Retrying with a slightly different expression may help.")
    )]
    Internal { detail: String },
}

impl SolveError {
    /// The caller-facing kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::SyntaxError,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Engine { .. } => ErrorKind::EngineError,
            Self::Timeout { .. } | Self::Cancelled => ErrorKind::Timeout,
            Self::Internal { .. } => ErrorKind::InternalError,
        }
    }
}

/// Result type for pipeline stages that may fail with any error kind.
pub type SolveOutcome<T> = std::result::Result<T, SolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_converts_to_solve_error() {
        let err: SolveError = SyntaxError::EmptyExpression.into();
        assert_eq!(err.kind(), ErrorKind::SyntaxError);
    }

    #[test]
    fn cancellation_reports_as_timeout() {
        assert_eq!(SolveError::Cancelled.kind(), ErrorKind::Timeout);
        let err = SolveError::Timeout { budget_ms: 250 };
        assert!(err.to_string().contains("250"));
    }

    #[test]
    fn internal_detail_is_not_displayed() {
        let err = SolveError::Internal {
            detail: "worker thread panicked at src/cas/poly.rs:42".into(),
        };
        let msg = err.to_string();
        assert!(!msg.contains("poly.rs"));
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn engine_message_is_verbatim() {
        let err = SolveError::Engine {
            message: "no elementary antiderivative for exp(x^2)".into(),
        };
        assert_eq!(err.to_string(), "no elementary antiderivative for exp(x^2)");
    }

    #[test]
    fn clause_errors_name_the_mode() {
        let err = SyntaxError::UnexpectedClause {
            mode: ModeTag::Expand,
            clause: "x=1".into(),
        };
        assert!(err.to_string().starts_with("expand"));
    }
}
