//! The symbolic-engine capability.
//!
//! The dispatcher depends only on [`SymbolicEngine`]: it hands over an
//! [`EngineCall`] (normalized expression text, mode, and fully resolved
//! operation parameters) and receives either an [`EngineValue`] with a
//! display projection, or a classified [`EngineFailure`]. How the engine
//! represents expressions internally is its own business.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::mode::ModeTag;

/// A failure classified by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum EngineFailure {
    /// Mathematically undefined for this input.
    #[error("{0}")]
    #[diagnostic(code(mathexpr::engine::domain))]
    Domain(String),

    /// The engine does not know how to carry out this operation.
    #[error("{0}")]
    #[diagnostic(code(mathexpr::engine::unsupported))]
    Unsupported(String),

    #[error("time budget exhausted")]
    #[diagnostic(code(mathexpr::engine::timeout))]
    Timeout,

    #[error("cancelled")]
    #[diagnostic(code(mathexpr::engine::cancelled))]
    Cancelled,

    #[error("resource limit reached: {0}")]
    #[diagnostic(code(mathexpr::engine::resources))]
    ResourceExhausted(String),

    /// Anything the engine did not anticipate. Never shown to callers.
    #[error("internal engine failure: {0}")]
    #[diagnostic(code(mathexpr::engine::internal))]
    Internal(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineFailure>;

/// Integral transform kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransformKind {
    Laplace,
    Fourier,
    Mellin,
}

impl TransformKind {
    pub fn for_mode(mode: ModeTag) -> Option<Self> {
        match mode {
            ModeTag::LaplaceT => Some(Self::Laplace),
            ModeTag::FourierT => Some(Self::Fourier),
            ModeTag::MellinT => Some(Self::Mellin),
            _ => None,
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Laplace => "Laplace",
            Self::Fourier => "Fourier",
            Self::Mellin => "Mellin",
        })
    }
}

/// Canonical backend parameters. Every variable is resolved; every value
/// is normalized expression text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Expand,
    /// `aggressive` also tries factoring and log combination.
    Simplify { aggressive: bool },
    Factor,
    Substitute { bindings: Vec<(String, String)> },
    Integrate {
        variable: String,
        limits: Option<(String, String)>,
    },
    Differentiate { variable: String, order: u32 },
    /// `dy/dx` of the equation `expression = 0`.
    ImplicitDifferentiate { dependent: String, independent: String },
    /// Both sides of `expression = rhs` differentiated with respect to
    /// `variable`, every other symbol depending on it.
    TotalDifferentiate { variable: String, rhs: String },
    Transform {
        kind: TransformKind,
        input: String,
        output: String,
    },
}

/// One request to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineCall {
    pub mode: ModeTag,
    pub expression: String,
    pub operation: Operation,
}

/// Whether a result can be typeset beyond its plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueKind {
    /// A plain integer or decimal; displayed as text only.
    Numeric,
    Symbolic,
}

/// A successful engine result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineValue {
    /// Canonical operator form, parseable by the normalizer.
    pub text: String,
    pub kind: ValueKind,
    /// Side conditions, e.g. convergence regions of a transform.
    pub conditions: Vec<String>,
}

impl EngineValue {
    pub fn symbolic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ValueKind::Symbolic,
            conditions: Vec::new(),
        }
    }

    pub fn numeric(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ValueKind::Numeric,
            conditions: Vec::new(),
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = conditions;
        self
    }
}

/// Cooperative cancellation flag shared between a caller and a running
/// computation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Time budget for one engine call.
///
/// Engines should call [`Budget::check`] between expensive steps and
/// propagate its error.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Instant,
    cancel: CancelToken,
}

impl Budget {
    pub fn new(limit: Duration, cancel: CancelToken) -> Self {
        Self {
            deadline: Instant::now() + limit,
            cancel,
        }
    }

    /// A budget that ends `limit` from now and is never cancelled.
    pub fn with_limit(limit: Duration) -> Self {
        Self::new(limit, CancelToken::new())
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineFailure::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(EngineFailure::Timeout);
        }
        Ok(())
    }
}

/// A symbolic computation backend.
pub trait SymbolicEngine: Send + Sync {
    /// Human-readable name for diagnostics and tracing.
    fn name(&self) -> &str;

    /// Carry out one call within the budget.
    fn evaluate(&self, call: &EngineCall, budget: &Budget) -> EngineResult<EngineValue>;
}

impl fmt::Debug for dyn SymbolicEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolicEngine({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_budget_reports_cancellation() {
        let token = CancelToken::new();
        let budget = Budget::new(Duration::from_secs(60), token.clone());
        assert!(budget.check().is_ok());
        token.cancel();
        assert_eq!(budget.check(), Err(EngineFailure::Cancelled));
    }

    #[test]
    fn expired_budget_reports_timeout() {
        let budget = Budget::with_limit(Duration::ZERO);
        assert_eq!(budget.check(), Err(EngineFailure::Timeout));
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[test]
    fn transform_kind_follows_mode() {
        assert_eq!(
            TransformKind::for_mode(ModeTag::MellinT),
            Some(TransformKind::Mellin)
        );
        assert_eq!(TransformKind::for_mode(ModeTag::Expand), None);
    }
}
