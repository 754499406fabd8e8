//! Operation dispatcher: descriptor in, classified engine outcome out.
//!
//! The dispatcher turns an [`OperationDescriptor`] into an [`EngineCall`]
//! with every parameter resolved, runs the engine on a worker thread under
//! a time budget, and classifies whatever comes back:
//!
//! | Engine outcome | Reported as |
//! |---|---|
//! | `Domain`, `Unsupported` | `EngineError`, message verbatim |
//! | `Timeout`, `ResourceExhausted`, budget overrun | `Timeout` |
//! | `Cancelled`, caller cancellation | `Cancelled` (kind `Timeout`) |
//! | `Internal`, panic, lost worker | `InternalError`, detail logged only |
//!
//! Only successes are cached, keyed by the full descriptor.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::engine::{
    Budget, CancelToken, EngineCall, EngineFailure, EngineValue, Operation, SymbolicEngine,
    TransformKind,
};
use crate::error::{SolveError, SolveOutcome, SyntaxError, SyntaxResult, ValidationError};
use crate::grammar::ArgumentClause;
use crate::mode::ModeTag;
use crate::normalize::NormalizedExpression;

/// How often the waiting side looks at the caller's cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Stack for the engine worker. Parsed input is bounded by
/// `syntax::MAX_NESTING`, but engine rewrites recurse several frames per level.
const ENGINE_STACK_BYTES: usize = 32 * 1024 * 1024;

/// The immutable unit of work handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationDescriptor {
    mode: ModeTag,
    expression: NormalizedExpression,
    args: ArgumentClause,
}

impl OperationDescriptor {
    /// Build a descriptor, rejecting arguments of the wrong mode family.
    pub fn new(
        mode: ModeTag,
        expression: NormalizedExpression,
        args: ArgumentClause,
    ) -> SyntaxResult<Self> {
        if !args.fits(mode) {
            return Err(SyntaxError::WrongArguments { mode });
        }
        Ok(Self {
            mode,
            expression,
            args,
        })
    }

    pub fn mode(&self) -> ModeTag {
        self.mode
    }

    pub fn expression(&self) -> &NormalizedExpression {
        &self.expression
    }

    pub fn args(&self) -> &ArgumentClause {
        &self.args
    }

    /// Whether the formatter must append the integration constant.
    pub fn is_indefinite_integral(&self) -> bool {
        self.mode == ModeTag::Integrate && self.args.is_indefinite_integral()
    }

    /// Resolve the descriptor into canonical engine parameters.
    pub fn to_call(&self) -> SolveOutcome<EngineCall> {
        let operation = match (self.mode, &self.args) {
            (ModeTag::Expand, ArgumentClause::None) => Operation::Expand,
            (ModeTag::Simplify, ArgumentClause::None) => Operation::Simplify { aggressive: false },
            (ModeTag::Resimplify, ArgumentClause::None) => Operation::Simplify { aggressive: true },
            (ModeTag::Factor, ArgumentClause::None) => Operation::Factor,
            (ModeTag::Substitute, ArgumentClause::SubstituteBindings(bindings)) => {
                Operation::Substitute {
                    bindings: bindings
                        .iter()
                        .map(|b| (b.variable.clone(), b.value.as_str().to_string()))
                        .collect(),
                }
            }
            (ModeTag::Integrate, ArgumentClause::IntegrateSpec(spec)) => {
                let variable = match spec.variable() {
                    Some(v) => v.to_string(),
                    None => self.sole_free_variable()?,
                };
                Operation::Integrate {
                    variable,
                    limits: spec
                        .limits()
                        .map(|l| (l.lower.as_str().to_string(), l.upper.as_str().to_string())),
                }
            }
            (ModeTag::Differentiate, ArgumentClause::DifferentiateSpec { variable, order }) => {
                Operation::Differentiate {
                    variable: variable.clone(),
                    order: order.get(),
                }
            }
            (
                ModeTag::Differentiate,
                ArgumentClause::ImplicitSpec {
                    dependent,
                    independent,
                },
            ) => Operation::ImplicitDifferentiate {
                dependent: dependent.clone(),
                independent: independent.clone(),
            },
            (ModeTag::Differentiate, ArgumentClause::TotalSpec { variable, rhs }) => {
                Operation::TotalDifferentiate {
                    variable: variable.clone(),
                    rhs: rhs.as_str().to_string(),
                }
            }
            (mode, ArgumentClause::TransformSpec { input, transform }) => {
                let kind = TransformKind::for_mode(mode)
                    .ok_or(SyntaxError::WrongArguments { mode })?;
                Operation::Transform {
                    kind,
                    input: input.clone(),
                    output: transform.clone(),
                }
            }
            (mode, _) => return Err(SyntaxError::WrongArguments { mode }.into()),
        };
        Ok(EngineCall {
            mode: self.mode,
            expression: self.expression.as_str().to_string(),
            operation,
        })
    }

    fn sole_free_variable(&self) -> Result<String, ValidationError> {
        let mut vars = self.expression.free_variables();
        match vars.len() {
            1 => Ok(vars.remove(0)),
            0 => Err(ValidationError::NoFreeVariable),
            _ => Err(ValidationError::AmbiguousVariable {
                candidates: vars.join(", "),
            }),
        }
    }
}

/// Runs descriptors against one engine under one time budget.
pub struct Dispatcher {
    engine: Arc<dyn SymbolicEngine>,
    timeout: Duration,
    cache: Option<DashMap<OperationDescriptor, EngineValue>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engine", &self.engine.name())
            .field("timeout", &self.timeout)
            .field("cached", &self.cache.as_ref().map(|c| c.len()))
            .finish()
    }
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn SymbolicEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            timeout,
            cache: None,
        }
    }

    /// Memoize successful results per descriptor.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(DashMap::new());
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of cached results; zero when caching is off.
    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn dispatch(&self, descriptor: &OperationDescriptor) -> SolveOutcome<EngineValue> {
        self.dispatch_with_cancel(descriptor, &CancelToken::new())
    }

    /// Dispatch, giving up early once `cancel` is set.
    pub fn dispatch_with_cancel(
        &self,
        descriptor: &OperationDescriptor,
        cancel: &CancelToken,
    ) -> SolveOutcome<EngineValue> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(descriptor)) {
            tracing::debug!(mode = %descriptor.mode(), "result cache hit");
            return Ok(hit.value().clone());
        }

        let call = descriptor.to_call()?;
        tracing::debug!(
            mode = %descriptor.mode(),
            expression = %descriptor.expression(),
            engine = self.engine.name(),
            "dispatching"
        );

        let start = Instant::now();
        let outcome = self.run(call, cancel);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(value) => {
                tracing::debug!(mode = %descriptor.mode(), elapsed_ms, result = %value.text, "engine returned");
                if let Some(cache) = &self.cache {
                    cache.insert(descriptor.clone(), value.clone());
                }
            }
            Err(SolveError::Internal { detail }) => {
                tracing::error!(mode = %descriptor.mode(), elapsed_ms, detail = %detail, "internal engine failure");
            }
            Err(err) => {
                tracing::warn!(mode = %descriptor.mode(), elapsed_ms, kind = %err.kind(), error = %err, "engine call failed");
            }
        }
        outcome
    }

    fn run(&self, call: EngineCall, cancel: &CancelToken) -> SolveOutcome<EngineValue> {
        let budget_ms = self.timeout.as_millis() as u64;
        if cancel.is_cancelled() {
            return Err(SolveError::Cancelled);
        }

        // The worker watches its own token so the caller's is never mutated.
        let worker_token = CancelToken::new();
        let budget = Budget::new(self.timeout, worker_token.clone());
        let engine = Arc::clone(&self.engine);
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("mathexpr-engine".into())
            .stack_size(ENGINE_STACK_BYTES)
            .spawn(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| engine.evaluate(&call, &budget)));
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(outcome);
            })
            .map_err(|e| SolveError::Internal {
                detail: format!("failed to spawn engine worker: {e}"),
            })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if cancel.is_cancelled() {
                worker_token.cancel();
                return Err(SolveError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                worker_token.cancel();
                return Err(SolveError::Timeout { budget_ms });
            }
            match rx.recv_timeout(remaining.min(CANCEL_POLL)) {
                Ok(Ok(Ok(value))) => return Ok(value),
                Ok(Ok(Err(failure))) => return Err(classify(failure, budget_ms)),
                Ok(Err(payload)) => {
                    return Err(SolveError::Internal {
                        detail: format!("engine panicked: {}", panic_message(payload.as_ref())),
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SolveError::Internal {
                        detail: "engine worker exited without a result".into(),
                    });
                }
            }
        }
    }
}

/// Map an engine-side failure onto the caller-facing taxonomy.
pub fn classify(failure: EngineFailure, budget_ms: u64) -> SolveError {
    match failure {
        EngineFailure::Domain(message) | EngineFailure::Unsupported(message) => {
            SolveError::Engine { message }
        }
        EngineFailure::Timeout | EngineFailure::ResourceExhausted(_) => {
            SolveError::Timeout { budget_ms }
        }
        EngineFailure::Cancelled => SolveError::Cancelled,
        EngineFailure::Internal(detail) => SolveError::Internal { detail },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::grammar::IntegrateSpec;
    use crate::normalize::normalize;

    /// Returns the expression unchanged and counts calls.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    impl SymbolicEngine for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn evaluate(&self, call: &EngineCall, _budget: &Budget) -> Result<EngineValue, EngineFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EngineValue::symbolic(call.expression.clone()))
        }
    }

    /// Fails with a fixed outcome, or panics.
    struct Failing(Option<EngineFailure>);

    impl SymbolicEngine for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn evaluate(&self, _call: &EngineCall, _budget: &Budget) -> Result<EngineValue, EngineFailure> {
            match &self.0 {
                Some(f) => Err(f.clone()),
                None => panic!("secret stack detail"),
            }
        }
    }

    /// Sleeps without ever checking the budget.
    struct Stubborn;

    impl SymbolicEngine for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn evaluate(&self, _call: &EngineCall, _budget: &Budget) -> Result<EngineValue, EngineFailure> {
            thread::sleep(Duration::from_secs(2));
            Ok(EngineValue::symbolic("late"))
        }
    }

    fn descriptor(mode: ModeTag, expr: &str, args: ArgumentClause) -> OperationDescriptor {
        OperationDescriptor::new(mode, normalize(expr).unwrap(), args).unwrap()
    }

    fn dispatcher(engine: impl SymbolicEngine + 'static, timeout_ms: u64) -> Dispatcher {
        Dispatcher::new(Arc::new(engine), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn wrong_argument_family_is_rejected() {
        let err = OperationDescriptor::new(
            ModeTag::Expand,
            normalize("x").unwrap(),
            ArgumentClause::IntegrateSpec(IntegrateSpec::indefinite("x")),
        )
        .unwrap_err();
        assert_eq!(err, SyntaxError::WrongArguments { mode: ModeTag::Expand });
    }

    #[test]
    fn resimplify_maps_to_aggressive_simplify() {
        let call = descriptor(ModeTag::Resimplify, "x", ArgumentClause::None)
            .to_call()
            .unwrap();
        assert_eq!(call.operation, Operation::Simplify { aggressive: true });
    }

    #[test]
    fn integrate_resolves_the_sole_variable() {
        let call = descriptor(
            ModeTag::Integrate,
            "t^2+1",
            ArgumentClause::IntegrateSpec(IntegrateSpec::implicit()),
        )
        .to_call()
        .unwrap();
        assert_eq!(
            call.operation,
            Operation::Integrate {
                variable: "t".into(),
                limits: None
            }
        );
    }

    #[test]
    fn differentiate_carries_the_order() {
        let call = descriptor(
            ModeTag::Differentiate,
            "sin(x^2)",
            ArgumentClause::DifferentiateSpec {
                variable: "x".into(),
                order: NonZeroU32::new(2).unwrap(),
            },
        )
        .to_call()
        .unwrap();
        assert_eq!(
            call.operation,
            Operation::Differentiate {
                variable: "x".into(),
                order: 2
            }
        );
        assert_eq!(call.expression, "sin(x^2)");
    }

    #[test]
    fn success_is_forwarded() {
        let d = dispatcher(Echo::default(), 1_000);
        let value = d
            .dispatch(&descriptor(ModeTag::Expand, "2x", ArgumentClause::None))
            .unwrap();
        assert_eq!(value.text, "2*x");
    }

    #[test]
    fn domain_failure_message_is_verbatim() {
        let d = dispatcher(Failing(Some(EngineFailure::Domain("division by zero".into()))), 1_000);
        let err = d
            .dispatch(&descriptor(ModeTag::Simplify, "1/x", ArgumentClause::None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineError);
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn resource_exhaustion_is_a_timeout() {
        let d = dispatcher(
            Failing(Some(EngineFailure::ResourceExhausted("e-graph nodes".into()))),
            1_000,
        );
        let err = d
            .dispatch(&descriptor(ModeTag::Simplify, "x", ArgumentClause::None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn panics_become_internal_errors_without_detail() {
        let d = dispatcher(Failing(None), 1_000);
        let err = d
            .dispatch(&descriptor(ModeTag::Factor, "x", ArgumentClause::None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(!err.to_string().contains("secret"));
        match err {
            SolveError::Internal { detail } => assert!(detail.contains("secret stack detail")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[test]
    fn slow_engine_times_out() {
        let d = dispatcher(Stubborn, 50);
        let start = Instant::now();
        let err = d
            .dispatch(&descriptor(ModeTag::Expand, "x", ArgumentClause::None))
            .unwrap_err();
        assert!(matches!(err, SolveError::Timeout { budget_ms: 50 }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let d = dispatcher(Echo::default(), 1_000);
        let token = CancelToken::new();
        token.cancel();
        let err = d
            .dispatch_with_cancel(&descriptor(ModeTag::Expand, "x", ArgumentClause::None), &token)
            .unwrap_err();
        assert!(matches!(err, SolveError::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn cache_returns_the_same_value_without_a_second_call() {
        let engine = Arc::new(Echo::default());
        let d = Dispatcher::new(engine.clone(), Duration::from_secs(1)).with_cache();
        let desc = descriptor(ModeTag::Expand, "(x+1)(x+2)", ArgumentClause::None);
        let first = d.dispatch(&desc).unwrap();
        let second = d.dispatch(&desc).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.cached_len(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let d = dispatcher(Failing(Some(EngineFailure::Unsupported("nope".into()))), 1_000)
            .with_cache();
        let desc = descriptor(ModeTag::Expand, "x", ArgumentClause::None);
        assert!(d.dispatch(&desc).is_err());
        assert_eq!(d.cached_len(), 0);
    }
}
