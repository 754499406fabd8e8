//! The solve pipeline: raw request in, [`SolveResult`] out.
//!
//! ```text
//! text ─► split_clause ─┬─► normalize ───────────┐
//!                       └─► parse_arguments ─────┴─► OperationDescriptor
//!                                                        │
//!                               Dispatcher (engine) ◄────┘
//!                                    │
//!                         ResultFormatter ─► SolveResult / SolveResponse
//! ```
//!
//! A [`Solver`] holds only immutable parts and may be shared across
//! threads; every request is independent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cas::Cas;
use crate::clause::split_clause;
use crate::config::PipelineConfig;
use crate::dispatch::{Dispatcher, OperationDescriptor};
use crate::engine::{CancelToken, SymbolicEngine};
use crate::error::{ErrorKind, SolveError, SolveOutcome, SyntaxError, SyntaxResult};
use crate::format::{FormattedResult, ResultFormatter, strip_integration_constant};
use crate::grammar::{parse_arguments, parse_equation_arguments};
use crate::mode::ModeTag;
use crate::normalize::normalize;

/// Inbound wire shape: `{ "mode": ..., "expr": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    pub mode: String,
    pub expr: String,
}

/// Outcome of one request. Either `text` (and possibly `markup`) or the
/// error pair is populated, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolveResult {
    pub ok: bool,
    pub text: Option<String>,
    pub markup: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

/// Outbound wire shape: `{ ok, result?, latex?, error? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What an external history store receives for a successful solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub mode: ModeTag,
    pub expr: String,
    pub result: String,
    pub latex: Option<String>,
}

impl SolveResult {
    pub fn success(formatted: FormattedResult) -> Self {
        Self {
            ok: true,
            text: Some(formatted.text),
            markup: formatted.markup,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failure(err: &SolveError) -> Self {
        Self {
            ok: false,
            text: None,
            markup: None,
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
        }
    }

    pub fn to_response(&self) -> SolveResponse {
        SolveResponse {
            ok: self.ok,
            result: self.text.clone(),
            latex: self.markup.clone(),
            error: self.error_message.clone(),
        }
    }

    /// The record for a history store; `None` for failures.
    pub fn history_record(&self, mode: ModeTag, expr: &str) -> Option<HistoryRecord> {
        let result = self.text.clone().filter(|_| self.ok)?;
        Some(HistoryRecord {
            mode,
            expr: expr.to_string(),
            result,
            latex: self.markup.clone(),
        })
    }
}

/// `lhs = rhs`, split at its only `=`.
fn split_equation(text: &str) -> SyntaxResult<Option<(&str, &str)>> {
    let mut sides = text.split('=');
    match (sides.next(), sides.next(), sides.next()) {
        (Some(_), None, _) | (None, ..) => Ok(None),
        (Some(lhs), Some(rhs), None) if !lhs.trim().is_empty() && !rhs.trim().is_empty() => {
            Ok(Some((lhs, rhs)))
        }
        _ => Err(SyntaxError::MalformedEquation),
    }
}

/// Drop the decorations the formatter adds, so a previous result can be
/// fed back in.
fn strip_decorations<'a>(text: &'a str, marker: &str) -> &'a str {
    let text = match text.find(" (Conditions:") {
        Some(idx) => &text[..idx],
        None => text,
    };
    strip_integration_constant(text.trim_end(), marker)
}

/// Shared entry point for every request.
#[derive(Debug)]
pub struct Solver {
    dispatcher: Dispatcher,
    formatter: ResultFormatter,
}

impl Solver {
    pub fn new(engine: Arc<dyn SymbolicEngine>, config: &PipelineConfig) -> Self {
        let dispatcher = Dispatcher::new(engine, config.timeout());
        let dispatcher = if config.cache_results {
            dispatcher.with_cache()
        } else {
            dispatcher
        };
        Self {
            dispatcher,
            formatter: ResultFormatter::from_config(config),
        }
    }

    /// A solver backed by the built-in [`Cas`] engine.
    pub fn with_builtin_engine(config: &PipelineConfig) -> Self {
        Self::new(Arc::new(Cas::from_config(config)), config)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn formatter(&self) -> &ResultFormatter {
        &self.formatter
    }

    /// Everything up to the engine call: split, normalize, parse the clause.
    pub fn describe(&self, mode: ModeTag, text: &str) -> SolveOutcome<OperationDescriptor> {
        let text = match mode {
            ModeTag::Resimplify => strip_decorations(text, self.formatter.integration_constant()),
            _ => text,
        };
        let split = split_clause(text)?;
        let clause = split.clause.as_deref();

        if mode == ModeTag::Differentiate {
            if let Some((lhs, rhs)) = split_equation(&split.expression)? {
                let (lhs, rhs) = (normalize(lhs)?, normalize(rhs)?);
                let (expression, args) = parse_equation_arguments(clause, &lhs, &rhs)?;
                return Ok(OperationDescriptor::new(mode, expression, args)?);
            }
        }

        let expression = normalize(&split.expression)?;
        let args = parse_arguments(mode, clause, &expression)?;
        Ok(OperationDescriptor::new(mode, expression, args)?)
    }

    pub fn try_solve(&self, mode: ModeTag, text: &str) -> SolveOutcome<FormattedResult> {
        self.try_solve_with_cancel(mode, text, &CancelToken::new())
    }

    pub fn try_solve_with_cancel(
        &self,
        mode: ModeTag,
        text: &str,
        cancel: &CancelToken,
    ) -> SolveOutcome<FormattedResult> {
        let descriptor = self.describe(mode, text)?;
        let value = self.dispatcher.dispatch_with_cancel(&descriptor, cancel)?;
        self.formatter
            .format(&value, descriptor.is_indefinite_integral())
    }

    pub fn solve(&self, mode: ModeTag, text: &str) -> SolveResult {
        self.solve_with_cancel(mode, text, &CancelToken::new())
    }

    pub fn solve_with_cancel(&self, mode: ModeTag, text: &str, cancel: &CancelToken) -> SolveResult {
        match self.try_solve_with_cancel(mode, text, cancel) {
            Ok(formatted) => SolveResult::success(formatted),
            Err(err) => {
                tracing::debug!(%mode, kind = %err.kind(), error = %err, "solve failed");
                SolveResult::failure(&err)
            }
        }
    }

    /// Handle a wire request, including an unrecognized mode string.
    pub fn handle(&self, request: &RawRequest) -> SolveResponse {
        match request.mode.parse::<ModeTag>() {
            Ok(mode) => self.solve(mode, &request.expr).to_response(),
            Err(err) => SolveResult::failure(&err.into()).to_response(),
        }
    }

    /// Markup for the expression part of `text`, without calling the engine.
    /// Empty input previews as an empty string.
    pub fn preview(&self, text: &str) -> SyntaxResult<String> {
        let expression = match split_clause(text) {
            Ok(split) => split.expression,
            Err(SyntaxError::EmptyExpression) => return Ok(String::new()),
            Err(err) => return Err(err),
        };
        match split_equation(&expression)? {
            Some((lhs, rhs)) => {
                let lhs = self.formatter.markup(normalize(lhs)?.ast());
                let rhs = self.formatter.markup(normalize(rhs)?.ast());
                Ok(format!("{lhs} = {rhs}"))
            }
            None => Ok(self.formatter.markup(normalize(&expression)?.ast())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::{Budget, EngineCall, EngineFailure, EngineValue};
    use crate::grammar::ArgumentClause;

    fn solver() -> Solver {
        Solver::with_builtin_engine(&PipelineConfig::default())
    }

    fn text(mode: ModeTag, input: &str) -> String {
        let result = solver().solve(mode, input);
        assert!(result.ok, "{input}: {:?}", result.error_message);
        result.text.unwrap_or_default()
    }

    /// Spins until the budget runs out.
    struct Stalling;

    impl SymbolicEngine for Stalling {
        fn name(&self) -> &str {
            "stalling"
        }

        fn evaluate(&self, _call: &EngineCall, budget: &Budget) -> Result<EngineValue, EngineFailure> {
            loop {
                budget.check()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    struct Panicking;

    impl SymbolicEngine for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn evaluate(&self, _call: &EngineCall, _budget: &Budget) -> Result<EngineValue, EngineFailure> {
            panic!("secret stack detail")
        }
    }

    #[test]
    fn expand_and_substitute() {
        assert_eq!(text(ModeTag::Expand, "(x+2)(x+3)"), "x^2 + 5*x + 6");
        let result = solver().solve(ModeTag::Substitute, "2x^2+3x; x=5");
        assert_eq!(result.text.as_deref(), Some("65"));
        assert_eq!(result.markup, None);
    }

    #[test]
    fn indefinite_integral_gets_the_marker() {
        let result = solver().solve(ModeTag::Integrate, "x+a; x");
        assert_eq!(result.text.as_deref(), Some("a*x + x^2/2 + C"));
        assert_eq!(result.markup.as_deref(), Some(r"a x + \frac{x^{2}}{2} + C"));
    }

    #[test]
    fn definite_integral_has_no_marker() {
        let result = solver().solve(ModeTag::Integrate, "x^2; x=0,1");
        assert_eq!(result.text.as_deref(), Some("1/3"));
        assert_eq!(result.markup.as_deref(), Some(r"\frac{1}{3}"));
    }

    #[test]
    fn resimplify_strips_the_marker() {
        let out = text(ModeTag::Resimplify, "a*x + x^2/2 + C");
        assert!(!out.contains('C'), "{out}");
    }

    #[test]
    fn second_derivative() {
        assert_eq!(
            text(ModeTag::Differentiate, "sin(x^2); x, 2"),
            "-4*x^2*sin(x^2) + 2*cos(x^2)"
        );
    }

    #[test]
    fn implicit_differentiation_of_an_equation() {
        assert_eq!(text(ModeTag::Differentiate, "x^2 + y^2 = 1; y, x"), "-x/y");
        let result = solver().solve(ModeTag::Differentiate, "x^2 + y^2 = 1");
        assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
    }

    #[test]
    fn single_variable_clause_differentiates_both_sides() {
        let descriptor = solver()
            .describe(ModeTag::Differentiate, "x^2 = 3t; t")
            .unwrap();
        assert_eq!(descriptor.expression().as_str(), "x^2");
        assert!(matches!(
            descriptor.args(),
            ArgumentClause::TotalSpec { variable, .. } if variable == "t"
        ));
        let out = text(ModeTag::Differentiate, "x^2 = 3t; t");
        let (lhs, rhs) = out.split_once(" = ").unwrap();
        assert!(lhs.contains("(dx/dt)") && lhs.contains('2'), "{out}");
        assert_eq!(rhs, "3");
    }

    #[test]
    fn transforms_report_conditions() {
        assert_eq!(
            text(ModeTag::LaplaceT, "exp(-2t); t, s"),
            "1/(s + 2) (Conditions: s > -2)"
        );
    }

    #[test]
    fn local_failures_never_reach_the_engine() {
        let s = Solver::new(Arc::new(Panicking), &PipelineConfig::default());
        let result = s.solve(ModeTag::Substitute, "x^2");
        assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
        let result = s.solve(ModeTag::Integrate, "x^2; x=5");
        assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
        let result = s.solve(ModeTag::Expand, "x^2 = 1");
        assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
    }

    #[test]
    fn engine_panics_are_internal_and_opaque() {
        let s = Solver::new(Arc::new(Panicking), &PipelineConfig::default());
        let result = s.solve(ModeTag::Expand, "x+1");
        assert_eq!(result.error_kind, Some(ErrorKind::InternalError));
        assert!(!result.error_message.unwrap_or_default().contains("secret"));
    }

    #[test]
    fn slow_engines_time_out() {
        let config = PipelineConfig {
            timeout_ms: 50,
            ..PipelineConfig::default()
        };
        let s = Solver::new(Arc::new(Stalling), &config);
        let result = s.solve(ModeTag::Expand, "x+1");
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn cancelled_requests_report_timeout_kind() {
        let s = Solver::new(Arc::new(Stalling), &PipelineConfig::default());
        let token = CancelToken::new();
        token.cancel();
        let result = s.solve_with_cancel(ModeTag::Expand, "x+1", &token);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn wire_shapes() {
        let s = solver();
        let response = s.handle(&RawRequest {
            mode: "EXPAND".into(),
            expr: "(x+1)^2".into(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["result"], "x^2 + 2*x + 1");
        assert!(json.get("error").is_none());

        let response = s.handle(&RawRequest {
            mode: "cube".into(),
            expr: "x".into(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("result").is_none());
        assert!(json["error"].as_str().unwrap_or_default().contains("cube"));
    }

    #[test]
    fn history_records_only_successes() {
        let s = solver();
        let ok = s.solve(ModeTag::Integrate, "x^2; x=0,1");
        let record = ok.history_record(ModeTag::Integrate, "x^2; x=0,1").unwrap();
        assert_eq!(record.result, "1/3");
        assert_eq!(record.latex.as_deref(), Some(r"\frac{1}{3}"));

        let failed = s.solve(ModeTag::Substitute, "x");
        assert!(failed.history_record(ModeTag::Substitute, "x").is_none());
    }

    #[test]
    fn preview_renders_without_the_engine() {
        let s = Solver::new(Arc::new(Panicking), &PipelineConfig::default());
        assert_eq!(s.preview("x²+2x; x=1").unwrap(), "x^{2} + 2 x");
        assert_eq!(s.preview("x^2 + y^2 = 1").unwrap(), "x^{2} + y^{2} = 1");
        assert_eq!(s.preview("   ").unwrap(), "");
        assert!(s.preview("(x+1").is_err());
    }

    #[test]
    fn equations_have_one_equals_sign() {
        assert_eq!(split_equation("x = 1").unwrap(), Some(("x ", " 1")));
        assert_eq!(split_equation("x + 1").unwrap(), None);
        assert!(split_equation("x = 1 = 2").is_err());
        assert!(split_equation("= 1").is_err());
    }
}
