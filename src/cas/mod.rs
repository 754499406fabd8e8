//! Built-in exact-arithmetic engine.
//!
//! Expressions are parsed from canonical text into [`Expr`], an algebraic
//! form over `BigRational` kept canonical by its constructors. Everything
//! outside the supported forms comes back as a classified
//! [`EngineFailure`], never a panic.

mod calculus;
mod expr;
mod poly;
mod simplify;
mod transform;

use std::collections::HashMap;

pub use expr::{Constant, Expr, Func, format_decimal};
pub use simplify::SaturationLimits;

use crate::config::PipelineConfig;
use crate::engine::{
    Budget, EngineCall, EngineFailure, EngineResult, EngineValue, Operation, SymbolicEngine,
};
use crate::syntax;

/// The reference [`SymbolicEngine`].
#[derive(Debug, Clone)]
pub struct Cas {
    limits: SaturationLimits,
}

impl Default for Cas {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Cas {
    pub fn new(limits: SaturationLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(SaturationLimits {
            iterations: config.simplify_iterations,
            nodes: config.simplify_node_limit,
        })
    }

    /// Canonical text into an expression. The pipeline only hands over
    /// text it produced itself, so a parse failure is an internal error.
    fn parse(text: &str) -> EngineResult<Expr> {
        let ast = syntax::parse(text).map_err(|e| {
            EngineFailure::Internal(format!("canonical text {text:?} did not parse: {e}"))
        })?;
        Expr::from_ast(&ast)
    }

    fn simplified(&self, e: &Expr, budget: &Budget) -> EngineResult<Expr> {
        simplify::simplify(e, false, self.limits, budget)
    }

    fn run(&self, call: &EngineCall, budget: &Budget) -> EngineResult<EngineValue> {
        let e = Self::parse(&call.expression)?;
        budget.check()?;
        let result = match &call.operation {
            Operation::Expand => poly::expand(&e, budget)?,
            Operation::Simplify { aggressive } => {
                simplify::simplify(&e, *aggressive, self.limits, budget)?
            }
            Operation::Factor => poly::factor(&e, budget)?,
            Operation::Substitute { bindings } => return self.substitute(&e, bindings, budget),
            Operation::Integrate { variable, limits } => {
                let value = match limits {
                    None => calculus::antiderivative(&e, variable, budget)?,
                    Some((lower, upper)) => calculus::definite_integral(
                        &e,
                        variable,
                        &Self::parse(lower)?,
                        &Self::parse(upper)?,
                        budget,
                    )?,
                };
                self.simplified(&value, budget)?
            }
            Operation::Differentiate { variable, order } => {
                let value = calculus::nth_derivative(&e, variable, *order, budget)?;
                self.simplified(&value, budget)?
            }
            Operation::ImplicitDifferentiate {
                dependent,
                independent,
            } => {
                let value = calculus::implicit_derivative(&e, dependent, independent)?;
                self.simplified(&value, budget)?
            }
            Operation::TotalDifferentiate { variable, rhs } => {
                let rhs = Self::parse(rhs)?;
                let lhs = self.simplified(&calculus::total_derivative(&e, variable)?, budget)?;
                budget.check()?;
                let rhs = self.simplified(&calculus::total_derivative(&rhs, variable)?, budget)?;
                return Ok(EngineValue::symbolic(format!("{lhs} = {rhs}")));
            }
            Operation::Transform {
                kind,
                input,
                output,
            } => {
                let out = transform::transform(*kind, &e, input, output, budget)?;
                return Ok(exact(&out.value).with_conditions(out.conditions));
            }
        };
        Ok(exact(&result))
    }

    fn substitute(
        &self,
        e: &Expr,
        bindings: &[(String, String)],
        budget: &Budget,
    ) -> EngineResult<EngineValue> {
        let mut values = HashMap::with_capacity(bindings.len());
        for (name, text) in bindings {
            values.insert(name.clone(), Self::parse(text)?);
        }
        let result = e.substitute(&values);
        if let Some(reason) = result.singularity() {
            return Err(EngineFailure::Domain(format!("{reason} after substitution")));
        }
        if !result.free_symbols().is_empty() {
            return Ok(exact(&self.simplified(&result, budget)?));
        }
        if let Expr::Num(_) = result {
            return Ok(exact(&result));
        }
        // Closed but irrational: report the decimal value.
        if result.contains_const(Constant::I) || result.contains_const(Constant::Infinity) {
            return Ok(exact(&result));
        }
        match result.eval_f64() {
            Some(v) => Ok(EngineValue::numeric(format_decimal(v))),
            None => Err(EngineFailure::Domain(format!(
                "{result} is undefined over the reals"
            ))),
        }
    }
}

/// Integers are numeric; everything else, fractions included, is symbolic.
fn exact(e: &Expr) -> EngineValue {
    if e.is_integer() {
        EngineValue::numeric(e.to_string())
    } else {
        EngineValue::symbolic(e.to_string())
    }
}

impl SymbolicEngine for Cas {
    fn name(&self) -> &str {
        "cas"
    }

    fn evaluate(&self, call: &EngineCall, budget: &Budget) -> EngineResult<EngineValue> {
        let _span = tracing::debug_span!("cas", mode = %call.mode).entered();
        let result = self.run(call, budget);
        match &result {
            Ok(value) => tracing::debug!(result = %value.text, "evaluated"),
            Err(failure) => tracing::debug!(%failure, "evaluation failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::{TransformKind, ValueKind};
    use crate::mode::ModeTag;

    fn call(mode: ModeTag, expression: &str, operation: Operation) -> EngineCall {
        EngineCall {
            mode,
            expression: expression.into(),
            operation,
        }
    }

    fn eval(c: &EngineCall) -> EngineResult<EngineValue> {
        Cas::default().evaluate(c, &Budget::with_limit(Duration::from_secs(60)))
    }

    fn substitute(expression: &str, bindings: &[(&str, &str)]) -> EngineResult<EngineValue> {
        let bindings = bindings
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        eval(&call(ModeTag::Substitute, expression, Operation::Substitute { bindings }))
    }

    #[test]
    fn expand_is_exact() {
        let out = eval(&call(ModeTag::Expand, "(x+2)*(x+3)", Operation::Expand)).unwrap();
        assert_eq!(out.text, "x^2 + 5*x + 6");
        assert_eq!(out.kind, ValueKind::Symbolic);
    }

    #[test]
    fn factor_recovers_roots() {
        let out = eval(&call(ModeTag::Factor, "x^2+5*x+6", Operation::Factor)).unwrap();
        assert_eq!(out.text, "(x + 2)*(x + 3)");
    }

    #[test]
    fn full_substitution_is_numeric() {
        let out = substitute("x^2+1", &[("x", "2")]).unwrap();
        assert_eq!(out, EngineValue::numeric("5"));

        let out = substitute("sqrt(x)", &[("x", "2")]).unwrap();
        assert_eq!(out, EngineValue::numeric("1.4142135623731"));
    }

    #[test]
    fn exact_fractions_stay_symbolic() {
        let out = substitute("x/4", &[("x", "2")]).unwrap();
        assert_eq!(out, EngineValue::symbolic("1/2"));
    }

    #[test]
    fn partial_substitution_stays_symbolic() {
        let out = substitute("x*y + x", &[("x", "2")]).unwrap();
        assert_eq!(out.text, "2*y + 2");
        assert_eq!(out.kind, ValueKind::Symbolic);
    }

    #[test]
    fn substitution_into_a_pole_is_a_domain_error() {
        let err = substitute("1/x", &[("x", "0")]).unwrap_err();
        assert!(matches!(err, EngineFailure::Domain(_)));
    }

    #[test]
    fn indefinite_integral() {
        let op = Operation::Integrate {
            variable: "x".into(),
            limits: None,
        };
        let out = eval(&call(ModeTag::Integrate, "x+a", op)).unwrap();
        assert_eq!(out.text, "a*x + x^2/2");
    }

    #[test]
    fn definite_integral_to_infinity() {
        let op = Operation::Integrate {
            variable: "x".into(),
            limits: Some(("0".into(), "oo".into())),
        };
        let out = eval(&call(ModeTag::Integrate, "exp(-x)", op)).unwrap();
        assert_eq!(out, EngineValue::numeric("1"));
    }

    #[test]
    fn derivatives() {
        let op = Operation::Differentiate {
            variable: "x".into(),
            order: 2,
        };
        let out = eval(&call(ModeTag::Differentiate, "sin(x^2)", op)).unwrap();
        assert_eq!(out.text, "-4*x^2*sin(x^2) + 2*cos(x^2)");

        let op = Operation::ImplicitDifferentiate {
            dependent: "y".into(),
            independent: "x".into(),
        };
        let out = eval(&call(ModeTag::Differentiate, "(x^2+y^2)-(1)", op)).unwrap();
        assert_eq!(out.text, "-x/y");
    }

    #[test]
    fn total_derivative_keeps_both_sides() {
        let op = Operation::TotalDifferentiate {
            variable: "t".into(),
            rhs: "m".into(),
        };
        let out = eval(&call(ModeTag::Differentiate, "x*y", op)).unwrap();
        assert_eq!(out.kind, ValueKind::Symbolic);
        let (lhs, rhs) = out.text.split_once(" = ").unwrap();
        assert!(lhs.contains("(dx/dt)") && lhs.contains("(dy/dt)"), "{lhs}");
        assert_eq!(rhs, "(dm/dt)");

        let op = Operation::TotalDifferentiate {
            variable: "t".into(),
            rhs: "5".into(),
        };
        let out = eval(&call(ModeTag::Differentiate, "t^2", op)).unwrap();
        assert_eq!(out.text, "2*t = 0");
    }

    #[test]
    fn transforms_carry_conditions() {
        let op = Operation::Transform {
            kind: TransformKind::Laplace,
            input: "t".into(),
            output: "s".into(),
        };
        let out = eval(&call(ModeTag::LaplaceT, "exp(-2*t)", op)).unwrap();
        assert_eq!(out.conditions, vec!["s > -2"]);
        assert_eq!(out.kind, ValueKind::Symbolic);
    }

    #[test]
    fn unsupported_integrals_are_classified() {
        let op = Operation::Integrate {
            variable: "x".into(),
            limits: None,
        };
        let err = eval(&call(ModeTag::Integrate, "exp(x^3)", op)).unwrap_err();
        assert!(matches!(err, EngineFailure::Unsupported(_)));
    }

    #[test]
    fn expired_budget_times_out() {
        let budget = Budget::with_limit(Duration::ZERO);
        let err = Cas::default()
            .evaluate(&call(ModeTag::Expand, "(x+1)^3", Operation::Expand), &budget)
            .unwrap_err();
        assert_eq!(err, EngineFailure::Timeout);
    }
}
