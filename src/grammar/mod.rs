//! Mode grammar table and argument parser.
//!
//! Each [`ModeTag`] maps to one [`ModeRule`]: the shape of the clause after
//! the first `;` and what happens when the clause is absent. The comma is
//! overloaded across modes (binding separator for substitution, limit
//! separator for integration, order separator for differentiation), so
//! every clause shape has its own small recursive-descent routine in
//! [`rules`] instead of a shared splitter.
//!
//! ```text
//! substitute     x=5, y=a+1          bindings
//! integrate      x | x=0,1           variable, optional limits
//! differentiate  x | x, 2            variable, optional order
//! (equation)     y, x                dependent, independent
//! transforms     t, s                input, transform variable
//! ```

pub mod rules;

use std::num::NonZeroU32;

use crate::error::{SolveOutcome, SyntaxError, ValidationError};
use crate::mode::ModeTag;
use crate::normalize::{NormalizedExpression, normalize};

/// The shape a clause must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseGrammar {
    /// No clause is expected.
    NoArguments,
    /// `identifier "=" value ("," identifier "=" value)*`
    Bindings,
    /// `identifier` or `identifier "=" value "," value`
    IntegrationVariable,
    /// `identifier ("," order)?`
    DerivativeVariable,
    /// `identifier "," identifier` naming the dependent and independent variable.
    EquationVariables,
    /// One identifier; both sides of an equation are differentiated.
    TotalVariable,
    /// `identifier "," identifier` naming the input and transform variable.
    TransformPair,
}

/// What an absent clause means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentPolicy {
    /// Nothing to default; the mode takes no clause.
    NotApplicable,
    /// Absence is a validation failure.
    Required,
    /// Use the sole free variable of the expression.
    SoleFreeVariable,
    /// Differentiate once with respect to `x`.
    FirstDerivativeInX,
}

/// One row of the grammar table.
#[derive(Debug, Clone, Copy)]
pub struct ModeRule {
    pub mode: ModeTag,
    pub grammar: ClauseGrammar,
    pub when_absent: AbsentPolicy,
    /// Human-readable clause shape for diagnostics.
    pub shape: &'static str,
}

const fn rule(
    mode: ModeTag,
    grammar: ClauseGrammar,
    when_absent: AbsentPolicy,
    shape: &'static str,
) -> ModeRule {
    ModeRule {
        mode,
        grammar,
        when_absent,
        shape,
    }
}

/// The grammar table, one row per mode, in [`ModeTag::ALL`] order.
pub static GRAMMAR_TABLE: [ModeRule; 10] = [
    rule(ModeTag::Expand, ClauseGrammar::NoArguments, AbsentPolicy::NotApplicable, "nothing"),
    rule(ModeTag::Simplify, ClauseGrammar::NoArguments, AbsentPolicy::NotApplicable, "nothing"),
    rule(ModeTag::Factor, ClauseGrammar::NoArguments, AbsentPolicy::NotApplicable, "nothing"),
    rule(ModeTag::Substitute, ClauseGrammar::Bindings, AbsentPolicy::Required, "x=5, y=2"),
    rule(
        ModeTag::Integrate,
        ClauseGrammar::IntegrationVariable,
        AbsentPolicy::SoleFreeVariable,
        "x or x=lower,upper",
    ),
    rule(
        ModeTag::Differentiate,
        ClauseGrammar::DerivativeVariable,
        AbsentPolicy::FirstDerivativeInX,
        "x or x, order",
    ),
    rule(ModeTag::Resimplify, ClauseGrammar::NoArguments, AbsentPolicy::NotApplicable, "nothing"),
    rule(ModeTag::LaplaceT, ClauseGrammar::TransformPair, AbsentPolicy::Required, "t, s"),
    rule(ModeTag::FourierT, ClauseGrammar::TransformPair, AbsentPolicy::Required, "x, k"),
    rule(ModeTag::MellinT, ClauseGrammar::TransformPair, AbsentPolicy::Required, "x, s"),
];

/// Differentiation of an equation `lhs = rhs` uses its own row.
pub static EQUATION_RULE: ModeRule = rule(
    ModeTag::Differentiate,
    ClauseGrammar::EquationVariables,
    AbsentPolicy::Required,
    "dependent, independent (e.g. y, x)",
);

/// Differentiating both sides of an equation with respect to one variable.
pub static TOTAL_RULE: ModeRule = rule(
    ModeTag::Differentiate,
    ClauseGrammar::TotalVariable,
    AbsentPolicy::Required,
    "t (differentiate both sides)",
);

/// The table row for a mode.
pub fn rule_for(mode: ModeTag) -> &'static ModeRule {
    let idx = match mode {
        ModeTag::Expand => 0,
        ModeTag::Simplify => 1,
        ModeTag::Factor => 2,
        ModeTag::Substitute => 3,
        ModeTag::Integrate => 4,
        ModeTag::Differentiate => 5,
        ModeTag::Resimplify => 6,
        ModeTag::LaplaceT => 7,
        ModeTag::FourierT => 8,
        ModeTag::MellinT => 9,
    };
    &GRAMMAR_TABLE[idx]
}

/// A substitution `variable = value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub variable: String,
    pub value: NormalizedExpression,
}

/// Definite integration bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Limits {
    pub lower: NormalizedExpression,
    pub upper: NormalizedExpression,
}

/// Typed clause value, one variant per mode family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentClause {
    None,
    SubstituteBindings(Vec<Binding>),
    IntegrateSpec(IntegrateSpec),
    DifferentiateSpec { variable: String, order: NonZeroU32 },
    ImplicitSpec { dependent: String, independent: String },
    /// Every other symbol depends on `variable`; `rhs` is the right side.
    TotalSpec { variable: String, rhs: NormalizedExpression },
    TransformSpec { input: String, transform: String },
}

/// Integration variable and optional limits; limits imply a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegrateSpec {
    variable: Option<String>,
    limits: Option<Limits>,
}

impl IntegrateSpec {
    /// No variable named; the expression's sole free variable applies.
    pub fn implicit() -> Self {
        Self {
            variable: None,
            limits: None,
        }
    }

    pub fn indefinite(variable: impl Into<String>) -> Self {
        Self {
            variable: Some(variable.into()),
            limits: None,
        }
    }

    pub fn definite(variable: impl Into<String>, limits: Limits) -> Self {
        Self {
            variable: Some(variable.into()),
            limits: Some(limits),
        }
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    pub fn limits(&self) -> Option<&Limits> {
        self.limits.as_ref()
    }
}

impl ArgumentClause {
    /// Whether this variant is legal for `mode`.
    pub fn fits(&self, mode: ModeTag) -> bool {
        match mode {
            ModeTag::Expand | ModeTag::Simplify | ModeTag::Factor | ModeTag::Resimplify => {
                matches!(self, Self::None)
            }
            ModeTag::Substitute => matches!(self, Self::SubstituteBindings(_)),
            ModeTag::Integrate => matches!(self, Self::IntegrateSpec(_)),
            ModeTag::Differentiate => {
                matches!(
                    self,
                    Self::DifferentiateSpec { .. }
                        | Self::ImplicitSpec { .. }
                        | Self::TotalSpec { .. }
                )
            }
            ModeTag::LaplaceT | ModeTag::FourierT | ModeTag::MellinT => {
                matches!(self, Self::TransformSpec { .. })
            }
        }
    }

    /// Whether an indefinite integral was requested.
    pub fn is_indefinite_integral(&self) -> bool {
        matches!(self, Self::IntegrateSpec(spec) if spec.limits.is_none())
    }
}

/// Parse the clause for `mode` against the mode's table row.
pub fn parse_arguments(
    mode: ModeTag,
    clause: Option<&str>,
    expression: &NormalizedExpression,
) -> SolveOutcome<ArgumentClause> {
    parse_with_rule(rule_for(mode), clause, expression)
}

/// Parse the clause of an equation `lhs = rhs` in differentiate mode.
///
/// A single variable `t` differentiates both sides with respect to `t`;
/// the returned expression is then `lhs`. Otherwise the clause names the
/// dependent and independent variables and the returned expression is
/// `lhs - rhs`, differentiated implicitly.
pub fn parse_equation_arguments(
    clause: Option<&str>,
    lhs: &NormalizedExpression,
    rhs: &NormalizedExpression,
) -> SolveOutcome<(NormalizedExpression, ArgumentClause)> {
    if let Some(text) = clause.filter(|c| !c.contains(',')) {
        let args = parse_with_rule(&TOTAL_RULE, Some(text), rhs)?;
        return Ok((lhs.clone(), args));
    }
    let difference = normalize(&format!("({lhs})-({rhs})"))?;
    let args = parse_with_rule(&EQUATION_RULE, clause, &difference)?;
    Ok((difference, args))
}

fn parse_with_rule(
    rule: &ModeRule,
    clause: Option<&str>,
    expression: &NormalizedExpression,
) -> SolveOutcome<ArgumentClause> {
    let Some(clause) = clause else {
        return Ok(absent(rule, expression)?);
    };

    let parsed = match rule.grammar {
        ClauseGrammar::NoArguments => {
            return Err(SyntaxError::UnexpectedClause {
                mode: rule.mode,
                clause: clause.to_string(),
            }
            .into());
        }
        ClauseGrammar::Bindings => rules::bindings(rule, clause)?,
        ClauseGrammar::IntegrationVariable => rules::integration(rule, clause)?,
        ClauseGrammar::DerivativeVariable => rules::derivative(rule, clause)?,
        ClauseGrammar::EquationVariables => rules::equation_variables(rule, clause)?,
        // The expression handed to this row is the right-hand side.
        ClauseGrammar::TotalVariable => rules::total_variable(rule, clause, expression)?,
        ClauseGrammar::TransformPair => rules::transform_pair(rule, clause)?,
    };
    debug_assert!(parsed.fits(rule.mode));
    Ok(parsed)
}

fn absent(
    rule: &ModeRule,
    expression: &NormalizedExpression,
) -> Result<ArgumentClause, ValidationError> {
    match rule.when_absent {
        AbsentPolicy::NotApplicable => Ok(ArgumentClause::None),
        AbsentPolicy::Required => Err(ValidationError::MissingClause {
            mode: rule.mode,
            expected: rule.shape,
        }),
        AbsentPolicy::SoleFreeVariable => {
            let vars = expression.free_variables();
            match vars.as_slice() {
                [_] => Ok(ArgumentClause::IntegrateSpec(IntegrateSpec::implicit())),
                [] => Err(ValidationError::NoFreeVariable),
                many => Err(ValidationError::AmbiguousVariable {
                    candidates: many.join(", "),
                }),
            }
        }
        AbsentPolicy::FirstDerivativeInX => Ok(ArgumentClause::DifferentiateSpec {
            variable: "x".into(),
            order: NonZeroU32::MIN,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolveError;
    use crate::normalize::normalize;

    fn expr(s: &str) -> NormalizedExpression {
        normalize(s).unwrap()
    }

    #[test]
    fn table_rows_match_their_modes() {
        for mode in ModeTag::ALL {
            assert_eq!(rule_for(mode).mode, mode);
        }
    }

    #[test]
    fn no_argument_modes_reject_a_clause() {
        let err = parse_arguments(ModeTag::Expand, Some("x=1"), &expr("x")).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Syntax(SyntaxError::UnexpectedClause { .. })
        ));
        assert_eq!(
            parse_arguments(ModeTag::Factor, None, &expr("x")).unwrap(),
            ArgumentClause::None
        );
    }

    #[test]
    fn substitute_requires_a_clause() {
        let err = parse_arguments(ModeTag::Substitute, None, &expr("2x")).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Validation(ValidationError::MissingClause { .. })
        ));
    }

    #[test]
    fn integrate_without_clause_needs_a_sole_variable() {
        let ok = parse_arguments(ModeTag::Integrate, None, &expr("x^2+1")).unwrap();
        assert_eq!(ok, ArgumentClause::IntegrateSpec(IntegrateSpec::implicit()));

        let err = parse_arguments(ModeTag::Integrate, None, &expr("x+a")).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Validation(ValidationError::AmbiguousVariable { .. })
        ));

        let err = parse_arguments(ModeTag::Integrate, None, &expr("5")).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Validation(ValidationError::NoFreeVariable)
        ));
    }

    #[test]
    fn differentiate_defaults_to_first_derivative_in_x() {
        let clause = parse_arguments(ModeTag::Differentiate, None, &expr("y^2")).unwrap();
        assert_eq!(
            clause,
            ArgumentClause::DifferentiateSpec {
                variable: "x".into(),
                order: NonZeroU32::MIN
            }
        );
    }

    #[test]
    fn transforms_require_a_clause() {
        let err = parse_arguments(ModeTag::LaplaceT, None, &expr("t")).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Validation(ValidationError::MissingClause { .. })
        ));
    }

    #[test]
    fn equations_require_their_variables() {
        let err = parse_equation_arguments(None, &expr("x^2+y^2"), &expr("1")).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Validation(ValidationError::MissingClause { .. })
        ));
    }

    #[test]
    fn variants_fit_only_their_modes() {
        let spec = ArgumentClause::TransformSpec {
            input: "t".into(),
            transform: "s".into(),
        };
        assert!(spec.fits(ModeTag::LaplaceT));
        assert!(!spec.fits(ModeTag::Integrate));
        assert!(!ArgumentClause::None.fits(ModeTag::Substitute));
    }
}
