//! One recursive-descent routine per clause shape.
//!
//! All routines share [`ClauseCursor`], which walks the clause text and
//! knows how to read an identifier, a literal character, or a value that
//! runs up to the next top-level comma. Values are normalized exactly like
//! the main expression.

use std::collections::HashSet;
use std::num::NonZeroU32;

use crate::error::{SolveOutcome, SyntaxError, SyntaxResult, ValidationError};
use crate::normalize::{NormalizedExpression, normalize, tables::LEXICON};
use crate::syntax::Ast;

use super::{ArgumentClause, Binding, IntegrateSpec, Limits, ModeRule};

struct ClauseCursor<'a> {
    rule: &'a ModeRule,
    text: &'a str,
    pos: usize,
}

impl<'a> ClauseCursor<'a> {
    fn new(rule: &'a ModeRule, text: &'a str) -> Self {
        Self { rule, text, pos: 0 }
    }

    fn malformed(&self) -> SyntaxError {
        SyntaxError::MalformedClause {
            mode: self.rule.mode,
            clause: self.text.to_string(),
            expected: self.rule.shape,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos == self.text.len()
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> SyntaxResult<()> {
        if self.eat(ch) { Ok(()) } else { Err(self.malformed()) }
    }

    fn expect_end(&mut self) -> SyntaxResult<()> {
        if self.at_end() { Ok(()) } else { Err(self.malformed()) }
    }

    /// Raw text up to the next top-level `,` or `=`, trimmed.
    fn token(&mut self) -> SyntaxResult<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let mut depth = 0usize;
        let mut end = rest.len();
        for (idx, ch) in rest.char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' | '=' if depth == 0 => {
                    end = idx;
                    break;
                }
                _ => {}
            }
        }
        let token = rest[..end].trim();
        if token.is_empty() {
            return Err(self.malformed());
        }
        self.pos += end;
        Ok(token)
    }

    fn identifier(&mut self) -> SyntaxResult<String> {
        let token = self.token()?;
        identifier(token)
    }

    fn value(&mut self) -> SyntaxResult<NormalizedExpression> {
        let token = self.token()?;
        normalize(token)
    }
}

/// Validate a clause identifier: one variable exactly as the normalizer
/// would read it, never a function name or constant.
fn identifier(token: &str) -> SyntaxResult<String> {
    if LEXICON.is_function(token) {
        return Err(SyntaxError::FunctionAsIdentifier {
            name: token.to_string(),
        });
    }
    let invalid = || SyntaxError::InvalidIdentifier {
        token: token.to_string(),
    };
    let mut chars = token.chars();
    let well_formed = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed || LEXICON.is_constant(token) {
        return Err(invalid());
    }
    match normalize(token) {
        Ok(expr) if matches!(expr.ast(), Ast::Name(n) if n == token) => Ok(token.to_string()),
        _ => Err(invalid()),
    }
}

/// `x=5, y=a+1`
pub(super) fn bindings(rule: &ModeRule, clause: &str) -> SolveOutcome<ArgumentClause> {
    let mut cursor = ClauseCursor::new(rule, clause);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    loop {
        let variable = cursor.identifier()?;
        cursor.expect('=')?;
        let value = cursor.value()?;
        if !seen.insert(variable.clone()) {
            return Err(ValidationError::DuplicateBinding { name: variable }.into());
        }
        out.push(Binding { variable, value });
        if !cursor.eat(',') {
            break;
        }
    }
    cursor.expect_end()?;
    Ok(ArgumentClause::SubstituteBindings(out))
}

/// `x` or `x=lower,upper`
pub(super) fn integration(rule: &ModeRule, clause: &str) -> SolveOutcome<ArgumentClause> {
    let mut cursor = ClauseCursor::new(rule, clause);
    let variable = cursor.identifier()?;
    if cursor.at_end() {
        return Ok(ArgumentClause::IntegrateSpec(IntegrateSpec::indefinite(
            variable,
        )));
    }
    cursor.expect('=')?;
    let lower = cursor.value()?;
    cursor.expect(',')?;
    let upper = cursor.value()?;
    cursor.expect_end()?;
    Ok(ArgumentClause::IntegrateSpec(IntegrateSpec::definite(
        variable,
        Limits { lower, upper },
    )))
}

/// `x` or `x, order`
pub(super) fn derivative(rule: &ModeRule, clause: &str) -> SolveOutcome<ArgumentClause> {
    let mut cursor = ClauseCursor::new(rule, clause);
    let variable = cursor.identifier()?;
    let order = if cursor.eat(',') {
        let token = cursor.token()?;
        order(token)?
    } else {
        NonZeroU32::MIN
    };
    cursor.expect_end()?;
    Ok(ArgumentClause::DifferentiateSpec { variable, order })
}

fn order(token: &str) -> SolveOutcome<NonZeroU32> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(SyntaxError::InvalidOrder {
            token: token.to_string(),
        }
        .into());
    }
    let value: u32 = token.parse().map_err(|_| SyntaxError::InvalidOrder {
        token: token.to_string(),
    })?;
    NonZeroU32::new(value).ok_or_else(|| ValidationError::ZeroOrder.into())
}

fn variable_pair(rule: &ModeRule, clause: &str) -> SolveOutcome<(String, String)> {
    let mut cursor = ClauseCursor::new(rule, clause);
    let first = cursor.identifier()?;
    cursor.expect(',')?;
    let second = cursor.identifier()?;
    cursor.expect_end()?;
    if first == second {
        return Err(ValidationError::IdenticalVariables { name: first }.into());
    }
    Ok((first, second))
}

/// `y, x` for an equation in `y` and `x`
pub(super) fn equation_variables(rule: &ModeRule, clause: &str) -> SolveOutcome<ArgumentClause> {
    let (dependent, independent) = variable_pair(rule, clause)?;
    Ok(ArgumentClause::ImplicitSpec {
        dependent,
        independent,
    })
}

/// `t`, with `rhs` the right side of the equation
pub(super) fn total_variable(
    rule: &ModeRule,
    clause: &str,
    rhs: &NormalizedExpression,
) -> SolveOutcome<ArgumentClause> {
    let mut cursor = ClauseCursor::new(rule, clause);
    let variable = cursor.identifier()?;
    cursor.expect_end()?;
    Ok(ArgumentClause::TotalSpec {
        variable,
        rhs: rhs.clone(),
    })
}

/// `t, s`
pub(super) fn transform_pair(rule: &ModeRule, clause: &str) -> SolveOutcome<ArgumentClause> {
    let (input, transform) = variable_pair(rule, clause)?;
    Ok(ArgumentClause::TransformSpec { input, transform })
}
