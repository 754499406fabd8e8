//! Result formatter: engine values to display text and LaTeX markup.
//!
//! Markup is produced from the canonical grammar, so anything the engine
//! prints (and anything the normalizer emits) can be typeset. Plain numbers
//! get no markup; callers fall back to the text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::{MultiplicationStyle, PipelineConfig};
use crate::engine::{EngineValue, ValueKind};
use crate::error::{SolveError, SolveOutcome};
use crate::normalize::tables::GREEK_NAMES;
use crate::syntax::{self, Ast, BinOp};

/// A trailing `+ <letters>` term.
static TRAILING_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\+\s*([A-Za-z]+)\s*$").unwrap());

/// Functions with a dedicated LaTeX operator.
const LATEX_OPERATORS: &[(&str, &str)] = &[
    ("sin", r"\sin"),
    ("cos", r"\cos"),
    ("tan", r"\tan"),
    ("cot", r"\cot"),
    ("sec", r"\sec"),
    ("csc", r"\csc"),
    ("sinh", r"\sinh"),
    ("cosh", r"\cosh"),
    ("tanh", r"\tanh"),
    ("asin", r"\arcsin"),
    ("acos", r"\arccos"),
    ("atan", r"\arctan"),
    ("arcsin", r"\arcsin"),
    ("arccos", r"\arccos"),
    ("arctan", r"\arctan"),
    ("log", r"\log"),
    ("ln", r"\log"),
    ("gamma", r"\Gamma"),
];

/// Display text plus optional markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedResult {
    pub text: String,
    pub markup: Option<String>,
}

/// Remove a trailing `+ marker` term, if present.
pub fn strip_integration_constant<'a>(text: &'a str, marker: &str) -> &'a str {
    match TRAILING_TERM.captures(text) {
        Some(caps) if &caps[1] == marker => caps
            .get(0)
            .map_or(text, |whole| &text[..whole.start()]),
        _ => text,
    }
}

/// Turns engine values into what the caller displays.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    constant: String,
    style: MultiplicationStyle,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl ResultFormatter {
    pub fn new(constant: impl Into<String>, style: MultiplicationStyle) -> Self {
        Self {
            constant: constant.into(),
            style,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.integration_constant.trim(), config.multiplication_style)
    }

    pub fn integration_constant(&self) -> &str {
        &self.constant
    }

    /// Text and markup for one engine value. `indefinite` appends the
    /// integration constant to both; conditions go on the text only.
    pub fn format(&self, value: &EngineValue, indefinite: bool) -> SolveOutcome<FormattedResult> {
        let mut text = value.text.clone();
        let mut markup = match value.kind {
            ValueKind::Numeric => None,
            ValueKind::Symbolic => Some(self.symbolic_markup(&value.text)?),
        };
        if indefinite {
            text.push_str(" + ");
            text.push_str(&self.constant);
            if let Some(m) = markup.as_mut() {
                m.push_str(" + ");
                m.push_str(&self.constant);
            }
        }
        if !value.conditions.is_empty() {
            text.push_str(&format!(" (Conditions: {})", value.conditions.join(", ")));
        }
        Ok(FormattedResult { text, markup })
    }

    /// Markup for canonical text, or for an equation `lhs = rhs` of two
    /// canonical sides.
    fn symbolic_markup(&self, text: &str) -> SolveOutcome<String> {
        let sides: Vec<&str> = text.split(" = ").collect();
        if sides.len() > 2 {
            return Err(SolveError::Internal {
                detail: format!("engine result {text:?} has more than one equals sign"),
            });
        }
        let mut rendered = Vec::with_capacity(sides.len());
        for side in sides {
            let ast = syntax::parse(side).map_err(|e| SolveError::Internal {
                detail: format!("engine result {text:?} is not canonical: {e}"),
            })?;
            rendered.push(self.markup(&ast));
        }
        Ok(rendered.join(" = "))
    }

    /// LaTeX for a canonical parse tree.
    pub fn markup(&self, ast: &Ast) -> String {
        Latex { style: self.style }.render(ast)
    }
}

// ---------------------------------------------------------------------------
// LaTeX rendering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Sum,
    Product,
    Power,
    Atom,
}

fn precedence(ast: &Ast) -> Prec {
    match ast {
        Ast::Number(_) | Ast::Name(_) | Ast::Call { .. } => Prec::Atom,
        Ast::Neg(_) => Prec::Sum,
        Ast::Binary { op, .. } => match op {
            BinOp::Add | BinOp::Sub => Prec::Sum,
            BinOp::Mul => Prec::Product,
            // \frac delimits itself.
            BinOp::Div => Prec::Atom,
            BinOp::Pow => Prec::Power,
        },
    }
}

struct Latex {
    style: MultiplicationStyle,
}

impl Latex {
    fn render(&self, ast: &Ast) -> String {
        match ast {
            Ast::Number(n) => n.clone(),
            Ast::Name(n) => name(n),
            Ast::Call { name, args } => self.call(name, args),
            Ast::Neg(inner) => format!("-{}", self.wrap(inner, Prec::Product)),
            Ast::Binary { op, lhs, rhs } => match op {
                BinOp::Add => match &**rhs {
                    Ast::Neg(inner) => {
                        format!("{} - {}", self.render(lhs), self.wrap(inner, Prec::Product))
                    }
                    _ => format!("{} + {}", self.render(lhs), self.render(rhs)),
                },
                BinOp::Sub => format!("{} - {}", self.render(lhs), self.wrap(rhs, Prec::Product)),
                BinOp::Mul => self.product(ast),
                BinOp::Div => format!(r"\frac{{{}}}{{{}}}", self.render(lhs), self.render(rhs)),
                BinOp::Pow => self.power(lhs, rhs),
            },
        }
    }

    fn wrap(&self, ast: &Ast, ctx: Prec) -> String {
        let body = self.render(ast);
        if precedence(ast) < ctx {
            format!(r"\left({body}\right)")
        } else {
            body
        }
    }

    fn product(&self, ast: &Ast) -> String {
        let mut factors = Vec::new();
        flatten_product(ast, &mut factors);
        let mut out = String::new();
        for (i, factor) in factors.iter().enumerate() {
            let body = match (i, factor) {
                (0, Ast::Neg(_)) => self.render(factor),
                _ => self.wrap(factor, Prec::Product),
            };
            if i > 0 {
                let numeric_next = body.starts_with(|c: char| c.is_ascii_digit() || c == '.');
                if self.style == MultiplicationStyle::Cdot || numeric_next {
                    out.push_str(r" \cdot ");
                } else {
                    out.push(' ');
                }
            }
            out.push_str(&body);
        }
        out
    }

    fn power(&self, base: &Ast, exponent: &Ast) -> String {
        let exp = self.render(exponent);
        if let Ast::Call { name, args } = base {
            if let ([arg], Some(op)) = (args.as_slice(), operator(name)) {
                if name != "log" && name != "ln" && name != "gamma" {
                    return format!(r"{op}^{{{exp}}}\left({}\right)", self.render(arg));
                }
            }
        }
        let needs_parens = match base {
            Ast::Call { name, .. } => name == "exp",
            Ast::Binary { op: BinOp::Div, .. } => true,
            other => precedence(other) < Prec::Atom,
        };
        let base = if needs_parens {
            format!(r"\left({}\right)", self.render(base))
        } else {
            self.render(base)
        };
        format!("{base}^{{{exp}}}")
    }

    fn call(&self, name: &str, args: &[Ast]) -> String {
        let rendered: Vec<String> = args.iter().map(|a| self.render(a)).collect();
        let inner = rendered.join(", ");
        match name {
            "sqrt" => format!(r"\sqrt{{{inner}}}"),
            "abs" | "Abs" => format!(r"\left|{inner}\right|"),
            "exp" => format!("e^{{{inner}}}"),
            _ => {
                let op = operator(name).map_or_else(
                    || format!(r"\operatorname{{{name}}}"),
                    str::to_string,
                );
                format!(r"{op}\left({inner}\right)")
            }
        }
    }
}

fn operator(name: &str) -> Option<&'static str> {
    LATEX_OPERATORS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, op)| *op)
}

fn flatten_product<'a>(ast: &'a Ast, out: &mut Vec<&'a Ast>) {
    match ast {
        Ast::Binary {
            op: BinOp::Mul,
            lhs,
            rhs,
        } => {
            flatten_product(lhs, out);
            flatten_product(rhs, out);
        }
        other => out.push(other),
    }
}

fn name(n: &str) -> String {
    match n {
        "pi" => r"\pi".into(),
        "oo" | "inf" => r"\infty".into(),
        "E" => "e".into(),
        "I" => "i".into(),
        _ if GREEK_NAMES.contains(&n) => format!(r"\{n}"),
        _ => match n.split_once('_') {
            Some((base, sub)) => format!("{}_{{{sub}}}", name(base)),
            None => n.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latex(text: &str) -> String {
        ResultFormatter::default().markup(&syntax::parse(text).unwrap())
    }

    #[test]
    fn polynomials() {
        assert_eq!(latex("x^2 + 5*x + 6"), "x^{2} + 5 x + 6");
        assert_eq!(latex("a*x + x^2/2"), r"a x + \frac{x^{2}}{2}");
        assert_eq!(latex("x^(23)"), "x^{23}");
    }

    #[test]
    fn numbers_next_to_numbers_get_a_dot() {
        assert_eq!(latex("2*3*x"), r"2 \cdot 3 x");
    }

    #[test]
    fn cdot_style() {
        let f = ResultFormatter::new("C", MultiplicationStyle::Cdot);
        assert_eq!(f.markup(&syntax::parse("2*x*y").unwrap()), r"2 \cdot x \cdot y");
    }

    #[test]
    fn grouping_and_signs() {
        assert_eq!(latex("(x + 2)*(x + 3)"), r"\left(x + 2\right) \left(x + 3\right)");
        assert_eq!(latex("a - (b + c)"), r"a - \left(b + c\right)");
        assert_eq!(latex("-4*x^2"), "-4 x^{2}");
        assert_eq!(latex("(x + 1)^2"), r"\left(x + 1\right)^{2}");
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(latex("sqrt(pi)/2"), r"\frac{\sqrt{\pi}}{2}");
        assert_eq!(latex("sin(x)^2"), r"\sin^{2}\left(x\right)");
        assert_eq!(latex("exp(-x)"), "e^{-x}");
        assert_eq!(latex("abs(x)"), r"\left|x\right|");
        assert_eq!(latex("erf(x)"), r"\operatorname{erf}\left(x\right)");
        assert_eq!(latex("log(x)"), r"\log\left(x\right)");
        assert_eq!(latex("theta + x_1 + oo"), r"\theta + x_{1} + \infty");
    }

    #[test]
    fn equations_are_typeset_side_by_side() {
        let out = ResultFormatter::default()
            .format(&EngineValue::symbolic("y*(dx/dt) + x*(dy/dt) = (dm/dt)"), false)
            .unwrap();
        assert_eq!(
            out.markup.as_deref(),
            Some(r"y rac{dx}{dt} + x rac{dy}{dt} = rac{dm}{dt}")
        );
        let err = ResultFormatter::default()
            .format(&EngineValue::symbolic("a = b = c"), false)
            .unwrap_err();
        assert!(matches!(err, SolveError::Internal { .. }));
    }

    #[test]
    fn numeric_values_have_no_markup() {
        let out = ResultFormatter::default()
            .format(&EngineValue::numeric("65"), false)
            .unwrap();
        assert_eq!(out.text, "65");
        assert_eq!(out.markup, None);
    }

    #[test]
    fn indefinite_integrals_carry_the_constant() {
        let out = ResultFormatter::default()
            .format(&EngineValue::symbolic("a*x + x^2/2"), true)
            .unwrap();
        assert_eq!(out.text, "a*x + x^2/2 + C");
        assert_eq!(out.markup.as_deref(), Some(r"a x + \frac{x^{2}}{2} + C"));
    }

    #[test]
    fn conditions_go_on_the_text_only() {
        let value = EngineValue::symbolic("1/(s + 2)").with_conditions(vec!["s > -2".into()]);
        let out = ResultFormatter::default().format(&value, false).unwrap();
        assert_eq!(out.text, "1/(s + 2) (Conditions: s > -2)");
        assert_eq!(out.markup.as_deref(), Some(r"\frac{1}{s + 2}"));
    }

    #[test]
    fn uncanonical_engine_text_is_internal() {
        let err = ResultFormatter::default()
            .format(&EngineValue::symbolic("x +* 1"), false)
            .unwrap_err();
        assert!(matches!(err, SolveError::Internal { .. }));
    }

    #[test]
    fn strips_only_the_configured_constant() {
        assert_eq!(strip_integration_constant("x^2/2 + C", "C"), "x^2/2");
        assert_eq!(strip_integration_constant("x^2/2+C ", "C"), "x^2/2");
        assert_eq!(strip_integration_constant("x + y", "C"), "x + y");
        assert_eq!(strip_integration_constant("x^2", "C"), "x^2");
    }
}
