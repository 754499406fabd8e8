//! Table-driven Laplace, Fourier and Mellin transforms.
//!
//! Conventions:
//! - Laplace: `F(s) = ∫_0^∞ f(t) e^{-st} dt`
//! - Fourier: `F(k) = ∫_{-∞}^{∞} f(x) e^{-2πikx} dx`
//! - Mellin: `F(s) = ∫_0^∞ x^{s-1} f(x) dx`
//!
//! All three are linear; constant factors are pulled out before the table
//! lookup. Each entry records the region where the integral converges.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive};

use crate::engine::{Budget, EngineFailure, EngineResult, TransformKind};

use super::calculus::{nth_derivative, slope, split_constant};
use super::expr::{Expr, Func};

/// A transformed expression and its convergence conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub value: Expr,
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Condition {
    /// The transform variable exceeds the bound.
    Above(Expr),
    Below(Expr),
    /// A parameter of the input must be positive.
    Positive(Expr),
}

#[derive(Debug, Default)]
struct Region(BTreeSet<Condition>);

impl Region {
    fn above(&mut self, bound: Expr) {
        self.0.insert(Condition::Above(bound));
    }

    fn below(&mut self, bound: Expr) {
        self.0.insert(Condition::Below(bound));
    }

    fn require_positive(&mut self, e: Expr) -> EngineResult<()> {
        if e.free_symbols().is_empty() {
            if let Some(v) = e.eval_f64() {
                if v > 0.0 {
                    return Ok(());
                }
                return Err(EngineFailure::Domain(format!(
                    "the transform does not converge because {e} is not positive"
                )));
            }
        }
        self.0.insert(Condition::Positive(e));
        Ok(())
    }

    /// Conditions with every bound moved by `by`.
    fn shifted(self, by: &Expr) -> Region {
        Region(
            self.0
                .into_iter()
                .map(|c| match c {
                    Condition::Above(b) => Condition::Above(b + by.clone()),
                    Condition::Below(b) => Condition::Below(b + by.clone()),
                    other => other,
                })
                .collect(),
        )
    }

    fn extend(&mut self, other: Region) {
        self.0.extend(other.0);
    }

    fn render(&self, var: &str) -> Vec<String> {
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut positive = Vec::new();
        for c in &self.0 {
            match c {
                Condition::Above(b) => lower.push(b),
                Condition::Below(b) => upper.push(b),
                Condition::Positive(p) => positive.push(p),
            }
        }
        let lower = tightest(lower, Ordering::Greater);
        let upper = tightest(upper, Ordering::Less);
        let mut out = Vec::new();
        if let ([lo], [hi]) = (lower.as_slice(), upper.as_slice()) {
            out.push(format!("{lo} < {var} < {hi}"));
        } else {
            out.extend(lower.iter().map(|b| format!("{var} > {b}")));
            out.extend(upper.iter().map(|b| format!("{var} < {b}")));
        }
        out.extend(positive.iter().map(|p| format!("{p} > 0")));
        out
    }
}

/// The strictest numeric bound plus every symbolic one.
fn tightest(bounds: Vec<&Expr>, keep: Ordering) -> Vec<Expr> {
    let mut best: Option<(f64, &Expr)> = None;
    let mut out = Vec::new();
    for b in bounds {
        match b.eval_f64().filter(|_| b.free_symbols().is_empty()) {
            Some(v) => {
                let stricter = best
                    .is_none_or(|(current, _)| v.partial_cmp(&current) == Some(keep));
                if stricter {
                    best = Some((v, b));
                }
            }
            None => out.push(b.clone()),
        }
    }
    if let Some((_, b)) = best {
        out.insert(0, b.clone());
    }
    out
}

fn no_entry(kind: TransformKind, f: &Expr) -> EngineFailure {
    EngineFailure::Unsupported(format!("no {kind} transform is known for {f}"))
}

fn divergent(kind: TransformKind, f: &Expr) -> EngineFailure {
    EngineFailure::Domain(format!("the {kind} transform of {f} does not converge"))
}

pub fn transform(
    kind: TransformKind,
    e: &Expr,
    input: &str,
    output: &str,
    budget: &Budget,
) -> EngineResult<Transformed> {
    if e.contains_sym(output) {
        return Err(EngineFailure::Domain(format!(
            "{output} is already used in the expression and cannot name the transform variable"
        )));
    }
    let mut region = Region::default();
    let mut parts = Vec::new();
    for term in e.terms() {
        budget.check()?;
        let (constant, dependent) = split_constant(&term, input);
        let value = match kind {
            TransformKind::Laplace => laplace(&dependent, input, output, &mut region, budget)?,
            TransformKind::Fourier => fourier(&dependent, input, output, &mut region)?,
            TransformKind::Mellin => mellin(&dependent, input, output, &mut region)?,
        };
        parts.push(constant * value);
    }
    Ok(Transformed {
        value: Expr::sum(parts),
        conditions: region.render(output),
    })
}

/// Sum of the exponents of `x` among the factors, and the other factors.
fn split_power(f: &Expr, x: &str) -> (Expr, Expr) {
    let mut exponent = Vec::new();
    let mut rest = Vec::new();
    for factor in f.factors() {
        match &factor {
            Expr::Sym(s) if s == x => exponent.push(Expr::one()),
            Expr::Pow(b, n) if matches!(&**b, Expr::Sym(s) if s == x) && n.is_free_of(x) => {
                exponent.push((**n).clone());
            }
            _ => rest.push(factor),
        }
    }
    (Expr::sum(exponent), Expr::product(rest))
}

fn laplace(
    f: &Expr,
    t: &str,
    s: &str,
    region: &mut Region,
    budget: &Budget,
) -> EngineResult<Expr> {
    budget.check()?;
    let kind = TransformKind::Laplace;
    let sv = Expr::sym(s);
    if f.is_free_of(t) {
        region.above(Expr::zero());
        return Ok(f.clone() / sv);
    }

    // Frequency shift: e^{at} h(t) -> H(s - a).
    let factors = f.factors();
    let exponential = factors.iter().enumerate().find_map(|(i, g)| match g {
        Expr::Func(Func::Exp, u) => slope(u, t).map(|a| (i, (**u).clone(), a)),
        _ => None,
    });
    if let Some((i, u, a)) = exponential {
        let intercept = u.substitute_one(t, &Expr::zero());
        let rest = Expr::product(
            factors
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, g)| g.clone()),
        );
        let mut inner = Region::default();
        let h = laplace(&rest, t, s, &mut inner, budget)?;
        region.extend(inner.shifted(&a));
        return Ok(Expr::func(Func::Exp, intercept) * h.substitute_one(s, &(sv - a)));
    }

    let (power, rest) = split_power(f, t);
    if !power.is_zero() {
        let Some(n) = power.as_num().cloned() else {
            return Err(no_entry(kind, f));
        };
        if rest.is_free_of(t) {
            if n <= -BigRational::one() {
                return Err(divergent(kind, f));
            }
            region.above(Expr::zero());
            let raised = Expr::Num(n + BigRational::one());
            return Ok(rest * Expr::func(Func::Gamma, raised.clone()) / Expr::pow(sv, raised));
        }
        // t^n h(t) -> (-1)^n d^n/ds^n H(s)
        let order = n
            .is_positive()
            .then(|| n.to_integer().to_u32())
            .flatten()
            .filter(|_| n.is_integer())
            .ok_or_else(|| no_entry(kind, f))?;
        let h = laplace(&rest, t, s, region, budget)?;
        let d = nth_derivative(&h, s, order, budget)?;
        return Ok(if order % 2 == 1 { -d } else { d });
    }

    let Expr::Func(g @ (Func::Sin | Func::Cos | Func::Sinh | Func::Cosh), u) = f else {
        return Err(no_entry(kind, f));
    };
    let Some(b) = slope(u, t).filter(|_| u.substitute_one(t, &Expr::zero()).is_zero()) else {
        return Err(no_entry(kind, f));
    };
    let s2 = Expr::pow(sv.clone(), Expr::int(2));
    let b2 = Expr::pow(b.clone(), Expr::int(2));
    Ok(match g {
        Func::Sin => {
            region.above(Expr::zero());
            b / (s2 + b2)
        }
        Func::Cos => {
            region.above(Expr::zero());
            sv / (s2 + b2)
        }
        Func::Sinh => {
            region.above(Expr::func(Func::Abs, b.clone()));
            b / (s2 - b2)
        }
        _ => {
            region.above(Expr::func(Func::Abs, b));
            sv / (s2 - b2)
        }
    })
}

fn fourier(f: &Expr, x: &str, k: &str, region: &mut Region) -> EngineResult<Expr> {
    let kind = TransformKind::Fourier;
    let Expr::Func(Func::Exp, u) = f else {
        return Err(no_entry(kind, f));
    };
    let u = (**u).clone();
    let xs = Expr::sym(x);
    let ks = Expr::sym(k);
    let pi = Expr::pi();
    let square = |e: Expr| Expr::pow(e, Expr::int(2));

    // exp(-a x^2) -> sqrt(pi/a) exp(-pi^2 k^2 / a)
    let a = -(u.clone() * Expr::pow(xs.clone(), Expr::int(-2)));
    if a.is_free_of(x) {
        region.require_positive(a.clone())?;
        let spread = square(pi.clone()) * square(ks) / a.clone();
        return Ok((pi / a).sqrt() * Expr::func(Func::Exp, -spread));
    }

    // exp(-a|x|) -> 2a / (a^2 + 4 pi^2 k^2)
    let a = -(u / Expr::func(Func::Abs, xs));
    if a.is_free_of(x) {
        region.require_positive(a.clone())?;
        let denom = square(a.clone()) + Expr::int(4) * square(pi) * square(ks);
        return Ok(Expr::int(2) * a / denom);
    }
    Err(no_entry(kind, f))
}

fn mellin(f: &Expr, x: &str, s: &str, region: &mut Region) -> EngineResult<Expr> {
    let kind = TransformKind::Mellin;
    let xs = Expr::sym(x);
    let (c, g) = split_power(f, x);
    let shifted = Expr::sym(s) + c.clone();
    let value = match &g {
        Expr::Func(Func::Exp, u) => {
            let u = (**u).clone();
            let linear = -(u.clone() / xs.clone());
            let quadratic = -(u * Expr::pow(xs, Expr::int(-2)));
            if linear.is_free_of(x) {
                // x^c exp(-a x) -> gamma(s + c) / a^(s + c)
                region.require_positive(linear.clone())?;
                Expr::func(Func::Gamma, shifted.clone()) / Expr::pow(linear, shifted)
            } else if quadratic.is_free_of(x) {
                region.require_positive(quadratic.clone())?;
                let half = shifted / Expr::int(2);
                Expr::func(Func::Gamma, half.clone())
                    / (Expr::int(2) * Expr::pow(quadratic, half))
            } else {
                return Err(no_entry(kind, f));
            }
        }
        Expr::Pow(b, r) if **b == xs.clone() + Expr::one() => {
            // x^c (1 + x)^-r -> B(s + c, r - s - c)
            let r = -(**r).clone();
            if !r.as_num().is_some_and(Signed::is_positive) {
                return Err(no_entry(kind, f));
            }
            region.below(r.clone() - c.clone());
            if r.is_one() {
                Expr::pi() / Expr::func(Func::Sin, Expr::pi() * shifted)
            } else {
                Expr::func(Func::Gamma, shifted.clone())
                    * Expr::func(Func::Gamma, r.clone() - shifted)
                    / Expr::func(Func::Gamma, r)
            }
        }
        _ if g.is_free_of(x) => return Err(divergent(kind, f)),
        _ => return Err(no_entry(kind, f)),
    };
    region.above(-c);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::syntax::parse;

    fn e(text: &str) -> Expr {
        Expr::from_ast(&parse(text).unwrap()).unwrap()
    }

    fn run(kind: TransformKind, text: &str, input: &str, output: &str) -> EngineResult<Transformed> {
        transform(kind, &e(text), input, output, &Budget::with_limit(Duration::from_secs(30)))
    }

    fn laplace_of(text: &str) -> Transformed {
        run(TransformKind::Laplace, text, "t", "s").unwrap()
    }

    #[test]
    fn laplace_table() {
        let out = laplace_of("1");
        assert_eq!(out.value, e("1/s"));
        assert_eq!(out.conditions, vec!["s > 0"]);

        assert_eq!(laplace_of("t^2").value, e("2/s^3"));
        assert_eq!(laplace_of("sin(3*t)").value, e("3/(s^2 + 9)"));
        assert_eq!(laplace_of("cos(t)").value, e("s/(s^2 + 1)"));
    }

    #[test]
    fn laplace_frequency_shift() {
        let out = laplace_of("exp(-2*t)");
        assert_eq!(out.value, e("1/(s + 2)"));
        assert_eq!(out.conditions, vec!["s > -2"]);

        let out = laplace_of("t*exp(t)");
        assert_eq!(out.value, e("1/(s - 1)^2"));
        assert_eq!(out.conditions, vec!["s > 1"]);
    }

    #[test]
    fn laplace_multiplication_by_t() {
        assert_eq!(laplace_of("t*sin(t)").value, e("2*s/(s^2 + 1)^2"));
    }

    #[test]
    fn laplace_is_linear() {
        let out = laplace_of("3 + 2*exp(t)");
        assert_eq!(out.value, e("3/s + 2/(s - 1)"));
        assert_eq!(out.conditions, vec!["s > 1"]);
    }

    #[test]
    fn laplace_symbolic_rate() {
        let out = laplace_of("exp(a*t)");
        assert_eq!(out.value, e("1/(s - a)"));
        assert_eq!(out.conditions, vec!["s > a"]);
    }

    #[test]
    fn fourier_gaussian() {
        let out = run(TransformKind::Fourier, "exp(-x^2)", "x", "k").unwrap();
        assert_eq!(out.value, e("sqrt(pi)*exp(-pi^2*k^2)"));
        assert!(out.conditions.is_empty());

        let out = run(TransformKind::Fourier, "exp(-a*x^2)", "x", "k").unwrap();
        assert_eq!(out.conditions, vec!["a > 0"]);
    }

    #[test]
    fn fourier_two_sided_exponential() {
        let out = run(TransformKind::Fourier, "exp(-abs(x))", "x", "k").unwrap();
        assert_eq!(out.value, e("2/(1 + 4*pi^2*k^2)"));
    }

    #[test]
    fn fourier_growing_gaussian_diverges() {
        let err = run(TransformKind::Fourier, "exp(x^2)", "x", "k").unwrap_err();
        assert!(matches!(err, EngineFailure::Domain(_)));
    }

    #[test]
    fn mellin_table() {
        let out = run(TransformKind::Mellin, "exp(-x)", "x", "s").unwrap();
        assert_eq!(out.value, e("gamma(s)"));
        assert_eq!(out.conditions, vec!["s > 0"]);

        let out = run(TransformKind::Mellin, "1/(1+x)", "x", "s").unwrap();
        assert_eq!(out.value, e("pi/sin(pi*s)"));
        assert_eq!(out.conditions, vec!["0 < s < 1"]);
    }

    #[test]
    fn unknown_forms_are_unsupported() {
        let err = run(TransformKind::Fourier, "x", "x", "k").unwrap_err();
        assert!(matches!(err, EngineFailure::Unsupported(_)));
        let err = run(TransformKind::Laplace, "tan(t)", "t", "s").unwrap_err();
        assert!(matches!(err, EngineFailure::Unsupported(_)));
    }

    #[test]
    fn output_variable_must_be_fresh() {
        let err = run(TransformKind::Laplace, "s*t", "t", "s").unwrap_err();
        assert!(matches!(err, EngineFailure::Domain(_)));
    }
}
