//! Derivatives, antiderivatives and definite integrals.
//!
//! Integration tries, in order: linearity and constant factors, a table
//! of elementary forms with linear arguments, integration by parts for
//! polynomial times transcendental products, substitution `u = g(x)`
//! when `g'(x)` divides the integrand, partial fractions over rational
//! roots, and finally expansion. Definite integrals evaluate the
//! antiderivative at the bounds; infinite bounds go through an asymptotic
//! growth analysis.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use num_rational::BigRational;
use num_traits::{One, Signed, Zero};

use crate::engine::{Budget, EngineFailure, EngineResult};

use super::expr::{Constant, Expr, Func};
use super::poly::{self, Poly};

/// Recursion limit for nested integration strategies.
const MAX_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Derivatives
// ---------------------------------------------------------------------------

pub fn derivative(e: &Expr, x: &str) -> EngineResult<Expr> {
    if e.is_free_of(x) {
        return Ok(Expr::zero());
    }
    Ok(match e {
        Expr::Num(_) | Expr::Const(_) => Expr::zero(),
        Expr::Sym(_) => Expr::one(),
        Expr::Add(ts) => Expr::sum(
            ts.iter()
                .map(|t| derivative(t, x))
                .collect::<EngineResult<Vec<_>>>()?,
        ),
        Expr::Mul(fs) => {
            let mut terms = Vec::with_capacity(fs.len());
            for (i, f) in fs.iter().enumerate() {
                let df = derivative(f, x)?;
                if df.is_zero() {
                    continue;
                }
                let mut parts: Vec<Expr> = fs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, g)| g.clone())
                    .collect();
                parts.push(df);
                terms.push(Expr::product(parts));
            }
            Expr::sum(terms)
        }
        Expr::Pow(b, n) if n.is_free_of(x) => {
            let (b, n) = (&**b, &**n);
            n.clone() * Expr::pow(b.clone(), n.clone() - Expr::one()) * derivative(b, x)?
        }
        Expr::Pow(b, n) => {
            // d(b^n) = b^n * (n' log(b) + n b'/b)
            let (b, n) = (&**b, &**n);
            let log_part = derivative(n, x)? * Expr::func(Func::Log, b.clone());
            let base_part = n.clone() * derivative(b, x)? / b.clone();
            e.clone() * (log_part + base_part)
        }
        Expr::Func(f, a) => outer_derivative(*f, a)? * derivative(a, x)?,
    })
}

/// `f'(a)`.
fn outer_derivative(f: Func, a: &Expr) -> EngineResult<Expr> {
    let a = a.clone();
    let one = Expr::one;
    let square = |e: &Expr| Expr::pow(e.clone(), Expr::int(2));
    let inv_sqrt = |e: Expr| Expr::pow(e, Expr::frac(-1, 2));
    Ok(match f {
        Func::Sin => Expr::func(Func::Cos, a),
        Func::Cos => -Expr::func(Func::Sin, a),
        Func::Tan => one() + square(&Expr::func(Func::Tan, a)),
        Func::Cot => -(one() + square(&Expr::func(Func::Cot, a))),
        Func::Sec => Expr::func(Func::Sec, a.clone()) * Expr::func(Func::Tan, a),
        Func::Csc => -(Expr::func(Func::Csc, a.clone()) * Expr::func(Func::Cot, a)),
        Func::Asin => inv_sqrt(one() - square(&a)),
        Func::Acos => -inv_sqrt(one() - square(&a)),
        Func::Atan => (one() + square(&a)).recip(),
        Func::Acot => -(one() + square(&a)).recip(),
        Func::Asec => (square(&a) * (one() - square(&a).recip()).sqrt()).recip(),
        Func::Acsc => -(square(&a) * (one() - square(&a).recip()).sqrt()).recip(),
        Func::Sinh => Expr::func(Func::Cosh, a),
        Func::Cosh => Expr::func(Func::Sinh, a),
        Func::Tanh => one() - square(&Expr::func(Func::Tanh, a)),
        Func::Exp => Expr::func(Func::Exp, a),
        Func::Log => a.recip(),
        Func::Abs => a.clone() / Expr::func(Func::Abs, a),
        Func::Erf => {
            Expr::int(2) * Expr::func(Func::Exp, -square(&a)) / Expr::pi().sqrt()
        }
        Func::Erfc => {
            Expr::int(-2) * Expr::func(Func::Exp, -square(&a)) / Expr::pi().sqrt()
        }
        Func::Gamma => {
            return Err(EngineFailure::Unsupported(
                "the derivative of gamma needs the digamma function".into(),
            ));
        }
    })
}

pub fn nth_derivative(e: &Expr, x: &str, order: u32, budget: &Budget) -> EngineResult<Expr> {
    let mut current = e.clone();
    for _ in 0..order {
        budget.check()?;
        current = derivative(&current, x)?;
        if current.is_zero() {
            break;
        }
    }
    Ok(current)
}

/// `dy/dx` for the curve `F(x, y) = 0`.
pub fn implicit_derivative(f: &Expr, dependent: &str, independent: &str) -> EngineResult<Expr> {
    let fy = derivative(f, dependent)?;
    if fy.is_zero() {
        return Err(EngineFailure::Domain(format!(
            "the equation does not depend on {dependent}, so d{dependent}/d{independent} is undefined"
        )));
    }
    let fx = derivative(f, independent)?;
    Ok(-(fx / fy))
}

/// `d/dt` of `e` where every other free symbol `v` is a function of `t`.
/// The unknown rate of `v` is the symbol `(dv/dt)`.
pub fn total_derivative(e: &Expr, t: &str) -> EngineResult<Expr> {
    let mut terms = vec![derivative(e, t)?];
    for v in e.free_symbols() {
        if v == t {
            continue;
        }
        let partial = derivative(e, &v)?;
        if !partial.is_zero() {
            terms.push(Expr::product([partial, rate(&v, t)]));
        }
    }
    Ok(Expr::sum(terms))
}

fn rate(v: &str, t: &str) -> Expr {
    Expr::sym(format!("(d{v}/d{t})"))
}

// ---------------------------------------------------------------------------
// Antiderivatives
// ---------------------------------------------------------------------------

pub fn antiderivative(e: &Expr, x: &str, budget: &Budget) -> EngineResult<Expr> {
    integrate(e, x, budget, 0)?.ok_or_else(|| {
        EngineFailure::Unsupported(format!(
            "no closed form found for the integral of {e} with respect to {x}"
        ))
    })
}

fn integrate(e: &Expr, x: &str, budget: &Budget, depth: usize) -> EngineResult<Option<Expr>> {
    budget.check()?;
    if depth > MAX_DEPTH {
        return Ok(None);
    }
    if e.is_free_of(x) {
        return Ok(Some(e.clone() * Expr::sym(x)));
    }
    if let Expr::Add(terms) = e {
        let mut parts = Vec::with_capacity(terms.len());
        for t in terms {
            match integrate(t, x, budget, depth)? {
                Some(p) => parts.push(p),
                None => return Ok(None),
            }
        }
        return Ok(Some(Expr::sum(parts)));
    }
    let (constant, dependent) = split_constant(e, x);
    if !constant.is_one() {
        return Ok(integrate(&dependent, x, budget, depth)?.map(|r| constant * r));
    }

    if let Some(r) = table(e, x) {
        return Ok(Some(r));
    }
    if let Some(r) = by_parts(e, x, budget, depth)? {
        return Ok(Some(r));
    }
    if let Some(r) = substitution(e, x, budget, depth)? {
        return Ok(Some(r));
    }
    if let Some(r) = partial_fractions(e, x, budget)? {
        return Ok(Some(r));
    }
    let Some(expanded) = recoverable(poly::expand(e, budget))? else {
        return Ok(None);
    };
    if expanded != *e {
        return integrate(&expanded, x, budget, depth + 1);
    }
    Ok(None)
}

/// Keep timeouts and cancellation, treat other failures as "no result".
fn recoverable(result: EngineResult<Expr>) -> EngineResult<Option<Expr>> {
    match result {
        Ok(e) => Ok(Some(e)),
        Err(failure @ (EngineFailure::Timeout | EngineFailure::Cancelled)) => Err(failure),
        Err(_) => Ok(None),
    }
}

/// Factors free of `x`, and the rest.
pub(super) fn split_constant(e: &Expr, x: &str) -> (Expr, Expr) {
    let (free, dependent): (Vec<Expr>, Vec<Expr>) =
        e.factors().into_iter().partition(|f| f.is_free_of(x));
    (Expr::product(free), Expr::product(dependent))
}

/// `a` when `u = a*x + c` with `a` free of `x` and nonzero.
pub(super) fn slope(u: &Expr, x: &str) -> Option<Expr> {
    let d = derivative(u, x).ok()?;
    (!d.is_zero() && d.is_free_of(x)).then_some(d)
}

/// `(c0, c1, c2)` when `u = c0 + c1*x + c2*x^2` with numeric coefficients.
fn quadratic(u: &Expr, x: &str) -> Option<(BigRational, BigRational, BigRational)> {
    let p = Poly::from_expr(u, x)?;
    if p.degree() != Some(2) {
        return None;
    }
    let c = p.coeffs();
    Some((c[0].clone(), c[1].clone(), c[2].clone()))
}

fn is_minus_one(e: &Expr) -> bool {
    e.as_num().is_some_and(|n| *n == -BigRational::one())
}

/// Elementary forms with linear or simple quadratic arguments.
fn table(e: &Expr, x: &str) -> Option<Expr> {
    let xs = Expr::sym(x);
    match e {
        Expr::Sym(_) => Some(Expr::pow(xs, Expr::int(2)) / Expr::int(2)),
        Expr::Pow(b, n) if n.is_free_of(x) => {
            if let Some(a) = slope(b, x) {
                return Some(if is_minus_one(n) {
                    Expr::func(Func::Log, (**b).clone()) / a
                } else {
                    let raised = (**n).clone() + Expr::one();
                    Expr::pow((**b).clone(), raised.clone()) / (raised * a)
                });
            }
            let (c0, c1, c2) = quadratic(b, x)?;
            if !c1.is_zero() || !c0.is_positive() {
                return None;
            }
            let half = BigRational::new(1.into(), 2.into());
            match n.as_num() {
                Some(v) if *v == -BigRational::one() && c2.is_positive() => {
                    let scale = Expr::Num(&c2 / &c0).sqrt();
                    Some(Expr::func(Func::Atan, scale * xs) / Expr::Num(&c0 * &c2).sqrt())
                }
                Some(v) if *v == -&half && c2.is_negative() => {
                    let scale = Expr::Num(-&c2 / &c0).sqrt();
                    Some(Expr::func(Func::Asin, scale * xs) / Expr::Num(-c2).sqrt())
                }
                _ => None,
            }
        }
        Expr::Pow(b, u) if b.is_free_of(x) => {
            let a = slope(u, x)?;
            Some(e.clone() / (a * Expr::func(Func::Log, (**b).clone())))
        }
        Expr::Func(Func::Exp, u) => {
            if let Some(a) = slope(u, x) {
                return Some(e.clone() / a);
            }
            // Gaussian: exp(c0 - k*x^2) with k > 0.
            let (c0, c1, c2) = quadratic(u, x)?;
            if !c1.is_zero() || !c2.is_negative() {
                return None;
            }
            let root_k = Expr::Num(-c2).sqrt();
            let erf = Expr::func(Func::Erf, root_k.clone() * xs);
            Some(Expr::func(Func::Exp, Expr::Num(c0)) * Expr::pi().sqrt() * erf / (Expr::int(2) * root_k))
        }
        Expr::Func(f, u) => {
            let a = slope(u, x)?;
            Some(integrate_function(*f, u)? / a)
        }
        _ => None,
    }
}

/// Antiderivative of `f(u)` with respect to `u`.
fn integrate_function(f: Func, u: &Expr) -> Option<Expr> {
    let u = u.clone();
    let func = |g: Func, arg: Expr| Expr::func(g, arg);
    let square = |e: &Expr| Expr::pow(e.clone(), Expr::int(2));
    Some(match f {
        Func::Sin => -func(Func::Cos, u),
        Func::Cos => func(Func::Sin, u),
        Func::Tan => -func(Func::Log, func(Func::Cos, u)),
        Func::Cot => func(Func::Log, func(Func::Sin, u)),
        Func::Sec => func(Func::Log, func(Func::Tan, u.clone()) + func(Func::Sec, u)),
        Func::Csc => -func(Func::Log, func(Func::Cot, u.clone()) + func(Func::Csc, u)),
        Func::Sinh => func(Func::Cosh, u),
        Func::Cosh => func(Func::Sinh, u),
        Func::Tanh => func(Func::Log, func(Func::Cosh, u)),
        Func::Exp => func(Func::Exp, u),
        Func::Log => u.clone() * func(Func::Log, u.clone()) - u,
        Func::Atan => {
            u.clone() * func(Func::Atan, u.clone())
                - func(Func::Log, square(&u) + Expr::one()) / Expr::int(2)
        }
        Func::Asin => u.clone() * func(Func::Asin, u.clone()) + (Expr::one() - square(&u)).sqrt(),
        Func::Acos => u.clone() * func(Func::Acos, u.clone()) - (Expr::one() - square(&u)).sqrt(),
        Func::Erf => {
            u.clone() * func(Func::Erf, u.clone())
                + func(Func::Exp, -square(&u)) / Expr::pi().sqrt()
        }
        _ => return None,
    })
}

/// `n` when `p = x^n`.
fn power_of(p: &Expr, x: &str) -> Option<BigRational> {
    match p {
        Expr::Sym(s) if s == x => Some(BigRational::one()),
        Expr::Pow(b, n) if matches!(&**b, Expr::Sym(s) if s == x) => n.as_num().cloned(),
        _ => None,
    }
}

fn is_transcendental(g: &Expr, x: &str) -> bool {
    match g {
        Expr::Func(Func::Exp | Func::Sin | Func::Cos | Func::Sinh | Func::Cosh, _) => true,
        Expr::Pow(b, _) => b.is_free_of(x),
        _ => false,
    }
}

fn by_parts(e: &Expr, x: &str, budget: &Budget, depth: usize) -> EngineResult<Option<Expr>> {
    let Expr::Mul(fs) = e else {
        return Ok(None);
    };
    let [first, second] = fs.as_slice() else {
        return Ok(None);
    };
    if let Some(r) = exp_trig(first, second, x).or_else(|| exp_trig(second, first, x)) {
        return Ok(Some(r));
    }
    for (p, g) in [(first, second), (second, first)] {
        let Some(n) = power_of(p, x) else { continue };
        if let Expr::Func(Func::Log, arg) = g {
            if matches!(&**arg, Expr::Sym(s) if s == x) && n != -BigRational::one() {
                // x^n log(x) = x^(n+1) log(x)/(n+1) - x^(n+1)/(n+1)^2
                let m = Expr::Num(n + BigRational::one());
                let raised = Expr::pow(Expr::sym(x), m.clone());
                return Ok(Some(
                    raised.clone() * g.clone() / m.clone()
                        - raised / Expr::pow(m, Expr::int(2)),
                ));
            }
        }
        if !(n.is_integer() && n.is_positive()) || !is_transcendental(g, x) {
            continue;
        }
        let Some(v) = table(g, x) else { continue };
        let du = Expr::Num(n.clone()) * Expr::pow(Expr::sym(x), Expr::Num(n - BigRational::one()));
        let rest = integrate(&(du * v.clone()), x, budget, depth + 1)?;
        return Ok(rest.map(|r| p.clone() * v - r));
    }
    Ok(None)
}

/// `exp(u) * sin(v)` or `exp(u) * cos(v)` with linear `u`, `v`.
fn exp_trig(a: &Expr, b: &Expr, x: &str) -> Option<Expr> {
    let Expr::Func(Func::Exp, u) = a else {
        return None;
    };
    let Expr::Func(trig @ (Func::Sin | Func::Cos), v) = b else {
        return None;
    };
    let p = slope(u, x)?;
    let q = slope(v, x)?;
    let sin = Expr::func(Func::Sin, (**v).clone());
    let cos = Expr::func(Func::Cos, (**v).clone());
    let numer = match trig {
        Func::Sin => p.clone() * sin - q.clone() * cos,
        _ => p.clone() * cos + q.clone() * sin,
    };
    let denom = Expr::pow(p, Expr::int(2)) + Expr::pow(q, Expr::int(2));
    Some(a.clone() * numer / denom)
}

fn collect_inner(f: &Expr, out: &mut Vec<Expr>) {
    match f {
        Expr::Func(_, u) => {
            out.push(f.clone());
            out.push((**u).clone());
        }
        Expr::Pow(b, _) => {
            out.push((**b).clone());
            if let Expr::Func(_, u) = &**b {
                out.push((**u).clone());
            }
        }
        _ => {}
    }
}

/// Structural replacement of a subexpression.
fn replace(e: &Expr, target: &Expr, with: &Expr) -> Expr {
    if e == target {
        return with.clone();
    }
    match e {
        Expr::Add(xs) => Expr::sum(xs.iter().map(|t| replace(t, target, with))),
        Expr::Mul(xs) => Expr::product(xs.iter().map(|t| replace(t, target, with))),
        Expr::Pow(b, n) => Expr::pow(replace(b, target, with), replace(n, target, with)),
        Expr::Func(f, a) => Expr::func(*f, replace(a, target, with)),
        leaf => leaf.clone(),
    }
}

/// `u = t(x)` when `t'(x)` divides the integrand.
fn substitution(e: &Expr, x: &str, budget: &Budget, depth: usize) -> EngineResult<Option<Expr>> {
    let mut candidates = Vec::new();
    for f in e.factors() {
        collect_inner(&f, &mut candidates);
    }
    let fresh = format!("#u{depth}");
    let placeholder = Expr::sym(fresh.as_str());
    let mut tried = Vec::new();
    for t in candidates {
        if matches!(t, Expr::Sym(_)) || t.is_free_of(x) || tried.contains(&t) {
            continue;
        }
        tried.push(t.clone());
        let Ok(dt) = derivative(&t, x) else { continue };
        if dt.is_zero() {
            continue;
        }
        let mut quotient = e.clone() / dt;
        if !replace(&quotient, &t, &placeholder).is_free_of(x) {
            match recoverable(poly::cancel(&quotient, budget))? {
                Some(cancelled) => quotient = cancelled,
                None => continue,
            }
        }
        let replaced = replace(&quotient, &t, &placeholder);
        if !replaced.is_free_of(x) {
            continue;
        }
        if let Some(g) = integrate(&replaced, &fresh, budget, depth + 1)? {
            return Ok(Some(g.substitute_one(&fresh, &t)));
        }
    }
    Ok(None)
}

/// Rational functions whose denominator splits into distinct rational
/// linear factors.
fn partial_fractions(e: &Expr, x: &str, budget: &Budget) -> EngineResult<Option<Expr>> {
    let (numer, denom) = poly::together(e);
    if denom.is_one() {
        return Ok(None);
    }
    let (Some(numer), Some(denom)) = (
        recoverable(poly::expand(&numer, budget))?,
        recoverable(poly::expand(&denom, budget))?,
    ) else {
        return Ok(None);
    };
    let (Some(pn), Some(pd)) = (Poly::from_expr(&numer, x), Poly::from_expr(&denom, x)) else {
        return Ok(None);
    };
    let (quot, rem) = pn.div_rem(&pd);
    let (linear, rest) = poly::split_rational_roots(pd.clone(), budget)?;
    if rest.degree() != Some(0) {
        return Ok(None);
    }
    let mut roots: Vec<BigRational> = linear.iter().filter_map(Poly::linear_root).collect();
    let count = roots.len();
    roots.sort();
    roots.dedup();
    if roots.len() != count {
        return Ok(None);
    }
    let slope_at = pd.derivative();
    let xs = Expr::sym(x);
    let mut terms = vec![integrate_polynomial(&quot, x)];
    for r in roots {
        let residue = rem.eval(&r) / slope_at.eval(&r);
        terms.push(Expr::Num(residue) * Expr::func(Func::Log, xs.clone() - Expr::Num(r)));
    }
    Ok(Some(Expr::sum(terms)))
}

fn integrate_polynomial(p: &Poly, x: &str) -> Expr {
    Expr::sum(p.coeffs().iter().enumerate().map(|(i, c)| {
        let m = i as i64 + 1;
        Expr::Num(c.clone()) * Expr::pow(Expr::sym(x), Expr::int(m)) / Expr::int(m)
    }))
}

// ---------------------------------------------------------------------------
// Definite integrals
// ---------------------------------------------------------------------------

/// Value of a bound or limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Limit {
    Finite(Expr),
    PosInfinity,
    NegInfinity,
}

fn not_convergent() -> EngineFailure {
    EngineFailure::Domain("the integral does not converge".into())
}

fn is_infinity(e: &Expr) -> bool {
    matches!(e, Expr::Const(Constant::Infinity))
}

fn is_neg_infinity(e: &Expr) -> bool {
    matches!(e, Expr::Mul(fs) if fs.len() == 2 && is_minus_one(&fs[0]) && is_infinity(&fs[1]))
}

fn bound_f64(e: &Expr) -> Option<f64> {
    if is_infinity(e) {
        Some(f64::INFINITY)
    } else if is_neg_infinity(e) {
        Some(f64::NEG_INFINITY)
    } else {
        e.eval_f64()
    }
}

pub fn definite_integral(
    e: &Expr,
    x: &str,
    lower: &Expr,
    upper: &Expr,
    budget: &Budget,
) -> EngineResult<Expr> {
    if lower == upper {
        return Ok(Expr::zero());
    }
    check_poles(e, x, lower, upper, budget)?;
    let anti = antiderivative(e, x, budget)?;
    budget.check()?;
    let hi = endpoint(&anti, x, upper)?;
    let lo = endpoint(&anti, x, lower)?;
    let infinity = Expr::Const(Constant::Infinity);
    match (hi, lo) {
        (Limit::Finite(h), Limit::Finite(l)) => Ok(h - l),
        (Limit::PosInfinity, Limit::Finite(_) | Limit::NegInfinity)
        | (Limit::Finite(_), Limit::NegInfinity) => Ok(infinity),
        (Limit::NegInfinity, Limit::Finite(_) | Limit::PosInfinity)
        | (Limit::Finite(_), Limit::PosInfinity) => Ok(-infinity),
        _ => Err(not_convergent()),
    }
}

fn endpoint(anti: &Expr, x: &str, at: &Expr) -> EngineResult<Limit> {
    if is_infinity(at) {
        return limit_at_infinity(anti, x, true);
    }
    if is_neg_infinity(at) {
        return limit_at_infinity(anti, x, false);
    }
    let value = anti.substitute_one(x, at);
    if value.singularity().is_some() {
        return Err(not_convergent());
    }
    Ok(Limit::Finite(value))
}

/// Reject integrands with a non-integrable pole inside `[lower, upper]`.
fn check_poles(e: &Expr, x: &str, lower: &Expr, upper: &Expr, budget: &Budget) -> EngineResult<()> {
    let (Some(a), Some(b)) = (bound_f64(lower), bound_f64(upper)) else {
        return Ok(());
    };
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut bases = Vec::new();
    collect_pole_bases(e, x, &mut bases);
    for base in bases {
        let Some(p) = Poly::from_expr(&poly::expand(&base, budget)?, x) else {
            continue;
        };
        let (linear, _) = poly::split_rational_roots(p, budget)?;
        for root in linear.iter().filter_map(Poly::linear_root) {
            let r = Expr::Num(root.clone()).eval_f64().unwrap_or(f64::NAN);
            if lo <= r && r <= hi {
                return Err(EngineFailure::Domain(format!(
                    "the integrand is undefined at {x} = {} inside the interval",
                    Expr::Num(root)
                )));
            }
        }
    }
    Ok(())
}

fn collect_pole_bases(e: &Expr, x: &str, out: &mut Vec<Expr>) {
    match e {
        Expr::Pow(b, n) => {
            let non_integrable = n.as_num().is_some_and(|v| *v <= -BigRational::one());
            if non_integrable && b.contains_sym(x) {
                out.push((**b).clone());
            }
            collect_pole_bases(b, x, out);
        }
        Expr::Add(xs) | Expr::Mul(xs) => xs.iter().for_each(|t| collect_pole_bases(t, x, out)),
        Expr::Func(_, a) => collect_pole_bases(a, x, out),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Asymptotics at infinity
// ---------------------------------------------------------------------------

/// `coeff * x^power * log(x)^logs * exp(sum c_k x^k)` as `x -> +oo`.
#[derive(Debug, Clone)]
struct Asymptotic {
    coeff: Expr,
    power: BigRational,
    logs: BigRational,
    exp: BTreeMap<BigRational, Expr>,
}

impl Asymptotic {
    fn constant(coeff: Expr) -> Self {
        Self {
            coeff,
            power: BigRational::zero(),
            logs: BigRational::zero(),
            exp: BTreeMap::new(),
        }
    }

    fn power_of_x(power: BigRational) -> Self {
        Self {
            power,
            ..Self::constant(Expr::one())
        }
    }

    fn times(mut self, other: Asymptotic) -> Self {
        self.coeff = self.coeff * other.coeff;
        self.power += other.power;
        self.logs += other.logs;
        for (k, c) in other.exp {
            let entry = self.exp.entry(k).or_insert_with(Expr::zero);
            *entry = entry.clone() + c;
        }
        self.exp.retain(|_, c| !c.is_zero());
        self
    }

    fn raised(mut self, n: &BigRational) -> Self {
        self.coeff = Expr::pow(self.coeff, Expr::Num(n.clone()));
        self.power *= n;
        self.logs *= n;
        for c in self.exp.values_mut() {
            *c = c.clone() * Expr::Num(n.clone());
        }
        self
    }

    fn growth_cmp(&self, other: &Asymptotic) -> EngineResult<Ordering> {
        let mut diff = self.exp.clone();
        for (k, c) in &other.exp {
            let entry = diff.entry(k.clone()).or_insert_with(Expr::zero);
            *entry = entry.clone() - c.clone();
        }
        for c in diff.values().rev() {
            match sign(c)? {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(self
            .power
            .cmp(&other.power)
            .then_with(|| self.logs.cmp(&other.logs)))
    }

    fn limit(&self) -> EngineResult<Limit> {
        let infinite = |coeff: &Expr| -> EngineResult<Limit> {
            Ok(match sign(coeff)? {
                Ordering::Less => Limit::NegInfinity,
                Ordering::Greater => Limit::PosInfinity,
                Ordering::Equal => Limit::Finite(Expr::zero()),
            })
        };
        if let Some(c) = self.exp.values().rev().find(|c| !c.is_zero()) {
            return match sign(c)? {
                Ordering::Less => Ok(Limit::Finite(Expr::zero())),
                _ => infinite(&self.coeff),
            };
        }
        let zero = BigRational::zero();
        match (self.power.cmp(&zero), self.logs.cmp(&zero)) {
            (Ordering::Greater, _) | (Ordering::Equal, Ordering::Greater) => infinite(&self.coeff),
            (Ordering::Less, _) | (Ordering::Equal, Ordering::Less) => Ok(Limit::Finite(Expr::zero())),
            (Ordering::Equal, Ordering::Equal) => Ok(Limit::Finite(self.coeff.clone())),
        }
    }
}

fn sign(e: &Expr) -> EngineResult<Ordering> {
    let v = e.eval_f64().ok_or_else(|| {
        EngineFailure::Unsupported(format!("cannot determine the sign of {e}"))
    })?;
    Ok(v.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
}

fn no_limit(e: &Expr) -> EngineFailure {
    EngineFailure::Unsupported(format!("cannot evaluate the limit of {e} at infinity"))
}

pub fn limit_at_infinity(e: &Expr, x: &str, positive: bool) -> EngineResult<Limit> {
    let e = if positive {
        e.clone()
    } else {
        e.substitute_one(x, &-Expr::sym(x))
    };
    asymptotic(&e, x)?.limit()
}

fn limit_of(e: &Expr, x: &str) -> EngineResult<Limit> {
    asymptotic(e, x)?.limit()
}

fn asymptotic(e: &Expr, x: &str) -> EngineResult<Asymptotic> {
    if e.is_free_of(x) {
        return Ok(Asymptotic::constant(e.clone()));
    }
    match e {
        Expr::Sym(_) => Ok(Asymptotic::power_of_x(BigRational::one())),
        Expr::Mul(fs) => fs.iter().try_fold(Asymptotic::constant(Expr::one()), |acc, f| {
            Ok(acc.times(asymptotic(f, x)?))
        }),
        Expr::Add(ts) => dominant(ts, x),
        Expr::Pow(b, n) => match n.as_num() {
            Some(n) => Ok(asymptotic(b, x)?.raised(n)),
            None => {
                let rewritten = Expr::func(
                    Func::Exp,
                    (**n).clone() * Expr::func(Func::Log, (**b).clone()),
                );
                asymptotic(&rewritten, x)
            }
        },
        Expr::Func(Func::Exp, u) => exp_asymptotic(u, x),
        Expr::Func(Func::Log, u) => log_asymptotic(u, x),
        Expr::Func(f @ (Func::Sinh | Func::Cosh), u) => {
            let plus = Expr::func(Func::Exp, (**u).clone());
            let minus = Expr::func(Func::Exp, -(**u).clone());
            let sum = if *f == Func::Sinh { plus - minus } else { plus + minus };
            asymptotic(&(sum / Expr::int(2)), x)
        }
        Expr::Func(Func::Abs, u) => {
            let mut a = asymptotic(u, x)?;
            a.coeff = Expr::func(Func::Abs, a.coeff);
            Ok(a)
        }
        Expr::Func(f, u) => saturating(*f, u, x, e),
        Expr::Num(_) | Expr::Const(_) => Ok(Asymptotic::constant(e.clone())),
    }
}

/// Functions with finite limits at infinite arguments, or continuous at
/// finite ones.
fn saturating(f: Func, u: &Expr, x: &str, whole: &Expr) -> EngineResult<Asymptotic> {
    let half_pi = || Expr::pi() / Expr::int(2);
    let value = match (f, limit_of(u, x)?) {
        (Func::Atan, Limit::PosInfinity) => half_pi(),
        (Func::Atan, Limit::NegInfinity) => -half_pi(),
        (Func::Tanh | Func::Erf, Limit::PosInfinity) => Expr::one(),
        (Func::Tanh | Func::Erf, Limit::NegInfinity) => Expr::int(-1),
        (Func::Erfc, Limit::NegInfinity) => Expr::int(2),
        (Func::Erfc, Limit::PosInfinity) => {
            // erfc(u) ~ exp(-u^2) / (u sqrt(pi))
            let approx = Expr::func(Func::Exp, -Expr::pow(u.clone(), Expr::int(2)))
                / (u.clone() * Expr::pi().sqrt());
            return asymptotic(&approx, x);
        }
        (Func::Acot, Limit::PosInfinity | Limit::NegInfinity) => {
            return asymptotic(&u.clone().recip(), x);
        }
        (Func::Sin | Func::Cos | Func::Tan | Func::Cot | Func::Sec | Func::Csc, Limit::PosInfinity | Limit::NegInfinity) => {
            return Err(not_convergent());
        }
        (Func::Sin | Func::Tan | Func::Asin | Func::Atan | Func::Tanh | Func::Erf, Limit::Finite(l))
            if l.is_zero() =>
        {
            // f(u) ~ u near zero.
            return asymptotic(u, x);
        }
        (_, Limit::Finite(l)) => {
            let v = Expr::func(f, l);
            if v.singularity().is_some() {
                return Err(no_limit(whole));
            }
            v
        }
        _ => return Err(no_limit(whole)),
    };
    Ok(Asymptotic::constant(value))
}

fn exp_asymptotic(u: &Expr, x: &str) -> EngineResult<Asymptotic> {
    let mut result = Asymptotic::constant(Expr::one());
    let mut finite = Vec::new();
    for term in u.terms() {
        let a = asymptotic(&term, x)?;
        if !a.exp.is_empty() {
            return Err(no_limit(u));
        }
        if a.logs.is_zero() && a.power.is_positive() {
            let entry = result.exp.entry(a.power).or_insert_with(Expr::zero);
            *entry = entry.clone() + a.coeff;
        } else if a.logs.is_one() && a.power.is_zero() {
            // exp(c log x) = x^c
            let Some(c) = a.coeff.as_num() else {
                return Err(no_limit(u));
            };
            result.power += c;
        } else {
            match a.limit()? {
                Limit::Finite(l) => finite.push(l),
                _ => return Err(no_limit(u)),
            }
        }
    }
    result.exp.retain(|_, c| !c.is_zero());
    result.coeff = Expr::func(Func::Exp, Expr::sum(finite));
    Ok(result)
}

fn log_asymptotic(u: &Expr, x: &str) -> EngineResult<Asymptotic> {
    let a = asymptotic(u, x)?;
    if let Some((k, c)) = a.exp.iter().next_back() {
        return Ok(Asymptotic {
            power: k.clone(),
            ..Asymptotic::constant(c.clone())
        });
    }
    if !a.power.is_zero() {
        return Ok(Asymptotic {
            logs: BigRational::one(),
            ..Asymptotic::constant(Expr::Num(a.power))
        });
    }
    if !a.logs.is_zero() {
        return Err(no_limit(u));
    }
    let value = Expr::func(Func::Log, a.coeff);
    if value.singularity().is_some() {
        return Err(no_limit(u));
    }
    Ok(Asymptotic::constant(value))
}

/// The fastest-growing terms of a sum, with equal-growth coefficients
/// combined.
fn dominant(terms: &[Expr], x: &str) -> EngineResult<Asymptotic> {
    let mut best: Option<Asymptotic> = None;
    for t in terms {
        let a = asymptotic(t, x)?;
        best = Some(match best {
            None => a,
            Some(current) => match a.growth_cmp(&current)? {
                Ordering::Greater => a,
                Ordering::Less => current,
                Ordering::Equal => {
                    let mut merged = current;
                    merged.coeff = merged.coeff + a.coeff;
                    if merged.coeff.is_zero() {
                        return Err(no_limit(&Expr::Add(terms.to_vec())));
                    }
                    merged
                }
            },
        });
    }
    best.ok_or_else(|| no_limit(&Expr::zero()))
}
