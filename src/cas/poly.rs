//! Expansion, factoring and rational-function cancellation.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::engine::{Budget, EngineFailure, EngineResult};

use super::expr::Expr;

/// Largest number of terms an expansion may produce.
const MAX_TERMS: usize = 2_000;

/// Largest degree held as a dense coefficient vector.
const MAX_POLY_DEGREE: usize = 10_000;

/// Constant terms above this are not searched for rational roots.
const MAX_ROOT_SEARCH: u64 = 1_000_000_000_000;

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Multiply out products and integer powers of sums, recursively.
pub fn expand(e: &Expr, budget: &Budget) -> EngineResult<Expr> {
    budget.check()?;
    Ok(match e {
        Expr::Add(ts) => Expr::sum(
            ts.iter()
                .map(|t| expand(t, budget))
                .collect::<EngineResult<Vec<_>>>()?,
        ),
        Expr::Mul(fs) => {
            let mut acc = Expr::one();
            for f in fs {
                acc = distribute(&acc, &expand(f, budget)?, budget)?;
            }
            acc
        }
        Expr::Pow(b, x) => {
            let base = expand(b, budget)?;
            let exp = expand(x, budget)?;
            match (exp.as_num().and_then(machine_integer), &base) {
                (Some(n), Expr::Add(_)) if n != 0 => {
                    // A sum to the n-th power has at least n + 1 terms.
                    if n.unsigned_abs() >= MAX_TERMS as u64 {
                        return Err(EngineFailure::ResourceExhausted(format!(
                            "expansion exceeds {MAX_TERMS} terms"
                        )));
                    }
                    let mut acc = Expr::one();
                    for _ in 0..n.unsigned_abs() {
                        acc = distribute(&acc, &base, budget)?;
                    }
                    if n < 0 { acc.recip() } else { acc }
                }
                _ => Expr::pow(base, exp),
            }
        }
        Expr::Func(f, a) => Expr::func(*f, expand(a, budget)?),
        other => other.clone(),
    })
}

fn machine_integer(n: &BigRational) -> Option<i64> {
    if !n.is_integer() {
        return None;
    }
    n.to_integer().to_i64()
}

fn distribute(a: &Expr, b: &Expr, budget: &Budget) -> EngineResult<Expr> {
    let (ta, tb) = (a.terms(), b.terms());
    if ta.len().saturating_mul(tb.len()) > MAX_TERMS {
        return Err(EngineFailure::ResourceExhausted(format!(
            "expansion exceeds {MAX_TERMS} terms"
        )));
    }
    budget.check()?;
    Ok(Expr::sum(ta.iter().flat_map(|x| {
        tb.iter()
            .map(move |y| Expr::product([x.clone(), y.clone()]))
    })))
}

// ---------------------------------------------------------------------------
// Univariate polynomials over Q
// ---------------------------------------------------------------------------

/// Dense polynomial, lowest degree first, no trailing zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poly {
    coeffs: Vec<BigRational>,
}

impl Poly {
    pub fn new(mut coeffs: Vec<BigRational>) -> Self {
        while coeffs.last().is_some_and(Zero::is_zero) {
            coeffs.pop();
        }
        Self { coeffs }
    }

    pub fn zero() -> Self {
        Self { coeffs: Vec::new() }
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// `None` for the zero polynomial.
    pub fn degree(&self) -> Option<usize> {
        self.coeffs.len().checked_sub(1)
    }

    pub fn coeffs(&self) -> &[BigRational] {
        &self.coeffs
    }

    /// Read an expanded expression as a polynomial in `x` with numeric
    /// coefficients.
    pub fn from_expr(e: &Expr, x: &str) -> Option<Self> {
        let mut coeffs: Vec<BigRational> = Vec::new();
        for term in e.terms() {
            let (coeff, powers) = monomial(&term)?;
            let degree = match powers.len() {
                0 => 0,
                1 => *powers.get(x)? as usize,
                _ => return None,
            };
            if degree > MAX_POLY_DEGREE {
                return None;
            }
            if coeffs.len() <= degree {
                coeffs.resize(degree + 1, BigRational::zero());
            }
            coeffs[degree] += coeff;
        }
        Some(Self::new(coeffs))
    }

    pub fn to_expr(&self, x: &str) -> Expr {
        Expr::sum(self.coeffs.iter().enumerate().map(|(i, c)| {
            Expr::Num(c.clone()) * Expr::pow(Expr::sym(x), Expr::int(i as i64))
        }))
    }

    pub fn eval(&self, at: &BigRational) -> BigRational {
        self.coeffs
            .iter()
            .rev()
            .fold(BigRational::zero(), |acc, c| acc * at + c)
    }

    pub fn div_rem(&self, divisor: &Poly) -> (Poly, Poly) {
        let Some(dd) = divisor.degree() else {
            return (Poly::zero(), self.clone());
        };
        if self.coeffs.len() < divisor.coeffs.len() {
            return (Poly::zero(), self.clone());
        }
        let lead = &divisor.coeffs[dd];
        let mut rem = self.coeffs.clone();
        let mut quot = vec![BigRational::zero(); self.coeffs.len() - dd];
        for i in (0..quot.len()).rev() {
            let c = &rem[i + dd] / lead;
            for (j, dc) in divisor.coeffs.iter().enumerate() {
                rem[i + j] -= &c * dc;
            }
            quot[i] = c;
        }
        (Poly::new(quot), Poly::new(rem))
    }

    fn monic(self) -> Poly {
        match self.coeffs.last().cloned() {
            Some(lead) => Poly::new(self.coeffs.into_iter().map(|c| c / &lead).collect()),
            None => self,
        }
    }

    /// Monic greatest common divisor.
    pub fn gcd(a: &Poly, b: &Poly) -> Poly {
        let (mut a, mut b) = (a.clone(), b.clone());
        while !b.is_zero() {
            let (_, r) = a.div_rem(&b);
            a = b;
            b = r;
        }
        a.monic()
    }

    pub fn derivative(&self) -> Poly {
        Poly::new(
            self.coeffs
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, c)| c * BigRational::from_integer(BigInt::from(i)))
                .collect(),
        )
    }

    /// The root of a linear polynomial.
    pub fn linear_root(&self) -> Option<BigRational> {
        match self.coeffs.as_slice() {
            [c, a] => Some(-c / a),
            _ => None,
        }
    }

    /// Coefficients scaled to integers.
    fn integer_coefficients(&self) -> Vec<BigInt> {
        let scale = self
            .coeffs
            .iter()
            .fold(BigInt::one(), |acc, c| lcm(&acc, c.denom()));
        self.coeffs
            .iter()
            .map(|c| (c * BigRational::from_integer(scale.clone())).to_integer())
            .collect()
    }
}

/// Numeric coefficient and symbol exponents of a polynomial term.
fn monomial(term: &Expr) -> Option<(BigRational, BTreeMap<String, u32>)> {
    let mut coeff = BigRational::one();
    let mut powers = BTreeMap::new();
    for factor in term.factors() {
        match factor {
            Expr::Num(c) => coeff *= c,
            Expr::Sym(s) => *powers.entry(s).or_insert(0) += 1,
            Expr::Pow(b, e) => match (*b, e.as_num()) {
                (Expr::Sym(s), Some(n)) if n.is_integer() && !n.is_negative() => {
                    let slot = powers.entry(s).or_insert(0u32);
                    *slot = slot.checked_add(n.to_integer().to_u32()?)?;
                }
                _ => return None,
            },
            _ => return None,
        }
    }
    Some((coeff, powers))
}

fn gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let (mut a, mut b) = (a.abs(), b.abs());
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

fn lcm(a: &BigInt, b: &BigInt) -> BigInt {
    if a.is_zero() || b.is_zero() {
        return BigInt::zero();
    }
    (a / gcd(a, b)) * b
}

fn divisors(n: &BigInt) -> Option<Vec<BigInt>> {
    let n = n.abs().to_u64().filter(|n| *n <= MAX_ROOT_SEARCH)?;
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1u64;
    while d * d <= n {
        if n % d == 0 {
            small.push(BigInt::from(d));
            if d * d != n {
                large.push(BigInt::from(n / d));
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    Some(small)
}

/// Split off linear factors `q*x - p` for every rational root `p/q`.
pub(super) fn split_rational_roots(mut poly: Poly, budget: &Budget) -> EngineResult<(Vec<Poly>, Poly)> {
    let mut linear = Vec::new();
    while poly.degree().is_some_and(|d| d >= 1) {
        budget.check()?;
        let ints = poly.integer_coefficients();
        let root = if ints[0].is_zero() {
            Some(BigRational::zero())
        } else {
            let lead = ints.last().cloned().unwrap_or_else(BigInt::one);
            let (Some(ps), Some(qs)) = (divisors(&ints[0]), divisors(&lead)) else {
                break;
            };
            ps.iter()
                .flat_map(|p| qs.iter().map(move |q| BigRational::new(p.clone(), q.clone())))
                .flat_map(|r| [r.clone(), -r])
                .find(|r| poly.eval(r).is_zero())
        };
        let Some(root) = root else { break };
        let factor = Poly::new(vec![
            -BigRational::from_integer(root.numer().clone()),
            BigRational::from_integer(root.denom().clone()),
        ]);
        poly = poly.div_rem(&factor).0;
        linear.push(factor);
    }
    Ok((linear, poly))
}

// ---------------------------------------------------------------------------
// Factoring
// ---------------------------------------------------------------------------

/// Factor over the rationals: numeric content, common factors, and linear
/// factors of univariate or homogeneous bivariate polynomials.
pub fn factor(e: &Expr, budget: &Budget) -> EngineResult<Expr> {
    budget.check()?;
    match e {
        Expr::Mul(fs) => Ok(Expr::product(
            fs.iter()
                .map(|f| factor(f, budget))
                .collect::<EngineResult<Vec<_>>>()?,
        )),
        Expr::Pow(b, x) => Ok(Expr::pow(factor(b, budget)?, (**x).clone())),
        Expr::Add(_) => {
            let (numer, denom) = together(e);
            if !denom.is_one() {
                return Ok(factor(&expand(&numer, budget)?, budget)? / factor(&denom, budget)?);
            }
            factor_sum(&expand(e, budget)?, budget)
        }
        other => Ok(other.clone()),
    }
}

fn factor_sum(p: &Expr, budget: &Budget) -> EngineResult<Expr> {
    let terms = p.terms();
    if terms.len() < 2 {
        return Ok(p.clone());
    }
    let mut content = numeric_content(&terms);
    if p.leading_term().coefficient().is_negative() {
        content = -content;
    }
    let common = common_factor(&terms);
    let divisor = Expr::Num(content.clone()) * common.clone();
    let reduced = expand(&(p.clone() / divisor), budget)?;
    let core = factor_polynomial(&reduced, budget)?;
    Ok(Expr::product([Expr::Num(content), common, core]))
}

/// gcd of numerators over lcm of denominators.
fn numeric_content(terms: &[Expr]) -> BigRational {
    let (g, l) = terms.iter().fold((BigInt::zero(), BigInt::one()), |(g, l), t| {
        let c = t.coefficient();
        (gcd(&g, c.numer()), lcm(&l, c.denom()))
    });
    if g.is_zero() {
        BigRational::one()
    } else {
        BigRational::new(g, l)
    }
}

/// Product of every base that divides all terms, at its smallest exponent.
fn common_factor(terms: &[Expr]) -> Expr {
    let exponents = |t: &Expr| -> BTreeMap<Expr, BigRational> {
        let mut out = BTreeMap::new();
        for f in t.factors() {
            match f {
                Expr::Num(_) => {}
                Expr::Pow(b, e) => {
                    match e.as_num().filter(|n| n.is_positive()).cloned() {
                        Some(n) => out.insert(*b, n),
                        None => out.insert(Expr::Pow(b, e), BigRational::one()),
                    };
                }
                other => {
                    out.insert(other, BigRational::one());
                }
            }
        }
        out
    };
    let mut iter = terms.iter();
    let Some(first) = iter.next() else {
        return Expr::one();
    };
    let mut common = exponents(first);
    for t in iter {
        let here = exponents(t);
        common = common
            .into_iter()
            .filter_map(|(base, n)| {
                let m = here.get(&base)?;
                Some((base, if *m < n { m.clone() } else { n }))
            })
            .collect();
    }
    Expr::product(common.into_iter().map(|(b, n)| Expr::pow(b, Expr::Num(n))))
}

/// Dense factoring allocates per degree; refuse degrees it cannot hold.
fn check_degree(q: &Expr) -> EngineResult<()> {
    let highest = q
        .terms()
        .iter()
        .filter_map(monomial)
        .flat_map(|(_, powers)| powers.into_values())
        .max()
        .unwrap_or(0);
    if highest as usize > MAX_POLY_DEGREE {
        return Err(EngineFailure::ResourceExhausted(format!(
            "degree {highest} exceeds the polynomial limit of {MAX_POLY_DEGREE}"
        )));
    }
    Ok(())
}

fn factor_polynomial(q: &Expr, budget: &Budget) -> EngineResult<Expr> {
    check_degree(q)?;
    let vars: Vec<String> = q.free_symbols().into_iter().collect();
    match vars.as_slice() {
        [x] => {
            let Some(poly) = Poly::from_expr(q, x) else {
                return Ok(q.clone());
            };
            factor_univariate(poly, x, budget)
        }
        [x, y] => factor_homogeneous(q, x, y, budget),
        _ => Ok(q.clone()),
    }
}

fn factor_univariate(poly: Poly, x: &str, budget: &Budget) -> EngineResult<Expr> {
    if poly.degree().is_none_or(|d| d < 2) {
        return Ok(poly.to_expr(x));
    }
    let (linear, rest) = split_rational_roots(poly, budget)?;
    Ok(Expr::product(
        linear
            .iter()
            .chain(std::iter::once(&rest))
            .map(|p| p.to_expr(x)),
    ))
}

/// `p(x, y)` homogeneous of degree `d` factors like `p(x, 1)`.
fn factor_homogeneous(q: &Expr, x: &str, y: &str, budget: &Budget) -> EngineResult<Expr> {
    let mut total = None;
    let mut coeffs: Vec<BigRational> = Vec::new();
    for term in q.terms() {
        let Some((coeff, powers)) = monomial(&term) else {
            return Ok(q.clone());
        };
        let i = powers.get(x).copied().unwrap_or(0);
        let j = powers.get(y).copied().unwrap_or(0);
        let d = i + j;
        if *total.get_or_insert(d) != d {
            return Ok(q.clone());
        }
        let i = i as usize;
        if coeffs.len() <= i {
            coeffs.resize(i + 1, BigRational::zero());
        }
        coeffs[i] += coeff;
    }
    let Some(d) = total else {
        return Ok(q.clone());
    };
    let dehomogenized = Poly::new(coeffs);
    if dehomogenized.degree().is_none_or(|k| k < 2) {
        return Ok(q.clone());
    }
    let (linear, rest) = split_rational_roots(dehomogenized.clone(), budget)?;
    if linear.is_empty() {
        return Ok(q.clone());
    }
    let homogenize = |p: &Poly| {
        let k = p.degree().unwrap_or(0);
        Expr::sum(p.coeffs().iter().enumerate().map(|(i, c)| {
            Expr::Num(c.clone())
                * Expr::pow(Expr::sym(x), Expr::int(i as i64))
                * Expr::pow(Expr::sym(y), Expr::int((k - i) as i64))
        }))
    };
    let missing = d as usize - dehomogenized.degree().unwrap_or(0);
    Ok(Expr::product(
        linear
            .iter()
            .chain(std::iter::once(&rest))
            .map(homogenize)
            .chain(std::iter::once(Expr::pow(Expr::sym(y), Expr::int(missing as i64)))),
    ))
}

// ---------------------------------------------------------------------------
// Rational functions
// ---------------------------------------------------------------------------

/// Numerator and denominator over a common denominator. Only negative
/// numeric powers count as denominators.
pub fn together(e: &Expr) -> (Expr, Expr) {
    let split: Vec<(Expr, BTreeMap<Expr, BigRational>)> =
        e.terms().iter().map(split_fraction).collect();
    let mut common: BTreeMap<Expr, BigRational> = BTreeMap::new();
    for (_, den) in &split {
        for (base, n) in den {
            let entry = common.entry(base.clone()).or_insert_with(BigRational::zero);
            if n > entry {
                *entry = n.clone();
            }
        }
    }
    if common.is_empty() {
        return (e.clone(), Expr::one());
    }
    let denominator = Expr::product(
        common
            .iter()
            .map(|(b, n)| Expr::pow(b.clone(), Expr::Num(n.clone()))),
    );
    let numerator = Expr::sum(split.into_iter().map(|(num, den)| {
        let scale = Expr::product(common.iter().map(|(b, n)| {
            let have = den.get(b).cloned().unwrap_or_else(BigRational::zero);
            Expr::pow(b.clone(), Expr::Num(n - have))
        }));
        num * scale
    }));
    (numerator, denominator)
}

fn split_fraction(term: &Expr) -> (Expr, BTreeMap<Expr, BigRational>) {
    let mut numer = Vec::new();
    let mut denom: BTreeMap<Expr, BigRational> = BTreeMap::new();
    for f in term.factors() {
        match f {
            Expr::Pow(b, e) if e.as_num().is_some_and(|n| n.is_negative()) => {
                let n = e.as_num().map(|n| -n).unwrap_or_else(BigRational::one);
                *denom.entry(*b).or_insert_with(BigRational::zero) += n;
            }
            other => numer.push(other),
        }
    }
    (Expr::product(numer), denom)
}

/// Cancel common polynomial factors of a univariate rational function.
pub fn cancel(e: &Expr, budget: &Budget) -> EngineResult<Expr> {
    let (numer, denom) = together(e);
    if denom.is_one() {
        return Ok(e.clone());
    }
    let numer = expand(&numer, budget)?;
    let denom_expanded = expand(&denom, budget)?;
    let mut vars = numer.free_symbols();
    vars.extend(denom_expanded.free_symbols());
    let combined = || numer.clone() / denom.clone();
    let vars: Vec<String> = vars.into_iter().collect();
    let [x] = vars.as_slice() else {
        return Ok(combined());
    };
    let (Some(pn), Some(pd)) = (Poly::from_expr(&numer, x), Poly::from_expr(&denom_expanded, x))
    else {
        return Ok(combined());
    };
    let g = Poly::gcd(&pn, &pd);
    if g.degree().is_none_or(|d| d == 0) {
        return Ok(combined());
    }
    budget.check()?;
    let (qn, _) = pn.div_rem(&g);
    let (qd, _) = pd.div_rem(&g);
    Ok(qn.to_expr(x) / qd.to_expr(x))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::syntax::parse;

    fn e(text: &str) -> Expr {
        Expr::from_ast(&parse(text).unwrap()).unwrap()
    }

    fn budget() -> Budget {
        Budget::with_limit(Duration::from_secs(30))
    }

    #[test]
    fn expands_products_of_sums() {
        let out = expand(&e("(x+2)*(x+3)"), &budget()).unwrap();
        assert_eq!(out.to_string(), "x^2 + 5*x + 6");
        let out = expand(&e("(a+b)^3"), &budget()).unwrap();
        assert_eq!(out, e("a^3 + 3*a^2*b + 3*a*b^2 + b^3"));
    }

    #[test]
    fn expansion_has_a_term_limit() {
        let err = expand(&e("(a+b+c+d+f+g)^40"), &budget()).unwrap_err();
        assert!(matches!(err, EngineFailure::ResourceExhausted(_)));
    }

    #[test]
    fn large_integer_powers_expand_fully() {
        let out = expand(&e("(x+1)^65"), &budget()).unwrap();
        assert_eq!(out.terms().len(), 66);
        assert_eq!(out.to_string().split(" + ").next(), Some("x^65"));
    }

    #[test]
    fn huge_powers_hit_the_term_limit() {
        let err = expand(&e("(x+1)^4000000000"), &budget()).unwrap_err();
        assert!(matches!(err, EngineFailure::ResourceExhausted(_)));
    }

    #[test]
    fn huge_degrees_are_refused_before_allocating() {
        assert!(Poly::from_expr(&e("x^4000000000 - 1"), "x").is_none());
        let err = factor(&e("x^4000000000 - 1"), &budget()).unwrap_err();
        assert!(matches!(err, EngineFailure::ResourceExhausted(_)));
        let err = factor(&e("x^4000000000*y - y^4000000001"), &budget()).unwrap_err();
        assert!(matches!(err, EngineFailure::ResourceExhausted(_)));
    }

    #[test]
    fn expired_budget_stops_expansion() {
        let err = expand(&e("(x+1)^3"), &Budget::with_limit(Duration::ZERO)).unwrap_err();
        assert_eq!(err, EngineFailure::Timeout);
    }

    #[test]
    fn polynomial_division() {
        let p = Poly::from_expr(&e("x^3 - 1"), "x").unwrap();
        let d = Poly::from_expr(&e("x - 1"), "x").unwrap();
        let (q, r) = p.div_rem(&d);
        assert!(r.is_zero());
        assert_eq!(q.to_expr("x"), e("x^2 + x + 1"));
    }

    #[test]
    fn factors_quadratics_with_rational_roots() {
        let out = factor(&e("x^2 + 5*x + 6"), &budget()).unwrap();
        assert_eq!(out, e("(x+2)*(x+3)"));
        let out = factor(&e("2*x^2 + x - 1"), &budget()).unwrap();
        assert_eq!(out, e("(2*x-1)*(x+1)"));
    }

    #[test]
    fn factors_repeated_roots_into_powers() {
        let out = factor(&e("x^2 + 2*x + 1"), &budget()).unwrap();
        assert_eq!(out.to_string(), "(x + 1)^2");
        let out = factor(&e("-x^2 - 2*x - 1"), &budget()).unwrap();
        assert_eq!(out.to_string(), "-(x + 1)^2");
    }

    #[test]
    fn pulls_out_common_factors() {
        let out = factor(&e("x^2/2 + a*x"), &budget()).unwrap();
        assert_eq!(out.to_string(), "x*(2*a + x)/2");
        let out = factor(&e("6*x + 9"), &budget()).unwrap();
        assert_eq!(out.to_string(), "3*(2*x + 3)");
    }

    #[test]
    fn factors_difference_of_squares_in_two_variables() {
        let out = factor(&e("x^2 - y^2"), &budget()).unwrap();
        assert_eq!(out, e("(x - y)*(x + y)"));
    }

    #[test]
    fn irreducible_polynomials_stay_expanded() {
        let out = factor(&e("x^2 + 1"), &budget()).unwrap();
        assert_eq!(out, e("x^2 + 1"));
    }

    #[test]
    fn cancels_common_factors() {
        let out = cancel(&e("(x^2 - 1)/(x - 1)"), &budget()).unwrap();
        assert_eq!(out, e("x + 1"));
        let out = cancel(&e("1/x + 1/x^2"), &budget()).unwrap();
        assert_eq!(out, e("(x + 1)/x^2"));
    }

    #[test]
    fn together_uses_the_largest_power() {
        let (n, d) = together(&e("1/x + 1/x^2"));
        assert_eq!(n, e("x + 1"));
        assert_eq!(d, e("x^2"));
    }
}
