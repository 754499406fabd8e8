//! Simplification by equality saturation.
//!
//! Canonical [`Expr`] trees already fold numbers and collect like terms;
//! the e-graph adds identities the constructors cannot see locally
//! (Pythagorean, double-angle, `exp`/`log`). The final answer is the
//! smallest of several equivalent candidates.

use std::sync::LazyLock;

use egg::{CostFunction, Extractor, Language, RecExpr, Runner, define_language};
use num_rational::BigRational;

use crate::engine::{Budget, EngineFailure, EngineResult};

use super::expr::{Constant, Expr, Func};
use super::poly;

define_language! {
    /// Binary-operator form of [`Expr`].
    pub enum MathLang {
        Num(BigRational),

        "+" = Add([egg::Id; 2]),
        "*" = Mul([egg::Id; 2]),
        "^" = Pow([egg::Id; 2]),

        "sin" = Sin(egg::Id),
        "cos" = Cos(egg::Id),
        "tan" = Tan(egg::Id),
        "cot" = Cot(egg::Id),
        "sec" = Sec(egg::Id),
        "csc" = Csc(egg::Id),
        "asin" = Asin(egg::Id),
        "acos" = Acos(egg::Id),
        "atan" = Atan(egg::Id),
        "acot" = Acot(egg::Id),
        "asec" = Asec(egg::Id),
        "acsc" = Acsc(egg::Id),
        "sinh" = Sinh(egg::Id),
        "cosh" = Cosh(egg::Id),
        "tanh" = Tanh(egg::Id),
        "exp" = Exp(egg::Id),
        "log" = Log(egg::Id),
        "Abs" = Abs(egg::Id),
        "erf" = Erf(egg::Id),
        "erfc" = Erfc(egg::Id),
        "gamma" = Gamma(egg::Id),

        // Variables and the named constants pi, E, I, oo.
        Symbol(egg::Symbol),
    }
}

/// E-graph limits for one saturation run.
#[derive(Debug, Clone, Copy)]
pub struct SaturationLimits {
    pub iterations: usize,
    pub nodes: usize,
}

fn identity_rules() -> Vec<egg::Rewrite<MathLang, ()>> {
    vec![
        egg::rewrite!("add-comm"; "(+ ?a ?b)" => "(+ ?b ?a)"),
        egg::rewrite!("add-assoc"; "(+ ?a (+ ?b ?c))" => "(+ (+ ?a ?b) ?c)"),
        egg::rewrite!("mul-comm"; "(* ?a ?b)" => "(* ?b ?a)"),
        egg::rewrite!("mul-assoc"; "(* ?a (* ?b ?c))" => "(* (* ?a ?b) ?c)"),
        egg::rewrite!("add-zero"; "(+ ?a 0)" => "?a"),
        egg::rewrite!("mul-one"; "(* ?a 1)" => "?a"),
        egg::rewrite!("mul-zero"; "(* ?a 0)" => "0"),
        egg::rewrite!("factor-out"; "(+ (* ?a ?b) (* ?a ?c))" => "(* ?a (+ ?b ?c))"),
        egg::rewrite!("pythagoras"; "(+ (^ (sin ?x) 2) (^ (cos ?x) 2))" => "1"),
        egg::rewrite!("one-minus-sin2"; "(+ 1 (* -1 (^ (sin ?x) 2)))" => "(^ (cos ?x) 2)"),
        egg::rewrite!("one-minus-cos2"; "(+ 1 (* -1 (^ (cos ?x) 2)))" => "(^ (sin ?x) 2)"),
        egg::rewrite!("sin-double"; "(* 2 (* (sin ?x) (cos ?x)))" => "(sin (* 2 ?x))"),
        egg::rewrite!("cos-double";
            "(+ (^ (cos ?x) 2) (* -1 (^ (sin ?x) 2)))" => "(cos (* 2 ?x))"),
        egg::rewrite!("tan-fold"; "(* (sin ?x) (^ (cos ?x) -1))" => "(tan ?x)"),
        egg::rewrite!("sec-squared"; "(+ 1 (^ (tan ?x) 2))" => "(^ (sec ?x) 2)"),
        egg::rewrite!("hyperbolic";
            "(+ (^ (cosh ?x) 2) (* -1 (^ (sinh ?x) 2)))" => "1"),
        egg::rewrite!("tanh-fold"; "(* (sinh ?x) (^ (cosh ?x) -1))" => "(tanh ?x)"),
        egg::rewrite!("exp-log"; "(exp (log ?x))" => "?x"),
        egg::rewrite!("exp-product"; "(* (exp ?a) (exp ?b))" => "(exp (+ ?a ?b))"),
    ]
}

static RULES: LazyLock<Vec<egg::Rewrite<MathLang, ()>>> = LazyLock::new(identity_rules);

static AGGRESSIVE_RULES: LazyLock<Vec<egg::Rewrite<MathLang, ()>>> = LazyLock::new(|| {
    let mut rules = identity_rules();
    rules.push(egg::rewrite!("log-product"; "(+ (log ?a) (log ?b))" => "(log (* ?a ?b))"));
    rules
});

/// Node count, like `AstSize`.
struct NodeCount;

impl CostFunction<MathLang> for NodeCount {
    type Cost = usize;

    fn cost<C>(&mut self, enode: &MathLang, mut costs: C) -> Self::Cost
    where
        C: FnMut(egg::Id) -> Self::Cost,
    {
        enode.fold(1, |sum, id| sum.saturating_add(costs(id)))
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn func_node(f: Func, arg: egg::Id) -> MathLang {
    match f {
        Func::Sin => MathLang::Sin(arg),
        Func::Cos => MathLang::Cos(arg),
        Func::Tan => MathLang::Tan(arg),
        Func::Cot => MathLang::Cot(arg),
        Func::Sec => MathLang::Sec(arg),
        Func::Csc => MathLang::Csc(arg),
        Func::Asin => MathLang::Asin(arg),
        Func::Acos => MathLang::Acos(arg),
        Func::Atan => MathLang::Atan(arg),
        Func::Acot => MathLang::Acot(arg),
        Func::Asec => MathLang::Asec(arg),
        Func::Acsc => MathLang::Acsc(arg),
        Func::Sinh => MathLang::Sinh(arg),
        Func::Cosh => MathLang::Cosh(arg),
        Func::Tanh => MathLang::Tanh(arg),
        Func::Exp => MathLang::Exp(arg),
        Func::Log => MathLang::Log(arg),
        Func::Abs => MathLang::Abs(arg),
        Func::Erf => MathLang::Erf(arg),
        Func::Erfc => MathLang::Erfc(arg),
        Func::Gamma => MathLang::Gamma(arg),
    }
}

fn node_func(node: &MathLang) -> Option<(Func, egg::Id)> {
    Some(match node {
        MathLang::Sin(a) => (Func::Sin, *a),
        MathLang::Cos(a) => (Func::Cos, *a),
        MathLang::Tan(a) => (Func::Tan, *a),
        MathLang::Cot(a) => (Func::Cot, *a),
        MathLang::Sec(a) => (Func::Sec, *a),
        MathLang::Csc(a) => (Func::Csc, *a),
        MathLang::Asin(a) => (Func::Asin, *a),
        MathLang::Acos(a) => (Func::Acos, *a),
        MathLang::Atan(a) => (Func::Atan, *a),
        MathLang::Acot(a) => (Func::Acot, *a),
        MathLang::Asec(a) => (Func::Asec, *a),
        MathLang::Acsc(a) => (Func::Acsc, *a),
        MathLang::Sinh(a) => (Func::Sinh, *a),
        MathLang::Cosh(a) => (Func::Cosh, *a),
        MathLang::Tanh(a) => (Func::Tanh, *a),
        MathLang::Exp(a) => (Func::Exp, *a),
        MathLang::Log(a) => (Func::Log, *a),
        MathLang::Abs(a) => (Func::Abs, *a),
        MathLang::Erf(a) => (Func::Erf, *a),
        MathLang::Erfc(a) => (Func::Erfc, *a),
        MathLang::Gamma(a) => (Func::Gamma, *a),
        _ => return None,
    })
}

fn push(e: &Expr, out: &mut RecExpr<MathLang>) -> egg::Id {
    match e {
        Expr::Num(n) => out.add(MathLang::Num(n.clone())),
        Expr::Const(c) => out.add(MathLang::Symbol(c.name().into())),
        Expr::Sym(s) => out.add(MathLang::Symbol(s.as_str().into())),
        Expr::Add(items) | Expr::Mul(items) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                ids.push(push(item, out));
            }
            let is_sum = matches!(e, Expr::Add(_));
            let mut acc = ids[0];
            for id in &ids[1..] {
                let node = if is_sum {
                    MathLang::Add([acc, *id])
                } else {
                    MathLang::Mul([acc, *id])
                };
                acc = out.add(node);
            }
            acc
        }
        Expr::Pow(b, x) => {
            let b = push(b, out);
            let x = push(x, out);
            out.add(MathLang::Pow([b, x]))
        }
        Expr::Func(f, a) => {
            let a = push(a, out);
            out.add(func_node(*f, a))
        }
    }
}

pub fn to_rec_expr(e: &Expr) -> RecExpr<MathLang> {
    let mut out = RecExpr::default();
    push(e, &mut out);
    out
}

/// Rebuild through the canonical constructors.
pub fn from_rec_expr(rec: &RecExpr<MathLang>) -> EngineResult<Expr> {
    let nodes = rec.as_ref();
    let mut built: Vec<Expr> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let at = |id: &egg::Id| built[usize::from(*id)].clone();
        let value = match node {
            MathLang::Num(n) => Expr::Num(n.clone()),
            MathLang::Symbol(s) => match Constant::from_name(s.as_str()) {
                Some(c) => Expr::Const(c),
                None => Expr::sym(s.as_str()),
            },
            MathLang::Add([a, b]) => at(a) + at(b),
            MathLang::Mul([a, b]) => at(a) * at(b),
            MathLang::Pow([a, b]) => Expr::pow(at(a), at(b)),
            other => {
                let (f, a) = node_func(other).ok_or_else(|| {
                    EngineFailure::Internal(format!("unmapped e-graph node {other:?}"))
                })?;
                Expr::func(f, at(&a))
            }
        };
        built.push(value);
    }
    built
        .pop()
        .ok_or_else(|| EngineFailure::Internal("empty e-graph extraction".into()))
}

// ---------------------------------------------------------------------------
// Simplification
// ---------------------------------------------------------------------------

/// Run the identity rules to saturation or the limits and extract the
/// smallest equivalent.
pub fn saturate(
    e: &Expr,
    aggressive: bool,
    limits: SaturationLimits,
    budget: &Budget,
) -> EngineResult<Expr> {
    budget.check()?;
    let rules: &[egg::Rewrite<MathLang, ()>] = if aggressive { &AGGRESSIVE_RULES } else { &RULES };
    let runner = Runner::default()
        .with_expr(&to_rec_expr(e))
        .with_iter_limit(limits.iterations)
        .with_node_limit(limits.nodes)
        .with_time_limit(budget.remaining())
        .run(rules);
    budget.check()?;
    tracing::trace!(
        iterations = runner.iterations.len(),
        nodes = runner.egraph.total_number_of_nodes(),
        stop = ?runner.stop_reason,
        "saturation finished"
    );
    let extractor = Extractor::new(&runner.egraph, NodeCount);
    let (_, best) = extractor.find_best(runner.roots[0]);
    from_rec_expr(&best)
}

fn rank(e: &Expr) -> (usize, usize) {
    (e.size(), e.to_string().len())
}

/// Replace `best` when `candidate` is strictly smaller.
fn keep_smaller(best: &mut Expr, candidate: Option<Expr>) {
    if let Some(candidate) = candidate {
        if rank(&candidate) < rank(best) {
            *best = candidate;
        }
    }
}

/// A candidate that failed for reasons other than the budget is skipped.
fn optional(result: EngineResult<Expr>) -> EngineResult<Option<Expr>> {
    match result {
        Ok(e) => Ok(Some(e)),
        Err(failure @ (EngineFailure::Timeout | EngineFailure::Cancelled)) => Err(failure),
        Err(_) => Ok(None),
    }
}

fn has_function(e: &Expr) -> bool {
    match e {
        Expr::Func(..) => true,
        Expr::Num(_) | Expr::Const(_) | Expr::Sym(_) => false,
        Expr::Add(xs) | Expr::Mul(xs) => xs.iter().any(has_function),
        Expr::Pow(b, x) => has_function(b) || has_function(x),
    }
}

/// Smallest of the original, expanded, cancelled and saturated forms;
/// `aggressive` also tries the factored form and log combination.
pub fn simplify(
    e: &Expr,
    aggressive: bool,
    limits: SaturationLimits,
    budget: &Budget,
) -> EngineResult<Expr> {
    let mut best = e.clone();
    keep_smaller(&mut best, optional(poly::expand(e, budget))?);
    keep_smaller(&mut best, optional(poly::cancel(e, budget))?);
    if aggressive {
        let factored = optional(poly::factor(&best, budget))?;
        keep_smaller(&mut best, factored);
    }
    if has_function(&best) {
        let saturated = optional(saturate(&best, aggressive, limits, budget))?;
        keep_smaller(&mut best, saturated);
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::syntax::parse;

    fn e(text: &str) -> Expr {
        Expr::from_ast(&parse(text).unwrap()).unwrap()
    }

    const LIMITS: SaturationLimits = SaturationLimits {
        iterations: 12,
        nodes: 20_000,
    };

    fn simplified(text: &str) -> String {
        let budget = Budget::with_limit(Duration::from_secs(60));
        simplify(&e(text), false, LIMITS, &budget).unwrap().to_string()
    }

    #[test]
    fn rec_expr_conversion_preserves_the_expression() {
        let original = e("2*sin(x)^2 + exp(-x)/3 + pi");
        let rec = to_rec_expr(&original);
        assert_eq!(from_rec_expr(&rec).unwrap(), original);
    }

    #[test]
    fn pythagorean_identity() {
        assert_eq!(simplified("sin(x)^2 + cos(x)^2"), "1");
    }

    #[test]
    fn double_angle() {
        assert_eq!(simplified("2*sin(x)*cos(x)"), "sin(2*x)");
    }

    #[test]
    fn products_that_are_already_small_stay_factored() {
        assert_eq!(simplified("(x+2)*(x+3)"), "(x + 2)*(x + 3)");
    }

    #[test]
    fn rational_functions_cancel() {
        assert_eq!(simplified("(x^2 - 1)/(x - 1)"), "x + 1");
    }

    #[test]
    fn aggressive_mode_factors() {
        let budget = Budget::with_limit(Duration::from_secs(60));
        let out = simplify(&e("x^2 + 2*x + 1"), true, LIMITS, &budget).unwrap();
        assert_eq!(out.to_string(), "(x + 1)^2");
    }

    #[test]
    fn saturation_respects_the_budget() {
        let err = saturate(&e("sin(x)"), false, LIMITS, &Budget::with_limit(Duration::ZERO))
            .unwrap_err();
        assert_eq!(err, EngineFailure::Timeout);
    }
}
