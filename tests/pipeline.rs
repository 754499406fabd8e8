//! End-to-end tests for the solve pipeline.
//!
//! These run the full path (clause splitting, normalization, argument
//! grammar, dispatch to the built-in engine, formatting) and check the
//! observable results a caller relies on.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use mathexpr::config::{MultiplicationStyle, PipelineConfig};
use mathexpr::error::ErrorKind;
use mathexpr::mode::ModeTag;
use mathexpr::normalize::normalize;
use mathexpr::pipeline::{RawRequest, Solver};

fn solver() -> Solver {
    Solver::with_builtin_engine(&PipelineConfig::default())
}

fn norm(input: &str) -> String {
    normalize(input).unwrap().as_str().to_string()
}

fn solved(solver: &Solver, mode: ModeTag, input: &str) -> String {
    let result = solver.solve(mode, input);
    assert!(result.ok, "{mode} {input}: {:?}", result.error_message);
    result.text.unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

#[test]
fn implicit_multiplication() {
    assert_eq!(norm("2x"), "2*x");
    assert_eq!(norm("(x+1)(x+2)"), "(x+1)*(x+2)");
    assert_eq!(norm("sin(x)"), "sin(x)");
}

#[test]
fn superscripts_fold_to_powers() {
    assert_eq!(norm("x²"), norm("x^2"));
    assert_eq!(norm("3x³ - x"), norm("3x^3 - x"));
}

proptest! {
    #[test]
    fn normalization_is_idempotent(
        tokens in prop::collection::vec(
            prop::sample::select(vec![
                "x", "y", "2", "3.5", "sin(x)", "(x+1)", "x²", "pi", "sqrt(y)", "ln(x)",
            ]),
            1..6,
        ),
        ops in prop::collection::vec(
            prop::sample::select(vec!["+", "-", "*", "/", "^", " "]),
            5,
        ),
    ) {
        let mut input = String::new();
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                input.push_str(ops[i - 1]);
            }
            input.push_str(token);
        }
        if let Ok(once) = normalize(&input) {
            let twice = normalize(once.as_str());
            prop_assert!(twice.is_ok(), "{input} -> {} did not re-normalize", once.as_str());
            if let Ok(twice) = twice {
                prop_assert_eq!(twice.as_str(), once.as_str());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Argument grammar
// ---------------------------------------------------------------------------

#[test]
fn substitute_requires_a_clause() {
    let result = solver().solve(ModeTag::Substitute, "2x^2+3x");
    assert!(!result.ok);
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
    assert!(result.text.is_none());
}

#[test]
fn integrate_rejects_a_single_limit() {
    let result = solver().solve(ModeTag::Integrate, "x^2; x=5");
    assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
}

#[test]
fn unknown_mode_is_a_validation_error() {
    let response = solver().handle(&RawRequest {
        mode: "cube".into(),
        expr: "x".into(),
    });
    assert!(!response.ok);
    assert!(response.result.is_none());
    assert!(response.error.is_some());
}

// ---------------------------------------------------------------------------
// Dispatch through the built-in engine
// ---------------------------------------------------------------------------

#[test]
fn expand_product_of_binomials() {
    assert_eq!(solved(&solver(), ModeTag::Expand, "(x+2)(x+3)"), "x^2 + 5*x + 6");
}

#[test]
fn substitute_to_a_number() {
    let result = solver().solve(ModeTag::Substitute, "2x^2+3x; x=5");
    assert_eq!(result.text.as_deref(), Some("65"));
    assert!(result.markup.is_none());
}

#[test]
fn indefinite_integral_carries_the_constant() {
    let s = solver();
    let text = solved(&s, ModeTag::Integrate, "x+a; x");
    assert_eq!(text, "a*x + x^2/2 + C");

    // Without a clause, the sole free variable is used.
    assert_eq!(solved(&s, ModeTag::Integrate, "x^2"), "x^3/3 + C");
}

#[test]
fn definite_integral_has_no_constant() {
    let text = solved(&solver(), ModeTag::Integrate, "x^2; x=0,1");
    assert_eq!(text, "1/3");
}

#[test]
fn second_derivative() {
    let text = solved(&solver(), ModeTag::Differentiate, "sin(x^2); x, 2");
    assert_eq!(text, "-4*x^2*sin(x^2) + 2*cos(x^2)");
}

#[test]
fn resimplify_strips_the_constant() {
    let s = solver();
    let integrated = solved(&s, ModeTag::Integrate, "x+a; x");
    assert!(integrated.ends_with(" + C"));

    let again = solved(&s, ModeTag::Resimplify, &integrated);
    assert!(!again.contains('C'), "{again}");
}

#[test]
fn transforms_report_conditions_in_text_only() {
    let result = solver().solve(ModeTag::LaplaceT, "sin(3t); t, s");
    assert_eq!(result.text.as_deref(), Some("3/(s^2 + 9) (Conditions: s > 0)"));
    let markup = result.markup.unwrap_or_default();
    assert!(!markup.contains("Conditions"), "{markup}");
}

#[test]
fn equations_differentiate_implicitly() {
    let s = solver();
    assert_eq!(solved(&s, ModeTag::Differentiate, "x^2 + y^2 = 1; y, x"), "-x/y");

    let result = s.solve(ModeTag::Differentiate, "x^2 + y^2 = 1");
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
}

#[test]
fn equations_differentiate_totally_with_one_variable() {
    let s = solver();
    let result = s.solve(ModeTag::Differentiate, "xy = m; t");
    assert!(result.ok, "{:?}", result.error_message);
    let text = result.text.unwrap_or_default();
    let (lhs, rhs) = text.split_once(" = ").unwrap();
    assert!(lhs.contains("(dx/dt)") && lhs.contains("(dy/dt)"), "{text}");
    assert_eq!(rhs, "(dm/dt)");
    let markup = result.markup.unwrap_or_default();
    assert!(markup.ends_with(r" = \frac{dm}{dt}"), "{markup}");

    let result = s.solve(ModeTag::Differentiate, "xy = m; t t");
    assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
}

#[test]
fn solver_is_shared_across_threads() {
    let s = Arc::new(solver());
    let handles: Vec<_> = (1..=4)
        .map(|n| {
            let s = Arc::clone(&s);
            thread::spawn(move || s.solve(ModeTag::Substitute, &format!("x^2; x={n}")))
        })
        .collect();
    let texts: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().text.unwrap())
        .collect();
    assert_eq!(texts, vec!["1", "4", "9", "16"]);
}

#[test]
fn history_record_for_success() {
    let s = solver();
    let result = s.solve(ModeTag::Expand, "(x+1)^2");
    let record = result.history_record(ModeTag::Expand, "(x+1)^2").unwrap();
    assert_eq!(record.result, "x^2 + 2*x + 1");
    assert_eq!(record.latex.as_deref(), Some("x^{2} + 2 x + 1"));
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn config_file_drives_the_solver() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mathexpr.toml");
    std::fs::write(
        &path,
        "timeout_ms = 5000\nintegration_constant = \"K\"\ncache_results = true\n",
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.multiplication_style, MultiplicationStyle::Adjacent);

    let s = Solver::with_builtin_engine(&config);
    assert_eq!(solved(&s, ModeTag::Integrate, "x; x"), "x^2/2 + K");
    assert_eq!(solved(&s, ModeTag::Integrate, "x; x"), "x^2/2 + K");
    assert_eq!(s.dispatcher().cached_len(), 1);
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mathexpr.toml");

    std::fs::write(&path, "timeout_ms = 0\n").unwrap();
    assert!(PipelineConfig::load(&path).is_err());

    std::fs::write(&path, "timeout = 10\n").unwrap();
    assert!(PipelineConfig::load(&path).is_err());

    assert!(PipelineConfig::load(&dir.path().join("missing.toml")).is_err());
}
