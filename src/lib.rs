// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # mathexpr
//!
//! Turns loosely typed, human-entered math into canonical expressions,
//! parses the mode-specific argument clause, dispatches the operation to a
//! symbolic engine under a time budget, and formats the result as text plus
//! LaTeX markup.
//!
//! ## Architecture
//!
//! - **Clause splitting** (`clause`): `expr; args` at the first semicolon
//! - **Normalization** (`normalize`): implicit multiplication, superscripts, aliases
//! - **Argument grammar** (`grammar`): per-mode clause rules, bound variables
//! - **Dispatch** (`dispatch`): engine call with timeout, cancellation and cache
//! - **Formatting** (`format`): display text, integration constant, LaTeX
//! - **Built-in engine** (`cas`): exact rationals, e-graph simplification via `egg`
//!
//! ## Library usage
//!
//! ```no_run
//! use mathexpr::config::PipelineConfig;
//! use mathexpr::mode::ModeTag;
//! use mathexpr::pipeline::Solver;
//!
//! let solver = Solver::with_builtin_engine(&PipelineConfig::default());
//! let result = solver.solve(ModeTag::Substitute, "2x^2+3x; x=5");
//! assert_eq!(result.text.as_deref(), Some("65"));
//! ```

pub mod cas;
pub mod clause;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod format;
pub mod grammar;
pub mod mode;
pub mod normalize;
pub mod pipeline;
pub mod syntax;
