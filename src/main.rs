//! mathexpr CLI: normalize, preview and solve typed math.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use mathexpr::config::PipelineConfig;
use mathexpr::grammar::rule_for;
use mathexpr::mode::ModeTag;
use mathexpr::normalize::normalize;
use mathexpr::pipeline::{RawRequest, Solver};

#[derive(Parser)]
#[command(name = "mathexpr", version, about = "Normalize, preview and solve typed math")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Engine time budget in milliseconds (overrides the config file).
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Print the JSON response shape instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve an expression in the given mode.
    Solve {
        /// Mode name, e.g. "expand", "integrate", "laplace_t".
        mode: String,
        /// Expression with an optional clause, e.g. "x^2; x=0,1".
        expr: String,
    },

    /// Render LaTeX for an expression without solving it.
    Preview {
        /// Expression, optionally with a clause (ignored).
        expr: String,
    },

    /// Print the canonical form of an expression.
    Normalize {
        /// Expression as typed.
        expr: String,
    },

    /// List the supported modes and their clause shapes.
    Modes,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
        config.validate()?;
    }

    match cli.command {
        Commands::Solve { mode, expr } => {
            let solver = Solver::with_builtin_engine(&config);

            if cli.json {
                let response = solver.handle(&RawRequest { mode, expr });
                let json = serde_json::to_string_pretty(&response).into_diagnostic()?;
                println!("{json}");
                return Ok(());
            }

            let mode: ModeTag = mode.parse()?;
            let formatted = solver.try_solve(mode, &expr)?;
            println!("{}", formatted.text);
            if let Some(markup) = &formatted.markup {
                println!("latex: {markup}");
            }
        }

        Commands::Preview { expr } => {
            let solver = Solver::with_builtin_engine(&config);
            let markup = solver.preview(&expr)?;
            if cli.json {
                let json = serde_json::to_string_pretty(&serde_json::json!({ "latex": markup }))
                    .into_diagnostic()?;
                println!("{json}");
            } else {
                println!("{markup}");
            }
        }

        Commands::Normalize { expr } => {
            let normalized = normalize(&expr)?;
            if cli.json {
                let json = serde_json::to_string_pretty(&serde_json::json!({
                    "normalized": normalized.as_str(),
                    "variables": normalized.free_variables(),
                }))
                .into_diagnostic()?;
                println!("{json}");
            } else {
                println!("{}", normalized.as_str());
            }
        }

        Commands::Modes => {
            if cli.json {
                let modes: Vec<_> = ModeTag::ALL
                    .iter()
                    .map(|mode| {
                        serde_json::json!({
                            "mode": mode.wire_name(),
                            "clause": rule_for(*mode).shape,
                        })
                    })
                    .collect();
                let json = serde_json::to_string_pretty(&modes).into_diagnostic()?;
                println!("{json}");
            } else {
                println!("Modes ({}):", ModeTag::ALL.len());
                for mode in ModeTag::ALL {
                    println!("  {:<14} clause: {}", mode.wire_name(), rule_for(mode).shape);
                }
            }
        }
    }

    Ok(())
}
