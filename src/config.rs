//! Pipeline configuration, loadable from TOML.
//!
//! Every field has a serde default so a partial file (or none at all) is
//! valid. The configuration is read once at startup and shared read-only.

use std::path::Path;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(mathexpr::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {message}")]
    #[diagnostic(
        code(mathexpr::config::parse),
        help("Check the TOML syntax. Unknown keys are rejected.")
    )]
    Parse { message: String },

    #[error("invalid config: {message}")]
    #[diagnostic(code(mathexpr::config::invalid), help("{message}"))]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// How products are rendered in markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplicationStyle {
    /// `2 x`, `a b`; `\cdot` only between two numbers.
    #[default]
    Adjacent,
    /// `\cdot` between every pair of factors.
    Cdot,
}

/// Settings for the solve pipeline and the built-in engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Time budget for one engine call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Constant-of-integration marker appended to indefinite integrals.
    #[serde(default = "default_integration_constant")]
    pub integration_constant: String,
    #[serde(default)]
    pub multiplication_style: MultiplicationStyle,
    /// Memoize successful results per operation descriptor.
    #[serde(default)]
    pub cache_results: bool,
    /// E-graph iteration limit for simplification.
    #[serde(default = "default_simplify_iterations")]
    pub simplify_iterations: usize,
    /// E-graph node limit for simplification.
    #[serde(default = "default_simplify_node_limit")]
    pub simplify_node_limit: usize,
}

fn default_timeout_ms() -> u64 {
    20_000
}
fn default_integration_constant() -> String {
    "C".into()
}
fn default_simplify_iterations() -> usize {
    12
}
fn default_simplify_node_limit() -> usize {
    20_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            integration_constant: default_integration_constant(),
            multiplication_style: MultiplicationStyle::default(),
            cache_results: false,
            simplify_iterations: default_simplify_iterations(),
            simplify_node_limit: default_simplify_node_limit(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "timeout_ms must be greater than zero".into(),
            });
        }
        let marker = self.integration_constant.trim();
        if marker.is_empty() || !marker.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                message: "integration_constant must be a non-empty run of letters, e.g. \"C\"".into(),
            });
        }
        if self.simplify_iterations == 0 || self.simplify_node_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "simplify_iterations and simplify_node_limit must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = PipelineConfig::from_toml_str(
            "timeout_ms = 500\nmultiplication_style = \"cdot\"\n",
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.multiplication_style, MultiplicationStyle::Cdot);
        assert_eq!(config.integration_constant, "C");
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = PipelineConfig::from_toml_str("timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn non_letter_marker_is_invalid() {
        let err = PipelineConfig::from_toml_str("integration_constant = \"+1\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PipelineConfig::from_toml_str("timeout = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mathexpr.toml");
        std::fs::write(&path, "cache_results = true\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert!(config.cache_results);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PipelineConfig::load(Path::new("/nonexistent/mathexpr.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
