//! Configuration System
//!
//! Hierarchical configuration loading for the optimizer:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (RELQUEL_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [optimizer]
//! enable_exists_rewrite = false
//! max_depth = 16
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RELQUEL_OPTIMIZER__ENABLE_AGGREGATE_LOWERING=false
//! RELQUEL_LOGGING__LEVEL=debug
//! ```
//!
//! Pass toggles exist so hosts can bisect a suspect rewrite; everything
//! is enabled by default. Anchor finalization has no toggle - it enforces
//! an invariant, not an optimization.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Optimizer pass toggles and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub enable_range_pruning: bool,

    #[serde(default = "default_true")]
    pub enable_self_join_simplification: bool,

    #[serde(default = "default_true")]
    pub enable_join_collapse: bool,

    #[serde(default = "default_true")]
    pub enable_exists_rewrite: bool,

    #[serde(default = "default_true")]
    pub enable_any_rewrite: bool,

    #[serde(default = "default_true")]
    pub enable_aggregate_lowering: bool,

    #[serde(default = "default_true")]
    pub enable_value_canonicalization: bool,

    /// Maximum nesting depth of derived-table retrieves
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_max_depth() -> usize {
    32
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            enable_range_pruning: true,
            enable_self_join_simplification: true,
            enable_join_collapse: true,
            enable_exists_rewrite: true,
            enable_any_rewrite: true,
            enable_aggregate_lowering: true,
            enable_value_canonicalization: true,
            max_depth: default_max_depth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (RELQUEL_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("RELQUEL_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RELQUEL_").split("__"))
            .extract()
    }
}
