//! Configuration management for Quotaguard.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::ratelimit::RateLimitRules;

/// Main configuration for the Quotaguard binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaguardConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limit rules
    #[serde(default)]
    pub rate_limiting: RateLimitRules,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QuotaguardConfig {
    /// Environment source: `QUOTAGUARD__LOGGING__LEVEL=debug` and so on.
    pub fn environment() -> Environment {
        Environment::default()
            .prefix("QUOTAGUARD")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    /// Load configuration from an optional YAML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", "text")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config = builder.add_source(Self::environment()).build()?;
        Ok(config.try_deserialize()?)
    }
}
