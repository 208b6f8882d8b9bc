//! Configuration loading for the CLI.
//!
//! Sources, lowest priority first:
//! 1. `smart-launch.toml` in the working directory, or the `--config` file
//! 2. Environment overrides, e.g. `SMART_LAUNCH__LAUNCH__TIMEOUT_MS=2000`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use octofhir_smart_launch::{ConfigError, LaunchConfig, LaunchSettings};
use serde::Deserialize;

/// Configuration file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "smart-launch.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SMART_LAUNCH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub logging: LoggingConfig,
    pub launch: LaunchSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Validates the launch settings.
    pub fn launch_config(&self) -> Result<LaunchConfig, ConfigError> {
        self.launch.build()
    }
}

pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            if !p.exists() {
                bail!("Config file not found: {}", p.display());
            }
            builder = builder.add_source(File::from(p.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")
}

/// Returns true if `error` stems from configuration rather than runtime.
pub fn is_config_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.is::<ConfigError>() || cause.is::<config::ConfigError>())
}
