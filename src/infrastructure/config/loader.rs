use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::Config;

/// Directory holding project configuration, relative to the working directory
pub const CONFIG_DIR: &str = ".arborist";

/// Prefix for environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "ARBORIST_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid min_connections: {0} exceeds max_connections {1}")]
    InvalidMinConnections(u32, u32),

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid jitter: {0}. Must be between 0.0 and 1.0")]
    InvalidJitter(f64),

    #[error("Invalid compression strength: {0}. Must be between 0.0 and 1.0")]
    InvalidCompressionStrength(f64),

    #[error("Invalid {name}: {value}. Must be at least 1")]
    ZeroCount { name: &'static str, value: u64 },

    #[error("Invalid {name}: {value}. Must be a finite, non-negative number")]
    InvalidNumber { name: &'static str, value: f64 },

    #[error("Model name cannot be empty")]
    EmptyModelName,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .arborist/config.yaml (project config)
    /// 3. .arborist/local.yaml (project local overrides, optional)
    /// 4. Environment variables (`ARBORIST_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new("."))
    }

    /// Same as [`ConfigLoader::load`], with the project rooted at `root`
    pub fn load_from_dir(root: &Path) -> Result<Config> {
        let config_dir = root.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_dir.join("config.yaml")))
            .merge(Yaml::file(config_dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let database = &config.database;
        if database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(database.max_connections));
        }
        if database.min_connections > database.max_connections {
            return Err(ConfigError::InvalidMinConnections(
                database.min_connections,
                database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let retry = &config.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(retry.max_attempts));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::InvalidJitter(retry.jitter));
        }

        let model = &config.model;
        if model.model.trim().is_empty() {
            return Err(ConfigError::EmptyModelName);
        }
        if model.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(model.max_attempts));
        }
        check_non_negative("model.temperature", model.temperature)?;

        let sampler = &config.sampler;
        if let Some(strength) = sampler.compression_strength {
            if !(0.0..=1.0).contains(&strength) {
                return Err(ConfigError::InvalidCompressionStrength(strength));
            }
        }
        check_non_zero("sampler.adaptive_period", u64::from(sampler.adaptive_period))?;
        check_non_zero("sampler.window_size", u64::from(sampler.window_size))?;
        check_non_negative("sampler.temperature", sampler.temperature)?;

        let search = &config.search;
        check_non_zero("search.n_parallel", search.n_parallel as u64)?;
        check_non_zero(
            "search.samples_per_iteration",
            u64::from(search.samples_per_iteration),
        )?;
        check_non_zero("search.beam_width", u64::from(search.beam_width))?;

        Ok(())
    }
}

const fn check_non_zero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroCount { name, value });
    }
    Ok(())
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidNumber { name, value });
    }
    Ok(())
}
