//! # Feature: Configuration System
//!
//! YAML configuration file with environment variable interpolation.
//! Loaded once at startup; the process exits if it cannot be read.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use anyhow::{Context, Result};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Default config location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "instance/config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Discord bot token (required)
    pub discord_token: String,

    /// sqlite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Logging level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dev mode guild ID (register commands on this guild only)
    #[serde(default)]
    pub discord_guild_id: Option<String>,
}

// Default value functions for serde
fn default_database_path() -> String {
    "instance/data.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a YAML file with environment variable interpolation
    ///
    /// Supports `${VAR_NAME}` syntax for environment variable substitution.
    /// Example: `discord_token: "${DISCORD_TOKEN}"`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let interpolated = interpolate_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&interpolated)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `CONFIG_FILE` if set, otherwise from `DEFAULT_CONFIG_PATH`
    pub fn auto_load() -> Result<Self> {
        match env::var("CONFIG_FILE") {
            Ok(config_path) => Self::from_file(config_path),
            Err(_) => Self::from_file(DEFAULT_CONFIG_PATH),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("discord_token is required");
        }

        if let Some(ref guild_id) = self.discord_guild_id {
            if guild_id.parse::<u64>().is_err() {
                anyhow::bail!("discord_guild_id '{}' is not a valid guild ID", guild_id);
            }
        }

        Ok(())
    }

    /// Parsed dev guild ID, if configured
    pub fn guild_id(&self) -> Option<u64> {
        self.discord_guild_id.as_ref().and_then(|id| id.parse().ok())
    }
}

/// Interpolate environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. If a variable is not set, returns an error.
/// Use `${VAR_NAME:-default}` for default values.
fn interpolate_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")?;

    let mut errors = Vec::new();
    let result = re.replace_all(content, |cap: &regex::Captures| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    errors.push(format!("Environment variable '{}' is not set", var_name));
                    String::new()
                }
            },
        }
    });

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variables:\n  - {}", errors.join("\n  - "));
    }

    Ok(result.into_owned())
}
