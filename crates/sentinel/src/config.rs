//! Daemon configuration loading
//!
//! An optional TOML/JSON/YAML file is layered under `SENTINEL_*` environment
//! variables, e.g. `SENTINEL_ALERTING__THRESHOLD=0.25` or
//! `SENTINEL_TELEGRAM__CHAT_IDS=-1001,-1002`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use sentinel_lib::SentinelConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "SENTINEL_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/metric-sentinel/config.toml";

fn environment() -> Environment {
    Environment::with_prefix("SENTINEL")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("telegram.chat_ids")
}

/// Load and validate the configuration.
///
/// A file named by `SENTINEL_CONFIG` must exist; the default path is
/// optional.
pub fn load() -> Result<SentinelConfig> {
    let (path, required) = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => (PathBuf::from(path), true),
        Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    load_with(&path, required, environment())
}

fn load_with(path: &Path, required: bool, env: Environment) -> Result<SentinelConfig> {
    let config: SentinelConfig = Config::builder()
        .add_source(File::from(path).required(required))
        .add_source(env)
        .build()
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?
        .try_deserialize()
        .context("Invalid configuration")?;

    config.validate().context("Configuration rejected")?;
    Ok(config)
}
