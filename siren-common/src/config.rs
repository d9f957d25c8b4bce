//! Configuration loading and warehouse path resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// TOML configuration file contents (`~/.config/siren/config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the warehouse SQLite file
    pub warehouse_path: Option<String>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,
}

/// Logging section of the TOML config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter ("error", "warn", "info", "debug", "trace")
    pub level: Option<String>,
}

/// Resolve the warehouse database path, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `SIREN_WAREHOUSE` environment variable
/// 3. TOML config file (`warehouse_path` key)
/// 4. OS-dependent default (fallback)
pub fn resolve_warehouse_path(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("SIREN_WAREHOUSE") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(path) = config.warehouse_path {
            return PathBuf::from(path);
        }
    }

    // Priority 4: OS-dependent default
    default_warehouse_path()
}

/// Load the TOML config file from the platform config directory
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = config_file_path()?;
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Platform config file location (`<config dir>/siren/config.toml`)
fn config_file_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("siren").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// OS-dependent default warehouse location
fn default_warehouse_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("siren").join("warehouse.db"))
        .unwrap_or_else(|| PathBuf::from("./siren_data/warehouse.db"))
}
