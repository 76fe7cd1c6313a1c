//! Application settings loading from config.toml
//!
//! Every field has a default, so a missing file is not an error: the application runs
//! with the built-in values. A file that exists but cannot be read or parsed is.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Session lifecycle settings
    pub session: SessionSettings,
    /// Display preferences
    pub display: DisplaySettings,
}

/// Settings for the session lifecycle manager
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// Seconds between two periodic account validity checks
    pub validity_check_interval_secs: u64,
}

impl SessionSettings {
    /// The validity poll period as a [`Duration`].
    #[must_use]
    pub const fn validity_check_interval(&self) -> Duration {
        Duration::from_secs(self.validity_check_interval_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            validity_check_interval_secs: 30,
        }
    }
}

/// Display preferences
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DisplaySettings {
    /// Currency used when neither the account nor the local cache names one
    pub default_currency: String,
    /// Number of sales shown on the dashboard
    pub recent_sales_limit: u64,
    /// Products at or below this quantity are reported as low stock
    pub low_stock_threshold: i64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            recent_sales_limit: 5,
            low_stock_threshold: 10,
        }
    }
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file exists but cannot be read
/// - The TOML syntax is invalid or a field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        info!(path = ?path_ref, "No config file found, using defaults");
        return Ok(AppConfig::default());
    }

    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {path_ref:?}: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses settings from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;

    if config.session.validity_check_interval_secs == 0 {
        return Err(Error::Config {
            message: "session.validity_check_interval_secs must be greater than zero".to_string(),
        });
    }

    Ok(config)
}

/// Loads settings from the default location (./config.toml)
pub fn load_default_config() -> Result<AppConfig> {
    load_config("config.toml")
}
