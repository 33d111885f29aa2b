//! `AppConfig` struct and TOML loading.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level application configuration.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// XMLTV guide URL (`http://`, `https://` or `file://`).
    pub provider: Option<String>,
    /// Channel ids to watch.
    pub channels: Vec<String>,
    /// Time specs to look up on every channel (`now`, `tonight`, `21h30`, ...).
    #[serde(alias = "timetowatch")]
    pub times_to_watch: Vec<String>,
    /// Upper bound on one guide download, in seconds. Unbounded when unset.
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: None,
            channels: Vec::new(),
            times_to_watch: vec![String::from("now")],
            fetch_timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// Loads config from a TOML file. Returns default if file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}
