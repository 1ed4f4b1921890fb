//! Command-line configuration file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use framebridge::SessionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub session: SessionConfig,
    /// How long to capture before stopping
    pub run_secs: u64,
    /// Model name reported by the synthetic device
    pub device_name: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            run_secs: 5,
            device_name: "Synthetic Capture".into(),
        }
    }
}

impl CliConfig {
    pub fn run_for(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }
}

/// Load the config file at `path`, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}
