//! Daemon configuration file
//!
//! The file is optional. A missing file yields the defaults; a present but
//! malformed file is an error. Command-line flags are applied on top.

use anyhow::{Context, Result};
use gotchi_core::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the daemon reads from `gotchi.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Enable debug logging
    pub verbose: bool,

    /// Registration slots on the in-process host; unlimited when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_slots: Option<usize>,

    /// Settings handed to the service
    pub service: ServiceConfig,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interval_ms: Option<u64>,
    pub device_name: Option<String>,
    pub control_name: Option<String>,
}

impl DaemonConfig {
    /// Load configuration from `path`, falling back to defaults if it does
    /// not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply command-line overrides and validate the result
    pub fn resolve(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(interval_ms) = overrides.interval_ms {
            self.service.interval_ms = interval_ms;
        }
        if let Some(name) = overrides.device_name {
            self.service.device_name = name;
        }
        if let Some(name) = overrides.control_name {
            self.service.control_name = name;
        }
        self.service
            .validate()
            .context("Invalid service configuration")?;
        Ok(self)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
