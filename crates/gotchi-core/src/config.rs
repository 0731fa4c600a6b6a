//! Service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;

/// Default tick interval in milliseconds (one second)
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default name for both the status device and the control file
pub const DEFAULT_NAME: &str = "gotchi";

/// Configuration for a gotchi service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Delay between one firing finishing and the next one starting
    pub interval_ms: u64,

    /// Name under which the status device is registered
    pub device_name: String,

    /// Name under which the control file is registered
    pub control_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            device_name: DEFAULT_NAME.to_string(),
            control_name: DEFAULT_NAME.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create config for testing (short interval)
    pub fn for_testing() -> Self {
        Self {
            interval_ms: 10,
            ..Self::default()
        }
    }

    /// Override the tick interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Tick interval as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        validate_name("device", &self.device_name)?;
        validate_name("control", &self.control_name)?;
        Ok(())
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
