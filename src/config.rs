use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of the discovery and polling engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Poll interval when nothing has happened recently
    pub baseline_interval_ms: u64,
    /// Poll interval right after a connection command
    pub accelerated_interval_ms: u64,
    /// How long the accelerated interval holds after the last connection command
    pub acceleration_window_ms: u64,
    /// Upper bound on any single request
    pub request_timeout_ms: u64,
    /// mDNS service type to browse
    pub service_type: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            baseline_interval_ms: 1000,
            accelerated_interval_ms: 200,
            acceleration_window_ms: 5000,
            request_timeout_ms: 3000,
            service_type: "_http._tcp.local.".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        tracing::debug!("Loaded bridge config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn baseline_interval(&self) -> Duration {
        Duration::from_millis(self.baseline_interval_ms)
    }

    pub fn accelerated_interval(&self) -> Duration {
        Duration::from_millis(self.accelerated_interval_ms)
    }

    pub fn acceleration_window(&self) -> Duration {
        Duration::from_millis(self.acceleration_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
