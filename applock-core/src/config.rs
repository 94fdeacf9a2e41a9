//! Engine configuration, persisted as JSON under the data directory.

use crate::watcher::PollingConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplockConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Identifier the host application runs under; never gated.
    #[serde(default = "default_self_package")]
    pub self_package: String,

    /// Interval between foreground samples.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry interval while foreground observation is not granted.
    #[serde(default = "default_permission_backoff_ms")]
    pub permission_backoff_ms: u64,

    /// Trailing window queried for foreground transitions.
    #[serde(default = "default_foreground_window_secs")]
    pub foreground_window_secs: u64,

    /// Lifetime of a temporary-unlock lease.
    #[serde(default = "default_unlock_ttl_secs")]
    pub unlock_ttl_secs: u64,

    /// Capacity of the gate-request queue shared by both detectors.
    #[serde(default = "default_gate_queue_depth")]
    pub gate_queue_depth: usize,
}

impl Default for ApplockConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            self_package: default_self_package(),
            poll_interval_ms: default_poll_interval_ms(),
            permission_backoff_ms: default_permission_backoff_ms(),
            foreground_window_secs: default_foreground_window_secs(),
            unlock_ttl_secs: default_unlock_ttl_secs(),
            gate_queue_depth: default_gate_queue_depth(),
        }
    }
}

// Defaults
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".applockd"))
        .unwrap_or_else(|| PathBuf::from(".applockd"))
}
fn default_self_package() -> String {
    "com.applockd.host".to_string()
}
fn default_poll_interval_ms() -> u64 {
    800
}
fn default_permission_backoff_ms() -> u64 {
    2000
}
fn default_foreground_window_secs() -> u64 {
    10
}
fn default_unlock_ttl_secs() -> u64 {
    300
}
fn default_gate_queue_depth() -> usize {
    16
}

impl ApplockConfig {
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("applockd.json");

        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            let mut config: ApplockConfig = serde_json::from_str(&raw)?;
            config.data_dir = data_dir.to_path_buf();
            return Ok(config);
        }

        let config = Self {
            data_dir: data_dir.to_path_buf(),
            ..Self::default()
        };
        config.persist()?;
        Ok(config)
    }

    pub fn persist(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let config_path = self.data_dir.join("applockd.json");
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(config_path, raw)?;
        Ok(())
    }

    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            permission_backoff: Duration::from_millis(self.permission_backoff_ms),
            window: Duration::from_secs(self.foreground_window_secs),
            self_package: self.self_package.clone(),
        }
    }

    pub fn unlock_ttl(&self) -> Duration {
        Duration::from_secs(self.unlock_ttl_secs)
    }
}
