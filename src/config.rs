use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::lock::LockManager;
use anyhow::{Context, Result};

/// Hub process configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Lock acquisition timeout in milliseconds. Absent means wait forever,
    /// matching the behavior most deployments expect; set it to fail a
    /// dispatch instead of stalling behind a stuck holder.
    pub lock_timeout_ms: Option<u64>,
    /// Capacity of the in-process transport channel.
    pub channel_capacity: Option<usize>,
    /// Remote sync HTTP timeout in milliseconds. Absent means the client
    /// default (no overall timeout).
    pub http_timeout_ms: Option<u64>,
    /// Redis connection string when using the redis task store.
    pub redis_url: Option<String>,
    /// Static task-type positions known to this hub, by dotted id.
    pub task_ids: Vec<String>,
}

impl HubConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: HubConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(100)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_ms.map(Duration::from_millis)
    }

    pub fn lock_manager(&self) -> LockManager {
        match self.lock_timeout_ms {
            Some(ms) => LockManager::with_timeout(Duration::from_millis(ms)),
            None => LockManager::new(),
        }
    }
}
