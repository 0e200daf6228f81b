//! Agent configuration file (`tether.toml`).
//!
//! Every table and field is optional; missing values fall back to the
//! defaults below. CLI flags are applied on top with `apply_overrides`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tether_core::app::ManagerSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub store: StoreSection,
    pub manager: ManagerSettings,
    pub writeback: WritebackSection,
    pub heartbeat: HeartbeatSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/retry.db"),
        }
    }
}

/// Directories used by the filesystem write-back executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritebackSection {
    /// Local blob cache, one file per digest.
    pub cache_dir: PathBuf,
    /// Backend storage, laid out as `<namespace>/<digest>`.
    pub backend_dir: PathBuf,
    /// Remote clusters, laid out as `<destination>/<tag>`.
    pub remotes_dir: PathBuf,
}

impl Default for WritebackSection {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./data/cache"),
            backend_dir: PathBuf::from("./data/backend"),
            remotes_dir: PathBuf::from("./data/remotes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    /// 0 disables the heartbeat.
    pub interval_secs: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl HeartbeatSection {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, store_path: Option<PathBuf>, log_level: Option<String>) {
        if let Some(path) = store_path {
            self.store.path = path;
        }
        if let Some(level) = log_level {
            self.log.level = level;
        }
    }
}
