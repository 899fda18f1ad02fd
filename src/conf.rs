//! The Serializable configuration data structures used for setup.
use std::{fs, io, os::fd::RawFd, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Upper bound on each `epoll_wait`, and so on shutdown latency. 0 is
    /// treated as 1.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u16,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl WatcherConfig {
    /// The wait timeout actually used. Never 0, which would turn every
    /// `epoll_wait` into a busy poll.
    pub fn wait_timeout_ms(&self) -> u16 {
        self.poll_timeout_ms.max(1)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms() as u64)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            thread_name: default_thread_name(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WatchConf {
    pub fd: RawFd,

    #[serde(default = "default_watch_events")]
    pub events: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_cfg_ver")]
    pub version: u32,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub watch: Vec<WatchConf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config: {0}")]
    Io(#[from] io::Error),

    #[error("bad toml config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("bad yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config format not supported: {0}")]
    UnsupportedFormat(String),
}

impl Config {
    /// Reads a config file, picking the format from its extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        match ext {
            "toml" => Ok(toml::from_str(&fs::read_to_string(path)?)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

fn default_cfg_ver() -> u32 {
    1
}

fn default_poll_timeout_ms() -> u16 {
    50
}

fn default_thread_name() -> String {
    String::from("epwatch-poll")
}

fn default_watch_events() -> Vec<String> {
    vec![String::from("in")]
}
