//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Engine push retries
    pub retry: RetryConfig,

    /// Execution engine admin surface
    pub engine: EngineConfig,

    /// Control-plane feed
    pub feed: FeedConfig,

    /// Cursor persistence
    pub checkpoint: CheckpointConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            retry: RetryConfig::default(),
            engine: EngineConfig::default(),
            feed: FeedConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject settings the synchronizer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts < 1 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            anyhow::bail!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }
        if self.retry.multiplier < 1.0 {
            anyhow::bail!("retry.multiplier must be at least 1.0");
        }
        if self.engine.push_timeout_ms == 0 {
            anyhow::bail!("engine.push_timeout_ms must be greater than 0");
        }
        if crate::utils::LogLevel::from_str(&self.log_level).is_none() {
            anyhow::bail!("Unknown log level: {}", self.log_level);
        }
        Ok(())
    }
}

/// Retry policy settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total push attempts before dead-lettering
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    pub multiplier: f64,

    /// Randomize each delay within the backoff window
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Engine adapter settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Admin REST base URL; without it pushes are only logged
    pub base_url: Option<String>,

    /// Timeout per push in milliseconds
    pub push_timeout_ms: u64,

    /// Extra headers sent with every push (e.g. authorization)
    pub headers: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            push_timeout_ms: 5_000,
            headers: BTreeMap::new(),
        }
    }
}

/// Control-plane feed settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// JSON-lines event file
    pub events_path: Option<PathBuf>,

    /// Directory of `<tenant>.json` full-state files
    pub full_state_dir: Option<PathBuf>,

    /// Delay before reconnecting after a feed error
    pub reconnect_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            events_path: None,
            full_state_dir: None,
            reconnect_backoff_ms: 1_000,
        }
    }
}

/// Cursor checkpoint settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Checkpoint file; the cursor is memory-only when unset
    pub path: Option<PathBuf>,
}
