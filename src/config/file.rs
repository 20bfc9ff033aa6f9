//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::AppConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./artifact-sync.yaml",
    "./artifact-sync.yml",
    "./.artifact-sync.yaml",
    "~/.config/artifact-sync/config.yaml",
];

/// Supported config file format versions
const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load an explicit file, else the first standard location, else defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match explicit.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }
        self.app.validate()
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut app = AppConfig::default();
        app.engine.base_url = Some("http://localhost:9443/api/admin".to_string());
        app.engine
            .headers
            .insert("Authorization".to_string(), "Bearer <token>".to_string());
        app.feed.events_path = Some(PathBuf::from("./events.jsonl"));
        app.feed.full_state_dir = Some(PathBuf::from("./state"));
        app.checkpoint.path = Some(PathBuf::from("./.artifact-sync/cursor.json"));

        Self {
            version: default_version(),
            app,
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
