//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::AppConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "ARTIFACT_SYNC";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Log level from ARTIFACT_SYNC_LOG_LEVEL
    pub log_level: Option<String>,
    /// Engine base URL from ARTIFACT_SYNC_ENGINE_URL
    pub engine_url: Option<String>,
    /// Push timeout from ARTIFACT_SYNC_PUSH_TIMEOUT_MS
    pub push_timeout_ms: Option<u64>,
    /// Retry cap from ARTIFACT_SYNC_MAX_ATTEMPTS
    pub max_attempts: Option<u32>,
    /// Backoff jitter from ARTIFACT_SYNC_JITTER
    pub jitter: Option<bool>,
    /// Checkpoint file from ARTIFACT_SYNC_CHECKPOINT
    pub checkpoint: Option<PathBuf>,
    /// Event file from ARTIFACT_SYNC_EVENTS
    pub events: Option<PathBuf>,
    /// Config file from ARTIFACT_SYNC_CONFIG
    pub config_file: Option<PathBuf>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            log_level: get_env("LOG_LEVEL"),
            engine_url: get_env("ENGINE_URL"),
            push_timeout_ms: get_env_parse("PUSH_TIMEOUT_MS"),
            max_attempts: get_env_parse("MAX_ATTEMPTS"),
            jitter: get_env_bool("JITTER"),
            checkpoint: get_env("CHECKPOINT").map(PathBuf::from),
            events: get_env("EVENTS").map(PathBuf::from),
            config_file: get_env("CONFIG").map(PathBuf::from),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.log_level.is_some()
            || self.engine_url.is_some()
            || self.push_timeout_ms.is_some()
            || self.max_attempts.is_some()
            || self.jitter.is_some()
            || self.checkpoint.is_some()
            || self.events.is_some()
            || self.config_file.is_some()
    }

    /// Override file settings with whatever is set in the environment
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(url) = &self.engine_url {
            config.engine.base_url = Some(url.clone());
        }
        if let Some(timeout) = self.push_timeout_ms {
            config.engine.push_timeout_ms = timeout;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(jitter) = self.jitter {
            config.retry.jitter = jitter;
        }
        if let Some(path) = &self.checkpoint {
            config.checkpoint.path = Some(path.clone());
        }
        if let Some(path) = &self.events {
            config.feed.events_path = Some(path.clone());
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_LOG_LEVEL:       {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_ENGINE_URL:      {:?}", ENV_PREFIX, self.engine_url);
        println!("  {}_PUSH_TIMEOUT_MS: {:?}", ENV_PREFIX, self.push_timeout_ms);
        println!("  {}_MAX_ATTEMPTS:    {:?}", ENV_PREFIX, self.max_attempts);
        println!("  {}_JITTER:          {:?}", ENV_PREFIX, self.jitter);
        println!("  {}_CHECKPOINT:      {:?}", ENV_PREFIX, self.checkpoint);
        println!("  {}_EVENTS:          {:?}", ENV_PREFIX, self.events);
        println!("  {}_CONFIG:          {:?}", ENV_PREFIX, self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all ARTIFACT_SYNC environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_LOG_LEVEL        Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_ENGINE_URL       Engine admin REST base URL");
    println!("  {ENV_PREFIX}_PUSH_TIMEOUT_MS  Timeout per engine push in milliseconds");
    println!("  {ENV_PREFIX}_MAX_ATTEMPTS     Push attempts before dead-lettering");
    println!("  {ENV_PREFIX}_JITTER           Randomize retry backoff (true/false)");
    println!("  {ENV_PREFIX}_CHECKPOINT       Path of the cursor checkpoint file");
    println!("  {ENV_PREFIX}_EVENTS           Path of the JSON-lines event file");
    println!("  {ENV_PREFIX}_CONFIG           Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_ENGINE_URL=http://localhost:9443/api/admin");
    println!("  artifact-sync replay --events events.jsonl");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sets variables for the lifetime of the guard
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(name, value)| {
                    let key = format!("{ENV_PREFIX}_{name}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, value);
                    (key, old)
                })
                .collect();
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.engine_url.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_load_and_apply() {
        let _guard = EnvGuard::set(&[
            ("ENGINE_URL", "http://engine:9443"),
            ("PUSH_TIMEOUT_MS", "750"),
            ("JITTER", "off"),
        ]);

        let env_config = EnvConfig::load();
        assert_eq!(env_config.engine_url.as_deref(), Some("http://engine:9443"));
        assert_eq!(env_config.push_timeout_ms, Some(750));
        assert_eq!(env_config.jitter, Some(false));

        let mut config = AppConfig::default();
        env_config.apply_to(&mut config);
        assert_eq!(config.engine.base_url.as_deref(), Some("http://engine:9443"));
        assert_eq!(config.engine.push_timeout_ms, 750);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_unparsable_number_is_ignored() {
        let _guard = EnvGuard::set(&[("MAX_ATTEMPTS", "many")]);
        assert_eq!(EnvConfig::load().max_attempts, None);
    }

    #[test]
    fn test_has_any() {
        let with_events = EnvConfig {
            events: Some(PathBuf::from("events.jsonl")),
            ..Default::default()
        };
        assert!(with_events.has_any());
    }
}
