//! Engine configuration.
//!
//! Settings resolve with the precedence: per-call options override
//! environment variables, which override the YAML config file, which
//! overrides built-in defaults.

use crate::cache::CacheMode;
use crate::provider::RateLimitSpec;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default cache entry TTL in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Disable the cache entirely.
    #[serde(default)]
    pub no_cache: bool,

    /// Bypass cache reads but still write fresh results.
    #[serde(default)]
    pub refresh_cache: bool,

    /// Maximum provider units holding a rate token at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-provider deadline in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Per-target deadline in seconds.
    #[serde(default = "default_target_deadline_secs")]
    pub target_deadline_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,

    /// Directory for the persistent cache; unset keeps results in memory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Per-provider rate-limit overrides, keyed by provider name.
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitSpec>,
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_max_workers() -> usize {
    50
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_target_deadline_secs() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff_secs() -> f64 {
    1.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_backoff_secs() -> f64 {
    4.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            no_cache: false,
            refresh_cache: false,
            max_workers: default_max_workers(),
            provider_timeout_secs: default_provider_timeout_secs(),
            target_deadline_secs: default_target_deadline_secs(),
            retry_attempts: default_retry_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            backoff_factor: default_backoff_factor(),
            max_backoff_secs: default_max_backoff_secs(),
            cache_dir: None,
            rate_limits: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration: defaults, then the YAML file if given, then
    /// the process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.overlay_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies recognized environment keys from a lookup function.
    pub fn overlay_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("CACHE_TTL").and_then(|v| v.parse().ok()) {
            self.cache_ttl_secs = v;
        }
        if let Some(v) = get("NO_CACHE") {
            self.no_cache = parse_bool(&v);
        }
        if let Some(v) = get("REFRESH_CACHE") {
            self.refresh_cache = parse_bool(&v);
        }
        if let Some(v) = get("MAX_WORKERS").and_then(|v| v.parse().ok()) {
            self.max_workers = v;
        }
        if let Some(v) = get("TIMEOUT").and_then(|v| v.parse().ok()) {
            self.provider_timeout_secs = v;
        }
        if let Some(v) = get("RETRY_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.retry_attempts = v;
        }
        if let Some(v) = get("OSPREY_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn target_deadline(&self) -> Duration {
        Duration::from_secs(self.target_deadline_secs)
    }

    pub fn cache_mode(&self) -> CacheMode {
        if self.no_cache {
            CacheMode::Disabled
        } else if self.refresh_cache {
            CacheMode::Refresh
        } else {
            CacheMode::ReadWrite
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_backoff: Duration::from_secs_f64(self.initial_backoff_secs),
            backoff_factor: self.backoff_factor,
            max_backoff: Duration::from_secs_f64(self.max_backoff_secs),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl_secs, 86_400);
        assert_eq!(config.max_workers, 50);
        assert_eq!(config.provider_timeout_secs, 30);
        assert_eq!(config.target_deadline_secs, 60);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.cache_mode(), CacheMode::ReadWrite);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let yaml = "cache_ttl_secs: 1200\nmax_workers: 10\n";
        let mut config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache_ttl_secs, 1200);

        let env: HashMap<&str, &str> =
            [("CACHE_TTL", "600"), ("NO_CACHE", "true"), ("TIMEOUT", "5")]
                .into_iter()
                .collect();
        config.overlay_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.cache_ttl_secs, 600);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.provider_timeout_secs, 5);
        assert_eq!(config.cache_mode(), CacheMode::Disabled);
    }

    #[test]
    fn test_refresh_mode() {
        let mut config = EngineConfig::default();
        config.refresh_cache = true;
        assert_eq!(config.cache_mode(), CacheMode::Refresh);
        // no_cache wins over refresh
        config.no_cache = true;
        assert_eq!(config.cache_mode(), CacheMode::Disabled);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = EngineConfig::default();
        config.retry_attempts = 5;
        config.max_backoff_secs = 8.0;
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_backoff, Duration::from_secs(8));
    }

    #[test]
    fn test_yaml_rate_limit_overrides() {
        let yaml = r#"
rate_limits:
  shodan:
    tokens_per_second: 0.5
    capacity: 1.0
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        let spec = config.rate_limits.get("shodan").unwrap();
        assert!((spec.tokens_per_second - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bool_parsing() {
        for v in ["1", "true", "YES", "on"] {
            assert!(parse_bool(v));
        }
        for v in ["0", "false", "no", ""] {
            assert!(!parse_bool(v));
        }
    }
}
