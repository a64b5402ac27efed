//! Configuration system for Sluice.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SLUICE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sluice/config.toml
//!   3. ~/.config/sluice/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::bucket::BucketError;
use crate::rule::RuleTable;

/// Class applied when a request carries no classification.
pub const DEFAULT_CLASS: &str = "gen-user";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub server: ServerConfig,
    pub limiter: LimiterConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind: String,
    pub port: u16,
    /// Mount the /api/buckets, /api/prune and /api/reset endpoints.
    pub admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Run a background task that drops drained buckets.
    pub delete_empty_buckets: bool,
    pub prune_interval_ms: u64,
    /// Bucket capacity for classes that don't set their own.
    pub capacity: u64,
    /// Leak rate in units per second for classes that don't set their own.
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Class used when the request has none, or one that isn't listed.
    pub default_class: String,
    pub classes: BTreeMap<String, ClassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Amount charged against the bucket per request.
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limiter: LimiterConfig::default(),
            rules: RulesConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            admin: true,
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            delete_empty_buckets: true,
            prune_interval_ms: 1000,
            capacity: 10 << 20, // 10 MiB
            rate: 10.0,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(
            DEFAULT_CLASS.to_string(),
            ClassConfig {
                amount: 1 << 20,
                capacity: None,
                rate: None,
            },
        );
        Self {
            default_class: DEFAULT_CLASS.to_string(),
            classes,
        }
    }
}

impl LimiterConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("sluice")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid config: class {class:?}: {source}")]
    InvalidClass {
        class: String,
        #[source]
        source: BucketError,
    },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SluiceConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            SluiceConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SLUICE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SluiceConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject values the limiter cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate("limiter.rate", self.limiter.rate)?;
        if self.limiter.delete_empty_buckets && self.limiter.prune_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "limiter.prune_interval_ms must be non-zero when pruning is enabled".into(),
            ));
        }
        // Per-class checks live with the table the daemon builds from them.
        RuleTable::from_config(&self.limiter, &self.rules)?;
        Ok(())
    }

    /// Apply SLUICE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SLUICE_SERVER__BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("SLUICE_SERVER__PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_SERVER__ADMIN") {
            self.server.admin = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SLUICE_LIMITER__DELETE_EMPTY_BUCKETS") {
            self.limiter.delete_empty_buckets = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SLUICE_LIMITER__PRUNE_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.limiter.prune_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_LIMITER__CAPACITY") {
            if let Ok(c) = v.parse() {
                self.limiter.capacity = c;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_LIMITER__RATE") {
            if let Ok(r) = v.parse() {
                self.limiter.rate = r;
            }
        }
    }
}

fn check_rate(field: &str, rate: f64) -> Result<(), ConfigError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be a positive number, got {rate}"
        )))
    }
}
