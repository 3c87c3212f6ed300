/*!
 * Configuration types for Courier
 */

use crate::error::{CourierError, Result};
use courier_core_interface::{Rule, StorageType, UserRules};
use courier_core_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Number of concurrent worker slots
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Extra attempts for a failed backend save
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Local download cache
    #[serde(default)]
    pub temp: TempConfig,

    /// Lifetime of producer-side file lookups, in seconds
    #[serde(default = "default_lookup_ttl")]
    pub lookup_ttl_secs: u64,

    /// Parallel image fetches inside one telegraph task (0 = workers)
    #[serde(default)]
    pub telegraph_concurrency: usize,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub storages: Vec<StorageConfig>,

    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Local cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempConfig {
    #[serde(default = "default_temp_path")]
    pub base_path: PathBuf,

    /// Keep cache files this many seconds after a transfer (0 = remove at once)
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            base_path: default_temp_path(),
            cache_ttl_secs: 0,
        }
    }
}

impl TempConfig {
    /// Grace period before cache files are removed, if any
    pub fn retention(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

/// One configured storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub storage_type: StorageType,

    #[serde(default = "default_true")]
    pub enable: bool,

    /// Root directory for `local` storages
    #[serde(default)]
    pub base_path: Option<PathBuf>,
}

/// Per-user storage access and routing rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: i64,

    /// Storage names this user may (or, with `blacklist`, may not) use
    #[serde(default)]
    pub storages: Vec<String>,

    /// Treat `storages` as a deny-list
    #[serde(default)]
    pub blacklist: bool,

    #[serde(default)]
    pub apply_rule: bool,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl UserConfig {
    pub fn user_rules(&self) -> UserRules {
        UserRules {
            apply_rule: self.apply_rule,
            rules: self.rules.clone(),
        }
    }

    /// Whether this user may route tasks to `storage`
    pub fn may_use(&self, storage: &str) -> bool {
        let listed = self.storages.iter().any(|name| name == storage);
        if self.blacklist {
            !listed
        } else {
            listed
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: default_retry(),
            temp: TempConfig::default(),
            lookup_ttl_secs: default_lookup_ttl(),
            telegraph_concurrency: 0,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            storages: Vec::new(),
            users: Vec::new(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    3
}

fn default_retry() -> u32 {
    3
}

fn default_lookup_ttl() -> u64 {
    86400
}

fn default_temp_path() -> PathBuf {
    PathBuf::from("cache/")
}

impl CourierConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: CourierConfig =
            toml::from_str(contents).map_err(|e| CourierError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers < 1 {
            return Err(CourierError::Config(format!(
                "workers must be at least 1, got {}",
                self.workers
            )));
        }

        let mut names = HashSet::new();
        for storage in &self.storages {
            if !names.insert(storage.name.as_str()) {
                return Err(CourierError::Config(format!(
                    "duplicate storage name: {}",
                    storage.name
                )));
            }
            if storage.storage_type == StorageType::Local && storage.base_path.is_none() {
                return Err(CourierError::Config(format!(
                    "local storage {} needs a base_path",
                    storage.name
                )));
            }
        }

        let mut users = HashSet::new();
        for user in &self.users {
            if !users.insert(user.id) {
                return Err(CourierError::Config(format!("duplicate user id: {}", user.id)));
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry)
    }

    /// Effective fan-out for telegraph image downloads
    pub fn telegraph_fanout(&self) -> usize {
        if self.telegraph_concurrency == 0 {
            self.workers.max(1)
        } else {
            self.telegraph_concurrency
        }
    }

    pub fn lookup_ttl(&self) -> Duration {
        Duration::from_secs(self.lookup_ttl_secs)
    }

    pub fn user(&self, id: i64) -> Option<&UserConfig> {
        self.users.iter().find(|user| user.id == id)
    }
}
