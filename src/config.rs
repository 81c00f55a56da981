use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::SystemType;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Metrics older than this are deleted
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// Log entries older than this are deleted
        #[serde(default = "default_log_retention_days")]
        log_retention_days: u32,

        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            log_retention_days: default_log_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl StorageConfig {
    /// Retention settings, if this backend keeps history worth pruning
    pub fn retention(&self) -> Option<RetentionConfig> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite {
                retention_days,
                log_retention_days,
                cleanup_interval_hours,
                ..
            } => Some(RetentionConfig {
                metric_retention_days: *retention_days,
                log_retention_days: *log_retention_days,
                cleanup_interval_hours: *cleanup_interval_hours,
            }),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleetwatch.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_log_retention_days() -> u32 {
    90
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub metric_retention_days: u32,
    pub log_retention_days: u32,
    pub cleanup_interval_hours: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metric_retention_days: default_retention_days(),
            log_retention_days: default_log_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

/// How often each periodic task runs and how collection jobs retry
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Per-type collection interval in seconds; missing types use `default_interval_secs`
    pub collection_interval_secs: BTreeMap<SystemType, u64>,
    pub default_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub soft_timeout_secs: u64,
    pub hard_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: BTreeMap::new(),
            default_interval_secs: 300,
            sweep_interval_secs: 60,
            max_attempts: 3,
            backoff_secs: 60,
            soft_timeout_secs: 25 * 60,
            hard_timeout_secs: 30 * 60,
        }
    }
}

/// Retry and timeout knobs for one dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ScheduleConfig::default().retry_policy()
    }
}

impl ScheduleConfig {
    pub fn interval_for(&self, system_type: SystemType) -> Duration {
        let secs = self
            .collection_interval_secs
            .get(&system_type)
            .copied()
            .unwrap_or(self.default_interval_secs);
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
            soft_timeout: Duration::from_secs(self.soft_timeout_secs),
            hard_timeout: Duration::from_secs(self.hard_timeout_secs),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("schedule.max_attempts must be at least 1");
        }
        if self.default_interval_secs == 0
            || self.sweep_interval_secs == 0
            || self.collection_interval_secs.values().any(|secs| *secs == 0)
        {
            anyhow::bail!("schedule intervals must be positive");
        }
        if self.soft_timeout_secs > self.hard_timeout_secs {
            anyhow::bail!("schedule.soft_timeout_secs must not exceed hard_timeout_secs");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (defaults to SQLite)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_inventory_path")]
    pub inventory_path: PathBuf,

    #[serde(default = "default_playbooks_dir")]
    pub playbooks_dir: PathBuf,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            inventory_path: default_inventory_path(),
            playbooks_dir: default_playbooks_dir(),
            schedule: ScheduleConfig::default(),
        }
    }
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("./ansible/inventory/hosts.yml")
}

fn default_playbooks_dir() -> PathBuf {
    PathBuf::from("./ansible/playbooks")
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.schedule.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
