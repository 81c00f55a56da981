//! Records of the system of record: monitored systems, metric samples, log entries
//!
//! Every record comes in two shapes: the persisted form carrying its row id
//! (`MonitoredSystem`, `MetricSample`, `LogEntry`) and the insert form without
//! one (`NewSystem`, `NewMetric`, `NewLog`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::SystemStatus;
use crate::{CollectedMetrics, ORCHESTRATOR_SYSTEM_ID, SystemId, SystemType, Transport};

/// How the remote-execution engine logs into a system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub user: String,
    pub port: u16,
    pub transport: Transport,
}

impl ConnectionProfile {
    /// Conventional profile for a system type (ssh on 22, winrm on 5986)
    pub fn default_for(system_type: SystemType, user: impl Into<String>) -> Self {
        let transport = Transport::default_for(system_type);
        let port = match transport {
            Transport::Ssh => 22,
            Transport::Winrm | Transport::Remoting => 5986,
        };

        Self {
            user: user.into(),
            port,
            transport,
        }
    }
}

/// A host under monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredSystem {
    pub id: SystemId,

    /// Unique across the fleet; doubles as the inventory host name
    pub name: String,

    pub system_type: SystemType,

    /// Network address the inventory points at
    pub address: String,

    pub status: SystemStatus,

    pub version: Option<String>,

    /// Last successful metric ingestion (None until the first report)
    pub last_heartbeat: Option<DateTime<Utc>>,

    pub profile: ConnectionProfile,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert form of [`MonitoredSystem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSystem {
    pub name: String,
    pub system_type: SystemType,
    pub address: String,
    pub version: Option<String>,
    pub profile: ConnectionProfile,
}

/// One metric reading of one system at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: i64,
    pub system_id: SystemId,

    /// Utilisation percentages (0-100)
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,

    /// Network counters in KB
    pub network_in: f64,
    pub network_out: f64,

    pub timestamp: DateTime<Utc>,
}

/// Insert form of [`MetricSample`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub system_id: SystemId,
    pub metrics: CollectedMetrics,
    pub timestamp: DateTime<Utc>,
}

impl NewMetric {
    pub fn new(system_id: SystemId, metrics: CollectedMetrics, timestamp: DateTime<Utc>) -> Self {
        Self {
            system_id,
            metrics,
            timestamp,
        }
    }

    pub(crate) fn into_sample(self, id: i64) -> MetricSample {
        MetricSample {
            id,
            system_id: self.system_id,
            cpu_usage: self.metrics.cpu_usage,
            memory_usage: self.metrics.memory_usage,
            disk_usage: self.metrics.disk_usage,
            network_in: self.metrics.network_in,
            network_out: self.metrics.network_out,
            timestamp: self.timestamp,
        }
    }
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Append-only operational log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,

    /// Owning system, or [`ORCHESTRATOR_SYSTEM_ID`] for orchestrator events
    pub system_id: SystemId,

    pub level: LogLevel,
    pub message: String,
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Insert form of [`LogEntry`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewLog {
    pub system_id: SystemId,
    pub level: LogLevel,
    pub message: String,
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewLog {
    pub fn new(system_id: SystemId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            system_id,
            level,
            message: message.into(),
            source: None,
            timestamp: Utc::now(),
        }
    }

    /// Entry attached to the synthetic orchestrator system
    pub fn orchestrator(level: LogLevel, message: impl Into<String>) -> Self {
        Self::new(ORCHESTRATOR_SYSTEM_ID, level, message)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn into_entry(self, id: i64) -> LogEntry {
        LogEntry {
            id,
            system_id: self.system_id,
            level: self.level,
            message: self.message,
            source: self.source,
            timestamp: self.timestamp,
        }
    }
}

/// Filter for listing systems; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct SystemFilter {
    pub system_type: Option<SystemType>,
    pub status: Option<SystemStatus>,
}

impl SystemFilter {
    pub fn matches(&self, system: &MonitoredSystem) -> bool {
        self.system_type.is_none_or(|t| t == system.system_type)
            && self.status.is_none_or(|s| s == system.status)
    }
}

/// Metric query; results are ordered oldest first
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub system_id: Option<SystemId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Log query; results are ordered oldest first
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub system_id: Option<SystemId>,
    pub level: Option<LogLevel>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.system_id.is_none_or(|id| id == entry.system_id)
            && self.level.is_none_or(|l| l == entry.level)
            && self
                .source
                .as_deref()
                .is_none_or(|s| entry.source.as_deref() == Some(s))
            && self.since.is_none_or(|since| entry.timestamp >= since)
    }
}
