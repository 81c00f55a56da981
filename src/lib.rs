pub mod actors;
pub mod adhoc;
pub mod config;
pub mod error;
pub mod exec;
pub mod inventory;
pub mod job;
pub mod observability;
pub mod orchestrator;
pub mod status;
pub mod storage;
pub mod synchronizer;
pub mod util;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Row identifier of a monitored system
pub type SystemId = i64;

/// Synthetic system id used for orchestrator-level log entries
pub const ORCHESTRATOR_SYSTEM_ID: SystemId = 0;

/// Kind of monitored host. Each kind maps to exactly one inventory group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemType {
    Linux,
    Windows,
    Database,
}

impl SystemType {
    pub const ALL: [SystemType; 3] = [SystemType::Linux, SystemType::Windows, SystemType::Database];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Linux => "linux",
            SystemType::Windows => "windows",
            SystemType::Database => "database",
        }
    }

    /// Inventory group holding every host of this type
    pub fn group_name(&self) -> String {
        format!("{}_servers", self.as_str())
    }

    /// Name of the collection job definition for this type
    pub fn job_definition(&self) -> String {
        format!("{}_metrics", self.as_str())
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(SystemType::Linux),
            "windows" => Ok(SystemType::Windows),
            "database" => Ok(SystemType::Database),
            other => Err(format!("unknown system type '{other}'")),
        }
    }
}

/// How the remote-execution engine reaches a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Ssh,
    Winrm,
    /// PowerShell remoting
    Remoting,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Ssh => "ssh",
            Transport::Winrm => "winrm",
            Transport::Remoting => "remoting",
        }
    }

    /// Whether this transport can reach a host of the given type
    pub fn supports(&self, system_type: SystemType) -> bool {
        match system_type {
            SystemType::Windows => matches!(self, Transport::Winrm | Transport::Remoting),
            SystemType::Linux | SystemType::Database => matches!(self, Transport::Ssh),
        }
    }

    /// Default transport for a system type
    pub fn default_for(system_type: SystemType) -> Self {
        match system_type {
            SystemType::Windows => Transport::Winrm,
            SystemType::Linux | SystemType::Database => Transport::Ssh,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(Transport::Ssh),
            "winrm" => Ok(Transport::Winrm),
            "remoting" | "psrp" => Ok(Transport::Remoting),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// Metric values reported by a single host during one collection job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    #[serde(default)]
    pub network_in: f64,
    #[serde(default)]
    pub network_out: f64,
}

impl CollectedMetrics {
    /// Check utilisation bounds (0-100) and non-negative network counters
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("cpu_usage", self.cpu_usage),
            ("memory_usage", self.memory_usage),
            ("disk_usage", self.disk_usage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{name} out of range: {value}"));
            }
        }

        for (name, value) in [("network_in", self.network_in), ("network_out", self.network_out)] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be non-negative: {value}"));
            }
        }

        Ok(())
    }
}
