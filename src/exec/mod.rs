//! Remote-execution and connectivity-probe collaborators
//!
//! The orchestrator treats the execution engine as a black box: "run this
//! job against this group (or these hosts), tell me what happened on each
//! host". The traits here are that contract; [`ansible::AnsibleExecutor`]
//! is the adapter used by the hub binary.

pub mod ansible;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SystemType;

/// A named job definition to run against a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Definition name, e.g. `linux_metrics`
    pub definition: String,
    pub system_type: SystemType,
}

impl JobSpec {
    /// Collection job for a system type
    pub fn collection(system_type: SystemType) -> Self {
        Self {
            definition: system_type.job_definition(),
            system_type,
        }
    }
}

/// What a job runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Group(String),
    Hosts(Vec<String>),
}

impl Target {
    /// Engine-level host pattern for this target
    pub fn pattern(&self) -> String {
        match self {
            Target::Group(group) => group.clone(),
            Target::Hosts(hosts) => hosts.join(":"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostOutcome {
    /// Host ran the job; `payload` is whatever it reported
    Ok { payload: serde_json::Value },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    pub host: String,
    pub outcome: HostOutcome,
}

impl HostResult {
    pub fn ok(host: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Ok { payload },
        }
    }

    pub fn failed(host: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, HostOutcome::Ok { .. })
    }
}

/// Engine-reported overall status of an invocation that produced host results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Successful,
    Failed,
}

/// Per-host counters as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostStats {
    pub ok: u32,
    pub changed: u32,
    pub failures: u32,
    pub unreachable: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub overall_status: OverallStatus,
    pub host_results: Vec<HostResult>,
    pub stats: BTreeMap<String, HostStats>,
}

impl ExecutionReport {
    /// Report built from host results alone, deriving the overall status
    pub fn from_results(host_results: Vec<HostResult>) -> Self {
        let overall_status = if host_results.iter().all(HostResult::is_ok) {
            OverallStatus::Successful
        } else {
            OverallStatus::Failed
        };

        Self {
            overall_status,
            host_results,
            stats: BTreeMap::new(),
        }
    }
}

/// Failure of a whole invocation, before any per-host result exists
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Job definition (playbook) does not exist; retrying cannot help
    #[error("job definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, engine crashed, inventory unreadable, ...
    #[error("transient execution error: {0}")]
    Transient(String),
}

impl ExecError {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ExecError::DefinitionNotFound(_))
    }
}

/// Remote-execution engine
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a job definition against a target
    async fn execute(&self, job: &JobSpec, target: &Target) -> Result<ExecutionReport, ExecError>;

    /// Run one module/command against explicit hosts
    async fn run_ad_hoc(
        &self,
        hosts: &[String],
        module: &str,
        args: &str,
    ) -> Result<Vec<HostResult>, ExecError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub message: String,
}

/// Reachability check for a single inventory host
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn ping(&self, host: &str) -> ProbeResult;
}
