//! Collection job state machine
//!
//! ```text
//! PENDING ──begin_attempt──▶ RUNNING ──complete──▶ SUCCEEDED | PARTIALLY_SUCCEEDED
//!    ▲                          │
//!    └──── retriable, attempts ─┤
//!          left                 └──fail_attempt──▶ FAILED (terminal)
//! ```
//!
//! The job only tracks state; the dispatcher drives the transitions and does
//! the I/O.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SystemType;
use crate::exec::ExecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::PartiallySucceeded => "PARTIALLY_SUCCEEDED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::PartiallySucceeded | JobState::Failed
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one host once its result was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostApplication {
    Ingested,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CollectionJob {
    system_type: SystemType,
    group: String,
    max_attempts: u32,
    attempts: Vec<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    state: JobState,
    hosts: BTreeMap<String, HostApplication>,
    last_error: Option<String>,
}

impl CollectionJob {
    pub fn new(system_type: SystemType, max_attempts: u32) -> Self {
        Self {
            system_type,
            group: system_type.group_name(),
            max_attempts: max_attempts.max(1),
            attempts: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            state: JobState::Pending,
            hosts: BTreeMap::new(),
            last_error: None,
        }
    }

    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// PENDING → RUNNING; returns the 1-based attempt number
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert_eq!(self.state, JobState::Pending);
        self.attempts.push(Utc::now());
        self.state = JobState::Running;
        self.attempts()
    }

    pub fn record_host(&mut self, host: impl Into<String>, outcome: HostApplication) {
        self.hosts.insert(host.into(), outcome);
    }

    /// RUNNING → SUCCEEDED or PARTIALLY_SUCCEEDED from the recorded hosts
    pub fn complete(&mut self) -> JobState {
        let any_failed = self
            .hosts
            .values()
            .any(|outcome| matches!(outcome, HostApplication::Failed(_)));

        self.state = if any_failed {
            JobState::PartiallySucceeded
        } else {
            JobState::Succeeded
        };
        self.finished_at = Some(Utc::now());
        self.state
    }

    /// Record a whole-invocation failure
    ///
    /// Returns `true` if the job went back to PENDING for another attempt,
    /// `false` if it is now terminally FAILED.
    pub fn fail_attempt(&mut self, error: &ExecError) -> bool {
        self.last_error = Some(error.to_string());
        self.hosts.clear();

        if error.is_retriable() && self.attempts() < self.max_attempts {
            self.state = JobState::Pending;
            true
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(Utc::now());
            false
        }
    }

    pub fn report(&self) -> JobReport {
        let mut hosts_ok = Vec::new();
        let mut host_errors = BTreeMap::new();
        for (host, outcome) in &self.hosts {
            match outcome {
                HostApplication::Ingested => hosts_ok.push(host.clone()),
                HostApplication::Failed(error) => {
                    host_errors.insert(host.clone(), error.clone());
                }
            }
        }

        JobReport {
            system_type: self.system_type,
            group: self.group.clone(),
            state: self.state,
            attempts: self.attempts(),
            attempt_times: self.attempts.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            hosts_ok,
            host_errors,
            last_error: self.last_error.clone(),
        }
    }
}

/// Outcome of one collection job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub system_type: SystemType,
    pub group: String,
    pub state: JobState,
    pub attempts: u32,
    pub attempt_times: Vec<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub hosts_ok: Vec<String>,
    /// host → error, for hosts whose result could not be applied
    pub host_errors: BTreeMap<String, String>,
    /// Last whole-invocation error, if any attempt failed
    pub last_error: Option<String>,
}
