//! Injected observability sink
//!
//! Components report job and host events through an [`ObservabilitySink`]
//! handed to them at construction. There are no process-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::SystemType;
use crate::exec::ExecError;
use crate::job::{JobReport, JobState};
use crate::status::SystemStatus;

/// Receiver of orchestrator events. Every method defaults to a no-op.
pub trait ObservabilitySink: Send + Sync {
    fn job_completed(&self, _report: &JobReport) {}

    fn attempt_failed(&self, _system_type: SystemType, _attempt: u32, _error: &ExecError) {}

    fn host_ingested(&self, _system_type: SystemType, _host: &str) {}

    fn host_failed(&self, _system_type: SystemType, _host: &str, _error: &str) {}

    fn status_changed(&self, _system: &str, _from: SystemStatus, _to: SystemStatus) {}
}

/// Sink that drops every event
#[derive(Debug, Default)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {}

/// Sink that turns events into `tracing` records
#[derive(Debug, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn job_completed(&self, report: &JobReport) {
        info!(
            system_type = %report.system_type,
            state = %report.state,
            attempts = report.attempts,
            hosts_ok = report.hosts_ok.len(),
            hosts_failed = report.host_errors.len(),
            "collection job finished"
        );
    }

    fn attempt_failed(&self, system_type: SystemType, attempt: u32, error: &ExecError) {
        warn!(%system_type, attempt, "collection attempt failed: {error}");
    }

    fn host_failed(&self, system_type: SystemType, host: &str, error: &str) {
        debug!(%system_type, host, "host result rejected: {error}");
    }

    fn status_changed(&self, system: &str, from: SystemStatus, to: SystemStatus) {
        info!(system, %from, %to, "status changed");
    }
}

/// Point-in-time copy of a [`CounterSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub jobs_succeeded: u64,
    pub jobs_partially_succeeded: u64,
    pub jobs_failed: u64,
    pub attempts_failed: u64,
    pub hosts_ingested: u64,
    pub hosts_failed: u64,
    pub status_changes: u64,
}

/// Sink counting events per instance
#[derive(Debug, Default)]
pub struct CounterSink {
    jobs_succeeded: AtomicU64,
    jobs_partially_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    attempts_failed: AtomicU64,
    hosts_ingested: AtomicU64,
    hosts_failed: AtomicU64,
    status_changes: AtomicU64,
}

impl CounterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_partially_succeeded: self.jobs_partially_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            attempts_failed: self.attempts_failed.load(Ordering::Relaxed),
            hosts_ingested: self.hosts_ingested.load(Ordering::Relaxed),
            hosts_failed: self.hosts_failed.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
        }
    }
}

impl ObservabilitySink for CounterSink {
    fn job_completed(&self, report: &JobReport) {
        let counter = match report.state {
            JobState::Succeeded => &self.jobs_succeeded,
            JobState::PartiallySucceeded => &self.jobs_partially_succeeded,
            JobState::Failed => &self.jobs_failed,
            JobState::Pending | JobState::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn attempt_failed(&self, _system_type: SystemType, _attempt: u32, _error: &ExecError) {
        self.attempts_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn host_ingested(&self, _system_type: SystemType, _host: &str) {
        self.hosts_ingested.fetch_add(1, Ordering::Relaxed);
    }

    fn host_failed(&self, _system_type: SystemType, _host: &str, _error: &str) {
        self.hosts_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn status_changed(&self, _system: &str, _from: SystemStatus, _to: SystemStatus) {
        self.status_changes.fetch_add(1, Ordering::Relaxed);
    }
}
