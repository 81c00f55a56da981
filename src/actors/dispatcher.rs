//! CollectionDispatcher - Periodic remote metric collection for one system type
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─┐
//!             ├─▶ spawn job task ─▶ RemoteExecutor ─▶ apply per host ─▶ StorageBackend
//! TriggerNow ─┘        │                                   │
//!                      └── retry with backoff ◀── invocation error
//! ```
//!
//! Every tick starts a fresh job in its own task, so a job stuck in backoff
//! or waiting on a slow engine never delays the next tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetryPolicy;
use crate::exec::{ExecError, ExecutionReport, HostOutcome, HostResult, JobSpec, RemoteExecutor, Target};
use crate::inventory::Inventory;
use crate::job::{CollectionJob, HostApplication, JobReport, JobState};
use crate::observability::ObservabilitySink;
use crate::storage::{LogLevel, NewLog, NewMetric, StorageBackend};
use crate::{CollectedMetrics, SystemId, SystemType};

use super::messages::DispatcherCommand;

const LOG_SOURCE: &str = "collector";

/// Runs collection jobs for one system type
///
/// The runner holds no per-job state, so concurrent jobs can share it.
pub struct CollectionRunner {
    system_type: SystemType,
    storage: Arc<dyn StorageBackend>,
    inventory: Inventory,
    executor: Arc<dyn RemoteExecutor>,
    sink: Arc<dyn ObservabilitySink>,
    policy: RetryPolicy,
}

fn parse_payload(payload: &Value) -> Result<CollectedMetrics, String> {
    if payload.is_null() {
        return Err("no metrics reported".to_string());
    }

    let metrics: CollectedMetrics = serde_json::from_value(payload.clone())
        .map_err(|e| format!("invalid metrics payload: {e}"))?;
    metrics.validate()?;
    Ok(metrics)
}

impl CollectionRunner {
    pub fn new(
        system_type: SystemType,
        storage: Arc<dyn StorageBackend>,
        inventory: Inventory,
        executor: Arc<dyn RemoteExecutor>,
        sink: Arc<dyn ObservabilitySink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            system_type,
            storage,
            inventory,
            executor,
            sink,
            policy,
        }
    }

    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    /// Run one job to a terminal state
    ///
    /// Returns `None` without doing anything if the type's group has no hosts.
    #[instrument(skip(self), fields(system_type = %self.system_type))]
    pub async fn run_job(&self) -> Option<JobReport> {
        let mut job = CollectionJob::new(self.system_type, self.policy.max_attempts);

        // an unreadable inventory is not "no hosts"; the attempt below reports it
        if matches!(self.inventory.hosts_in_group(job.group()).await, Ok(hosts) if hosts.is_empty()) {
            debug!("no hosts in {}, skipping collection", job.group());
            return None;
        }

        loop {
            let attempt = job.begin_attempt();
            debug!("collection attempt {attempt}");

            match self.attempt(job.group()).await {
                Ok((expected, report)) => {
                    self.apply(&mut job, expected, report).await;
                    job.complete();
                    break;
                }
                Err(e) => {
                    self.sink.attempt_failed(self.system_type, attempt, &e);
                    if job.fail_attempt(&e) {
                        warn!(
                            "attempt {attempt} failed: {e}; retrying in {:?}",
                            self.policy.backoff
                        );
                        tokio::time::sleep(self.policy.backoff).await;
                    } else {
                        error!("collection failed after {attempt} attempt(s): {e}");
                        break;
                    }
                }
            }
        }

        let report = job.report();
        self.summarize(&report).await;
        self.sink.job_completed(&report);
        Some(report)
    }

    /// One remote invocation, bounded by the soft and hard timeouts
    ///
    /// Returns the hosts the group held at dispatch time with the report.
    async fn attempt(&self, group: &str) -> Result<(Vec<String>, ExecutionReport), ExecError> {
        let expected = self
            .inventory
            .hosts_in_group(group)
            .await
            .map_err(|e| ExecError::Transient(format!("inventory unavailable: {e}")))?;

        let spec = JobSpec::collection(self.system_type);
        let target = Target::Group(group.to_string());

        let run = self.executor.execute(&spec, &target);
        tokio::pin!(run);
        let soft = tokio::time::sleep(self.policy.soft_timeout);
        tokio::pin!(soft);
        let hard = tokio::time::sleep(self.policy.hard_timeout);
        tokio::pin!(hard);
        let mut warned = false;

        let report = loop {
            tokio::select! {
                result = &mut run => break result?,
                _ = &mut soft, if !warned => {
                    warned = true;
                    warn!("{group} collection still running after {:?}", self.policy.soft_timeout);
                }
                _ = &mut hard => return Err(ExecError::Timeout(self.policy.hard_timeout)),
            }
        };

        Ok((expected, report))
    }

    async fn apply(&self, job: &mut CollectionJob, expected: Vec<String>, report: ExecutionReport) {
        let now = Utc::now();
        let group = job.group().to_string();
        let mut missing: Vec<String> = expected.clone();

        for result in &report.host_results {
            // only hosts targeted by this job may refresh a heartbeat
            let outcome = if expected.contains(&result.host) {
                missing.retain(|host| host != &result.host);
                self.apply_host(result, now).await
            } else {
                self.reject_host(&result.host, None, format!("host {} not in {group}", result.host))
                    .await
            };
            job.record_host(result.host.clone(), outcome);
        }

        for host in missing {
            let outcome = self
                .reject_host(&host, None, "no result reported".to_string())
                .await;
            job.record_host(host, outcome);
        }
    }

    /// Apply one host result in isolation from the others
    async fn apply_host(&self, result: &HostResult, now: chrono::DateTime<Utc>) -> HostApplication {
        let host = result.host.as_str();

        let system = match self.storage.get_system_by_name(host).await {
            Ok(Some(system)) => system,
            Ok(None) => {
                return self
                    .reject_host(host, None, format!("host {host} is not a known system"))
                    .await;
            }
            Err(e) => {
                return self
                    .reject_host(host, None, format!("system lookup failed: {e}"))
                    .await;
            }
        };

        let metrics = match &result.outcome {
            HostOutcome::Failed { error } => {
                return self.reject_host(host, Some(system.id), error.clone()).await;
            }
            HostOutcome::Ok { payload } => match parse_payload(payload) {
                Ok(metrics) => metrics,
                Err(e) => return self.reject_host(host, Some(system.id), e).await,
            },
        };

        match self
            .storage
            .record_collection(NewMetric::new(system.id, metrics, now))
            .await
        {
            Ok(_) => {
                self.sink.host_ingested(self.system_type, host);
                HostApplication::Ingested
            }
            Err(e) => {
                self.reject_host(host, Some(system.id), format!("failed to store metrics: {e}"))
                    .await
            }
        }
    }

    /// Record a failed host; unknown hosts log on the orchestrator's id
    async fn reject_host(&self, host: &str, system_id: Option<SystemId>, error: String) -> HostApplication {
        debug!("host {host} failed: {error}");
        self.sink.host_failed(self.system_type, host, &error);

        let message = format!("{} metrics collection failed on {host}: {error}", self.system_type);
        let log = match system_id {
            Some(id) => NewLog::new(id, LogLevel::Error, message),
            None => NewLog::orchestrator(LogLevel::Error, message),
        };
        self.write_log(log.with_source(LOG_SOURCE)).await;

        HostApplication::Failed(error)
    }

    async fn summarize(&self, report: &JobReport) {
        let log = match report.state {
            JobState::Succeeded | JobState::PartiallySucceeded if !report.hosts_ok.is_empty() => {
                info!(
                    "{} collection {}: {} ok, {} failed",
                    self.system_type,
                    report.state,
                    report.hosts_ok.len(),
                    report.host_errors.len()
                );
                NewLog::orchestrator(
                    LogLevel::Info,
                    format!(
                        "{} metrics collection completed. Hosts ok: {}",
                        self.system_type,
                        report.hosts_ok.len()
                    ),
                )
            }
            JobState::Failed => NewLog::orchestrator(
                LogLevel::Error,
                format!(
                    "{} metrics collection failed after {} attempt(s): {}",
                    self.system_type,
                    report.attempts,
                    report.last_error.as_deref().unwrap_or("unknown error")
                ),
            ),
            _ => return,
        };

        self.write_log(log.with_source(LOG_SOURCE)).await;
    }

    async fn write_log(&self, log: NewLog) {
        if let Err(e) = self.storage.create_log(log).await {
            error!("failed to write log entry: {e}");
        }
    }
}

/// Actor driving a [`CollectionRunner`] on a cadence
pub struct CollectionDispatcher {
    runner: Arc<CollectionRunner>,

    command_rx: mpsc::Receiver<DispatcherCommand>,

    interval_duration: Duration,

    /// In-flight job tasks
    jobs: JoinSet<()>,
}

impl CollectionDispatcher {
    pub fn new(
        runner: CollectionRunner,
        interval_duration: Duration,
        command_rx: mpsc::Receiver<DispatcherCommand>,
    ) -> Self {
        Self {
            runner: Arc::new(runner),
            command_rx,
            interval_duration,
            jobs: JoinSet::new(),
        }
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = interval_at(Instant::now() + self.interval_duration, self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    #[instrument(skip(self), fields(system_type = %self.runner.system_type()))]
    pub async fn run(mut self) {
        debug!("starting dispatcher, interval {:?}", self.interval_duration);

        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let runner = self.runner.clone();
                    self.jobs.spawn(async move {
                        runner.run_job().await;
                    });
                }

                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("collection task panicked: {e}");
                        }
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(DispatcherCommand::TriggerNow { respond_to }) => {
                        debug!("received TriggerNow command");
                        let runner = self.runner.clone();
                        self.jobs.spawn(async move {
                            let _ = respond_to.send(runner.run_job().await);
                        });
                    }

                    Some(DispatcherCommand::UpdateInterval { interval_secs }) => {
                        debug!("updating interval to {interval_secs}s");
                        self.interval_duration = Duration::from_secs(interval_secs.max(1));
                        ticker = self.ticker();
                    }

                    Some(DispatcherCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }

                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        self.jobs.shutdown().await;
        debug!("dispatcher stopped");
    }
}

/// Handle for controlling a CollectionDispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,

    pub system_type: SystemType,
}

impl DispatcherHandle {
    pub fn spawn(runner: CollectionRunner, interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let system_type = runner.system_type();

        let actor = CollectionDispatcher::new(runner, interval, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            system_type,
        }
    }

    /// Run one job immediately and wait for its report
    pub async fn trigger_now(&self) -> Result<Option<JobReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::TriggerNow { respond_to: tx })
            .await
            .context("failed to send TriggerNow command")?;

        rx.await.context("dispatcher dropped the job")
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(DispatcherCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
