//! RetentionActor - Purges old metric samples and log entries
//!
//! Runs once at startup, then on every cleanup interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetentionConfig;
use crate::storage::{LogLevel, NewLog, StorageBackend, StorageResult};

use super::messages::RetentionCommand;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub metrics_deleted: usize,
    pub logs_deleted: usize,
}

pub struct RetentionActor {
    storage: Arc<dyn StorageBackend>,

    config: RetentionConfig,

    command_rx: mpsc::Receiver<RetentionCommand>,
}

impl RetentionActor {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        config: RetentionConfig,
        command_rx: mpsc::Receiver<RetentionCommand>,
    ) -> Self {
        Self {
            storage,
            config,
            command_rx,
        }
    }

    pub async fn run(mut self) {
        debug!("starting retention actor");

        // first tick completes immediately
        let mut ticker = interval(Duration::from_secs(
            u64::from(self.config.cleanup_interval_hours.max(1)) * 3600,
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup(Utc::now()).await {
                        error!("retention cleanup failed: {e}");
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(RetentionCommand::CleanupNow { respond_to }) => {
                        let _ = respond_to.send(self.cleanup(Utc::now()).await);
                    }

                    Some(RetentionCommand::Shutdown) => {
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

        debug!("retention actor stopped");
    }

    #[instrument(skip(self))]
    pub async fn cleanup(&self, now: DateTime<Utc>) -> StorageResult<RetentionReport> {
        let metric_cutoff = now - TimeDelta::days(i64::from(self.config.metric_retention_days));
        let log_cutoff = now - TimeDelta::days(i64::from(self.config.log_retention_days));

        let metrics_deleted = self.storage.delete_metrics_older_than(metric_cutoff).await?;
        let logs_deleted = self.storage.delete_logs_older_than(log_cutoff).await?;

        let report = RetentionReport {
            metrics_deleted,
            logs_deleted,
        };

        info!("retention cleanup removed {metrics_deleted} metrics, {logs_deleted} logs");
        self.storage
            .create_log(
                NewLog::orchestrator(
                    LogLevel::Info,
                    format!(
                        "Retention cleanup deleted {metrics_deleted} metrics and {logs_deleted} logs"
                    ),
                )
                .with_source("retention"),
            )
            .await?;

        Ok(report)
    }
}

/// Handle for controlling a RetentionActor
#[derive(Clone)]
pub struct RetentionHandle {
    sender: mpsc::Sender<RetentionCommand>,
}

impl RetentionHandle {
    pub fn spawn(storage: Arc<dyn StorageBackend>, config: RetentionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = RetentionActor::new(storage, config, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn cleanup_now(&self) -> Result<StorageResult<RetentionReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::CleanupNow { respond_to: tx })
            .await
            .context("failed to send CleanupNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RetentionCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
