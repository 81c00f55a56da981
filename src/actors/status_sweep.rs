//! StatusSweepActor - Periodic liveness downgrade from heartbeat staleness
//!
//! The sweep never upgrades a system. Only a successful collection or a
//! provisioning probe brings a system back online.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::SystemId;
use crate::observability::ObservabilitySink;
use crate::status::{SystemStatus, classify_heartbeat};
use crate::storage::{LogLevel, NewLog, StorageBackend, StorageResult, SystemFilter};

use super::messages::SweepCommand;

const LOG_SOURCE: &str = "status_monitor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub system_id: SystemId,
    pub name: String,
    pub from: SystemStatus,
    pub to: SystemStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub transitions: Vec<StatusTransition>,
}

pub struct StatusSweeper {
    storage: Arc<dyn StorageBackend>,
    sink: Arc<dyn ObservabilitySink>,
}

impl StatusSweeper {
    pub fn new(storage: Arc<dyn StorageBackend>, sink: Arc<dyn ObservabilitySink>) -> Self {
        Self { storage, sink }
    }

    /// Reclassify every system as of `now`, persisting downgrades
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> StorageResult<SweepReport> {
        let systems = self.storage.list_systems(SystemFilter::default()).await?;
        let mut report = SweepReport {
            checked: systems.len(),
            transitions: Vec::new(),
        };

        for system in systems {
            let computed = classify_heartbeat(system.last_heartbeat, now);
            if !computed.is_worse_than(system.status) {
                continue;
            }

            // a heartbeat that moved since the listing wins
            match self
                .storage
                .update_status(system.id, computed, system.last_heartbeat)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!("{} changed during sweep, skipping", system.name);
                    continue;
                }
                Err(e) => {
                    error!("failed to update status of {}: {e}", system.name);
                    continue;
                }
            }

            let level = if computed == SystemStatus::Offline {
                LogLevel::Warning
            } else {
                LogLevel::Info
            };
            let message = format!(
                "Status changed from {} to {computed} for {}",
                system.status, system.name
            );
            if let Err(e) = self
                .storage
                .create_log(NewLog::new(system.id, level, message).with_source(LOG_SOURCE))
                .await
            {
                error!("failed to log status change of {}: {e}", system.name);
            }

            info!("{}: {} → {computed}", system.name, system.status);
            self.sink.status_changed(&system.name, system.status, computed);
            report.transitions.push(StatusTransition {
                system_id: system.id,
                name: system.name,
                from: system.status,
                to: computed,
            });
        }

        Ok(report)
    }
}

/// Actor running a [`StatusSweeper`] on a cadence
pub struct StatusSweepActor {
    sweeper: StatusSweeper,

    command_rx: mpsc::Receiver<SweepCommand>,

    interval_duration: Duration,
}

impl StatusSweepActor {
    pub fn new(
        sweeper: StatusSweeper,
        interval_duration: Duration,
        command_rx: mpsc::Receiver<SweepCommand>,
    ) -> Self {
        Self {
            sweeper,
            command_rx,
            interval_duration,
        }
    }

    pub async fn run(mut self) {
        debug!("starting status sweep actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweeper.sweep(Utc::now()).await {
                        error!("status sweep failed: {e}");
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(SweepCommand::SweepNow { respond_to }) => {
                        let _ = respond_to.send(self.sweeper.sweep(Utc::now()).await);
                    }

                    Some(SweepCommand::Shutdown) => {
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

        debug!("status sweep actor stopped");
    }
}

/// Handle for controlling a StatusSweepActor
#[derive(Clone)]
pub struct SweepHandle {
    sender: mpsc::Sender<SweepCommand>,
}

impl SweepHandle {
    pub fn spawn(sweeper: StatusSweeper, interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let actor = StatusSweepActor::new(sweeper, interval, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn sweep_now(&self) -> Result<StorageResult<SweepReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SweepCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SweepCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
