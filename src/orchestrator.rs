//! Orchestrator facade
//!
//! Wires the collaborators into the synchronizer, the ad-hoc executor and
//! the background actors, and exposes the operations callers use.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::actors::{
    CollectionRunner, DispatcherHandle, RetentionHandle, RetentionReport, StatusSweeper,
    SweepHandle, SweepReport,
};
use crate::adhoc::AdHocExecutor;
use crate::config::{RetentionConfig, ScheduleConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::exec::{ConnectivityProbe, HostResult, RemoteExecutor};
use crate::inventory::{Inventory, InventoryStore};
use crate::job::JobReport;
use crate::observability::ObservabilitySink;
use crate::storage::{MetricSample, MonitoredSystem, NewMetric, StorageBackend, SystemFilter};
use crate::synchronizer::{InventorySynchronizer, ProvisionRequest};
use crate::{CollectedMetrics, SystemId, SystemType};

/// External collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageBackend>,
    pub inventory_store: Arc<dyn InventoryStore>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub sink: Arc<dyn ObservabilitySink>,
}

pub struct Orchestrator {
    storage: Arc<dyn StorageBackend>,
    inventory: Inventory,
    synchronizer: InventorySynchronizer,
    adhoc: AdHocExecutor,
    dispatchers: BTreeMap<SystemType, DispatcherHandle>,
    sweep: SweepHandle,
    retention: Option<RetentionHandle>,
}

fn unavailable(component: &str, err: anyhow::Error) -> OrchestratorError {
    OrchestratorError::Unavailable(format!("{component}: {err:#}"))
}

impl Orchestrator {
    /// Spawn one dispatcher per system type, the status sweep and, when
    /// `retention` is set, the retention cleanup
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        schedule: &ScheduleConfig,
        retention: Option<RetentionConfig>,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            storage,
            inventory_store,
            executor,
            probe,
            sink,
        } = collaborators;

        let inventory = Inventory::new(inventory_store);
        let policy = schedule.retry_policy();

        let dispatchers = SystemType::ALL
            .into_iter()
            .map(|system_type| {
                let runner = CollectionRunner::new(
                    system_type,
                    storage.clone(),
                    inventory.clone(),
                    executor.clone(),
                    sink.clone(),
                    policy,
                );
                let interval = schedule.interval_for(system_type);
                debug!("{system_type} dispatcher every {interval:?}");
                (system_type, DispatcherHandle::spawn(runner, interval))
            })
            .collect();

        let sweep = SweepHandle::spawn(
            StatusSweeper::new(storage.clone(), sink.clone()),
            schedule.sweep_interval(),
        );

        let retention = retention.map(|config| RetentionHandle::spawn(storage.clone(), config));

        info!("orchestrator started with inventory {}", inventory.location());

        Self {
            synchronizer: InventorySynchronizer::new(storage.clone(), inventory.clone(), probe),
            adhoc: AdHocExecutor::new(storage.clone(), inventory.clone(), executor),
            storage,
            inventory,
            dispatchers,
            sweep,
            retention,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub async fn get_status(&self, id: SystemId) -> OrchestratorResult<MonitoredSystem> {
        self.storage
            .get_system(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("system {id}")))
    }

    pub async fn list_systems(&self, filter: SystemFilter) -> OrchestratorResult<Vec<MonitoredSystem>> {
        Ok(self.storage.list_systems(filter).await?)
    }

    /// Run one collection job for `system_type` now
    ///
    /// `Ok(None)` means the type has no provisioned hosts.
    pub async fn trigger_collection(&self, system_type: SystemType) -> OrchestratorResult<Option<JobReport>> {
        let handle = self
            .dispatchers
            .get(&system_type)
            .ok_or_else(|| OrchestratorError::NotFound(format!("{system_type} dispatcher")))?;

        handle
            .trigger_now()
            .await
            .map_err(|e| unavailable("dispatcher", e))
    }

    pub async fn provision_system(&self, request: ProvisionRequest) -> OrchestratorResult<MonitoredSystem> {
        self.synchronizer.provision(request).await
    }

    pub async fn decommission_system(&self, id: SystemId) -> OrchestratorResult<MonitoredSystem> {
        self.synchronizer.decommission(id).await
    }

    pub async fn run_ad_hoc(
        &self,
        pattern: &str,
        module: &str,
        args: &str,
    ) -> OrchestratorResult<Vec<HostResult>> {
        self.adhoc.run(pattern, module, args).await
    }

    /// Ingest metrics submitted directly for one system
    ///
    /// Same effect as a successful collection for that host.
    pub async fn record_metric(
        &self,
        id: SystemId,
        metrics: CollectedMetrics,
    ) -> OrchestratorResult<MetricSample> {
        metrics.validate().map_err(OrchestratorError::Validation)?;
        let system = self.get_status(id).await?;

        Ok(self
            .storage
            .record_collection(NewMetric::new(system.id, metrics, Utc::now()))
            .await?)
    }

    pub async fn sweep_now(&self) -> OrchestratorResult<SweepReport> {
        Ok(self
            .sweep
            .sweep_now()
            .await
            .map_err(|e| unavailable("status sweep", e))??)
    }

    /// Run retention cleanup now; `Ok(None)` when retention is disabled
    pub async fn cleanup_now(&self) -> OrchestratorResult<Option<RetentionReport>> {
        match &self.retention {
            Some(handle) => Ok(Some(
                handle
                    .cleanup_now()
                    .await
                    .map_err(|e| unavailable("retention", e))??,
            )),
            None => Ok(None),
        }
    }

    /// Stop every actor and close the storage backend
    pub async fn shutdown(self) -> OrchestratorResult<()> {
        for (system_type, handle) in &self.dispatchers {
            if let Err(e) = handle.shutdown().await {
                warn!("{system_type} dispatcher already stopped: {e:#}");
            }
        }
        if let Err(e) = self.sweep.shutdown().await {
            warn!("status sweep already stopped: {e:#}");
        }
        if let Some(retention) = &self.retention {
            if let Err(e) = retention.shutdown().await {
                warn!("retention already stopped: {e:#}");
            }
        }

        self.storage.close().await?;
        info!("orchestrator stopped");
        Ok(())
    }
}
