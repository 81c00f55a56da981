//! Inventory synchronizer
//!
//! Keeps the inventory document consistent with the system of record when
//! systems are provisioned or decommissioned. This is the only writer of the
//! inventory.
//!
//! Ordering rules:
//!
//! - provision writes the database row first and the inventory entry second,
//!   deleting the row again if the inventory write fails
//! - decommission removes the inventory entry first and only then deletes the
//!   row, keeping the row if the inventory write fails and putting the entry
//!   back if the row delete fails
//! - a failed probe or post-probe status write never undoes provisioning
//!
//! Both operations hold one mutex for their whole duration.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::exec::ConnectivityProbe;
use crate::inventory::{Credentials, Inventory, InventoryEntry};
use crate::status::SystemStatus;
use crate::storage::{
    ConnectionProfile, LogLevel, MonitoredSystem, NewLog, NewSystem, StorageBackend, StorageError,
};
use crate::{SystemId, SystemType};

const LOG_SOURCE: &str = "provisioning";

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub name: String,
    pub system_type: SystemType,
    pub address: String,
    pub version: Option<String>,
    pub profile: ConnectionProfile,
    pub credentials: Credentials,
    /// Probe connectivity after the inventory entry is written
    pub verify: bool,
}

impl ProvisionRequest {
    /// Request with the conventional connection profile for the type
    pub fn new(
        name: impl Into<String>,
        system_type: SystemType,
        address: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_type,
            address: address.into(),
            version: None,
            profile: ConnectionProfile::default_for(system_type, user),
            credentials: Credentials::default(),
            verify: false,
        }
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        let invalid = |msg: String| Err(OrchestratorError::Validation(msg));

        let len = self.name.chars().count();
        if len == 0 || len > MAX_NAME_LEN {
            return invalid(format!("name must be 1-{MAX_NAME_LEN} characters, got {len}"));
        }
        // names double as inventory hosts and pattern terms
        if self
            .name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | ','))
        {
            return invalid(format!("name '{}' contains whitespace, ':' or ','", self.name));
        }
        if self.address.trim().is_empty() {
            return invalid("address must not be empty".to_string());
        }
        if self.profile.user.trim().is_empty() {
            return invalid("user must not be empty".to_string());
        }
        if self.profile.port == 0 {
            return invalid("port must be between 1 and 65535".to_string());
        }
        if !self.profile.transport.supports(self.system_type) {
            return invalid(format!(
                "transport {} cannot reach {} systems",
                self.profile.transport, self.system_type
            ));
        }
        Ok(())
    }
}

pub struct InventorySynchronizer {
    storage: Arc<dyn StorageBackend>,
    inventory: Inventory,
    probe: Arc<dyn ConnectivityProbe>,
    /// Serialises provision and decommission end to end
    lock: Mutex<()>,
}

impl InventorySynchronizer {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        inventory: Inventory,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            storage,
            inventory,
            probe,
            lock: Mutex::new(()),
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name, system_type = %request.system_type))]
    pub async fn provision(&self, request: ProvisionRequest) -> OrchestratorResult<MonitoredSystem> {
        request.validate()?;

        let _guard = self.lock.lock().await;

        if self.storage.get_system_by_name(&request.name).await?.is_some() {
            return Err(OrchestratorError::Validation(format!(
                "system '{}' already exists",
                request.name
            )));
        }

        let mut system = self
            .storage
            .create_system(NewSystem {
                name: request.name.clone(),
                system_type: request.system_type,
                address: request.address.clone(),
                version: request.version.clone(),
                profile: request.profile.clone(),
            })
            .await
            .map_err(|e| match e {
                StorageError::Conflict(msg) => OrchestratorError::Validation(msg),
                other => other.into(),
            })?;
        debug!("created system {}", system.id);

        let entry = InventoryEntry::for_system(&system, &request.credentials);
        if let Err(e) = self.inventory.add_entry(entry).await {
            error!("inventory update failed: {e}");
            return Err(match self.storage.delete_system(system.id).await {
                Ok(_) => OrchestratorError::Consistency(format!(
                    "failed to add {} to the inventory, system record rolled back: {e}",
                    system.name
                )),
                Err(rollback) => OrchestratorError::Consistency(format!(
                    "failed to add {} to the inventory: {e}; rollback of system {} also failed: {rollback}",
                    system.name, system.id
                )),
            });
        }

        self.log(NewLog::new(
            system.id,
            LogLevel::Info,
            format!("System {} provisioned in {}", system.name, system.system_type.group_name()),
        ))
        .await;

        if request.verify {
            let probe = self.probe.ping(&system.name).await;
            let failure = if probe.success {
                let mut verified = system.clone();
                verified.status = SystemStatus::Online;
                verified.last_heartbeat = Some(Utc::now());
                match self.storage.update_system(&verified).await {
                    Ok(()) => {
                        info!("connectivity verified");
                        system = verified;
                        None
                    }
                    // the row and the entry are committed; only the status is lost
                    Err(e) => Some(format!("host reachable but status update failed: {e}")),
                }
            } else {
                Some(probe.message)
            };

            if let Some(message) = failure {
                warn!("connectivity check failed: {message}");
                self.log(NewLog::new(
                    system.id,
                    LogLevel::Warning,
                    format!("Connectivity check failed: {message}"),
                ))
                .await;
            }
        }

        Ok(system)
    }

    /// Remove a system from the inventory, then from the system of record
    #[instrument(skip(self))]
    pub async fn decommission(&self, id: SystemId) -> OrchestratorResult<MonitoredSystem> {
        let _guard = self.lock.lock().await;

        let system = self
            .storage
            .get_system(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("system {id}")))?;

        let removed = match self.inventory.remove_host(&system.name).await {
            Ok(Some(entry)) => {
                debug!("removed {} from {}", system.name, entry.group);
                Some(entry)
            }
            Ok(None) => {
                debug!("{} was not in the inventory", system.name);
                None
            }
            Err(e) => {
                error!("inventory update failed: {e}");
                return Err(OrchestratorError::Consistency(format!(
                    "failed to remove {} from the inventory, system record kept: {e}",
                    system.name
                )));
            }
        };

        if let Err(e) = self.storage.delete_system(id).await {
            error!("failed to delete system {id}: {e}");
            let restored = match removed {
                Some(entry) => match self.inventory.add_entry(entry).await {
                    Ok(()) => "inventory entry restored".to_string(),
                    Err(restore) => format!("restoring the inventory entry also failed: {restore}"),
                },
                None => "no inventory entry to restore".to_string(),
            };
            return Err(OrchestratorError::Consistency(format!(
                "failed to delete system {} ({id}): {e}; {restored}",
                system.name
            )));
        }
        info!("decommissioned {}", system.name);

        self.log(NewLog::orchestrator(
            LogLevel::Info,
            format!("System {} ({}) decommissioned", system.name, system.id),
        ))
        .await;

        Ok(system)
    }

    async fn log(&self, log: NewLog) {
        if let Err(e) = self.storage.create_log(log.with_source(LOG_SOURCE)).await {
            error!("failed to write log entry: {e}");
        }
    }
}
