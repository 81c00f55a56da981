//! On-demand single commands against a host pattern
//!
//! No scheduling and no retry: the pattern is resolved against the inventory
//! and the matched hosts go straight to the remote-execution engine.

use std::sync::Arc;

use tracing::{error, instrument};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::exec::{HostResult, RemoteExecutor};
use crate::inventory::{HostPattern, Inventory, InventoryError};
use crate::storage::{LogLevel, NewLog, StorageBackend};

const LOG_SOURCE: &str = "ad_hoc";

pub struct AdHocExecutor {
    storage: Arc<dyn StorageBackend>,
    inventory: Inventory,
    executor: Arc<dyn RemoteExecutor>,
}

impl AdHocExecutor {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        inventory: Inventory,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            storage,
            inventory,
            executor,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(
        &self,
        pattern: &str,
        module: &str,
        args: &str,
    ) -> OrchestratorResult<Vec<HostResult>> {
        if module.trim().is_empty() {
            return Err(OrchestratorError::Validation("module must not be empty".to_string()));
        }

        let pattern = HostPattern::parse(pattern).map_err(|e| match e {
            InventoryError::InvalidPattern(msg) => OrchestratorError::Validation(msg),
            other => other.into(),
        })?;

        let hosts = self.inventory.resolve(&pattern).await?;
        if hosts.is_empty() {
            return Err(OrchestratorError::NotFound(format!(
                "no hosts match '{}'",
                pattern.as_str()
            )));
        }

        let command = if args.is_empty() {
            module.to_string()
        } else {
            format!("{module} {args}")
        };

        let results = match self.executor.run_ad_hoc(&hosts, module, args).await {
            Ok(results) => results,
            Err(e) => {
                self.log(
                    LogLevel::Error,
                    format!("Ad-hoc command '{command}' on '{}' failed: {e}", pattern.as_str()),
                )
                .await;
                return Err(e.into());
            }
        };

        let ok = results.iter().filter(|r| r.is_ok()).count();
        self.log(
            LogLevel::Info,
            format!(
                "Ad-hoc command '{command}' on '{}': {ok} ok, {} failed",
                pattern.as_str(),
                results.len() - ok
            ),
        )
        .await;

        Ok(results)
    }

    async fn log(&self, level: LogLevel, message: String) {
        if let Err(e) = self
            .storage
            .create_log(NewLog::orchestrator(level, message).with_source(LOG_SOURCE))
            .await
        {
            error!("failed to write log entry: {e}");
        }
    }
}
