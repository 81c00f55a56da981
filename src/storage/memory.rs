//! In-memory storage backend (no persistence)
//!
//! Used for tests and for deployments configured with `"backend": "none"`.
//! All data is lost on restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    LogEntry, LogFilter, MetricQuery, MetricSample, MonitoredSystem, NewLog, NewMetric, NewSystem,
    SystemFilter,
};
use crate::SystemId;
use crate::status::SystemStatus;

#[derive(Default)]
struct MemoryState {
    systems: BTreeMap<SystemId, MonitoredSystem>,
    metrics: Vec<MetricSample>,
    logs: Vec<LogEntry>,
    next_system_id: SystemId,
    next_metric_id: i64,
    next_log_id: i64,
}

impl MemoryState {
    fn insert_metric(&mut self, metric: NewMetric) -> MetricSample {
        self.next_metric_id += 1;
        let sample = metric.into_sample(self.next_metric_id);
        self.metrics.push(sample.clone());
        sample
    }
}

/// In-memory storage backend
///
/// A single lock guards all tables, so every trait call is atomic.
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn take_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_system(&self, system: NewSystem) -> StorageResult<MonitoredSystem> {
        let mut state = self.state.write().await;

        if state.systems.values().any(|s| s.name == system.name) {
            return Err(StorageError::Conflict(format!(
                "system '{}' already exists",
                system.name
            )));
        }

        state.next_system_id += 1;
        let now = Utc::now();
        let row = MonitoredSystem {
            id: state.next_system_id,
            name: system.name,
            system_type: system.system_type,
            address: system.address,
            status: SystemStatus::Offline,
            version: system.version,
            last_heartbeat: None,
            profile: system.profile,
            created_at: now,
            updated_at: now,
        };

        debug!("in-memory backend: created system {} ({})", row.name, row.id);
        state.systems.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_system(&self, id: SystemId) -> StorageResult<Option<MonitoredSystem>> {
        Ok(self.state.read().await.systems.get(&id).cloned())
    }

    async fn get_system_by_name(&self, name: &str) -> StorageResult<Option<MonitoredSystem>> {
        let state = self.state.read().await;
        Ok(state.systems.values().find(|s| s.name == name).cloned())
    }

    async fn list_systems(&self, filter: SystemFilter) -> StorageResult<Vec<MonitoredSystem>> {
        let state = self.state.read().await;
        Ok(state
            .systems
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn update_system(&self, system: &MonitoredSystem) -> StorageResult<()> {
        let mut state = self.state.write().await;

        if state
            .systems
            .values()
            .any(|s| s.name == system.name && s.id != system.id)
        {
            return Err(StorageError::Conflict(format!(
                "system '{}' already exists",
                system.name
            )));
        }

        let row = state
            .systems
            .get_mut(&system.id)
            .ok_or_else(|| StorageError::NotFound(format!("system {}", system.id)))?;

        *row = MonitoredSystem {
            created_at: row.created_at,
            updated_at: Utc::now(),
            ..system.clone()
        };
        Ok(())
    }

    async fn update_status(
        &self,
        id: SystemId,
        status: SystemStatus,
        observed_heartbeat: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;

        match state.systems.get_mut(&id) {
            Some(row) if row.last_heartbeat == observed_heartbeat => {
                row.status = status;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_system(&self, id: SystemId) -> StorageResult<bool> {
        let mut state = self.state.write().await;

        if state.systems.remove(&id).is_none() {
            return Ok(false);
        }

        state.metrics.retain(|m| m.system_id != id);
        state.logs.retain(|l| l.system_id != id);
        debug!("in-memory backend: deleted system {id}");
        Ok(true)
    }

    async fn create_metric(&self, metric: NewMetric) -> StorageResult<MetricSample> {
        let mut state = self.state.write().await;

        if !state.systems.contains_key(&metric.system_id) {
            return Err(StorageError::NotFound(format!("system {}", metric.system_id)));
        }

        Ok(state.insert_metric(metric))
    }

    async fn record_collection(&self, metric: NewMetric) -> StorageResult<MetricSample> {
        let mut state = self.state.write().await;
        let timestamp = metric.timestamp;

        let system = state
            .systems
            .get_mut(&metric.system_id)
            .ok_or_else(|| StorageError::NotFound(format!("system {}", metric.system_id)))?;
        system.last_heartbeat = Some(timestamp);
        system.status = SystemStatus::Online;
        system.updated_at = Utc::now();

        Ok(state.insert_metric(metric))
    }

    async fn query_metrics(&self, query: MetricQuery) -> StorageResult<Vec<MetricSample>> {
        let state = self.state.read().await;

        let mut metrics: Vec<MetricSample> = state
            .metrics
            .iter()
            .filter(|m| query.system_id.is_none_or(|id| id == m.system_id))
            .filter(|m| query.since.is_none_or(|since| m.timestamp >= since))
            .cloned()
            .collect();
        metrics.sort_by_key(|m| (m.timestamp, m.id));

        Ok(take_limit(metrics, query.limit))
    }

    async fn delete_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let count = state.metrics.len();
        state.metrics.retain(|m| m.timestamp >= before);
        Ok(count - state.metrics.len())
    }

    async fn create_log(&self, log: NewLog) -> StorageResult<LogEntry> {
        let mut state = self.state.write().await;
        state.next_log_id += 1;
        let entry = log.into_entry(state.next_log_id);
        state.logs.push(entry.clone());
        Ok(entry)
    }

    async fn query_logs(&self, filter: LogFilter) -> StorageResult<Vec<LogEntry>> {
        let state = self.state.read().await;

        let mut logs: Vec<LogEntry> = state
            .logs
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.timestamp, l.id));

        Ok(take_limit(logs, filter.limit))
    }

    async fn delete_logs_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let count = state.logs.len();
        state.logs.retain(|l| l.timestamp >= before);
        Ok(count - state.logs.len())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("systems".to_string(), state.systems.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let state = self.state.read().await;
        Ok(format!(
            "In-Memory: {} systems, {} metrics, {} logs",
            state.systems.len(),
            state.metrics.len(),
            state.logs.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
