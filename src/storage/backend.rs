//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait through which the
//! orchestrator reads and writes the system of record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    LogEntry, LogFilter, MetricQuery, MetricSample, MonitoredSystem, NewLog, NewMetric, NewSystem,
    SystemFilter,
};
use crate::SystemId;
use crate::status::SystemStatus;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Persistence collaborator for systems, metrics and logs
///
/// Every call is individually transactional. Implementations must be
/// `Send + Sync` as they are shared across actors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert a system. Fails with `StorageError::Conflict` on a duplicate name.
    async fn create_system(&self, system: NewSystem) -> StorageResult<MonitoredSystem>;

    async fn get_system(&self, id: SystemId) -> StorageResult<Option<MonitoredSystem>>;

    async fn get_system_by_name(&self, name: &str) -> StorageResult<Option<MonitoredSystem>>;

    /// List systems ordered by id
    async fn list_systems(&self, filter: SystemFilter) -> StorageResult<Vec<MonitoredSystem>>;

    /// Overwrite every mutable column of an existing system
    ///
    /// Fails with `StorageError::NotFound` if the row is gone.
    async fn update_system(&self, system: &MonitoredSystem) -> StorageResult<()>;

    /// Set a system's status only if its heartbeat is still `observed_heartbeat`
    ///
    /// Returns `false` when the row is gone or the heartbeat moved since it
    /// was read, so a concurrent ingestion always wins over a stale downgrade.
    async fn update_status(
        &self,
        id: SystemId,
        status: SystemStatus,
        observed_heartbeat: Option<DateTime<Utc>>,
    ) -> StorageResult<bool>;

    /// Delete a system together with its metrics and logs
    ///
    /// Returns whether a row was deleted.
    async fn delete_system(&self, id: SystemId) -> StorageResult<bool>;

    async fn create_metric(&self, metric: NewMetric) -> StorageResult<MetricSample>;

    /// Store one collected sample and refresh the owning system's heartbeat
    ///
    /// The sample insert, `last_heartbeat = sample.timestamp` and
    /// `status = online` are applied as a single atomic unit.
    async fn record_collection(&self, metric: NewMetric) -> StorageResult<MetricSample>;

    async fn query_metrics(&self, query: MetricQuery) -> StorageResult<Vec<MetricSample>>;

    /// Delete metrics older than the cutoff, returning how many were removed
    async fn delete_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn create_log(&self, log: NewLog) -> StorageResult<LogEntry>;

    async fn query_logs(&self, filter: LogFilter) -> StorageResult<Vec<LogEntry>>;

    /// Delete logs older than the cutoff, returning how many were removed
    async fn delete_logs_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight check that the backend is operational
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable statistics (e.g. "SQLite: 12 systems, 1.2K metrics")
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
