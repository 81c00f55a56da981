//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds. Statuses, types, levels and
//! transports are stored as their lowercase names.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    ConnectionProfile, LogEntry, LogFilter, MetricQuery, MetricSample, MonitoredSystem, NewLog,
    NewMetric, NewSystem, SystemFilter,
};
use crate::SystemId;
use crate::status::SystemStatus;

const SYSTEM_COLUMNS: &str = "id, name, system_type, address, status, version, last_heartbeat, \
     conn_user, conn_port, transport, created_at, updated_at";

const METRIC_COLUMNS: &str =
    "id, system_id, cpu_usage, memory_usage, disk_usage, network_in, network_out, timestamp";

const LOG_COLUMNS: &str = "id, system_id, level, message, source, timestamp";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode and foreign keys
    ///
    /// ```no_run
    /// # use fleetwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./fleetwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_column<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> StorageResult<T> {
        let raw: String = row.try_get(column)?;
        raw.parse().map_err(StorageError::SerializationError)
    }

    fn system_from_row(row: &SqliteRow) -> StorageResult<MonitoredSystem> {
        let port: i64 = row.try_get("conn_port")?;

        Ok(MonitoredSystem {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            system_type: Self::parse_column(row, "system_type")?,
            address: row.try_get("address")?,
            status: Self::parse_column(row, "status")?,
            version: row.try_get("version")?,
            last_heartbeat: row
                .try_get::<Option<i64>, _>("last_heartbeat")?
                .map(Self::millis_to_timestamp),
            profile: ConnectionProfile {
                user: row.try_get("conn_user")?,
                port: u16::try_from(port).map_err(|_| {
                    StorageError::SerializationError(format!("invalid port {port}"))
                })?,
                transport: Self::parse_column(row, "transport")?,
            },
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
        })
    }

    fn metric_from_row(row: &SqliteRow) -> StorageResult<MetricSample> {
        Ok(MetricSample {
            id: row.try_get("id")?,
            system_id: row.try_get("system_id")?,
            cpu_usage: row.try_get("cpu_usage")?,
            memory_usage: row.try_get("memory_usage")?,
            disk_usage: row.try_get("disk_usage")?,
            network_in: row.try_get("network_in")?,
            network_out: row.try_get("network_out")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
        })
    }

    fn log_from_row(row: &SqliteRow) -> StorageResult<LogEntry> {
        Ok(LogEntry {
            id: row.try_get("id")?,
            system_id: row.try_get("system_id")?,
            level: Self::parse_column(row, "level")?,
            message: row.try_get("message")?,
            source: row.try_get("source")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
        })
    }

    async fn insert_metric<'e, E>(executor: E, metric: NewMetric) -> StorageResult<MetricSample>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics (
                system_id, cpu_usage, memory_usage, disk_usage,
                network_in, network_out, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric.system_id)
        .bind(metric.metrics.cpu_usage)
        .bind(metric.metrics.memory_usage)
        .bind(metric.metrics.disk_usage)
        .bind(metric.metrics.network_in)
        .bind(metric.metrics.network_out)
        .bind(Self::timestamp_to_millis(&metric.timestamp))
        .execute(executor)
        .await?;

        Ok(metric.into_sample(result.last_insert_rowid()))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, system), fields(name = %system.name))]
    async fn create_system(&self, system: NewSystem) -> StorageResult<MonitoredSystem> {
        let now = Utc::now();
        let now_millis = Self::timestamp_to_millis(&now);

        let result = sqlx::query(
            r#"
            INSERT INTO systems (
                name, system_type, address, status, version, last_heartbeat,
                conn_user, conn_port, transport, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&system.name)
        .bind(system.system_type.as_str())
        .bind(&system.address)
        .bind(SystemStatus::Offline.as_str())
        .bind(&system.version)
        .bind(&system.profile.user)
        .bind(i64::from(system.profile.port))
        .bind(system.profile.transport.as_str())
        .bind(now_millis)
        .bind(now_millis)
        .execute(&self.pool)
        .await?;

        debug!("created system with id {}", result.last_insert_rowid());

        Ok(MonitoredSystem {
            id: result.last_insert_rowid(),
            name: system.name,
            system_type: system.system_type,
            address: system.address,
            status: SystemStatus::Offline,
            version: system.version,
            last_heartbeat: None,
            profile: system.profile,
            // round-trip through millis so the value matches what a read returns
            created_at: Self::millis_to_timestamp(now_millis),
            updated_at: Self::millis_to_timestamp(now_millis),
        })
    }

    #[instrument(skip(self))]
    async fn get_system(&self, id: SystemId) -> StorageResult<Option<MonitoredSystem>> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::system_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_system_by_name(&self, name: &str) -> StorageResult<Option<MonitoredSystem>> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE name = ?");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::system_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_systems(&self, filter: SystemFilter) -> StorageResult<Vec<MonitoredSystem>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE 1 = 1"));

        if let Some(system_type) = filter.system_type {
            builder.push(" AND system_type = ").push_bind(system_type.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::system_from_row).collect()
    }

    #[instrument(skip(self, system), fields(id = system.id))]
    async fn update_system(&self, system: &MonitoredSystem) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE systems SET
                name = ?, system_type = ?, address = ?, status = ?, version = ?,
                last_heartbeat = ?, conn_user = ?, conn_port = ?, transport = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&system.name)
        .bind(system.system_type.as_str())
        .bind(&system.address)
        .bind(system.status.as_str())
        .bind(&system.version)
        .bind(system.last_heartbeat.as_ref().map(Self::timestamp_to_millis))
        .bind(&system.profile.user)
        .bind(i64::from(system.profile.port))
        .bind(system.profile.transport.as_str())
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(system.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("system {}", system.id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: SystemId,
        status: SystemStatus,
        observed_heartbeat: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        // `IS` compares NULL to NULL as equal
        let result = sqlx::query(
            "UPDATE systems SET status = ?, updated_at = ? WHERE id = ? AND last_heartbeat IS ?",
        )
        .bind(status.as_str())
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .bind(observed_heartbeat.as_ref().map(Self::timestamp_to_millis))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete_system(&self, id: SystemId) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        // logs have no foreign key (system 0), so they are removed explicitly
        sqlx::query("DELETE FROM logs WHERE system_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM metrics WHERE system_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM systems WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        debug!("delete system {id}: deleted={deleted}");
        Ok(deleted)
    }

    #[instrument(skip(self, metric), fields(system_id = metric.system_id))]
    async fn create_metric(&self, metric: NewMetric) -> StorageResult<MetricSample> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM systems WHERE id = ?")
            .bind(metric.system_id)
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_none() {
            return Err(StorageError::NotFound(format!("system {}", metric.system_id)));
        }

        Self::insert_metric(&self.pool, metric).await
    }

    #[instrument(skip(self, metric), fields(system_id = metric.system_id))]
    async fn record_collection(&self, metric: NewMetric) -> StorageResult<MetricSample> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE systems SET last_heartbeat = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(Self::timestamp_to_millis(&metric.timestamp))
        .bind(SystemStatus::Online.as_str())
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(metric.system_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // dropping the transaction rolls it back
            return Err(StorageError::NotFound(format!("system {}", metric.system_id)));
        }

        let sample = Self::insert_metric(&mut *tx, metric).await?;
        tx.commit().await?;

        Ok(sample)
    }

    #[instrument(skip(self))]
    async fn query_metrics(&self, query: MetricQuery) -> StorageResult<Vec<MetricSample>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE 1 = 1"));

        if let Some(system_id) = query.system_id {
            builder.push(" AND system_id = ").push_bind(system_id);
        }
        if let Some(since) = query.since {
            builder
                .push(" AND timestamp >= ")
                .push_bind(Self::timestamp_to_millis(&since));
        }
        builder.push(" ORDER BY timestamp ASC, id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let results: Vec<MetricSample> = rows
            .iter()
            .map(Self::metric_from_row)
            .collect::<StorageResult<_>>()?;

        debug!("query returned {} metrics", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn delete_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old metrics", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self, log), fields(system_id = log.system_id, level = %log.level))]
    async fn create_log(&self, log: NewLog) -> StorageResult<LogEntry> {
        let result = sqlx::query(
            "INSERT INTO logs (system_id, level, message, source, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(log.system_id)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(&log.source)
        .bind(Self::timestamp_to_millis(&log.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(log.into_entry(result.last_insert_rowid()))
    }

    #[instrument(skip(self))]
    async fn query_logs(&self, filter: LogFilter) -> StorageResult<Vec<LogEntry>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM logs WHERE 1 = 1"));

        if let Some(system_id) = filter.system_id {
            builder.push(" AND system_id = ").push_bind(system_id);
        }
        if let Some(level) = filter.level {
            builder.push(" AND level = ").push_bind(level.as_str());
        }
        if let Some(source) = filter.source {
            builder.push(" AND source = ").push_bind(source);
        }
        if let Some(since) = filter.since {
            builder
                .push(" AND timestamp >= ")
                .push_bind(Self::timestamp_to_millis(&since));
        }
        builder.push(" ORDER BY timestamp ASC, id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::log_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn delete_logs_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM logs WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old logs", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (systems,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM systems")
            .fetch_one(&self.pool)
            .await?;
        let (metrics,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.pool)
            .await?;
        let (logs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(format!(
            "SQLite: {} systems, {} metrics, {} logs, {:.2} MB on disk",
            systems,
            metrics,
            logs,
            file_size as f64 / 1_000_000.0
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
