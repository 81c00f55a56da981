//! Storage backends for the system of record
//!
//! The orchestrator talks to persistence exclusively through the
//! [`StorageBackend`] trait, so the backend can be swapped without touching
//! the dispatcher, the sweep or the synchronizer.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with migrations
//! - **In-Memory**: No persistence, for testing or throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use fleetwatch::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./fleetwatch.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{
    ConnectionProfile, LogEntry, LogFilter, LogLevel, MetricQuery, MetricSample, MonitoredSystem,
    NewLog, NewMetric, NewSystem, SystemFilter,
};
