//! Inventory of reachable hosts
//!
//! The inventory is an external declarative document mapping
//! group → host → connection parameters. It is the only resource written by
//! one component (the synchronizer) and read by others (dispatchers and the
//! ad-hoc executor).
//!
//! ## Locking
//!
//! [`Inventory`] wraps the store in a read-write lock:
//!
//! - reads take the shared side, so dispatchers can resolve hosts concurrently
//! - writes take the exclusive side for the whole load → modify → save cycle
//!
//! Mutating methods are crate-private; only the synchronizer calls them.

pub mod document;
pub mod error;
pub mod pattern;
pub mod store;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

pub use document::{Credentials, HostVars, InventoryDocument, InventoryEntry, InventoryGroup};
pub use error::{InventoryError, InventoryResult};
pub use pattern::HostPattern;
pub use store::{InventoryStore, MemoryStore, YamlFileStore};

/// Shared, lock-guarded handle on the inventory store
#[derive(Clone)]
pub struct Inventory {
    store: Arc<dyn InventoryStore>,
    lock: Arc<RwLock<()>>,
}

impl Inventory {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self {
            store,
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    /// Consistent copy of the current document
    pub async fn snapshot(&self) -> InventoryResult<InventoryDocument> {
        let _guard = self.lock.read().await;
        self.store.load().await
    }

    pub async fn hosts_in_group(&self, group: &str) -> InventoryResult<Vec<String>> {
        Ok(self.snapshot().await?.hosts_in_group(group))
    }

    pub async fn contains_host(&self, host: &str) -> InventoryResult<bool> {
        Ok(self.snapshot().await?.host(host).is_some())
    }

    /// Hosts matching an ad-hoc pattern, sorted by name
    pub async fn resolve(&self, pattern: &HostPattern) -> InventoryResult<Vec<String>> {
        Ok(pattern.resolve(&self.snapshot().await?))
    }

    /// Add (or replace) a host entry
    #[instrument(skip(self, entry), fields(host = %entry.name, group = %entry.group))]
    pub(crate) async fn add_entry(&self, entry: InventoryEntry) -> InventoryResult<()> {
        let _guard = self.lock.write().await;

        let mut document = self.store.load().await?;
        if let Some(previous) = document.insert(entry) {
            warn!("replaced stale inventory entry from group {previous}");
        }
        self.store.save(&document).await?;

        debug!("inventory entry added");
        Ok(())
    }

    /// Remove a host entry, returning it; `Ok(None)` if it was already absent
    #[instrument(skip(self))]
    pub(crate) async fn remove_host(&self, host: &str) -> InventoryResult<Option<InventoryEntry>> {
        let _guard = self.lock.write().await;

        let mut document = self.store.load().await?;
        match document.remove(host) {
            Some(entry) => {
                self.store.save(&document).await?;
                debug!("inventory entry removed from {}", entry.group);
                Ok(Some(entry))
            }
            None => {
                debug!("inventory entry already absent");
                Ok(None)
            }
        }
    }
}
