//! Persistence of the inventory document
//!
//! The store only knows how to load and save a whole document. Locking and
//! read-modify-write sequencing live in [`super::Inventory`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::InventoryDocument;
use super::error::{InventoryError, InventoryResult};

/// External resource holding the inventory document
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn load(&self) -> InventoryResult<InventoryDocument>;

    async fn save(&self, document: &InventoryDocument) -> InventoryResult<()>;

    /// Human-readable location, e.g. a file path
    fn location(&self) -> String;
}

/// YAML inventory file, as consumed by ansible's `-i` flag
pub struct YamlFileStore {
    path: PathBuf,
}

impl YamlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> InventoryError {
        InventoryError::Io {
            location: self.location(),
            source,
        }
    }
}

#[async_trait]
impl InventoryStore for YamlFileStore {
    async fn load(&self) -> InventoryResult<InventoryDocument> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("inventory {} does not exist yet", self.path.display());
                return Ok(InventoryDocument::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(InventoryDocument::default());
        }

        let document: InventoryDocument = serde_yaml::from_str(&content)?;
        trace!("loaded inventory with {} groups", document.groups.len());
        Ok(document)
    }

    /// Write to a sibling temp file and rename over the target
    async fn save(&self, document: &InventoryDocument) -> InventoryResult<()> {
        let content = serde_yaml::to_string(document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!("saved inventory to {}", self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Inventory kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<InventoryDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: InventoryDocument) -> Self {
        Self {
            document: Mutex::new(document),
        }
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn load(&self) -> InventoryResult<InventoryDocument> {
        Ok(self.document.lock().await.clone())
    }

    async fn save(&self, document: &InventoryDocument) -> InventoryResult<()> {
        *self.document.lock().await = document.clone();
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
