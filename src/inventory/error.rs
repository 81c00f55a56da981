//! Error types for inventory operations

use thiserror::Error;

pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Error)]
pub enum InventoryError {
    /// The backing document could not be read or written
    #[error("inventory I/O error at {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing document is not a valid inventory
    #[error("malformed inventory: {0}")]
    Malformed(String),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    /// Store refused the operation (used by non-file stores)
    #[error("inventory store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_yaml::Error> for InventoryError {
    fn from(err: serde_yaml::Error) -> Self {
        InventoryError::Malformed(err.to_string())
    }
}
