//! Error taxonomy surfaced by orchestrator operations

use thiserror::Error;

use crate::exec::ExecError;
use crate::inventory::InventoryError;
use crate::storage::StorageError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rejected input; never retried
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient execution failure: {0}")]
    TransientExecution(String),

    /// Job definition is missing or unusable
    #[error("job definition error: {0}")]
    Definition(String),

    /// The inventory and the system of record disagree after a failed mutation
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A background actor is gone (shut down or crashed)
    #[error("component unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

impl From<ExecError> for OrchestratorError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::DefinitionNotFound(definition) => OrchestratorError::Definition(definition),
            other => OrchestratorError::TransientExecution(other.to_string()),
        }
    }
}
