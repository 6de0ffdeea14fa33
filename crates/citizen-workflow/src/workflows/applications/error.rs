use super::builder::BuildError;
use super::catalog::CatalogError;
use super::domain::ReferenceNumber;
use super::form::FormError;
use super::repository::{RepositoryError, StorageError};
use super::transition::TransitionError;
use crate::workflows::location::LocationError;
use crate::workflows::reference::ReferenceError;

/// Error raised by the workflow service. Every variant leaves the stored documents as
/// they were before the call.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidTemplate(#[from] BuildError),
    #[error("illegal transition: {0}")]
    IllegalTransition(#[from] TransitionError),
    #[error("document changed since it was read; reload and retry")]
    StaleState,
    #[error("not eligible for a corrigendum: {0}")]
    IneligibleForCorrigendum(String),
    #[error("malformed field: {0}")]
    MalformedField(#[from] FormError),
    #[error("application {0} is withheld")]
    Withheld(ReferenceNumber),
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(RepositoryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl WorkflowError {
    /// Only a stale pre-state is worth re-reading and re-applying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::StaleState)
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Stale { .. } => WorkflowError::StaleState,
            other => WorkflowError::Repository(other),
        }
    }
}
