//! Infrastructure and service error types.

use thiserror::Error;

use stockroom_core::DomainError;

/// Store operation error.
///
/// These are **infrastructure errors** (backend, constraints, decoding) as
/// opposed to domain errors (validation, lifecycle state).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("failed to decode stored record: {0}")]
    Decode(String),

    /// Raised by the in-memory store's fault injection.
    #[error("injected fault: {0}")]
    Fault(String),
}

/// Error returned by ledger and stocktaking operations.
///
/// Domain failures and store failures are kept apart so callers can show the
/// raw underlying error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Store(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Domain(DomainError::NotFound(_)))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ServiceError::Domain(DomainError::InvalidState(_)))
    }
}
