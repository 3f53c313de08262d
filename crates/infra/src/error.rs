//! Service-level error model.

use thiserror::Error;

use etchforge_core::DomainError;

use crate::jobs::JobStoreError;

/// Failures of the in-memory store itself (never business-rule violations).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A previous holder of the tenant partition panicked.
    #[error("tenant partition lock poisoned")]
    Poisoned,
    #[error("{table} row {id} already exists")]
    DuplicateRow { table: &'static str, id: String },
    #[error("{table} row belongs to another tenant")]
    TenantMismatch { table: &'static str },
    #[error("{table} row {id} does not exist")]
    MissingRow { table: &'static str, id: String },
    /// A row was written back at a version other than the one it was read at.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    #[error("failed to encode event payload: {0}")]
    Encode(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Poisoned | StoreError::Concurrency(_))
    }
}

/// Error returned by every infrastructure service operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("job error: {0}")]
    Job(String),
}

impl ServiceError {
    /// The domain error behind this failure, if any.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Whether running the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Domain(_) => false,
            ServiceError::Store(e) => e.is_retryable(),
            ServiceError::Job(_) => false,
        }
    }
}

impl From<JobStoreError> for ServiceError {
    fn from(value: JobStoreError) -> Self {
        ServiceError::Job(value.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
