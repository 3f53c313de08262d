//! Domain error model.

use thiserror::Error;

use crate::quantity::Quantity;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns (lock poisoning, bus failures) belong to the infra crate's error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// User-correctable input problem, reported against a field.
    #[error("validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    /// An open or countered quote already exists for the same order and vendor.
    #[error("an active quote already exists for this order and vendor")]
    DuplicateActiveQuote,

    #[error("quote has already been accepted")]
    QuoteAlreadyAccepted,

    #[error("quote has expired")]
    QuoteExpired,

    /// The entity is not in a state that allows the requested transition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Quantity,
        available: Quantity,
    },

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Missing entity, or an entity owned by another tenant.
    #[error("not found")]
    NotFound,

    /// Stale version / optimistic concurrency / uniqueness conflict.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    NotFound,
    Consistency,
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient_stock(requested: Quantity, available: Quantity) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation { .. }
            | DomainError::InvalidId(_)
            | DomainError::CurrencyMismatch { .. } => ErrorKind::Validation,
            DomainError::DuplicateActiveQuote
            | DomainError::QuoteAlreadyAccepted
            | DomainError::QuoteExpired
            | DomainError::InvalidTransition(_)
            | DomainError::InsufficientStock { .. }
            | DomainError::Conflict(_) => ErrorKind::StateConflict,
            DomainError::NotFound => ErrorKind::NotFound,
            DomainError::InvariantViolation(_) => ErrorKind::Consistency,
        }
    }

    /// HTTP-equivalent status code for the presentation layer.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 422,
            ErrorKind::StateConflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Consistency => 500,
        }
    }

    /// Stable machine-checkable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation { .. } => "validation_error",
            DomainError::DuplicateActiveQuote => "duplicate_active_quote",
            DomainError::QuoteAlreadyAccepted => "quote_already_accepted",
            DomainError::QuoteExpired => "quote_expired",
            DomainError::InvalidTransition(_) => "invalid_transition",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::CurrencyMismatch { .. } => "currency_mismatch",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound => "not_found",
            DomainError::Conflict(_) => "conflict",
        }
    }
}
