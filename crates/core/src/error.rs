//! Engine error model.

use thiserror::Error;

use crate::Qty;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error.
///
/// Every variant describes a rejected operation whose enclosing transaction was
/// rolled back in full. Only [`EngineError::Contention`] is worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A referenced document, product, location, handling unit or content row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The operation clashes with current state (closed document, foreign or
    /// already-reserved handling unit, duplicate code).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input (bad code, non-positive quantity, missing location).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Applying a movement would drive a ledger row (or pallet content) below zero.
    #[error("insufficient stock: {what} (available {available}, requested {requested})")]
    InsufficientStock {
        what: String,
        available: Qty,
        requested: Qty,
    },

    /// Operator-facing configuration fault. Never retried.
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// A lock wait timed out; the caller may retry the whole operation.
    #[error("contention: {0}")]
    Contention(String),

    /// Unexpected backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn insufficient(what: impl Into<String>, available: Qty, requested: Qty) -> Self {
        Self::InsufficientStock {
            what: what.into(),
            available,
            requested,
        }
    }

    pub fn misconfigured(msg: impl Into<String>) -> Self {
        Self::Misconfiguration(msg.into())
    }

    pub fn contention(msg: impl Into<String>) -> Self {
        Self::Contention(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// Stable machine-readable code, e.g. for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidInput(_) => "invalid_input",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Misconfiguration(_) => "misconfiguration",
            Self::Contention(_) => "contention",
            Self::Storage(_) => "storage_error",
        }
    }
}
