use thiserror::Error;

use stockroom_core::EngineError;

/// Store operation error.
///
/// These are **infrastructure errors** (lock waits, uniqueness, backend faults)
/// as opposed to the business rule failures carried by `EngineError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured wait.
    #[error("lock wait timed out on {0}")]
    LockTimeout(String),

    /// A unique key already exists.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Anything else the backend reported.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn poisoned() -> Self {
        Self::Backend("lock poisoned".to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout(what) => EngineError::contention(format!("lock wait timed out on {what}")),
            StoreError::Duplicate(what) => EngineError::conflict(format!("{what} already exists")),
            StoreError::Backend(msg) => EngineError::storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_becomes_retryable_contention() {
        let err: EngineError = StoreError::LockTimeout("stock row".into()).into();
        assert!(matches!(err, EngineError::Contention(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn duplicate_becomes_conflict() {
        let err: EngineError = StoreError::Duplicate("SSCC 046070461500000018".into()).into();
        assert_eq!(err, EngineError::conflict("SSCC 046070461500000018 already exists"));
    }

    #[test]
    fn backend_is_not_retryable() {
        let err: EngineError = StoreError::backend("connection reset").into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_retryable());
    }
}
