//! Transactional warehouse store boundary.
//!
//! This module defines the infrastructure-facing abstraction the engine runs
//! its transactions against, an in-memory implementation for tests/dev and a
//! PostgreSQL implementation for production.

pub mod error;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use error::StoreError;
pub use in_memory::{InMemoryStore, InMemoryTx, DEFAULT_LOCK_TIMEOUT};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresStore, PostgresTx};
pub use r#trait::{StoreTx, WarehouseStore};
