//! Infrastructure layer: transactional store, configuration, audit sinks.

pub mod audit;
pub mod config;
pub mod store;

pub use audit::{AuditEntry, AuditError, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{ConfigError, LedgerPolicy, Settings};
pub use store::{InMemoryStore, StoreError, StoreTx, WarehouseStore};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
