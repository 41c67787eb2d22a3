//! `stockroom-core`: foundation building blocks shared by every stockroom crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the quantity type, the acting principal and the error taxonomy.

pub mod actor;
pub mod entity;
pub mod error;
pub mod id;

pub use actor::{Actor, Role};
pub use entity::Entity;
pub use error::{EngineError, EngineResult};
pub use id::{
    ContentId, CounterpartyId, DocumentId, HandlingUnitId, LineId, LocationId, PackingProfileId,
    ProductId, StockId, UserId,
};

/// Signed decimal quantity used by ledger rows, lines and pallet contents.
pub type Qty = rust_decimal::Decimal;
