//! Warehouse domain module.
//!
//! This crate contains the business rules of the ledger, the movement
//! documents and the handling units, implemented purely as deterministic
//! domain logic (no IO, no locking, no storage). The engine crate sequences
//! these rules inside store transactions.

pub mod catalog;
pub mod document;
pub mod handling_unit;
pub mod line;
pub mod stock;

pub use catalog::{Counterparty, Location, PackingProfile, Product};
pub use document::{
    Document, DocumentStatus, DocumentType, LedgerEffect, Posting, ProductionLeg, StockSign,
};
pub use handling_unit::{
    ContentKey, HandlingUnit, HandlingUnitContent, HandlingUnitKind, HandlingUnitStatus,
};
pub use line::DocumentLine;
pub use stock::{NegativeStockPolicy, Stock, StockCheck, StockFilter, StockKey};
