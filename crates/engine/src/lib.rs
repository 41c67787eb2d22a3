//! `stockroom-engine`: warehouse transaction engine.
//!
//! Composes the pure domain rules (`stockroom-inventory`, `stockroom-sscc`)
//! over a transactional store (`stockroom-infra`):
//!
//! - [`sscc::SsccAllocator`]: mints codes from the persisted per-prefix counter
//! - [`handling_units::HandlingUnits`]: pallet lifecycle and contents
//! - [`ledger::StockLedger`]: quantity of record per (product, location, batch, expiry)
//! - [`documents::DocumentEngine`]: document state machine, entry point for movements
//!
//! Every operation runs in exactly one store transaction and either commits
//! completely or leaves no trace. Audit entries are recorded after commit.

pub mod catalog;
pub mod documents;
pub mod handling_units;
pub mod ledger;
pub mod sscc;
pub mod warehouse;

pub use catalog::{Catalog, LocationRef, ProductRef};
pub use documents::{DetailsUpdate, DocumentEngine, DocumentView, LineInput};
pub use handling_units::{
    ConsumeRequest, DocumentPallet, HandlingUnitView, HandlingUnits, PalletItem, PalletPacks,
};
pub use ledger::StockLedger;
pub use sscc::SsccAllocator;
pub use warehouse::Warehouse;
