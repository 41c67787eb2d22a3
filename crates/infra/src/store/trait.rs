use std::sync::Arc;

use async_trait::async_trait;

use stockroom_core::{
    ContentId, CounterpartyId, DocumentId, HandlingUnitId, LocationId, ProductId,
};
use stockroom_inventory::{
    Counterparty, Document, DocumentLine, HandlingUnit, HandlingUnitContent, HandlingUnitStatus,
    Location, PackingProfile, Product, Stock, StockFilter, StockKey,
};
use stockroom_sscc::{Sscc, SsccSequence};

use super::error::StoreError;

/// Transactional warehouse store.
///
/// The store is the only shared mutable state of the engine. Every business
/// operation opens exactly one transaction, takes the row locks it needs, and
/// either commits or drops the transaction (which rolls it back).
///
/// ## Locking contract
///
/// All `lock_*` methods take an **exclusive row lock held until commit or
/// rollback**. A lock that cannot be obtained within the configured wait
/// fails with [`StoreError::LockTimeout`]; implementations never block
/// indefinitely. Locks are re-entrant within one transaction.
///
/// Callers acquire locks in one global order to stay deadlock free:
/// document, then handling units, then ledger rows (sorted by [`StockKey`]),
/// then the SSCC counter.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

#[async_trait]
impl<S> WarehouseStore for Arc<S>
where
    S: WarehouseStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }
}

/// One open transaction. Dropping it without [`StoreTx::commit`] rolls back.
#[async_trait]
pub trait StoreTx: Send {
    // ---- reference data ----

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;
    async fn product_by_barcode(&mut self, barcode: &str) -> Result<Option<Product>, StoreError>;
    async fn location(&mut self, id: LocationId) -> Result<Option<Location>, StoreError>;
    async fn location_by_cell(&mut self, cell_code: &str) -> Result<Option<Location>, StoreError>;
    async fn counterparty(&mut self, id: CounterpartyId) -> Result<Option<Counterparty>, StoreError>;
    /// Active profile for `(product, pack_type)`.
    async fn packing_profile(
        &mut self,
        product_id: ProductId,
        pack_type: &str,
    ) -> Result<Option<PackingProfile>, StoreError>;

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError>;
    async fn upsert_location(&mut self, location: &Location) -> Result<(), StoreError>;
    async fn upsert_counterparty(&mut self, counterparty: &Counterparty) -> Result<(), StoreError>;
    async fn upsert_packing_profile(&mut self, profile: &PackingProfile) -> Result<(), StoreError>;

    // ---- ledger ----

    /// Lock the ledger row for `key`, creating it at zero if it does not exist.
    async fn lock_stock(&mut self, key: &StockKey) -> Result<Stock, StoreError>;
    /// Persist a row previously returned by [`StoreTx::lock_stock`].
    async fn save_stock(&mut self, row: &Stock) -> Result<(), StoreError>;
    /// Unlocked read.
    async fn stock(&mut self, key: &StockKey) -> Result<Option<Stock>, StoreError>;
    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError>;

    // ---- documents ----

    async fn insert_document(&mut self, doc: &Document) -> Result<(), StoreError>;
    /// Unlocked read.
    async fn document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError>;
    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError>;
    async fn save_document(&mut self, doc: &Document) -> Result<(), StoreError>;
    async fn document_lines(&mut self, doc_id: DocumentId) -> Result<Vec<DocumentLine>, StoreError>;
    async fn find_line(
        &mut self,
        doc_id: DocumentId,
        key: &StockKey,
    ) -> Result<Option<DocumentLine>, StoreError>;
    /// Insert or update a line (by id).
    async fn save_line(&mut self, line: &DocumentLine) -> Result<(), StoreError>;

    // ---- handling units ----

    /// Unlocked read.
    async fn handling_unit(&mut self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError>;
    async fn lock_handling_unit(&mut self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError>;
    /// Fails with [`StoreError::Duplicate`] if the code already exists.
    async fn insert_handling_unit(&mut self, hu: &HandlingUnit) -> Result<(), StoreError>;
    async fn save_handling_unit(&mut self, hu: &HandlingUnit) -> Result<(), StoreError>;
    /// Delete a unit together with its contents.
    async fn delete_handling_unit(&mut self, id: HandlingUnitId) -> Result<(), StoreError>;
    /// Lock every unit whose `reserved_doc_id` is `doc_id`.
    async fn lock_units_reserved_by(&mut self, doc_id: DocumentId) -> Result<Vec<HandlingUnit>, StoreError>;
    /// Units built for `doc_id`, oldest first.
    async fn units_by_source(&mut self, doc_id: DocumentId) -> Result<Vec<HandlingUnit>, StoreError>;
    /// Newest first.
    async fn list_units(
        &mut self,
        status: Option<HandlingUnitStatus>,
        cell_code: Option<&str>,
    ) -> Result<Vec<HandlingUnit>, StoreError>;
    async fn contents(&mut self, hu_id: HandlingUnitId) -> Result<Vec<HandlingUnitContent>, StoreError>;
    /// Insert or update a content row (by id).
    async fn save_content(&mut self, content: &HandlingUnitContent) -> Result<(), StoreError>;
    async fn delete_content(&mut self, id: ContentId) -> Result<(), StoreError>;

    // ---- SSCC counter ----

    /// Lock the counter for `seed.company_prefix`, inserting `seed` if none exists yet.
    async fn lock_sequence(&mut self, seed: &SsccSequence) -> Result<SsccSequence, StoreError>;
    async fn save_sequence(&mut self, seq: &SsccSequence) -> Result<(), StoreError>;

    // ---- completion ----

    async fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;

    async fn rollback(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
