//! Handling unit (pallet) lifecycle.
//!
//! ```text
//! created ─putaway─→ putaway ─pick─→ reserved ─finish(outbound)─→ shipped
//!                       ↑              │
//!                       └────unpick────┘  (also on cancel of the outbound document)
//! ```
//!
//! Contents describe the physical makeup of a pallet. Whenever contents are
//! added for a source document, or a pallet is picked/unpicked for an
//! outbound document, the same quantity is mirrored into that document's lines
//! so that finishing the document moves the ledger. Both writes happen in one
//! transaction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use stockroom_core::{
    Actor, DocumentId, EngineError, EngineResult, HandlingUnitId, LocationId, ProductId, Qty,
};
use stockroom_infra::{AuditEntry, StoreTx, WarehouseStore};
use stockroom_inventory::{
    ContentKey, Document, DocumentType, HandlingUnit, HandlingUnitContent, HandlingUnitStatus,
};
use stockroom_sscc::Sscc;

use crate::catalog::{resolve_location, resolve_product, LocationRef, ProductRef};
use crate::documents::{load_view, lock_document, post_line, DocumentView};
use crate::sscc::allocate_in;
use crate::warehouse::Warehouse;

/// A unit together with its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlingUnitView {
    pub unit: HandlingUnit,
    pub contents: Vec<HandlingUnitContent>,
}

impl HandlingUnitView {
    pub fn total_qty(&self) -> Qty {
        self.contents.iter().map(|c| c.qty).sum()
    }

    pub fn content(&self, key: &ContentKey) -> Option<&HandlingUnitContent> {
        self.contents.iter().find(|c| &c.key == key)
    }
}

/// Summary row for the pallets built on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPallet {
    pub id: HandlingUnitId,
    pub sscc: Sscc,
    pub location_id: Option<LocationId>,
    pub created_at: DateTime<Utc>,
    pub total_qty: Qty,
}

/// Quantity taken off a pallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub product_id: ProductId,
    pub qty: Qty,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// When set, the consumed quantity is also posted as a line on this document.
    pub doc_id: Option<DocumentId>,
}

/// Explicit quantity put on a pallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletItem {
    pub product: ProductRef,
    pub qty: Qty,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

/// Packs put on a pallet; the quantity comes from the product's packing profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletPacks {
    pub product: ProductRef,
    pub pack_type: String,
    pub pack_count: Qty,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

async fn lock_unit<T: StoreTx>(tx: &mut T, sscc: &Sscc) -> EngineResult<HandlingUnit> {
    tx.lock_handling_unit(sscc)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("handling unit {sscc}")))
}

async fn optional_location<T: StoreTx>(
    tx: &mut T,
    location: Option<&LocationRef>,
) -> EngineResult<Option<LocationId>> {
    match location {
        Some(location) => Ok(Some(resolve_location(tx, Some(location)).await?.id)),
        None => Ok(None),
    }
}

/// Mirror every content row of `unit` into `doc` as a line at `location`,
/// with `sign` applied to the content quantity.
async fn mirror_contents<T: StoreTx>(
    tx: &mut T,
    doc: &Document,
    unit: &HandlingUnit,
    location: LocationId,
    sign: Qty,
) -> EngineResult<usize> {
    let contents = tx.contents(unit.id).await?;
    for content in &contents {
        post_line(tx, doc, content.key.stock_key(location), content.qty * sign).await?;
    }
    Ok(contents.len())
}

pub struct HandlingUnits<'a, S> {
    warehouse: &'a Warehouse<S>,
}

impl<'a, S: WarehouseStore> HandlingUnits<'a, S> {
    pub(crate) fn new(warehouse: &'a Warehouse<S>) -> Self {
        Self { warehouse }
    }

    fn normalize(&self, scan: &str) -> EngineResult<Sscc> {
        Ok(stockroom_sscc::normalize(scan, self.warehouse.check_digit_mode())?)
    }

    /// New unit with an allocated code, status `created`.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn create_auto(
        &self,
        actor: &Actor,
        location: Option<LocationRef>,
    ) -> EngineResult<HandlingUnit> {
        let mut tx = self.warehouse.begin().await?;
        let location_id = optional_location(&mut tx, location.as_ref()).await?;
        let sscc = allocate_in(&mut tx, self.warehouse.layout()).await?;
        let unit = HandlingUnit::new(sscc, HandlingUnitStatus::Created, location_id, Utc::now());
        tx.insert_handling_unit(&unit).await?;

        let entry = AuditEntry::new(actor.user_id, "hu_create_auto", "handling_unit", &unit.sscc, None);
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(unit)
    }

    /// New unit for a pre-printed code. Conflict if the code is already registered.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn create_manual(
        &self,
        actor: &Actor,
        scan: &str,
        location: Option<LocationRef>,
    ) -> EngineResult<HandlingUnit> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        if tx.lock_handling_unit(&sscc).await?.is_some() {
            return Err(EngineError::conflict(format!("SSCC {sscc} already exists")));
        }
        let location_id = optional_location(&mut tx, location.as_ref()).await?;
        let unit = HandlingUnit::new(sscc, HandlingUnitStatus::Created, location_id, Utc::now());
        tx.insert_handling_unit(&unit).await?;

        let entry = AuditEntry::new(actor.user_id, "hu_create_manual", "handling_unit", &unit.sscc, None);
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(unit)
    }

    /// Store the unit, optionally at a new location.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn putaway(
        &self,
        actor: &Actor,
        scan: &str,
        location: Option<LocationRef>,
    ) -> EngineResult<HandlingUnit> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let mut unit = lock_unit(&mut tx, &sscc).await?;
        let location_id = optional_location(&mut tx, location.as_ref()).await?;
        unit.putaway(location_id)?;
        tx.save_handling_unit(&unit).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "hu_putaway",
            "handling_unit",
            &unit.sscc,
            Some(json!({ "location_id": unit.location_id })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(unit)
    }

    pub async fn get(&self, scan: &str) -> EngineResult<HandlingUnitView> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let unit = tx
            .handling_unit(&sscc)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("handling unit {sscc}")))?;
        let contents = tx.contents(unit.id).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(HandlingUnitView { unit, contents })
    }

    /// Newest first.
    pub async fn list(
        &self,
        status: Option<HandlingUnitStatus>,
        cell_code: Option<&str>,
    ) -> EngineResult<Vec<HandlingUnit>> {
        let mut tx = self.warehouse.begin().await?;
        let units = tx.list_units(status, cell_code).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(units)
    }

    /// Remove a unit and its contents. Shipped or reserved units are kept.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn delete(&self, actor: &Actor, scan: &str) -> EngineResult<()> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let unit = lock_unit(&mut tx, &sscc).await?;
        unit.ensure_deletable()?;
        tx.delete_handling_unit(unit.id).await?;

        let entry = AuditEntry::new(actor.user_id, "hu_delete", "handling_unit", &unit.sscc, None);
        self.warehouse.commit(tx, vec![entry]).await
    }

    /// Take a quantity off one content row, deleting the row at zero.
    #[instrument(skip(self, actor, request), fields(user = %actor.user_id, qty = %request.qty), err)]
    pub async fn consume(
        &self,
        actor: &Actor,
        scan: &str,
        request: ConsumeRequest,
    ) -> EngineResult<HandlingUnitView> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let doc = match request.doc_id {
            Some(doc_id) => {
                let doc = lock_document(&mut tx, doc_id).await?;
                doc.ensure_open()?;
                Some(doc)
            }
            None => None,
        };
        let unit = lock_unit(&mut tx, &sscc).await?;
        if request.qty <= Qty::ZERO {
            return Err(EngineError::invalid("qty must be > 0"));
        }

        let key = ContentKey::new(request.product_id, request.batch, request.expiry_date);
        let mut content = tx
            .contents(unit.id)
            .await?
            .into_iter()
            .find(|c| c.key == key)
            .ok_or_else(|| EngineError::not_found(format!("product {} on handling unit {sscc}", key.product_id)))?;
        let remaining = content.consume(request.qty)?;
        if content.is_empty() {
            tx.delete_content(content.id).await?;
        } else {
            tx.save_content(&content).await?;
        }

        if let Some(doc) = &doc {
            if tx.product(key.product_id).await?.is_none() {
                return Err(EngineError::not_found("product"));
            }
            let location = unit.require_location()?;
            post_line(&mut tx, doc, key.stock_key(location), request.qty).await?;
        }

        let contents = tx.contents(unit.id).await?;
        let entry = AuditEntry::new(
            actor.user_id,
            "hu_consume",
            "handling_unit",
            &unit.sscc,
            Some(json!({
                "product_id": key.product_id,
                "qty": request.qty,
                "remaining": remaining,
                "doc_id": request.doc_id,
            })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(HandlingUnitView { unit, contents })
    }

    /// Allocate `count` (at least one) pallets for a pallet document, stored at
    /// `location` and bound to the document.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn create_for_document(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        location: Option<LocationRef>,
        count: usize,
    ) -> EngineResult<Vec<Sscc>> {
        let mut tx = self.warehouse.begin().await?;
        let doc = lock_document(&mut tx, doc_id).await?;
        doc.ensure_pallet_document()?;
        doc.ensure_open()?;
        let location = resolve_location(&mut tx, location.as_ref()).await?;

        let count = count.max(1);
        let now = Utc::now();
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let sscc = allocate_in(&mut tx, self.warehouse.layout()).await?;
            let mut unit = HandlingUnit::new(sscc, HandlingUnitStatus::Putaway, Some(location.id), now);
            unit.bind_source(doc.id)?;
            tx.insert_handling_unit(&unit).await?;
            codes.push(unit.sscc);
        }

        let entry = AuditEntry::new(
            actor.user_id,
            "hu_create_for_document",
            "document",
            doc.id,
            Some(json!({ "sscc": codes, "cell_code": location.cell_code })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        info!(doc_id = %doc.id, count, "document pallets created");
        Ok(codes)
    }

    /// Pallets built on `doc_id`, oldest first, with their total quantity.
    pub async fn list_for_document(&self, doc_id: DocumentId) -> EngineResult<Vec<DocumentPallet>> {
        let mut tx = self.warehouse.begin().await?;
        if tx.document(doc_id).await?.is_none() {
            return Err(EngineError::not_found(format!("document {doc_id}")));
        }
        let mut pallets = Vec::new();
        for unit in tx.units_by_source(doc_id).await? {
            let total_qty = tx.contents(unit.id).await?.iter().map(|c| c.qty).sum();
            pallets.push(DocumentPallet {
                id: unit.id,
                sscc: unit.sscc,
                location_id: unit.location_id,
                created_at: unit.created_at,
                total_qty,
            });
        }
        self.warehouse.finish_read(tx).await?;
        Ok(pallets)
    }

    /// Put an explicit quantity on a pallet of a pallet document.
    #[instrument(skip(self, actor, item), fields(user = %actor.user_id, qty = %item.qty), err)]
    pub async fn add_item(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        scan: &str,
        item: PalletItem,
    ) -> EngineResult<DocumentView> {
        if item.qty <= Qty::ZERO {
            return Err(EngineError::invalid("qty must be > 0"));
        }
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let (doc, mut unit) = self.lock_for_contents(&mut tx, doc_id, &sscc).await?;
        let product = resolve_product(&mut tx, Some(&item.product)).await?;
        let key = ContentKey::new(product.id, item.batch, item.expiry_date);
        self.put_contents(&mut tx, &doc, &mut unit, key, item.qty).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "hu_add_item",
            "handling_unit",
            &unit.sscc,
            Some(json!({ "doc_id": doc.id, "product_id": product.id, "qty": item.qty })),
        );
        let view = load_view(&mut tx, doc).await?;
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(view)
    }

    /// Put `pack_count` packs on a pallet of a pallet document.
    #[instrument(skip(self, actor, packs), fields(user = %actor.user_id, pack_type = %packs.pack_type), err)]
    pub async fn add_packs(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        scan: &str,
        packs: PalletPacks,
    ) -> EngineResult<DocumentView> {
        if packs.pack_count <= Qty::ZERO {
            return Err(EngineError::invalid("pack_count must be > 0"));
        }
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let (doc, mut unit) = self.lock_for_contents(&mut tx, doc_id, &sscc).await?;
        let product = resolve_product(&mut tx, Some(&packs.product)).await?;
        let profile = tx
            .packing_profile(product.id, &packs.pack_type)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("packing profile {} for product {}", packs.pack_type, product.sku))
            })?;
        let qty = profile.quantity_for(packs.pack_count);
        let key = ContentKey::new(product.id, packs.batch, packs.expiry_date);
        self.put_contents(&mut tx, &doc, &mut unit, key, qty).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "hu_add_packs",
            "handling_unit",
            &unit.sscc,
            Some(json!({
                "doc_id": doc.id,
                "product_id": product.id,
                "pack_type": packs.pack_type,
                "pack_count": packs.pack_count,
                "qty": qty,
            })),
        );
        let view = load_view(&mut tx, doc).await?;
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(view)
    }

    /// Reserve a stored pallet for an outbound document and mirror its
    /// contents into the document's lines.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn pick(&self, actor: &Actor, doc_id: DocumentId, scan: &str) -> EngineResult<DocumentView> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let doc = lock_document(&mut tx, doc_id).await?;
        doc.ensure_type(DocumentType::Outbound)?;
        doc.ensure_open()?;
        let mut unit = lock_unit(&mut tx, &sscc).await?;
        let location = unit.reserve(doc.id)?;
        let lines = mirror_contents(&mut tx, &doc, &unit, location, Qty::ONE).await?;
        tx.save_handling_unit(&unit).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "hu_pick",
            "handling_unit",
            &unit.sscc,
            Some(json!({ "doc_id": doc.id, "lines": lines })),
        );
        let view = load_view(&mut tx, doc).await?;
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(view)
    }

    /// Exact inverse of [`HandlingUnits::pick`].
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn unpick(&self, actor: &Actor, doc_id: DocumentId, scan: &str) -> EngineResult<DocumentView> {
        let sscc = self.normalize(scan)?;
        let mut tx = self.warehouse.begin().await?;
        let doc = lock_document(&mut tx, doc_id).await?;
        doc.ensure_type(DocumentType::Outbound)?;
        doc.ensure_open()?;
        let mut unit = lock_unit(&mut tx, &sscc).await?;
        let location = unit.release_reservation(doc.id)?;
        let lines = mirror_contents(&mut tx, &doc, &unit, location, Qty::NEGATIVE_ONE).await?;
        tx.save_handling_unit(&unit).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "hu_unpick",
            "handling_unit",
            &unit.sscc,
            Some(json!({ "doc_id": doc.id, "lines": lines })),
        );
        let view = load_view(&mut tx, doc).await?;
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(view)
    }

    /// Lock the document and the unit for a content change: the document must
    /// be an open pallet document, and the unit gets bound to it and, if it has
    /// no location yet, placed at the document's `cell_code`.
    async fn lock_for_contents(
        &self,
        tx: &mut S::Tx,
        doc_id: DocumentId,
        sscc: &Sscc,
    ) -> EngineResult<(Document, HandlingUnit)> {
        let doc = lock_document(tx, doc_id).await?;
        doc.ensure_pallet_document()?;
        doc.ensure_open()?;
        let mut unit = lock_unit(tx, sscc).await?;
        unit.bind_source(doc.id)?;
        if unit.location_id.is_none() {
            let cell = doc
                .meta_cell_code()
                .ok_or_else(|| EngineError::invalid(format!("handling unit {sscc} has no location")))?
                .to_string();
            let location = resolve_location(tx, Some(&LocationRef::Cell(cell))).await?;
            unit.location_id = Some(location.id);
        }
        Ok((doc, unit))
    }

    /// Upsert the content row and mirror the quantity into the document's lines.
    async fn put_contents(
        &self,
        tx: &mut S::Tx,
        doc: &Document,
        unit: &mut HandlingUnit,
        key: ContentKey,
        qty: Qty,
    ) -> EngineResult<()> {
        let location = unit.require_location()?;
        let content = match tx.contents(unit.id).await?.into_iter().find(|c| c.key == key) {
            Some(mut content) => {
                content.add(qty);
                content
            }
            None => HandlingUnitContent::new(unit.id, key.clone(), qty),
        };
        tx.save_content(&content).await?;
        post_line(tx, doc, key.stock_key(location), qty).await?;
        tx.save_handling_unit(unit).await?;
        Ok(())
    }
}
