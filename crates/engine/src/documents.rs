//! Document engine.
//!
//! Owns the movement-document state machine and is the entry point that turns
//! intended movements into committed ledger changes.
//!
//! ## Lifecycle
//!
//! ```text
//! create ─→ draft ─start─→ in_progress
//!             │                │
//!             ├──── finish ────┴─→ done       (ledger applied, reserved pallets shipped)
//!             └──── cancel ──────→ canceled   (reserved pallets back to putaway)
//! ```
//!
//! Lines accumulate signed deltas while the document is open; nothing touches
//! the ledger before `finish`. `finish` applies every line through the
//! type-to-effect table in one transaction: either all lines land or none do.
//!
//! ## Lock order
//!
//! document → handling units reserved by it → ledger rows (lines sorted by
//! key; per line the line's own row, then the production row).

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument, warn};

use stockroom_core::{Actor, CounterpartyId, DocumentId, EngineError, EngineResult, Qty};
use stockroom_infra::{AuditEntry, StoreTx, WarehouseStore};
use stockroom_inventory::{
    Document, DocumentLine, DocumentStatus, DocumentType, StockKey,
};

use crate::catalog::{
    production_location, resolve_counterparty, resolve_location, resolve_product, LocationRef,
    ProductRef,
};
use crate::ledger;
use crate::warehouse::Warehouse;

/// A document together with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    pub document: Document,
    pub lines: Vec<DocumentLine>,
}

impl DocumentView {
    /// `qty_fact` of the line for `key`, zero if there is none.
    pub fn qty_for(&self, key: &StockKey) -> Qty {
        self.lines
            .iter()
            .find(|line| &line.key == key)
            .map_or(Qty::ZERO, |line| line.qty_fact)
    }
}

/// One line delta as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub product: ProductRef,
    pub location: LocationRef,
    /// Signed delta added to the line's accumulated quantity.
    pub qty: Qty,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl LineInput {
    pub fn new(product: impl Into<ProductRef>, location: impl Into<LocationRef>, qty: Qty) -> Self {
        Self {
            product: product.into(),
            location: location.into(),
            qty,
            batch: None,
            expiry_date: None,
        }
    }

    pub fn with_batch(mut self, batch: impl Into<String>) -> Self {
        self.batch = Some(batch.into());
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }
}

/// Partial update of a document's header. `None` leaves a field unchanged;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailsUpdate {
    pub counterparty_id: Option<Option<CounterpartyId>>,
    pub meta: Option<Option<JsonValue>>,
}

/// Upsert the line for `key` on an open document: add `delta` to an existing
/// line (never crossing zero) or create it holding the signed delta.
pub(crate) async fn post_line<T: StoreTx>(
    tx: &mut T,
    doc: &Document,
    key: StockKey,
    delta: Qty,
) -> EngineResult<DocumentLine> {
    doc.ensure_open()?;
    let line = match tx.find_line(doc.id, &key).await? {
        Some(mut line) => {
            line.accumulate(delta);
            line
        }
        None => DocumentLine::new(doc.id, key, delta),
    };
    tx.save_line(&line).await?;
    Ok(line)
}

pub(crate) async fn lock_document<T: StoreTx>(tx: &mut T, id: DocumentId) -> EngineResult<Document> {
    tx.lock_document(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("document {id}")))
}

pub(crate) async fn load_view<T: StoreTx>(tx: &mut T, document: Document) -> EngineResult<DocumentView> {
    let lines = tx.document_lines(document.id).await?;
    Ok(DocumentView { document, lines })
}

pub struct DocumentEngine<'a, S> {
    warehouse: &'a Warehouse<S>,
}

impl<'a, S: WarehouseStore> DocumentEngine<'a, S> {
    pub(crate) fn new(warehouse: &'a Warehouse<S>) -> Self {
        Self { warehouse }
    }

    #[instrument(skip(self, actor, meta), fields(user = %actor.user_id), err)]
    pub async fn create(
        &self,
        actor: &Actor,
        doc_type: DocumentType,
        meta: Option<JsonValue>,
        counterparty_id: Option<CounterpartyId>,
    ) -> EngineResult<Document> {
        let mut tx = self.warehouse.begin().await?;
        let counterparty_id = resolve_counterparty(&mut tx, counterparty_id).await?;
        let doc = Document::new(doc_type, actor.user_id, counterparty_id, meta, Utc::now());
        tx.insert_document(&doc).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "document_create",
            "document",
            doc.id,
            Some(json!({ "type": doc_type, "meta": doc.meta })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        info!(doc_id = %doc.id, doc_type = %doc_type, "document created");
        Ok(doc)
    }

    /// Change counterparty (draft only) and/or metadata.
    #[instrument(skip(self, actor, update), fields(user = %actor.user_id), err)]
    pub async fn update_details(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        update: DetailsUpdate,
    ) -> EngineResult<Document> {
        let mut tx = self.warehouse.begin().await?;
        let mut doc = lock_document(&mut tx, doc_id).await?;

        if let Some(counterparty_id) = update.counterparty_id {
            if doc.status != DocumentStatus::Draft {
                return Err(EngineError::conflict(
                    "counterparty can only be changed while the document is a draft",
                ));
            }
            doc.counterparty_id = resolve_counterparty(&mut tx, counterparty_id).await?;
        }
        let meta_updated = update.meta.is_some();
        if let Some(meta) = update.meta {
            doc.meta = meta;
        }
        tx.save_document(&doc).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "document_update",
            "document",
            doc.id,
            Some(json!({ "counterparty_id": doc.counterparty_id, "meta_updated": meta_updated })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(doc)
    }

    /// Upsert a line on an open document.
    #[instrument(skip(self, actor, input), fields(user = %actor.user_id, qty = %input.qty), err)]
    pub async fn add_line(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        input: LineInput,
    ) -> EngineResult<DocumentLine> {
        let mut tx = self.warehouse.begin().await?;
        let doc = lock_document(&mut tx, doc_id).await?;
        doc.ensure_open()?;
        let product = resolve_product(&mut tx, Some(&input.product)).await?;
        let location = resolve_location(&mut tx, Some(&input.location)).await?;

        let key = StockKey::new(product.id, location.id, input.batch, input.expiry_date);
        let line = post_line(&mut tx, &doc, key, input.qty).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "document_line_add",
            "document",
            doc.id,
            Some(json!({ "line_id": line.id, "qty": input.qty })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(line)
    }

    /// Barcode + cell scan; otherwise identical to [`DocumentEngine::add_line`].
    #[allow(clippy::too_many_arguments)]
    pub async fn scan(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        barcode: &str,
        cell_code: &str,
        qty: Qty,
        batch: Option<String>,
        expiry_date: Option<NaiveDate>,
    ) -> EngineResult<DocumentLine> {
        let input = LineInput {
            product: ProductRef::Barcode(barcode.to_string()),
            location: LocationRef::cell(cell_code),
            qty,
            batch,
            expiry_date,
        };
        self.add_line(actor, doc_id, input).await
    }

    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn start(&self, actor: &Actor, doc_id: DocumentId) -> EngineResult<Document> {
        let mut tx = self.warehouse.begin().await?;
        let mut doc = lock_document(&mut tx, doc_id).await?;
        doc.start()?;
        tx.save_document(&doc).await?;

        let entry = AuditEntry::new(actor.user_id, "document_start", "document", doc.id, None);
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(doc)
    }

    /// Apply every line to the ledger and close the document.
    ///
    /// Outbound documents also ship every handling unit they reserved.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn finish(&self, actor: &Actor, doc_id: DocumentId) -> EngineResult<Document> {
        let policy = self.warehouse.policy();
        let mut tx = self.warehouse.begin().await?;
        let mut doc = lock_document(&mut tx, doc_id).await?;
        doc.ensure_open()?;

        let effect = doc.doc_type.ledger_effect();
        let production = if effect.needs_production_location() {
            Some(production_location(&mut tx, &policy.production_location_code).await?.id)
        } else {
            None
        };

        let mut reserved = if doc.doc_type == DocumentType::Outbound {
            tx.lock_units_reserved_by(doc.id).await?
        } else {
            Vec::new()
        };

        let mut lines = tx.document_lines(doc.id).await?;
        lines.sort_by(|a, b| a.key.cmp(&b.key));

        let mut entries = Vec::new();
        for line in &lines {
            let postings = effect.postings(line, production)?;
            ledger::post(&mut tx, &postings, &policy.negative_stock, actor).await?;
            if doc.doc_type == DocumentType::ProductionReceipt {
                entries.push(AuditEntry::new(
                    actor.user_id,
                    "production_receipt_line",
                    "document",
                    doc.id,
                    Some(json!({
                        "line_id": line.id,
                        "qty": line.qty_fact,
                        "note": "qty added, production location not decremented",
                    })),
                ));
            }
        }

        for unit in &mut reserved {
            unit.ship();
            tx.save_handling_unit(unit).await?;
        }

        doc.finish(Utc::now())?;
        tx.save_document(&doc).await?;

        entries.insert(
            0,
            AuditEntry::new(
                actor.user_id,
                "document_finish",
                "document",
                doc.id,
                Some(json!({ "type": doc.doc_type, "lines": lines.len(), "shipped": reserved.len() })),
            ),
        );
        self.warehouse.commit(tx, entries).await?;
        info!(
            doc_id = %doc.id,
            doc_type = %doc.doc_type,
            lines = lines.len(),
            shipped = reserved.len(),
            "document finished"
        );
        Ok(doc)
    }

    /// Close without touching the ledger. Outbound documents release their
    /// reserved units back to putaway. Cancelling a closed document is a no-op.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn cancel(&self, actor: &Actor, doc_id: DocumentId) -> EngineResult<Document> {
        let mut tx = self.warehouse.begin().await?;
        let mut doc = lock_document(&mut tx, doc_id).await?;
        if doc.is_closed() {
            self.warehouse.finish_read(tx).await?;
            return Ok(doc);
        }

        doc.cancel(Utc::now())?;
        let mut released = 0usize;
        if doc.doc_type == DocumentType::Outbound {
            for mut unit in tx.lock_units_reserved_by(doc.id).await? {
                unit.return_to_putaway();
                tx.save_handling_unit(&unit).await?;
                released += 1;
            }
        }
        tx.save_document(&doc).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "document_cancel",
            "document",
            doc.id,
            Some(json!({ "released": released })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(doc)
    }

    /// Force any status, bypassing transition guards. Admins only.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn admin_override(
        &self,
        actor: &Actor,
        doc_id: DocumentId,
        status: DocumentStatus,
    ) -> EngineResult<Document> {
        if !actor.is_admin() {
            return Err(EngineError::invalid("admin role required"));
        }
        let mut tx = self.warehouse.begin().await?;
        let mut doc = lock_document(&mut tx, doc_id).await?;
        let from = doc.status;
        doc.force_status(status, Utc::now());
        tx.save_document(&doc).await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "document_status_override",
            "document",
            doc.id,
            Some(json!({ "from": from, "to": status })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        warn!(doc_id = %doc.id, %from, to = %status, "document status overridden");
        Ok(doc)
    }

    pub async fn get(&self, doc_id: DocumentId) -> EngineResult<DocumentView> {
        let mut tx = self.warehouse.begin().await?;
        let document = tx
            .document(doc_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("document {doc_id}")))?;
        let view = load_view(&mut tx, document).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(view)
    }
}
