//! Stock ledger.
//!
//! Every mutation locks the row for its key before reading it, so two
//! movements on the same key serialize while unrelated keys proceed in
//! parallel. Rows are created at zero on first touch and never deleted.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, instrument};

use stockroom_core::{Actor, EngineError, EngineResult, Qty};
use stockroom_infra::{AuditEntry, StoreTx, WarehouseStore};
use stockroom_inventory::{NegativeStockPolicy, Posting, Stock, StockCheck, StockFilter, StockKey};

use crate::warehouse::Warehouse;

/// Lock the row for `key` until the enclosing transaction ends, creating it at zero.
pub async fn lock_row<T: StoreTx>(tx: &mut T, key: &StockKey) -> EngineResult<Stock> {
    Ok(tx.lock_stock(key).await?)
}

/// `qty += delta` on a row obtained from [`lock_row`], subject to the negative-stock policy.
pub async fn apply_delta<T: StoreTx>(
    tx: &mut T,
    row: &mut Stock,
    delta: Qty,
    check: StockCheck,
    policy: &NegativeStockPolicy,
    actor: &Actor,
) -> EngineResult<Qty> {
    let qty = row.apply_delta(delta, check, policy, actor, Utc::now())?;
    tx.save_stock(row).await?;
    debug!(key = %row.key, %delta, qty = %qty, "ledger row updated");
    Ok(qty)
}

/// Apply postings in the given order. The first rejected posting aborts the
/// whole sequence; the caller drops the transaction.
pub(crate) async fn post<T: StoreTx>(
    tx: &mut T,
    postings: &[Posting],
    policy: &NegativeStockPolicy,
    actor: &Actor,
) -> EngineResult<()> {
    for posting in postings {
        let mut row = lock_row(tx, &posting.key).await?;
        apply_delta(tx, &mut row, posting.delta, posting.check, policy, actor).await?;
    }
    Ok(())
}

pub struct StockLedger<'a, S> {
    warehouse: &'a Warehouse<S>,
}

impl<'a, S: WarehouseStore> StockLedger<'a, S> {
    pub(crate) fn new(warehouse: &'a Warehouse<S>) -> Self {
        Self { warehouse }
    }

    /// Apply one checked delta in its own transaction.
    #[instrument(skip(self, actor), fields(user = %actor.user_id, key = %key), err)]
    pub async fn adjust(&self, actor: &Actor, key: StockKey, delta: Qty) -> EngineResult<Stock> {
        let mut tx = self.warehouse.begin().await?;
        if tx.product(key.product_id).await?.is_none() {
            return Err(EngineError::not_found("product"));
        }
        if tx.location(key.location_id).await?.is_none() {
            return Err(EngineError::not_found("location"));
        }

        let mut row = lock_row(&mut tx, &key).await?;
        apply_delta(
            &mut tx,
            &mut row,
            delta,
            StockCheck::Enforce,
            &self.warehouse.policy().negative_stock,
            actor,
        )
        .await?;

        let entry = AuditEntry::new(
            actor.user_id,
            "stock_adjust",
            "stock",
            row.id,
            Some(json!({ "delta": delta, "qty": row.qty })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(row)
    }

    /// Unlocked read of one row.
    pub async fn get(&self, key: &StockKey) -> EngineResult<Option<Stock>> {
        let mut tx = self.warehouse.begin().await?;
        let row = tx.stock(key).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(row)
    }

    /// Quantity on hand; zero for a key that was never touched.
    pub async fn qty(&self, key: &StockKey) -> EngineResult<Qty> {
        Ok(self.get(key).await?.map_or(Qty::ZERO, |row| row.qty))
    }

    pub async fn list(&self, filter: &StockFilter) -> EngineResult<Vec<Stock>> {
        let mut tx = self.warehouse.begin().await?;
        let rows = tx.list_stock(filter).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(rows)
    }
}
