//! Postgres-backed warehouse store.
//!
//! Row locks are native `SELECT ... FOR UPDATE` locks held until the
//! transaction ends. Ledger rows and SSCC counters are created on first touch
//! with `INSERT ... ON CONFLICT DO NOTHING` followed by the locking select, so
//! two transactions racing to create the same row serialize on the unique
//! index instead of failing.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |----------------------|------------|----------|
//! | `55P03` (lock_not_available) | `LockTimeout` | `lock_timeout` elapsed while waiting for a row lock |
//! | `40P01` (deadlock_detected) | `LockTimeout` | lock cycle broken by the server; safe to retry |
//! | `23505` (unique_violation) | `Duplicate` | SSCC or catalog key already exists |
//! | Any other | `Backend` | network errors, constraint bugs, pool closed |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{
    ContentId, CounterpartyId, DocumentId, EngineError, HandlingUnitId, LineId, LocationId,
    PackingProfileId, ProductId, StockId, UserId,
};
use stockroom_inventory::{
    ContentKey, Counterparty, Document, DocumentLine, HandlingUnit, HandlingUnitContent,
    HandlingUnitKind, HandlingUnitStatus, Location, PackingProfile, Product, Stock, StockFilter,
    StockKey,
};
use stockroom_sscc::{normalize, CheckDigitMode, Sscc, SsccSequence};

use super::error::StoreError;
use super::r#trait::{StoreTx, WarehouseStore};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const STOCK_COLUMNS: &str = "s.id, s.product_id, s.location_id, s.batch, s.expiry_date, s.qty, s.updated_at";
const DOCUMENT_COLUMNS: &str =
    "id, doc_type, status, created_by, counterparty_id, meta, created_at, finished_at";
const LINE_COLUMNS: &str =
    "id, doc_id, product_id, location_id, batch, expiry_date, qty_expected, qty_fact";
const UNIT_COLUMNS: &str =
    "hu.id, hu.sscc, hu.status, hu.location_id, hu.source_doc_id, hu.reserved_doc_id, hu.created_at";
const CONTENT_COLUMNS: &str = "id, hu_id, product_id, batch, expiry_date, qty";

/// Postgres-backed warehouse store.
///
/// `Send + Sync` and cheap to clone; all state lives in the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, lock_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl WarehouseStore for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(PostgresTx { tx })
    }
}

/// Transaction over [`PostgresStore`]. Dropping it rolls back.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        sqlx::query_as::<_, ProductRow>(
            "SELECT id, sku, name, barcode_ean, unit, is_active FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map(|r| r.map(|r| r.0))
        .map_err(|e| map_sqlx_error("product", e))
    }

    async fn product_by_barcode(&mut self, barcode: &str) -> Result<Option<Product>, StoreError> {
        sqlx::query_as::<_, ProductRow>(
            "SELECT id, sku, name, barcode_ean, unit, is_active FROM products WHERE barcode_ean = $1",
        )
        .bind(barcode)
        .fetch_optional(&mut *self.tx)
        .await
        .map(|r| r.map(|r| r.0))
        .map_err(|e| map_sqlx_error("product_by_barcode", e))
    }

    async fn location(&mut self, id: LocationId) -> Result<Option<Location>, StoreError> {
        sqlx::query_as::<_, LocationRow>(
            "SELECT id, warehouse, zone, cell_code FROM locations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map(|r| r.map(|r| r.0))
        .map_err(|e| map_sqlx_error("location", e))
    }

    async fn location_by_cell(&mut self, cell_code: &str) -> Result<Option<Location>, StoreError> {
        sqlx::query_as::<_, LocationRow>(
            "SELECT id, warehouse, zone, cell_code FROM locations WHERE cell_code = $1",
        )
        .bind(cell_code)
        .fetch_optional(&mut *self.tx)
        .await
        .map(|r| r.map(|r| r.0))
        .map_err(|e| map_sqlx_error("location_by_cell", e))
    }

    async fn counterparty(&mut self, id: CounterpartyId) -> Result<Option<Counterparty>, StoreError> {
        let row = sqlx::query("SELECT id, name, is_active FROM counterparties WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("counterparty", e))?;

        row.map(|row| -> Result<Counterparty, sqlx::Error> {
            Ok(Counterparty {
                id: CounterpartyId::from_uuid(row.try_get("id")?),
                name: row.try_get("name")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("counterparty", e))
    }

    async fn packing_profile(
        &mut self,
        product_id: ProductId,
        pack_type: &str,
    ) -> Result<Option<PackingProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, pack_type, qty_per_pack, is_active
            FROM packing_profiles
            WHERE product_id = $1 AND pack_type = $2 AND is_active
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(pack_type)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("packing_profile", e))?;

        row.map(|row| -> Result<PackingProfile, sqlx::Error> {
            Ok(PackingProfile {
                id: PackingProfileId::from_uuid(row.try_get("id")?),
                product_id: ProductId::from_uuid(row.try_get("product_id")?),
                pack_type: row.try_get("pack_type")?,
                qty_per_pack: row.try_get("qty_per_pack")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("packing_profile", e))
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, barcode_ean, unit, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                barcode_ean = EXCLUDED.barcode_ean,
                unit = EXCLUDED.unit,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.barcode_ean)
        .bind(&product.unit)
        .bind(product.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    async fn upsert_location(&mut self, location: &Location) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, warehouse, zone, cell_code)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                warehouse = EXCLUDED.warehouse,
                zone = EXCLUDED.zone,
                cell_code = EXCLUDED.cell_code
            "#,
        )
        .bind(location.id.as_uuid())
        .bind(&location.warehouse)
        .bind(&location.zone)
        .bind(&location.cell_code)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_location", e))?;
        Ok(())
    }

    async fn upsert_counterparty(&mut self, counterparty: &Counterparty) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO counterparties (id, name, is_active)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(counterparty.id.as_uuid())
        .bind(&counterparty.name)
        .bind(counterparty.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_counterparty", e))?;
        Ok(())
    }

    async fn upsert_packing_profile(&mut self, profile: &PackingProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO packing_profiles (id, product_id, pack_type, qty_per_pack, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                pack_type = EXCLUDED.pack_type,
                qty_per_pack = EXCLUDED.qty_per_pack,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(profile.id.as_uuid())
        .bind(profile.product_id.as_uuid())
        .bind(&profile.pack_type)
        .bind(profile.qty_per_pack)
        .bind(profile.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_packing_profile", e))?;
        Ok(())
    }

    async fn lock_stock(&mut self, key: &StockKey) -> Result<Stock, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock (id, product_id, location_id, batch, expiry_date, qty, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, now())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(StockId::new().as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(&key.batch)
        .bind(key.expiry_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock", e))?;

        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS} FROM stock s
            WHERE s.product_id = $1 AND s.location_id = $2
              AND s.batch IS NOT DISTINCT FROM $3
              AND s.expiry_date IS NOT DISTINCT FROM $4
            FOR UPDATE
            "#
        );
        sqlx::query_as::<_, StockRow>(&sql)
            .bind(key.product_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(&key.batch)
            .bind(key.expiry_date)
            .fetch_one(&mut *self.tx)
            .await
            .map(|r| r.0)
            .map_err(|e| map_sqlx_error("lock_stock", e))
    }

    async fn save_stock(&mut self, row: &Stock) -> Result<(), StoreError> {
        sqlx::query("UPDATE stock SET qty = $2, updated_at = $3 WHERE id = $1")
            .bind(row.id.as_uuid())
            .bind(row.qty)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_stock", e))?;
        Ok(())
    }

    async fn stock(&mut self, key: &StockKey) -> Result<Option<Stock>, StoreError> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS} FROM stock s
            WHERE s.product_id = $1 AND s.location_id = $2
              AND s.batch IS NOT DISTINCT FROM $3
              AND s.expiry_date IS NOT DISTINCT FROM $4
            "#
        );
        sqlx::query_as::<_, StockRow>(&sql)
            .bind(key.product_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(&key.batch)
            .bind(key.expiry_date)
            .fetch_optional(&mut *self.tx)
            .await
            .map(|r| r.map(|r| r.0))
            .map_err(|e| map_sqlx_error("stock", e))
    }

    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS} FROM stock s
            JOIN locations l ON l.id = s.location_id
            WHERE ($1::uuid IS NULL OR s.product_id = $1)
              AND ($2::text IS NULL OR l.warehouse = $2)
              AND ($3::text IS NULL OR l.zone = $3)
              AND ($4::text IS NULL OR l.cell_code = $4)
            ORDER BY s.product_id, s.location_id, s.batch NULLS FIRST, s.expiry_date NULLS FIRST
            "#
        );
        sqlx::query_as::<_, StockRow>(&sql)
            .bind(filter.product_id.map(|p| *p.as_uuid()))
            .bind(&filter.warehouse)
            .bind(&filter.zone)
            .bind(&filter.cell_code)
            .fetch_all(&mut *self.tx)
            .await
            .map(|rows| rows.into_iter().map(|r| r.0).collect())
            .map_err(|e| map_sqlx_error("list_stock", e))
    }

    async fn insert_document(&mut self, doc: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, doc_type, status, created_by, counterparty_id, meta, created_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(doc.id.as_uuid())
        .bind(doc.doc_type.as_str())
        .bind(doc.status.as_str())
        .bind(doc.created_by.as_uuid())
        .bind(doc.counterparty_id.map(|c| *c.as_uuid()))
        .bind(&doc.meta)
        .bind(doc.created_at)
        .bind(doc.finished_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    async fn document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1");
        sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map(|r| r.map(|r| r.0))
            .map_err(|e| map_sqlx_error("document", e))
    }

    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map(|r| r.map(|r| r.0))
            .map_err(|e| map_sqlx_error("lock_document", e))
    }

    async fn save_document(&mut self, doc: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = $2, counterparty_id = $3, meta = $4, finished_at = $5
            WHERE id = $1
            "#,
        )
        .bind(doc.id.as_uuid())
        .bind(doc.status.as_str())
        .bind(doc.counterparty_id.map(|c| *c.as_uuid()))
        .bind(&doc.meta)
        .bind(doc.finished_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_document", e))?;
        Ok(())
    }

    async fn document_lines(&mut self, doc_id: DocumentId) -> Result<Vec<DocumentLine>, StoreError> {
        let sql = format!(
            r#"
            SELECT {LINE_COLUMNS} FROM document_lines
            WHERE doc_id = $1
            ORDER BY product_id, location_id, batch NULLS FIRST, expiry_date NULLS FIRST
            "#
        );
        sqlx::query_as::<_, LineRow>(&sql)
            .bind(doc_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map(|rows| rows.into_iter().map(|r| r.0).collect())
            .map_err(|e| map_sqlx_error("document_lines", e))
    }

    async fn find_line(
        &mut self,
        doc_id: DocumentId,
        key: &StockKey,
    ) -> Result<Option<DocumentLine>, StoreError> {
        let sql = format!(
            r#"
            SELECT {LINE_COLUMNS} FROM document_lines
            WHERE doc_id = $1 AND product_id = $2 AND location_id = $3
              AND batch IS NOT DISTINCT FROM $4
              AND expiry_date IS NOT DISTINCT FROM $5
            "#
        );
        sqlx::query_as::<_, LineRow>(&sql)
            .bind(doc_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(&key.batch)
            .bind(key.expiry_date)
            .fetch_optional(&mut *self.tx)
            .await
            .map(|r| r.map(|r| r.0))
            .map_err(|e| map_sqlx_error("find_line", e))
    }

    async fn save_line(&mut self, line: &DocumentLine) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO document_lines
                (id, doc_id, product_id, location_id, batch, expiry_date, qty_expected, qty_fact)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                qty_expected = EXCLUDED.qty_expected,
                qty_fact = EXCLUDED.qty_fact
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(line.doc_id.as_uuid())
        .bind(line.key.product_id.as_uuid())
        .bind(line.key.location_id.as_uuid())
        .bind(&line.key.batch)
        .bind(line.key.expiry_date)
        .bind(line.qty_expected)
        .bind(line.qty_fact)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_line", e))?;
        Ok(())
    }

    async fn handling_unit(&mut self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM handling_units hu WHERE hu.sscc = $1");
        sqlx::query_as::<_, UnitRow>(&sql)
            .bind(sscc.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map(|r| r.map(|r| r.0))
            .map_err(|e| map_sqlx_error("handling_unit", e))
    }

    async fn lock_handling_unit(&mut self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM handling_units hu WHERE hu.sscc = $1 FOR UPDATE");
        sqlx::query_as::<_, UnitRow>(&sql)
            .bind(sscc.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map(|r| r.map(|r| r.0))
            .map_err(|e| map_sqlx_error("lock_handling_unit", e))
    }

    async fn insert_handling_unit(&mut self, hu: &HandlingUnit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO handling_units
                (id, sscc, kind, status, location_id, source_doc_id, reserved_doc_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(hu.id.as_uuid())
        .bind(hu.sscc.as_str())
        .bind(hu.kind.as_str())
        .bind(hu.status.as_str())
        .bind(hu.location_id.map(|l| *l.as_uuid()))
        .bind(hu.source_doc_id.map(|d| *d.as_uuid()))
        .bind(hu.reserved_doc_id.map(|d| *d.as_uuid()))
        .bind(hu.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match map_sqlx_error("insert_handling_unit", e) {
            StoreError::Duplicate(_) => StoreError::Duplicate(format!("SSCC {}", hu.sscc)),
            other => other,
        })?;
        Ok(())
    }

    async fn save_handling_unit(&mut self, hu: &HandlingUnit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE handling_units
            SET status = $2, location_id = $3, source_doc_id = $4, reserved_doc_id = $5
            WHERE id = $1
            "#,
        )
        .bind(hu.id.as_uuid())
        .bind(hu.status.as_str())
        .bind(hu.location_id.map(|l| *l.as_uuid()))
        .bind(hu.source_doc_id.map(|d| *d.as_uuid()))
        .bind(hu.reserved_doc_id.map(|d| *d.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_handling_unit", e))?;
        Ok(())
    }

    async fn delete_handling_unit(&mut self, id: HandlingUnitId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM handling_unit_contents WHERE hu_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_handling_unit", e))?;
        sqlx::query("DELETE FROM handling_units WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_handling_unit", e))?;
        Ok(())
    }

    async fn lock_units_reserved_by(&mut self, doc_id: DocumentId) -> Result<Vec<HandlingUnit>, StoreError> {
        let sql = format!(
            "SELECT {UNIT_COLUMNS} FROM handling_units hu WHERE hu.reserved_doc_id = $1 ORDER BY hu.sscc FOR UPDATE"
        );
        sqlx::query_as::<_, UnitRow>(&sql)
            .bind(doc_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map(|rows| rows.into_iter().map(|r| r.0).collect())
            .map_err(|e| map_sqlx_error("lock_units_reserved_by", e))
    }

    async fn units_by_source(&mut self, doc_id: DocumentId) -> Result<Vec<HandlingUnit>, StoreError> {
        let sql = format!(
            "SELECT {UNIT_COLUMNS} FROM handling_units hu WHERE hu.source_doc_id = $1 ORDER BY hu.created_at, hu.id"
        );
        sqlx::query_as::<_, UnitRow>(&sql)
            .bind(doc_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map(|rows| rows.into_iter().map(|r| r.0).collect())
            .map_err(|e| map_sqlx_error("units_by_source", e))
    }

    async fn list_units(
        &mut self,
        status: Option<HandlingUnitStatus>,
        cell_code: Option<&str>,
    ) -> Result<Vec<HandlingUnit>, StoreError> {
        let sql = format!(
            r#"
            SELECT {UNIT_COLUMNS} FROM handling_units hu
            LEFT JOIN locations l ON l.id = hu.location_id
            WHERE ($1::text IS NULL OR hu.status = $1)
              AND ($2::text IS NULL OR l.cell_code = $2)
            ORDER BY hu.created_at DESC, hu.id DESC
            "#
        );
        sqlx::query_as::<_, UnitRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(cell_code)
            .fetch_all(&mut *self.tx)
            .await
            .map(|rows| rows.into_iter().map(|r| r.0).collect())
            .map_err(|e| map_sqlx_error("list_units", e))
    }

    async fn contents(&mut self, hu_id: HandlingUnitId) -> Result<Vec<HandlingUnitContent>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CONTENT_COLUMNS} FROM handling_unit_contents
            WHERE hu_id = $1
            ORDER BY product_id, batch NULLS FIRST, expiry_date NULLS FIRST
            "#
        );
        sqlx::query_as::<_, ContentRow>(&sql)
            .bind(hu_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map(|rows| rows.into_iter().map(|r| r.0).collect())
            .map_err(|e| map_sqlx_error("contents", e))
    }

    async fn save_content(&mut self, content: &HandlingUnitContent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO handling_unit_contents (id, hu_id, product_id, batch, expiry_date, qty)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET qty = EXCLUDED.qty
            "#,
        )
        .bind(content.id.as_uuid())
        .bind(content.hu_id.as_uuid())
        .bind(content.key.product_id.as_uuid())
        .bind(&content.key.batch)
        .bind(content.key.expiry_date)
        .bind(content.qty)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_content", e))?;
        Ok(())
    }

    async fn delete_content(&mut self, id: ContentId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM handling_unit_contents WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_content", e))?;
        Ok(())
    }

    async fn lock_sequence(&mut self, seed: &SsccSequence) -> Result<SsccSequence, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sscc_sequences (company_prefix, extension_digit, serial_length, next_serial)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (company_prefix) DO NOTHING
            "#,
        )
        .bind(&seed.company_prefix)
        .bind(&seed.extension_digit)
        .bind(seed.serial_length as i32)
        .bind(seed.next_serial as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_sequence", e))?;

        let row = sqlx::query(
            r#"
            SELECT company_prefix, extension_digit, serial_length, next_serial
            FROM sscc_sequences
            WHERE company_prefix = $1
            FOR UPDATE
            "#,
        )
        .bind(&seed.company_prefix)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_sequence", e))?;

        let decode = |row: &PgRow| -> Result<SsccSequence, sqlx::Error> {
            let serial_length: i32 = row.try_get("serial_length")?;
            let next_serial: i64 = row.try_get("next_serial")?;
            Ok(SsccSequence {
                company_prefix: row.try_get("company_prefix")?,
                extension_digit: row.try_get("extension_digit")?,
                serial_length: serial_length.max(0) as usize,
                next_serial: next_serial.max(0) as u64,
            })
        };
        decode(&row).map_err(|e| map_sqlx_error("lock_sequence", e))
    }

    async fn save_sequence(&mut self, seq: &SsccSequence) -> Result<(), StoreError> {
        let next_serial = i64::try_from(seq.next_serial)
            .map_err(|_| StoreError::backend(format!("serial {} out of range", seq.next_serial)))?;
        sqlx::query("UPDATE sscc_sequences SET next_serial = $2 WHERE company_prefix = $1")
            .bind(&seq.company_prefix)
            .bind(next_serial)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_sequence", e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("40P01") => StoreError::LockTimeout(operation.to_string()),
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => StoreError::LockTimeout(format!("connection pool in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_err(err: EngineError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

// SQLx row types

struct ProductRow(Product);

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow(Product {
            id: ProductId::from_uuid(row.try_get("id")?),
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            barcode_ean: row.try_get("barcode_ean")?,
            unit: row.try_get("unit")?,
            is_active: row.try_get("is_active")?,
        }))
    }
}

struct LocationRow(Location);

impl<'r> FromRow<'r, PgRow> for LocationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LocationRow(Location {
            id: LocationId::from_uuid(row.try_get("id")?),
            warehouse: row.try_get("warehouse")?,
            zone: row.try_get("zone")?,
            cell_code: row.try_get("cell_code")?,
        }))
    }
}

struct StockRow(Stock);

impl<'r> FromRow<'r, PgRow> for StockRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let key = StockKey::new(
            ProductId::from_uuid(row.try_get("product_id")?),
            LocationId::from_uuid(row.try_get("location_id")?),
            row.try_get::<Option<String>, _>("batch")?,
            row.try_get::<Option<NaiveDate>, _>("expiry_date")?,
        );
        Ok(StockRow(Stock {
            id: StockId::from_uuid(row.try_get("id")?),
            key,
            qty: row.try_get::<Decimal, _>("qty")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        }))
    }
}

struct DocumentRow(Document);

impl<'r> FromRow<'r, PgRow> for DocumentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let doc_type: String = row.try_get("doc_type")?;
        let status: String = row.try_get("status")?;
        Ok(DocumentRow(Document {
            id: DocumentId::from_uuid(row.try_get("id")?),
            doc_type: doc_type.parse().map_err(decode_err)?,
            status: status.parse().map_err(decode_err)?,
            created_by: UserId::from_uuid(row.try_get("created_by")?),
            counterparty_id: row
                .try_get::<Option<Uuid>, _>("counterparty_id")?
                .map(CounterpartyId::from_uuid),
            meta: row.try_get::<Option<JsonValue>, _>("meta")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
        }))
    }
}

struct LineRow(DocumentLine);

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow(DocumentLine {
            id: LineId::from_uuid(row.try_get("id")?),
            doc_id: DocumentId::from_uuid(row.try_get("doc_id")?),
            key: StockKey::new(
                ProductId::from_uuid(row.try_get("product_id")?),
                LocationId::from_uuid(row.try_get("location_id")?),
                row.try_get("batch")?,
                row.try_get("expiry_date")?,
            ),
            qty_expected: row.try_get("qty_expected")?,
            qty_fact: row.try_get("qty_fact")?,
        }))
    }
}

struct UnitRow(HandlingUnit);

impl<'r> FromRow<'r, PgRow> for UnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let code: String = row.try_get("sscc")?;
        let status: String = row.try_get("status")?;
        Ok(UnitRow(HandlingUnit {
            id: HandlingUnitId::from_uuid(row.try_get("id")?),
            // Manual codes may have been accepted with check digit validation off.
            sscc: normalize(&code, CheckDigitMode::Skip).map_err(|e| decode_err(e.into()))?,
            kind: HandlingUnitKind::Pallet,
            status: status.parse().map_err(decode_err)?,
            location_id: row
                .try_get::<Option<Uuid>, _>("location_id")?
                .map(LocationId::from_uuid),
            source_doc_id: row
                .try_get::<Option<Uuid>, _>("source_doc_id")?
                .map(DocumentId::from_uuid),
            reserved_doc_id: row
                .try_get::<Option<Uuid>, _>("reserved_doc_id")?
                .map(DocumentId::from_uuid),
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct ContentRow(HandlingUnitContent);

impl<'r> FromRow<'r, PgRow> for ContentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ContentRow(HandlingUnitContent {
            id: ContentId::from_uuid(row.try_get("id")?),
            hu_id: HandlingUnitId::from_uuid(row.try_get("hu_id")?),
            key: ContentKey::new(
                ProductId::from_uuid(row.try_get("product_id")?),
                row.try_get("batch")?,
                row.try_get("expiry_date")?,
            ),
            qty: row.try_get("qty")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_columns_keep_full_decimal_scale() {
        assert!(SCHEMA.contains("qty_fact     NUMERIC NOT NULL"));
        assert!(!SCHEMA.contains("NUMERIC("), "quantity columns must not round");
    }

    #[test]
    fn document_lines_accept_signed_quantities() {
        assert!(!SCHEMA.contains("qty_fact >= 0"));
    }

    #[test]
    fn pool_exhaustion_is_retryable() {
        let err = map_sqlx_error("begin_transaction", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }
}
