use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use stockroom_core::{
    ContentId, CounterpartyId, DocumentId, Entity, HandlingUnitId, LineId, LocationId,
    PackingProfileId, ProductId,
};
use stockroom_inventory::{
    Counterparty, Document, DocumentLine, HandlingUnit, HandlingUnitContent, HandlingUnitStatus,
    Location, PackingProfile, Product, Stock, StockFilter, StockKey,
};
use stockroom_sscc::{Sscc, SsccSequence};

use super::error::StoreError;
use super::r#trait::{StoreTx, WarehouseStore};

/// Lock wait used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Document(DocumentId),
    Unit(Sscc),
    Stock(StockKey),
    Sequence(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Document(id) => write!(f, "document {id}"),
            LockKey::Unit(code) => write!(f, "handling unit {code}"),
            LockKey::Stock(key) => write!(f, "stock row ({key})"),
            LockKey::Sequence(prefix) => write!(f, "SSCC sequence {prefix}"),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    locations: HashMap<LocationId, Location>,
    counterparties: HashMap<CounterpartyId, Counterparty>,
    profiles: HashMap<PackingProfileId, PackingProfile>,
    stock: HashMap<StockKey, Stock>,
    documents: HashMap<DocumentId, Document>,
    lines: HashMap<LineId, DocumentLine>,
    units: HashMap<HandlingUnitId, HandlingUnit>,
    contents: HashMap<ContentId, HandlingUnitContent>,
    sequences: HashMap<String, SsccSequence>,
}

type Pending<K, V> = HashMap<K, Option<V>>;

/// Uncommitted writes of one transaction. `None` marks a deletion.
#[derive(Debug, Default)]
struct Writes {
    products: Pending<ProductId, Product>,
    locations: Pending<LocationId, Location>,
    counterparties: Pending<CounterpartyId, Counterparty>,
    profiles: Pending<PackingProfileId, PackingProfile>,
    stock: Pending<StockKey, Stock>,
    documents: Pending<DocumentId, Document>,
    lines: Pending<LineId, DocumentLine>,
    units: Pending<HandlingUnitId, HandlingUnit>,
    contents: Pending<ContentId, HandlingUnitContent>,
    sequences: Pending<String, SsccSequence>,
}

impl Writes {
    fn apply(self, tables: &mut Tables) {
        apply(&mut tables.products, self.products);
        apply(&mut tables.locations, self.locations);
        apply(&mut tables.counterparties, self.counterparties);
        apply(&mut tables.profiles, self.profiles);
        apply(&mut tables.stock, self.stock);
        apply(&mut tables.documents, self.documents);
        apply(&mut tables.lines, self.lines);
        apply(&mut tables.units, self.units);
        apply(&mut tables.contents, self.contents);
        apply(&mut tables.sequences, self.sequences);
    }
}

fn apply<K: Eq + Hash, V>(base: &mut HashMap<K, V>, pending: Pending<K, V>) {
    for (key, value) in pending {
        match value {
            Some(value) => {
                base.insert(key, value);
            }
            None => {
                base.remove(&key);
            }
        }
    }
}

fn get<K: Eq + Hash, V: Clone>(base: &HashMap<K, V>, pending: &Pending<K, V>, key: &K) -> Option<V> {
    match pending.get(key) {
        Some(value) => value.clone(),
        None => base.get(key).cloned(),
    }
}

/// Stage an insert-or-update of `row` under its own id.
fn stage<E: Entity + Clone>(pending: &mut Pending<E::Id, E>, row: &E) {
    pending.insert(row.id(), Some(row.clone()));
}

/// Committed rows overlaid with this transaction's writes, filtered by `pred`.
fn scan<K: Eq + Hash, V: Clone>(
    base: &HashMap<K, V>,
    pending: &Pending<K, V>,
    pred: impl Fn(&V) -> bool,
) -> Vec<V> {
    let mut out: Vec<V> = base
        .iter()
        .filter(|(k, v)| !pending.contains_key(*k) && pred(*v))
        .map(|(_, v)| v.clone())
        .collect();
    out.extend(pending.values().flatten().filter(|v| pred(*v)).cloned());
    out
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Row locks held by one transaction.
///
/// Dropping releases every guard and removes lock-table entries nobody else
/// is waiting on, so the table only holds rows that are currently contended.
struct HeldLocks {
    shared: Arc<Shared>,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let keys: Vec<LockKey> = self.guards.drain().map(|(key, _guard)| key).collect();
        if keys.is_empty() {
            return;
        }
        let Ok(mut locks) = self.shared.locks.lock() else {
            return;
        };
        for key in keys {
            if locks.get(&key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
                locks.remove(&key);
            }
        }
    }
}

/// In-memory warehouse store.
///
/// Intended for tests/dev. Row locks are async mutexes keyed by row identity
/// and held until the transaction ends; writes stay private to the transaction
/// until commit, so a dropped transaction leaves no trace.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout,
        }
    }
}

impl InMemoryStore {
    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.shared.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        Ok(InMemoryTx {
            shared: Arc::clone(&self.shared),
            writes: Writes::default(),
            held: HeldLocks {
                shared: Arc::clone(&self.shared),
                guards: HashMap::new(),
            },
            lock_timeout: self.lock_timeout,
        })
    }
}

/// Transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    shared: Arc<Shared>,
    writes: Writes,
    held: HeldLocks,
    lock_timeout: Duration,
}

impl InMemoryTx {
    async fn acquire(&mut self, key: LockKey) -> Result<(), StoreError> {
        if self.held.guards.contains_key(&key) {
            return Ok(());
        }

        let mutex = {
            let mut locks = self.shared.locks.lock().map_err(|_| StoreError::poisoned())?;
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        match tokio::time::timeout(self.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.held.guards.insert(key, guard);
                Ok(())
            }
            Err(_) => Err(StoreError::LockTimeout(key.to_string())),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables, &Writes) -> T) -> Result<T, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| StoreError::poisoned())?;
        Ok(f(&tables, &self.writes))
    }

    fn unit_by_code(&self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError> {
        self.read(|t, w| scan(&t.units, &w.units, |hu| &hu.sscc == sscc).into_iter().next())
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.read(|t, w| get(&t.products, &w.products, &id))
    }

    async fn product_by_barcode(&mut self, barcode: &str) -> Result<Option<Product>, StoreError> {
        self.read(|t, w| {
            scan(&t.products, &w.products, |p| p.barcode_ean == barcode)
                .into_iter()
                .next()
        })
    }

    async fn location(&mut self, id: LocationId) -> Result<Option<Location>, StoreError> {
        self.read(|t, w| get(&t.locations, &w.locations, &id))
    }

    async fn location_by_cell(&mut self, cell_code: &str) -> Result<Option<Location>, StoreError> {
        self.read(|t, w| {
            scan(&t.locations, &w.locations, |l| l.cell_code == cell_code)
                .into_iter()
                .next()
        })
    }

    async fn counterparty(&mut self, id: CounterpartyId) -> Result<Option<Counterparty>, StoreError> {
        self.read(|t, w| get(&t.counterparties, &w.counterparties, &id))
    }

    async fn packing_profile(
        &mut self,
        product_id: ProductId,
        pack_type: &str,
    ) -> Result<Option<PackingProfile>, StoreError> {
        self.read(|t, w| {
            scan(&t.profiles, &w.profiles, |p| {
                p.is_active && p.product_id == product_id && p.pack_type == pack_type
            })
            .into_iter()
            .next()
        })
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        stage(&mut self.writes.products, product);
        Ok(())
    }

    async fn upsert_location(&mut self, location: &Location) -> Result<(), StoreError> {
        stage(&mut self.writes.locations, location);
        Ok(())
    }

    async fn upsert_counterparty(&mut self, counterparty: &Counterparty) -> Result<(), StoreError> {
        stage(&mut self.writes.counterparties, counterparty);
        Ok(())
    }

    async fn upsert_packing_profile(&mut self, profile: &PackingProfile) -> Result<(), StoreError> {
        stage(&mut self.writes.profiles, profile);
        Ok(())
    }

    async fn lock_stock(&mut self, key: &StockKey) -> Result<Stock, StoreError> {
        self.acquire(LockKey::Stock(key.clone())).await?;
        let existing = self.read(|t, w| get(&t.stock, &w.stock, key))?;
        Ok(match existing {
            Some(row) => row,
            None => {
                let row = Stock::zero(key.clone(), Utc::now());
                self.writes.stock.insert(key.clone(), Some(row.clone()));
                row
            }
        })
    }

    async fn save_stock(&mut self, row: &Stock) -> Result<(), StoreError> {
        self.writes.stock.insert(row.key.clone(), Some(row.clone()));
        Ok(())
    }

    async fn stock(&mut self, key: &StockKey) -> Result<Option<Stock>, StoreError> {
        self.read(|t, w| get(&t.stock, &w.stock, key))
    }

    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError> {
        self.read(|t, w| {
            let mut rows = scan(&t.stock, &w.stock, |row| {
                get(&t.locations, &w.locations, &row.key.location_id)
                    .is_some_and(|loc| filter.matches(row, &loc))
            });
            rows.sort_by(|a, b| a.key.cmp(&b.key));
            rows
        })
    }

    async fn insert_document(&mut self, doc: &Document) -> Result<(), StoreError> {
        stage(&mut self.writes.documents, doc);
        Ok(())
    }

    async fn document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.read(|t, w| get(&t.documents, &w.documents, &id))
    }

    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        if self.document(id).await?.is_none() {
            return Ok(None);
        }
        self.acquire(LockKey::Document(id)).await?;
        self.document(id).await
    }

    async fn save_document(&mut self, doc: &Document) -> Result<(), StoreError> {
        stage(&mut self.writes.documents, doc);
        Ok(())
    }

    async fn document_lines(&mut self, doc_id: DocumentId) -> Result<Vec<DocumentLine>, StoreError> {
        self.read(|t, w| {
            let mut lines = scan(&t.lines, &w.lines, |l| l.doc_id == doc_id);
            lines.sort_by(|a, b| a.key.cmp(&b.key));
            lines
        })
    }

    async fn find_line(
        &mut self,
        doc_id: DocumentId,
        key: &StockKey,
    ) -> Result<Option<DocumentLine>, StoreError> {
        self.read(|t, w| {
            scan(&t.lines, &w.lines, |l| l.doc_id == doc_id && &l.key == key)
                .into_iter()
                .next()
        })
    }

    async fn save_line(&mut self, line: &DocumentLine) -> Result<(), StoreError> {
        stage(&mut self.writes.lines, line);
        Ok(())
    }

    async fn handling_unit(&mut self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError> {
        self.unit_by_code(sscc)
    }

    async fn lock_handling_unit(&mut self, sscc: &Sscc) -> Result<Option<HandlingUnit>, StoreError> {
        if self.unit_by_code(sscc)?.is_none() {
            return Ok(None);
        }
        self.acquire(LockKey::Unit(sscc.clone())).await?;
        self.unit_by_code(sscc)
    }

    async fn insert_handling_unit(&mut self, hu: &HandlingUnit) -> Result<(), StoreError> {
        self.acquire(LockKey::Unit(hu.sscc.clone())).await?;
        if self.unit_by_code(&hu.sscc)?.is_some() {
            return Err(StoreError::Duplicate(format!("SSCC {}", hu.sscc)));
        }
        stage(&mut self.writes.units, hu);
        Ok(())
    }

    async fn save_handling_unit(&mut self, hu: &HandlingUnit) -> Result<(), StoreError> {
        stage(&mut self.writes.units, hu);
        Ok(())
    }

    async fn delete_handling_unit(&mut self, id: HandlingUnitId) -> Result<(), StoreError> {
        let contents = self.contents(id).await?;
        for content in contents {
            self.writes.contents.insert(content.id, None);
        }
        self.writes.units.insert(id, None);
        Ok(())
    }

    async fn lock_units_reserved_by(&mut self, doc_id: DocumentId) -> Result<Vec<HandlingUnit>, StoreError> {
        let mut codes: Vec<Sscc> = self.read(|t, w| {
            scan(&t.units, &w.units, |hu| hu.reserved_doc_id == Some(doc_id))
                .into_iter()
                .map(|hu| hu.sscc)
                .collect()
        })?;
        codes.sort();
        for code in codes {
            self.acquire(LockKey::Unit(code)).await?;
        }
        let mut units = self.read(|t, w| scan(&t.units, &w.units, |hu| hu.reserved_doc_id == Some(doc_id)))?;
        units.sort_by(|a, b| a.sscc.cmp(&b.sscc));
        Ok(units)
    }

    async fn units_by_source(&mut self, doc_id: DocumentId) -> Result<Vec<HandlingUnit>, StoreError> {
        self.read(|t, w| {
            let mut units = scan(&t.units, &w.units, |hu| hu.source_doc_id == Some(doc_id));
            units.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            units
        })
    }

    async fn list_units(
        &mut self,
        status: Option<HandlingUnitStatus>,
        cell_code: Option<&str>,
    ) -> Result<Vec<HandlingUnit>, StoreError> {
        self.read(|t, w| {
            let mut units = scan(&t.units, &w.units, |hu| {
                let status_ok = status.is_none_or(|s| s == hu.status);
                let cell_ok = cell_code.is_none_or(|code| {
                    hu.location_id
                        .and_then(|id| get(&t.locations, &w.locations, &id))
                        .is_some_and(|loc| loc.cell_code == code)
                });
                status_ok && cell_ok
            });
            units.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            units
        })
    }

    async fn contents(&mut self, hu_id: HandlingUnitId) -> Result<Vec<HandlingUnitContent>, StoreError> {
        self.read(|t, w| {
            let mut contents = scan(&t.contents, &w.contents, |c| c.hu_id == hu_id);
            contents.sort_by(|a, b| a.key.cmp(&b.key));
            contents
        })
    }

    async fn save_content(&mut self, content: &HandlingUnitContent) -> Result<(), StoreError> {
        stage(&mut self.writes.contents, content);
        Ok(())
    }

    async fn delete_content(&mut self, id: ContentId) -> Result<(), StoreError> {
        self.writes.contents.insert(id, None);
        Ok(())
    }

    async fn lock_sequence(&mut self, seed: &SsccSequence) -> Result<SsccSequence, StoreError> {
        let prefix = seed.company_prefix.clone();
        self.acquire(LockKey::Sequence(prefix.clone())).await?;
        let existing = self.read(|t, w| get(&t.sequences, &w.sequences, &prefix))?;
        Ok(match existing {
            Some(seq) => seq,
            None => {
                self.writes.sequences.insert(prefix, Some(seed.clone()));
                seed.clone()
            }
        })
    }

    async fn save_sequence(&mut self, seq: &SsccSequence) -> Result<(), StoreError> {
        self.writes
            .sequences
            .insert(seq.company_prefix.clone(), Some(seq.clone()));
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let InMemoryTx {
            shared,
            writes,
            held,
            ..
        } = self;
        {
            let mut tables = shared.tables.write().map_err(|_| StoreError::poisoned())?;
            writes.apply(&mut tables);
        }
        // Row locks are released only once the writes are visible.
        drop(held);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new(), None, None)
    }

    #[tokio::test]
    async fn lock_stock_creates_zero_row_visible_after_commit() {
        let store = InMemoryStore::new();
        let k = key();

        let mut tx = store.begin().await.unwrap();
        let mut row = tx.lock_stock(&k).await.unwrap();
        assert_eq!(row.qty, dec!(0));
        row.qty = dec!(7);
        tx.save_stock(&row).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.stock(&k).await.unwrap().unwrap().qty, dec!(7));
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = InMemoryStore::new();
        let k = key();

        {
            let mut tx = store.begin().await.unwrap();
            let mut row = tx.lock_stock(&k).await.unwrap();
            row.qty = dec!(5);
            tx.save_stock(&row).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.stock(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_locker_times_out() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(30));
        let k = key();

        let mut holder = store.begin().await.unwrap();
        holder.lock_stock(&k).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_stock(&k).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        holder.commit().await.unwrap();
        waiter.lock_stock(&k).await.unwrap();
    }

    #[tokio::test]
    async fn locks_are_reentrant_within_a_transaction() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(30));
        let k = key();

        let mut tx = store.begin().await.unwrap();
        tx.lock_stock(&k).await.unwrap();
        tx.lock_stock(&k).await.unwrap();
    }

    #[tokio::test]
    async fn released_locks_leave_no_table_entries() {
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.lock_stock(&key()).await.unwrap();
        tx.lock_stock(&key()).await.unwrap();
        assert_eq!(store.lock_table_len(), 2);
        tx.commit().await.unwrap();
        assert_eq!(store.lock_table_len(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.lock_stock(&key()).await.unwrap();
        drop(tx);
        assert_eq!(store.lock_table_len(), 0);
    }

    #[tokio::test]
    async fn contended_lock_entry_survives_until_the_waiter_is_done() {
        let store = InMemoryStore::new();
        let k = key();

        let mut holder = store.begin().await.unwrap();
        holder.lock_stock(&k).await.unwrap();

        let waiter_store = store.clone();
        let waiter_key = k.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin().await.unwrap();
            tx.lock_stock(&waiter_key).await.unwrap();
            tx.commit().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        holder.commit().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(store.lock_table_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_unit_code_is_rejected() {
        let store = InMemoryStore::new();
        let code: Sscc = "046070461500000018".parse().unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_handling_unit(&HandlingUnit::new(code.clone(), HandlingUnitStatus::Created, None, Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_handling_unit(&HandlingUnit::new(code, HandlingUnitStatus::Created, None, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }
}
