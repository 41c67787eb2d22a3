//! Service facade over one store.
//!
//! `Warehouse` owns the store, the validated configuration projections and the
//! audit sink. The services it hands out borrow it and share one execution
//! model:
//!
//! ```text
//! begin transaction
//!   ↓
//! lock rows (document → handling units → ledger rows → SSCC counter)
//!   ↓
//! apply domain rules (pure, from stockroom-inventory / stockroom-sscc)
//!   ↓
//! commit (or drop = rollback on the first error)
//!   ↓
//! record audit entries (failures logged, never propagated)
//! ```

use std::sync::Arc;

use tracing::warn;

use stockroom_core::{EngineError, EngineResult};
#[cfg(feature = "postgres")]
use stockroom_infra::PostgresStore;
use stockroom_infra::{
    AuditEntry, AuditSink, InMemoryStore, LedgerPolicy, Settings, StoreTx, WarehouseStore,
};
use stockroom_sscc::{CheckDigitMode, SsccLayout};

use crate::catalog::Catalog;
use crate::documents::DocumentEngine;
use crate::handling_units::HandlingUnits;
use crate::ledger::StockLedger;
use crate::sscc::SsccAllocator;

pub struct Warehouse<S> {
    store: S,
    layout: SsccLayout,
    check_digits: CheckDigitMode,
    policy: LedgerPolicy,
    audit: Arc<dyn AuditSink>,
}

impl<S> Warehouse<S> {
    /// Build a facade from validated settings.
    pub fn new(store: S, settings: &Settings, audit: Arc<dyn AuditSink>) -> EngineResult<Self> {
        settings.validate()?;
        Ok(Self {
            store,
            layout: settings.sscc_layout()?,
            check_digits: settings.check_digit_mode(),
            policy: settings.ledger_policy(),
            audit,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    pub fn layout(&self) -> &SsccLayout {
        &self.layout
    }

    pub fn check_digit_mode(&self) -> CheckDigitMode {
        self.check_digits
    }
}

impl<S: WarehouseStore> Warehouse<S> {
    pub fn catalog(&self) -> Catalog<'_, S> {
        Catalog::new(self)
    }

    pub fn ledger(&self) -> StockLedger<'_, S> {
        StockLedger::new(self)
    }

    pub fn documents(&self) -> DocumentEngine<'_, S> {
        DocumentEngine::new(self)
    }

    pub fn handling_units(&self) -> HandlingUnits<'_, S> {
        HandlingUnits::new(self)
    }

    pub fn sscc(&self) -> SsccAllocator<'_, S> {
        SsccAllocator::new(self)
    }

    pub(crate) async fn begin(&self) -> EngineResult<S::Tx> {
        Ok(self.store.begin().await?)
    }

    /// Commit `tx`, then hand `entries` to the audit sink.
    pub(crate) async fn commit(&self, tx: S::Tx, entries: Vec<AuditEntry>) -> EngineResult<()> {
        tx.commit().await?;
        for entry in entries {
            let action = entry.action.clone();
            if let Err(err) = self.audit.record(entry).await {
                warn!(action = %action, error = %err, "audit sink rejected entry");
            }
        }
        Ok(())
    }

    /// End a read-only transaction.
    pub(crate) async fn finish_read(&self, tx: S::Tx) -> EngineResult<()> {
        Ok(tx.rollback().await?)
    }
}

impl Warehouse<InMemoryStore> {
    /// Engine over a fresh in-memory store using the configured lock timeout.
    pub fn in_memory(settings: &Settings, audit: Arc<dyn AuditSink>) -> EngineResult<Self> {
        let store = InMemoryStore::with_lock_timeout(settings.lock_timeout());
        Warehouse::new(store, settings, audit)
    }
}

#[cfg(feature = "postgres")]
impl Warehouse<PostgresStore> {
    /// Connect to `settings.database_url` and apply the schema.
    pub async fn connect(settings: &Settings, audit: Arc<dyn AuditSink>) -> EngineResult<Self> {
        let url = settings
            .database_url
            .as_deref()
            .ok_or_else(|| EngineError::misconfigured("database_url is not set"))?;
        let store = PostgresStore::connect(url, settings.lock_timeout()).await?;
        store.migrate().await?;
        Warehouse::new(store, settings, audit)
    }
}
