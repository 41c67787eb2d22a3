//! SSCC allocation against the persisted per-prefix counter.

use serde_json::json;
use tracing::{debug, error, instrument};

use stockroom_core::{Actor, EngineError, EngineResult};
use stockroom_infra::{AuditEntry, StoreTx, WarehouseStore};
use stockroom_sscc::{CheckDigitMode, Sscc, SsccLayout, SsccSequence};

use crate::warehouse::Warehouse;

/// Lock the counter for `layout.company_prefix`, take the next serial and
/// write the counter back. The lock is held until the transaction ends, so two
/// concurrent allocations never see the same serial.
pub(crate) async fn allocate_in<T: StoreTx>(tx: &mut T, layout: &SsccLayout) -> EngineResult<Sscc> {
    let mut sequence = tx.lock_sequence(&SsccSequence::start(layout)).await?;
    let (serial, code) = sequence.allocate(layout).map_err(|err| {
        error!(prefix = %layout.company_prefix, error = %err, "SSCC allocation failed");
        EngineError::from(err)
    })?;
    tx.save_sequence(&sequence).await?;
    debug!(serial, sscc = %code, "SSCC allocated");
    Ok(code)
}

pub struct SsccAllocator<'a, S> {
    warehouse: &'a Warehouse<S>,
}

impl<'a, S: WarehouseStore> SsccAllocator<'a, S> {
    pub(crate) fn new(warehouse: &'a Warehouse<S>) -> Self {
        Self { warehouse }
    }

    /// Mint one code in its own transaction.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn allocate(&self, actor: &Actor) -> EngineResult<Sscc> {
        let mut tx = self.warehouse.begin().await?;
        let code = allocate_in(&mut tx, self.warehouse.layout()).await?;
        let entry = AuditEntry::new(actor.user_id, "sscc_allocate", "sscc", &code, None);
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(code)
    }

    /// Mint `count` consecutive codes in one transaction.
    #[instrument(skip(self, actor), fields(user = %actor.user_id), err)]
    pub async fn allocate_batch(&self, actor: &Actor, count: usize) -> EngineResult<Vec<Sscc>> {
        let mut tx = self.warehouse.begin().await?;
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            codes.push(allocate_in(&mut tx, self.warehouse.layout()).await?);
        }
        let entry = AuditEntry::new(
            actor.user_id,
            "sscc_allocate",
            "sscc",
            self.warehouse.layout().company_prefix.as_str(),
            Some(json!({ "count": count })),
        );
        self.warehouse.commit(tx, vec![entry]).await?;
        Ok(codes)
    }

    /// Parse a scanned code (18 digits, or 20 with the `00` identifier),
    /// verifying the check digit unless configured otherwise.
    pub fn normalize(&self, scan: &str) -> EngineResult<Sscc> {
        Ok(stockroom_sscc::normalize(scan, self.warehouse.check_digit_mode())?)
    }

    /// Strict validation of an 18-digit code, check digit included.
    pub fn validate(&self, code: &str) -> EngineResult<()> {
        Ok(stockroom_sscc::validate(code, CheckDigitMode::Verify)?)
    }
}
