//! Handling units (pallets) and their contents.
//!
//! State machine:
//! `created → putaway → reserved → shipped`, with `reserved → putaway` via unpick.
//! `quarantine` exists as a status but has no modeled transitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    ContentId, DocumentId, EngineError, EngineResult, Entity, HandlingUnitId, LocationId,
    ProductId, Qty,
};
use stockroom_sscc::Sscc;

use crate::stock::StockKey;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingUnitStatus {
    Created,
    Putaway,
    Reserved,
    Shipped,
    Quarantine,
}

impl HandlingUnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlingUnitStatus::Created => "created",
            HandlingUnitStatus::Putaway => "putaway",
            HandlingUnitStatus::Reserved => "reserved",
            HandlingUnitStatus::Shipped => "shipped",
            HandlingUnitStatus::Quarantine => "quarantine",
        }
    }
}

impl core::fmt::Display for HandlingUnitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for HandlingUnitStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(HandlingUnitStatus::Created),
            "putaway" => Ok(HandlingUnitStatus::Putaway),
            "reserved" => Ok(HandlingUnitStatus::Reserved),
            "shipped" => Ok(HandlingUnitStatus::Shipped),
            "quarantine" => Ok(HandlingUnitStatus::Quarantine),
            other => Err(EngineError::invalid(format!("unknown handling unit status: {other}"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingUnitKind {
    #[default]
    Pallet,
}

impl HandlingUnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlingUnitKind::Pallet => "pallet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlingUnit {
    pub id: HandlingUnitId,
    pub sscc: Sscc,
    pub kind: HandlingUnitKind,
    pub status: HandlingUnitStatus,
    pub location_id: Option<LocationId>,
    /// Document the unit was built for (inbound / production receipt).
    pub source_doc_id: Option<DocumentId>,
    /// Outbound document holding the unit; set only while `Reserved`.
    pub reserved_doc_id: Option<DocumentId>,
    pub created_at: DateTime<Utc>,
}

impl HandlingUnit {
    pub fn new(sscc: Sscc, status: HandlingUnitStatus, location_id: Option<LocationId>, now: DateTime<Utc>) -> Self {
        Self {
            id: HandlingUnitId::new(),
            sscc,
            kind: HandlingUnitKind::Pallet,
            status,
            location_id,
            source_doc_id: None,
            reserved_doc_id: None,
            created_at: now,
        }
    }

    pub fn require_location(&self) -> EngineResult<LocationId> {
        self.location_id
            .ok_or_else(|| EngineError::invalid(format!("handling unit {} has no location", self.sscc)))
    }

    /// Assign an optional location and mark the unit stored.
    pub fn putaway(&mut self, location_id: Option<LocationId>) -> EngineResult<()> {
        if matches!(self.status, HandlingUnitStatus::Reserved | HandlingUnitStatus::Shipped) {
            return Err(EngineError::conflict(format!(
                "handling unit {} is {} and cannot be put away",
                self.sscc, self.status
            )));
        }
        if let Some(location_id) = location_id {
            self.location_id = Some(location_id);
        }
        self.status = HandlingUnitStatus::Putaway;
        Ok(())
    }

    /// Bind an unbound unit to `doc`; a unit bound to another document is rejected.
    pub fn bind_source(&mut self, doc: DocumentId) -> EngineResult<()> {
        match self.source_doc_id {
            Some(bound) if bound != doc => Err(EngineError::conflict(format!(
                "handling unit {} belongs to document {bound}",
                self.sscc
            ))),
            _ => {
                self.source_doc_id = Some(doc);
                Ok(())
            }
        }
    }

    /// `putaway → reserved` for `doc`. Returns the location the contents are picked from.
    pub fn reserve(&mut self, doc: DocumentId) -> EngineResult<LocationId> {
        if self.status != HandlingUnitStatus::Putaway || self.reserved_doc_id.is_some() {
            return Err(EngineError::conflict(format!(
                "handling unit {} is already reserved or not available ({})",
                self.sscc, self.status
            )));
        }
        let location = self.require_location()?;
        self.status = HandlingUnitStatus::Reserved;
        self.reserved_doc_id = Some(doc);
        Ok(location)
    }

    /// `reserved → putaway`, only by the document that holds the reservation.
    pub fn release_reservation(&mut self, doc: DocumentId) -> EngineResult<LocationId> {
        if self.reserved_doc_id != Some(doc) {
            return Err(EngineError::conflict(format!(
                "handling unit {} is not reserved by document {doc}",
                self.sscc
            )));
        }
        let location = self.require_location()?;
        self.status = HandlingUnitStatus::Putaway;
        self.reserved_doc_id = None;
        Ok(location)
    }

    /// Outbound document finished: the unit leaves the warehouse.
    pub fn ship(&mut self) {
        self.status = HandlingUnitStatus::Shipped;
        self.reserved_doc_id = None;
    }

    /// Outbound document canceled: the unit returns to storage.
    pub fn return_to_putaway(&mut self) {
        self.status = HandlingUnitStatus::Putaway;
        self.reserved_doc_id = None;
    }

    pub fn ensure_deletable(&self) -> EngineResult<()> {
        if self.status == HandlingUnitStatus::Shipped || self.reserved_doc_id.is_some() {
            return Err(EngineError::conflict(format!(
                "cannot delete shipped or reserved handling unit {}",
                self.sscc
            )));
        }
        Ok(())
    }
}

impl Entity for HandlingUnit {
    type Id = HandlingUnitId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Identity of one content row within a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey {
    pub product_id: ProductId,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl ContentKey {
    pub fn new(product_id: ProductId, batch: Option<String>, expiry_date: Option<NaiveDate>) -> Self {
        Self {
            product_id,
            batch,
            expiry_date,
        }
    }

    /// Ledger key for this content at `location_id`.
    pub fn stock_key(&self, location_id: LocationId) -> StockKey {
        StockKey::new(self.product_id, location_id, self.batch.clone(), self.expiry_date)
    }
}

/// Quantity of one product (batch, expiry) on a unit. Always positive while stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlingUnitContent {
    pub id: ContentId,
    pub hu_id: HandlingUnitId,
    pub key: ContentKey,
    pub qty: Qty,
}

impl HandlingUnitContent {
    pub fn new(hu_id: HandlingUnitId, key: ContentKey, qty: Qty) -> Self {
        Self {
            id: ContentId::new(),
            hu_id,
            key,
            qty,
        }
    }

    pub fn add(&mut self, qty: Qty) {
        self.qty += qty;
    }

    /// Take `qty` off the row. Returns the remaining quantity; the caller
    /// deletes the row when it reaches zero.
    pub fn consume(&mut self, qty: Qty) -> EngineResult<Qty> {
        if qty <= Qty::ZERO {
            return Err(EngineError::invalid("qty must be > 0"));
        }
        if qty > self.qty {
            return Err(EngineError::insufficient(
                format!("handling unit content {}", self.id),
                self.qty,
                qty,
            ));
        }
        self.qty -= qty;
        Ok(self.qty)
    }

    pub fn is_empty(&self) -> bool {
        self.qty <= Qty::ZERO
    }
}

impl Entity for HandlingUnitContent {
    type Id = ContentId;

    fn id(&self) -> Self::Id {
        self.id
    }
}
