//! Movement documents: state machine and the type-to-ledger-effect table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockroom_core::{
    CounterpartyId, DocumentId, EngineError, EngineResult, Entity, LocationId, Qty, UserId,
};

use crate::line::DocumentLine;
use crate::stock::{StockCheck, StockKey};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Inbound,
    Outbound,
    Inventory,
    Move,
    ProductionIssue,
    ProductionReceipt,
}

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::Inbound,
        DocumentType::Outbound,
        DocumentType::Inventory,
        DocumentType::Move,
        DocumentType::ProductionIssue,
        DocumentType::ProductionReceipt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Inbound => "inbound",
            DocumentType::Outbound => "outbound",
            DocumentType::Inventory => "inventory",
            DocumentType::Move => "move",
            DocumentType::ProductionIssue => "production_issue",
            DocumentType::ProductionReceipt => "production_receipt",
        }
    }

    /// Ledger effect of finishing a document of this type.
    ///
    /// New document types add one arm here and nowhere else.
    pub fn ledger_effect(&self) -> LedgerEffect {
        use DocumentType::*;
        use ProductionLeg::*;
        use StockSign::*;

        let (sign, check, production) = match self {
            Inbound => (Credit, StockCheck::Unchecked, NoLeg),
            Outbound => (Debit, StockCheck::Enforce, NoLeg),
            // Additive correction, not an absolute recount.
            Inventory => (Credit, StockCheck::Unchecked, NoLeg),
            // Source and destination arrive as separate signed lines.
            Move => (Credit, StockCheck::Unchecked, NoLeg),
            ProductionIssue => (Debit, StockCheck::Enforce, CreditProduction),
            // Known gap: the production location is not decremented.
            ProductionReceipt => (Credit, StockCheck::Unchecked, UntouchedProduction),
        };

        LedgerEffect {
            doc_type: *self,
            sign,
            check,
            production,
        }
    }

    /// Types that may carry pallets (handling units).
    pub fn carries_pallets(&self) -> bool {
        matches!(
            self,
            DocumentType::Inbound | DocumentType::ProductionReceipt | DocumentType::Outbound
        )
    }
}

impl core::str::FromStr for DocumentType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::invalid(format!("unknown document type: {s}")))
    }
}

impl core::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the posting at the line's own location.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockSign {
    /// `qty += delta`
    Credit,
    /// `qty -= delta`
    Debit,
}

/// What happens at the configured production location.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProductionLeg {
    NoLeg,
    /// Same quantity is credited to the production location in the same transaction.
    CreditProduction,
    /// Production location is required by configuration but left unchanged.
    UntouchedProduction,
}

/// One row of the type-to-effect table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LedgerEffect {
    pub doc_type: DocumentType,
    pub sign: StockSign,
    pub check: StockCheck,
    pub production: ProductionLeg,
}

/// A single signed change to one ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub key: StockKey,
    pub delta: Qty,
    pub check: StockCheck,
}

impl LedgerEffect {
    pub fn needs_production_location(&self) -> bool {
        self.production != ProductionLeg::NoLeg
    }

    /// Ledger postings for one line, in lock order: the line's own row first,
    /// then the production row.
    pub fn postings(
        &self,
        line: &DocumentLine,
        production_location: Option<LocationId>,
    ) -> EngineResult<Vec<Posting>> {
        let delta = match self.sign {
            StockSign::Credit => line.qty_fact,
            StockSign::Debit => -line.qty_fact,
        };

        let mut postings = vec![Posting {
            key: line.key.clone(),
            delta,
            check: self.check,
        }];

        match self.production {
            ProductionLeg::NoLeg => {}
            ProductionLeg::CreditProduction => {
                let location = production_location.ok_or_else(|| {
                    EngineError::misconfigured(format!(
                        "production location is required for {} documents",
                        self.doc_type
                    ))
                })?;
                postings.push(Posting {
                    key: line.key.at(location),
                    delta: line.qty_fact,
                    check: StockCheck::Unchecked,
                });
            }
            ProductionLeg::UntouchedProduction => {
                if production_location.is_none() {
                    return Err(EngineError::misconfigured(format!(
                        "production location is required for {} documents",
                        self.doc_type
                    )));
                }
            }
        }

        Ok(postings)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    InProgress,
    Done,
    Canceled,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Draft,
        DocumentStatus::InProgress,
        DocumentStatus::Done,
        DocumentStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::InProgress => "in_progress",
            DocumentStatus::Done => "done",
            DocumentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Done | DocumentStatus::Canceled)
    }
}

impl core::str::FromStr for DocumentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| EngineError::invalid(format!("unknown document status: {s}")))
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movement document header. Lines are stored separately and owned by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub doc_type: DocumentType,
    pub status: DocumentStatus,
    pub created_by: UserId,
    pub counterparty_id: Option<CounterpartyId>,
    pub meta: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(
        doc_type: DocumentType,
        created_by: UserId,
        counterparty_id: Option<CounterpartyId>,
        meta: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            doc_type,
            status: DocumentStatus::Draft,
            created_by,
            counterparty_id,
            meta,
            created_at: now,
            finished_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Lines may only change while the document is draft or in progress.
    pub fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::conflict(format!(
                "document {} is closed ({})",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn ensure_type(&self, expected: DocumentType) -> EngineResult<()> {
        if self.doc_type != expected {
            return Err(EngineError::invalid(format!(
                "operation requires a {expected} document, {} is {}",
                self.id, self.doc_type
            )));
        }
        Ok(())
    }

    pub fn ensure_pallet_document(&self) -> EngineResult<()> {
        if !self.doc_type.carries_pallets() {
            return Err(EngineError::invalid(format!(
                "pallets are only handled on inbound, production receipt and outbound documents, {} is {}",
                self.id, self.doc_type
            )));
        }
        Ok(())
    }

    /// `cell_code` recorded in the document's free-form metadata, if any.
    pub fn meta_cell_code(&self) -> Option<&str> {
        self.meta.as_ref()?.get("cell_code")?.as_str()
    }

    /// draft | in_progress → in_progress
    pub fn start(&mut self) -> EngineResult<()> {
        self.ensure_transition("start")?;
        self.status = DocumentStatus::InProgress;
        Ok(())
    }

    /// draft | in_progress → done
    pub fn finish(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.ensure_transition("finish")?;
        self.status = DocumentStatus::Done;
        self.finished_at = Some(now);
        Ok(())
    }

    /// draft | in_progress → canceled
    pub fn cancel(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.ensure_transition("cancel")?;
        self.status = DocumentStatus::Canceled;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Admin override: any status, no guards.
    pub fn force_status(&mut self, status: DocumentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.finished_at = status.is_terminal().then_some(now);
    }

    fn ensure_transition(&self, action: &str) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::conflict(format!(
                "cannot {action} document {} in status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

impl Entity for Document {
    type Id = DocumentId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockroom_core::ProductId;

    fn doc(doc_type: DocumentType) -> Document {
        Document::new(doc_type, UserId::new(), None, None, Utc::now())
    }

    fn line(qty: Qty) -> DocumentLine {
        let key = StockKey::new(ProductId::new(), LocationId::new(), Some("B1".into()), None);
        DocumentLine::new(DocumentId::new(), key, qty)
    }

    #[test]
    fn lifecycle_draft_start_finish() {
        let mut d = doc(DocumentType::Inbound);
        assert_eq!(d.status, DocumentStatus::Draft);
        d.start().unwrap();
        d.start().unwrap();
        assert_eq!(d.status, DocumentStatus::InProgress);
        d.finish(Utc::now()).unwrap();
        assert_eq!(d.status, DocumentStatus::Done);
        assert!(d.finished_at.is_some());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut d = doc(DocumentType::Outbound);
        d.cancel(Utc::now()).unwrap();
        assert!(matches!(d.start(), Err(EngineError::Conflict(_))));
        assert!(matches!(d.finish(Utc::now()), Err(EngineError::Conflict(_))));
        assert!(matches!(d.cancel(Utc::now()), Err(EngineError::Conflict(_))));
        assert!(matches!(d.ensure_open(), Err(EngineError::Conflict(_))));
    }

    #[test]
    fn draft_can_finish_directly() {
        let mut d = doc(DocumentType::Move);
        d.finish(Utc::now()).unwrap();
        assert_eq!(d.status, DocumentStatus::Done);
    }

    #[test]
    fn force_status_bypasses_guards_and_tracks_finished_at() {
        let mut d = doc(DocumentType::Inbound);
        d.finish(Utc::now()).unwrap();
        d.force_status(DocumentStatus::InProgress, Utc::now());
        assert_eq!(d.status, DocumentStatus::InProgress);
        assert!(d.finished_at.is_none());
        d.force_status(DocumentStatus::Canceled, Utc::now());
        assert!(d.finished_at.is_some());
    }

    #[test]
    fn effect_table_signs() {
        let l = line(dec!(4));
        for (doc_type, expected) in [
            (DocumentType::Inbound, dec!(4)),
            (DocumentType::Outbound, dec!(-4)),
            (DocumentType::Inventory, dec!(4)),
            (DocumentType::Move, dec!(4)),
        ] {
            let postings = doc_type.ledger_effect().postings(&l, None).unwrap();
            assert_eq!(postings.len(), 1, "{doc_type}");
            assert_eq!(postings[0].delta, expected, "{doc_type}");
            assert_eq!(postings[0].key, l.key);
        }
    }

    #[test]
    fn only_decrementing_types_enforce_stock_check() {
        for doc_type in DocumentType::ALL {
            let effect = doc_type.ledger_effect();
            let expected = match doc_type {
                DocumentType::Outbound | DocumentType::ProductionIssue => StockCheck::Enforce,
                _ => StockCheck::Unchecked,
            };
            assert_eq!(effect.check, expected, "{doc_type}");
        }
    }

    #[test]
    fn production_issue_moves_into_production_location() {
        let l = line(dec!(3));
        let prod = LocationId::new();
        let postings = DocumentType::ProductionIssue
            .ledger_effect()
            .postings(&l, Some(prod))
            .unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].key, l.key);
        assert_eq!(postings[0].delta, dec!(-3));
        assert_eq!(postings[0].check, StockCheck::Enforce);
        assert_eq!(postings[1].key, l.key.at(prod));
        assert_eq!(postings[1].delta, dec!(3));
    }

    #[test]
    fn production_receipt_leaves_production_location_untouched() {
        let l = line(dec!(7));
        let postings = DocumentType::ProductionReceipt
            .ledger_effect()
            .postings(&l, Some(LocationId::new()))
            .unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].delta, dec!(7));
    }

    #[test]
    fn production_types_require_configured_location() {
        let l = line(dec!(1));
        for doc_type in [DocumentType::ProductionIssue, DocumentType::ProductionReceipt] {
            let err = doc_type.ledger_effect().postings(&l, None).unwrap_err();
            assert!(matches!(err, EngineError::Misconfiguration(_)), "{doc_type}");
        }
    }

    #[test]
    fn meta_cell_code_is_read_from_metadata() {
        let mut d = doc(DocumentType::Inbound);
        assert_eq!(d.meta_cell_code(), None);
        d.meta = Some(serde_json::json!({ "cell_code": "A-01-02" }));
        assert_eq!(d.meta_cell_code(), Some("A-01-02"));
    }

    #[test]
    fn wire_names_parse_back() {
        for t in DocumentType::ALL {
            assert_eq!(t.as_str().parse::<DocumentType>().unwrap(), t);
        }
        for st in DocumentStatus::ALL {
            assert_eq!(st.as_str().parse::<DocumentStatus>().unwrap(), st);
        }
        assert!("transfer".parse::<DocumentType>().is_err());
    }

    #[test]
    fn pallet_guard() {
        assert!(doc(DocumentType::Inbound).ensure_pallet_document().is_ok());
        assert!(doc(DocumentType::Outbound).ensure_pallet_document().is_ok());
        assert!(doc(DocumentType::Move).ensure_pallet_document().is_err());
        assert!(doc(DocumentType::Inbound).ensure_type(DocumentType::Outbound).is_err());
    }
}
