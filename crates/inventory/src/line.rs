//! Document lines: accumulated signed deltas per ledger key.

use serde::{Deserialize, Serialize};

use stockroom_core::{DocumentId, Entity, LineId, Qty};

use crate::stock::StockKey;

/// One line of a document, unique per (document, product, location, batch, expiry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub id: LineId,
    pub doc_id: DocumentId,
    pub key: StockKey,
    pub qty_expected: Option<Qty>,
    /// Accumulated signed quantity. Decrement legs of move and inventory
    /// documents are negative lines.
    pub qty_fact: Qty,
}

impl DocumentLine {
    /// Create a line holding `delta` as given.
    pub fn new(doc_id: DocumentId, key: StockKey, delta: Qty) -> Self {
        Self {
            id: LineId::new(),
            doc_id,
            key,
            qty_expected: None,
            qty_fact: delta,
        }
    }

    /// Add a signed delta. The result never crosses zero: a positive line
    /// stops at zero going down, a negative line stops at zero going up.
    /// Returns the new quantity.
    pub fn accumulate(&mut self, delta: Qty) -> Qty {
        let next = self.qty_fact + delta;
        self.qty_fact = if self.qty_fact < Qty::ZERO {
            next.min(Qty::ZERO)
        } else {
            next.max(Qty::ZERO)
        };
        self.qty_fact
    }
}

impl Entity for DocumentLine {
    type Id = LineId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockroom_core::{LocationId, ProductId};

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new(), None, None)
    }

    #[test]
    fn accumulate_adds_and_clamps() {
        let mut line = DocumentLine::new(DocumentId::new(), key(), dec!(3));
        assert_eq!(line.accumulate(dec!(2)), dec!(5));
        assert_eq!(line.accumulate(dec!(-7)), Qty::ZERO);
        assert_eq!(line.accumulate(dec!(1.25)), dec!(1.25));
    }

    #[test]
    fn negative_first_delta_is_kept() {
        let line = DocumentLine::new(DocumentId::new(), key(), dec!(-4));
        assert_eq!(line.qty_fact, dec!(-4));
    }

    #[test]
    fn negative_line_accumulates_and_stops_at_zero() {
        let mut line = DocumentLine::new(DocumentId::new(), key(), dec!(-4));
        assert_eq!(line.accumulate(dec!(-1)), dec!(-5));
        assert_eq!(line.accumulate(dec!(2)), dec!(-3));
        assert_eq!(line.accumulate(dec!(10)), Qty::ZERO);
    }

    #[test]
    fn positive_then_negated_delta_restores_previous_value() {
        let mut line = DocumentLine::new(DocumentId::new(), key(), dec!(2));
        line.accumulate(dec!(10));
        line.accumulate(dec!(-10));
        assert_eq!(line.qty_fact, dec!(2));
    }

    proptest! {
        /// Property: no single accumulation moves qty_fact across zero.
        #[test]
        fn qty_fact_never_crosses_zero(
            first in -100i64..100i64,
            deltas in prop::collection::vec(-100i64..100i64, 1..50),
        ) {
            let mut line = DocumentLine::new(DocumentId::new(), key(), Qty::from(first));
            for d in deltas {
                let before = line.qty_fact;
                let q = line.accumulate(Qty::from(d));
                if before < Qty::ZERO {
                    prop_assert!(q <= Qty::ZERO);
                } else {
                    prop_assert!(q >= Qty::ZERO);
                }
            }
        }
    }
}
