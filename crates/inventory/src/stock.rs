//! Ledger rows: the quantity of record per (product, location, batch, expiry).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{Actor, EngineError, EngineResult, Entity, LocationId, ProductId, Qty, StockId};

use crate::catalog::Location;

/// Unique key of a ledger row.
///
/// `Ord` gives the global lock order used when one transaction touches several rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl StockKey {
    pub fn new(
        product_id: ProductId,
        location_id: LocationId,
        batch: Option<String>,
        expiry_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            product_id,
            location_id,
            batch,
            expiry_date,
        }
    }

    /// Same product / batch / expiry at another location.
    pub fn at(&self, location_id: LocationId) -> Self {
        Self {
            location_id,
            ..self.clone()
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "product {} at {}", self.product_id, self.location_id)?;
        if let Some(batch) = &self.batch {
            write!(f, " batch {batch}")?;
        }
        if let Some(expiry) = &self.expiry_date {
            write!(f, " exp {expiry}")?;
        }
        Ok(())
    }
}

/// Negative-stock configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NegativeStockPolicy {
    /// Any actor may drive stock below zero.
    pub allow_outbound_negative: bool,
    /// Admins may drive stock below zero.
    pub admin_override_negative: bool,
}

impl NegativeStockPolicy {
    pub fn permits(&self, actor: &Actor) -> bool {
        self.allow_outbound_negative || (self.admin_override_negative && actor.is_admin())
    }
}

/// Whether the insufficient-stock rule is consulted for a posting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockCheck {
    Enforce,
    Unchecked,
}

/// One ledger row. Created lazily at zero, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub key: StockKey,
    pub qty: Qty,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    /// A fresh zero-quantity row for `key`.
    pub fn zero(key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            id: StockId::new(),
            key,
            qty: Qty::ZERO,
            updated_at: now,
        }
    }

    /// `qty_new = qty_old + delta`.
    ///
    /// A decrement that would leave the row below zero fails with
    /// `InsufficientStock` unless the policy permits negative stock for `actor`.
    /// Increments are always accepted, even on a row that is already negative.
    pub fn apply_delta(
        &mut self,
        delta: Qty,
        check: StockCheck,
        policy: &NegativeStockPolicy,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> EngineResult<Qty> {
        let next = self.qty + delta;
        if check == StockCheck::Enforce
            && delta < Qty::ZERO
            && next < Qty::ZERO
            && !policy.permits(actor)
        {
            return Err(EngineError::insufficient(
                self.key.to_string(),
                self.qty,
                -delta,
            ));
        }
        self.qty = next;
        self.updated_at = now;
        Ok(next)
    }
}

impl Entity for Stock {
    type Id = StockId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Read-only listing filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub warehouse: Option<String>,
    pub zone: Option<String>,
    pub cell_code: Option<String>,
    pub product_id: Option<ProductId>,
}

impl StockFilter {
    /// Whether `row`, stored at `location`, passes the filter.
    pub fn matches(&self, row: &Stock, location: &Location) -> bool {
        self.product_id.is_none_or(|p| p == row.key.product_id)
            && self.warehouse.as_deref().is_none_or(|w| w == location.warehouse)
            && self.zone.as_deref().is_none_or(|z| location.zone.as_deref() == Some(z))
            && self.cell_code.as_deref().is_none_or(|c| c == location.cell_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockroom_core::UserId;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new(), None, None)
    }

    fn strict() -> NegativeStockPolicy {
        NegativeStockPolicy {
            allow_outbound_negative: false,
            admin_override_negative: true,
        }
    }

    #[test]
    fn decrement_below_zero_is_rejected_for_worker() {
        let mut row = Stock::zero(key(), Utc::now());
        row.qty = dec!(5);
        let worker = Actor::worker(UserId::new());

        let err = row
            .apply_delta(dec!(-10), StockCheck::Enforce, &strict(), &worker, Utc::now())
            .unwrap_err();
        match err {
            EngineError::InsufficientStock { available, requested, .. } => {
                assert_eq!(available, dec!(5));
                assert_eq!(requested, dec!(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(row.qty, dec!(5));
    }

    #[test]
    fn admin_override_allows_negative() {
        let mut row = Stock::zero(key(), Utc::now());
        row.qty = dec!(5);
        let admin = Actor::admin(UserId::new());

        let qty = row
            .apply_delta(dec!(-10), StockCheck::Enforce, &strict(), &admin, Utc::now())
            .unwrap();
        assert_eq!(qty, dec!(-5));
    }

    #[test]
    fn admin_without_override_flag_is_rejected() {
        let mut row = Stock::zero(key(), Utc::now());
        let admin = Actor::admin(UserId::new());
        let policy = NegativeStockPolicy::default();
        assert!(row
            .apply_delta(dec!(-1), StockCheck::Enforce, &policy, &admin, Utc::now())
            .is_err());
    }

    #[test]
    fn global_flag_allows_negative_for_anyone() {
        let mut row = Stock::zero(key(), Utc::now());
        let worker = Actor::worker(UserId::new());
        let policy = NegativeStockPolicy {
            allow_outbound_negative: true,
            admin_override_negative: false,
        };
        assert_eq!(
            row.apply_delta(dec!(-3), StockCheck::Enforce, &policy, &worker, Utc::now()).unwrap(),
            dec!(-3)
        );
    }

    #[test]
    fn unchecked_postings_skip_the_rule() {
        let mut row = Stock::zero(key(), Utc::now());
        let worker = Actor::worker(UserId::new());
        assert_eq!(
            row.apply_delta(dec!(-2), StockCheck::Unchecked, &strict(), &worker, Utc::now()).unwrap(),
            dec!(-2)
        );
    }

    #[test]
    fn increments_on_negative_row_are_accepted() {
        let mut row = Stock::zero(key(), Utc::now());
        row.qty = dec!(-5);
        let worker = Actor::worker(UserId::new());
        assert_eq!(
            row.apply_delta(dec!(2), StockCheck::Enforce, &strict(), &worker, Utc::now()).unwrap(),
            dec!(-3)
        );
    }

    #[test]
    fn draining_to_exactly_zero_is_allowed() {
        let mut row = Stock::zero(key(), Utc::now());
        row.qty = dec!(4.5);
        let worker = Actor::worker(UserId::new());
        assert_eq!(
            row.apply_delta(dec!(-4.5), StockCheck::Enforce, &strict(), &worker, Utc::now()).unwrap(),
            Qty::ZERO
        );
    }

    #[test]
    fn filter_matches_on_location_attributes() {
        let loc = Location::new("MAIN", Some("A"), "A-01-01");
        let mut row = Stock::zero(StockKey::new(ProductId::new(), loc.id, None, None), Utc::now());
        row.qty = dec!(3);

        assert!(StockFilter::default().matches(&row, &loc));
        let by_zone = StockFilter { zone: Some("A".into()), ..Default::default() };
        assert!(by_zone.matches(&row, &loc));
        let other_cell = StockFilter { cell_code: Some("B-02-01".into()), ..Default::default() };
        assert!(!other_cell.matches(&row, &loc));
        let other_product = StockFilter { product_id: Some(ProductId::new()), ..Default::default() };
        assert!(!other_product.matches(&row, &loc));
    }

    proptest! {
        /// Property: accepted deltas are additive and the row never dips below
        /// zero under a strict policy.
        #[test]
        fn accepted_deltas_sum_up(deltas in prop::collection::vec(-50i64..50i64, 1..40)) {
            let mut row = Stock::zero(key(), Utc::now());
            let worker = Actor::worker(UserId::new());
            let mut expected = Qty::ZERO;

            for d in deltas {
                let delta = Qty::from(d);
                if row.apply_delta(delta, StockCheck::Enforce, &strict(), &worker, Utc::now()).is_ok() {
                    expected += delta;
                }
                prop_assert!(row.qty >= Qty::ZERO);
            }
            prop_assert_eq!(row.qty, expected);
        }
    }
}
