#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use stockroom_core::{Actor, UserId};
use stockroom_engine::Warehouse;
use stockroom_infra::{InMemoryAuditSink, InMemoryStore, Settings};
use stockroom_inventory::{Location, Product, StockKey};

pub struct World {
    pub wh: Arc<Warehouse<InMemoryStore>>,
    pub audit: Arc<InMemoryAuditSink>,
    pub flour: Product,
    pub sugar: Product,
    pub salt: Product,
    pub a1: Location,
    pub a2: Location,
    pub prod: Location,
}

impl World {
    pub fn key(&self, product: &Product, location: &Location) -> StockKey {
        StockKey::new(product.id, location.id, None, None)
    }

    /// Put `qty` on hand without going through a document.
    pub async fn stock_up(&self, key: &StockKey, qty: Decimal) {
        self.wh
            .ledger()
            .adjust(&admin(), key.clone(), qty)
            .await
            .expect("seed stock");
    }

    pub async fn qty(&self, key: &StockKey) -> Decimal {
        self.wh.ledger().qty(key).await.expect("read stock")
    }
}

pub fn admin() -> Actor {
    Actor::admin(UserId::new())
}

pub fn worker() -> Actor {
    Actor::worker(UserId::new())
}

pub async fn world() -> World {
    world_with(Settings::default()).await
}

pub async fn world_with(settings: Settings) -> World {
    stockroom_observability::init_for_tests();

    let audit = Arc::new(InMemoryAuditSink::new());
    let wh = Warehouse::in_memory(&settings, audit.clone()).expect("valid settings");

    let flour = Product::new("FL-001", "Flour 50kg", "4600000000011");
    let sugar = Product::new("SG-001", "Sugar 25kg", "4600000000028");
    let salt = Product::new("SL-001", "Salt 10kg", "4600000000035");
    let a1 = Location::new("MAIN", Some("A"), "A-01-01");
    let a2 = Location::new("MAIN", Some("A"), "A-01-02");
    let prod = Location::new("MAIN", None, settings.production_location_code.as_str());

    let catalog = wh.catalog();
    for product in [&flour, &sugar, &salt] {
        catalog.upsert_product(product).await.expect("seed product");
    }
    for location in [&a1, &a2, &prod] {
        catalog.upsert_location(location).await.expect("seed location");
    }

    World {
        wh: Arc::new(wh),
        audit,
        flour,
        sugar,
        salt,
        a1,
        a2,
        prod,
    }
}
