mod common;

use std::collections::HashSet;
use std::time::Duration;

use rust_decimal_macros::dec;
use stockroom_core::EngineError;
use stockroom_engine::LineInput;
use stockroom_infra::{Settings, StoreTx, WarehouseStore};
use stockroom_inventory::DocumentType;

use common::{admin, world, world_with, worker};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_movements_on_one_key_lose_no_updates() {
    let w = world().await;
    let key = w.key(&w.flour, &w.a1);
    w.stock_up(&key, dec!(100)).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let wh = w.wh.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            let delta = if i % 2 == 0 { dec!(3) } else { dec!(-2) };
            wh.ledger().adjust(&worker(), key, delta).await.map(|_| delta)
        }));
    }

    let mut applied = dec!(0);
    for handle in handles {
        applied += handle.await.unwrap().unwrap();
    }

    assert_eq!(w.qty(&key).await, dec!(100) + applied);
    assert_eq!(applied, dec!(20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inbound_finishes_sum_up() {
    let w = world().await;
    let key = w.key(&w.sugar, &w.a2);

    let mut handles = Vec::new();
    for n in 1..=12u32 {
        let wh = w.wh.clone();
        let (product, location) = (w.sugar.id, w.a2.id);
        handles.push(tokio::spawn(async move {
            let actor = worker();
            let doc = wh.documents().create(&actor, DocumentType::Inbound, None, None).await?;
            let qty = rust_decimal::Decimal::from(n);
            wh.documents()
                .add_line(&actor, doc.id, LineInput::new(product, location, qty))
                .await?;
            wh.documents().finish(&actor, doc.id).await?;
            Ok::<_, EngineError>(qty)
        }));
    }

    let mut total = dec!(0);
    for handle in handles {
        total += handle.await.unwrap().unwrap();
    }
    assert_eq!(total, dec!(78));
    assert_eq!(w.qty(&key).await, total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_are_distinct_and_increasing() {
    let w = world().await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let wh = w.wh.clone();
        handles.push(tokio::spawn(async move { wh.sscc().allocate(&worker()).await }));
    }

    let mut codes = Vec::new();
    for handle in handles {
        codes.push(handle.await.unwrap().unwrap());
    }

    let distinct: HashSet<_> = codes.iter().cloned().collect();
    assert_eq!(distinct.len(), 32);

    // Serials are the 7 digits before the check digit; together they are exactly 1..=32.
    let mut serials: Vec<u64> = codes
        .iter()
        .map(|code| code.base()[10..].parse().unwrap())
        .collect();
    serials.sort_unstable();
    assert_eq!(serials, (1..=32).collect::<Vec<u64>>());

    let next = w.wh.sscc().allocate(&worker()).await.unwrap();
    assert_eq!(next.base()[10..].parse::<u64>().unwrap(), 33);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_row_lock_surfaces_as_contention() {
    let settings = Settings {
        lock_timeout_ms: 50,
        ..Settings::default()
    };
    let w = world_with(settings).await;
    let key = w.key(&w.salt, &w.a1);

    let mut blocker = w.wh.store().begin().await.unwrap();
    blocker.lock_stock(&key).await.unwrap();

    let err = w.wh.ledger().adjust(&admin(), key.clone(), dec!(5)).await.unwrap_err();
    assert!(matches!(err, EngineError::Contention(_)), "got {err:?}");
    assert!(err.is_retryable());

    blocker.rollback().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    w.wh.ledger().adjust(&admin(), key.clone(), dec!(5)).await.unwrap();
    assert_eq!(w.qty(&key).await, dec!(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn locked_document_blocks_a_second_finish() {
    let settings = Settings {
        lock_timeout_ms: 50,
        ..Settings::default()
    };
    let w = world_with(settings).await;
    let actor = worker();
    let doc = w.wh.documents().create(&actor, DocumentType::Inbound, None, None).await.unwrap();

    let mut blocker = w.wh.store().begin().await.unwrap();
    blocker.lock_document(doc.id).await.unwrap();

    let err = w.wh.documents().finish(&actor, doc.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Contention(_)));
    drop(blocker);

    w.wh.documents().finish(&actor, doc.id).await.unwrap();
}
