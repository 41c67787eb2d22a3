use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;

use stockroom_core::{Actor, UserId};
use stockroom_engine::{LineInput, Warehouse};
use stockroom_infra::{InMemoryAuditSink, InMemoryStore, Settings};
use stockroom_inventory::{DocumentType, Location, Product};
use stockroom_sscc::{compute_check_digit, normalize, CheckDigitMode};

fn bench_check_digit(c: &mut Criterion) {
    let mut group = c.benchmark_group("sscc");
    group.bench_function("compute_check_digit", |b| {
        b.iter(|| compute_check_digit(black_box("04607046150000001")))
    });
    group.bench_function("normalize_scan", |b| {
        b.iter(|| normalize(black_box("00046070461500000018"), CheckDigitMode::Verify))
    });
    group.finish();
}

struct Fixture {
    wh: Warehouse<InMemoryStore>,
    products: Vec<Product>,
    cell: Location,
}

async fn fixture(line_count: usize) -> Fixture {
    let wh = Warehouse::in_memory(&Settings::default(), Arc::new(InMemoryAuditSink::new()))
        .expect("default settings are valid");
    let cell = Location::new("MAIN", Some("A"), "A-01-01");
    wh.catalog().upsert_location(&cell).await.expect("seed location");

    let mut products = Vec::with_capacity(line_count);
    for i in 0..line_count {
        let product = Product::new(format!("SKU-{i}"), format!("Product {i}"), format!("46{i:011}"));
        wh.catalog().upsert_product(&product).await.expect("seed product");
        products.push(product);
    }
    Fixture { wh, products, cell }
}

/// Create, fill and finish one inbound document with one line per product.
async fn inbound_round(f: &Fixture, actor: &Actor) {
    let documents = f.wh.documents();
    let doc = documents
        .create(actor, DocumentType::Inbound, None, None)
        .await
        .expect("create");
    for product in &f.products {
        documents
            .add_line(actor, doc.id, LineInput::new(product.id, f.cell.id, Decimal::ONE))
            .await
            .expect("add line");
    }
    documents.finish(actor, doc.id).await.expect("finish");
}

fn bench_document_finish(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let actor = Actor::worker(UserId::new());

    let mut group = c.benchmark_group("document_finish");
    for lines in [1usize, 10, 50] {
        let fixture = runtime.block_on(fixture(lines));
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::new("inbound", lines), &fixture, |b, f| {
            b.to_async(&runtime).iter(|| inbound_round(f, &actor))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_check_digit, bench_document_finish);
criterion_main!(benches);
