use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

use stockbook_core::{ArticleId, DocumentId, ExpectedVersion, LineId, UserId, WarehouseId};
use stockbook_documents::{Document, DocumentLine, DocumentType};
use stockbook_infra::{
    InMemoryStore, SyncConfig, SyncEngine, WriteContext, audit_balances,
};

const ARTICLES: i64 = 50;

fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_reference_data(
        (1..=ARTICLES).map(ArticleId::new),
        [WarehouseId::new(1)],
    ))
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

fn delivery_note(id: i64, lines: i64) -> Document {
    (0..lines).fold(
        Document::draft(DocumentId::new(id), DocumentType::DeliveryNote, day())
            .with_warehouse(WarehouseId::new(1)),
        |doc, n| {
            doc.with_line(DocumentLine::article(
                LineId::new(id * 1_000 + n),
                n as u32 + 1,
                ArticleId::new(n % ARTICLES + 1),
                Decimal::new(n + 1, 1),
            ))
        },
    )
}

fn bench_save_and_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_and_sync");
    let ctx = WriteContext::now(UserId::new(1));

    for lines in [1i64, 10, 100].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::new("new_document", lines), lines, |b, &lines| {
            let engine = SyncEngine::new(store(), SyncConfig::default());
            let mut id = 0;
            b.iter(|| {
                id += 1;
                let doc = delivery_note(id, lines);
                black_box(
                    engine
                        .save_and_sync(&doc, ExpectedVersion::NoRecord, &ctx)
                        .unwrap(),
                );
            });
        });
    }
    group.finish();
}

fn bench_idempotent_resync(c: &mut Criterion) {
    let mut group = c.benchmark_group("resync_unchanged");
    let ctx = WriteContext::now(UserId::new(1));

    for lines in [10i64, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, &lines| {
            let engine = SyncEngine::new(store(), SyncConfig::default());
            engine
                .save_and_sync(&delivery_note(1, lines), ExpectedVersion::NoRecord, &ctx)
                .unwrap();
            b.iter(|| black_box(engine.sync(DocumentId::new(1), &ctx).unwrap()));
        });
    }
    group.finish();
}

fn bench_audit(c: &mut Criterion) {
    let mut group = c.benchmark_group("audit_balances");
    group.sample_size(20);
    let ctx = WriteContext::now(UserId::new(1));

    for documents in [10i64, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(documents),
            documents,
            |b, &documents| {
                let store = store();
                let engine = SyncEngine::new(store.clone(), SyncConfig::default());
                for id in 1..=documents {
                    engine
                        .save_and_sync(&delivery_note(id, 10), ExpectedVersion::NoRecord, &ctx)
                        .unwrap();
                }
                b.iter(|| black_box(audit_balances(&store).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_save_and_sync,
    bench_idempotent_resync,
    bench_audit
);
criterion_main!(benches);
