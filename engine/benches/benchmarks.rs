//! Performance benchmarks for tablesync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use tablesync_engine::{
    async_trait, condense, DataSource, Filter, Item, MemoryDataSource, OperationRecord,
    OperationStore, OperationType, OrderBy, Page, Query, RemoteError, RemoteTable, SyncConfig,
    SyncEngine,
};
use tokio::runtime::Runtime;

struct AcceptAll;

#[async_trait]
impl RemoteTable for AcceptAll {
    async fn send(&self, operation: &OperationRecord) -> Result<Option<Item>, RemoteError> {
        Ok(Some(operation.item.clone()))
    }

    async fn fetch_page(&self, _: &Query, _: usize, _: usize) -> Result<Page, RemoteError> {
        Ok(Page::default())
    }
}

fn todo(i: usize) -> Item {
    json!({"id": format!("todo_{}", i), "text": format!("Todo {}", i), "done": i % 2 == 0})
        .as_object()
        .cloned()
        .unwrap()
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_condense(c: &mut Criterion) {
    let mut group = c.benchmark_group("condense");

    let queued = OperationRecord::new(1, "todo", "todo_1", OperationType::Update, todo(1));
    group.bench_function("update_over_update", |b| {
        b.iter(|| condense(black_box(OperationType::Update), black_box(Some(&queued))))
    });
    group.bench_function("nothing_queued", |b| {
        b.iter(|| condense(black_box(OperationType::Insert), black_box(None)))
    });

    group.finish();
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    let rt = runtime();

    group.bench_function("insert", |b| {
        let engine = rt
            .block_on(SyncEngine::open(
                Arc::new(MemoryDataSource::new()),
                Arc::new(AcceptAll),
                SyncConfig::default(),
            ))
            .unwrap();
        let mut i = 0;

        b.iter(|| {
            i += 1;
            rt.block_on(engine.enqueue_insert("todo", black_box(todo(i))))
        })
    });

    group.bench_function("update_condensed", |b| {
        let engine = rt
            .block_on(SyncEngine::open(
                Arc::new(MemoryDataSource::new()),
                Arc::new(AcceptAll),
                SyncConfig::default(),
            ))
            .unwrap();

        b.iter(|| rt.block_on(engine.enqueue_update("todo", black_box(todo(1)))))
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("operation_store");
    let rt = runtime();

    for size in [100, 1000].iter() {
        let source: Arc<dyn DataSource> = Arc::new(MemoryDataSource::new());
        rt.block_on(async {
            let mut store = OperationStore::load(source.clone()).await.unwrap();
            for i in 0..*size {
                let op = OperationRecord::new(i as u64, "todo", format!("todo_{}", i), OperationType::Insert, todo(i));
                store.append(op).await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::new("load", size), size, |b, _| {
            b.iter(|| rt.block_on(OperationStore::load(source.clone())))
        });

        group.bench_with_input(BenchmarkId::new("push_drain", size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let engine = SyncEngine::open(
                        Arc::new(MemoryDataSource::new()),
                        Arc::new(AcceptAll),
                        SyncConfig::default(),
                    )
                    .await
                    .unwrap();
                    for i in 0..size {
                        engine.enqueue_insert("todo", todo(i)).await.unwrap();
                    }
                    engine.push().await
                })
            })
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    for size in [100, 1000].iter() {
        let rows: Vec<Item> = (0..*size).map(todo).collect();
        let query = Query::table("todo")
            .with_filter(Filter::eq("done", true))
            .order_by(OrderBy::desc("text"))
            .top(20);

        group.bench_with_input(BenchmarkId::new("apply", size), size, |b, _| {
            b.iter(|| black_box(&query).apply(rows.iter()))
        });
    }

    group.bench_function("operation_to_row", |b| {
        let op = OperationRecord::new(1, "todo", "todo_1", OperationType::Update, todo(1));
        b.iter(|| black_box(&op).to_row())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_condense,
    bench_enqueue,
    bench_queue,
    bench_query,
);
criterion_main!(benches);
