//! External merge sort micro-benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use rowboat::exec::{MergeSortOp, QueryOp, StatementContext, TableScanOp};
use rowboat::expr::ValExpr;
use rowboat::value::{DataType, Row, Value};
use rowboat::{BaseTableMetadata, Catalog, StatsManager, StorageManager, TableMetadata};
use tempfile::TempDir;

const BLOCK: usize = 4096;

fn setup_table(n: i64) -> (StatementContext, BaseTableMetadata, TempDir) {
    let tmp = TempDir::new().expect("tempdir");
    let sm = Arc::new(StorageManager::new(tmp.path()).expect("manager"));
    let ctx = StatementContext::new(
        sm,
        Arc::new(Catalog::new()),
        Arc::new(StatsManager::new(BLOCK)),
        BLOCK,
    );
    let schema = TableMetadata::new(
        vec!["a".to_string(), "b".to_string()],
        vec![DataType::Integer, DataType::Integer],
    );
    let file = ctx
        .sm
        .heap_file(ctx.tx, "r", schema.column_types().to_vec(), true)
        .expect("heap file");
    let rows: Vec<Row> = (0..n)
        .map(|i| {
            Row::new(vec![
                Value::Integer((i * 2_654_435_761) % 1_000_003),
                Value::Integer(i),
            ])
        })
        .collect();
    file.batch_append(&rows).expect("append");
    (ctx, BaseTableMetadata::new("r", schema), tmp)
}

fn bench_external_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("external_sort");
    for &n in &[1_000i64, 10_000] {
        let (ctx, meta, _tmp) = setup_table(n);
        group.bench_with_input(BenchmarkId::new("rows", n), &n, |b, _| {
            b.iter(|| {
                let scan = Arc::new(TableScanOp::new(&ctx, "r", meta.clone()));
                let sort = MergeSortOp::new(
                    scan,
                    vec![ValExpr::column("r", "a", DataType::Integer)],
                    vec![true],
                    4,
                    None,
                )
                .expect("sort op");
                let count = sort
                    .execute()
                    .expect("stream")
                    .filter(|r| r.is_ok())
                    .count();
                assert_eq!(count, n as usize);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_external_sort);
criterion_main!(benches);
