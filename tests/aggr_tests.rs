//! Grouped Aggregation Integration Tests
//!
//! Covers incremental aggregates over pre-sorted input, the eager single
//! group when there is no GROUP BY, non-incremental aggregates (DISTINCT and
//! MEDIAN) spilling through their external sort buffers, memory-budget
//! validation, and the compiled ordering/uniqueness rules.

use std::sync::Arc;

use rowboat::exec::{AggrOp, MergeSortOp, QueryOp, StatementContext, TableScanOp};
use rowboat::expr::{AggrExpr, AggrFunc, ValExpr};
use rowboat::value::{DataType, Row, Value};
use rowboat::{BaseTableMetadata, Catalog, ExecutorError, StatsManager, StorageManager, TableMetadata};
use tempfile::TempDir;

const BLOCK: usize = 128;

// ============================================================================
// Test Helpers
// ============================================================================

fn setup() -> (StatementContext, TempDir) {
    let tmp = TempDir::new().unwrap();
    let sm = Arc::new(StorageManager::new(tmp.path()).unwrap());
    let ctx = StatementContext::new(
        sm,
        Arc::new(Catalog::new()),
        Arc::new(StatsManager::new(BLOCK)),
        BLOCK,
    );
    (ctx, tmp)
}

fn make_table(ctx: &StatementContext, name: &str, rows: Vec<Row>) -> BaseTableMetadata {
    let schema = TableMetadata::new(
        vec!["a".to_string(), "b".to_string()],
        vec![DataType::Integer, DataType::Integer],
    );
    let file = ctx
        .sm
        .heap_file(ctx.tx, name, schema.column_types().to_vec(), true)
        .unwrap();
    file.batch_append(&rows).unwrap();
    ctx.stats
        .register_table(name, rows.len() as u64, schema.estimated_row_size());
    BaseTableMetadata::new(name, schema)
}

fn int2(a: i64, b: i64) -> Row {
    Row::new(vec![Value::Integer(a), Value::Integer(b)])
}

fn collect(op: &dyn QueryOp) -> Vec<Row> {
    op.execute().unwrap().map(|r| r.unwrap()).collect()
}

fn col_a() -> ValExpr {
    ValExpr::column("r", "a", DataType::Integer)
}

fn col_b() -> ValExpr {
    ValExpr::column("r", "b", DataType::Integer)
}

/// Scan `name` pre-sorted on column `a` (the aggregation contract).
fn sorted_scan(ctx: &StatementContext, meta: BaseTableMetadata) -> Arc<MergeSortOp> {
    let scan = Arc::new(TableScanOp::new(ctx, "r", meta));
    Arc::new(MergeSortOp::new(scan, vec![col_a()], vec![true], 3, None).unwrap())
}

// ============================================================================
// Incremental Aggregation
// ============================================================================

#[test]
fn test_group_by_sum() {
    let (ctx, _tmp) = setup();
    let meta = make_table(
        &ctx,
        "r",
        vec![int2(1, 10), int2(1, 20), int2(2, 30), int2(2, 40), int2(3, 50)],
    );
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::new(AggrFunc::Sum, col_b())],
        None,
        6,
    )
    .unwrap();
    assert_eq!(
        collect(&aggr),
        vec![int2(1, 30), int2(2, 70), int2(3, 50)]
    );
    ctx.finish().unwrap();
}

#[test]
fn test_group_by_count_min_max_avg() {
    let (ctx, _tmp) = setup();
    let meta = make_table(
        &ctx,
        "r",
        vec![int2(1, 10), int2(1, 20), int2(2, 5), int2(2, 40)],
    );
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![
            AggrExpr::count_star(),
            AggrExpr::new(AggrFunc::Min, col_b()),
            AggrExpr::new(AggrFunc::Max, col_b()),
            AggrExpr::new(AggrFunc::Avg, col_b()),
        ],
        None,
        6,
    )
    .unwrap();
    let result = collect(&aggr);
    assert_eq!(
        result,
        vec![
            Row::new(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(10),
                Value::Integer(20),
                Value::Float(15.0),
            ]),
            Row::new(vec![
                Value::Integer(2),
                Value::Integer(2),
                Value::Integer(5),
                Value::Integer(40),
                Value::Float(22.5),
            ]),
        ]
    );
}

#[test]
fn test_aggregation_without_group_by() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![int2(1, 10), int2(2, 20), int2(3, 12)]);
    let scan = Arc::new(TableScanOp::new(&ctx, "r", meta));
    let aggr = AggrOp::new(
        scan,
        vec![],
        vec![
            AggrExpr::count_star(),
            AggrExpr::new(AggrFunc::Sum, col_b()),
        ],
        None,
        3,
    )
    .unwrap();
    assert_eq!(
        collect(&aggr),
        vec![Row::new(vec![Value::Integer(3), Value::Integer(42)])]
    );
}

#[test]
fn test_empty_input_without_group_by_emits_init_row() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![]);
    let scan = Arc::new(TableScanOp::new(&ctx, "r", meta));
    let aggr = AggrOp::new(
        scan,
        vec![],
        vec![
            AggrExpr::count_star(),
            AggrExpr::new(AggrFunc::Sum, col_b()),
        ],
        None,
        3,
    )
    .unwrap();
    // one row: COUNT(*) = 0 and SUM still at its init state
    assert_eq!(
        collect(&aggr),
        vec![Row::new(vec![Value::Integer(0), Value::Null])]
    );
}

#[test]
fn test_empty_input_with_group_by_emits_nothing() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![]);
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::count_star()],
        None,
        6,
    )
    .unwrap();
    assert!(collect(&aggr).is_empty());
}

// ============================================================================
// Non-Incremental Aggregation (DISTINCT, MEDIAN)
// ============================================================================

#[test]
fn test_count_distinct() {
    let (ctx, _tmp) = setup();
    let meta = make_table(
        &ctx,
        "r",
        vec![int2(1, 5), int2(1, 5), int2(1, 6), int2(2, 7), int2(2, 7)],
    );
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::new_distinct(AggrFunc::Count, col_b())],
        None,
        6,
    )
    .unwrap();
    assert_eq!(collect(&aggr), vec![int2(1, 2), int2(2, 1)]);
    assert!(ctx.sm.live_temp_files(ctx.tmp_tx).is_empty());
}

#[test]
fn test_sum_distinct_with_spill() {
    let (ctx, _tmp) = setup();
    // one large group with heavy duplication; the per-aggregate sort buffer
    // (3 blocks of 128 bytes) must spill runs to disk
    let mut rows = Vec::new();
    for i in 0..600i64 {
        rows.push(int2(1, i % 20));
    }
    let meta = make_table(&ctx, "r", rows);
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::new_distinct(AggrFunc::Sum, col_b())],
        None,
        3,
    )
    .unwrap();
    // sum of distinct values 0..19
    assert_eq!(collect(&aggr), vec![int2(1, 190)]);
    assert!(ctx.sm.live_temp_files(ctx.tmp_tx).is_empty());
}

#[test]
fn test_median_receives_sorted_values() {
    let (ctx, _tmp) = setup();
    let meta = make_table(
        &ctx,
        "r",
        vec![int2(1, 30), int2(1, 10), int2(1, 20), int2(2, 9), int2(2, 7)],
    );
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::new(AggrFunc::Median, col_b())],
        None,
        6,
    )
    .unwrap();
    // group 1 sorts to [10, 20, 30]; group 2 to [7, 9] (lower middle)
    assert_eq!(collect(&aggr), vec![int2(1, 20), int2(2, 7)]);
}

#[test]
fn test_mixed_incremental_and_distinct_aggregates() {
    let (ctx, _tmp) = setup();
    let meta = make_table(
        &ctx,
        "r",
        vec![int2(1, 5), int2(1, 5), int2(1, 8), int2(2, 3)],
    );
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![
            AggrExpr::new(AggrFunc::Sum, col_b()),
            AggrExpr::new_distinct(AggrFunc::Count, col_b()),
        ],
        None,
        6,
    )
    .unwrap();
    assert_eq!(
        collect(&aggr),
        vec![
            Row::new(vec![Value::Integer(1), Value::Integer(18), Value::Integer(2)]),
            Row::new(vec![Value::Integer(2), Value::Integer(3), Value::Integer(1)]),
        ]
    );
}

// ============================================================================
// Configuration and Compiled Properties
// ============================================================================

#[test]
fn test_budget_below_three_blocks_per_sort_is_rejected() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![int2(1, 1)]);
    let result = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![
            AggrExpr::new_distinct(AggrFunc::Count, col_b()),
            AggrExpr::new(AggrFunc::Median, col_b()),
        ],
        None,
        5, // two non-incremental aggregates need at least 6
    );
    assert!(matches!(result, Err(ExecutorError::Config(_))));
}

#[test]
fn test_single_group_by_column_marked_unique() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![int2(1, 1)]);
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::new(AggrFunc::Sum, col_b())],
        None,
        6,
    )
    .unwrap();
    let props = aggr.compiled().unwrap();
    assert!(props.unique_columns.contains(&0));
    // output stays ordered by the group-by column the input was sorted on
    assert_eq!(props.ordered_columns, vec![0]);
    assert_eq!(props.ordered_asc, vec![true]);
}

#[test]
fn test_output_column_naming() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![int2(1, 1)]);
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![AggrExpr::new(AggrFunc::Sum, col_b())],
        Some(vec![None, Some("total".to_string())]),
        6,
    )
    .unwrap();
    let props = aggr.compiled().unwrap();
    assert_eq!(
        props.output_metadata.column_names(),
        &["a".to_string(), "total".to_string()]
    );
    assert_eq!(
        props.output_metadata.column_types(),
        &[DataType::Integer, DataType::Integer]
    );
}

#[test]
fn test_aggregate_output_types() {
    let (ctx, _tmp) = setup();
    let meta = make_table(&ctx, "r", vec![int2(1, 1)]);
    let aggr = AggrOp::new(
        sorted_scan(&ctx, meta),
        vec![col_a()],
        vec![
            AggrExpr::count_star(),
            AggrExpr::new(AggrFunc::Avg, col_b()),
        ],
        None,
        6,
    )
    .unwrap();
    let props = aggr.compiled().unwrap();
    assert_eq!(
        props.output_metadata.column_types(),
        &[DataType::Integer, DataType::Integer, DataType::Float]
    );
}
