//! Execution Utilities
//!
//! Block-budgeted building blocks shared by the heavy operators:
//! - `BufferedReader` / `BufferedWriter`: byte-budgeted staging of rows
//!   against an input stream or a heap file
//! - `MergeQueue`: stable k-way merge priority queue with an injected
//!   comparator; ties break on the source run index so earlier runs win
//! - `RunFileFactory`: the temp-file naming recipes for sort runs and
//!   per-aggregate runs
//! - `ExtSortBuffer`: sort-or-spill producer turning an unordered stream
//!   into a sorted (optionally deduplicated) sequence under a block budget

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::debug;

use crate::expr::EvalError;
use crate::storage::{HeapFile, HeapFileScan};
use crate::value::{Row, Value};

use super::error::{ExecResult, ExecutorError};
use super::{RowStream, StatementContext};

/// Comparator over extracted key tuples.
pub type KeyCmp = Arc<dyn Fn(&[Value], &[Value]) -> Ordering + Send + Sync>;

/// Extracts the comparison key tuple from a row.
pub type RowKeyFn = Arc<dyn Fn(&Row) -> Result<Vec<Value>, EvalError> + Send + Sync>;

/// Lexicographic comparator honoring per-key ascending/descending flags.
/// Keys beyond the flag list compare ascending.
pub fn key_comparator(orders_asc: Vec<bool>) -> KeyCmp {
    Arc::new(move |a: &[Value], b: &[Value]| {
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            let ord = x.cmp_total(y);
            let ord = if orders_asc.get(i).copied().unwrap_or(true) {
                ord
            } else {
                ord.reverse()
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    })
}

/// Key extractor that uses the whole row as its own key.
pub fn identity_key_fn() -> RowKeyFn {
    Arc::new(|row: &Row| Ok(row.values().to_vec()))
}

// ============================================================================
// Buffered reader / writer
// ============================================================================

/// Reads rows from an input stream and serves them one in-memory chunk at a
/// time, each chunk at most `num_blocks * block_size` bytes.
pub struct BufferedReader {
    num_blocks: usize,
    max_bytes: usize,
}

impl BufferedReader {
    pub fn new(num_blocks: usize, block_size: usize) -> Self {
        BufferedReader {
            num_blocks,
            max_bytes: num_blocks * block_size,
        }
    }

    /// Chunk the input stream. The final chunk may be smaller; a single row
    /// larger than the whole budget is fatal.
    pub fn iter_buffer<'a>(&self, input: RowStream<'a>) -> BufferedChunks<'a> {
        BufferedChunks {
            input,
            num_blocks: self.num_blocks,
            max_bytes: self.max_bytes,
            pending: None,
            done: false,
        }
    }
}

/// Iterator over byte-budgeted chunks of an input stream.
pub struct BufferedChunks<'a> {
    input: RowStream<'a>,
    num_blocks: usize,
    max_bytes: usize,
    pending: Option<Row>,
    done: bool,
}

impl Iterator for BufferedChunks<'_> {
    type Item = ExecResult<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buffer = Vec::new();
        let mut num_bytes = 0;
        if let Some(row) = self.pending.take() {
            num_bytes += row.estimated_size();
            buffer.push(row);
        }
        loop {
            match self.input.next() {
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(row)) => {
                    let row_size = row.estimated_size();
                    if row_size > self.max_bytes {
                        self.done = true;
                        return Some(Err(ExecutorError::RowTooLarge {
                            size: row_size,
                            blocks: self.num_blocks,
                            budget: self.max_bytes,
                        }));
                    }
                    if num_bytes + row_size > self.max_bytes {
                        // full chunk ready; hold this row for the next one
                        self.pending = Some(row);
                        return Some(Ok(buffer));
                    }
                    num_bytes += row_size;
                    buffer.push(row);
                }
                None => {
                    self.done = true;
                    if buffer.is_empty() {
                        return None;
                    }
                    return Some(Ok(buffer));
                }
            }
        }
    }
}

/// Buffers rows to be appended to a heap file, flushing when the byte budget
/// fills. Does not own the file's lifecycle.
pub struct BufferedWriter {
    file: HeapFile,
    max_bytes: usize,
    buffer: Vec<Row>,
    num_bytes: usize,
}

impl BufferedWriter {
    pub fn new(file: HeapFile, num_blocks: usize, block_size: usize) -> Self {
        BufferedWriter {
            file,
            max_bytes: num_blocks * block_size,
            buffer: Vec::new(),
            num_bytes: 0,
        }
    }

    /// Write a row, flushing automatically when the buffer fills.
    pub fn write(&mut self, row: Row) -> ExecResult<()> {
        self.num_bytes += row.estimated_size();
        self.buffer.push(row);
        if self.num_bytes >= self.max_bytes {
            self.flush()?;
        }
        Ok(())
    }

    /// Drain the buffer to the file.
    pub fn flush(&mut self) -> ExecResult<()> {
        if !self.buffer.is_empty() {
            self.file.batch_append(&self.buffer)?;
            self.buffer.clear();
            self.num_bytes = 0;
        }
        Ok(())
    }
}

// ============================================================================
// Merge priority queue
// ============================================================================

struct QueueEntry {
    keys: Vec<Value>,
    row: Row,
    source: usize,
    cmp: KeyCmp,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the max-heap pops the smallest entry; comparing the
        // source run index on ties keeps the merge stable
        (*self.cmp)(&self.keys, &other.keys)
            .then_with(|| self.source.cmp(&other.source))
            .reverse()
    }
}

/// A k-way merge priority queue with an injected comparator. Entries carry
/// the index of the run they came from; ties on the comparator dequeue the
/// earlier run first.
pub struct MergeQueue {
    heap: BinaryHeap<QueueEntry>,
    cmp: KeyCmp,
}

impl MergeQueue {
    pub fn new(cmp: KeyCmp) -> Self {
        MergeQueue {
            heap: BinaryHeap::new(),
            cmp,
        }
    }

    pub fn enqueue(&mut self, keys: Vec<Value>, row: Row, source: usize) {
        self.heap.push(QueueEntry {
            keys,
            row,
            source,
            cmp: Arc::clone(&self.cmp),
        });
    }

    /// Remove the smallest entry.
    pub fn dequeue(&mut self) -> Option<(Vec<Value>, Row, usize)> {
        self.heap.pop().map(|e| (e.keys, e.row, e.source))
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ============================================================================
// Temp run files
// ============================================================================

/// Creates and deletes an operator's temp run files under the statement's
/// temp transaction, following the engine's naming recipes.
#[derive(Clone)]
pub struct RunFileFactory {
    ctx: StatementContext,
    prefix: String,
}

impl RunFileFactory {
    /// Recipe for merge-sort runs: `.tmp-<op_id>-<level>-<run>`.
    pub fn sort_runs(ctx: &StatementContext, op_id: u64) -> Self {
        RunFileFactory {
            ctx: ctx.clone(),
            prefix: format!(".tmp-{op_id}"),
        }
    }

    /// Recipe for per-aggregate runs: `.tmp-<op_id>-<aggr_index>-<level>-<run>`.
    pub fn aggr_runs(ctx: &StatementContext, op_id: u64, aggr_index: usize) -> Self {
        RunFileFactory {
            ctx: ctx.clone(),
            prefix: format!(".tmp-{op_id}-{aggr_index}"),
        }
    }

    /// Create (truncated) the run file for `level` and ordinal `run`.
    pub fn create(&self, level: usize, run: usize) -> ExecResult<HeapFile> {
        let name = format!("{}-{level}-{run}", self.prefix);
        let file = self
            .ctx
            .sm
            .heap_file(self.ctx.tmp_tx, &name, Vec::new(), true)?;
        file.truncate()?;
        Ok(file)
    }

    pub fn delete(&self, file: &HeapFile) -> ExecResult<()> {
        self.ctx.sm.delete_heap_file(self.ctx.tmp_tx, file.name())?;
        Ok(())
    }
}

// ============================================================================
// Run merging
// ============================================================================

/// Streaming n-way merge over sorted runs. One buffered scan per run plays
/// the role of that run's memory block.
pub struct RunMerge {
    queue: MergeQueue,
    scans: Vec<HeapFileScan>,
    key_fn: RowKeyFn,
}

impl RunMerge {
    pub fn new(runs: &[HeapFile], key_fn: RowKeyFn, cmp: KeyCmp) -> ExecResult<Self> {
        let mut queue = MergeQueue::new(cmp);
        let mut scans = Vec::with_capacity(runs.len());
        for run in runs {
            scans.push(run.iter_scan()?);
        }
        for (i, scan) in scans.iter_mut().enumerate() {
            if let Some(row) = scan.next().transpose()? {
                let keys = (*key_fn)(&row)?;
                queue.enqueue(keys, row, i);
            }
        }
        Ok(RunMerge {
            queue,
            scans,
            key_fn,
        })
    }

    /// Next merged entry with its key tuple, refilling from the source run.
    pub fn next_entry(&mut self) -> ExecResult<Option<(Vec<Value>, Row)>> {
        let Some((keys, row, source)) = self.queue.dequeue() else {
            return Ok(None);
        };
        if let Some(next_row) = self.scans[source].next().transpose()? {
            let next_keys = (*self.key_fn)(&next_row)?;
            self.queue.enqueue(next_keys, next_row, source);
        }
        Ok(Some((keys, row)))
    }
}

impl Iterator for RunMerge {
    type Item = ExecResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|e| e.map(|(_, row)| row)).transpose()
    }
}

/// Merge `runs` in passes of at most `fan_in` at a time until no more than
/// `max_final` remain, deleting consumed runs promptly. Levels are numbered
/// from `start_level`. With `deduplicate`, only the first row of each
/// equal-key group survives a merge.
pub fn merge_runs_until(
    mut runs: Vec<HeapFile>,
    files: &RunFileFactory,
    key_fn: &RowKeyFn,
    cmp: &KeyCmp,
    fan_in: usize,
    max_final: usize,
    deduplicate: bool,
    start_level: usize,
    block_size: usize,
) -> ExecResult<Vec<HeapFile>> {
    let mut level = start_level;
    while runs.len() > max_final {
        debug!(pass = level, runs = runs.len(), "merge pass");
        let mut new_runs: Vec<HeapFile> = Vec::new();
        for subset in runs.chunks(fan_in) {
            let new_run = files.create(level, new_runs.len())?;
            // one block buffers the merged output
            let mut writer = BufferedWriter::new(new_run.clone(), 1, block_size);
            let mut merge = RunMerge::new(subset, Arc::clone(key_fn), Arc::clone(cmp))?;
            let mut last_keys: Option<Vec<Value>> = None;
            while let Some((keys, row)) = merge.next_entry()? {
                if deduplicate {
                    if let Some(last) = &last_keys {
                        if (**cmp)(last, &keys) == Ordering::Equal {
                            continue;
                        }
                    }
                    last_keys = Some(keys);
                }
                writer.write(row)?;
            }
            writer.flush()?;
            new_runs.push(new_run);
            for run in subset {
                files.delete(run)?;
            }
        }
        runs = new_runs;
        level += 1;
    }
    Ok(runs)
}

// ============================================================================
// External-sort buffer
// ============================================================================

/// Sorts an arbitrary unordered stream under a block budget, spilling sorted
/// runs to temp heap files as needed. `add` ingests rows; `iter_and_clear`
/// produces the fully sorted (optionally deduplicated) sequence and releases
/// every temp file by the time iteration finishes.
pub struct ExtSortBuffer {
    key_fn: RowKeyFn,
    cmp: KeyCmp,
    files: RunFileFactory,
    num_blocks: usize,
    num_blocks_final: usize,
    block_size: usize,
    deduplicate: bool,
    in_mem: Vec<(Vec<Value>, Row)>,
    in_mem_bytes: usize,
    runs: Vec<HeapFile>,
}

impl ExtSortBuffer {
    pub fn new(
        key_fn: RowKeyFn,
        cmp: KeyCmp,
        files: RunFileFactory,
        num_blocks: usize,
        num_blocks_final: Option<usize>,
        block_size: usize,
        deduplicate: bool,
    ) -> ExecResult<Self> {
        if num_blocks <= 2 {
            return Err(ExecutorError::Config(
                "external sorting needs at least 3 memory blocks to perform a merge".to_string(),
            ));
        }
        Ok(ExtSortBuffer {
            key_fn,
            cmp,
            files,
            num_blocks,
            num_blocks_final: num_blocks_final.unwrap_or(num_blocks),
            block_size,
            deduplicate,
            in_mem: Vec::new(),
            in_mem_bytes: 0,
            runs: Vec::new(),
        })
    }

    /// Ingest one row.
    pub fn add(&mut self, row: Row) -> ExecResult<()> {
        let row_size = row.estimated_size();
        let budget = self.num_blocks * self.block_size;
        if row_size > budget {
            return Err(ExecutorError::RowTooLarge {
                size: row_size,
                blocks: self.num_blocks,
                budget,
            });
        }
        if self.in_mem_bytes + row_size > budget {
            self.spill()?;
        }
        let keys = (*self.key_fn)(&row)?;
        self.in_mem.push((keys, row));
        self.in_mem_bytes += row_size;
        Ok(())
    }

    fn sort_in_mem(&mut self) {
        let cmp = Arc::clone(&self.cmp);
        // stable, so ties keep their arrival order
        self.in_mem.sort_by(|(a, _), (b, _)| (*cmp)(a, b));
    }

    fn spill(&mut self) -> ExecResult<()> {
        self.sort_in_mem();
        let run = self.files.create(0, self.runs.len())?;
        let rows: Vec<Row> = self.in_mem.drain(..).map(|(_, row)| row).collect();
        run.batch_append(&rows)?;
        debug!(run = self.runs.len(), rows = rows.len(), "spilled sorted run");
        self.runs.push(run);
        self.in_mem_bytes = 0;
        Ok(())
    }

    /// Produce the sorted sequence and reset the buffer for reuse. All temp
    /// files are deleted by the time the returned iterator is exhausted (or
    /// dropped).
    pub fn iter_and_clear(&mut self) -> ExecResult<ExtSortIter> {
        if self.runs.is_empty() {
            // everything fit in memory; no temp files at all
            self.sort_in_mem();
            let sorted: Vec<(Vec<Value>, Row)> = std::mem::take(&mut self.in_mem);
            self.in_mem_bytes = 0;
            return Ok(ExtSortIter::InMem {
                entries: sorted.into_iter(),
                cmp: Arc::clone(&self.cmp),
                deduplicate: self.deduplicate,
                last_keys: None,
            });
        }
        if !self.in_mem.is_empty() {
            self.spill()?;
        }
        let runs = std::mem::take(&mut self.runs);
        let runs = merge_runs_until(
            runs,
            &self.files,
            &self.key_fn,
            &self.cmp,
            self.num_blocks - 1,
            self.num_blocks_final,
            self.deduplicate,
            1,
            self.block_size,
        )?;
        let merge = RunMerge::new(&runs, Arc::clone(&self.key_fn), Arc::clone(&self.cmp))?;
        Ok(ExtSortIter::Merge {
            merge,
            files: self.files.clone(),
            runs,
            cmp: Arc::clone(&self.cmp),
            deduplicate: self.deduplicate,
            last_keys: None,
        })
    }
}

impl Drop for ExtSortBuffer {
    fn drop(&mut self) {
        // a buffer dropped mid-group (early pipeline termination) still
        // releases its spilled runs
        for run in self.runs.drain(..) {
            let _ = self.files.delete(&run);
        }
    }
}

/// The sorted sequence produced by `ExtSortBuffer::iter_and_clear`.
pub enum ExtSortIter {
    InMem {
        entries: std::vec::IntoIter<(Vec<Value>, Row)>,
        cmp: KeyCmp,
        deduplicate: bool,
        last_keys: Option<Vec<Value>>,
    },
    Merge {
        merge: RunMerge,
        files: RunFileFactory,
        runs: Vec<HeapFile>,
        cmp: KeyCmp,
        deduplicate: bool,
        last_keys: Option<Vec<Value>>,
    },
}

impl ExtSortIter {
    fn cleanup(&mut self) {
        if let ExtSortIter::Merge { files, runs, .. } = self {
            for run in runs.drain(..) {
                let _ = files.delete(&run);
            }
        }
    }
}

impl Iterator for ExtSortIter {
    type Item = ExecResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self {
                ExtSortIter::InMem { entries, .. } => entries.next().map(Ok),
                ExtSortIter::Merge { merge, .. } => match merge.next_entry() {
                    Ok(e) => e.map(Ok),
                    Err(err) => Some(Err(err)),
                },
            };
            match entry {
                None => {
                    self.cleanup();
                    return None;
                }
                Some(Err(e)) => {
                    self.cleanup();
                    return Some(Err(e));
                }
                Some(Ok((keys, row))) => {
                    let (cmp, deduplicate, last_keys) = match self {
                        ExtSortIter::InMem {
                            cmp,
                            deduplicate,
                            last_keys,
                            ..
                        }
                        | ExtSortIter::Merge {
                            cmp,
                            deduplicate,
                            last_keys,
                            ..
                        } => (cmp, deduplicate, last_keys),
                    };
                    if *deduplicate {
                        if let Some(last) = last_keys {
                            if (**cmp)(last, &keys) == Ordering::Equal {
                                continue;
                            }
                        }
                        *last_keys = Some(keys);
                    }
                    return Some(Ok(row));
                }
            }
        }
    }
}

impl Drop for ExtSortIter {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::statistics::StatsManager;
    use crate::storage::StorageManager;
    use tempfile::TempDir;

    const BLOCK: usize = 256;

    fn test_ctx() -> (StatementContext, TempDir) {
        let tmp = TempDir::new().expect("tempdir");
        let sm = Arc::new(StorageManager::new(tmp.path()).expect("manager"));
        let ctx = StatementContext::new(
            sm,
            Arc::new(Catalog::new()),
            Arc::new(StatsManager::new(BLOCK)),
            BLOCK,
        );
        (ctx, tmp)
    }

    fn int_row(v: i64) -> Row {
        Row::new(vec![Value::Integer(v)])
    }

    fn stream_of(rows: Vec<Row>) -> RowStream<'static> {
        Box::new(rows.into_iter().map(Ok))
    }

    #[test]
    fn test_buffered_reader_chunks_by_bytes() {
        let rows: Vec<Row> = (0..100).map(int_row).collect();
        let reader = BufferedReader::new(1, BLOCK);
        let chunks: Vec<Vec<Row>> = reader
            .iter_buffer(stream_of(rows.clone()))
            .map(|c| c.expect("chunk"))
            .collect();
        assert!(chunks.len() > 1);
        let flat: Vec<Row> = chunks.concat();
        assert_eq!(flat, rows);
        for chunk in &chunks {
            let bytes: usize = chunk.iter().map(Row::estimated_size).sum();
            assert!(bytes <= BLOCK);
        }
    }

    #[test]
    fn test_buffered_reader_rejects_oversized_row() {
        let big = Row::new(vec![Value::Varchar("x".repeat(10 * BLOCK))]);
        let reader = BufferedReader::new(1, BLOCK);
        let mut chunks = reader.iter_buffer(stream_of(vec![big]));
        assert!(matches!(
            chunks.next(),
            Some(Err(ExecutorError::RowTooLarge { .. }))
        ));
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_merge_queue_orders_and_breaks_ties_by_source() {
        let cmp = key_comparator(vec![true]);
        let mut q = MergeQueue::new(cmp);
        q.enqueue(vec![Value::Integer(2)], int_row(2), 1);
        q.enqueue(vec![Value::Integer(1)], int_row(1), 2);
        q.enqueue(vec![Value::Integer(1)], int_row(10), 0);
        let order: Vec<(i64, usize)> = std::iter::from_fn(|| q.dequeue())
            .map(|(keys, _, source)| {
                let Value::Integer(k) = keys[0] else { panic!() };
                (k, source)
            })
            .collect();
        assert_eq!(order, vec![(1, 0), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_ext_sort_in_memory() {
        let (ctx, _tmp) = test_ctx();
        let mut buffer = ExtSortBuffer::new(
            identity_key_fn(),
            key_comparator(vec![true]),
            RunFileFactory::sort_runs(&ctx, ctx.next_op_id()),
            3,
            None,
            BLOCK,
            false,
        )
        .expect("buffer");
        for v in [3i64, 1, 2] {
            buffer.add(int_row(v)).expect("add");
        }
        let sorted: Vec<Row> = buffer
            .iter_and_clear()
            .expect("iter")
            .map(|r| r.expect("row"))
            .collect();
        assert_eq!(sorted, vec![int_row(1), int_row(2), int_row(3)]);
        assert!(ctx.sm.live_temp_files(ctx.tmp_tx).is_empty());
    }

    #[test]
    fn test_ext_sort_spills_and_cleans_up() {
        let (ctx, _tmp) = test_ctx();
        let mut buffer = ExtSortBuffer::new(
            identity_key_fn(),
            key_comparator(vec![true]),
            RunFileFactory::sort_runs(&ctx, ctx.next_op_id()),
            3,
            None,
            BLOCK,
            false,
        )
        .expect("buffer");
        let n = 500i64;
        for v in (0..n).rev() {
            buffer.add(int_row(v)).expect("add");
        }
        let sorted: Vec<Row> = buffer
            .iter_and_clear()
            .expect("iter")
            .map(|r| r.expect("row"))
            .collect();
        assert_eq!(sorted.len(), n as usize);
        assert_eq!(sorted.first(), Some(&int_row(0)));
        assert_eq!(sorted.last(), Some(&int_row(n - 1)));
        assert!(sorted.windows(2).all(|w| w[0].cmp_total(&w[1]) != Ordering::Greater));
        // every temp run deleted once the stream is exhausted
        assert!(ctx.sm.live_temp_files(ctx.tmp_tx).is_empty());
    }

    #[test]
    fn test_ext_sort_deduplicates_across_runs() {
        let (ctx, _tmp) = test_ctx();
        let mut buffer = ExtSortBuffer::new(
            identity_key_fn(),
            key_comparator(vec![true]),
            RunFileFactory::sort_runs(&ctx, ctx.next_op_id()),
            3,
            None,
            BLOCK,
            true,
        )
        .expect("buffer");
        for v in 0..300i64 {
            buffer.add(int_row(v % 10)).expect("add");
        }
        let sorted: Vec<Row> = buffer
            .iter_and_clear()
            .expect("iter")
            .map(|r| r.expect("row"))
            .collect();
        assert_eq!(sorted, (0..10).map(int_row).collect::<Vec<_>>());
    }

    #[test]
    fn test_ext_sort_early_drop_cleans_temp_files() {
        let (ctx, _tmp) = test_ctx();
        let mut buffer = ExtSortBuffer::new(
            identity_key_fn(),
            key_comparator(vec![true]),
            RunFileFactory::sort_runs(&ctx, ctx.next_op_id()),
            3,
            None,
            BLOCK,
            false,
        )
        .expect("buffer");
        for v in 0..500i64 {
            buffer.add(int_row(v)).expect("add");
        }
        let mut iter = buffer.iter_and_clear().expect("iter");
        let _first = iter.next();
        drop(iter);
        assert!(ctx.sm.live_temp_files(ctx.tmp_tx).is_empty());
    }

    #[test]
    fn test_ext_sort_rejects_tiny_budget() {
        let (ctx, _tmp) = test_ctx();
        let result = ExtSortBuffer::new(
            identity_key_fn(),
            key_comparator(vec![true]),
            RunFileFactory::sort_runs(&ctx, ctx.next_op_id()),
            2,
            None,
            BLOCK,
            false,
        );
        assert!(matches!(result, Err(ExecutorError::Config(_))));
    }
}
