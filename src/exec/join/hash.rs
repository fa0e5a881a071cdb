//! Hash Equi-Join
//!
//! Recursive hybrid hash join. The left input builds, the right probes.
//!
//! Partitioning streams each input through a depth-salted hash into `B`
//! partition heap files (`B - 1` at depth >= 1, one block being reserved to
//! replay the parent partition). A partition whose bytes exceed
//! `(B - 1) * block_size` is re-partitioned at the next depth, its children
//! numbered `parent_id * B + local_id` so that `(depth, partition_id)`
//! uniquely names a partition on both sides. Recursion stops at the
//! configured max depth regardless of remaining skew.
//!
//! Probing walks the partition ids present on both sides: an in-memory hash
//! table over the left partition (salted differently than partitioning, so
//! bucket skew does not repeat), then a scan of the right partition, with a
//! full key-tuple equality check on every hash match before emitting.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use crate::config::DEFAULT_HASH_MAX_DEPTH;
use crate::expr::ValExpr;
use crate::storage::{HeapFile, HeapFileScan};
use crate::value::{Row, Value};

use super::super::error::{ExecResult, ExecutorError};
use super::super::util::{BufferedWriter, RowKeyFn};
use super::super::{
    BlockIoStats, CompiledProps, EstimatedProps, PropsCache, QueryOp, RowStream, StatementContext,
};
use super::{joined_unique_columns, side_key_fn, JoinSide};

const PARTITION_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const PROBE_SALT: u64 = 0x1656_67b1_9e37_79f9;

fn hash_for_partition(keys: &[Value], depth: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_u64(PARTITION_SALT);
    hasher.write_u64(depth as u64);
    keys.hash(&mut hasher);
    hasher.finish()
}

fn hash_for_probing(keys: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_u64(PROBE_SALT);
    keys.hash(&mut hasher);
    hasher.finish()
}

struct JoinKeyFns {
    left: RowKeyFn,
    right: RowKeyFn,
}

/// Hash join physical operator. The left input is the build side and the
/// right the probe side.
pub struct HashEqJoinOp {
    ctx: StatementContext,
    id: u64,
    left: Arc<dyn QueryOp>,
    right: Arc<dyn QueryOp>,
    left_exprs: Vec<ValExpr>,
    right_exprs: Vec<ValExpr>,
    num_memory_blocks: usize,
    max_depth: usize,
    cache: PropsCache,
    fns: Mutex<Option<Arc<JoinKeyFns>>>,
}

impl HashEqJoinOp {
    /// Construct a hash join between `left` and `right` on the given key
    /// expression lists, evaluated over left and right rows respectively.
    pub fn new(
        left: Arc<dyn QueryOp>,
        right: Arc<dyn QueryOp>,
        left_exprs: Vec<ValExpr>,
        right_exprs: Vec<ValExpr>,
        num_memory_blocks: usize,
        max_depth: Option<usize>,
    ) -> ExecResult<Self> {
        if left_exprs.len() != right_exprs.len() {
            return Err(ExecutorError::Config(
                "hash join needs the same number of key expressions on both sides".to_string(),
            ));
        }
        if num_memory_blocks <= 2 {
            return Err(ExecutorError::Config(
                "hash join needs at least 3 memory blocks to partition".to_string(),
            ));
        }
        let ctx = left.context().clone();
        let id = ctx.next_op_id();
        Ok(HashEqJoinOp {
            ctx,
            id,
            left,
            right,
            left_exprs,
            right_exprs,
            num_memory_blocks,
            max_depth: max_depth.unwrap_or(DEFAULT_HASH_MAX_DEPTH),
            cache: PropsCache::new(),
            fns: Mutex::new(None),
        })
    }

    fn join_fns(&self) -> ExecResult<Arc<JoinKeyFns>> {
        let mut slot = self.fns.lock();
        if let Some(fns) = slot.as_ref() {
            return Ok(Arc::clone(fns));
        }
        let left_props = self.left.compiled()?;
        let right_props = self.right.compiled()?;
        let fns = Arc::new(JoinKeyFns {
            left: side_key_fn(
                &self.left_exprs,
                &left_props.output_lineage,
                &right_props.output_lineage,
                JoinSide::Left,
            )?,
            right: side_key_fn(
                &self.right_exprs,
                &left_props.output_lineage,
                &right_props.output_lineage,
                JoinSide::Right,
            )?,
        });
        *slot = Some(Arc::clone(&fns));
        Ok(fns)
    }

    fn tmp_partition_file(
        &self,
        side: JoinSide,
        depth: usize,
        partition_id: u64,
    ) -> ExecResult<HeapFile> {
        let name = format!(
            ".tmp-{}-{}-{}-{}",
            self.id,
            side.label(),
            depth,
            partition_id
        );
        let file = self
            .ctx
            .sm
            .heap_file(self.ctx.tmp_tx, &name, Vec::new(), true)?;
        file.truncate()?;
        Ok(file)
    }

    /// One partitioning pass over `rows`. Returns the ids of partitions
    /// whose written bytes exceed the re-partitioning threshold.
    fn partition_one_pass<I>(
        &self,
        side: JoinSide,
        depth: usize,
        partitions: &mut HashMap<u64, HeapFile>,
        parent_part_id: u64,
        rows: I,
        key_fn: &RowKeyFn,
    ) -> ExecResult<Vec<u64>>
    where
        I: Iterator<Item = ExecResult<Row>>,
    {
        // one block is reserved at depth >= 1 for replaying the parent
        let capacity = if depth == 0 {
            self.num_memory_blocks as u64
        } else {
            self.num_memory_blocks as u64 - 1
        };
        let mut writers: HashMap<u64, BufferedWriter> = HashMap::new();
        let mut bytes_written: HashMap<u64, usize> = HashMap::new();
        for row in rows {
            let row = row?;
            let keys = (*key_fn)(&row)?;
            let local_part_id = hash_for_partition(&keys, depth) % capacity;
            let part_id = parent_part_id * self.num_memory_blocks as u64 + local_part_id;
            if !partitions.contains_key(&part_id) {
                let file = self.tmp_partition_file(side, depth, part_id)?;
                partitions.insert(part_id, file);
            }
            let writer = writers.entry(part_id).or_insert_with(|| {
                BufferedWriter::new(partitions[&part_id].clone(), 1, self.ctx.block_size)
            });
            *bytes_written.entry(part_id).or_insert(0) += row.estimated_size();
            writer.write(row)?;
        }
        for writer in writers.values_mut() {
            writer.flush()?;
        }
        let threshold = (self.num_memory_blocks - 1) * self.ctx.block_size;
        let mut too_large: Vec<u64> = bytes_written
            .into_iter()
            .filter(|(_, bytes)| *bytes > threshold)
            .map(|(part_id, _)| part_id)
            .collect();
        too_large.sort_unstable();
        Ok(too_large)
    }

    /// The whole partitioning phase: first pass over both inputs, then
    /// recursive re-partitioning of oversized partitions up to max depth.
    fn partition_phase(
        &self,
        fns: &JoinKeyFns,
        left_parts: &mut HashMap<u64, HeapFile>,
        right_parts: &mut HashMap<u64, HeapFile>,
    ) -> ExecResult<()> {
        let mut large =
            self.partition_one_pass(JoinSide::Left, 0, left_parts, 0, self.left.execute()?, &fns.left)?;
        self.partition_one_pass(
            JoinSide::Right,
            0,
            right_parts,
            0,
            self.right.execute()?,
            &fns.right,
        )?;
        for depth in 1..self.max_depth {
            if large.is_empty() {
                break;
            }
            debug!(op = self.id, depth, oversized = large.len(), "re-partitioning");
            let mut next_large: Vec<u64> = Vec::new();
            for part_id in large {
                let left_file = left_parts.remove(&part_id);
                let right_file = right_parts.remove(&part_id);
                if let Some(file) = &left_file {
                    let scan = file.iter_scan()?;
                    next_large.extend(self.partition_one_pass(
                        JoinSide::Left,
                        depth,
                        left_parts,
                        part_id,
                        scan.map(|r| r.map_err(ExecutorError::from)),
                        &fns.left,
                    )?);
                }
                if let Some(file) = &right_file {
                    let scan = file.iter_scan()?;
                    self.partition_one_pass(
                        JoinSide::Right,
                        depth,
                        right_parts,
                        part_id,
                        scan.map(|r| r.map_err(ExecutorError::from)),
                        &fns.right,
                    )?;
                }
                for file in left_file.iter().chain(right_file.iter()) {
                    self.ctx.sm.delete_heap_file(self.ctx.tmp_tx, file.name())?;
                }
            }
            large = next_large;
        }
        Ok(())
    }
}

impl QueryOp for HashEqJoinOp {
    fn name(&self) -> &'static str {
        "HashEqJoinOp"
    }

    fn op_id(&self) -> u64 {
        self.id
    }

    fn context(&self) -> &StatementContext {
        &self.ctx
    }

    fn children(&self) -> Vec<&dyn QueryOp> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn memory_blocks_required(&self) -> usize {
        self.num_memory_blocks
    }

    fn props_cache(&self) -> &PropsCache {
        &self.cache
    }

    fn clear_op_caches(&self) {
        *self.fns.lock() = None;
    }

    fn compile_props(&self) -> ExecResult<CompiledProps> {
        let left_props = self.left.compiled()?;
        let right_props = self.right.compiled()?;
        let unique_columns = joined_unique_columns(
            &left_props,
            &right_props,
            &self.left_exprs,
            &self.right_exprs,
        );
        self.join_fns()?;
        Ok(CompiledProps {
            unique_columns,
            ..CompiledProps::from_inputs(&left_props, &right_props)
        })
    }

    fn estimate_props(&self) -> ExecResult<EstimatedProps> {
        let left_estimated = self.left.estimated()?;
        let right_estimated = self.right.estimated()?;
        let stats = self.ctx.stats.join_stats(
            &left_estimated.stats,
            &right_estimated.stats,
            self.left_exprs.len(),
        );
        let left_blocks = left_estimated.stats.block_count();
        let right_blocks = right_estimated.stats.block_count();
        // pessimistic guess at partitioning passes
        let fan = (self.num_memory_blocks - 1) as f64;
        let estimated_passes = if left_blocks <= 1 {
            0
        } else {
            (left_blocks as f64).log(fan).floor() as u64
        };
        let reads = (left_blocks + right_blocks) * estimated_passes;
        let writes = (left_blocks + right_blocks) * estimated_passes;
        Ok(EstimatedProps {
            stats,
            blocks: BlockIoStats {
                self_reads: reads,
                self_writes: writes,
                overall: left_estimated.blocks.overall
                    + right_estimated.blocks.overall
                    + reads
                    + writes,
            },
            blocks_extra_init: None,
        })
    }

    fn execute(&self) -> ExecResult<RowStream<'_>> {
        let fns = self.join_fns()?;
        let mut left_parts: HashMap<u64, HeapFile> = HashMap::new();
        let mut right_parts: HashMap<u64, HeapFile> = HashMap::new();
        if let Err(e) = self.partition_phase(&fns, &mut left_parts, &mut right_parts) {
            delete_partitions(&self.ctx, &mut left_parts);
            delete_partitions(&self.ctx, &mut right_parts);
            return Err(e);
        }
        // only partitions present on both sides can produce matches; drop
        // the one-sided ones right away
        let mut part_ids: Vec<u64> = left_parts
            .keys()
            .filter(|id| right_parts.contains_key(*id))
            .copied()
            .collect();
        part_ids.sort_unstable();
        left_parts.retain(|id, file| {
            if part_ids.binary_search(id).is_ok() {
                true
            } else {
                let _ = self.ctx.sm.delete_heap_file(self.ctx.tmp_tx, file.name());
                false
            }
        });
        right_parts.retain(|id, file| {
            if part_ids.binary_search(id).is_ok() {
                true
            } else {
                let _ = self.ctx.sm.delete_heap_file(self.ctx.tmp_tx, file.name());
                false
            }
        });
        debug!(op = self.id, partitions = part_ids.len(), "probing phase");
        Ok(Box::new(HashJoinStream {
            ctx: self.ctx.clone(),
            part_ids: part_ids.into_iter(),
            left_parts,
            right_parts,
            left_key: Arc::clone(&fns.left),
            right_key: Arc::clone(&fns.right),
            state: None,
            done: false,
        }))
    }

    fn describe_more(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .left_exprs
            .iter()
            .zip(self.right_exprs.iter())
            .map(|(l, r)| format!("{l} = {r}"))
            .collect();
        lines.push(format!("# memory blocks: {}", self.num_memory_blocks));
        lines
    }
}

fn delete_partitions(ctx: &StatementContext, partitions: &mut HashMap<u64, HeapFile>) {
    for (_, file) in partitions.drain() {
        let _ = ctx.sm.delete_heap_file(ctx.tmp_tx, file.name());
    }
}

struct ProbeState {
    part_id: u64,
    /// probe-hash -> rows of the left partition with their key tuples
    table: HashMap<u64, Vec<(Vec<Value>, Row)>>,
    right_scan: HeapFileScan,
    pending: std::vec::IntoIter<Row>,
}

/// Lazy probing over the surviving partitions; partition files are deleted
/// as each partition completes, and whatever remains is deleted on drop.
struct HashJoinStream {
    ctx: StatementContext,
    part_ids: std::vec::IntoIter<u64>,
    left_parts: HashMap<u64, HeapFile>,
    right_parts: HashMap<u64, HeapFile>,
    left_key: RowKeyFn,
    right_key: RowKeyFn,
    state: Option<ProbeState>,
    done: bool,
}

impl HashJoinStream {
    fn cleanup(&mut self) {
        self.state = None;
        delete_partitions(&self.ctx, &mut self.left_parts);
        delete_partitions(&self.ctx, &mut self.right_parts);
    }

    /// Build the in-memory hash table over the left side of `part_id`.
    fn build_table(&mut self, part_id: u64) -> ExecResult<ProbeState> {
        let left_file = &self.left_parts[&part_id];
        let mut table: HashMap<u64, Vec<(Vec<Value>, Row)>> = HashMap::new();
        for row in left_file.iter_scan()? {
            let row = row?;
            let keys = (*self.left_key)(&row)?;
            table
                .entry(hash_for_probing(&keys))
                .or_default()
                .push((keys, row));
        }
        let right_scan = self.right_parts[&part_id].iter_scan()?;
        Ok(ProbeState {
            part_id,
            table,
            right_scan,
            pending: Vec::new().into_iter(),
        })
    }

    fn next_row(&mut self) -> ExecResult<Option<Row>> {
        loop {
            if let Some(state) = &mut self.state {
                if let Some(row) = state.pending.next() {
                    return Ok(Some(row));
                }
                match state.right_scan.next().transpose()? {
                    Some(right_row) => {
                        let keys = (*self.right_key)(&right_row)?;
                        if let Some(bucket) = state.table.get(&hash_for_probing(&keys)) {
                            // hash equality is not enough: verify the key
                            // tuples themselves match
                            let matches: Vec<Row> = bucket
                                .iter()
                                .filter(|(left_keys, _)| *left_keys == keys)
                                .map(|(_, left_row)| left_row.concat(&right_row))
                                .collect();
                            state.pending = matches.into_iter();
                        }
                    }
                    None => {
                        let part_id = state.part_id;
                        self.state = None;
                        for file in self
                            .left_parts
                            .remove(&part_id)
                            .into_iter()
                            .chain(self.right_parts.remove(&part_id))
                        {
                            self.ctx.sm.delete_heap_file(self.ctx.tmp_tx, file.name())?;
                        }
                    }
                }
                continue;
            }
            match self.part_ids.next() {
                Some(part_id) => {
                    self.state = Some(self.build_table(part_id)?);
                }
                None => {
                    self.done = true;
                    self.cleanup();
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for HashJoinStream {
    type Item = ExecResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                self.cleanup();
                Some(Err(e))
            }
        }
    }
}

impl Drop for HashJoinStream {
    fn drop(&mut self) {
        self.cleanup();
    }
}
