//! Data-parallel `for` loops over independent work units.
//!
//! Kernels describe work as `total` units with a per-unit cost estimate; the
//! executor decides how to chunk the range. Chunking never affects results.

use std::ops::Range;

use kore_core::{KoreError, Result};
use parking_lot::Mutex;
use rayon::prelude::*;

/// Cost (roughly multiply-adds) a block should reach before it is worth
/// handing to another worker.
const TARGET_BLOCK_COST: f64 = 40_000.0;

/// Executor for data-parallel ranges.
pub trait ParallelFor: Send + Sync {
    fn degree_of_parallelism(&self) -> usize;

    /// Run `f` over disjoint sub-ranges covering `0..total`, returning once
    /// every sub-range has completed.
    fn parallel_for(&self, total: usize, cost_per_unit: f64, f: &(dyn Fn(Range<usize>) + Sync));
}

/// Run on `pool` when one is given, otherwise inline on the calling thread.
pub fn try_parallel_for(
    pool: Option<&dyn ParallelFor>,
    total: usize,
    cost_per_unit: f64,
    f: &(dyn Fn(Range<usize>) + Sync),
) {
    if total == 0 {
        return;
    }
    match pool {
        Some(pool) if total > 1 => pool.parallel_for(total, cost_per_unit, f),
        _ => f(0..total),
    }
}

/// Units per block for a loop of `total` units on `threads` workers.
///
/// Expensive units get small blocks for load balance; cheap units are
/// batched until a block reaches [`TARGET_BLOCK_COST`], but never more than
/// an even share per worker.
pub fn block_size(total: usize, cost_per_unit: f64, threads: usize) -> usize {
    if total == 0 {
        return 1;
    }
    if threads <= 1 {
        return total;
    }
    let by_cost = (TARGET_BLOCK_COST / cost_per_unit.max(1.0)).ceil() as usize;
    let fair_share = total.div_ceil(threads);
    by_cost.clamp(1, fair_share)
}

/// Rayon-backed worker pool.
pub struct ThreadPool {
    pool: rayon::ThreadPool,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("kore-worker-{i}"))
            .build()
            .map_err(|e| KoreError::ThreadPool(e.to_string()))?;
        tracing::debug!(threads = pool.current_num_threads(), "thread pool created");
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

impl ParallelFor for ThreadPool {
    fn degree_of_parallelism(&self) -> usize {
        self.num_threads()
    }

    fn parallel_for(&self, total: usize, cost_per_unit: f64, f: &(dyn Fn(Range<usize>) + Sync)) {
        let block = block_size(total, cost_per_unit, self.num_threads());
        let num_blocks = total.div_ceil(block);
        if num_blocks <= 1 {
            f(0..total);
            return;
        }
        self.pool.install(|| {
            (0..num_blocks).into_par_iter().for_each(|b| {
                let start = b * block;
                f(start..(start + block).min(total));
            });
        });
    }
}

/// Executes every range inline on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl ParallelFor for Sequential {
    fn degree_of_parallelism(&self) -> usize {
        1
    }

    fn parallel_for(&self, total: usize, _cost_per_unit: f64, f: &(dyn Fn(Range<usize>) + Sync)) {
        if total > 0 {
            f(0..total);
        }
    }
}

/// Mutable output regions indexed by work unit.
///
/// Each unit of a parallel loop owns exactly one slot, so locks are never
/// contended; they only let disjoint `&mut` regions cross the `Fn` boundary.
pub struct DisjointSlots<'a, T> {
    slots: Vec<Mutex<&'a mut [T]>>,
}

impl<'a, T: Send> DisjointSlots<'a, T> {
    pub fn new(regions: impl IntoIterator<Item = &'a mut [T]>) -> Self {
        Self {
            slots: regions.into_iter().map(Mutex::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn with<R>(&self, index: usize, f: impl FnOnce(&mut [T]) -> R) -> R {
        let mut region = self.slots[index].lock();
        f(&mut region)
    }
}
