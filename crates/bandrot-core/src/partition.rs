//! Row partitioning of the destination image across workers.
//!
//! Every worker derives its own band, and every other worker's band, from
//! `(total_rows, workers)` alone. Ranges are never sent over the wire.
//!
//! ```text
//! rows_per_worker = ceil(total_rows / workers)
//! start           = index * rows_per_worker
//! end             = min(start + rows_per_worker, total_rows)
//! ```
//!
//! When `total_rows` does not divide evenly the last bands are short, and
//! trailing workers may get an empty range (`end <= start`).

use serde::{Deserialize, Serialize};

/// Half-open range of destination rows `[start, end)`.
///
/// `end` may be below `start` for a trailing worker with nothing to do; such
/// a range is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub start: u32,
    pub end: u32,
}

impl RowRange {
    /// Number of rows covered, zero for empty ranges.
    #[inline]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Iterate over the covered rows.
    pub fn rows(&self) -> std::ops::Range<u32> {
        self.start..self.end.max(self.start)
    }
}

/// Rows assigned to `worker_index` out of `worker_count` workers.
///
/// `worker_count` must be non-zero; the driver rejects empty groups before
/// any partitioning happens.
pub fn range_for(total_rows: u32, worker_count: u32, worker_index: u32) -> RowRange {
    BandPlan::new(total_rows, worker_count).range_for(worker_index)
}

/// Partition of `total_rows` over a fixed number of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandPlan {
    pub total_rows: u32,
    pub workers: u32,
    /// Uniform band capacity in rows, identical for every worker.
    pub rows_per_worker: u32,
}

impl BandPlan {
    pub fn new(total_rows: u32, workers: u32) -> Self {
        debug_assert!(workers > 0, "band plan needs at least one worker");
        let rows_per_worker = total_rows.div_ceil(workers.max(1));
        Self {
            total_rows,
            workers,
            rows_per_worker,
        }
    }

    /// Rows assigned to one worker.
    pub fn range_for(&self, worker_index: u32) -> RowRange {
        let start = worker_index.saturating_mul(self.rows_per_worker);
        let end = start
            .saturating_add(self.rows_per_worker)
            .min(self.total_rows);
        RowRange { start, end }
    }

    /// All ranges in worker-index order.
    pub fn ranges(&self) -> impl Iterator<Item = RowRange> + '_ {
        (0..self.workers).map(|i| self.range_for(i))
    }

    /// Samples in one worker's band buffer for rows `width` samples wide.
    pub fn band_capacity(&self, width: u32) -> usize {
        self.rows_per_worker as usize * width as usize
    }

    /// Where one worker's valid rows sit in the destination buffer:
    /// `(offset, length)` in samples.
    ///
    /// `offset = start * width`, `length = (end - start) * width`; empty
    /// bands have length zero.
    pub fn band_extent(&self, worker_index: u32, width: u32) -> (usize, usize) {
        let range = self.range_for(worker_index);
        let width = width as usize;
        if range.is_empty() {
            return (self.total_rows as usize * width, 0);
        }
        (range.start as usize * width, range.len() as usize * width)
    }
}


// ============================================================================
// Property-Based Tests
// ============================================================================
