//! The segment collaborator surface
//!
//! A segment is one immutable columnar unit of a tablet version range. The
//! read core never sees its storage; it configures the segment with read
//! parameters, asks the pruning questions, and pulls decoded row blocks.
//! Each acquired segment handle belongs to exactly one Reader, so the
//! `set_*` calls are per-scan state, not shared mutation.

use crate::data::{RowBlock, RowCursor};
use crate::delete::{DelStatus, DeleteHandler};
use crate::query::condition::Conditions;
use crate::query::predicate::ColumnPredicate;
use crate::schema::{TabletSchema, Version};
use crate::stats::ReadStats;
use crate::Result;
use ahash::AHashSet;
use std::sync::Arc;

/// Read-path parameters pushed into a segment before the first block is
/// requested.
#[derive(Debug, Clone)]
pub struct SegmentReadParams {
    pub return_columns: Vec<u32>,
    pub seek_columns: Vec<u32>,
    /// Columns whose bloom filters should be consulted for pruning.
    pub load_bf_columns: AHashSet<u32>,
    /// The pushed condition set, used for zone-map pruning.
    pub conditions: Arc<Conditions>,
    /// Typed per-row predicates applied while filling blocks.
    pub predicates: Arc<Vec<ColumnPredicate>>,
    /// False on every non-query path so compactions and checksum scans
    /// cannot evict the query working set from block/index caches.
    pub use_cache: bool,
}

pub trait Segment: Send + Sync {
    /// Version range `[lo, hi]` this segment covers; `hi` is the merge
    /// tie-break.
    fn version(&self) -> Version;

    /// True when the whole segment is a delete marker.
    fn delete_flag(&self) -> bool;

    /// True when the version holds no data files at all.
    fn empty(&self) -> bool;

    fn zero_num_rows(&self) -> bool;

    fn num_rows(&self) -> u64;

    fn schema(&self) -> Arc<TabletSchema>;

    /// The seek-column projection blocks are decoded with.
    fn seek_columns(&self) -> Vec<u32>;

    fn set_delete_handler(&self, handler: Arc<DeleteHandler>);

    fn set_read_params(&self, params: SegmentReadParams);

    fn set_stats(&self, stats: Arc<ReadStats>);

    /// Whether min/max statistics (and bloom filters, where loaded) rule
    /// the segment out against the pushed conditions.
    fn delta_pruning_filter(&self) -> bool;

    /// How far the active delete predicates subsume this segment.
    fn delete_pruning_filter(&self) -> DelStatus;

    /// Record the subsumption status so produced blocks carry it.
    fn set_delete_status(&self, status: DelStatus);

    /// Position the segment on one scan range and decode the first block.
    ///
    /// `start`/`end` may bind fewer fields than the full key; comparison
    /// runs over the bound prefix. `skip_equal_start` excludes rows equal
    /// to `start` (a `gt` bound); `include_equal_end` keeps rows equal to
    /// `end` (an `le` bound). Returns `None` when the range holds no rows
    /// in this segment.
    fn prepare_block_read(
        &self,
        start: Option<&RowCursor>,
        skip_equal_start: bool,
        end: Option<&RowCursor>,
        include_equal_end: bool,
    ) -> Result<Option<RowBlock>>;

    /// The next decoded block of the current range, or `None` at the end.
    fn get_next_block(&self) -> Result<Option<RowBlock>>;
}
