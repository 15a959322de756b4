//! Multiplexing of segment streams into one row stream
//!
//! `SegmentCursor` makes one segment's block stream peekable and applies
//! per-row delete filtering for partially subsumed segments.
//! `CollectIterator` combines N cursors: an ordered k-way merge through a
//! heap that owns its cursors, or a plain concatenation when the caller
//! does not need global order.

use crate::data::{RowBlock, RowCursor};
use crate::delete::{DelStatus, DeleteHandler};
use crate::segment::Segment;
use crate::stats::ReadStats;
use crate::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Peekable stream over one segment's blocks for the current scan range.
pub(crate) struct SegmentCursor {
    segment: Arc<dyn Segment>,
    is_delete: bool,
    version: i64,
    block: Option<RowBlock>,
    delete_handler: Arc<DeleteHandler>,
    stats: Arc<ReadStats>,
}

impl SegmentCursor {
    fn new(
        segment: Arc<dyn Segment>,
        block: RowBlock,
        delete_handler: Arc<DeleteHandler>,
        stats: Arc<ReadStats>,
    ) -> Self {
        let is_delete = segment.delete_flag();
        let version = segment.version().hi;
        Self {
            segment,
            is_delete,
            version,
            block: Some(block),
            delete_handler,
            stats,
        }
    }

    /// The row at the head of this cursor with the segment's delete flag,
    /// or `None` once the segment is drained for this range.
    fn current(&self) -> Option<(&RowCursor, bool)> {
        let row = self.block.as_ref()?.current()?;
        Some((row, self.is_delete))
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(block) = self.block.as_mut() {
            block.pos_inc();
        }
        self.refresh_current_row()
    }

    /// Settle on the next live row: skip rows a delete predicate removes
    /// from partially subsumed blocks, refill from the segment when the
    /// block runs out, drop the block at stream end.
    fn refresh_current_row(&mut self) -> Result<()> {
        loop {
            let block = match self.block.as_mut() {
                Some(block) => block,
                None => return Ok(()),
            };
            if block.has_remaining() {
                if block.status() == DelStatus::PartialSatisfied {
                    let filtered = block
                        .current()
                        .is_some_and(|row| self.delete_handler.is_filter_data(self.version, row));
                    if filtered {
                        self.stats.inc_rows_del_filtered(1);
                        block.pos_inc();
                        continue;
                    }
                }
                return Ok(());
            }
            match self.segment.get_next_block()? {
                Some(next) => self.block = Some(next),
                None => {
                    self.block = None;
                    return Ok(());
                }
            }
        }
    }
}

/// Heap entry owning its cursor. Ordered so the max-heap pops the smallest
/// key first and, on equal keys, the smallest version first; folding then
/// runs oldest-to-newest, which is what lets `Replace` values and the
/// unique-key delete flag converge to the newest write.
struct MergeEntry(SegmentCursor);

impl MergeEntry {
    fn row(&self) -> Option<&RowCursor> {
        self.0.current().map(|(row, _)| row)
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.row(), other.row()) {
            (Some(a), Some(b)) => b
                .full_key_cmp(a)
                .then_with(|| other.0.version().cmp(&self.0.version())),
            // rowless entries never enter the heap; sink them regardless
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Merges N segment cursors into a single `(row, delete_flag)` stream.
pub(crate) struct CollectIterator {
    merge: bool,
    heap: BinaryHeap<MergeEntry>,
    children: Vec<SegmentCursor>,
    child_idx: usize,
    delete_handler: Arc<DeleteHandler>,
    stats: Arc<ReadStats>,
}

impl CollectIterator {
    /// `merge = false` selects concatenation: valid only when the caller
    /// accepts unordered duplicates or aggregates upstream.
    pub fn new(merge: bool, delete_handler: Arc<DeleteHandler>, stats: Arc<ReadStats>) -> Self {
        Self {
            merge,
            heap: BinaryHeap::new(),
            children: Vec::new(),
            child_idx: 0,
            delete_handler,
            stats,
        }
    }

    pub fn is_merge(&self) -> bool {
        self.merge
    }

    /// Wrap a prepared segment in a cursor. A cursor with no live row is
    /// discarded silently.
    pub fn add_child(&mut self, segment: Arc<dyn Segment>, block: RowBlock) -> Result<()> {
        let mut cursor = SegmentCursor::new(
            segment,
            block,
            self.delete_handler.clone(),
            self.stats.clone(),
        );
        cursor.refresh_current_row()?;
        if cursor.current().is_none() {
            return Ok(());
        }
        if self.merge {
            self.heap.push(MergeEntry(cursor));
        } else {
            self.children.push(cursor);
        }
        Ok(())
    }

    /// The row at the head of the combined stream.
    pub fn current(&self) -> Option<(&RowCursor, bool)> {
        if self.merge {
            self.heap.peek().and_then(|entry| entry.0.current())
        } else {
            self.children
                .get(self.child_idx)
                .and_then(|cursor| cursor.current())
        }
    }

    /// Step past the head row. Exhausted cursors are dropped (merge) or
    /// skipped (concat); the stream ends when `current` turns `None`.
    pub fn advance(&mut self) -> Result<()> {
        if self.merge {
            self.merge_next()
        } else {
            self.normal_next()
        }
    }

    fn merge_next(&mut self) -> Result<()> {
        let mut entry = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if let Err(e) = entry.0.advance() {
            log::warn!("failed to advance merge child: {e}");
            return Err(e);
        }
        if entry.0.current().is_some() {
            self.heap.push(entry);
        }
        Ok(())
    }

    fn normal_next(&mut self) -> Result<()> {
        let cursor = match self.children.get_mut(self.child_idx) {
            Some(cursor) => cursor,
            None => return Ok(()),
        };
        if let Err(e) = cursor.advance() {
            log::warn!("failed to advance concat child: {e}");
            return Err(e);
        }
        while self
            .children
            .get(self.child_idx)
            .is_some_and(|c| c.current().is_none())
        {
            self.child_idx += 1;
        }
        Ok(())
    }

    /// Drop all children and reset; used between scan ranges.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.children.clear();
        self.child_idx = 0;
    }
}
