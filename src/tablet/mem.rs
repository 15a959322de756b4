//! In-memory tablet and segment backend
//!
//! The reference implementation of the [`Tablet`] and [`Segment`] traits:
//! key-sorted row storage with per-column min/max zone maps and bloom
//! filters, key-range seeking with the four boundary modes, and block
//! production with pushed-down predicate filtering. Production deployments
//! put an on-disk engine behind the same traits; this backend keeps the
//! read core exercisable end-to-end (and is what the test suite runs on).

use crate::config::EngineConfig;
use crate::data::{RowBlock, RowCursor, Value};
use crate::delete::{DelStatus, DeleteHandler, DeletePredicate};
use crate::query::condition::Coverage;
use crate::schema::{FieldType, KeysType, TabletSchema, Version};
use crate::segment::{Segment, SegmentReadParams};
use crate::stats::ReadStats;
use crate::tablet::Tablet;
use crate::Result;
use ahash::AHashMap;
use bloomfilter::Bloom;
use parking_lot::{RwLock, RwLockReadGuard};
use std::cmp::Ordering;
use std::sync::Arc;

const BLOOM_FP_RATE: f64 = 0.01;

/// Immutable body of one segment, shared by every acquired handle.
pub struct SegmentData {
    schema: Arc<TabletSchema>,
    version: Version,
    delete_flag: bool,
    /// Full-width rows, sorted by the key prefix.
    rows: Vec<Vec<Value>>,
    /// Per-column (min, max) over non-null values.
    zone_maps: Vec<Option<(Value, Value)>>,
    /// Per-column membership filters for `is_bf_column` columns.
    blooms: AHashMap<u32, Bloom<[u8]>>,
    block_capacity: usize,
}

impl SegmentData {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Builds a [`SegmentData`]: collects full-width rows, then sorts and
/// indexes them.
pub struct SegmentBuilder {
    schema: Arc<TabletSchema>,
    version: Version,
    delete_flag: bool,
    rows: Vec<Vec<Value>>,
    block_capacity: usize,
}

impl SegmentBuilder {
    pub fn new(schema: Arc<TabletSchema>, version: Version) -> Self {
        Self {
            schema,
            version,
            delete_flag: false,
            rows: Vec::new(),
            block_capacity: EngineConfig::global().block_row_capacity,
        }
    }

    /// Mark the whole segment as a delete marker (a tombstone version).
    pub fn delete_marker(mut self) -> Self {
        self.delete_flag = true;
        self
    }

    pub fn block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity.max(1);
        self
    }

    /// Append one full-width row. Width must match the schema.
    pub fn add_row(&mut self, row: Vec<Value>) -> &mut Self {
        debug_assert_eq!(row.len(), self.schema.num_fields());
        self.rows.push(row);
        self
    }

    pub fn build(self) -> Arc<SegmentData> {
        let Self {
            schema,
            version,
            delete_flag,
            mut rows,
            block_capacity,
        } = self;

        let key_fields = schema.num_key_fields();
        rows.sort_by(|a, b| {
            for i in 0..key_fields {
                let ord = a[i].cmp(&b[i]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let mut zone_maps = Vec::with_capacity(schema.num_fields());
        for col in 0..schema.num_fields() {
            let mut bounds: Option<(Value, Value)> = None;
            for row in &rows {
                let value = &row[col];
                if value.is_null() {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (value.clone(), value.clone()),
                    Some((min, max)) => (
                        if *value < min { value.clone() } else { min },
                        if *value > max { value.clone() } else { max },
                    ),
                });
            }
            zone_maps.push(bounds);
        }

        let mut blooms = AHashMap::new();
        for (col, field) in schema.fields().iter().enumerate() {
            if !field.is_bf_column || rows.is_empty() {
                continue;
            }
            let mut bloom = Bloom::new_for_fp_rate(rows.len().max(1), BLOOM_FP_RATE);
            for row in &rows {
                if !row[col].is_null() {
                    bloom.set(row[col].bloom_key().as_slice());
                }
            }
            blooms.insert(col as u32, bloom);
        }

        Arc::new(SegmentData {
            schema,
            version,
            delete_flag,
            rows,
            zone_maps,
            blooms,
            block_capacity,
        })
    }
}

/// Per-acquisition scan state of one segment handle.
#[derive(Default)]
struct ScanState {
    params: Option<SegmentReadParams>,
    delete_handler: Option<Arc<DeleteHandler>>,
    stats: Option<Arc<ReadStats>>,
    delete_status: Option<DelStatus>,
    /// Row window `[lo, hi)` of the current scan range.
    window: Option<(usize, usize)>,
    next: usize,
}

/// One reader's handle on a [`SegmentData`].
pub struct MemSegment {
    data: Arc<SegmentData>,
    state: RwLock<ScanState>,
}

impl MemSegment {
    pub fn new(data: Arc<SegmentData>) -> Self {
        Self {
            data,
            state: RwLock::new(ScanState::default()),
        }
    }

    /// The read params the reader pushed down, if any (diagnostics).
    pub fn read_params(&self) -> Option<SegmentReadParams> {
        self.state.read().params.clone()
    }

    fn seek_columns_or_all(params: &Option<SegmentReadParams>, schema: &TabletSchema) -> Vec<u32> {
        match params {
            Some(p) if !p.seek_columns.is_empty() => p.seek_columns.clone(),
            _ => (0..schema.num_fields() as u32).collect(),
        }
    }

    fn fill_next_block(&self, state: &mut ScanState) -> Result<Option<RowBlock>> {
        let (_, hi) = match state.window {
            Some(window) => window,
            None => return Ok(None),
        };
        let columns = Self::seek_columns_or_all(&state.params, &self.data.schema);
        let predicates = state
            .params
            .as_ref()
            .map(|p| p.predicates.clone())
            .unwrap_or_default();

        let mut rows = Vec::new();
        while state.next < hi && rows.len() < self.data.block_capacity {
            let source = &self.data.rows[state.next];
            state.next += 1;
            if !predicates
                .iter()
                .all(|p| p.evaluate(Some(&source[p.column() as usize])))
            {
                continue;
            }
            let mut cursor = RowCursor::new(self.data.schema.clone(), &columns)?;
            for &cid in &columns {
                cursor.set(cid, source[cid as usize].clone())?;
            }
            rows.push(cursor);
        }

        if rows.is_empty() {
            return Ok(None);
        }
        if let Some(stats) = &state.stats {
            stats.inc_rows_read(rows.len() as u64);
        }
        let status = state.delete_status.unwrap_or(DelStatus::NotSatisfied);
        Ok(Some(RowBlock::new(rows, status)))
    }
}

/// Compare a stored row against a (possibly partial) scan key over the
/// key columns the scan key binds.
fn row_key_cmp(row: &[Value], key: &RowCursor) -> Ordering {
    for i in 0..key.field_count() {
        let bound = match key.get(i as u32) {
            Some(v) => v,
            None => break,
        };
        let ord = row[i].cmp(bound);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Segment for MemSegment {
    fn version(&self) -> Version {
        self.data.version
    }

    fn delete_flag(&self) -> bool {
        self.data.delete_flag
    }

    fn empty(&self) -> bool {
        self.data.rows.is_empty()
    }

    fn zero_num_rows(&self) -> bool {
        self.data.rows.is_empty()
    }

    fn num_rows(&self) -> u64 {
        self.data.rows.len() as u64
    }

    fn schema(&self) -> Arc<TabletSchema> {
        self.data.schema.clone()
    }

    fn seek_columns(&self) -> Vec<u32> {
        Self::seek_columns_or_all(&self.state.read().params, &self.data.schema)
    }

    fn set_delete_handler(&self, handler: Arc<DeleteHandler>) {
        self.state.write().delete_handler = Some(handler);
    }

    fn set_read_params(&self, params: SegmentReadParams) {
        self.state.write().params = Some(params);
    }

    fn set_stats(&self, stats: Arc<ReadStats>) {
        self.state.write().stats = Some(stats);
    }

    fn delta_pruning_filter(&self) -> bool {
        let state = self.state.read();
        let params = match &state.params {
            Some(p) => p,
            None => return false,
        };

        for (cid, cond_column) in params.conditions.columns() {
            if let Some(Some((min, max))) = self.data.zone_maps.get(*cid as usize) {
                if cond_column.eval_range(min, max) == Coverage::None {
                    return true;
                }
            }
        }

        for predicate in params.predicates.iter() {
            let cid = predicate.column();
            if !params.load_bf_columns.contains(&cid) {
                continue;
            }
            let bloom = match self.data.blooms.get(&cid) {
                Some(b) => b,
                None => continue,
            };
            match predicate {
                crate::query::predicate::ColumnPredicate::Eq { value, .. } => {
                    if !bloom.check(value.bloom_key().as_slice()) {
                        return true;
                    }
                }
                crate::query::predicate::ColumnPredicate::In { values, .. } => {
                    if !values.iter().any(|v| bloom.check(v.bloom_key().as_slice())) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    fn delete_pruning_filter(&self) -> DelStatus {
        let state = self.state.read();
        let handler = match &state.delete_handler {
            Some(h) => h,
            None => return DelStatus::NotSatisfied,
        };
        if self.data.rows.is_empty() {
            return DelStatus::NotSatisfied;
        }

        let mut any_partial = false;
        for delete_cond in handler.delete_conditions() {
            // a delete only covers data written at or before it
            if self.data.version.hi > delete_cond.version() {
                continue;
            }
            let mut combined = Coverage::Full;
            for (cid, cond_column) in delete_cond.conditions().columns() {
                let coverage = match self.data.zone_maps.get(*cid as usize) {
                    Some(Some((min, max))) => cond_column.eval_range(min, max),
                    // no zone map (all-null column): unknown
                    _ => Coverage::Partial,
                };
                match coverage {
                    Coverage::None => {
                        combined = Coverage::None;
                        break;
                    }
                    Coverage::Partial => combined = Coverage::Partial,
                    Coverage::Full => {}
                }
            }
            match combined {
                Coverage::Full => return DelStatus::Satisfied,
                Coverage::Partial => any_partial = true,
                Coverage::None => {}
            }
        }

        if any_partial {
            DelStatus::PartialSatisfied
        } else {
            DelStatus::NotSatisfied
        }
    }

    fn set_delete_status(&self, status: DelStatus) {
        self.state.write().delete_status = Some(status);
    }

    fn prepare_block_read(
        &self,
        start: Option<&RowCursor>,
        skip_equal_start: bool,
        end: Option<&RowCursor>,
        include_equal_end: bool,
    ) -> Result<Option<RowBlock>> {
        let mut state = self.state.write();
        let rows = &self.data.rows;

        let lower = match start {
            None => 0,
            Some(key) => {
                if skip_equal_start {
                    rows.partition_point(|r| row_key_cmp(r, key) != Ordering::Greater)
                } else {
                    rows.partition_point(|r| row_key_cmp(r, key) == Ordering::Less)
                }
            }
        };
        let upper = match end {
            None => rows.len(),
            Some(key) => {
                if include_equal_end {
                    rows.partition_point(|r| row_key_cmp(r, key) != Ordering::Greater)
                } else {
                    rows.partition_point(|r| row_key_cmp(r, key) == Ordering::Less)
                }
            }
        };

        if lower >= upper {
            state.window = None;
            return Ok(None);
        }
        state.window = Some((lower, upper));
        state.next = lower;
        self.fill_next_block(&mut state)
    }

    fn get_next_block(&self) -> Result<Option<RowBlock>> {
        let mut state = self.state.write();
        self.fill_next_block(&mut state)
    }
}

/// In-memory tablet: a schema, a key model, a version set, and a delete
/// predicate registry.
pub struct MemTablet {
    schema: Arc<TabletSchema>,
    keys_type: KeysType,
    header_lock: RwLock<()>,
    segments: RwLock<Vec<Arc<SegmentData>>>,
    deletes: RwLock<Vec<DeletePredicate>>,
}

impl MemTablet {
    pub fn new(schema: Arc<TabletSchema>, keys_type: KeysType) -> Arc<Self> {
        Arc::new(Self {
            schema,
            keys_type,
            header_lock: RwLock::new(()),
            segments: RwLock::new(Vec::new()),
            deletes: RwLock::new(Vec::new()),
        })
    }

    pub fn add_segment(&self, data: Arc<SegmentData>) {
        let _guard = self.header_lock.write();
        self.segments.write().push(data);
    }

    pub fn add_delete_predicate(&self, predicate: DeletePredicate) {
        let _guard = self.header_lock.write();
        self.deletes.write().push(predicate);
    }
}

impl Tablet for MemTablet {
    fn keys_type(&self) -> KeysType {
        self.keys_type
    }

    fn schema(&self) -> Arc<TabletSchema> {
        self.schema.clone()
    }

    fn num_short_key_fields(&self) -> usize {
        self.schema.num_short_key_fields()
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.schema.field_index(name)
    }

    fn field_type_by_index(&self, index: usize) -> Option<FieldType> {
        self.schema.field_type(index)
    }

    fn obtain_header_rdlock(&self) -> RwLockReadGuard<'_, ()> {
        self.header_lock.read()
    }

    fn acquire_data_sources(&self, version: Version) -> Vec<Arc<dyn Segment>> {
        self.segments
            .read()
            .iter()
            .filter(|data| data.version.hi <= version.hi)
            .map(|data| Arc::new(MemSegment::new(data.clone())) as Arc<dyn Segment>)
            .collect()
    }

    fn release_data_sources(&self, sources: Vec<Arc<dyn Segment>>) {
        drop(sources);
    }

    fn delete_predicates(&self) -> Vec<DeletePredicate> {
        self.deletes.read().clone()
    }
}
