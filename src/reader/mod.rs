//! The per-tablet Reader
//!
//! Composes the whole read path: parameter parsing, predicate and
//! bloom-column selection, delete-condition loading, segment acquisition
//! with delta/delete pruning, scan-range seeking, and the per-key-model
//! merge policies that turn physical rows into logical rows.

mod collect;

use crate::config::ReaderConfig;
use crate::data::RowCursor;
use crate::delete::{DelStatus, DeleteHandler};
use crate::query::condition::{CondOp, Condition, Conditions};
use crate::query::predicate::{self, ColumnPredicate};
use crate::schema::{FieldType, KeysType, TabletSchema, Version};
use crate::segment::{Segment, SegmentReadParams};
use crate::stats::{ReadStats, StatsSnapshot};
use crate::tablet::Tablet;
use crate::{BasaltError, Result};
use ahash::AHashSet;
use collect::CollectIterator;
use std::cmp::Ordering;
use std::sync::Arc;

/// What kind of consumer is driving the scan. Everything but `Query`
/// bypasses segment caches to protect the query working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderType {
    Query,
    AlterTable,
    BaseCompaction,
    CumulativeCompaction,
    Checksum,
}

/// One scan-key tuple: textual values for a prefix of the key columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTuple {
    pub values: Vec<String>,
}

impl KeyTuple {
    pub fn new(values: Vec<&str>) -> Self {
        Self {
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything a Reader needs to start scanning.
///
/// `start_key`/`end_key` describe the scan ranges: range `i` runs from
/// `start_key[i]` to `end_key[i]` under the `range`/`end_range` inclusion
/// tokens (`gt`/`ge`/`eq` and `lt`/`le`). Empty `start_key` means one full
/// sweep. When `end_key` is non-empty its length must equal
/// `start_key`'s. Mis-ordered bounds are not an error; such a range simply
/// produces no rows.
///
/// Not-equal and not-in conditions are accepted but never pushed down; the
/// upstream operator must keep evaluating them on emitted rows.
pub struct ReaderParams {
    pub tablet: Arc<dyn Tablet>,
    pub version: Version,
    pub reader_type: ReaderType,
    /// True when the consumer aggregates upstream; relaxes ordering and
    /// bounds per-call merge work.
    pub aggregation: bool,
    pub return_columns: Vec<u32>,
    pub conditions: Vec<Condition>,
    pub start_key: Vec<KeyTuple>,
    pub end_key: Vec<KeyTuple>,
    pub range: String,
    pub end_range: String,
    /// Pre-acquired segments, consumed instead of the tablet version set
    /// by the compaction and alter reader types.
    pub segments: Vec<Arc<dyn Segment>>,
    pub config: ReaderConfig,
}

impl ReaderParams {
    pub fn new(tablet: Arc<dyn Tablet>, version: Version) -> Self {
        Self {
            tablet,
            version,
            reader_type: ReaderType::Query,
            aggregation: false,
            return_columns: Vec::new(),
            conditions: Vec::new(),
            start_key: Vec::new(),
            end_key: Vec::new(),
            range: "gt".to_string(),
            end_range: "lt".to_string(),
            segments: Vec::new(),
            config: ReaderConfig::default(),
        }
    }
}

/// Materialized scan ranges.
struct KeysParam {
    range: String,
    end_range: String,
    start_keys: Vec<RowCursor>,
    end_keys: Vec<RowCursor>,
}

/// Row-production policy picked from the tablet's key model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyModel {
    Dup,
    Unique,
    Agg,
}

pub struct Reader {
    tablet: Arc<dyn Tablet>,
    schema: Arc<TabletSchema>,
    version: Version,
    reader_type: ReaderType,
    aggregation: bool,
    config: ReaderConfig,

    conditions: Arc<Conditions>,
    col_predicates: Arc<Vec<ColumnPredicate>>,
    load_bf_columns: AHashSet<u32>,
    delete_handler: Arc<DeleteHandler>,

    return_columns: Vec<u32>,
    seek_columns: Vec<u32>,
    key_cids: Vec<u32>,
    value_cids: Vec<u32>,

    keys_param: KeysParam,
    next_key_index: usize,

    data_sources: Vec<Arc<dyn Segment>>,
    own_data_sources: bool,

    collect_iter: CollectIterator,
    key_model: KeyModel,
    stats: Arc<ReadStats>,
    closed: bool,
}

impl Reader {
    /// Initialize a reader. Any failure releases whatever was acquired.
    pub fn new(params: ReaderParams) -> Result<Self> {
        let tablet = params.tablet.clone();
        let schema = tablet.schema();

        if !params.end_key.is_empty() && params.end_key.len() != params.start_key.len() {
            return Err(BasaltError::InvalidParameter(format!(
                "{} start keys but {} end keys",
                params.start_key.len(),
                params.end_key.len()
            )));
        }

        let mut conditions = Conditions::new(schema.clone());
        let mut col_predicates = Vec::new();
        for condition in &params.conditions {
            conditions.append_condition(condition)?;
            if let Some(pred) = predicate::parse_to_predicate(&schema, condition)? {
                col_predicates.push(pred);
            }
        }

        let load_bf_columns = Self::init_load_bf_columns(&params, &schema, &conditions);

        let delete_handler = if params.reader_type == ReaderType::CumulativeCompaction {
            DeleteHandler::empty()
        } else {
            DeleteHandler::load(tablet.as_ref(), params.version.hi)?
        };
        let delete_handler = Arc::new(delete_handler);

        let (return_columns, key_cids, value_cids) =
            Self::init_return_columns(&params, &schema, &delete_handler)?;

        let keys_param = Self::init_keys_param(&params, &schema)?;

        let seek_columns =
            Self::init_seek_columns(&schema, &return_columns, &conditions, &keys_param);

        let conditions = Arc::new(conditions);
        let col_predicates = Arc::new(col_predicates);
        let stats = Arc::new(ReadStats::new());

        let (data_sources, own_data_sources) = Self::acquire_data_sources(
            &params,
            &tablet,
            &delete_handler,
            &stats,
            &SegmentReadParams {
                return_columns: return_columns.clone(),
                seek_columns: seek_columns.clone(),
                load_bf_columns: load_bf_columns.clone(),
                conditions: conditions.clone(),
                predicates: col_predicates.clone(),
                use_cache: params.reader_type == ReaderType::Query,
            },
        )?;

        // concat is enough when the caller aggregates upstream or the
        // model keeps duplicates anyway
        let merge = !(params.reader_type == ReaderType::Query
            && (params.aggregation || tablet.keys_type() == KeysType::DupKeys));
        let collect_iter = CollectIterator::new(merge, delete_handler.clone(), stats.clone());

        let key_model = match tablet.keys_type() {
            KeysType::DupKeys => KeyModel::Dup,
            KeysType::UniqueKeys => KeyModel::Unique,
            KeysType::AggKeys => KeyModel::Agg,
        };

        let mut reader = Self {
            tablet,
            schema,
            version: params.version,
            reader_type: params.reader_type,
            aggregation: params.aggregation,
            config: params.config,
            conditions,
            col_predicates,
            load_bf_columns,
            delete_handler,
            return_columns,
            seek_columns,
            key_cids,
            value_cids,
            keys_param,
            next_key_index: 0,
            data_sources,
            own_data_sources,
            collect_iter,
            key_model,
            stats,
            closed: false,
        };
        // prime the first scan range; an empty tablet just reports EOF on
        // the first next_row call
        reader.attach_data_to_merge_set(true)?;
        Ok(reader)
    }

    /// Produce the next logical row, or `None` at end of scan.
    pub fn next_row(&mut self) -> Result<Option<RowCursor>> {
        match self.key_model {
            KeyModel::Dup => self.dup_key_next_row(),
            KeyModel::Unique => self.unique_key_next_row(),
            KeyModel::Agg => self.agg_key_next_row(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn reader_type(&self) -> ReaderType {
        self.reader_type
    }

    pub fn delete_handler(&self) -> &DeleteHandler {
        &self.delete_handler
    }

    pub fn stats_handle(&self) -> Arc<ReadStats> {
        self.stats.clone()
    }

    pub fn return_columns(&self) -> &[u32] {
        &self.return_columns
    }

    pub fn seek_columns(&self) -> &[u32] {
        &self.seek_columns
    }

    pub fn key_cids(&self) -> &[u32] {
        &self.key_cids
    }

    pub fn value_cids(&self) -> &[u32] {
        &self.value_cids
    }

    pub fn load_bf_columns(&self) -> &AHashSet<u32> {
        &self.load_bf_columns
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    pub fn col_predicates(&self) -> &[ColumnPredicate] {
        &self.col_predicates
    }

    /// Release segments and merge state. Idempotent; also run on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        log::debug!(
            "reader closed, merged_rows={} rows_del_filtered={}",
            self.stats.merged_rows(),
            self.stats.rows_del_filtered()
        );
        self.collect_iter.clear();
        let sources = std::mem::take(&mut self.data_sources);
        if self.own_data_sources {
            self.tablet.release_data_sources(sources);
        }
    }

    // ---- initialization -------------------------------------------------

    /// Columns worth loading bloom filters for: equality-shaped conditions
    /// on bloom-carrying columns, minus scan-key prefix columns already
    /// pinned by equal start/end bounds. The last pinned column stays only
    /// when it is a varchar/HLL short-key column, where bloom membership
    /// still beats the sparse index.
    fn init_load_bf_columns(
        params: &ReaderParams,
        schema: &TabletSchema,
        conditions: &Conditions,
    ) -> AHashSet<u32> {
        let mut columns: AHashSet<u32> = AHashSet::new();
        for (cid, cond_column) in conditions.columns() {
            for cond in cond_column.conds() {
                let selects = match cond.op {
                    CondOp::Eq => true,
                    CondOp::In => cond.operands.len() < params.config.max_in_list_bloom_operands,
                    _ => false,
                };
                if selects {
                    columns.insert(*cid);
                }
            }
        }

        for (i, field) in schema.fields().iter().enumerate() {
            if !field.is_bf_column {
                columns.remove(&(i as u32));
            }
        }

        if params.end_key.is_empty() {
            return columns;
        }

        let mut min_scan_key_len = schema.num_fields();
        for key in params.start_key.iter().chain(params.end_key.iter()) {
            min_scan_key_len = min_scan_key_len.min(key.len());
        }

        let mut max_equal_index: i64 = -1;
        for (start, end) in params.start_key.iter().zip(params.end_key.iter()) {
            let mut j = 0;
            while j < min_scan_key_len && start.values[j] == end.values[j] {
                j += 1;
            }
            max_equal_index = max_equal_index.max(j as i64 - 1);
        }

        if max_equal_index < 0 {
            return columns;
        }
        for i in 0..max_equal_index {
            columns.remove(&(i as u32));
        }
        let index = max_equal_index as usize;
        let field_type = schema.field_type(index);
        let keep_last = matches!(field_type, Some(FieldType::Varchar) | Some(FieldType::Hll))
            && index + 1 <= schema.num_short_key_fields();
        if !keep_last {
            columns.remove(&(index as u32));
        }
        columns
    }

    fn init_return_columns(
        params: &ReaderParams,
        schema: &TabletSchema,
        delete_handler: &DeleteHandler,
    ) -> Result<(Vec<u32>, Vec<u32>, Vec<u32>)> {
        if params
            .return_columns
            .iter()
            .any(|&id| id as usize >= schema.num_fields())
        {
            return Err(BasaltError::InvalidParameter(
                "return column id out of schema range".to_string(),
            ));
        }

        let mut return_columns;
        let mut key_cids = Vec::new();
        let mut value_cids = Vec::new();

        let split = |ids: &[u32], key_cids: &mut Vec<u32>, value_cids: &mut Vec<u32>| {
            for &id in ids {
                if schema.fields()[id as usize].is_key {
                    key_cids.push(id);
                } else {
                    value_cids.push(id);
                }
            }
        };

        if params.reader_type == ReaderType::Query {
            return_columns = params.return_columns.clone();
            if delete_handler.conditions_num() != 0 && params.aggregation {
                // delete predicates must see their columns on every row
                let mut seen: AHashSet<u32> = return_columns.iter().copied().collect();
                for delete_cond in delete_handler.delete_conditions() {
                    for &cid in delete_cond.conditions().columns().keys() {
                        if seen.insert(cid) {
                            return_columns.push(cid);
                        }
                    }
                }
            }
            split(&params.return_columns, &mut key_cids, &mut value_cids);
        } else if params.return_columns.is_empty() {
            return_columns = (0..schema.num_fields() as u32).collect();
            split(&return_columns, &mut key_cids, &mut value_cids);
            log::debug!("return columns empty, using full schema");
        } else if params.reader_type == ReaderType::Checksum {
            return_columns = params.return_columns.clone();
            split(&return_columns, &mut key_cids, &mut value_cids);
        } else {
            return Err(BasaltError::InvalidParameter(format!(
                "reader type {:?} requires empty return_columns",
                params.reader_type
            )));
        }

        // the aggregation routines expect key ids high-to-low
        key_cids.sort_unstable_by(|a, b| b.cmp(a));

        Ok((return_columns, key_cids, value_cids))
    }

    fn init_keys_param(params: &ReaderParams, schema: &Arc<TabletSchema>) -> Result<KeysParam> {
        let mut start_keys = Vec::with_capacity(params.start_key.len());
        for tuple in &params.start_key {
            start_keys.push(RowCursor::from_scan_tuple(schema.clone(), &tuple.values)?);
        }
        let mut end_keys = Vec::with_capacity(params.end_key.len());
        for tuple in &params.end_key {
            end_keys.push(RowCursor::from_scan_tuple(schema.clone(), &tuple.values)?);
        }
        Ok(KeysParam {
            range: params.range.clone(),
            end_range: params.end_range.clone(),
            start_keys,
            end_keys,
        })
    }

    fn init_seek_columns(
        schema: &TabletSchema,
        return_columns: &[u32],
        conditions: &Conditions,
        keys_param: &KeysParam,
    ) -> Vec<u32> {
        let mut wanted: AHashSet<u32> = return_columns.iter().copied().collect();
        wanted.extend(conditions.columns().keys().copied());

        let mut max_key_count = 0;
        for key in keys_param.start_keys.iter().chain(keys_param.end_keys.iter()) {
            max_key_count = max_key_count.max(key.field_count());
        }

        (0..schema.num_fields() as u32)
            .filter(|&i| (i as usize) < max_key_count || wanted.contains(&i))
            .collect()
    }

    fn acquire_data_sources(
        params: &ReaderParams,
        tablet: &Arc<dyn Tablet>,
        delete_handler: &Arc<DeleteHandler>,
        stats: &Arc<ReadStats>,
        read_params: &SegmentReadParams,
    ) -> Result<(Vec<Arc<dyn Segment>>, bool)> {
        let (sources, own) = match params.reader_type {
            ReaderType::AlterTable
            | ReaderType::BaseCompaction
            | ReaderType::CumulativeCompaction => (params.segments.clone(), false),
            _ => {
                let acquired = {
                    let _guard = tablet.obtain_header_rdlock();
                    tablet.acquire_data_sources(params.version)
                };
                if acquired.is_empty() {
                    log::warn!(
                        "failed to acquire data sources, version=[{}-{}]",
                        params.version.lo,
                        params.version.hi
                    );
                    return Err(BasaltError::VersionNotFound(
                        params.version.lo,
                        params.version.hi,
                    ));
                }
                (acquired, true)
            }
        };

        let mut kept = Vec::with_capacity(sources.len());
        for segment in sources {
            if segment.empty() || segment.zero_num_rows() {
                continue;
            }
            segment.set_delete_handler(delete_handler.clone());
            segment.set_read_params(read_params.clone());
            segment.set_stats(stats.clone());

            if segment.delta_pruning_filter() {
                let version = segment.version();
                log::debug!("segment [{}-{}] pruned by stats", version.lo, version.hi);
                stats.inc_rows_stats_filtered(segment.num_rows());
                continue;
            }
            match segment.delete_pruning_filter() {
                DelStatus::Satisfied => {
                    let version = segment.version();
                    log::debug!(
                        "segment [{}-{}] wholly removed by delete predicates",
                        version.lo,
                        version.hi
                    );
                    stats.inc_rows_del_filtered(segment.num_rows());
                    continue;
                }
                status @ (DelStatus::PartialSatisfied | DelStatus::NotSatisfied) => {
                    segment.set_delete_status(status);
                }
            }
            kept.push(segment);
        }

        Ok((kept, own))
    }

    // ---- scan-range driver ----------------------------------------------

    /// Point every live segment at the next scan range and reload the
    /// iterator. Ranges that turn out empty are skipped; returns true at
    /// end of scan.
    fn attach_data_to_merge_set(&mut self, mut first: bool) -> Result<bool> {
        loop {
            self.collect_iter.clear();

            let mut start_key: Option<RowCursor> = None;
            let mut end_key: Option<RowCursor> = None;
            let mut skip_equal_start = false;
            let mut include_equal_end = false;

            if !self.keys_param.start_keys.is_empty() {
                if self.next_key_index >= self.keys_param.start_keys.len() {
                    log::debug!("all scan ranges consumed");
                    return Ok(true);
                }
                let cur = self.next_key_index;
                self.next_key_index += 1;

                start_key = Some(self.keys_param.start_keys[cur].clone());
                if !self.keys_param.end_keys.is_empty() {
                    end_key = Some(self.keys_param.end_keys[cur].clone());
                    include_equal_end = match self.keys_param.end_range.as_str() {
                        "lt" => false,
                        "le" => true,
                        other => {
                            return Err(BasaltError::InvalidScanRange(format!(
                                "unknown end_range token: {other}"
                            )))
                        }
                    };
                }

                match self.keys_param.range.as_str() {
                    "gt" => {
                        if let (Some(start), Some(end)) = (&start_key, &end_key) {
                            if start.cmp_prefix(end) != Ordering::Less {
                                return Ok(true);
                            }
                        }
                        skip_equal_start = true;
                    }
                    "ge" => {
                        if let (Some(start), Some(end)) = (&start_key, &end_key) {
                            if start.cmp_prefix(end) == Ordering::Greater {
                                return Ok(true);
                            }
                        }
                        skip_equal_start = false;
                    }
                    "eq" => {
                        end_key = start_key.clone();
                        include_equal_end = true;
                        skip_equal_start = false;
                    }
                    other => {
                        return Err(BasaltError::InvalidScanRange(format!(
                            "unknown range token: {other}"
                        )))
                    }
                }
            } else if !first {
                return Ok(true);
            }

            for segment in &self.data_sources {
                match segment.prepare_block_read(
                    start_key.as_ref(),
                    skip_equal_start,
                    end_key.as_ref(),
                    include_equal_end,
                ) {
                    Ok(Some(block)) => {
                        self.collect_iter.add_child(segment.clone(), block)?;
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("prepare block read failed: {e}");
                        return Err(e);
                    }
                }
            }

            if self.collect_iter.current().is_some() {
                return Ok(false);
            }
            first = false;
        }
    }

    // ---- key-model policies ---------------------------------------------

    fn dup_key_next_row(&mut self) -> Result<Option<RowCursor>> {
        if self.collect_iter.current().is_none() && self.attach_data_to_merge_set(false)? {
            return Ok(None);
        }
        let mut out = RowCursor::new(self.schema.clone(), &self.return_columns)?;
        match self.collect_iter.current() {
            Some((row, _)) => out.copy_from(row),
            None => return Ok(None),
        }
        self.collect_iter.advance()?;
        Ok(Some(out))
    }

    fn agg_key_next_row(&mut self) -> Result<Option<RowCursor>> {
        if self.collect_iter.current().is_none() && self.attach_data_to_merge_set(false)? {
            return Ok(None);
        }
        let mut out = RowCursor::new(self.schema.clone(), &self.return_columns)?;
        match self.collect_iter.current() {
            Some((row, _)) => out.agg_init(row),
            None => return Ok(None),
        }

        let mut merged: u64 = 0;
        loop {
            self.collect_iter.advance()?;
            let stop = match self.collect_iter.current() {
                None => true,
                Some((next, _)) => {
                    if self.aggregation && merged > self.config.scanner_row_num {
                        true
                    } else if !RowCursor::equal(&self.key_cids, &out, next) {
                        true
                    } else {
                        out.aggregate(&self.value_cids, next);
                        merged += 1;
                        false
                    }
                }
            };
            if stop {
                break;
            }
        }
        self.stats.add_merged_rows(merged);
        out.finalize_one_merge(&self.value_cids);
        Ok(Some(out))
    }

    fn unique_key_next_row(&mut self) -> Result<Option<RowCursor>> {
        loop {
            if self.collect_iter.current().is_none() && self.attach_data_to_merge_set(false)? {
                return Ok(None);
            }
            let mut out = RowCursor::new(self.schema.clone(), &self.return_columns)?;
            let mut cur_delete_flag = match self.collect_iter.current() {
                Some((row, delete_flag)) => {
                    out.agg_init(row);
                    delete_flag
                }
                None => return Ok(None),
            };

            let mut merged: u64 = 0;
            loop {
                self.collect_iter.advance()?;
                let stop = match self.collect_iter.current() {
                    None => true,
                    Some((next, next_delete)) => {
                        if self.aggregation && merged > self.config.scanner_row_num {
                            true
                        } else if !RowCursor::equal(&self.key_cids, &out, next) {
                            true
                        } else {
                            // same key: the newer row's flag and values win
                            cur_delete_flag = next_delete;
                            out.aggregate(&self.value_cids, next);
                            merged += 1;
                            false
                        }
                    }
                };
                if stop {
                    break;
                }
            }
            self.stats.add_merged_rows(merged);
            out.finalize_one_merge(&self.value_cids);

            if !cur_delete_flag {
                return Ok(Some(out));
            }
            // the whole key group resolved to a tombstone
            self.stats.inc_rows_del_filtered(1);
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.close();
    }
}
