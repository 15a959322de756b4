//! Row cursor: one row value bound to a schema projection
//!
//! A cursor binds a subset of schema columns (always in schema order) and
//! holds one value slot per bound column. The merge path compares cursors
//! by key, folds same-key rows with the per-column aggregation method, and
//! copies projections between cursors bound to different column sets.

use crate::data::{self, Value};
use crate::schema::{AggregationMethod, TabletSchema};
use crate::{BasaltError, Result};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RowCursor {
    schema: Arc<TabletSchema>,
    /// Bound column ids, ascending (schema order).
    columns: Vec<u32>,
    /// Schema-sized map from column id to slot in `values`.
    slots: Vec<Option<usize>>,
    values: Vec<Value>,
}

impl RowCursor {
    /// Bind a cursor to a projection. Column ids must exist in the schema;
    /// they are stored in schema order regardless of input order.
    pub fn new(schema: Arc<TabletSchema>, columns: &[u32]) -> Result<Self> {
        let mut sorted: Vec<u32> = columns.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if let Some(&bad) = sorted.iter().find(|&&c| c as usize >= schema.num_fields()) {
            return Err(BasaltError::InvalidParameter(format!(
                "column id {} out of range for schema of {} fields",
                bad,
                schema.num_fields()
            )));
        }
        let mut slots = vec![None; schema.num_fields()];
        for (slot, &cid) in sorted.iter().enumerate() {
            slots[cid as usize] = Some(slot);
        }
        let values = vec![Value::Null; sorted.len()];
        Ok(Self {
            schema,
            columns: sorted,
            slots,
            values,
        })
    }

    /// Build a scan-key cursor: bind the leading `tuple.len()` key columns
    /// and parse each textual value against its column type.
    pub fn from_scan_tuple(schema: Arc<TabletSchema>, tuple: &[String]) -> Result<Self> {
        if tuple.len() > schema.num_key_fields() {
            return Err(BasaltError::InvalidParameter(format!(
                "scan key has {} fields but schema has {} key columns",
                tuple.len(),
                schema.num_key_fields()
            )));
        }
        let columns: Vec<u32> = (0..tuple.len() as u32).collect();
        let mut cursor = Self::new(schema.clone(), &columns)?;
        for (i, text) in tuple.iter().enumerate() {
            let field = schema.field(i).ok_or_else(|| {
                BasaltError::InvalidParameter(format!("scan key column {} missing", i))
            })?;
            cursor.values[i] = data::parse_value(field, text)?;
        }
        Ok(cursor)
    }

    pub fn schema(&self) -> &Arc<TabletSchema> {
        &self.schema
    }

    /// Bound column ids, in schema order.
    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    /// Number of bound columns.
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, column: u32) -> Option<&Value> {
        let slot = *self.slots.get(column as usize)?;
        slot.map(|s| &self.values[s])
    }

    pub fn set(&mut self, column: u32, value: Value) -> Result<()> {
        let slot = self
            .slots
            .get(column as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                BasaltError::InvalidParameter(format!("column {} not bound to cursor", column))
            })?;
        self.values[slot] = value;
        Ok(())
    }

    /// Compare over the shared bound-column prefix (scan keys bind fewer
    /// fields than data rows; a shorter key compares only what it has).
    pub fn cmp_prefix(&self, other: &RowCursor) -> Ordering {
        let shared = self.columns.len().min(other.columns.len());
        for i in 0..shared {
            debug_assert_eq!(self.columns[i], other.columns[i]);
            let ord = self.values[i].cmp(&other.values[i]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compare all key columns bound in both cursors, in schema order.
    pub fn full_key_cmp(&self, other: &RowCursor) -> Ordering {
        let key_fields = self.schema.num_key_fields();
        for cid in 0..key_fields as u32 {
            let (a, b) = match (self.get(cid), other.get(cid)) {
                (Some(a), Some(b)) => (a, b),
                _ => break,
            };
            let ord = a.cmp(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Per-projection equality over the given column ids.
    pub fn equal(column_ids: &[u32], a: &RowCursor, b: &RowCursor) -> bool {
        column_ids
            .iter()
            .all(|&cid| match (a.get(cid), b.get(cid)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            })
    }

    /// Copy every bound column present in `src` into this cursor. Columns
    /// absent from `src` are left untouched.
    pub fn copy_from(&mut self, src: &RowCursor) {
        for i in 0..self.columns.len() {
            let cid = self.columns[i];
            if let Some(value) = src.get(cid) {
                self.values[i] = value.clone();
            }
        }
    }

    /// Start a merge group from its first physical row.
    pub fn agg_init(&mut self, src: &RowCursor) {
        self.copy_from(src);
    }

    /// Fold `src` into this cursor for each value column, using the
    /// column's declared aggregation. The fold direction is
    /// oldest-to-newest, which is what makes `Replace` keep the newest
    /// write.
    pub fn aggregate(&mut self, value_cids: &[u32], src: &RowCursor) {
        for &cid in value_cids {
            let method = match self.schema.field(cid as usize) {
                Some(field) => field.aggregation,
                None => continue,
            };
            let slot = match self.slots.get(cid as usize).copied().flatten() {
                Some(slot) => slot,
                None => continue,
            };
            let incoming = match src.get(cid) {
                Some(value) => value,
                None => continue,
            };
            let current = &mut self.values[slot];
            match method {
                AggregationMethod::None => {}
                AggregationMethod::Replace => *current = incoming.clone(),
                AggregationMethod::Sum => *current = sum_values(current, incoming),
                AggregationMethod::Min => {
                    if *incoming < *current {
                        *current = incoming.clone();
                    }
                }
                AggregationMethod::Max => {
                    if *incoming > *current {
                        *current = incoming.clone();
                    }
                }
                AggregationMethod::HllUnion => {
                    if let (Value::Hll(acc), Value::Hll(more)) = (current, incoming) {
                        acc.extend_from_slice(more);
                    }
                }
            }
        }
    }

    /// Complete one merge group. Object aggregations compact their
    /// accumulated state here; scalar folds are already final.
    pub fn finalize_one_merge(&mut self, value_cids: &[u32]) {
        for &cid in value_cids {
            let is_hll = matches!(
                self.schema.field(cid as usize).map(|f| f.aggregation),
                Some(AggregationMethod::HllUnion)
            );
            if !is_hll {
                continue;
            }
            if let Some(slot) = self.slots.get(cid as usize).copied().flatten() {
                if let Value::Hll(elems) = &mut self.values[slot] {
                    elems.sort_unstable();
                    elems.dedup();
                }
            }
        }
    }
}

fn sum_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int8(x), Value::Int8(y)) => Value::Int8(x.wrapping_add(*y)),
        (Value::Int16(x), Value::Int16(y)) => Value::Int16(x.wrapping_add(*y)),
        (Value::Int32(x), Value::Int32(y)) => Value::Int32(x.wrapping_add(*y)),
        (Value::Int64(x), Value::Int64(y)) => Value::Int64(x.wrapping_add(*y)),
        (Value::Int128(x), Value::Int128(y)) => Value::Int128(x.wrapping_add(*y)),
        (Value::Double(x), Value::Double(y)) => Value::Double(x + y),
        (Value::Decimal(x), Value::Decimal(y)) => Value::Decimal(x.add(*y)),
        // null absorbs into the other side; mismatched types keep the
        // accumulator
        (Value::Null, other) => other.clone(),
        (acc, _) => acc.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AggregationMethod, FieldInfo, FieldType, TabletSchema};

    fn agg_schema() -> Arc<TabletSchema> {
        TabletSchema::new(
            vec![
                FieldInfo::new("k0", FieldType::Int64).key(),
                FieldInfo::new("k1", FieldType::Varchar).key(),
                FieldInfo::new("sum", FieldType::Int64).aggregation(AggregationMethod::Sum),
                FieldInfo::new("last", FieldType::Varchar).aggregation(AggregationMethod::Replace),
                FieldInfo::new("low", FieldType::Int32).aggregation(AggregationMethod::Min),
                FieldInfo::new("sketch", FieldType::Hll).aggregation(AggregationMethod::HllUnion),
            ],
            1,
        )
    }

    fn row(schema: &Arc<TabletSchema>, columns: &[u32], values: Vec<Value>) -> RowCursor {
        let mut cursor = RowCursor::new(schema.clone(), columns).unwrap();
        for (&cid, value) in columns.iter().zip(values) {
            cursor.set(cid, value).unwrap();
        }
        cursor
    }

    #[test]
    fn test_bind_rejects_unknown_column() {
        let schema = agg_schema();
        assert!(RowCursor::new(schema, &[0, 99]).is_err());
    }

    #[test]
    fn test_cmp_prefix_partial_key() {
        let schema = agg_schema();
        let full = row(
            &schema,
            &[0, 1],
            vec![Value::Int64(5), Value::Varchar("x".into())],
        );
        let short = RowCursor::from_scan_tuple(schema, &["5".to_string()]).unwrap();
        assert_eq!(full.cmp_prefix(&short), Ordering::Equal);
        assert_eq!(short.cmp_prefix(&full), Ordering::Equal);
    }

    #[test]
    fn test_full_key_cmp() {
        let schema = agg_schema();
        let a = row(
            &schema,
            &[0, 1],
            vec![Value::Int64(1), Value::Varchar("a".into())],
        );
        let b = row(
            &schema,
            &[0, 1],
            vec![Value::Int64(1), Value::Varchar("b".into())],
        );
        assert_eq!(a.full_key_cmp(&b), Ordering::Less);
        assert_eq!(a.full_key_cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_scan_tuple_too_long() {
        let schema = agg_schema();
        let tuple: Vec<String> = vec!["1".into(), "a".into(), "oops".into()];
        assert!(RowCursor::from_scan_tuple(schema, &tuple).is_err());
    }

    #[test]
    fn test_aggregate_folds() {
        let schema = agg_schema();
        let cols = [0u32, 2, 3, 4, 5];
        let mut acc = row(
            &schema,
            &cols,
            vec![
                Value::Int64(1),
                Value::Int64(10),
                Value::Varchar("old".into()),
                Value::Int32(7),
                Value::Hll(vec![3, 1]),
            ],
        );
        let next = row(
            &schema,
            &cols,
            vec![
                Value::Int64(1),
                Value::Int64(5),
                Value::Varchar("new".into()),
                Value::Int32(9),
                Value::Hll(vec![1, 2]),
            ],
        );
        let value_cids = [2u32, 3, 4, 5];
        acc.aggregate(&value_cids, &next);
        acc.finalize_one_merge(&value_cids);

        assert_eq!(acc.get(2), Some(&Value::Int64(15)));
        assert_eq!(acc.get(3), Some(&Value::Varchar("new".into())));
        assert_eq!(acc.get(4), Some(&Value::Int32(7)));
        assert_eq!(acc.get(5), Some(&Value::Hll(vec![1, 2, 3])));
    }

    #[test]
    fn test_copy_from_projection() {
        let schema = agg_schema();
        let src = row(
            &schema,
            &[0, 1, 2],
            vec![
                Value::Int64(4),
                Value::Varchar("k".into()),
                Value::Int64(42),
            ],
        );
        let mut narrow = RowCursor::new(schema, &[0, 2]).unwrap();
        narrow.copy_from(&src);
        assert_eq!(narrow.get(0), Some(&Value::Int64(4)));
        assert_eq!(narrow.get(2), Some(&Value::Int64(42)));
        assert_eq!(narrow.get(1), None);
    }
}
