//! Typed pushdown predicates
//!
//! The factory turns a raw [`Condition`] into a [`ColumnPredicate`] a
//! segment can evaluate directly. Only a subset of conditions is pushable:
//! not-equal and not-in never are (the upstream operator keeps evaluating
//! them), and neither is any column with a non-`None` aggregation method,
//! because pre-aggregated values cannot be filtered before the merge.

use crate::data::{self, Value};
use crate::query::condition::Condition;
use crate::schema::{AggregationMethod, TabletSchema};
use crate::{BasaltError, Result};
use std::collections::BTreeSet;

/// A typed predicate over one column, evaluated per row inside segments.
#[derive(Debug, Clone)]
pub enum ColumnPredicate {
    Eq { column: u32, value: Value },
    In { column: u32, values: BTreeSet<Value> },
    Lt { column: u32, value: Value },
    Le { column: u32, value: Value },
    Gt { column: u32, value: Value },
    Ge { column: u32, value: Value },
    Null { column: u32, is_null: bool },
}

impl ColumnPredicate {
    pub fn column(&self) -> u32 {
        match self {
            ColumnPredicate::Eq { column, .. }
            | ColumnPredicate::In { column, .. }
            | ColumnPredicate::Lt { column, .. }
            | ColumnPredicate::Le { column, .. }
            | ColumnPredicate::Gt { column, .. }
            | ColumnPredicate::Ge { column, .. }
            | ColumnPredicate::Null { column, .. } => *column,
        }
    }

    /// Evaluate against one cell. Missing or null cells fail every
    /// comparison; only `Null { is_null: true }` accepts them.
    pub fn evaluate(&self, cell: Option<&Value>) -> bool {
        if let ColumnPredicate::Null { is_null, .. } = self {
            let cell_is_null = cell.map_or(true, |v| v.is_null());
            return cell_is_null == *is_null;
        }
        let value = match cell {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };
        match self {
            ColumnPredicate::Eq { value: v, .. } => value == v,
            ColumnPredicate::In { values, .. } => values.contains(value),
            ColumnPredicate::Lt { value: v, .. } => value < v,
            ColumnPredicate::Le { value: v, .. } => value <= v,
            ColumnPredicate::Gt { value: v, .. } => value > v,
            ColumnPredicate::Ge { value: v, .. } => value >= v,
            ColumnPredicate::Null { .. } => unreachable!(),
        }
    }
}

/// Parse a condition into a pushdown predicate.
///
/// Returns `Ok(None)` for conditions that are legal but not pushable:
/// not-equal / not-in ops, aggregated columns, and column types without a
/// comparable storage form (HLL).
pub fn parse_to_predicate(
    schema: &TabletSchema,
    condition: &Condition,
) -> Result<Option<ColumnPredicate>> {
    let index = schema
        .field_index(&condition.column_name)
        .ok_or_else(|| BasaltError::ColumnNotFound(condition.column_name.clone()))?;
    let field = &schema.fields()[index];
    if field.aggregation != AggregationMethod::None {
        return Ok(None);
    }
    let column = index as u32;

    let single = |predicate: fn(u32, Value) -> ColumnPredicate| -> Result<Option<ColumnPredicate>> {
        let text = condition.values.first().ok_or_else(|| {
            BasaltError::InvalidParameter(format!(
                "condition on {} has no value",
                condition.column_name
            ))
        })?;
        match data::parse_value(field, text) {
            Ok(value) => Ok(Some(predicate(column, value))),
            // untyped column (HLL): legal, just not pushable
            Err(BasaltError::InvalidValue { .. })
                if field.field_type == crate::schema::FieldType::Hll =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    };

    match condition.op.as_str() {
        "*=" if condition.values.len() == 1 => {
            single(|column, value| ColumnPredicate::Eq { column, value })
        }
        "*=" => {
            if field.field_type == crate::schema::FieldType::Hll {
                return Ok(None);
            }
            let values = condition
                .values
                .iter()
                .map(|v| data::parse_value(field, v))
                .collect::<Result<BTreeSet<Value>>>()?;
            Ok(Some(ColumnPredicate::In { column, values }))
        }
        "<<" => single(|column, value| ColumnPredicate::Lt { column, value }),
        "<=" => single(|column, value| ColumnPredicate::Le { column, value }),
        ">>" => single(|column, value| ColumnPredicate::Gt { column, value }),
        ">=" => single(|column, value| ColumnPredicate::Ge { column, value }),
        "is" => {
            let is_null = condition.values.first().map(|s| s.as_str()) == Some("null");
            Ok(Some(ColumnPredicate::Null { column, is_null }))
        }
        // not-equal / not-in stay with the upstream operator
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldInfo, FieldType, TabletSchema};
    use std::sync::Arc;

    fn schema() -> Arc<TabletSchema> {
        TabletSchema::new(
            vec![
                FieldInfo::new("id", FieldType::Int32).key(),
                FieldInfo::new("name", FieldType::Varchar).key(),
                FieldInfo::new("total", FieldType::Int64).aggregation(AggregationMethod::Sum),
            ],
            1,
        )
    }

    #[test]
    fn test_eq_and_in_from_same_token() {
        let schema = schema();
        let eq = parse_to_predicate(&schema, &Condition::new("id", "*=", vec!["7"]))
            .unwrap()
            .unwrap();
        assert!(matches!(eq, ColumnPredicate::Eq { column: 0, .. }));
        assert!(eq.evaluate(Some(&Value::Int32(7))));
        assert!(!eq.evaluate(Some(&Value::Int32(8))));
        assert!(!eq.evaluate(None));

        let inlist = parse_to_predicate(&schema, &Condition::new("id", "*=", vec!["1", "2", "3"]))
            .unwrap()
            .unwrap();
        assert!(matches!(inlist, ColumnPredicate::In { .. }));
        assert!(inlist.evaluate(Some(&Value::Int32(2))));
        assert!(!inlist.evaluate(Some(&Value::Int32(4))));
    }

    #[test]
    fn test_ordering_ops() {
        let schema = schema();
        let lt = parse_to_predicate(&schema, &Condition::new("id", "<<", vec!["5"]))
            .unwrap()
            .unwrap();
        assert!(lt.evaluate(Some(&Value::Int32(4))));
        assert!(!lt.evaluate(Some(&Value::Int32(5))));

        let ge = parse_to_predicate(&schema, &Condition::new("id", ">=", vec!["5"]))
            .unwrap()
            .unwrap();
        assert!(ge.evaluate(Some(&Value::Int32(5))));
        assert!(!ge.evaluate(Some(&Value::Int32(4))));
    }

    #[test]
    fn test_is_null() {
        let schema = schema();
        let isnull = parse_to_predicate(&schema, &Condition::new("name", "is", vec!["null"]))
            .unwrap()
            .unwrap();
        assert!(isnull.evaluate(Some(&Value::Null)));
        assert!(isnull.evaluate(None));
        assert!(!isnull.evaluate(Some(&Value::Varchar("x".into()))));

        let notnull = parse_to_predicate(&schema, &Condition::new("name", "is", vec!["not null"]))
            .unwrap()
            .unwrap();
        assert!(notnull.evaluate(Some(&Value::Varchar("x".into()))));
        assert!(!notnull.evaluate(Some(&Value::Null)));
    }

    #[test]
    fn test_aggregated_column_not_pushed() {
        let schema = schema();
        let pred = parse_to_predicate(&schema, &Condition::new("total", "*=", vec!["10"])).unwrap();
        assert!(pred.is_none());
    }

    #[test]
    fn test_not_equal_not_pushed() {
        let schema = schema();
        let pred = parse_to_predicate(&schema, &Condition::new("id", "!*=", vec!["10"])).unwrap();
        assert!(pred.is_none());
    }

    #[test]
    fn test_unknown_column_is_error() {
        let schema = schema();
        assert!(parse_to_predicate(&schema, &Condition::new("nope", "*=", vec!["1"])).is_err());
    }

    #[test]
    fn test_bad_value_is_error() {
        let schema = schema();
        assert!(parse_to_predicate(&schema, &Condition::new("id", "*=", vec!["12x"])).is_err());
    }
}
