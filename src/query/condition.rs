//! Structured conditions and their pruning arithmetic
//!
//! A [`Condition`] is the stringly-typed form handed in by the caller (and
//! stored for delete predicates). [`Conditions`] is the parsed, typed form
//! shared with segments, which use it two ways: per-row evaluation (delete
//! predicates are conjunctions) and `[min, max]` range coverage for
//! zone-map pruning.

use crate::data::{self, Value};
use crate::schema::TabletSchema;
use crate::{BasaltError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One raw condition: `column op values`.
///
/// Recognized operator tokens: `*=` (one value: equal; several: in-list),
/// `!*=` (not equal / not in — accepted but never pushed down, the upstream
/// operator must still evaluate it), `<<`, `<=`, `>>`, `>=`, and `is` with
/// the single value `null` or `not null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub column_name: String,
    pub op: String,
    pub values: Vec<String>,
}

impl Condition {
    pub fn new(column_name: impl Into<String>, op: impl Into<String>, values: Vec<&str>) -> Self {
        Self {
            column_name: column_name.into(),
            op: op.into(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Parsed operator of one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// How much of a `[min, max]` value range a condition covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// No row in the range can satisfy the condition.
    None,
    /// Some rows may satisfy it.
    Partial,
    /// Every row in the range satisfies it.
    Full,
}

/// One typed condition on a single column.
#[derive(Debug, Clone)]
pub struct Cond {
    pub op: CondOp,
    pub operands: Vec<Value>,
}

impl Cond {
    /// Evaluate against one cell. Comparisons against null are false;
    /// only `is null` matches a null cell.
    pub fn eval_value(&self, value: Option<&Value>) -> bool {
        match self.op {
            CondOp::IsNull => value.map_or(true, |v| v.is_null()),
            CondOp::IsNotNull => value.is_some_and(|v| !v.is_null()),
            _ => {
                let value = match value {
                    Some(v) if !v.is_null() => v,
                    _ => return false,
                };
                match self.op {
                    CondOp::Eq => value == &self.operands[0],
                    CondOp::Ne => value != &self.operands[0],
                    CondOp::Lt => value < &self.operands[0],
                    CondOp::Le => value <= &self.operands[0],
                    CondOp::Gt => value > &self.operands[0],
                    CondOp::Ge => value >= &self.operands[0],
                    CondOp::In => self.operands.contains(value),
                    CondOp::NotIn => !self.operands.contains(value),
                    CondOp::IsNull | CondOp::IsNotNull => unreachable!(),
                }
            }
        }
    }

    /// Coverage of the condition over a column whose values span
    /// `[min, max]`. Conservative: unknown cases answer `Partial`.
    pub fn eval_range(&self, min: &Value, max: &Value) -> Coverage {
        let single = min == max;
        match self.op {
            CondOp::Eq => {
                let v = &self.operands[0];
                if v < min || v > max {
                    Coverage::None
                } else if single {
                    Coverage::Full
                } else {
                    Coverage::Partial
                }
            }
            CondOp::Ne => {
                let v = &self.operands[0];
                if v < min || v > max {
                    Coverage::Full
                } else if single {
                    Coverage::None
                } else {
                    Coverage::Partial
                }
            }
            CondOp::Lt => {
                let v = &self.operands[0];
                if max < v {
                    Coverage::Full
                } else if min >= v {
                    Coverage::None
                } else {
                    Coverage::Partial
                }
            }
            CondOp::Le => {
                let v = &self.operands[0];
                if max <= v {
                    Coverage::Full
                } else if min > v {
                    Coverage::None
                } else {
                    Coverage::Partial
                }
            }
            CondOp::Gt => {
                let v = &self.operands[0];
                if min > v {
                    Coverage::Full
                } else if max <= v {
                    Coverage::None
                } else {
                    Coverage::Partial
                }
            }
            CondOp::Ge => {
                let v = &self.operands[0];
                if min >= v {
                    Coverage::Full
                } else if max < v {
                    Coverage::None
                } else {
                    Coverage::Partial
                }
            }
            CondOp::In => {
                if single {
                    if self.operands.contains(min) {
                        Coverage::Full
                    } else {
                        Coverage::None
                    }
                } else if self.operands.iter().any(|v| v >= min && v <= max) {
                    Coverage::Partial
                } else {
                    Coverage::None
                }
            }
            CondOp::NotIn => {
                if single {
                    if self.operands.contains(min) {
                        Coverage::None
                    } else {
                        Coverage::Full
                    }
                } else if self.operands.iter().any(|v| v >= min && v <= max) {
                    Coverage::Partial
                } else {
                    Coverage::Full
                }
            }
            // zone maps carry no null counts
            CondOp::IsNull | CondOp::IsNotNull => Coverage::Partial,
        }
    }
}

/// All typed conditions against one column.
#[derive(Debug, Clone)]
pub struct CondColumn {
    column: u32,
    conds: Vec<Cond>,
}

impl CondColumn {
    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn conds(&self) -> &[Cond] {
        &self.conds
    }

    /// Conjunction over this column's conditions for one cell.
    pub fn eval_value(&self, value: Option<&Value>) -> bool {
        self.conds.iter().all(|c| c.eval_value(value))
    }

    /// Combined coverage of this column's conditions over `[min, max]`:
    /// any `None` wins, then any `Partial`, else `Full`.
    pub fn eval_range(&self, min: &Value, max: &Value) -> Coverage {
        let mut combined = Coverage::Full;
        for cond in &self.conds {
            match cond.eval_range(min, max) {
                Coverage::None => return Coverage::None,
                Coverage::Partial => combined = Coverage::Partial,
                Coverage::Full => {}
            }
        }
        combined
    }
}

/// A set of typed conditions keyed by column id. The whole set is a
/// conjunction, which is exactly the shape of one delete predicate and of
/// the pushed query filter.
#[derive(Debug, Clone)]
pub struct Conditions {
    schema: Arc<TabletSchema>,
    columns: BTreeMap<u32, CondColumn>,
}

impl Conditions {
    pub fn new(schema: Arc<TabletSchema>) -> Self {
        Self {
            schema,
            columns: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<TabletSchema> {
        &self.schema
    }

    /// Parse one raw condition and add it to the set.
    pub fn append_condition(&mut self, condition: &Condition) -> Result<()> {
        let column = self
            .schema
            .field_index(&condition.column_name)
            .ok_or_else(|| BasaltError::ColumnNotFound(condition.column_name.clone()))?;
        let field = &self.schema.fields()[column];

        let op = if condition.op == "is" {
            match condition.values.first().map(|s| s.as_str()) {
                Some("null") => CondOp::IsNull,
                Some(_) => CondOp::IsNotNull,
                None => {
                    return Err(BasaltError::InvalidParameter(format!(
                        "`is` condition on {} has no value",
                        condition.column_name
                    )))
                }
            }
        } else {
            parse_op(&condition.op, condition.values.len()).ok_or_else(|| {
                BasaltError::InvalidParameter(format!("unknown condition op: {}", condition.op))
            })?
        };

        let operands = match op {
            CondOp::IsNull | CondOp::IsNotNull => Vec::new(),
            _ => {
                if condition.values.is_empty() {
                    return Err(BasaltError::InvalidParameter(format!(
                        "condition on {} has no values",
                        condition.column_name
                    )));
                }
                condition
                    .values
                    .iter()
                    .map(|v| data::parse_value(field, v))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        self.columns
            .entry(column as u32)
            .or_insert_with(|| CondColumn {
                column: column as u32,
                conds: Vec::new(),
            })
            .conds
            .push(Cond { op, operands });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &BTreeMap<u32, CondColumn> {
        &self.columns
    }

    /// Whether a row satisfies every condition in the set. A column the
    /// row does not carry cannot match.
    pub fn matches_row(&self, row: &crate::data::RowCursor) -> bool {
        self.columns
            .values()
            .all(|col| col.eval_value(row.get(col.column)))
    }
}

fn parse_op(op: &str, value_count: usize) -> Option<CondOp> {
    match op {
        "*=" if value_count > 1 => Some(CondOp::In),
        "*=" => Some(CondOp::Eq),
        "!*=" if value_count > 1 => Some(CondOp::NotIn),
        "!*=" => Some(CondOp::Ne),
        "<<" => Some(CondOp::Lt),
        "<=" => Some(CondOp::Le),
        ">>" => Some(CondOp::Gt),
        ">=" => Some(CondOp::Ge),
        _ => None,
    }
}
