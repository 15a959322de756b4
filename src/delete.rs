//! Versioned delete predicates
//!
//! A delete predicate is recorded at some version and logically removes
//! every row written at or before that version that satisfies its
//! conjunction of conditions. The handler loads all predicates visible at
//! the read version and answers per-row and per-segment questions.

use crate::data::RowCursor;
use crate::query::condition::Conditions;
use crate::tablet::Tablet;
use crate::Result;
use serde::{Deserialize, Serialize};

/// How far a delete predicate set subsumes one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelStatus {
    /// Every row of the segment is deleted.
    Satisfied,
    /// Some rows may be deleted; filter per row.
    PartialSatisfied,
    /// No delete predicate touches the segment.
    NotSatisfied,
}

/// A raw delete predicate as recorded in tablet metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePredicate {
    pub version: i64,
    pub conditions: Vec<crate::query::condition::Condition>,
}

/// One loaded delete predicate: its version plus the parsed conjunction.
#[derive(Debug, Clone)]
pub struct DeleteCond {
    version: i64,
    conditions: Conditions,
}

impl DeleteCond {
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }
}

/// All delete predicates effective at a read version.
#[derive(Debug, Default)]
pub struct DeleteHandler {
    conds: Vec<DeleteCond>,
}

impl DeleteHandler {
    /// A handler with no predicates (compaction paths that must not
    /// apply deletes).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every delete predicate with effective version at or below
    /// `version_hi`. Holds the tablet header read-lock for the span of
    /// the metadata read.
    pub fn load(tablet: &dyn Tablet, version_hi: i64) -> Result<Self> {
        let _guard = tablet.obtain_header_rdlock();
        let schema = tablet.schema();
        let mut conds = Vec::new();
        for predicate in tablet.delete_predicates() {
            if predicate.version > version_hi {
                continue;
            }
            let mut conditions = Conditions::new(schema.clone());
            for condition in &predicate.conditions {
                conditions.append_condition(condition)?;
            }
            conds.push(DeleteCond {
                version: predicate.version,
                conditions,
            });
        }
        conds.sort_by_key(|c| c.version);
        Ok(Self { conds })
    }

    /// Number of loaded delete predicates.
    pub fn conditions_num(&self) -> usize {
        self.conds.len()
    }

    pub fn delete_conditions(&self) -> &[DeleteCond] {
        &self.conds
    }

    /// Whether a row written at `data_version` is logically deleted.
    /// A predicate covers the row when its effective version is at or
    /// after the data version and its conjunction matches.
    pub fn is_filter_data(&self, data_version: i64, row: &RowCursor) -> bool {
        self.conds
            .iter()
            .any(|dc| data_version <= dc.version && dc.conditions.matches_row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::query::condition::Condition;
    use crate::schema::{FieldInfo, FieldType, KeysType, TabletSchema};
    use crate::tablet::mem::MemTablet;
    use std::sync::Arc;

    fn tablet_with_delete(version: i64) -> Arc<MemTablet> {
        let schema = TabletSchema::new(
            vec![
                FieldInfo::new("k", FieldType::Int64).key(),
                FieldInfo::new("v", FieldType::Int64),
            ],
            1,
        );
        let tablet = MemTablet::new(schema, KeysType::UniqueKeys);
        tablet.add_delete_predicate(DeletePredicate {
            version,
            conditions: vec![Condition::new("k", "*=", vec!["9"])],
        });
        tablet
    }

    fn row(tablet: &MemTablet, k: i64) -> RowCursor {
        let mut row = RowCursor::new(tablet.schema(), &[0, 1]).unwrap();
        row.set(0, Value::Int64(k)).unwrap();
        row.set(1, Value::Int64(0)).unwrap();
        row
    }

    #[test]
    fn test_load_respects_read_version() {
        let tablet = tablet_with_delete(10);
        let handler = DeleteHandler::load(tablet.as_ref(), 5).unwrap();
        assert_eq!(handler.conditions_num(), 0);

        let handler = DeleteHandler::load(tablet.as_ref(), 10).unwrap();
        assert_eq!(handler.conditions_num(), 1);
    }

    #[test]
    fn test_delete_covers_older_data_only() {
        let tablet = tablet_with_delete(7);
        let handler = DeleteHandler::load(tablet.as_ref(), 20).unwrap();

        let doomed = row(&tablet, 9);
        // written before (or at) the delete: filtered
        assert!(handler.is_filter_data(5, &doomed));
        assert!(handler.is_filter_data(7, &doomed));
        // written after the delete: kept
        assert!(!handler.is_filter_data(8, &doomed));
        // different key: kept at any version
        let other = row(&tablet, 1);
        assert!(!handler.is_filter_data(5, &other));
    }
}
