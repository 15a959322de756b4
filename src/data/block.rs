//! A decoded block of projected rows with a read position

use crate::data::RowCursor;
use crate::delete::DelStatus;

/// One batch of rows handed out by a segment. The producing segment stamps
/// the block with its delete-subsumption status so the cursor knows whether
/// per-row delete filtering is still required.
#[derive(Debug)]
pub struct RowBlock {
    rows: Vec<RowCursor>,
    pos: usize,
    status: DelStatus,
}

impl RowBlock {
    pub fn new(rows: Vec<RowCursor>, status: DelStatus) -> Self {
        Self {
            rows,
            pos: 0,
            status,
        }
    }

    pub fn status(&self) -> DelStatus {
        self.status
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.rows.len()
    }

    /// The row at the read position, if any.
    pub fn current(&self) -> Option<&RowCursor> {
        self.rows.get(self.pos)
    }

    pub fn pos_inc(&mut self) {
        self.pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::schema::{FieldInfo, FieldType, TabletSchema};

    #[test]
    fn test_block_position() {
        let schema = TabletSchema::new(vec![FieldInfo::new("k", FieldType::Int64).key()], 1);
        let mut row = RowCursor::new(schema, &[0]).unwrap();
        row.set(0, Value::Int64(1)).unwrap();

        let mut block = RowBlock::new(vec![row.clone(), row], DelStatus::NotSatisfied);
        assert!(block.has_remaining());
        assert_eq!(block.num_rows(), 2);
        block.pos_inc();
        assert!(block.has_remaining());
        block.pos_inc();
        assert!(!block.has_remaining());
        assert!(block.current().is_none());
    }
}
