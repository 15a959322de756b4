//! Tablet schema model: field types, aggregation methods, key layout

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Double,
    Decimal,
    /// Fixed-width character, right-padded to the declared length.
    Char,
    Varchar,
    /// Packed calendar date (`year * 512 + month * 32 + day`).
    Date,
    /// Packed timestamp (`YYYYMMDDHHMMSS` as a number).
    DateTime,
    /// HyperLogLog sketch column; never a key, never filterable.
    Hll,
}

/// How a value column folds when rows share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationMethod {
    None,
    Sum,
    Min,
    Max,
    /// Last write wins (the fold direction is oldest-to-newest).
    Replace,
    HllUnion,
}

/// Key model of a tablet, deciding the merge policy on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeysType {
    DupKeys,
    UniqueKeys,
    AggKeys,
}

/// One column of the tablet schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
    /// Declared width for `Char`; unused otherwise.
    pub length: usize,
    pub is_key: bool,
    /// Whether segments carry a bloom filter for this column.
    pub is_bf_column: bool,
    pub aggregation: AggregationMethod,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: 0,
            is_key: false,
            is_bf_column: false,
            aggregation: AggregationMethod::None,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn bloom_filtered(mut self) -> Self {
        self.is_bf_column = true;
        self
    }

    pub fn aggregation(mut self, method: AggregationMethod) -> Self {
        self.aggregation = method;
        self
    }
}

/// A version range `[lo, hi]` carried by a segment, or the pinned read
/// version of a scan (only `hi` matters there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub lo: i64,
    pub hi: i64,
}

impl Version {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }
}

/// Ordered column list of a tablet. Key columns form an unbroken prefix;
/// the leading `num_short_key_fields` of them make up the short key.
#[derive(Debug)]
pub struct TabletSchema {
    fields: Vec<FieldInfo>,
    num_short_key_fields: usize,
    name_index: AHashMap<String, usize>,
}

impl TabletSchema {
    pub fn new(fields: Vec<FieldInfo>, num_short_key_fields: usize) -> Arc<Self> {
        let name_index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Arc::new(Self {
            fields,
            num_short_key_fields,
            name_index,
        })
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldInfo> {
        self.fields.get(index)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Number of key columns (the schema prefix with `is_key`).
    pub fn num_key_fields(&self) -> usize {
        self.fields.iter().take_while(|f| f.is_key).count()
    }

    pub fn num_short_key_fields(&self) -> usize {
        self.num_short_key_fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn field_type(&self, index: usize) -> Option<FieldType> {
        self.fields.get(index).map(|f| f.field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Arc<TabletSchema> {
        TabletSchema::new(
            vec![
                FieldInfo::new("k0", FieldType::Int64).key(),
                FieldInfo::new("k1", FieldType::Varchar).key().bloom_filtered(),
                FieldInfo::new("v0", FieldType::Int64).aggregation(AggregationMethod::Sum),
            ],
            1,
        )
    }

    #[test]
    fn test_key_prefix() {
        let schema = sample_schema();
        assert_eq!(schema.num_fields(), 3);
        assert_eq!(schema.num_key_fields(), 2);
        assert_eq!(schema.num_short_key_fields(), 1);
    }

    #[test]
    fn test_name_lookup() {
        let schema = sample_schema();
        assert_eq!(schema.field_index("k1"), Some(1));
        assert_eq!(schema.field_index("missing"), None);
        assert_eq!(schema.field_type(1), Some(FieldType::Varchar));
    }
}
