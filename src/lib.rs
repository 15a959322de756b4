//! Basalt Tablet Read Core
//!
//! The per-tablet read path of a columnar analytical table engine: a Reader
//! that merges one or more versioned column-data segments, applies predicate
//! and delete pushdown, seeks key ranges, and emits a stream of logical rows
//! under duplicate / unique / aggregate key semantics.
//!
//! The scan-operator layer that builds [`reader::ReaderParams`] and consumes
//! rows lives outside this crate, as do the on-disk segment format and the
//! tablet metadata service; both are reached through the [`tablet::Tablet`]
//! and [`segment::Segment`] traits.

pub mod config;
pub mod data;
pub mod delete;
pub mod query;
pub mod reader;
pub mod schema;
pub mod segment;
pub mod stats;
pub mod tablet;

// Re-export main types
pub use config::{EngineConfig, ReaderConfig};
pub use data::{Decimal, Value};
pub use delete::{DelStatus, DeleteHandler, DeletePredicate};
pub use query::condition::{Condition, Conditions};
pub use query::predicate::ColumnPredicate;
pub use reader::{KeyTuple, Reader, ReaderParams, ReaderType};
pub use schema::{AggregationMethod, FieldInfo, FieldType, KeysType, TabletSchema, Version};
pub use segment::Segment;
pub use stats::{ReadStats, StatsSnapshot};
pub use tablet::Tablet;

/// Read-core error type
#[derive(Debug, thiserror::Error)]
pub enum BasaltError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("version not found: [{0}-{1}]")]
    VersionNotFound(i64, i64),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid scan range: {0}")]
    InvalidScanRange(String),

    #[error("invalid value for column {column}: {value}")]
    InvalidValue { column: String, value: String },
}

pub type Result<T> = std::result::Result<T, BasaltError>;
