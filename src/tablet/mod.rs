//! The tablet collaborator surface

pub mod mem;

use crate::delete::DeletePredicate;
use crate::schema::{FieldType, KeysType, TabletSchema, Version};
use crate::segment::Segment;
use parking_lot::RwLockReadGuard;
use std::sync::Arc;

/// A horizontal partition of a table: schema, key model, version set, and
/// delete predicate registry. Metadata reads happen under the header lock;
/// acquired segments stay valid until released regardless of later
/// metadata changes.
pub trait Tablet: Send + Sync {
    fn keys_type(&self) -> KeysType;

    fn schema(&self) -> Arc<TabletSchema>;

    fn num_short_key_fields(&self) -> usize;

    fn field_index(&self, name: &str) -> Option<usize>;

    fn field_type_by_index(&self, index: usize) -> Option<FieldType>;

    /// RAII read guard over the tablet header. Held only for the brief
    /// span of metadata access, never across row production.
    fn obtain_header_rdlock(&self) -> RwLockReadGuard<'_, ()>;

    /// Per-reader segment handles covering `[0, version.hi]`. Empty when
    /// the requested version does not exist. Caller must already hold the
    /// header read lock.
    fn acquire_data_sources(&self, version: Version) -> Vec<Arc<dyn Segment>>;

    /// Return previously acquired handles.
    fn release_data_sources(&self, sources: Vec<Arc<dyn Segment>>);

    /// All recorded delete predicates, unversion-filtered. Caller must
    /// already hold the header read lock.
    fn delete_predicates(&self) -> Vec<DeletePredicate>;
}
