//! Query-side inputs to the read path: conditions and pushdown predicates

pub mod condition;
pub mod predicate;
