//! Abstract syntax tree for the supported SQL subset.
//!
//! The tree keeps exactly the structure the graph builder and feature
//! extractor need: query blocks, set operations, normalized joins, filter
//! expressions, grouping, windows and subqueries.

pub mod expr;
pub mod query;

pub use expr::*;
pub use query::*;
