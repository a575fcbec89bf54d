//! nom grammar for the supported SQL subset.
//!
//! - `base`: error type, keywords, identifiers, literals
//! - `expressions`: operator precedence and primaries
//! - `functions`: calls, windows, CASE / CAST / EXTRACT
//! - `joins`: FROM lists and joins
//! - `query`: statements, CTEs, set operations, SELECT

pub mod base;
pub mod expressions;
pub mod functions;
pub mod joins;
pub mod query;

pub use base::{PResult, SqlError, blank_comments};
pub use query::statement;
