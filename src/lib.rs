//! # qgate
//!
//! > **Know what a rewrite will fix before you write it.**
//!
//! qgate reads a SQL query, builds a dependency graph of its blocks (CTEs,
//! expression subqueries and the final statement), extracts structural
//! features per block, and checks which known performance pathologies are
//! admissible for that query on a given engine. Given a query and its
//! rewrite, it also names the rewrite technique from the structural diff.
//!
//! ## Quick Example
//!
//! ```rust
//! use qgate::prelude::*;
//!
//! let stmt = qgate::parse("SELECT k FROM t WHERE a = 1 OR b = 2").unwrap();
//! let graph = QueryGraph::build(&stmt, None).unwrap();
//! let catalog = Catalog::builtin(Engine::DuckDb).unwrap();
//!
//! let verdicts = evaluate(&graph, None, &catalog, &Target::All).unwrap();
//! let or_split = verdicts.iter().find(|v| v.pathology_id == "or_to_union").unwrap();
//! assert!(or_split.admissible);
//! ```
//!
//! ## Pipeline
//!
//! | Stage        | Module        | Output                      |
//! |--------------|---------------|-----------------------------|
//! | Parse        | [`parser`]    | [`ast::Statement`]          |
//! | Graph        | [`graph`]     | [`graph::QueryGraph`]       |
//! | Gates        | [`gates`]     | [`gates::PathologyVerdict`] |
//! | Classify     | [`transform`] | [`transform::Classification`] |

pub mod analyzer;
pub mod ast;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gates;
pub mod graph;
pub mod parser;
pub mod plan;
pub mod transform;

pub mod prelude {
    pub use crate::analyzer::{Analyzer, BatchReport, QueryAnalysis, QueryRequest};
    pub use crate::ast::*;
    pub use crate::catalog::{Catalog, Engine};
    pub use crate::config::Config;
    pub use crate::error::*;
    pub use crate::gates::{GateVerdict, PathologyVerdict, Target, evaluate};
    pub use crate::graph::{GraphMetric, NodeId, QueryGraph, QueryNode};
    pub use crate::parser::parse;
    pub use crate::plan::{NodeStats, PlanFeatures, SignalValue};
    pub use crate::transform::{Classification, Confidence, TransformLabel, classify};
}

/// Parse a SQL statement into its AST.
///
/// # Example
///
/// ```
/// use qgate::parse;
///
/// let stmt = parse("WITH a AS (SELECT 1 AS x) SELECT x FROM a").unwrap();
/// assert_eq!(stmt.ctes[0].name, "a");
/// ```
pub fn parse(sql: &str) -> Result<ast::Statement, error::ParseError> {
    parser::parse(sql)
}
