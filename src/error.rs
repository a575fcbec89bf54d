//! Error types for qgate.
//!
//! Each analysis stage has its own error enum. [`AnalysisError`] ties a stage
//! failure to the query it came from so batch callers can report per query.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or unsupported SQL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parse error at line {line}, column {column}: expected {expected}, found {found}")]
pub struct ParseError {
    /// Byte offset into the original query text.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
    /// Description of what the parser was looking for.
    pub expected: String,
    /// Short excerpt of the input at the failure point.
    pub found: String,
}

impl ParseError {
    /// Create a parse error at `offset` within `source`.
    pub fn at(source: &str, offset: usize, expected: impl Into<String>) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rsplit('\n')
            .next()
            .map(|l| l.chars().count())
            .unwrap_or(0)
            + 1;
        let rest = source[offset..].trim_start();
        let found = if rest.is_empty() {
            "end of input".to_string()
        } else {
            let excerpt: String = rest.chars().take(24).collect();
            format!("'{}'", excerpt)
        };

        Self {
            offset,
            line,
            column,
            expected: expected.into(),
            found,
        }
    }
}

/// The query parsed but its blocks do not form a valid dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A block references a CTE that is defined after it.
    #[error("Forward reference: '{from}' references '{to}', which is defined later")]
    ForwardReference { from: String, to: String },

    /// A CTE references itself.
    #[error("Cyclic reference: '{node}' references itself")]
    Cycle { node: String },

    /// Two CTEs share a name.
    #[error("Duplicate CTE name: '{name}'")]
    DuplicateCte { name: String },

    /// A CTE takes the label reserved for the terminal node.
    #[error("CTE name '{name}' is reserved for the final SELECT")]
    ReservedName { name: String },

    /// A downstream block reads a column its upstream block does not produce.
    #[error("Column '{column}' read by '{consumer}' is not produced by '{producer}'")]
    MissingColumn {
        consumer: String,
        producer: String,
        column: String,
    },

    /// A column cannot be attributed to any relation in scope.
    #[error("Column '{column}' in '{node}' does not resolve to any relation in scope")]
    UnresolvedColumn { node: String, column: String },

    /// A qualifier names no relation in scope.
    #[error("Unknown relation '{qualifier}' referenced in '{node}'")]
    UnknownRelation { node: String, qualifier: String },

    /// A CTE column alias list does not match its projection width.
    #[error("CTE '{node}' declares {declared} column(s) but its query produces {produced}")]
    ColumnCountMismatch {
        node: String,
        declared: usize,
        produced: usize,
    },

    /// A block declares no output columns.
    #[error("Block '{node}' declares no output columns")]
    EmptyOutput { node: String },
}

/// A gate or transform catalog is malformed. Raised at load time only.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {origin}: {source}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    /// A closed-set field carries a value outside the set.
    #[error("Catalog entry '{entry}': unknown {field} '{value}'")]
    UnknownValue {
        entry: String,
        field: &'static str,
        value: String,
    },

    #[error("Catalog entry '{entry}' is defined more than once")]
    DuplicateId { entry: String },

    #[error("Gate '{gate}' refers to unknown pathology '{pathology}'")]
    UnknownPathology { gate: String, pathology: String },

    #[error("Catalog entry '{entry}' has an invalid predicate: {reason}")]
    InvalidPredicate { entry: String, reason: String },

    #[error("Catalog for engine '{found}' loaded where '{expected}' was requested")]
    EngineMismatch { expected: String, found: String },
}

/// Gate evaluation was asked for something the catalog does not have.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    #[error("Unknown pathology '{0}'")]
    UnknownPathology(String),
}

/// Configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Failure of one query's analysis. Never aborts a batch.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Query '{query_id}': {source}")]
    Parse {
        query_id: String,
        #[source]
        source: ParseError,
    },

    #[error("Query '{query_id}': {source}")]
    Graph {
        query_id: String,
        #[source]
        source: GraphError,
    },

    #[error("Query '{query_id}': unknown pathology '{pathology}'")]
    UnknownPathology { query_id: String, pathology: String },

    #[error("Query '{query_id}': analysis aborted: {reason}")]
    Aborted { query_id: String, reason: String },
}

impl AnalysisError {
    /// Id of the query this error belongs to.
    pub fn query_id(&self) -> &str {
        match self {
            Self::Parse { query_id, .. }
            | Self::Graph { query_id, .. }
            | Self::UnknownPathology { query_id, .. }
            | Self::Aborted { query_id, .. } => query_id,
        }
    }

    /// Short stage name used in batch summaries.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Graph { .. } => "graph",
            Self::UnknownPathology { .. } => "gates",
            Self::Aborted { .. } => "aborted",
        }
    }

    pub(crate) fn parse(query_id: impl Into<String>, source: ParseError) -> Self {
        Self::Parse {
            query_id: query_id.into(),
            source,
        }
    }

    pub(crate) fn graph(query_id: impl Into<String>, source: GraphError) -> Self {
        Self::Graph {
            query_id: query_id.into(),
            source,
        }
    }

    pub(crate) fn gates(query_id: impl Into<String>, source: GateError) -> Self {
        match source {
            GateError::UnknownPathology(pathology) => Self::UnknownPathology {
                query_id: query_id.into(),
                pathology,
            },
        }
    }
}

/// Result type alias for parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type alias for graph construction.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for catalog loading.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_position() {
        let sql = "SELECT a\nFROM t\nWHERE ???";
        let offset = sql.find("???").unwrap();
        let err = ParseError::at(sql, offset, "expression");
        assert_eq!(err.line, 3);
        assert_eq!(err.column, 7);
        assert_eq!(
            err.to_string(),
            "Parse error at line 3, column 7: expected expression, found '???'"
        );
    }

    #[test]
    fn test_parse_error_at_end() {
        let err = ParseError::at("SELECT", 6, "select item");
        assert_eq!(err.found, "end of input");
        assert_eq!(err.column, 7);
    }

    #[test]
    fn test_analysis_error_carries_query_id() {
        let err = AnalysisError::graph(
            "q17",
            GraphError::Cycle {
                node: "totals".into(),
            },
        );
        assert_eq!(err.query_id(), "q17");
        assert_eq!(err.stage(), "graph");
        assert_eq!(
            err.to_string(),
            "Query 'q17': Cyclic reference: 'totals' references itself"
        );
    }
}
