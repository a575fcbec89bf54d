//! Query graph: one node per query block.
//!
//! A node is a CTE, an expression subquery (scalar, EXISTS or IN) or the
//! final statement (`main`). Edges run from a block to the blocks it reads,
//! and always point to an earlier node: children are created before the
//! block that contains them, CTEs in definition order, `main` last.
//!
//! Derived tables in FROM are not nodes; they are inlined into the block
//! whose FROM clause holds them.

mod builder;
pub mod columns;
pub mod cost;
pub mod features;
pub(crate) mod scope;

pub use cost::{Cost, CostSource};
pub use features::{JoinCounts, OrGroup, RelationRef, StructuralFlags};

use crate::ast::{Query, Statement, SubqueryForm};
use crate::error::{GraphError, GraphResult};
use crate::plan::PlanFeatures;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Index of a node in its graph. Equal to the node's definition position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Clause an expression subquery appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    Projection,
    Join,
    Where,
    GroupBy,
    Having,
    Qualify,
    OrderBy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Cte {
        column_aliases: Vec<String>,
        materialized: Option<bool>,
    },
    Subquery {
        form: SubqueryForm,
        clause: Clause,
    },
    Main,
}

/// A column of an enclosing block read by a subquery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Correlation {
    /// Label of the enclosing node.
    pub outer: String,
    pub qualifier: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct QueryNode {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    pub position: usize,
    pub query: Query,
    pub flags: StructuralFlags,
    pub cost: Cost,
    pub row_estimate: Option<u64>,
    pub output_columns: Vec<String>,
    pub dependencies: Vec<NodeId>,
    pub base_tables: BTreeSet<String>,
    pub correlation: Vec<Correlation>,
    pub relations: Vec<RelationRef>,
}

impl QueryNode {
    pub fn is_cte(&self) -> bool {
        matches!(self.kind, NodeKind::Cte { .. })
    }

    pub fn is_subquery(&self) -> bool {
        matches!(self.kind, NodeKind::Subquery { .. })
    }

    pub fn is_main(&self) -> bool {
        matches!(self.kind, NodeKind::Main)
    }

    pub fn is_correlated(&self) -> bool {
        !self.correlation.is_empty()
    }

    /// CTE referenced by two or more FROM/JOIN clauses.
    pub fn is_multi_use(&self) -> bool {
        self.is_cte() && self.flags.cte_reference_count >= 2
    }
}

/// Graph-wide counters shared by gate predicates and the transform diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphMetric {
    NodeCount,
    CteCount,
    SubqueryCount,
    CorrelatedSubqueryCount,
    UnionCount,
    UnionAllCount,
    SetOpCount,
    ExistsCount,
    NotExistsCount,
    InSubqueryCount,
    ScalarSubqueryCount,
    OrGroupCount,
    JoinCount,
    InnerJoinCount,
    LeftJoinCount,
    RightJoinCount,
    FullJoinCount,
    CrossJoinCount,
    CommaJoinCount,
    ExplicitJoinCount,
    WindowCount,
    GroupByCount,
    TableRefCount,
    MaxTableOccurrence,
    SelfJoinCount,
    MultiUseCteCount,
    OrphanedCteCount,
    CteChainDepth,
    LateFilterCount,
}

impl GraphMetric {
    pub const ALL: [GraphMetric; 29] = [
        GraphMetric::NodeCount,
        GraphMetric::CteCount,
        GraphMetric::SubqueryCount,
        GraphMetric::CorrelatedSubqueryCount,
        GraphMetric::UnionCount,
        GraphMetric::UnionAllCount,
        GraphMetric::SetOpCount,
        GraphMetric::ExistsCount,
        GraphMetric::NotExistsCount,
        GraphMetric::InSubqueryCount,
        GraphMetric::ScalarSubqueryCount,
        GraphMetric::OrGroupCount,
        GraphMetric::JoinCount,
        GraphMetric::InnerJoinCount,
        GraphMetric::LeftJoinCount,
        GraphMetric::RightJoinCount,
        GraphMetric::FullJoinCount,
        GraphMetric::CrossJoinCount,
        GraphMetric::CommaJoinCount,
        GraphMetric::ExplicitJoinCount,
        GraphMetric::WindowCount,
        GraphMetric::GroupByCount,
        GraphMetric::TableRefCount,
        GraphMetric::MaxTableOccurrence,
        GraphMetric::SelfJoinCount,
        GraphMetric::MultiUseCteCount,
        GraphMetric::OrphanedCteCount,
        GraphMetric::CteChainDepth,
        GraphMetric::LateFilterCount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GraphMetric::NodeCount => "node_count",
            GraphMetric::CteCount => "cte_count",
            GraphMetric::SubqueryCount => "subquery_count",
            GraphMetric::CorrelatedSubqueryCount => "correlated_subquery_count",
            GraphMetric::UnionCount => "union_count",
            GraphMetric::UnionAllCount => "union_all_count",
            GraphMetric::SetOpCount => "set_op_count",
            GraphMetric::ExistsCount => "exists_count",
            GraphMetric::NotExistsCount => "not_exists_count",
            GraphMetric::InSubqueryCount => "in_subquery_count",
            GraphMetric::ScalarSubqueryCount => "scalar_subquery_count",
            GraphMetric::OrGroupCount => "or_group_count",
            GraphMetric::JoinCount => "join_count",
            GraphMetric::InnerJoinCount => "inner_join_count",
            GraphMetric::LeftJoinCount => "left_join_count",
            GraphMetric::RightJoinCount => "right_join_count",
            GraphMetric::FullJoinCount => "full_join_count",
            GraphMetric::CrossJoinCount => "cross_join_count",
            GraphMetric::CommaJoinCount => "comma_join_count",
            GraphMetric::ExplicitJoinCount => "explicit_join_count",
            GraphMetric::WindowCount => "window_count",
            GraphMetric::GroupByCount => "group_by_count",
            GraphMetric::TableRefCount => "table_ref_count",
            GraphMetric::MaxTableOccurrence => "max_table_occurrence",
            GraphMetric::SelfJoinCount => "self_join_count",
            GraphMetric::MultiUseCteCount => "multi_use_cte_count",
            GraphMetric::OrphanedCteCount => "orphaned_cte_count",
            GraphMetric::CteChainDepth => "cte_chain_depth",
            GraphMetric::LateFilterCount => "late_filter_count",
        }
    }
}

impl fmt::Display for GraphMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serializable view of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    pub position: usize,
    pub flags: StructuralFlags,
    pub cost_weight: f64,
    pub cost_source: CostSource,
    pub row_estimate: Option<u64>,
    pub output_columns: Vec<String>,
    pub dependencies: Vec<String>,
    pub base_tables: Vec<String>,
    pub correlation: Vec<Correlation>,
}

/// Dependency graph of one statement's query blocks. Read-only once built.
#[derive(Debug, Clone)]
pub struct QueryGraph {
    nodes: Vec<QueryNode>,
}

impl QueryGraph {
    /// Build the graph for a parsed statement, annotating costs from `plan`
    /// when given.
    pub fn build(stmt: &Statement, plan: Option<&PlanFeatures>) -> GraphResult<Self> {
        let nodes = builder::build(stmt, plan)?;
        tracing::debug!("Built query graph with {} node(s)", nodes.len());
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[QueryNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&QueryNode> {
        self.nodes.get(id.0)
    }

    pub fn by_label(&self, label: &str) -> Option<&QueryNode> {
        self.nodes.iter().find(|n| n.label == label)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The terminal node. Always present in a built graph.
    pub fn main(&self) -> Option<&QueryNode> {
        self.nodes.last().filter(|n| n.is_main())
    }

    pub fn ctes(&self) -> impl Iterator<Item = &QueryNode> {
        self.nodes.iter().filter(|n| n.is_cte())
    }

    pub fn subqueries(&self) -> impl Iterator<Item = &QueryNode> {
        self.nodes.iter().filter(|n| n.is_subquery())
    }

    /// Nodes that list `id` as a dependency.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Graph-wide occurrence count of every base table.
    pub fn table_occurrences(&self) -> BTreeMap<String, usize> {
        let ctes: BTreeSet<&str> = self.ctes().map(|n| n.label.as_str()).collect();
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            for r in &node.relations {
                if !ctes.contains(r.name.as_str()) {
                    *counts.entry(r.name.clone()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Longest chain of CTEs reading CTEs. Subquery nodes are transparent.
    pub fn cte_chain_depth(&self) -> usize {
        let mut depth = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            let upstream = node
                .dependencies
                .iter()
                .filter_map(|d| depth.get(d.0).copied())
                .max()
                .unwrap_or(0);
            depth[node.id.0] = upstream + usize::from(node.is_cte());
        }
        depth.into_iter().max().unwrap_or(0)
    }

    pub fn metric(&self, metric: GraphMetric) -> usize {
        let sum = |f: fn(&StructuralFlags) -> usize| -> usize {
            self.nodes.iter().map(|n| f(&n.flags)).sum()
        };
        let count = |p: fn(&QueryNode) -> bool| -> usize {
            self.nodes.iter().filter(|n| p(n)).count()
        };
        match metric {
            GraphMetric::NodeCount => self.nodes.len(),
            GraphMetric::CteCount => count(QueryNode::is_cte),
            GraphMetric::SubqueryCount => count(QueryNode::is_subquery),
            GraphMetric::CorrelatedSubqueryCount => {
                count(|n| n.is_subquery() && n.is_correlated())
            }
            GraphMetric::UnionCount => sum(|f| f.union_count),
            GraphMetric::UnionAllCount => sum(|f| f.union_all_count),
            GraphMetric::SetOpCount => sum(|f| f.intersect_count + f.except_count),
            GraphMetric::ExistsCount => sum(|f| f.exists_count),
            GraphMetric::NotExistsCount => sum(|f| f.not_exists_count),
            GraphMetric::InSubqueryCount => sum(|f| f.in_subquery_count),
            GraphMetric::ScalarSubqueryCount => sum(|f| f.scalar_subquery_count),
            GraphMetric::OrGroupCount => sum(|f| f.or_branch_count),
            GraphMetric::JoinCount => sum(|f| f.joins.total()),
            GraphMetric::InnerJoinCount => sum(|f| f.joins.inner),
            GraphMetric::LeftJoinCount => sum(|f| f.joins.left),
            GraphMetric::RightJoinCount => sum(|f| f.joins.right),
            GraphMetric::FullJoinCount => sum(|f| f.joins.full),
            GraphMetric::CrossJoinCount => sum(|f| f.joins.cross),
            GraphMetric::CommaJoinCount => sum(|f| f.joins.comma),
            GraphMetric::ExplicitJoinCount => sum(|f| f.joins.explicit),
            GraphMetric::WindowCount => sum(|f| f.window_count),
            GraphMetric::GroupByCount => count(|n| n.flags.has_group_by),
            GraphMetric::TableRefCount => sum(|f| f.table_refs),
            GraphMetric::MaxTableOccurrence => {
                self.table_occurrences().into_values().max().unwrap_or(0)
            }
            GraphMetric::SelfJoinCount => count(|n| n.flags.self_join),
            GraphMetric::MultiUseCteCount => count(QueryNode::is_multi_use),
            GraphMetric::OrphanedCteCount => {
                count(|n| n.is_cte() && n.flags.cte_reference_count == 0)
            }
            GraphMetric::CteChainDepth => self.cte_chain_depth(),
            GraphMetric::LateFilterCount => sum(|f| f.late_filter_count),
        }
    }

    /// Re-derive a node's declared outputs from its own AST.
    pub fn derive_output_columns(&self, node: &QueryNode) -> GraphResult<Vec<String>> {
        let lookup = |name: &str| {
            self.nodes
                .iter()
                .take(node.id.0)
                .rev()
                .find(|n| n.is_cte() && n.label == name)
                .map(|n| n.output_columns.clone())
        };
        let derived = columns::derive(&node.query, &lookup);
        declared_outputs(&node.label, &node.kind, derived)
    }

    pub fn to_records(&self) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .map(|n| NodeRecord {
                id: n.id,
                label: n.label.clone(),
                kind: n.kind.clone(),
                position: n.position,
                flags: n.flags.clone(),
                cost_weight: n.cost.weight,
                cost_source: n.cost.source,
                row_estimate: n.row_estimate,
                output_columns: n.output_columns.clone(),
                dependencies: n
                    .dependencies
                    .iter()
                    .filter_map(|d| self.node(*d).map(|dep| dep.label.clone()))
                    .collect(),
                base_tables: n.base_tables.iter().cloned().collect(),
                correlation: n.correlation.clone(),
            })
            .collect()
    }
}

/// Apply a CTE's column alias list to its derived outputs.
fn declared_outputs(label: &str, kind: &NodeKind, derived: Vec<String>) -> GraphResult<Vec<String>> {
    let outputs = match kind {
        NodeKind::Cte { column_aliases, .. } if !column_aliases.is_empty() => {
            let open = derived.iter().any(|c| c == "*");
            if !open && column_aliases.len() != derived.len() {
                return Err(GraphError::ColumnCountMismatch {
                    node: label.to_string(),
                    declared: column_aliases.len(),
                    produced: derived.len(),
                });
            }
            column_aliases.clone()
        }
        _ => derived,
    };
    if outputs.is_empty() {
        return Err(GraphError::EmptyOutput {
            node: label.to_string(),
        });
    }
    Ok(outputs)
}
