//! Structural diff between a query and its rewrite.

use crate::graph::{GraphMetric, QueryGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Before/after values of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub before: usize,
    pub after: usize,
}

impl Delta {
    pub fn change(&self) -> i64 {
        self.after as i64 - self.before as i64
    }
}

/// A CTE of the original query whose base tables are now read by two or
/// more new CTEs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CteSplit {
    pub original: String,
    pub parts: Vec<String>,
    /// The original CTE is still defined in the rewrite.
    pub retained: bool,
    /// References to the original CTE left in the rewrite.
    pub remaining_references: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDiff {
    pub metrics: BTreeMap<GraphMetric, Delta>,
    /// Graph-wide occurrences per base table.
    pub tables: BTreeMap<String, Delta>,
    pub self_join_before: bool,
    pub self_join_after: bool,
    pub splits: Vec<CteSplit>,
}

impl GraphDiff {
    pub fn between(before: &QueryGraph, after: &QueryGraph) -> Self {
        let metrics = GraphMetric::ALL
            .iter()
            .map(|m| {
                (
                    *m,
                    Delta {
                        before: before.metric(*m),
                        after: after.metric(*m),
                    },
                )
            })
            .collect();

        let old = before.table_occurrences();
        let new = after.table_occurrences();
        let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        let tables = names
            .into_iter()
            .map(|t| {
                let delta = Delta {
                    before: old.get(t).copied().unwrap_or(0),
                    after: new.get(t).copied().unwrap_or(0),
                };
                (t.clone(), delta)
            })
            .collect();

        Self {
            metrics,
            tables,
            self_join_before: before.nodes().iter().any(|n| n.flags.self_join),
            self_join_after: after.nodes().iter().any(|n| n.flags.self_join),
            splits: splits(before, after),
        }
    }

    pub fn metric(&self, metric: GraphMetric) -> Delta {
        self.metrics.get(&metric).copied().unwrap_or(Delta {
            before: 0,
            after: 0,
        })
    }

    /// Nothing structural changed.
    pub fn is_identity(&self) -> bool {
        self.metrics.values().all(|d| d.before == d.after)
            && self.tables.values().all(|d| d.before == d.after)
            && self.self_join_before == self.self_join_after
            && self.splits.is_empty()
    }

    /// Lines like `cte_count: 1 -> 3`, for display.
    pub fn changes(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .metrics
            .iter()
            .filter(|(_, d)| d.before != d.after)
            .map(|(m, d)| format!("{}: {} -> {}", m, d.before, d.after))
            .collect();
        out.extend(
            self.tables
                .iter()
                .filter(|(_, d)| d.before != d.after)
                .map(|(t, d)| format!("table {}: {} -> {}", t, d.before, d.after)),
        );
        if self.self_join_before != self.self_join_after {
            out.push(format!(
                "self_join: {} -> {}",
                self.self_join_before, self.self_join_after
            ));
        }
        for split in &self.splits {
            out.push(format!(
                "cte {} split into {}",
                split.original,
                split.parts.join(", ")
            ));
        }
        out
    }
}

fn splits(before: &QueryGraph, after: &QueryGraph) -> Vec<CteSplit> {
    let old_ctes: BTreeSet<&str> = before.ctes().map(|n| n.label.as_str()).collect();
    let new_ctes: Vec<_> = after
        .ctes()
        .filter(|n| !old_ctes.contains(n.label.as_str()) && !n.base_tables.is_empty())
        .collect();

    before
        .ctes()
        .filter(|n| !n.base_tables.is_empty())
        .filter_map(|original| {
            let parts: Vec<String> = new_ctes
                .iter()
                .filter(|n| n.base_tables.is_subset(&original.base_tables))
                .map(|n| n.label.clone())
                .collect();
            if parts.len() < 2 {
                return None;
            }
            let kept = after.by_label(&original.label).filter(|n| n.is_cte());
            Some(CteSplit {
                original: original.label.clone(),
                parts,
                retained: kept.is_some(),
                remaining_references: kept.map_or(0, |n| n.flags.cte_reference_count),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn graph(sql: &str) -> QueryGraph {
        QueryGraph::build(&parse(sql).unwrap(), None).unwrap()
    }

    #[test]
    fn test_identity() {
        let a = graph("SELECT k FROM t WHERE a = 1 OR b = 2");
        let b = graph("select k  from t where a = 1 or b = 2");
        let diff = GraphDiff::between(&a, &b);
        assert!(diff.is_identity());
        assert!(diff.changes().is_empty());
    }

    #[test]
    fn test_or_to_union_deltas() {
        let before = graph("SELECT k FROM t WHERE a = 1 OR b = 2");
        let after = graph("SELECT k FROM t WHERE a = 1 UNION ALL SELECT k FROM t WHERE b = 2");
        let diff = GraphDiff::between(&before, &after);
        assert_eq!(diff.metric(GraphMetric::OrGroupCount).change(), -2);
        assert_eq!(diff.metric(GraphMetric::UnionAllCount).change(), 1);
        assert_eq!(diff.tables["t"], Delta { before: 1, after: 2 });
        assert!(!diff.self_join_before);
        assert!(diff.self_join_after);
    }

    #[test]
    fn test_split_detection() {
        let before = graph(
            "WITH both_years AS (SELECT d_date_sk, d_year FROM date_dim WHERE d_year IN (1999, 2000))
             SELECT b.d_date_sk FROM both_years b",
        );
        let after = graph(
            "WITH both_years AS (SELECT d_date_sk, d_year FROM date_dim WHERE d_year IN (1999, 2000)),
                  y1999 AS (SELECT d_date_sk FROM date_dim WHERE d_year = 1999),
                  y2000 AS (SELECT d_date_sk FROM date_dim WHERE d_year = 2000)
             SELECT b.d_date_sk FROM both_years b, y1999, y2000",
        );
        let diff = GraphDiff::between(&before, &after);
        assert_eq!(
            diff.splits,
            vec![CteSplit {
                original: "both_years".into(),
                parts: vec!["y1999".into(), "y2000".into()],
                retained: true,
                remaining_references: 1,
            }]
        );
    }
}
