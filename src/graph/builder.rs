use super::scope::{Binding, Frame, Resolution, resolve};
use super::{Clause, NodeId, NodeKind, QueryNode, columns, cost, declared_outputs, features};
use crate::ast::*;
use crate::error::{GraphError, GraphResult};
use crate::plan::PlanFeatures;
use std::collections::{BTreeMap, BTreeSet};

/// A column one node reads from an upstream CTE node.
struct ColumnRead {
    consumer: String,
    producer: NodeId,
    column: String,
}

/// Per-node state while its block is being walked.
struct Block {
    label: String,
    /// CTE whose definition this block belongs to.
    root: Option<String>,
    dependencies: Vec<NodeId>,
    base_tables: BTreeSet<String>,
    correlation: Vec<super::Correlation>,
    subqueries: usize,
    late_filters: usize,
}

impl Block {
    fn new(label: String, root: Option<String>) -> Self {
        Self {
            label,
            root,
            dependencies: Vec::new(),
            base_tables: BTreeSet::new(),
            correlation: Vec::new(),
            subqueries: 0,
            late_filters: 0,
        }
    }

    fn depend_on(&mut self, id: NodeId) {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
    }
}

struct Builder {
    nodes: Vec<QueryNode>,
    /// CTEs built so far.
    ctes: BTreeMap<String, NodeId>,
    /// Every CTE name in the statement.
    cte_names: BTreeSet<String>,
    reads: Vec<ColumnRead>,
}

/// Label of the terminal node.
const MAIN_LABEL: &str = "main";

pub(super) fn build(stmt: &Statement, plan: Option<&PlanFeatures>) -> GraphResult<Vec<QueryNode>> {
    let mut cte_names = BTreeSet::new();
    for cte in &stmt.ctes {
        if cte.name == MAIN_LABEL {
            return Err(GraphError::ReservedName {
                name: cte.name.clone(),
            });
        }
        if !cte_names.insert(cte.name.clone()) {
            return Err(GraphError::DuplicateCte {
                name: cte.name.clone(),
            });
        }
    }

    let mut builder = Builder {
        nodes: Vec::new(),
        ctes: BTreeMap::new(),
        cte_names,
        reads: Vec::new(),
    };

    for cte in &stmt.ctes {
        let kind = NodeKind::Cte {
            column_aliases: cte.columns.clone(),
            materialized: cte.materialized,
        };
        let id = builder.node(cte.name.clone(), kind, Some(cte.name.clone()), &cte.query, &[])?;
        builder.ctes.insert(cte.name.clone(), id);
    }
    builder.node(MAIN_LABEL.to_string(), NodeKind::Main, None, &stmt.query, &[])?;
    builder.check_reads()?;

    let mut nodes = builder.nodes;
    features::link(&mut nodes);
    cost::annotate(&mut nodes, plan);
    Ok(nodes)
}

impl Builder {
    fn cte_outputs(&self, name: &str) -> Option<Vec<String>> {
        self.ctes
            .get(name)
            .and_then(|id| self.nodes.get(id.0))
            .map(|n| n.output_columns.clone())
    }

    /// Build one node. Subquery children are pushed first.
    fn node(
        &mut self,
        label: String,
        kind: NodeKind,
        root: Option<String>,
        query: &Query,
        outer: &[Frame],
    ) -> GraphResult<NodeId> {
        let mut block = Block::new(label, root);
        self.query(&mut block, query, outer)?;

        let local = features::extract(query);
        let derived = columns::derive(query, &|name| self.cte_outputs(name));
        let output_columns = declared_outputs(&block.label, &kind, derived)?;

        let mut flags = local.flags;
        flags.late_filter_count = block.late_filters;

        let id = NodeId(self.nodes.len());
        self.nodes.push(QueryNode {
            id,
            label: block.label,
            kind,
            position: id.0,
            query: query.clone(),
            flags,
            cost: Default::default(),
            row_estimate: None,
            output_columns,
            dependencies: block.dependencies,
            base_tables: block.base_tables,
            correlation: block.correlation,
            relations: local.relations,
        });
        Ok(id)
    }

    /// Walk a query and return the frame of its left-most SELECT.
    fn query(&mut self, block: &mut Block, query: &Query, outer: &[Frame]) -> GraphResult<Frame> {
        let frame = self.set_expr(block, &query.body, outer)?;
        // ORDER BY over a set operation names output columns, which are not
        // tracked per branch.
        let lenient = !matches!(query.body, SetExpr::Select(_));
        for o in &query.order_by {
            self.expr(block, &o.expr, &frame, outer, Clause::OrderBy, lenient)?;
        }
        Ok(frame)
    }

    fn set_expr(&mut self, block: &mut Block, body: &SetExpr, outer: &[Frame]) -> GraphResult<Frame> {
        match body {
            SetExpr::Select(select) => self.select(block, select, outer),
            SetExpr::SetOp { left, right, .. } => {
                let frame = self.set_expr(block, left, outer)?;
                self.set_expr(block, right, outer)?;
                Ok(frame)
            }
            SetExpr::Nested(q) => self.query(block, q, outer),
        }
    }

    fn select(&mut self, block: &mut Block, select: &Select, outer: &[Frame]) -> GraphResult<Frame> {
        let mut frame = Frame::new(block.label.clone());
        frame.aliases = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::Expr {
                    alias: Some(alias), ..
                } => Some(alias.clone()),
                _ => None,
            })
            .collect();

        if let Some(from) = &select.from {
            for relation in from.relations() {
                let binding = match relation {
                    TableFactor::Table { name, .. } => self.table_binding(block, name)?,
                    TableFactor::Derived { subquery, alias, .. } => {
                        // Not LATERAL: sibling relations are not visible.
                        self.query(block, subquery, outer)?;
                        Binding::Derived {
                            alias: alias.clone(),
                            outputs: columns::relation_outputs(relation, &|name| {
                                self.cte_outputs(name)
                            }),
                        }
                    }
                };
                frame.bind(relation.binding_name().map(str::to_string), binding);
            }
        }

        for item in &select.projection {
            match item {
                SelectItem::Expr { expr, .. } => {
                    self.expr(block, expr, &frame, outer, Clause::Projection, false)?
                }
                SelectItem::Wildcard { qualifier: Some(q) } => {
                    if frame.find(q).is_none() {
                        return Err(GraphError::UnknownRelation {
                            node: block.label.clone(),
                            qualifier: q.clone(),
                        });
                    }
                }
                SelectItem::Wildcard { qualifier: None } => {}
            }
        }

        if let Some(from) = &select.from {
            for join in &from.joins {
                if let JoinConstraint::On(on) = &join.constraint {
                    self.expr(block, on, &frame, outer, Clause::Join, false)?;
                }
            }
        }

        if let Some(selection) = &select.selection {
            self.expr(block, selection, &frame, outer, Clause::Where, false)?;
            block.late_filters += selection
                .conjuncts()
                .into_iter()
                .filter(|c| reads_cte(c, &frame, outer))
                .count();
        }
        for e in &select.group_by {
            self.expr(block, e, &frame, outer, Clause::GroupBy, false)?;
        }
        if let Some(having) = &select.having {
            self.expr(block, having, &frame, outer, Clause::Having, false)?;
        }
        if let Some(qualify) = &select.qualify {
            self.expr(block, qualify, &frame, outer, Clause::Qualify, false)?;
        }

        Ok(frame)
    }

    fn table_binding(&mut self, block: &mut Block, table: &str) -> GraphResult<Binding> {
        if block.root.as_deref() == Some(table) {
            return Err(GraphError::Cycle {
                node: table.to_string(),
            });
        }
        if let Some(&id) = self.ctes.get(table) {
            block.depend_on(id);
            return Ok(Binding::Cte {
                id,
                name: table.to_string(),
                outputs: self.cte_outputs(table).unwrap_or_default(),
            });
        }
        if self.cte_names.contains(table) {
            return Err(GraphError::ForwardReference {
                from: block.label.clone(),
                to: table.to_string(),
            });
        }
        block.base_tables.insert(table.to_string());
        Ok(Binding::Base {
            table: table.to_string(),
        })
    }

    fn expr(
        &mut self,
        block: &mut Block,
        expr: &Expr,
        frame: &Frame,
        outer: &[Frame],
        clause: Clause,
        lenient: bool,
    ) -> GraphResult<()> {
        if let Some((subquery, form)) = expr.subquery() {
            block.subqueries += 1;
            let label = format!("{}.subquery{}", block.label, block.subqueries);
            let mut frames = outer.to_vec();
            frames.push(frame.clone());
            let kind = NodeKind::Subquery { form, clause };
            let id = self.node(label, kind, block.root.clone(), subquery, &frames)?;
            block.depend_on(id);
        }

        if let Expr::Column { qualifier, name } = expr {
            self.column(block, frame, outer, qualifier.as_deref(), name, lenient)?;
        }

        for child in expr.children() {
            self.expr(block, child, frame, outer, clause, lenient)?;
        }
        Ok(())
    }

    fn column(
        &mut self,
        block: &mut Block,
        frame: &Frame,
        outer: &[Frame],
        qualifier: Option<&str>,
        column: &str,
        lenient: bool,
    ) -> GraphResult<()> {
        match resolve(frame, outer, qualifier, column) {
            Resolution::Local(Binding::Cte { id, .. }) => self.read(block, *id, column),
            Resolution::Local(Binding::Derived { alias, outputs }) => {
                if !outputs.iter().any(|c| c == "*" || c == column) {
                    return Err(missing_in_derived(block, alias, column));
                }
            }
            Resolution::Local(Binding::Base { .. }) | Resolution::Alias => {}
            Resolution::Outer { owner, binding } => {
                let correlation = super::Correlation {
                    outer: owner.to_string(),
                    qualifier: qualifier.map(str::to_string),
                    column: column.to_string(),
                };
                if !block.correlation.contains(&correlation) {
                    block.correlation.push(correlation);
                }
                if let Binding::Cte { id, .. } = binding {
                    self.read(block, *id, column);
                }
            }
            Resolution::UnknownQualifier if lenient => {}
            Resolution::UnknownQualifier => {
                return Err(GraphError::UnknownRelation {
                    node: block.label.clone(),
                    qualifier: qualifier.unwrap_or_default().to_string(),
                });
            }
            Resolution::Unresolved { .. } if lenient => {}
            Resolution::Unresolved {
                sole: Some(Binding::Cte { id, .. }),
            } => self.read(block, *id, column),
            Resolution::Unresolved {
                sole: Some(Binding::Derived { alias, .. }),
            } => return Err(missing_in_derived(block, alias, column)),
            Resolution::Unresolved { .. } => {
                return Err(GraphError::UnresolvedColumn {
                    node: block.label.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn read(&mut self, block: &Block, producer: NodeId, column: &str) {
        self.reads.push(ColumnRead {
            consumer: block.label.clone(),
            producer,
            column: column.to_string(),
        });
    }

    /// Every column read from a CTE must be among its declared outputs.
    fn check_reads(&self) -> GraphResult<()> {
        for read in &self.reads {
            let Some(producer) = self.nodes.get(read.producer.0) else {
                continue;
            };
            let produced = producer
                .output_columns
                .iter()
                .any(|c| c == "*" || c == &read.column);
            if !produced {
                return Err(GraphError::MissingColumn {
                    consumer: read.consumer.clone(),
                    producer: producer.label.clone(),
                    column: read.column.clone(),
                });
            }
        }
        Ok(())
    }
}

fn missing_in_derived(block: &Block, alias: &Option<String>, column: &str) -> GraphError {
    GraphError::MissingColumn {
        consumer: block.label.clone(),
        producer: alias.clone().unwrap_or_else(|| "(derived table)".to_string()),
        column: column.to_string(),
    }
}

/// True when a WHERE conjunct filters a column of a CTE read by this block.
fn reads_cte(conjunct: &Expr, frame: &Frame, outer: &[Frame]) -> bool {
    conjunct.columns().into_iter().any(|(q, c)| {
        matches!(
            resolve(frame, outer, q, c),
            Resolution::Local(Binding::Cte { .. })
        )
    })
}

#[cfg(test)]
mod tests {
    use super::super::QueryGraph;
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn graph(sql: &str) -> GraphResult<QueryGraph> {
        QueryGraph::build(&parse(sql).unwrap(), None)
    }

    fn labels(g: &QueryGraph) -> Vec<&str> {
        g.nodes().iter().map(|n| n.label.as_str()).collect()
    }

    #[test]
    fn test_cte_chain_is_n_plus_one() {
        let g = graph(
            "WITH a AS (SELECT k, v FROM t),
                  b AS (SELECT k FROM a WHERE v > 1),
                  c AS (SELECT a.k FROM a JOIN b ON a.k = b.k)
             SELECT k FROM c",
        )
        .unwrap();
        assert_eq!(labels(&g), vec!["a", "b", "c", "main"]);
        for node in g.nodes() {
            assert_eq!(node.position, node.id.0);
            assert!(node.dependencies.iter().all(|d| d.0 < node.id.0));
        }
        assert_eq!(g.by_label("c").unwrap().dependencies, vec![NodeId(0), NodeId(1)]);
        assert_eq!(g.by_label("a").unwrap().flags.cte_reference_count, 2);
        assert_eq!(g.by_label("a").unwrap().flags.late_filter_count, 0);
        assert_eq!(g.by_label("b").unwrap().flags.late_filter_count, 1);
    }

    #[test]
    fn test_forward_reference() {
        let err = graph("WITH a AS (SELECT k FROM b), b AS (SELECT 1 AS k) SELECT k FROM a").unwrap_err();
        assert_eq!(
            err,
            GraphError::ForwardReference {
                from: "a".into(),
                to: "b".into()
            }
        );
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = graph("WITH a AS (SELECT k FROM a) SELECT k FROM a").unwrap_err();
        assert_eq!(err, GraphError::Cycle { node: "a".into() });
    }

    #[test]
    fn test_duplicate_cte() {
        let err = graph("WITH a AS (SELECT 1 AS k), a AS (SELECT 2 AS k) SELECT k FROM a").unwrap_err();
        assert_eq!(err, GraphError::DuplicateCte { name: "a".into() });
    }

    #[test]
    fn test_cte_named_main_is_rejected() {
        let err = graph("WITH main AS (SELECT 1 AS k) SELECT k FROM main").unwrap_err();
        assert_eq!(err, GraphError::ReservedName { name: "main".into() });
    }

    #[test]
    fn test_missing_upstream_column() {
        let err = graph("WITH a AS (SELECT k FROM t) SELECT a.v FROM a").unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingColumn {
                consumer: "main".into(),
                producer: "a".into(),
                column: "v".into()
            }
        );
    }

    #[test]
    fn test_unknown_qualifier() {
        let err = graph("SELECT x.k FROM t").unwrap_err();
        assert!(matches!(err, GraphError::UnknownRelation { .. }));
    }

    #[test]
    fn test_column_alias_count_mismatch() {
        let err = graph("WITH a(x, y) AS (SELECT k FROM t WHERE k > 0 GROUP BY k) SELECT x FROM a");
        assert!(matches!(
            err,
            Err(GraphError::ColumnCountMismatch {
                declared: 2,
                produced: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_correlated_exists_subquery() {
        let g = graph(
            "SELECT c.c_name FROM customer c
             WHERE EXISTS (SELECT 1 FROM orders o WHERE o.o_custkey = c.c_custkey)",
        )
        .unwrap();
        assert_eq!(labels(&g), vec!["main.subquery1", "main"]);
        let sub = &g.nodes()[0];
        assert_eq!(
            sub.kind,
            NodeKind::Subquery {
                form: SubqueryForm::Exists,
                clause: Clause::Where
            }
        );
        assert_eq!(sub.correlation.len(), 1);
        assert_eq!(sub.correlation[0].outer, "main");
        assert_eq!(sub.correlation[0].column, "c_custkey");
        assert!(g.main().unwrap().flags.has_exists);
        assert_eq!(g.main().unwrap().dependencies, vec![NodeId(0)]);
    }

    #[test]
    fn test_unqualified_outer_cte_column_is_correlated() {
        let g = graph(
            "WITH o AS (SELECT k, region FROM t)
             SELECT k FROM o WHERE EXISTS (SELECT 1 FROM u WHERE u.x = region)",
        )
        .unwrap();
        let sub = g
            .nodes()
            .iter()
            .find(|n| n.label == "main.subquery1")
            .unwrap();
        assert_eq!(sub.correlation.len(), 1);
        assert_eq!(sub.correlation[0].outer, "main");
        assert_eq!(sub.correlation[0].column, "region");
        assert_eq!(sub.correlation[0].qualifier, None);
    }

    #[test]
    fn test_subquery_reads_cte() {
        let g = graph(
            "WITH totals AS (SELECT s, sum(p) AS total FROM sales GROUP BY s)
             SELECT s FROM totals t1
             WHERE total > (SELECT avg(total) * 1.2 FROM totals t2 WHERE t2.s = t1.s)",
        )
        .unwrap();
        assert_eq!(labels(&g), vec!["totals", "main.subquery1", "main"]);
        assert_eq!(g.by_label("totals").unwrap().flags.cte_reference_count, 2);
        assert!(g.by_label("totals").unwrap().is_multi_use());
    }

    #[test]
    fn test_derived_table_inlined() {
        let g = graph("SELECT d.k FROM (SELECT k FROM t WHERE k > 1) d").unwrap();
        assert_eq!(g.len(), 1);
        assert!(g.main().unwrap().base_tables.contains("t"));
        assert!(graph("SELECT d.v FROM (SELECT k FROM t) d").is_err());
    }

    #[test]
    fn test_cross_node_self_join() {
        let g = graph(
            "WITH y2000 AS (SELECT d_date_sk FROM date_dim WHERE d_year = 2000),
                  y2001 AS (SELECT d_date_sk FROM date_dim WHERE d_year = 2001)
             SELECT * FROM y2000, y2001",
        )
        .unwrap();
        let a = g.by_label("y2000").unwrap();
        let b = g.by_label("y2001").unwrap();
        assert!(a.flags.self_join && b.flags.self_join);
        assert_eq!(a.flags.self_join_peers, vec![b.id]);
        assert_eq!(b.flags.self_join_peers, vec![a.id]);
        assert_eq!(a.flags.distinct_table_refs.get("date_dim"), Some(&2));
    }

    #[test]
    fn test_output_columns_round_trip() {
        let g = graph(
            "WITH a(x, y) AS (SELECT k, sum(v) FROM t GROUP BY k),
                  b AS (SELECT * FROM a WHERE y > 0)
             SELECT b.*, 1 AS one FROM b",
        )
        .unwrap();
        assert_eq!(g.by_label("b").unwrap().output_columns, vec!["x", "y"]);
        assert_eq!(g.main().unwrap().output_columns, vec!["x", "y", "one"]);
        for node in g.nodes() {
            assert!(!node.output_columns.is_empty());
            assert_eq!(g.derive_output_columns(node).unwrap(), node.output_columns);
        }
    }

    #[test]
    fn test_projection_alias_in_filters() {
        assert!(graph("WITH a AS (SELECT k FROM t) SELECT k AS kk FROM a ORDER BY kk").is_ok());
        assert!(graph("SELECT 1 AS one ORDER BY one").is_ok());
        assert!(matches!(
            graph("SELECT 1 AS one WHERE two > 0"),
            Err(GraphError::UnresolvedColumn { .. })
        ));
    }
}
