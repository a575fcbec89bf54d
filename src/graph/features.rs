//! Structural feature extraction.
//!
//! [`extract`] is a pure walk over one block's AST. It covers derived
//! tables (they belong to the block) but stops at expression subqueries,
//! which are nodes of their own. [`link`] is the graph-level second pass
//! that fills the flags needing every node: graph-wide table occurrence
//! counts, self-joins and CTE reference counts.

use super::{NodeId, NodeKind, QueryNode};
use crate::ast::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Join counts by kind and syntactic style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCounts {
    pub inner: usize,
    pub left: usize,
    pub right: usize,
    pub full: usize,
    pub cross: usize,
    /// Joins written as `FROM a, b`.
    pub comma: usize,
    /// Joins written with `JOIN`.
    pub explicit: usize,
}

impl JoinCounts {
    pub fn total(&self) -> usize {
        self.comma + self.explicit
    }

    fn record(&mut self, join: &Join) {
        match join.kind {
            JoinKind::Inner => self.inner += 1,
            JoinKind::Left => self.left += 1,
            JoinKind::Right => self.right += 1,
            JoinKind::Full => self.full += 1,
            JoinKind::Cross => self.cross += 1,
        }
        match join.style {
            JoinStyle::Comma => self.comma += 1,
            JoinStyle::Explicit => self.explicit += 1,
        }
    }

    fn add(&mut self, other: &JoinCounts) {
        self.inner += other.inner;
        self.left += other.left;
        self.right += other.right;
        self.full += other.full;
        self.cross += other.cross;
        self.comma += other.comma;
        self.explicit += other.explicit;
    }
}

/// One maximal OR tree in a predicate clause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrGroup {
    /// Number of disjuncts.
    pub branches: usize,
    /// Distinct sets of columns constrained by the disjuncts.
    pub column_groups: Vec<Vec<String>>,
}

impl OrGroup {
    /// Effective branch count: disjuncts on the same column set count once.
    pub fn effective(&self) -> usize {
        self.column_groups.len()
    }
}

/// Per-node structural flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralFlags {
    pub has_group_by: bool,
    pub has_window_function: bool,
    pub has_union_all: bool,
    /// INTERSECT or EXCEPT.
    pub has_set_op: bool,
    pub has_exists: bool,
    pub has_not_exists: bool,
    pub has_left_join: bool,
    pub has_comma_join: bool,
    /// Largest effective branch count over the node's OR trees.
    pub or_branch_count: usize,
    pub or_groups: Vec<OrGroup>,
    /// Graph-wide occurrence count of each base table this node reads.
    pub distinct_table_refs: BTreeMap<String, usize>,
    pub self_join: bool,
    pub self_join_peers: Vec<NodeId>,
    /// FROM/JOIN occurrences of this node elsewhere in the graph.
    pub cte_reference_count: usize,

    /// Relation occurrences in this node (base tables and CTE references).
    pub table_refs: usize,
    pub joins: JoinCounts,
    pub union_count: usize,
    pub union_all_count: usize,
    pub intersect_count: usize,
    pub except_count: usize,
    pub exists_count: usize,
    pub not_exists_count: usize,
    pub in_subquery_count: usize,
    pub scalar_subquery_count: usize,
    pub window_count: usize,
    /// WHERE conjuncts that filter a column produced by an upstream CTE.
    pub late_filter_count: usize,
}

/// One FROM/JOIN occurrence of a named relation, with the simple filters
/// applied to it in the same block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
    pub name: String,
    /// Filter fingerprints such as `d_year = 2000`.
    pub filters: BTreeSet<String>,
}

/// Output of [`extract`].
#[derive(Debug, Clone, Default)]
pub struct LocalFeatures {
    pub flags: StructuralFlags,
    pub relations: Vec<RelationRef>,
}

/// Extract the local features of one block.
pub fn extract(query: &Query) -> LocalFeatures {
    let mut walker = Walker::default();
    walker.query(query);

    let mut flags = walker.flags;
    flags.has_union_all = flags.union_all_count > 0;
    flags.has_set_op = flags.intersect_count + flags.except_count > 0;
    flags.has_exists = flags.exists_count > 0;
    flags.has_not_exists = flags.not_exists_count > 0;
    flags.has_left_join = flags.joins.left > 0;
    flags.has_comma_join = flags.joins.comma > 0;
    flags.has_window_function = flags.window_count > 0;
    flags.or_branch_count = flags
        .or_groups
        .iter()
        .map(OrGroup::effective)
        .max()
        .unwrap_or(0);
    flags.table_refs = walker.relations.len();

    LocalFeatures {
        flags,
        relations: walker.relations,
    }
}

#[derive(Default)]
struct Walker {
    flags: StructuralFlags,
    relations: Vec<RelationRef>,
}

impl Walker {
    fn query(&mut self, query: &Query) {
        self.set_expr(&query.body);
        for o in &query.order_by {
            self.expr(&o.expr, false);
        }
    }

    fn set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(s) => self.select(s),
            SetExpr::SetOp {
                op,
                all,
                left,
                right,
            } => {
                match (op, all) {
                    (SetOperator::Union, true) => self.flags.union_all_count += 1,
                    (SetOperator::Union, false) => self.flags.union_count += 1,
                    (SetOperator::Intersect, _) => self.flags.intersect_count += 1,
                    (SetOperator::Except, _) => self.flags.except_count += 1,
                }
                self.set_expr(left);
                self.set_expr(right);
            }
            SetExpr::Nested(q) => self.query(q),
        }
    }

    fn select(&mut self, select: &Select) {
        if !select.group_by.is_empty() {
            self.flags.has_group_by = true;
        }

        let mut bindings: Vec<(Option<String>, Option<usize>)> = Vec::new();
        let mut join_filters: Vec<&Expr> = Vec::new();

        if let Some(from) = &select.from {
            for join in &from.joins {
                self.flags.joins.record(join);
                if let JoinConstraint::On(on) = &join.constraint {
                    join_filters.push(on);
                }
            }
            for relation in from.relations() {
                match relation {
                    TableFactor::Table { name, .. } => {
                        bindings.push((
                            relation.binding_name().map(str::to_string),
                            Some(self.relations.len()),
                        ));
                        self.relations.push(RelationRef {
                            name: name.clone(),
                            filters: BTreeSet::new(),
                        });
                    }
                    TableFactor::Derived { subquery, alias, .. } => {
                        bindings.push((alias.clone(), None));
                        self.query(subquery);
                    }
                }
            }
        }

        for item in &select.projection {
            if let SelectItem::Expr { expr, .. } = item {
                self.expr(expr, false);
            }
        }
        for e in &select.group_by {
            self.expr(e, false);
        }
        for on in &join_filters {
            self.expr(on, true);
        }
        for clause in [&select.selection, &select.having, &select.qualify]
            .into_iter()
            .flatten()
        {
            self.expr(clause, true);
        }

        // Fingerprint `col op literal` filters onto the occurrence they constrain.
        let conjuncts = select
            .selection
            .iter()
            .chain(join_filters.iter().copied())
            .flat_map(|e| e.conjuncts());
        for conjunct in conjuncts {
            let Some((qualifier, fingerprint)) = fingerprint(conjunct) else {
                continue;
            };
            let target = match qualifier {
                Some(q) => bindings
                    .iter()
                    .find(|(name, _)| name.as_deref() == Some(q))
                    .and_then(|(_, idx)| *idx),
                None if bindings.len() == 1 => bindings[0].1,
                None => None,
            };
            if let Some(idx) = target {
                self.relations[idx].filters.insert(fingerprint);
            }
        }
    }

    /// Walk an expression. `predicate` marks clauses whose OR trees count.
    fn expr(&mut self, expr: &Expr, predicate: bool) {
        if predicate && is_or(expr) {
            self.flags.or_groups.push(or_group(expr));
            for branch in expr.disjuncts() {
                self.expr(branch, true);
            }
            return;
        }

        if let Some((_, form)) = expr.subquery() {
            match form {
                SubqueryForm::Scalar => self.flags.scalar_subquery_count += 1,
                SubqueryForm::Exists => self.flags.exists_count += 1,
                SubqueryForm::NotExists => self.flags.not_exists_count += 1,
                SubqueryForm::In | SubqueryForm::NotIn => self.flags.in_subquery_count += 1,
            }
        }
        if let Expr::Function(f) = expr {
            if f.over.is_some() {
                self.flags.window_count += 1;
            }
        }

        // NOT (a OR b) and nested boolean structure keep predicate context.
        let keep = predicate
            && matches!(
                expr,
                Expr::Binary {
                    op: BinaryOp::And,
                    ..
                } | Expr::Unary {
                    op: UnaryOp::Not,
                    ..
                } | Expr::Nested(_)
            );
        for child in expr.children() {
            self.expr(child, keep);
        }
    }
}

fn is_or(expr: &Expr) -> bool {
    match expr {
        Expr::Binary {
            op: BinaryOp::Or, ..
        } => true,
        Expr::Nested(inner) => is_or(inner),
        _ => false,
    }
}

fn or_group(expr: &Expr) -> OrGroup {
    let branches = expr.disjuncts();
    let mut groups: Vec<Vec<String>> = Vec::new();
    for branch in &branches {
        let columns: BTreeSet<String> = branch
            .columns()
            .into_iter()
            .map(|(q, c)| match q {
                Some(q) => format!("{}.{}", q, c),
                None => c.to_string(),
            })
            .collect();
        let columns: Vec<String> = columns.into_iter().collect();
        if !groups.contains(&columns) {
            groups.push(columns);
        }
    }
    OrGroup {
        branches: branches.len(),
        column_groups: groups,
    }
}

/// Render a literal operand, seeing through sign, casts and parentheses.
fn literal_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Literal(lit) => Some(lit.to_string()),
        Expr::Unary {
            op: UnaryOp::Minus,
            expr,
        } => literal_text(expr).map(|t| format!("-{}", t)),
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => literal_text(inner),
        Expr::Interval { value, unit } => Some(match unit {
            Some(u) => format!("interval '{}' {}", value, u),
            None => format!("interval '{}'", value),
        }),
        _ => None,
    }
}

fn column_of(expr: &Expr) -> Option<(Option<&str>, &str)> {
    match expr {
        Expr::Column { qualifier, name } => Some((qualifier.as_deref(), name.as_str())),
        Expr::Nested(inner) => column_of(inner),
        _ => None,
    }
}

/// Fingerprint of a single-column filter against literals.
fn fingerprint(expr: &Expr) -> Option<(Option<&str>, String)> {
    match expr {
        Expr::Binary { left, op, right } if op.is_comparison() => {
            if let (Some((q, c)), Some(lit)) = (column_of(left), literal_text(right)) {
                return Some((q, format!("{} {} {}", c, op, lit)));
            }
            if let (Some(lit), Some((q, c))) = (literal_text(left), column_of(right)) {
                return Some((q, format!("{} {} {}", lit, op, c)));
            }
            None
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let (q, c) = column_of(expr)?;
            let values: Option<Vec<String>> = list.iter().map(literal_text).collect();
            let not = if *negated { "not " } else { "" };
            Some((q, format!("{} {}in ({})", c, not, values?.join(", "))))
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let (q, c) = column_of(expr)?;
            let not = if *negated { "not " } else { "" };
            Some((
                q,
                format!(
                    "{} {}between {} and {}",
                    c,
                    not,
                    literal_text(low)?,
                    literal_text(high)?
                ),
            ))
        }
        Expr::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => {
            let (q, c) = column_of(expr)?;
            let not = if *negated { "not " } else { "" };
            let op = if *case_insensitive { "ilike" } else { "like" };
            Some((q, format!("{} {}{} {}", c, not, op, literal_text(pattern)?)))
        }
        Expr::IsNull { expr, negated } => {
            let (q, c) = column_of(expr)?;
            let not = if *negated { "not " } else { "" };
            Some((q, format!("{} is {}null", c, not)))
        }
        _ => None,
    }
}

/// Graph-level pass over fully built nodes.
pub(crate) fn link(nodes: &mut [QueryNode]) {
    let cte_names: BTreeMap<String, NodeId> = nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Cte { .. }))
        .map(|n| (n.label.clone(), n.id))
        .collect();

    let mut table_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut cte_counts: BTreeMap<NodeId, usize> = BTreeMap::new();
    for node in nodes.iter() {
        for r in &node.relations {
            match cte_names.get(&r.name) {
                Some(id) => *cte_counts.entry(*id).or_default() += 1,
                None => *table_counts.entry(r.name.clone()).or_default() += 1,
            }
        }
    }

    // (node, table, filters) for every base-table occurrence.
    let scans: Vec<(NodeId, &str, &BTreeSet<String>)> = nodes
        .iter()
        .flat_map(|n| {
            n.relations
                .iter()
                .filter(|r| !cte_names.contains_key(&r.name))
                .map(move |r| (n.id, r.name.as_str(), &r.filters))
        })
        .collect();

    let mut self_join: BTreeSet<NodeId> = BTreeSet::new();
    let mut peers: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for (i, (a_node, a_table, a_filters)) in scans.iter().enumerate() {
        for (b_node, b_table, b_filters) in &scans[i + 1..] {
            if a_table != b_table {
                continue;
            }
            if a_node == b_node {
                self_join.insert(*a_node);
            } else if a_filters != b_filters {
                self_join.insert(*a_node);
                self_join.insert(*b_node);
                peers.entry(*a_node).or_default().insert(*b_node);
                peers.entry(*b_node).or_default().insert(*a_node);
            }
        }
    }

    for node in nodes.iter_mut() {
        node.flags.distinct_table_refs = node
            .base_tables
            .iter()
            .map(|t| (t.clone(), table_counts.get(t).copied().unwrap_or(0)))
            .collect();
        node.flags.self_join = self_join.contains(&node.id);
        node.flags.self_join_peers = peers
            .remove(&node.id)
            .map(|p| p.into_iter().collect())
            .unwrap_or_default();
        node.flags.cte_reference_count = cte_counts.get(&node.id).copied().unwrap_or(0);
    }
}

/// Sum of join counts over a set of flags.
pub fn total_joins<'a>(flags: impl Iterator<Item = &'a StructuralFlags>) -> JoinCounts {
    let mut total = JoinCounts::default();
    for f in flags {
        total.add(&f.joins);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn features(sql: &str) -> LocalFeatures {
        extract(&parse(sql).unwrap().query)
    }

    #[test]
    fn test_same_column_or_is_one_group() {
        let f = features("SELECT * FROM t WHERE col = 1 OR col = 2");
        assert_eq!(f.flags.or_branch_count, 1);
        assert_eq!(f.flags.or_groups[0].branches, 2);
    }

    #[test]
    fn test_distinct_column_or() {
        let f = features("SELECT * FROM t WHERE (a = 1 OR b = 2) AND c > 0");
        assert_eq!(f.flags.or_branch_count, 2);
        assert_eq!(
            f.flags.or_groups[0].column_groups,
            vec![vec!["a".to_string()], vec!["b".to_string()]]
        );
    }

    #[test]
    fn test_parenthesized_or_of_conjunctions() {
        let f = features("SELECT k FROM t WHERE ((a = 1 AND b = 2) OR (a = 3 AND c = 4))");
        assert_eq!(f.flags.or_groups.len(), 1);
        assert_eq!(f.flags.or_groups[0].branches, 2);
        assert_eq!(
            f.flags.or_groups[0].column_groups,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["a".to_string(), "c".to_string()]
            ]
        );
        assert_eq!(f.flags.or_branch_count, 2);
    }

    #[test]
    fn test_redundant_parentheses_around_or() {
        let f = features("SELECT k FROM t WHERE (((a = 1 OR b = 2)))");
        assert_eq!(f.flags.or_groups.len(), 1);
        assert_eq!(f.flags.or_groups[0].branches, 2);
    }

    #[test]
    fn test_stops_at_expression_subqueries() {
        let f = features(
            "SELECT a FROM t WHERE EXISTS (SELECT 1 FROM u, v WHERE u.k = t.k) AND NOT EXISTS (SELECT 1 FROM w)",
        );
        assert!(f.flags.has_exists);
        assert!(f.flags.has_not_exists);
        assert_eq!(f.flags.table_refs, 1);
        assert!(!f.flags.has_comma_join);
    }

    #[test]
    fn test_derived_tables_are_inlined() {
        let f = features(
            "SELECT d.k FROM (SELECT k FROM x UNION ALL SELECT k FROM y) d LEFT JOIN z ON z.k = d.k",
        );
        assert!(f.flags.has_union_all);
        assert!(f.flags.has_left_join);
        let names: Vec<&str> = f.relations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_filter_fingerprints() {
        let f = features(
            "SELECT 1 FROM date_dim d1, date_dim d2 WHERE d1.d_year = 2000 AND d2.d_year = 2001 AND d1.d_moy BETWEEN 1 AND 3",
        );
        let d1: Vec<&str> = f.relations[0].filters.iter().map(String::as_str).collect();
        let d2: Vec<&str> = f.relations[1].filters.iter().map(String::as_str).collect();
        assert_eq!(d1, vec!["d_moy between 1 and 3", "d_year = 2000"]);
        assert_eq!(d2, vec!["d_year = 2001"]);
    }

    #[test]
    fn test_windows_and_grouping() {
        let f = features(
            "SELECT k, sum(v), rank() OVER (ORDER BY sum(v) DESC) FROM t GROUP BY k",
        );
        assert!(f.flags.has_group_by);
        assert!(f.flags.has_window_function);
        assert_eq!(f.flags.window_count, 1);
    }
}
