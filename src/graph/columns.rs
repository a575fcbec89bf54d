//! Output column derivation.
//!
//! A block's outputs are named from its left-most SELECT, in projection
//! order. `*` expands through CTEs and derived tables; a base table's schema
//! is unknown, so its `*` stays as a single open `"*"` entry.

use crate::ast::*;

/// Name a projection expression gets without an alias.
pub fn expr_name(expr: &Expr) -> String {
    match expr {
        Expr::Column { name, .. } => name.clone(),
        Expr::Function(f) => f.name.clone(),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => expr_name(expr),
        Expr::Extract { field, .. } => field.clone(),
        Expr::Case { .. } => "case".to_string(),
        _ => "?column?".to_string(),
    }
}

/// Derive the output columns of `query`.
///
/// `cte_outputs` looks up the declared outputs of a CTE visible to the
/// query by name.
pub fn derive(query: &Query, cte_outputs: &dyn Fn(&str) -> Option<Vec<String>>) -> Vec<String> {
    let select = query.first_select();
    let mut out: Vec<String> = Vec::new();

    for item in &select.projection {
        match item {
            SelectItem::Expr { expr, alias } => {
                out.push(alias.clone().unwrap_or_else(|| expr_name(expr)));
            }
            SelectItem::Wildcard { qualifier: None } => {
                if let Some(from) = &select.from {
                    for relation in from.relations() {
                        extend(&mut out, relation_outputs(relation, cte_outputs));
                    }
                }
            }
            SelectItem::Wildcard {
                qualifier: Some(q),
            } => {
                let relation = select
                    .from
                    .as_ref()
                    .and_then(|f| f.relations().find(|r| r.binding_name() == Some(q.as_str())));
                match relation {
                    Some(r) => extend(&mut out, relation_outputs(r, cte_outputs)),
                    None => extend(&mut out, vec!["*".to_string()]),
                }
            }
        }
    }
    out
}

/// Outputs of one FROM entry.
pub fn relation_outputs(
    relation: &TableFactor,
    cte_outputs: &dyn Fn(&str) -> Option<Vec<String>>,
) -> Vec<String> {
    match relation {
        TableFactor::Table { name, .. } => {
            cte_outputs(name).unwrap_or_else(|| vec!["*".to_string()])
        }
        TableFactor::Derived {
            subquery, columns, ..
        } => {
            if columns.is_empty() {
                derive(subquery, cte_outputs)
            } else {
                columns.clone()
            }
        }
    }
}

fn extend(out: &mut Vec<String>, columns: Vec<String>) {
    for c in columns {
        if c == "*" && out.iter().any(|o| o == "*") {
            continue;
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn outputs(sql: &str) -> Vec<String> {
        let stmt = parse(sql).unwrap();
        derive(&stmt.query, &|name| {
            (name == "a").then(|| vec!["k".to_string(), "v".to_string()])
        })
    }

    #[test]
    fn test_names_and_aliases() {
        assert_eq!(
            outputs("SELECT s.k, sum(v) AS total, count(*), CAST(x AS int) FROM s"),
            vec!["k", "total", "count", "x"]
        );
    }

    #[test]
    fn test_star_through_cte_and_base() {
        assert_eq!(outputs("SELECT * FROM a, b, c"), vec!["k", "v", "*"]);
        assert_eq!(outputs("SELECT b.*, a.k FROM a, b"), vec!["*", "k"]);
    }

    #[test]
    fn test_derived_table_columns() {
        assert_eq!(
            outputs("SELECT * FROM (SELECT 1, 2) AS d(x, y)"),
            vec!["x", "y"]
        );
        assert_eq!(outputs("SELECT * FROM (SELECT k FROM a) d"), vec!["k"]);
    }

    #[test]
    fn test_set_operation_uses_left_branch() {
        assert_eq!(
            outputs("SELECT k AS id FROM a UNION ALL SELECT v FROM a"),
            vec!["id"]
        );
    }
}
