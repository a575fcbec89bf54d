use crate::ast::*;
use crate::parser::parse;

fn where_of(sql: &str) -> Expr {
    let stmt = parse(sql).unwrap();
    stmt.query.first_select().selection.clone().unwrap()
}

#[test]
fn test_or_of_equalities() {
    let expr = where_of("SELECT 1 FROM t WHERE (a = 1 OR a = 2) AND b > 3");
    let conjuncts = expr.conjuncts();
    assert_eq!(conjuncts.len(), 2);
    assert_eq!(conjuncts[0].disjuncts().len(), 2);
}

#[test]
fn test_in_subquery_and_exists() {
    let expr = where_of(
        "SELECT 1 FROM t WHERE t.k IN (SELECT k FROM u) AND EXISTS (SELECT 1 FROM v WHERE v.k = t.k)",
    );
    let forms: Vec<SubqueryForm> = expr
        .conjuncts()
        .iter()
        .filter_map(|c| c.subquery().map(|(_, form)| form))
        .collect();
    assert_eq!(forms, vec![SubqueryForm::In, SubqueryForm::Exists]);
}

#[test]
fn test_scalar_subquery_comparison() {
    let expr = where_of("SELECT 1 FROM t WHERE t.x > (SELECT avg(x) * 1.2 FROM t)");
    match expr {
        Expr::Binary { op, right, .. } => {
            assert_eq!(op, BinaryOp::Gt);
            assert!(matches!(*right, Expr::Subquery(_)));
        }
        other => panic!("expected comparison, got {other:?}"),
    }
}

#[test]
fn test_columns_skip_subqueries() {
    let expr = where_of("SELECT 1 FROM t WHERE a + b > (SELECT max(c) FROM u)");
    let cols: Vec<&str> = expr.columns().into_iter().map(|(_, c)| c).collect();
    assert_eq!(cols, vec!["a", "b"]);
}

#[test]
fn test_like_and_between() {
    let expr = where_of("SELECT 1 FROM t WHERE name NOT LIKE 'x%' AND d NOT BETWEEN 1 AND 2");
    let conjuncts = expr.conjuncts();
    assert!(matches!(conjuncts[0], Expr::Like { negated: true, .. }));
    assert!(matches!(conjuncts[1], Expr::Between { negated: true, .. }));
}

#[test]
fn test_window_in_projection() {
    let stmt = parse(
        "SELECT rank() OVER (PARTITION BY s ORDER BY total DESC) AS rnk FROM t",
    )
    .unwrap();
    let select = stmt.query.first_select();
    match &select.projection[0] {
        SelectItem::Expr {
            expr: Expr::Function(f),
            alias,
        } => {
            assert!(f.over.is_some());
            assert_eq!(alias.as_deref(), Some("rnk"));
        }
        other => panic!("expected window call, got {other:?}"),
    }
}

#[test]
fn test_group_by_rollup() {
    let stmt = parse("SELECT a, b, sum(c) FROM t GROUP BY ROLLUP(a, b)").unwrap();
    assert_eq!(stmt.query.first_select().group_by.len(), 1);
}

#[test]
fn test_nested_arithmetic_parentheses() {
    let stmt = parse("SELECT ((a + b) * 2) AS x FROM t").unwrap();
    match &stmt.query.first_select().projection[0] {
        SelectItem::Expr {
            expr: Expr::Nested(inner),
            alias,
        } => {
            assert_eq!(alias.as_deref(), Some("x"));
            match inner.as_ref() {
                Expr::Binary { left, op, .. } => {
                    assert_eq!(*op, BinaryOp::Multiply);
                    assert!(matches!(left.as_ref(), Expr::Nested(_)));
                }
                other => panic!("expected product, got {other:?}"),
            }
        }
        other => panic!("expected nested expression, got {other:?}"),
    }
}

#[test]
fn test_parenthesized_or_of_conjunctions() {
    let expr = where_of("SELECT k FROM t WHERE ((x = 1 AND y = 2) OR (x = 3 AND z = 4))");
    let branches = expr.disjuncts();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0].conjuncts().len(), 2);
    assert_eq!(branches[1].conjuncts().len(), 2);
}

#[test]
fn test_doubly_parenthesized_subquery() {
    let expr = where_of("SELECT k FROM t WHERE t.x > ((SELECT max(x) FROM u))");
    match expr {
        Expr::Binary { right, .. } => assert!(matches!(*right, Expr::Subquery(_))),
        other => panic!("expected comparison, got {other:?}"),
    }
}

#[test]
fn test_subquery_inside_arithmetic_group() {
    let expr = where_of("SELECT k FROM t WHERE t.x > ((SELECT max(x) FROM u) + 1)");
    match expr {
        Expr::Binary { right, .. } => match *right {
            Expr::Nested(inner) => assert!(matches!(
                *inner,
                Expr::Binary {
                    op: BinaryOp::Plus,
                    ..
                }
            )),
            other => panic!("expected nested sum, got {other:?}"),
        },
        other => panic!("expected comparison, got {other:?}"),
    }
}
