use crate::ast::*;
use crate::parser::parse;
use pretty_assertions::assert_eq;

#[test]
fn test_cte_chain() {
    let stmt = parse(
        "WITH a AS (SELECT k FROM t),
              b AS (SELECT k FROM a WHERE k > 1)
         SELECT count(*) FROM b;",
    )
    .unwrap();
    let names: Vec<&str> = stmt.ctes.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(stmt.ctes[1].position, 1);
}

#[test]
fn test_cte_column_aliases() {
    let stmt = parse("WITH totals(store, revenue) AS (SELECT s, sum(p) FROM x GROUP BY s) SELECT store FROM totals").unwrap();
    assert_eq!(stmt.ctes[0].columns, vec!["store".to_string(), "revenue".to_string()]);
}

#[test]
fn test_not_materialized() {
    let stmt = parse("WITH a AS NOT MATERIALIZED (SELECT 1 AS x) SELECT x FROM a").unwrap();
    assert_eq!(stmt.ctes[0].materialized, Some(false));
}

#[test]
fn test_quoted_cte_name_keeps_case() {
    let stmt = parse("WITH \"Totals\" AS (SELECT 1 AS x) SELECT x FROM \"Totals\"").unwrap();
    assert_eq!(stmt.ctes[0].name, "Totals");
}

#[test]
fn test_comments_are_ignored() {
    let stmt = parse(
        "-- leading comment
         WITH a AS (SELECT 1 AS x /* inline */)
         SELECT x FROM a -- trailing",
    )
    .unwrap();
    assert_eq!(stmt.ctes.len(), 1);
}

#[test]
fn test_union_all_in_cte() {
    let stmt = parse(
        "WITH u AS (SELECT a FROM x UNION ALL SELECT a FROM y) SELECT a FROM u ORDER BY a LIMIT 5 OFFSET 2",
    )
    .unwrap();
    assert!(matches!(
        stmt.ctes[0].query.body,
        SetExpr::SetOp {
            op: SetOperator::Union,
            all: true,
            ..
        }
    ));
    assert_eq!(stmt.query.limit, Some(5));
    assert_eq!(stmt.query.offset, Some(2));
}
