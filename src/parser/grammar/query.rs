//! Statements, WITH lists, set operations and SELECT blocks.

use super::base::*;
use super::expressions::{expression, expression_list, order_by_clause};
use super::joins::{from_clause, table_alias};
use crate::ast::*;
use nom::{
    Err,
    branch::alt,
    combinator::{cut, map, opt},
    error::context,
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated},
};

/// `[WITH cte, ...] query`
pub fn statement(input: &str) -> PResult<'_, Statement> {
    let (input, ctes) = opt(with_clause)(input)?;
    let (input, query) = context("SELECT", query)(input)?;
    Ok((
        input,
        Statement {
            ctes: ctes.unwrap_or_default(),
            query,
        },
    ))
}

fn with_clause(input: &str) -> PResult<'_, Vec<CteDef>> {
    let (input, _) = kw("with")(input)?;
    if kw("recursive")(input).is_ok() {
        return unsupported(input, "CTE name (WITH RECURSIVE is not supported)");
    }
    let (input, defs) = cut(separated_list1(ch(','), cte_def))(input)?;
    let ctes = defs
        .into_iter()
        .enumerate()
        .map(|(position, mut cte)| {
            cte.position = position;
            cte
        })
        .collect();
    Ok((input, ctes))
}

/// `name [(col, ...)] AS [[NOT] MATERIALIZED] (query)`
fn cte_def(input: &str) -> PResult<'_, CteDef> {
    let (input, name) = context("CTE name", identifier)(input)?;
    let (input, columns) = opt(delimited(
        ch('('),
        cut(separated_list1(ch(','), identifier)),
        cut(ch(')')),
    ))(input)?;
    let (input, _) = cut(kw("as"))(input)?;
    let (input, materialized) = opt(alt((
        map(pair(kw("not"), kw("materialized")), |_| false),
        map(kw("materialized"), |_| true),
    )))(input)?;
    let (input, query) = cut(delimited(ch('('), query, ch(')')))(input)?;

    Ok((
        input,
        CteDef {
            name,
            columns: columns.unwrap_or_default(),
            materialized,
            query,
            position: 0,
        },
    ))
}

/// Set expression with its trailing ORDER BY / LIMIT / OFFSET.
pub fn query(input: &str) -> PResult<'_, Query> {
    if kw("with")(input).is_ok() {
        return unsupported(input, "SELECT (WITH is only supported at the top level)");
    }
    let (input, body) = set_expr(input)?;
    let (input, order_by) = opt(order_by_clause)(input)?;
    let (input, limit) = opt(limit_clause)(input)?;
    let (input, offset) = opt(offset_clause)(input)?;
    let (input, fetch) = opt(fetch_clause)(input)?;

    Ok((
        input,
        Query {
            body,
            order_by: order_by.unwrap_or_default(),
            limit: limit.or(fetch),
            offset,
        },
    ))
}

fn limit_clause(input: &str) -> PResult<'_, u64> {
    preceded(kw("limit"), cut(unsigned))(input)
}

fn offset_clause(input: &str) -> PResult<'_, u64> {
    terminated(
        preceded(kw("offset"), cut(unsigned)),
        opt(alt((kw("rows"), kw("row")))),
    )(input)
}

/// `FETCH FIRST|NEXT n ROWS ONLY`
fn fetch_clause(input: &str) -> PResult<'_, u64> {
    let (input, _) = kw("fetch")(input)?;
    let (input, _) = cut(alt((kw("first"), kw("next"))))(input)?;
    let (input, n) = opt(unsigned)(input)?;
    let (input, _) = cut(alt((kw("rows"), kw("row"))))(input)?;
    let (input, _) = cut(kw("only"))(input)?;
    Ok((input, n.unwrap_or(1)))
}

/// UNION and EXCEPT, left-associative over INTERSECT terms.
fn set_expr(input: &str) -> PResult<'_, SetExpr> {
    let (mut input, mut left) = set_term(input)?;
    loop {
        let op: PResult<'_, SetOperator> = alt((
            map(kw("union"), |_| SetOperator::Union),
            map(kw("except"), |_| SetOperator::Except),
        ))(input);
        let Ok((rest, op)) = op else {
            break;
        };
        let (rest, all) = set_quantifier(rest)?;
        let (rest, right) = cut(set_term)(rest)?;
        left = SetExpr::SetOp {
            op,
            all,
            left: Box::new(left),
            right: Box::new(right),
        };
        input = rest;
    }
    Ok((input, left))
}

/// INTERSECT binds tighter than UNION and EXCEPT.
fn set_term(input: &str) -> PResult<'_, SetExpr> {
    let (mut input, mut left) = set_primary(input)?;
    while let Ok((rest, _)) = kw("intersect")(input) {
        let (rest, all) = set_quantifier(rest)?;
        let (rest, right) = cut(set_primary)(rest)?;
        left = SetExpr::SetOp {
            op: SetOperator::Intersect,
            all,
            left: Box::new(left),
            right: Box::new(right),
        };
        input = rest;
    }
    Ok((input, left))
}

fn set_quantifier(input: &str) -> PResult<'_, bool> {
    let (input, q) = opt(alt((
        map(kw("all"), |_| true),
        map(kw("distinct"), |_| false),
    )))(input)?;
    Ok((input, q.unwrap_or(false)))
}

fn set_primary(input: &str) -> PResult<'_, SetExpr> {
    if let Ok((rest, _)) = ch('(')(input) {
        let (rest, q) = cut(terminated(query, ch(')')))(rest)?;
        return Ok((rest, SetExpr::Nested(Box::new(q))));
    }
    map(select, |s| SetExpr::Select(Box::new(s)))(input)
}

/// A single SELECT block.
pub fn select(input: &str) -> PResult<'_, Select> {
    let (input, _) = kw("select")(input)?;
    if pair(kw("top"), unsigned)(input).is_ok() {
        return unsupported(input, "select list (TOP is not supported, use LIMIT)");
    }
    let (input, distinct) = opt(alt((
        map(kw("distinct"), |_| true),
        map(kw("all"), |_| false),
    )))(input)?;
    let (input, projection) =
        context("select list", cut(separated_list1(ch(','), select_item)))(input)?;

    let (input, from) = opt(from_clause)(input)?;
    let (input, selection) = opt(preceded(kw("where"), cut(expression)))(input)?;
    let (input, group_by) = opt(preceded(
        pair(kw("group"), cut(kw("by"))),
        cut(expression_list),
    ))(input)?;
    let (input, having) = opt(preceded(kw("having"), cut(expression)))(input)?;
    if kw("window")(input).is_ok() {
        return unsupported(input, "end of SELECT (WINDOW clauses are not supported)");
    }
    let (input, qualify) = opt(preceded(kw("qualify"), cut(expression)))(input)?;

    Ok((
        input,
        Select {
            distinct: distinct.unwrap_or(false),
            projection,
            from,
            selection,
            group_by: group_by.unwrap_or_default(),
            having,
            qualify,
        },
    ))
}

fn select_item(input: &str) -> PResult<'_, SelectItem> {
    if let Ok((rest, _)) = ch('*')(input) {
        return Ok((rest, SelectItem::Wildcard { qualifier: None }));
    }
    let qualified: PResult<'_, String> = terminated(identifier, pair(ch('.'), ch('*')))(input);
    if let Ok((rest, qualifier)) = qualified {
        return Ok((
            rest,
            SelectItem::Wildcard {
                qualifier: Some(qualifier),
            },
        ));
    }

    let (input, expr) = expression(input)?;
    let (input, alias) = opt(column_alias)(input)?;
    Ok((input, SelectItem::Expr { expr, alias }))
}

/// Column aliases also accept single-quoted strings.
fn column_alias(input: &str) -> PResult<'_, String> {
    match table_alias(input) {
        Ok(done) => Ok(done),
        Err(Err::Error(_)) => preceded(opt(kw("as")), string_literal)(input),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_all_and_intersect_precedence() {
        let (_, q) = query("SELECT a FROM x UNION ALL SELECT a FROM y INTERSECT SELECT a FROM z").unwrap();
        match q.body {
            SetExpr::SetOp {
                op: SetOperator::Union,
                all: true,
                right,
                ..
            } => assert!(matches!(
                *right,
                SetExpr::SetOp {
                    op: SetOperator::Intersect,
                    ..
                }
            )),
            other => panic!("expected UNION ALL at the root, got {other:?}"),
        }
    }

    #[test]
    fn test_cte_positions_and_materialization() {
        let (_, stmt) = statement(
            "WITH a AS MATERIALIZED (SELECT 1 AS x), b(y) AS (SELECT x FROM a) SELECT y FROM b",
        )
        .unwrap();
        assert_eq!(stmt.ctes.len(), 2);
        assert_eq!(stmt.ctes[0].materialized, Some(true));
        assert_eq!(stmt.ctes[1].position, 1);
        assert_eq!(stmt.ctes[1].columns, vec!["y".to_string()]);
    }

    #[test]
    fn test_select_clauses() {
        let (rest, s) = select(
            "SELECT DISTINCT i.*, count(*) cnt FROM item i WHERE i.p > 1 GROUP BY i.k HAVING count(*) > 2 QUALIFY rank() OVER (ORDER BY cnt) = 1",
        )
        .unwrap();
        assert!(rest.is_empty());
        assert!(s.distinct);
        assert_eq!(s.projection.len(), 2);
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
        assert!(s.qualify.is_some());
    }

    #[test]
    fn test_fetch_first() {
        let (_, q) = query("SELECT a FROM t ORDER BY a DESC NULLS LAST FETCH FIRST 10 ROWS ONLY").unwrap();
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.order_by[0].nulls_first, Some(false));
    }

    #[test]
    fn test_recursive_rejected() {
        assert!(matches!(
            statement("WITH RECURSIVE r AS (SELECT 1) SELECT * FROM r"),
            Err(Err::Failure(_))
        ));
    }
}
