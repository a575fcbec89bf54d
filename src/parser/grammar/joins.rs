//! FROM clause and JOIN parsing.
//!
//! Comma lists and explicit joins share the [`FromClause`] shape. A comma
//! item is an unconstrained inner join marked [`JoinStyle::Comma`].

use super::base::*;
use super::expressions::expression;
use super::query::query;
use crate::ast::*;
use nom::{
    Err,
    branch::alt,
    combinator::{cut, map, opt},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated},
};

/// `FROM relation { , relation | join }`
pub fn from_clause(input: &str) -> PResult<'_, FromClause> {
    let (input, _) = kw("from")(input)?;
    let (mut input, relation) = cut(table_factor)(input)?;

    let mut joins = Vec::new();
    loop {
        if let Ok((rest, _)) = ch(',')(input) {
            let (rest, relation) = cut(table_factor)(rest)?;
            joins.push(Join {
                relation,
                kind: JoinKind::Inner,
                style: JoinStyle::Comma,
                constraint: JoinConstraint::None,
            });
            input = rest;
            continue;
        }
        match join(input) {
            Ok((rest, j)) => {
                joins.push(j);
                input = rest;
            }
            Err(Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }

    Ok((input, FromClause { relation, joins }))
}

fn join_kind(input: &str) -> PResult<'_, JoinKind> {
    if kw("natural")(input).is_ok() {
        return unsupported(input, "explicit join condition (NATURAL JOIN is not supported)");
    }
    alt((
        map(pair(kw("inner"), kw("join")), |_| JoinKind::Inner),
        map(
            pair(kw("left"), pair(opt(kw("outer")), kw("join"))),
            |_| JoinKind::Left,
        ),
        map(
            pair(kw("right"), pair(opt(kw("outer")), kw("join"))),
            |_| JoinKind::Right,
        ),
        map(
            pair(kw("full"), pair(opt(kw("outer")), kw("join"))),
            |_| JoinKind::Full,
        ),
        map(pair(kw("cross"), kw("join")), |_| JoinKind::Cross),
        map(kw("join"), |_| JoinKind::Inner),
    ))(input)
}

/// `[kind] JOIN relation [ON expr | USING (cols)]`
fn join(input: &str) -> PResult<'_, Join> {
    let (input, kind) = join_kind(input)?;
    let (input, relation) = cut(table_factor)(input)?;

    let (input, constraint) = if kind == JoinKind::Cross {
        (input, JoinConstraint::None)
    } else {
        cut(alt((
            map(preceded(kw("on"), cut(expression)), JoinConstraint::On),
            map(
                preceded(
                    kw("using"),
                    cut(delimited(ch('('), separated_list1(ch(','), identifier), ch(')'))),
                ),
                JoinConstraint::Using,
            ),
        )))(input)?
    };

    Ok((
        input,
        Join {
            relation,
            kind,
            style: JoinStyle::Explicit,
            constraint,
        },
    ))
}

/// Base table or derived table, with optional alias.
pub fn table_factor(input: &str) -> PResult<'_, TableFactor> {
    if kw("lateral")(input).is_ok() {
        return unsupported(input, "table or subquery (LATERAL is not supported)");
    }

    if let Ok((rest, _)) = ch('(')(input) {
        let (rest, subquery) = cut(terminated(query, ch(')')))(rest)?;
        let (rest, alias) = opt(table_alias)(rest)?;
        let (rest, columns) = if alias.is_some() {
            let (rest, cols) = opt(delimited(
                ch('('),
                separated_list1(ch(','), identifier),
                ch(')'),
            ))(rest)?;
            (rest, cols.unwrap_or_default())
        } else {
            (rest, vec![])
        };
        return Ok((
            rest,
            TableFactor::Derived {
                subquery: Box::new(subquery),
                alias,
                columns,
            },
        ));
    }

    let (input, name) = object_name(input)?;
    let (input, alias) = opt(table_alias)(input)?;
    Ok((input, TableFactor::Table { name, alias }))
}

/// `[AS] alias`. Reserved words never become implicit aliases.
pub fn table_alias(input: &str) -> PResult<'_, String> {
    alt((preceded(kw("as"), cut(identifier)), identifier))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_join_normalized() {
        let (_, from) = from_clause("FROM store_sales ss, item i WHERE x").unwrap();
        assert_eq!(from.joins.len(), 1);
        assert_eq!(from.joins[0].style, JoinStyle::Comma);
        assert_eq!(from.joins[0].kind, JoinKind::Inner);
        assert_eq!(from.relation.binding_name(), Some("ss"));
    }

    #[test]
    fn test_left_outer_join_using() {
        let (rest, from) =
            from_clause("FROM a LEFT OUTER JOIN b USING (k) CROSS JOIN c").unwrap();
        assert!(rest.is_empty());
        assert_eq!(from.joins[0].kind, JoinKind::Left);
        assert_eq!(
            from.joins[0].constraint,
            JoinConstraint::Using(vec!["k".into()])
        );
        assert_eq!(from.joins[1].kind, JoinKind::Cross);
    }

    #[test]
    fn test_derived_table_with_columns() {
        let (_, factor) = table_factor("(SELECT 1, 2) AS d(x, y)").unwrap();
        match factor {
            TableFactor::Derived { alias, columns, .. } => {
                assert_eq!(alias.as_deref(), Some("d"));
                assert_eq!(columns, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("expected derived table, got {other:?}"),
        }
    }

    #[test]
    fn test_join_requires_condition() {
        assert!(matches!(
            from_clause("FROM a JOIN b WHERE x = 1"),
            Err(Err::Failure(_))
        ));
    }
}
