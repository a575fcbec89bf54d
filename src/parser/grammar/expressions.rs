//! Expression parsing.
//!
//! Precedence, lowest first:
//! - OR
//! - AND
//! - NOT
//! - comparison, IS NULL, IN, BETWEEN, LIKE
//! - || (concat)
//! - + -
//! - * / %
//! - unary - +
//! - postfix `::type`

use super::base::*;
use super::functions::{case_expr, cast_expr, data_type, extract_expr, function_call};
use super::query::query;
use crate::ast::*;
use nom::{
    Err,
    branch::alt,
    combinator::{cut, map, opt, peek},
    error::context,
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated},
};

/// Parse a full expression.
pub fn expression(input: &str) -> PResult<'_, Expr> {
    context("expression", or_expr)(input)
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (input, left) = and_expr(input)?;
    binary_chain(input, left, and_expr, &[("or", BinaryOp::Or)], true)
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, left) = not_expr(input)?;
    binary_chain(input, left, not_expr, &[("and", BinaryOp::And)], true)
}

fn not_expr(input: &str) -> PResult<'_, Expr> {
    if let Ok((rest, _)) = kw("not")(input) {
        // NOT EXISTS is its own form so the extractor can see it directly.
        if let Ok((after, subquery)) = exists_subquery(rest) {
            return Ok((
                after,
                Expr::Exists {
                    subquery: Box::new(subquery),
                    negated: true,
                },
            ));
        }
        let (rest, inner) = cut(not_expr)(rest)?;
        return Ok((
            rest,
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(inner),
            },
        ));
    }
    predicate(input)
}

/// Comparison and the keyword predicates that hang off a single operand.
fn predicate(input: &str) -> PResult<'_, Expr> {
    let (input, left) = concat_expr(input)?;

    // IS [NOT] NULL
    if let Ok((rest, _)) = kw("is")(input) {
        let (rest, negated) = map(opt(kw("not")), |n| n.is_some())(rest)?;
        let (rest, _) = cut(kw("null"))(rest)?;
        return Ok((
            rest,
            Expr::IsNull {
                expr: Box::new(left),
                negated,
            },
        ));
    }

    // [NOT] IN / BETWEEN / LIKE / ILIKE
    let (after_not, negated) = match kw("not")(input) {
        Ok((rest, _)) => (rest, true),
        Err(_) => (input, false),
    };

    if let Ok((rest, _)) = kw("in")(after_not) {
        return in_suffix(rest, left, negated);
    }
    if let Ok((rest, _)) = kw("between")(after_not) {
        let (rest, low) = cut(concat_expr)(rest)?;
        let (rest, _) = cut(kw("and"))(rest)?;
        let (rest, high) = cut(concat_expr)(rest)?;
        return Ok((
            rest,
            Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            },
        ));
    }
    let like: PResult<'_, bool> = alt((map(kw("like"), |_| false), map(kw("ilike"), |_| true)))(after_not);
    if let Ok((rest, case_insensitive)) = like {
        let (rest, pattern) = cut(concat_expr)(rest)?;
        return Ok((
            rest,
            Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
                case_insensitive,
            },
        ));
    }
    if negated {
        return Err(Err::Failure(SqlError::exact(
            after_not,
            "IN, BETWEEN or LIKE after NOT",
        )));
    }

    let comparison: PResult<'_, BinaryOp> = alt((
        map(sym("<>"), |_| BinaryOp::NotEq),
        map(sym("!="), |_| BinaryOp::NotEq),
        map(sym("<="), |_| BinaryOp::LtEq),
        map(sym(">="), |_| BinaryOp::GtEq),
        map(sym("="), |_| BinaryOp::Eq),
        map(sym("<"), |_| BinaryOp::Lt),
        map(sym(">"), |_| BinaryOp::Gt),
    ))(input);
    match comparison {
        Ok((rest, op)) => {
            let (rest, right) = cut(concat_expr)(rest)?;
            Ok((rest, Expr::binary(left, op, right)))
        }
        Err(_) => Ok((input, left)),
    }
}

fn in_suffix(input: &str, left: Expr, negated: bool) -> PResult<'_, Expr> {
    let (input, _) = cut(ch('('))(input)?;

    if peek(alt((kw("select"), kw("with"))))(input).is_ok() {
        let (input, subquery) = cut(terminated(query, ch(')')))(input)?;
        return Ok((
            input,
            Expr::InSubquery {
                expr: Box::new(left),
                subquery: Box::new(subquery),
                negated,
            },
        ));
    }

    let (input, list) = cut(terminated(separated_list1(ch(','), expression), ch(')')))(input)?;
    Ok((
        input,
        Expr::InList {
            expr: Box::new(left),
            list,
            negated,
        },
    ))
}

fn concat_expr(input: &str) -> PResult<'_, Expr> {
    let (input, left) = additive_expr(input)?;
    binary_chain(input, left, additive_expr, &[("||", BinaryOp::Concat)], false)
}

fn additive_expr(input: &str) -> PResult<'_, Expr> {
    let (input, left) = multiplicative_expr(input)?;
    binary_chain(
        input,
        left,
        multiplicative_expr,
        &[("+", BinaryOp::Plus), ("-", BinaryOp::Minus)],
        false,
    )
}

fn multiplicative_expr(input: &str) -> PResult<'_, Expr> {
    let (input, left) = unary_expr(input)?;
    binary_chain(
        input,
        left,
        unary_expr,
        &[
            ("*", BinaryOp::Multiply),
            ("/", BinaryOp::Divide),
            ("%", BinaryOp::Modulo),
        ],
        false,
    )
}

/// Left-associative chain of one precedence level.
fn binary_chain<'a, F>(
    mut input: &'a str,
    mut left: Expr,
    mut operand: F,
    operators: &[(&'static str, BinaryOp)],
    keyword: bool,
) -> PResult<'a, Expr>
where
    F: FnMut(&'a str) -> PResult<'a, Expr>,
{
    'chain: loop {
        for &(token, op) in operators {
            let matched = if keyword {
                kw(token)(input)
            } else {
                sym(token)(input)
            };
            if let Ok((after_op, _)) = matched {
                let (rest, right) = cut(&mut operand)(after_op)?;
                left = Expr::binary(left, op, right);
                input = rest;
                continue 'chain;
            }
        }
        break;
    }
    Ok((input, left))
}

fn unary_expr(input: &str) -> PResult<'_, Expr> {
    let signed: PResult<'_, UnaryOp> = alt((
        map(ch('-'), |_| UnaryOp::Minus),
        map(ch('+'), |_| UnaryOp::Plus),
    ))(input);
    if let Ok((rest, op)) = signed {
        let (rest, inner) = cut(unary_expr)(rest)?;
        return Ok((
            rest,
            Expr::Unary {
                op,
                expr: Box::new(inner),
            },
        ));
    }
    postfix_expr(input)
}

/// Primary followed by any number of `::type` casts.
fn postfix_expr(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut expr) = primary(input)?;
    while let Ok((rest, _)) = sym("::")(input) {
        let (rest, ty) = cut(data_type)(rest)?;
        expr = Expr::Cast {
            expr: Box::new(expr),
            data_type: ty,
        };
        input = rest;
    }
    Ok((input, expr))
}

fn primary(input: &str) -> PResult<'_, Expr> {
    context(
        "expression",
        alt((
            parenthesized,
            map(exists_subquery, |q| Expr::Exists {
                subquery: Box::new(q),
                negated: false,
            }),
            case_expr,
            cast_expr,
            extract_expr,
            interval_expr,
            typed_literal,
            map(literal, Expr::Literal),
            niladic_function,
            map(ch('*'), |_| Expr::Star),
            function_call,
            column_ref,
        )),
    )(input)
}

/// `( subquery )` or `( expression )`.
fn parenthesized(input: &str) -> PResult<'_, Expr> {
    let (inner, _) = ch('(')(input)?;
    if starts_query(inner) {
        let sub: PResult<'_, Query> = terminated(query, ch(')'))(inner);
        match sub {
            Ok((rest, q)) => return Ok((rest, Expr::Subquery(Box::new(q)))),
            // `((SELECT ..) + 1)` reaches here through the nested set operand.
            Err(Err::Failure(e)) if ch('(')(inner).is_err() => return Err(Err::Failure(e)),
            Err(_) => {}
        }
    }
    let (rest, expr) = cut(terminated(expression, ch(')')))(inner)?;
    Ok((rest, Expr::Nested(Box::new(expr))))
}

/// True when `input`, after any run of opening parentheses, begins a query.
fn starts_query(input: &str) -> bool {
    let mut rest = input;
    while let Ok((next, _)) = ch('(')(rest) {
        rest = next;
    }
    peek(alt((kw("select"), kw("with"))))(rest).is_ok()
}

/// `EXISTS ( subquery )` without the NOT.
fn exists_subquery(input: &str) -> PResult<'_, Query> {
    preceded(kw("exists"), cut(delimited(ch('('), query, ch(')'))))(input)
}

fn interval_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = kw("interval")(input)?;
    let (input, value) = cut(alt((string_literal, number)))(input)?;
    let (input, unit) = opt(interval_unit)(input)?;
    Ok((input, Expr::Interval { value, unit }))
}

fn interval_unit(input: &str) -> PResult<'_, String> {
    let units = [
        "years", "year", "months", "month", "days", "day", "hours", "hour", "minutes", "minute",
        "seconds", "second",
    ];
    for unit in units {
        if let Ok((rest, _)) = kw(unit)(input) {
            return Ok((rest, unit.to_string()));
        }
    }
    Err(Err::Error(SqlError::new(input, "interval unit")))
}

/// `DATE '1998-12-01'`, `TIMESTAMP '...'`
fn typed_literal(input: &str) -> PResult<'_, Expr> {
    let (input, data_type) = alt((kw("date"), kw("timestamp"), kw("time")))(input)?;
    let (input, value) = string_literal(input)?;
    Ok((
        input,
        Expr::Literal(Literal::Typed {
            data_type: data_type.to_lowercase(),
            value,
        }),
    ))
}

/// `CURRENT_DATE` and friends, written without parentheses.
fn niladic_function(input: &str) -> PResult<'_, Expr> {
    let (input, name) = alt((
        kw("current_date"),
        kw("current_timestamp"),
        kw("current_time"),
    ))(input)?;
    Ok((
        input,
        Expr::Function(Function {
            name: name.to_lowercase(),
            args: vec![],
            distinct: false,
            filter: None,
            over: None,
        }),
    ))
}

/// `col`, `t.col` or `schema.t.col` (only the last qualifier is kept).
fn column_ref(input: &str) -> PResult<'_, Expr> {
    let (mut input, first) = identifier(input)?;
    let mut parts = vec![first];
    loop {
        let next: PResult<'_, String> = preceded(ch('.'), identifier)(input);
        match next {
            Ok((rest, part)) => {
                parts.push(part);
                input = rest;
            }
            Err(Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }

    let name = parts.pop().unwrap_or_default();
    let qualifier = parts.pop();
    Ok((input, Expr::Column { qualifier, name }))
}

/// Comma-separated expressions.
pub fn expression_list(input: &str) -> PResult<'_, Vec<Expr>> {
    separated_list1(ch(','), expression)(input)
}

/// `expr [ASC|DESC] [NULLS FIRST|LAST]`
pub fn order_by_expr(input: &str) -> PResult<'_, OrderByExpr> {
    let (input, expr) = expression(input)?;
    let (input, direction) = opt(alt((map(kw("asc"), |_| false), map(kw("desc"), |_| true))))(input)?;
    let (input, nulls) = opt(preceded(
        kw("nulls"),
        cut(alt((map(kw("first"), |_| true), map(kw("last"), |_| false)))),
    ))(input)?;
    Ok((
        input,
        OrderByExpr {
            expr,
            descending: direction.unwrap_or(false),
            nulls_first: nulls,
        },
    ))
}

/// `ORDER BY item, ...`
pub fn order_by_clause(input: &str) -> PResult<'_, Vec<OrderByExpr>> {
    preceded(
        pair(kw("order"), kw("by")),
        cut(separated_list1(ch(','), order_by_expr)),
    )(input)
}
