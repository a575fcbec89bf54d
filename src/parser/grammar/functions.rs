//! Function calls and the special forms that look like them.
//!
//! Handles:
//! - name(arg, ...), with DISTINCT and `count(*)`
//! - FILTER (WHERE ...) on aggregates
//! - OVER (PARTITION BY ... ORDER BY ... ROWS/RANGE ...)
//! - CASE, CAST, EXTRACT and SUBSTRING ... FROM ... FOR

use super::base::*;
use super::expressions::{expression, expression_list, order_by_expr};
use crate::ast::*;
use nom::{
    Err,
    branch::alt,
    character::complete::{digit1, multispace0},
    combinator::{cut, map, opt, recognize},
    multi::{many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
};

/// `name(args) [FILTER (WHERE ...)] [OVER (...)]`
pub fn function_call(input: &str) -> PResult<'_, Expr> {
    let (input, name) = object_name(input)?;
    let (input, _) = ch('(')(input)?;

    if name == "substring" || name == "substr" {
        if let Ok(done) = substring_from_for(input, &name) {
            return Ok(done);
        }
    }

    let (input, distinct) = map(opt(kw("distinct")), |d| d.is_some())(input)?;
    let (input, args) = cut(terminated(separated_list0(ch(','), expression), ch(')')))(input)?;

    let (input, filter) = opt(delimited(
        pair(kw("filter"), ch('(')),
        cut(preceded(kw("where"), expression)),
        cut(ch(')')),
    ))(input)?;

    let (input, over) = opt(preceded(kw("over"), cut(window_spec)))(input)?;

    Ok((
        input,
        Expr::Function(Function {
            name,
            args,
            distinct,
            filter: filter.map(Box::new),
            over,
        }),
    ))
}

/// `substring(x FROM a [FOR b])`, normalized to positional arguments.
fn substring_from_for<'a>(input: &'a str, name: &str) -> PResult<'a, Expr> {
    let (input, value) = expression(input)?;
    let (input, _) = kw("from")(input)?;
    let (input, start) = cut(expression)(input)?;
    let (input, len) = opt(preceded(kw("for"), cut(expression)))(input)?;
    let (input, _) = cut(ch(')'))(input)?;

    let mut args = vec![value, start];
    args.extend(len);
    Ok((
        input,
        Expr::Function(Function {
            name: name.to_string(),
            args,
            distinct: false,
            filter: None,
            over: None,
        }),
    ))
}

fn window_spec(input: &str) -> PResult<'_, WindowSpec> {
    let (input, _) = ch('(')(input)?;
    if terminated(identifier, ch(')'))(input).is_ok() {
        return unsupported(input, "inline window specification (named windows are not supported)");
    }

    let (input, partition_by) = opt(preceded(
        pair(kw("partition"), kw("by")),
        cut(expression_list),
    ))(input)?;
    let (input, order_by) = opt(preceded(
        pair(kw("order"), kw("by")),
        cut(separated_list1(ch(','), order_by_expr)),
    ))(input)?;
    let (input, frame) = opt(window_frame)(input)?;
    let (input, _) = cut(ch(')'))(input)?;

    Ok((
        input,
        WindowSpec {
            partition_by: partition_by.unwrap_or_default(),
            order_by: order_by.unwrap_or_default(),
            frame,
        },
    ))
}

/// `ROWS|RANGE bound` or `ROWS|RANGE BETWEEN bound AND bound`
fn window_frame(input: &str) -> PResult<'_, WindowFrame> {
    let (input, units) = alt((
        map(kw("rows"), |_| FrameUnits::Rows),
        map(kw("range"), |_| FrameUnits::Range),
    ))(input)?;

    if let Ok((rest, _)) = kw("between")(input) {
        let (rest, start) = cut(frame_bound)(rest)?;
        let (rest, _) = cut(kw("and"))(rest)?;
        let (rest, end) = cut(frame_bound)(rest)?;
        return Ok((
            rest,
            WindowFrame {
                units,
                start,
                end: Some(end),
            },
        ));
    }

    let (input, start) = cut(frame_bound)(input)?;
    Ok((
        input,
        WindowFrame {
            units,
            start,
            end: None,
        },
    ))
}

fn frame_bound(input: &str) -> PResult<'_, FrameBound> {
    alt((
        map(pair(kw("unbounded"), kw("preceding")), |_| {
            FrameBound::UnboundedPreceding
        }),
        map(pair(kw("unbounded"), kw("following")), |_| {
            FrameBound::UnboundedFollowing
        }),
        map(pair(kw("current"), kw("row")), |_| FrameBound::CurrentRow),
        map(terminated(unsigned, kw("preceding")), FrameBound::Preceding),
        map(terminated(unsigned, kw("following")), FrameBound::Following),
    ))(input)
}

/// `CASE [operand] WHEN ... THEN ... [ELSE ...] END`
pub fn case_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = kw("case")(input)?;
    let (input, operand) = opt(case_operand)(input)?;

    let (input, branches) = cut(many1(pair(
        preceded(kw("when"), cut(expression)),
        preceded(cut(kw("then")), cut(expression)),
    )))(input)?;
    let (input, else_result) = opt(preceded(kw("else"), cut(expression)))(input)?;
    let (input, _) = cut(kw("end"))(input)?;

    Ok((
        input,
        Expr::Case {
            operand: operand.map(Box::new),
            branches,
            else_result: else_result.map(Box::new),
        },
    ))
}

fn case_operand(input: &str) -> PResult<'_, Expr> {
    // A searched CASE goes straight to WHEN.
    if kw("when")(input).is_ok() {
        return Err(Err::Error(SqlError::new(input, "operand")));
    }
    expression(input)
}

/// `CAST(expr AS type)`, also `TRY_CAST`.
pub fn cast_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = alt((kw("cast"), kw("try_cast")))(input)?;
    let (input, _) = ch('(')(input)?;
    let (input, expr) = cut(expression)(input)?;
    let (input, _) = cut(kw("as"))(input)?;
    let (input, data_type) = cut(data_type)(input)?;
    let (input, _) = cut(ch(')'))(input)?;
    Ok((
        input,
        Expr::Cast {
            expr: Box::new(expr),
            data_type,
        },
    ))
}

/// `EXTRACT(field FROM expr)`
pub fn extract_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = kw("extract")(input)?;
    let (input, _) = ch('(')(input)?;
    let (input, field) = cut(identifier)(input)?;
    let (input, _) = cut(kw("from"))(input)?;
    let (input, expr) = cut(expression)(input)?;
    let (input, _) = cut(ch(')'))(input)?;
    Ok((
        input,
        Expr::Extract {
            field,
            expr: Box::new(expr),
        },
    ))
}

/// Type name with optional precision: `decimal(7, 2)`, `varchar(20)`,
/// `double precision`.
pub fn data_type(input: &str) -> PResult<'_, String> {
    let (input, mut name) = identifier(input)?;
    let (input, extra) = opt(kw("precision"))(input)?;
    if extra.is_some() {
        name.push_str(" precision");
    }
    let (input, args) = opt(delimited(
        ch('('),
        separated_list1(ch(','), preceded(multispace0, recognize(digit1))),
        ch(')'),
    ))(input)?;
    if let Some(args) = args {
        name = format!("{}({})", name, args.join(","));
    }
    Ok((input, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_distinct_with_filter() {
        let (_, expr) = function_call("count(DISTINCT ss_item_sk) FILTER (WHERE x > 1)").unwrap();
        match expr {
            Expr::Function(f) => {
                assert_eq!(f.name, "count");
                assert!(f.distinct);
                assert!(f.filter.is_some());
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_window_with_frame() {
        let sql = "sum(x) OVER (PARTITION BY a ORDER BY b ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW)";
        let (rest, expr) = function_call(sql).unwrap();
        assert!(rest.is_empty());
        let Expr::Function(f) = expr else {
            panic!("expected function");
        };
        let over = f.over.unwrap();
        assert_eq!(over.partition_by.len(), 1);
        assert_eq!(
            over.frame.unwrap().start,
            FrameBound::UnboundedPreceding
        );
    }

    #[test]
    fn test_cast_with_precision() {
        let (_, expr) = cast_expr("CAST(x AS decimal(7, 2))").unwrap();
        assert!(matches!(expr, Expr::Cast { ref data_type, .. } if data_type == "decimal(7,2)"));
    }

    #[test]
    fn test_searched_case() {
        let (_, expr) = case_expr("CASE WHEN a > 1 THEN 'x' ELSE 'y' END").unwrap();
        assert!(matches!(expr, Expr::Case { operand: None, .. }));
    }

    #[test]
    fn test_named_window_rejected() {
        assert!(matches!(function_call("rank() OVER w"), Err(Err::Failure(_)) | Err(Err::Error(_))));
        assert!(matches!(function_call("rank() OVER (w)"), Err(Err::Failure(_))));
    }
}
