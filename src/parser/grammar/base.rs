//! Tokens shared by every grammar module: the error type, keywords,
//! identifiers and literals.
//!
//! Every token parser skips leading whitespace itself, so grammar rules never
//! thread `multispace0` between tokens.

use crate::ast::Literal;
use nom::{
    Err, IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{map, opt, recognize},
    error::{ContextError, ErrorKind, FromExternalError, ParseError},
    sequence::{pair, preceded, tuple},
};
use std::borrow::Cow;

/// Parser error that remembers the furthest failure and what was expected there.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlError<'a> {
    pub input: &'a str,
    pub expected: Cow<'static, str>,
    labelled: bool,
}

impl<'a> SqlError<'a> {
    pub fn new(input: &'a str, expected: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input,
            expected: expected.into(),
            labelled: false,
        }
    }

    /// An error that no enclosing context may relabel.
    pub fn exact(input: &'a str, expected: impl Into<Cow<'static, str>>) -> Self {
        Self {
            input,
            expected: expected.into(),
            labelled: true,
        }
    }
}

impl<'a> ParseError<&'a str> for SqlError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        Self::new(input, kind.description().to_lowercase())
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    fn from_char(input: &'a str, c: char) -> Self {
        Self::exact(input, format!("'{}'", c))
    }

    fn or(self, other: Self) -> Self {
        // Keep whichever branch got further.
        if other.input.len() <= self.input.len() {
            other
        } else {
            self
        }
    }
}

impl<'a> ContextError<&'a str> for SqlError<'a> {
    fn add_context(_input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        if !other.labelled {
            other.expected = Cow::Borrowed(ctx);
            other.labelled = true;
        }
        other
    }
}

impl<'a, E> FromExternalError<&'a str, E> for SqlError<'a> {
    fn from_external_error(input: &'a str, kind: ErrorKind, _e: E) -> Self {
        Self::from_error_kind(input, kind)
    }
}

pub type PResult<'a, T> = IResult<&'a str, T, SqlError<'a>>;

/// Abort parsing with a non-recoverable error.
pub fn unsupported<'a, T>(input: &'a str, what: &'static str) -> PResult<'a, T> {
    let (at, _) = multispace0::<_, SqlError<'a>>(input).unwrap_or((input, ""));
    Err(Err::Failure(SqlError::exact(at, what)))
}

/// Words that never start an identifier or an implicit alias.
const RESERVED: &[&str] = &[
    "all",
    "and",
    "as",
    "asc",
    "between",
    "by",
    "case",
    "cross",
    "desc",
    "distinct",
    "else",
    "end",
    "except",
    "exists",
    "false",
    "fetch",
    "from",
    "full",
    "group",
    "having",
    "ilike",
    "in",
    "inner",
    "intersect",
    "is",
    "join",
    "lateral",
    "left",
    "like",
    "limit",
    "natural",
    "not",
    "null",
    "nulls",
    "offset",
    "on",
    "or",
    "order",
    "outer",
    "over",
    "qualify",
    "recursive",
    "right",
    "select",
    "then",
    "true",
    "union",
    "using",
    "when",
    "where",
    "window",
    "with",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Case-insensitive keyword that must not run into an identifier character.
pub fn kw<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        let (start, _) = multispace0(input)?;
        let matched: PResult<'a, &'a str> = tag_no_case(word)(start);
        match matched {
            Ok((rest, found)) if !rest.chars().next().is_some_and(is_ident_char) => {
                Ok((rest, found))
            }
            _ => Err(Err::Error(SqlError::new(start, word.to_uppercase()))),
        }
    }
}

/// Punctuation or operator token.
pub fn sym<'a>(token: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        let (start, _) = multispace0(input)?;
        let matched: PResult<'a, &'a str> = tag(token)(start);
        matched.map_err(|_| Err::Error(SqlError::exact(start, format!("'{}'", token))))
    }
}

/// Single punctuation character.
pub fn ch<'a>(c: char) -> impl FnMut(&'a str) -> PResult<'a, char> {
    move |input: &'a str| preceded(multispace0, char(c))(input)
}

/// Unquoted or double-quoted identifier. Unquoted names are lowercased.
pub fn identifier(input: &str) -> PResult<'_, String> {
    let (start, _) = multispace0(input)?;
    alt((quoted_identifier, bare_identifier))(start)
}

fn bare_identifier(input: &str) -> PResult<'_, String> {
    let (rest, word) = recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
    .map_err(|_: Err<SqlError<'_>>| Err::Error(SqlError::new(input, "identifier")))?;

    if is_reserved(word) {
        return Err(Err::Error(SqlError::new(input, "identifier")));
    }
    Ok((rest, word.to_lowercase()))
}

fn quoted_identifier(input: &str) -> PResult<'_, String> {
    let (open, quote) = one_of("\"`")(input)?;
    match open.find(quote) {
        Some(end) if end > 0 => Ok((&open[end + 1..], open[..end].to_string())),
        _ => Err(Err::Failure(SqlError::exact(input, "closed quoted identifier"))),
    }
}

/// Dotted name such as `schema.table`.
pub fn object_name(input: &str) -> PResult<'_, String> {
    let (mut rest, first) = identifier(input)?;
    let mut name = first;
    loop {
        let next: PResult<'_, String> = preceded(ch('.'), identifier)(rest);
        match next {
            Ok((after, part)) => {
                name.push('.');
                name.push_str(&part);
                rest = after;
            }
            Err(Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((rest, name))
}

/// Unsigned integer token.
pub fn unsigned(input: &str) -> PResult<'_, u64> {
    let (start, _) = multispace0(input)?;
    let (rest, digits) = digit1(start)?;
    match digits.parse::<u64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(Err::Failure(SqlError::exact(start, "integer in range"))),
    }
}

/// Numeric literal text: `12`, `1.5`, `.5`, `1e-3`.
pub fn number(input: &str) -> PResult<'_, String> {
    let (start, _) = multispace0(input)?;
    let exponent = tuple((one_of("eE"), opt(one_of("+-")), digit1));
    let (rest, text) = alt((
        recognize(tuple((digit1, opt(pair(char('.'), digit0)), opt(exponent)))),
        recognize(pair(char('.'), digit1)),
    ))(start)?;
    if rest.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
        return Err(Err::Error(SqlError::new(start, "number")));
    }
    Ok((rest, text.to_string()))
}

/// Single-quoted string with `''` escapes.
pub fn string_literal(input: &str) -> PResult<'_, String> {
    let (start, _) = multispace0(input)?;
    let (body, _) = char('\'')(start)?;

    let mut value = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if let Some((_, '\'')) = chars.peek() {
                value.push('\'');
                chars.next();
                continue;
            }
            return Ok((&body[i + 1..], value));
        }
        value.push(c);
    }
    Err(Err::Failure(SqlError::exact(start, "closing quote")))
}

/// Number, string, boolean or NULL.
pub fn literal(input: &str) -> PResult<'_, Literal> {
    alt((
        map(number, Literal::Number),
        map(string_literal, Literal::String),
        map(kw("true"), |_| Literal::Boolean(true)),
        map(kw("false"), |_| Literal::Boolean(false)),
        map(kw("null"), |_| Literal::Null),
    ))(input)
}

/// Replace comments with spaces, keeping every byte offset intact.
pub fn blank_comments(sql: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str,
        Ident,
        Line,
        Block,
    }

    let mut out = String::with_capacity(sql.len());
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();

    let blank = |out: &mut String, c: char| {
        if c == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat_n(' ', c.len_utf8()));
        }
    };

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::Line;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::Block;
                }
                '\'' => {
                    out.push(c);
                    state = State::Str;
                }
                '"' => {
                    out.push(c);
                    state = State::Ident;
                }
                _ => out.push(c),
            },
            State::Str => {
                out.push(c);
                if c == '\'' {
                    state = State::Code;
                }
            }
            State::Ident => {
                out.push(c);
                if c == '"' {
                    state = State::Code;
                }
            }
            State::Line => {
                blank(&mut out, c);
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    blank(&mut out, c);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_boundary() {
        assert!(kw("select")("  SELECT a").is_ok());
        assert!(kw("select")("selector").is_err());
    }

    #[test]
    fn test_identifier_rejects_reserved() {
        assert_eq!(identifier(" Store_Sales x").unwrap().1, "store_sales");
        assert!(identifier("from t").is_err());
        assert_eq!(identifier("\"From\"").unwrap().1, "From");
    }

    #[test]
    fn test_string_escape() {
        let (rest, s) = string_literal("'it''s' tail").unwrap();
        assert_eq!(s, "it's");
        assert_eq!(rest, " tail");
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(number("1.5e3").unwrap().1, "1.5e3");
        assert_eq!(number(" .25").unwrap().1, ".25");
        assert!(number("12abc").is_err());
    }

    #[test]
    fn test_blank_comments_keeps_offsets() {
        let sql = "SELECT 1 -- note\nFROM t /* x\ny */ WHERE '--' = a";
        let cleaned = blank_comments(sql);
        assert_eq!(cleaned.len(), sql.len());
        assert!(!cleaned.contains("note"));
        assert!(cleaned.contains("'--'"));
        assert_eq!(cleaned.matches('\n').count(), 2);
    }
}
