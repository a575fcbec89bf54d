//! SQL parser built on nom.
//!
//! Accepts one analytical SELECT statement, optionally preceded by a WITH
//! list and followed by a single `;`.
//!
//! ```text
//! WITH totals AS (SELECT ...)      -> Statement.ctes[0]
//! SELECT ... FROM totals ...       -> Statement.query
//! ```

pub mod grammar;

#[cfg(test)]
mod tests;

use crate::ast::Statement;
use crate::error::{ParseError, ParseResult};
use nom::Err;

/// Parse a complete SQL statement.
///
/// Comments are blanked before parsing, so error offsets always point into
/// the text the caller passed in.
pub fn parse(sql: &str) -> ParseResult<Statement> {
    let cleaned = grammar::blank_comments(sql);
    let offset_of = |rest: &str| cleaned.len() - rest.len();

    match grammar::statement(&cleaned) {
        Ok((rest, stmt)) => {
            let tail = rest.trim_start();
            let tail = tail.strip_prefix(';').unwrap_or(tail);
            if tail.trim().is_empty() {
                tracing::debug!("Parsed statement with {} CTE(s)", stmt.ctes.len());
                Ok(stmt)
            } else {
                Err(ParseError::at(sql, offset_of(rest.trim_start()), "end of statement"))
            }
        }
        Err(Err::Error(e)) | Err(Err::Failure(e)) => {
            let at = offset_of(e.input.trim_start());
            Err(ParseError::at(sql, at, e.expected.into_owned()))
        }
        Err(Err::Incomplete(_)) => Err(ParseError::at(sql, sql.len(), "complete statement")),
    }
}
