use super::expr::{Expr, OrderByExpr};
use serde::{Deserialize, Serialize};

/// A complete statement: an optional WITH list followed by the final query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub ctes: Vec<CteDef>,
    pub query: Query,
}

/// A single CTE definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CteDef {
    pub name: String,
    /// Explicit column aliases: `name(a, b) AS (...)`.
    pub columns: Vec<String>,
    /// `Some(true)` for MATERIALIZED, `Some(false)` for NOT MATERIALIZED.
    pub materialized: Option<bool>,
    pub query: Query,
    /// 0-based definition order.
    pub position: usize,
}

/// A query block with its trailing ORDER BY / LIMIT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub body: SetExpr,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    /// Wrap a bare SELECT.
    pub fn select(select: Select) -> Self {
        Self {
            body: SetExpr::Select(Box::new(select)),
            order_by: vec![],
            limit: None,
            offset: None,
        }
    }

    /// Left-most SELECT of the body; it determines output column names.
    pub fn first_select(&self) -> &Select {
        self.body.first_select()
    }
}

/// Body of a query: a SELECT, a set operation, or a parenthesized query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetExpr {
    Select(Box<Select>),
    SetOp {
        op: SetOperator,
        all: bool,
        left: Box<SetExpr>,
        right: Box<SetExpr>,
    },
    Nested(Box<Query>),
}

impl SetExpr {
    pub fn first_select(&self) -> &Select {
        match self {
            SetExpr::Select(s) => s,
            SetExpr::SetOp { left, .. } => left.first_select(),
            SetExpr::Nested(q) => q.first_select(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

impl std::fmt::Display for SetOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetOperator::Union => write!(f, "UNION"),
            SetOperator::Intersect => write!(f, "INTERSECT"),
            SetOperator::Except => write!(f, "EXCEPT"),
        }
    }
}

/// A SELECT block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Option<FromClause>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub qualify: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<String> },
    /// `*` or `t.*`
    Wildcard { qualifier: Option<String> },
}

/// FROM clause normalized to a leading relation plus a join list.
///
/// `FROM a, b` becomes a [`JoinKind::Inner`] join with no constraint and
/// [`JoinStyle::Comma`]; `FROM a CROSS JOIN b` becomes [`JoinKind::Cross`]
/// with [`JoinStyle::Explicit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromClause {
    pub relation: TableFactor,
    pub joins: Vec<Join>,
}

impl FromClause {
    /// All relations in FROM order.
    pub fn relations(&self) -> impl Iterator<Item = &TableFactor> {
        std::iter::once(&self.relation).chain(self.joins.iter().map(|j| &j.relation))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableFactor {
    Table {
        /// Lowercased, possibly schema-qualified (`schema.table`).
        name: String,
        alias: Option<String>,
    },
    Derived {
        subquery: Box<Query>,
        alias: Option<String>,
        columns: Vec<String>,
    },
}

impl TableFactor {
    /// Name used to qualify columns of this relation.
    pub fn binding_name(&self) -> Option<&str> {
        match self {
            TableFactor::Table { name, alias } => Some(
                alias
                    .as_deref()
                    .unwrap_or_else(|| name.rsplit('.').next().unwrap_or(name)),
            ),
            TableFactor::Derived { alias, .. } => alias.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub relation: TableFactor,
    pub kind: JoinKind,
    pub style: JoinStyle,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// Which syntax produced a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStyle {
    /// `FROM a, b`
    Comma,
    /// `a [kind] JOIN b`
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinConstraint {
    On(Expr),
    Using(Vec<String>),
    None,
}
