use super::query::Query;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column {
        qualifier: Option<String>,
        name: String,
    },
    /// `*` inside a call such as `count(*)`.
    Star,
    Literal(Literal),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Query>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
    Exists {
        subquery: Box<Query>,
        negated: bool,
    },
    /// Scalar subquery.
    Subquery(Box<Query>),
    Function(Function),
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: String,
    },
    Extract {
        field: String,
        expr: Box<Expr>,
    },
    Interval {
        value: String,
        unit: Option<String>,
    },
    Nested(Box<Expr>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Direct sub-expressions. Does not descend into subqueries.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. }
            | Expr::Star
            | Expr::Literal(_)
            | Expr::Interval { .. }
            | Expr::Exists { .. }
            | Expr::Subquery(_) => vec![],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Unary { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Extract { expr, .. }
            | Expr::Nested(expr)
            | Expr::InSubquery { expr, .. } => vec![expr.as_ref()],
            Expr::InList { expr, list, .. } => {
                let mut out: Vec<&Expr> = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            Expr::Like { expr, pattern, .. } => vec![expr.as_ref(), pattern.as_ref()],
            Expr::Function(f) => {
                let mut out: Vec<&Expr> = f.args.iter().collect();
                if let Some(filter) = &f.filter {
                    out.push(filter.as_ref());
                }
                if let Some(over) = &f.over {
                    out.extend(over.partition_by.iter());
                    out.extend(over.order_by.iter().map(|o| &o.expr));
                }
                out
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                let mut out: Vec<&Expr> = Vec::new();
                if let Some(op) = operand {
                    out.push(op.as_ref());
                }
                for (when, then) in branches {
                    out.push(when);
                    out.push(then);
                }
                if let Some(e) = else_result {
                    out.push(e.as_ref());
                }
                out
            }
        }
    }

    /// Subquery held directly by this expression, with its form.
    pub fn subquery(&self) -> Option<(&Query, SubqueryForm)> {
        match self {
            Expr::Subquery(q) => Some((q.as_ref(), SubqueryForm::Scalar)),
            Expr::Exists { subquery, negated } => Some((
                subquery.as_ref(),
                if *negated {
                    SubqueryForm::NotExists
                } else {
                    SubqueryForm::Exists
                },
            )),
            Expr::InSubquery {
                subquery, negated, ..
            } => Some((
                subquery.as_ref(),
                if *negated {
                    SubqueryForm::NotIn
                } else {
                    SubqueryForm::In
                },
            )),
            _ => None,
        }
    }

    /// Split a conjunction into its conjuncts.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            Expr::Nested(inner) => {
                let parts = inner.conjuncts();
                if parts.len() > 1 { parts } else { vec![self] }
            }
            _ => vec![self],
        }
    }

    /// Split a disjunction into its branches.
    pub fn disjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                left,
                op: BinaryOp::Or,
                right,
            } => {
                let mut out = left.disjuncts();
                out.extend(right.disjuncts());
                out
            }
            Expr::Nested(inner) => {
                let parts = inner.disjuncts();
                if parts.len() > 1 { parts } else { vec![self] }
            }
            _ => vec![self],
        }
    }

    /// Column references in this expression, excluding subqueries.
    pub fn columns(&self) -> Vec<(Option<&str>, &str)> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<(Option<&'a str>, &'a str)>) {
        if let Expr::Column { qualifier, name } = self {
            out.push((qualifier.as_deref(), name.as_str()));
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Interval { .. } => true,
            Expr::Unary { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
                expr.is_literal()
            }
            _ => false,
        }
    }
}

/// Syntactic form of an expression subquery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubqueryForm {
    Scalar,
    Exists,
    NotExists,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(String),
    String(String),
    Boolean(bool),
    Null,
    /// `DATE '...'`, `TIMESTAMP '...'`
    Typed { data_type: String, value: String },
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "NULL"),
            Literal::Typed { data_type, value } => write!(f, "{} '{}'", data_type, value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Concat => "||",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Lowercased function name.
    pub name: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
    pub filter: Option<Box<Expr>>,
    pub over: Option<WindowSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub frame: Option<WindowFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFrame {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: Option<FrameBound>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameUnits {
    Rows,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub descending: bool,
    pub nulls_first: Option<bool>,
}
