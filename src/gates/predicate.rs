//! Gate predicate language.
//!
//! A closed set of checks, tagged by `check` in catalog files:
//!
//! ```toml
//! predicate = { check = "flag", flag = "has_exists", expect = false, quantifier = "all" }
//! predicate = { check = "graph_count", metric = "multi_use_cte_count", min = 1 }
//! predicate = { check = "any", checks = [
//!     { check = "signal", key = "hash_join_on_correlation_key", op = "eq", value = false },
//!     { check = "cost", min_weight = 0.3 },
//! ] }
//! ```
//!
//! Node checks apply to the pathology's candidate nodes; `quantifier`
//! says whether one candidate (`any`, the default) or every candidate
//! (`all`) must satisfy them.

use crate::graph::{CostSource, GraphMetric, NodeKind, QueryGraph, QueryNode};
use crate::plan::{PlanFeatures, SignalValue};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Predicate {
    Flag {
        flag: Flag,
        #[serde(default = "default_expect")]
        expect: bool,
        #[serde(default)]
        quantifier: Quantifier,
    },
    NodeCount {
        metric: NodeMetric,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
        #[serde(default)]
        quantifier: Quantifier,
    },
    GraphCount {
        metric: GraphMetric,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    /// An OR tree whose disjuncts constrain two or more distinct column sets.
    OrOnDistinctColumns {
        #[serde(default)]
        quantifier: Quantifier,
    },
    Signal {
        key: String,
        op: SignalOp,
        value: SignalValue,
        #[serde(default)]
        when_missing: WhenMissing,
    },
    Cost {
        min_weight: f64,
        #[serde(default)]
        require_measured: bool,
    },
    All {
        checks: Vec<Predicate>,
    },
    Any {
        checks: Vec<Predicate>,
    },
    Not {
        inner: Box<Predicate>,
    },
}

fn default_expect() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    #[default]
    Any,
    All,
}

/// Boolean node properties a `flag` check can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    HasGroupBy,
    HasWindowFunction,
    HasUnionAll,
    HasSetOp,
    HasExists,
    HasNotExists,
    HasLeftJoin,
    HasCommaJoin,
    SelfJoin,
    /// CTE referenced two or more times.
    MultiUse,
    /// CTE referenced nowhere.
    Orphaned,
    Correlated,
    Materialized,
}

impl Flag {
    pub fn name(&self) -> &'static str {
        match self {
            Flag::HasGroupBy => "has_group_by",
            Flag::HasWindowFunction => "has_window_function",
            Flag::HasUnionAll => "has_union_all",
            Flag::HasSetOp => "has_set_op",
            Flag::HasExists => "has_exists",
            Flag::HasNotExists => "has_not_exists",
            Flag::HasLeftJoin => "has_left_join",
            Flag::HasCommaJoin => "has_comma_join",
            Flag::SelfJoin => "self_join",
            Flag::MultiUse => "multi_use",
            Flag::Orphaned => "orphaned",
            Flag::Correlated => "correlated",
            Flag::Materialized => "materialized",
        }
    }

    pub fn of(&self, node: &QueryNode) -> bool {
        let f = &node.flags;
        match self {
            Flag::HasGroupBy => f.has_group_by,
            Flag::HasWindowFunction => f.has_window_function,
            Flag::HasUnionAll => f.has_union_all,
            Flag::HasSetOp => f.has_set_op,
            Flag::HasExists => f.has_exists,
            Flag::HasNotExists => f.has_not_exists,
            Flag::HasLeftJoin => f.has_left_join,
            Flag::HasCommaJoin => f.has_comma_join,
            Flag::SelfJoin => f.self_join,
            Flag::MultiUse => node.is_multi_use(),
            Flag::Orphaned => node.is_cte() && f.cte_reference_count == 0,
            Flag::Correlated => node.is_correlated(),
            Flag::Materialized => matches!(
                node.kind,
                NodeKind::Cte {
                    materialized: Some(true),
                    ..
                }
            ),
        }
    }
}

/// Per-node counters a `node_count` check can bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMetric {
    OrBranchCount,
    TableRefs,
    JoinCount,
    CteReferenceCount,
    LateFilterCount,
    /// Highest graph-wide occurrence count among the node's base tables.
    MaxTableOccurrence,
    UnionCount,
    UnionAllCount,
    ExistsCount,
    NotExistsCount,
    WindowCount,
    Dependencies,
}

impl NodeMetric {
    pub fn name(&self) -> &'static str {
        match self {
            NodeMetric::OrBranchCount => "or_branch_count",
            NodeMetric::TableRefs => "table_refs",
            NodeMetric::JoinCount => "join_count",
            NodeMetric::CteReferenceCount => "cte_reference_count",
            NodeMetric::LateFilterCount => "late_filter_count",
            NodeMetric::MaxTableOccurrence => "max_table_occurrence",
            NodeMetric::UnionCount => "union_count",
            NodeMetric::UnionAllCount => "union_all_count",
            NodeMetric::ExistsCount => "exists_count",
            NodeMetric::NotExistsCount => "not_exists_count",
            NodeMetric::WindowCount => "window_count",
            NodeMetric::Dependencies => "dependencies",
        }
    }

    pub fn of(&self, node: &QueryNode) -> usize {
        let f = &node.flags;
        match self {
            NodeMetric::OrBranchCount => f.or_branch_count,
            NodeMetric::TableRefs => f.table_refs,
            NodeMetric::JoinCount => f.joins.total(),
            NodeMetric::CteReferenceCount => f.cte_reference_count,
            NodeMetric::LateFilterCount => f.late_filter_count,
            NodeMetric::MaxTableOccurrence => {
                f.distinct_table_refs.values().copied().max().unwrap_or(0)
            }
            NodeMetric::UnionCount => f.union_count,
            NodeMetric::UnionAllCount => f.union_all_count,
            NodeMetric::ExistsCount => f.exists_count,
            NodeMetric::NotExistsCount => f.not_exists_count,
            NodeMetric::WindowCount => f.window_count,
            NodeMetric::Dependencies => node.dependencies.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl SignalOp {
    fn symbol(&self) -> &'static str {
        match self {
            SignalOp::Eq => "=",
            SignalOp::Ne => "!=",
            SignalOp::Gt => ">",
            SignalOp::Ge => ">=",
            SignalOp::Lt => "<",
            SignalOp::Le => "<=",
        }
    }

    /// `None` when the values cannot be compared with this operator.
    fn apply(&self, actual: &SignalValue, expected: &SignalValue) -> Option<bool> {
        use std::cmp::Ordering;
        let ordering = match (actual, expected) {
            (SignalValue::Number(a), SignalValue::Number(b)) => a.partial_cmp(b)?,
            (SignalValue::Text(a), SignalValue::Text(b)) => a.cmp(b),
            (SignalValue::Bool(a), SignalValue::Bool(b)) => {
                return match self {
                    SignalOp::Eq => Some(a == b),
                    SignalOp::Ne => Some(a != b),
                    _ => None,
                };
            }
            _ => return None,
        };
        Some(match self {
            SignalOp::Eq => ordering == Ordering::Equal,
            SignalOp::Ne => ordering != Ordering::Equal,
            SignalOp::Gt => ordering == Ordering::Greater,
            SignalOp::Ge => ordering != Ordering::Less,
            SignalOp::Lt => ordering == Ordering::Less,
            SignalOp::Le => ordering != Ordering::Greater,
        })
    }
}

/// Outcome of a signal check when the plan does not carry the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenMissing {
    #[default]
    Pass,
    Fail,
}

/// Inputs a predicate is evaluated against.
pub struct Scope<'a> {
    pub graph: &'a QueryGraph,
    pub plan: Option<&'a PlanFeatures>,
    pub candidates: Vec<&'a QueryNode>,
}

/// Result of one predicate with the reason that decided it.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub passed: bool,
    pub rationale: String,
}

impl Check {
    fn new(passed: bool, rationale: impl Into<String>) -> Self {
        Self {
            passed,
            rationale: rationale.into(),
        }
    }
}

struct Bounds(Option<usize>, Option<usize>);

impl Bounds {
    fn contains(&self, value: usize) -> bool {
        self.0.is_none_or(|min| value >= min) && self.1.is_none_or(|max| value <= max)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0, self.1) {
            (Some(min), Some(max)) if min == max => write!(f, "= {}", min),
            (Some(min), Some(max)) => write!(f, "in {}..={}", min, max),
            (Some(min), None) => write!(f, ">= {}", min),
            (None, Some(max)) => write!(f, "<= {}", max),
            (None, None) => write!(f, "any value"),
        }
    }
}

impl Predicate {
    /// Structural sanity checks run at catalog load.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::NodeCount { metric, min, max, .. } => check_bounds(metric.name(), *min, *max),
            Predicate::GraphCount { metric, min, max } => check_bounds(metric.name(), *min, *max),
            Predicate::Signal { key, .. } if key.trim().is_empty() => {
                Err("signal key must not be empty".to_string())
            }
            Predicate::Cost { min_weight, .. } if !(0.0..=1.0).contains(min_weight) => Err(
                format!("cost min_weight {} is outside 0.0..=1.0", min_weight),
            ),
            Predicate::All { checks } | Predicate::Any { checks } => {
                if checks.is_empty() {
                    return Err("all/any needs at least one check".to_string());
                }
                checks.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not { inner } => inner.validate(),
            _ => Ok(()),
        }
    }

    pub fn contains_signal(&self) -> bool {
        match self {
            Predicate::Signal { .. } => true,
            Predicate::All { checks } | Predicate::Any { checks } => {
                checks.iter().any(Predicate::contains_signal)
            }
            Predicate::Not { inner } => inner.contains_signal(),
            _ => false,
        }
    }

    /// True when the predicate reads plan data: a signal or a cost check.
    pub fn reads_plan(&self) -> bool {
        match self {
            Predicate::Signal { .. } | Predicate::Cost { .. } => true,
            Predicate::All { checks } | Predicate::Any { checks } => {
                checks.iter().any(Predicate::reads_plan)
            }
            Predicate::Not { inner } => inner.reads_plan(),
            _ => false,
        }
    }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Check {
        match self {
            Predicate::Flag {
                flag,
                expect,
                quantifier,
            } => quantified(
                scope,
                *quantifier,
                &format!("{} = {}", flag.name(), expect),
                |n| flag.of(n) == *expect,
                |n| format!("{} = {}", flag.name(), flag.of(n)),
            ),
            Predicate::NodeCount {
                metric,
                min,
                max,
                quantifier,
            } => {
                let bounds = Bounds(*min, *max);
                quantified(
                    scope,
                    *quantifier,
                    &format!("{} {}", metric.name(), bounds),
                    |n| bounds.contains(metric.of(n)),
                    |n| format!("{} = {}", metric.name(), metric.of(n)),
                )
            }
            Predicate::GraphCount { metric, min, max } => {
                let bounds = Bounds(*min, *max);
                let value = scope.graph.metric(*metric);
                Check::new(
                    bounds.contains(value),
                    format!("graph {} = {} (expected {})", metric, value, bounds),
                )
            }
            Predicate::OrOnDistinctColumns { quantifier } => quantified(
                scope,
                *quantifier,
                "an OR over distinct columns",
                |n| n.flags.or_groups.iter().any(|g| g.effective() >= 2),
                |n| format!("or_branch_count = {}", n.flags.or_branch_count),
            ),
            Predicate::Signal {
                key,
                op,
                value,
                when_missing,
            } => {
                let Some(actual) = scope.plan.and_then(|p| p.signal(key)) else {
                    return Check::new(
                        *when_missing == WhenMissing::Pass,
                        format!("signal '{}' not supplied", key),
                    );
                };
                match op.apply(actual, value) {
                    Some(passed) => Check::new(
                        passed,
                        format!(
                            "signal '{}' = {} (expected {} {})",
                            key,
                            actual,
                            op.symbol(),
                            value
                        ),
                    ),
                    None => Check::new(
                        false,
                        format!(
                            "signal '{}' = {} cannot be compared with {} {}",
                            key,
                            actual,
                            op.symbol(),
                            value
                        ),
                    ),
                }
            }
            Predicate::Cost {
                min_weight,
                require_measured,
            } => quantified(
                scope,
                Quantifier::Any,
                &format!(
                    "cost >= {:.3}{}",
                    min_weight,
                    if *require_measured { " (measured)" } else { "" }
                ),
                |n| {
                    n.cost.weight >= *min_weight
                        && (!*require_measured || n.cost.source == CostSource::Measured)
                },
                |n| format!("cost {:.3} ({})", n.cost.weight, n.cost.source),
            ),
            Predicate::All { checks } => {
                let results: Vec<Check> = checks.iter().map(|c| c.evaluate(scope)).collect();
                match results.iter().find(|c| !c.passed) {
                    Some(failed) => Check::new(false, failed.rationale.clone()),
                    None => Check::new(true, join(&results)),
                }
            }
            Predicate::Any { checks } => {
                let results: Vec<Check> = checks.iter().map(|c| c.evaluate(scope)).collect();
                match results.iter().find(|c| c.passed) {
                    Some(passed) => Check::new(true, passed.rationale.clone()),
                    None => Check::new(false, join(&results)),
                }
            }
            Predicate::Not { inner } => {
                let check = inner.evaluate(scope);
                Check::new(!check.passed, format!("not ({})", check.rationale))
            }
        }
    }
}

fn check_bounds(metric: &str, min: Option<usize>, max: Option<usize>) -> Result<(), String> {
    match (min, max) {
        (None, None) => Err(format!("{} check needs min or max", metric)),
        (Some(min), Some(max)) if min > max => {
            Err(format!("{} check has min {} above max {}", metric, min, max))
        }
        _ => Ok(()),
    }
}

fn join(checks: &[Check]) -> String {
    checks
        .iter()
        .map(|c| c.rationale.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Apply a node test over the scope's candidates.
fn quantified(
    scope: &Scope<'_>,
    quantifier: Quantifier,
    what: &str,
    test: impl Fn(&QueryNode) -> bool,
    describe: impl Fn(&QueryNode) -> String,
) -> Check {
    if scope.candidates.is_empty() {
        return Check::new(
            quantifier == Quantifier::All,
            format!("no candidate nodes for {}", what),
        );
    }
    match quantifier {
        Quantifier::Any => match scope.candidates.iter().find(|&&n| test(n)) {
            Some(&n) => Check::new(true, format!("node '{}': {}", n.label, describe(n))),
            None => Check::new(false, format!("no candidate node has {}", what)),
        },
        Quantifier::All => match scope.candidates.iter().find(|&&n| !test(n)) {
            Some(&n) => Check::new(
                false,
                format!("node '{}': {} (expected {})", n.label, describe(n), what),
            ),
            None => Check::new(
                true,
                format!(
                    "all {} candidate node(s) have {}",
                    scope.candidates.len(),
                    what
                ),
            ),
        },
    }
}
