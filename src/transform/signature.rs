//! Transform signatures: named rewrites and the diff they must show.

use super::diff::GraphDiff;
use crate::error::CatalogError;
use crate::graph::GraphMetric;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Increased,
    Decreased,
    Unchanged,
    Changed,
}

/// One condition over a [`GraphDiff`]. Tagged by `check` in catalog files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum DiffPredicate {
    Delta {
        metric: GraphMetric,
        change: Change,
        /// Exact size of the change, when set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<usize>,
    },
    /// Some base table went from at least `from_at_least` occurrences to at
    /// most `to_at_most`.
    TableOccurrenceDropped { from_at_least: usize, to_at_most: usize },
    SelfJoinRemoved,
    SelfJoinIntroduced,
    CteSplit,
}

impl DiffPredicate {
    pub fn holds(&self, diff: &GraphDiff) -> bool {
        match self {
            DiffPredicate::Delta { metric, change, by } => {
                let delta = diff.metric(*metric).change();
                let direction = match change {
                    Change::Increased => delta > 0,
                    Change::Decreased => delta < 0,
                    Change::Unchanged => delta == 0,
                    Change::Changed => delta != 0,
                };
                direction && by.is_none_or(|by| delta.unsigned_abs() == by as u64)
            }
            DiffPredicate::TableOccurrenceDropped {
                from_at_least,
                to_at_most,
            } => diff.tables.values().any(|d| {
                d.before >= *from_at_least && d.after <= *to_at_most && d.after < d.before
            }),
            DiffPredicate::SelfJoinRemoved => diff.self_join_before && !diff.self_join_after,
            DiffPredicate::SelfJoinIntroduced => !diff.self_join_before && diff.self_join_after,
            DiffPredicate::CteSplit => !diff.splits.is_empty(),
        }
    }
}

impl fmt::Display for DiffPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffPredicate::Delta { metric, change, by } => {
                write!(f, "{} {:?}", metric, change)?;
                if let Some(by) = by {
                    write!(f, " by {}", by)?;
                }
                Ok(())
            }
            DiffPredicate::TableOccurrenceDropped {
                from_at_least,
                to_at_most,
            } => write!(
                f,
                "table occurrences {}+ -> <= {}",
                from_at_least, to_at_most
            ),
            DiffPredicate::SelfJoinRemoved => write!(f, "self join removed"),
            DiffPredicate::SelfJoinIntroduced => write!(f, "self join introduced"),
            DiffPredicate::CteSplit => write!(f, "cte split"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformSignature {
    pub id: String,
    pub name: String,
    /// Weak signatures that only corroborate a specific one.
    pub generic: bool,
    pub requires: Vec<DiffPredicate>,
}

impl TransformSignature {
    pub fn matches(&self, diff: &GraphDiff) -> bool {
        self.requires.iter().all(|p| p.holds(diff))
    }

    /// Every predicate of `self` is also required by `other`.
    pub fn subsumed_by(&self, other: &TransformSignature) -> bool {
        self.requires.iter().all(|p| other.requires.contains(p))
    }
}

/// `[[transforms]]` entry as written in a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub generic: bool,
    pub requires: Vec<toml::Value>,
}

impl TransformDef {
    pub fn compile(self) -> Result<TransformSignature, CatalogError> {
        if self.requires.is_empty() {
            return Err(CatalogError::InvalidPredicate {
                entry: self.id,
                reason: "transform needs at least one diff check".to_string(),
            });
        }
        let requires = self
            .requires
            .into_iter()
            .map(|v| {
                v.try_into()
                    .map_err(|e: toml::de::Error| CatalogError::InvalidPredicate {
                        entry: self.id.clone(),
                        reason: e.message().to_string(),
                    })
            })
            .collect::<Result<Vec<DiffPredicate>, _>>()?;

        Ok(TransformSignature {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            generic: self.generic,
            requires,
        })
    }
}
