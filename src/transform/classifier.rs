//! Rank the catalog's transform signatures against a before/after pair.
//!
//! Tiers:
//!
//! - `high`: exactly one specific signature matches and no unsubsumed
//!   generic one does.
//! - `medium`: a specific match shares the diff with another specific or
//!   an unsubsumed generic match.
//! - `low`: only generic signatures match.
//! - `fallback`: `no_change` for structurally identical graphs,
//!   `unclassified` when nothing matches.
//!
//! Cost weights are never read.

use super::diff::GraphDiff;
use super::signature::TransformSignature;
use crate::catalog::Catalog;
use crate::graph::QueryGraph;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NO_CHANGE: &str = "no_change";
pub const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Fallback,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
            Confidence::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformLabel {
    pub signature: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum ClassificationFlag {
    /// A split CTE is still referenced next to its parts, so the rewrite
    /// may compute the same rows twice.
    PossibleDuplication {
        retained: String,
        split_into: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Never empty.
    pub labels: Vec<TransformLabel>,
    pub flags: Vec<ClassificationFlag>,
    pub diff: GraphDiff,
}

impl Classification {
    pub fn primary(&self) -> Option<&TransformLabel> {
        self.labels.first()
    }

    pub fn has_label(&self, signature: &str) -> bool {
        self.labels.iter().any(|l| l.signature == signature)
    }
}

pub fn classify(before: &QueryGraph, after: &QueryGraph, catalog: &Catalog) -> Classification {
    classify_diff(GraphDiff::between(before, after), catalog.transforms())
}

pub fn classify_diff(diff: GraphDiff, signatures: &[TransformSignature]) -> Classification {
    let flags = diff
        .splits
        .iter()
        .filter(|s| s.retained && s.remaining_references >= 1)
        .map(|s| ClassificationFlag::PossibleDuplication {
            retained: s.original.clone(),
            split_into: s.parts.clone(),
        })
        .collect();

    if diff.is_identity() {
        return Classification {
            labels: vec![fallback(NO_CHANGE)],
            flags,
            diff,
        };
    }

    let matched: Vec<&TransformSignature> =
        signatures.iter().filter(|s| s.matches(&diff)).collect();
    let specific: Vec<&TransformSignature> =
        matched.iter().copied().filter(|s| !s.generic).collect();
    let generic: Vec<&TransformSignature> = matched
        .iter()
        .copied()
        .filter(|s| s.generic && !specific.iter().any(|sp| s.subsumed_by(sp)))
        .collect();

    let specific_tier = if specific.len() == 1 && generic.is_empty() {
        Confidence::High
    } else {
        Confidence::Medium
    };

    // Catalog order within a tier.
    let mut labels: Vec<TransformLabel> = matched
        .iter()
        .filter_map(|s| {
            let confidence = if !s.generic {
                specific_tier
            } else if generic.iter().any(|g| g.id == s.id) {
                Confidence::Low
            } else {
                return None;
            };
            Some(TransformLabel {
                signature: s.id.clone(),
                confidence,
            })
        })
        .collect();
    labels.sort_by_key(|l| l.confidence);

    if labels.is_empty() {
        labels.push(fallback(UNCLASSIFIED));
    }

    tracing::debug!(
        "Classified diff: {}",
        labels
            .iter()
            .map(|l| format!("{} ({})", l.signature, l.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Classification {
        labels,
        flags,
        diff,
    }
}

fn fallback(signature: &str) -> TransformLabel {
    TransformLabel {
        signature: signature.to_string(),
        confidence: Confidence::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::super::signature::TransformDef;
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    const SIGNATURES: &str = r#"
        [[transforms]]
        id = "or_to_union"
        requires = [
            { check = "delta", metric = "or_group_count", change = "decreased" },
            { check = "delta", metric = "union_all_count", change = "increased" },
        ]

        [[transforms]]
        id = "comma_to_explicit_join"
        requires = [
            { check = "delta", metric = "comma_join_count", change = "decreased" },
            { check = "delta", metric = "explicit_join_count", change = "increased" },
        ]

        [[transforms]]
        id = "join_restructure"
        generic = true
        requires = [{ check = "delta", metric = "join_count", change = "changed" }]

        [[transforms]]
        id = "cte_introduced"
        generic = true
        requires = [{ check = "delta", metric = "cte_count", change = "increased" }]
    "#;

    #[derive(serde::Deserialize)]
    struct Signatures {
        transforms: Vec<TransformDef>,
    }

    fn signatures() -> Vec<TransformSignature> {
        let file: Signatures = toml::from_str(SIGNATURES).unwrap();
        file.transforms
            .into_iter()
            .map(|t| t.compile().unwrap())
            .collect()
    }

    fn labels(before: &str, after: &str) -> Vec<(String, Confidence)> {
        let before = QueryGraph::build(&parse(before).unwrap(), None).unwrap();
        let after = QueryGraph::build(&parse(after).unwrap(), None).unwrap();
        classify_diff(GraphDiff::between(&before, &after), &signatures())
            .labels
            .into_iter()
            .map(|l| (l.signature, l.confidence))
            .collect()
    }

    #[test]
    fn test_identical_is_no_change() {
        let sql = "SELECT k FROM t WHERE a = 1";
        assert_eq!(
            labels(sql, sql),
            vec![(NO_CHANGE.to_string(), Confidence::Fallback)]
        );
    }

    #[test]
    fn test_unmatched_is_unclassified() {
        assert_eq!(
            labels("SELECT k FROM t", "SELECT k FROM t GROUP BY k"),
            vec![(UNCLASSIFIED.to_string(), Confidence::Fallback)]
        );
    }

    #[test]
    fn test_single_specific_is_high() {
        assert_eq!(
            labels(
                "SELECT k FROM t WHERE a = 1 OR b = 2",
                "SELECT k FROM t WHERE a = 1 UNION ALL SELECT k FROM t WHERE b = 2"
            ),
            vec![("or_to_union".to_string(), Confidence::High)]
        );
    }

    #[test]
    fn test_specific_with_generic_is_medium() {
        // Comma join replaced and a join added: the generic join signature is
        // not covered by the specific one.
        assert_eq!(
            labels(
                "SELECT a.k FROM a, b WHERE a.k = b.k",
                "SELECT a.k FROM a JOIN b ON a.k = b.k JOIN c ON c.k = a.k"
            ),
            vec![
                ("comma_to_explicit_join".to_string(), Confidence::Medium),
                ("join_restructure".to_string(), Confidence::Low),
            ]
        );
    }

    #[test]
    fn test_only_generic_is_low() {
        assert_eq!(
            labels(
                "SELECT k FROM t",
                "WITH x AS (SELECT k FROM t) SELECT k FROM x"
            ),
            vec![("cte_introduced".to_string(), Confidence::Low)]
        );
    }
}
