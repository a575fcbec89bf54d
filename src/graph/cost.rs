//! Relative cost weights.
//!
//! Plan statistics win when present. Without them the weight is a
//! structural guess, and the [`CostSource`] says so.

use super::QueryNode;
use crate::plan::PlanFeatures;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostSource {
    /// Taken from supplied plan statistics.
    Measured,
    /// Derived from node structure only.
    Heuristic,
}

impl fmt::Display for CostSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostSource::Measured => write!(f, "measured"),
            CostSource::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// Relative cost of one node, in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub weight: f64,
    pub source: CostSource,
}

impl Default for Cost {
    fn default() -> Self {
        Self {
            weight: 0.0,
            source: CostSource::Heuristic,
        }
    }
}

/// Structural weight before normalization.
pub fn heuristic_weight(node: &QueryNode) -> f64 {
    let refs = node.flags.table_refs.max(1) as f64;
    let group = if node.flags.has_group_by { 2.0 } else { 1.0 };
    let window = if node.flags.has_window_function { 3.0 } else { 1.0 };
    refs * group * window
}

/// Fill `cost` and `row_estimate` on every node.
pub(crate) fn annotate(nodes: &mut [QueryNode], plan: Option<&PlanFeatures>) {
    if let Some(plan) = plan {
        for label in plan.nodes.keys() {
            if !nodes.iter().any(|n| &n.label == label) {
                tracing::warn!("Plan statistics for unknown block '{}' ignored", label);
            }
        }
    }

    let max_heuristic = nodes
        .iter()
        .map(heuristic_weight)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let max_rows = plan
        .map(|p| {
            nodes
                .iter()
                .filter_map(|n| p.node(&n.label).and_then(|s| s.rows))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    for node in nodes.iter_mut() {
        let stats = plan.and_then(|p| p.node(&node.label)).copied();
        node.row_estimate = stats.and_then(|s| s.rows);

        let measured = stats.and_then(|s| match (s.time_fraction, s.rows) {
            (Some(tf), _) => Some(tf.clamp(0.0, 1.0)),
            (None, Some(rows)) if max_rows > 0 => Some(rows as f64 / max_rows as f64),
            (None, Some(_)) => Some(0.0),
            (None, None) => None,
        });

        node.cost = match measured {
            Some(weight) => Cost {
                weight,
                source: CostSource::Measured,
            },
            None => Cost {
                weight: heuristic_weight(node) / max_heuristic,
                source: CostSource::Heuristic,
            },
        };
    }
}
