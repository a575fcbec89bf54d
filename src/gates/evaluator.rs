//! Gate evaluation.
//!
//! Every gate of a pathology runs, in the catalog's sorted order, even after
//! a blocker has failed, so a verdict always carries the full diagnosis.
//! Evaluation reads only its arguments: the same graph, plan and catalog
//! always give the same verdicts.

use super::catalog::{Candidates, FailAction, GateKind, Pathology, Severity};
use super::predicate::Scope;
use crate::catalog::Catalog;
use crate::error::GateError;
use crate::graph::{CostSource, QueryGraph, QueryNode};
use crate::plan::PlanFeatures;
use serde::{Deserialize, Serialize};

/// Which pathologies to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    All,
    Pathology(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub gate_id: String,
    pub pathology_id: String,
    pub kind: GateKind,
    pub severity: Severity,
    pub outcome: Outcome,
    /// Set only when the gate failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_action: Option<FailAction>,
    pub rationale: String,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Where the candidate nodes' cost weights came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostBasis {
    Measured,
    Heuristic,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathologyVerdict {
    pub pathology_id: String,
    /// Every blocker gate passed.
    pub admissible: bool,
    pub confidence: f64,
    pub exploration_only: bool,
    pub needs_review: bool,
    /// A failed gate asked to keep the transform but skip applying it.
    pub transform_blocked: bool,
    pub cost_basis: CostBasis,
    pub gates: Vec<GateVerdict>,
}

impl PathologyVerdict {
    pub fn failed_gates(&self) -> impl Iterator<Item = &GateVerdict> {
        self.gates.iter().filter(|g| !g.passed())
    }
}

/// Evaluate the catalog's gates against one graph.
pub fn evaluate(
    graph: &QueryGraph,
    plan: Option<&PlanFeatures>,
    catalog: &Catalog,
    target: &Target,
) -> Result<Vec<PathologyVerdict>, GateError> {
    let pathologies: Vec<&Pathology> = match target {
        Target::All => catalog.pathologies().iter().collect(),
        Target::Pathology(id) => vec![
            catalog
                .pathology(id)
                .ok_or_else(|| GateError::UnknownPathology(id.clone()))?,
        ],
    };

    let verdicts: Vec<PathologyVerdict> = pathologies
        .into_iter()
        .map(|p| evaluate_pathology(graph, plan, p))
        .collect();

    tracing::debug!(
        "Evaluated {} pathologies, {} admissible",
        verdicts.len(),
        verdicts.iter().filter(|v| v.admissible).count()
    );
    Ok(verdicts)
}

pub fn evaluate_pathology(
    graph: &QueryGraph,
    plan: Option<&PlanFeatures>,
    pathology: &Pathology,
) -> PathologyVerdict {
    let scope = Scope {
        graph,
        plan,
        candidates: candidates(graph, pathology.candidates),
    };

    let gates: Vec<GateVerdict> = pathology
        .gates
        .iter()
        .map(|gate| {
            let check = gate.predicate.evaluate(&scope);
            GateVerdict {
                gate_id: gate.id.clone(),
                pathology_id: pathology.id.clone(),
                kind: gate.kind,
                severity: gate.severity,
                outcome: if check.passed {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                },
                fail_action: (!check.passed).then_some(gate.fail_action),
                rationale: check.rationale,
            }
        })
        .collect();

    let admissible = gates
        .iter()
        .all(|g| g.passed() || g.severity != Severity::Blocker);
    let confidence = if admissible {
        gates
            .iter()
            .filter(|g| !g.passed())
            .fold(1.0, |c, g| c * g.severity.penalty())
    } else {
        0.0
    };
    let failed_action = |action: FailAction| gates.iter().any(|g| g.fail_action == Some(action));

    PathologyVerdict {
        pathology_id: pathology.id.clone(),
        admissible,
        confidence,
        exploration_only: failed_action(FailAction::DowngradeToExploration),
        needs_review: failed_action(FailAction::RequireManualReview),
        transform_blocked: failed_action(FailAction::SkipTransform),
        cost_basis: cost_basis(&scope.candidates),
        gates,
    }
}

/// Nodes a pathology's node predicates look at, in graph order.
pub fn candidates(graph: &QueryGraph, selector: Candidates) -> Vec<&QueryNode> {
    graph
        .nodes()
        .iter()
        .filter(|n| match selector {
            Candidates::All => true,
            Candidates::Ctes => n.is_cte(),
            Candidates::Main => n.is_main(),
            Candidates::MultiUse => n.is_multi_use(),
            Candidates::Subqueries => n.is_subquery(),
            Candidates::Correlated => n.is_correlated(),
        })
        .collect()
}

fn cost_basis(nodes: &[&QueryNode]) -> CostBasis {
    let measured = nodes
        .iter()
        .filter(|n| n.cost.source == CostSource::Measured)
        .count();
    match measured {
        0 => CostBasis::Heuristic,
        m if m == nodes.len() => CostBasis::Measured,
        _ => CostBasis::Mixed,
    }
}
