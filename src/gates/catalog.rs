//! Gate and pathology definitions.
//!
//! Catalog files spell `kind`, `severity` and `fail_action` as free text
//! (`"structural-pattern"`, `"Structural Pattern"`, ...). They are mapped
//! onto closed enums at load time; anything outside the set is rejected
//! with [`CatalogError::UnknownValue`].

use super::predicate::Predicate;
use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a free-text label: lowercase, `-` and spaces become `_`.
fn normalize(label: &str) -> String {
    label
        .trim()
        .to_ascii_lowercase()
        .replace(['-', ' '], "_")
}

/// What a gate inspects. Also the fixed evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    StructuralPattern,
    PlanSignal,
    RuntimeContext,
    SemanticRisk,
}

impl GateKind {
    pub fn parse(entry: &str, label: &str) -> Result<Self, CatalogError> {
        match normalize(label).as_str() {
            "structural_pattern" | "structural" => Ok(Self::StructuralPattern),
            "plan_signal" | "plan" => Ok(Self::PlanSignal),
            "runtime_context" | "runtime" => Ok(Self::RuntimeContext),
            "semantic_risk" | "semantic" => Ok(Self::SemanticRisk),
            _ => Err(unknown(entry, "kind", label)),
        }
    }

    /// Evaluation rank: structural first, semantic last.
    pub fn rank(&self) -> u8 {
        match self {
            Self::StructuralPattern => 0,
            Self::PlanSignal => 1,
            Self::RuntimeContext => 2,
            Self::SemanticRisk => 3,
        }
    }

    /// Plan-signal and runtime-context gates read supplied plan data.
    pub fn reads_plan(&self) -> bool {
        matches!(self, Self::PlanSignal | Self::RuntimeContext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuralPattern => "structural-pattern",
            Self::PlanSignal => "plan-signal",
            Self::RuntimeContext => "runtime-context",
            Self::SemanticRisk => "semantic-risk",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    High,
    Medium,
}

impl Severity {
    pub fn parse(entry: &str, label: &str) -> Result<Self, CatalogError> {
        match normalize(label).as_str() {
            "blocker" => Ok(Self::Blocker),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            _ => Err(unknown(entry, "severity", label)),
        }
    }

    /// Confidence multiplier applied when a gate of this severity fails.
    pub fn penalty(&self) -> f64 {
        match self {
            Self::Blocker => 0.0,
            Self::High => 0.5,
            Self::Medium => 0.8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocker => "blocker",
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failed gate asks of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailAction {
    SkipPathology,
    SkipTransform,
    DowngradeToExploration,
    RequireManualReview,
}

impl FailAction {
    pub fn parse(entry: &str, label: &str) -> Result<Self, CatalogError> {
        match normalize(label).as_str() {
            "skip_pathology" | "skip" => Ok(Self::SkipPathology),
            "skip_transform" => Ok(Self::SkipTransform),
            "downgrade_to_exploration" | "downrank_to_exploration" | "exploration" => {
                Ok(Self::DowngradeToExploration)
            }
            "require_manual_review" | "manual_review" | "review" => Ok(Self::RequireManualReview),
            _ => Err(unknown(entry, "fail_action", label)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipPathology => "skip-pathology",
            Self::SkipTransform => "skip-transform",
            Self::DowngradeToExploration => "downgrade-to-exploration",
            Self::RequireManualReview => "require-manual-review",
        }
    }
}

impl fmt::Display for FailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which nodes a pathology's node predicates look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidates {
    #[default]
    All,
    Ctes,
    Main,
    MultiUse,
    Subqueries,
    Correlated,
}

impl Candidates {
    pub fn parse(entry: &str, label: &str) -> Result<Self, CatalogError> {
        match normalize(label).as_str() {
            "all" => Ok(Self::All),
            "ctes" | "cte" => Ok(Self::Ctes),
            "main" => Ok(Self::Main),
            "multi_use" => Ok(Self::MultiUse),
            "subqueries" | "subquery" => Ok(Self::Subqueries),
            "correlated" => Ok(Self::Correlated),
            _ => Err(unknown(entry, "candidates", label)),
        }
    }
}

fn unknown(entry: &str, field: &'static str, value: &str) -> CatalogError {
    CatalogError::UnknownValue {
        entry: entry.to_string(),
        field,
        value: value.to_string(),
    }
}

/// One admissibility check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gate {
    pub id: String,
    pub pathology: String,
    pub kind: GateKind,
    pub severity: Severity,
    pub fail_action: FailAction,
    pub predicate: Predicate,
    pub description: String,
}

/// A named inefficiency pattern and the gates guarding its fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pathology {
    pub id: String,
    pub name: String,
    pub description: String,
    pub candidates: Candidates,
    /// Sorted by kind rank, then declaration order.
    pub gates: Vec<Gate>,
}

/// `[[pathologies]]` entry as written in a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct PathologyDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub candidates: Option<String>,
}

/// `[[gates]]` entry as written in a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct GateDef {
    pub id: String,
    pub pathology: String,
    pub kind: String,
    pub severity: String,
    pub fail_action: String,
    pub predicate: toml::Value,
    #[serde(default)]
    pub description: String,
}

impl GateDef {
    /// Map free-text fields onto the closed sets and check the predicate.
    pub fn compile(self) -> Result<Gate, CatalogError> {
        let kind = GateKind::parse(&self.id, &self.kind)?;
        let severity = Severity::parse(&self.id, &self.severity)?;
        let fail_action = FailAction::parse(&self.id, &self.fail_action)?;

        let predicate: Predicate =
            self.predicate
                .try_into()
                .map_err(|e: toml::de::Error| CatalogError::InvalidPredicate {
                    entry: self.id.clone(),
                    reason: e.message().to_string(),
                })?;
        let invalid = |reason: String| CatalogError::InvalidPredicate {
            entry: self.id.clone(),
            reason,
        };
        predicate.validate().map_err(invalid)?;

        if predicate.contains_signal() && !kind.reads_plan() {
            return Err(invalid(format!(
                "signal checks are only allowed in plan-signal or runtime-context gates, not {}",
                kind
            )));
        }
        if kind.reads_plan() && !predicate.reads_plan() {
            return Err(invalid(format!(
                "{} gate must contain a signal or cost check",
                kind
            )));
        }

        Ok(Gate {
            id: self.id,
            pathology: self.pathology,
            kind,
            severity,
            fail_action,
            predicate,
            description: self.description,
        })
    }
}

impl PathologyDef {
    pub fn compile(self, mut gates: Vec<Gate>) -> Result<Pathology, CatalogError> {
        let candidates = match &self.candidates {
            Some(label) => Candidates::parse(&self.id, label)?,
            None => Candidates::All,
        };
        // Stable: declaration order survives within a kind.
        gates.sort_by_key(|g| g.kind.rank());
        Ok(Pathology {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            description: self.description,
            candidates,
            gates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gate_def(kind: &str, predicate: &str) -> GateDef {
        let text = format!(
            r#"
            id = "g1"
            pathology = "p"
            kind = "{kind}"
            severity = "High"
            fail_action = "downrank-to-exploration"
            predicate = {predicate}
            "#
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_free_text_labels() {
        assert_eq!(
            GateKind::parse("g", "Structural Pattern").unwrap(),
            GateKind::StructuralPattern
        );
        assert_eq!(GateKind::parse("g", "plan_signal").unwrap(), GateKind::PlanSignal);
        assert_eq!(
            FailAction::parse("g", "Require-Manual-Review").unwrap(),
            FailAction::RequireManualReview
        );
        assert_eq!(Severity::parse("g", " BLOCKER ").unwrap(), Severity::Blocker);
    }

    #[test]
    fn test_unknown_severity_rejected() {
        let err = Severity::parse("g7", "critical").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Catalog entry 'g7': unknown severity 'critical'"
        );
    }

    #[test]
    fn test_compile_gate() {
        let gate = gate_def("structural-pattern", r#"{ check = "or_on_distinct_columns" }"#)
            .compile()
            .unwrap();
        assert_eq!(gate.kind, GateKind::StructuralPattern);
        assert_eq!(gate.severity, Severity::High);
        assert_eq!(gate.fail_action, FailAction::DowngradeToExploration);
    }

    #[test]
    fn test_signal_outside_plan_gate() {
        let err = gate_def(
            "semantic-risk",
            r#"{ check = "signal", key = "spill", op = "eq", value = true }"#,
        )
        .compile()
        .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPredicate { .. }));
    }

    #[test]
    fn test_plan_gate_needs_plan_check() {
        let err = gate_def("plan-signal", r#"{ check = "flag", flag = "has_exists" }"#)
            .compile()
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPredicate { .. }));
    }

    #[test]
    fn test_unknown_check_rejected() {
        let err = gate_def("structural", r#"{ check = "vibes" }"#)
            .compile()
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPredicate { .. }));
    }

    #[test]
    fn test_gates_sorted_by_kind() {
        let semantic = gate_def("semantic-risk", r#"{ check = "flag", flag = "has_exists" }"#)
            .compile()
            .unwrap();
        let structural = gate_def("structural", r#"{ check = "flag", flag = "self_join" }"#)
            .compile()
            .unwrap();
        let def = PathologyDef {
            id: "p".into(),
            name: None,
            description: String::new(),
            candidates: Some("multi-use".into()),
        };
        let p = def.compile(vec![semantic, structural]).unwrap();
        assert_eq!(p.candidates, Candidates::MultiUse);
        assert_eq!(
            p.gates.iter().map(|g| g.kind).collect::<Vec<_>>(),
            vec![GateKind::StructuralPattern, GateKind::SemanticRisk]
        );
    }
}
