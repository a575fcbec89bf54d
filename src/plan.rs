//! Execution-plan features supplied alongside a query.
//!
//! The plan is an opaque description produced elsewhere (EXPLAIN output
//! already reduced to per-block statistics and named signals). The core
//! never runs EXPLAIN itself.
//!
//! ```json
//! {
//!   "nodes": { "main": { "rows": 1200, "time_fraction": 0.7 } },
//!   "signals": { "hash_join_on_correlation_key": true, "spill_mb": 512 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Per-block statistics keyed by node label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Share of total execution time spent in this block, `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_fraction: Option<f64>,
}

/// Value of a named plan or runtime signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Bool(b) => write!(f, "{}", b),
            SignalValue::Number(n) => write!(f, "{}", n),
            SignalValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Plan features for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanFeatures {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeStats>,
    #[serde(default)]
    pub signals: BTreeMap<String, SignalValue>,
}

impl PlanFeatures {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let plan = Self::from_json(&text)
            .map_err(|e| anyhow::anyhow!("Invalid plan file {}: {}", path.display(), e))?;
        Ok(plan)
    }

    pub fn node(&self, label: &str) -> Option<&NodeStats> {
        self.nodes.get(label)
    }

    pub fn signal(&self, key: &str) -> Option<&SignalValue> {
        self.signals.get(key)
    }

    /// Builder-style helpers, mostly for tests and embedding callers.
    pub fn with_node(mut self, label: impl Into<String>, stats: NodeStats) -> Self {
        self.nodes.insert(label.into(), stats);
        self
    }

    pub fn with_signal(mut self, key: impl Into<String>, value: SignalValue) -> Self {
        self.signals.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_json() {
        let plan = PlanFeatures::from_json(
            r#"{
                "nodes": { "main": { "rows": 10, "time_fraction": 0.25 } },
                "signals": { "spill": true, "spill_mb": 512, "join": "hash" }
            }"#,
        )
        .unwrap();
        assert_eq!(plan.node("main").unwrap().rows, Some(10));
        assert_eq!(plan.signal("spill"), Some(&SignalValue::Bool(true)));
        assert_eq!(plan.signal("spill_mb"), Some(&SignalValue::Number(512.0)));
        assert_eq!(plan.signal("join"), Some(&SignalValue::Text("hash".into())));
    }

    #[test]
    fn test_empty_plan() {
        let plan = PlanFeatures::from_json("{}").unwrap();
        assert!(plan.nodes.is_empty());
        assert!(plan.signal("anything").is_none());
    }
}
