//! Per-query analysis and batch fan-out.
//!
//! Each query goes parse -> graph -> gates and either fully succeeds or
//! fails with an [`AnalysisError`] carrying its id. In a batch every query
//! runs on its own blocking task; a failure or panic in one never touches
//! the others.

use crate::catalog::Catalog;
use crate::config::default_workers;
use crate::error::AnalysisError;
use crate::gates::{self, PathologyVerdict, Target};
use crate::graph::{NodeRecord, QueryGraph};
use crate::parser;
use crate::plan::PlanFeatures;
use crate::transform::{self, Classification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// One query to analyze.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub id: String,
    pub sql: String,
    pub plan: Option<PlanFeatures>,
}

impl QueryRequest {
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
            plan: None,
        }
    }

    pub fn with_plan(mut self, plan: PlanFeatures) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Read a `.sql` file. The id is the file stem; a sibling
    /// `<stem>.plan.json` is picked up as plan features.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let sql = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let plan_path = path.with_file_name(format!("{}.plan.json", id));
        let plan = if plan_path.is_file() {
            Some(PlanFeatures::from_file(&plan_path)?)
        } else {
            None
        };
        Ok(Self { id, sql, plan })
    }
}

/// Successful analysis of one query.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub query_id: String,
    pub graph: QueryGraph,
    pub verdicts: Vec<PathologyVerdict>,
}

impl QueryAnalysis {
    pub fn admissible(&self) -> impl Iterator<Item = &PathologyVerdict> {
        self.verdicts.iter().filter(|v| v.admissible)
    }

    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            query_id: self.query_id.clone(),
            nodes: self.graph.to_records(),
            verdicts: self.verdicts.clone(),
        }
    }
}

/// Serializable form of a [`QueryAnalysis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub query_id: String,
    pub nodes: Vec<NodeRecord>,
    pub verdicts: Vec<PathologyVerdict>,
}

/// Results of a batch, keyed by query id.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: BTreeMap<String, Result<QueryAnalysis, AnalysisError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures per stage: parse, graph, gates, aborted.
    pub failures_by_stage: BTreeMap<String, usize>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &QueryAnalysis> {
        self.results.values().filter_map(|r| r.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &AnalysisError> {
        self.results.values().filter_map(|r| r.as_ref().err())
    }

    pub fn summary(&self) -> BatchSummary {
        let mut failures_by_stage = BTreeMap::new();
        for err in self.failed() {
            *failures_by_stage.entry(err.stage().to_string()).or_insert(0) += 1;
        }
        let failed = failures_by_stage.values().sum();
        BatchSummary {
            total: self.results.len(),
            succeeded: self.results.len() - failed,
            failed,
            failures_by_stage,
        }
    }
}

/// Analysis session over one immutable catalog snapshot.
#[derive(Debug, Clone)]
pub struct Analyzer {
    catalog: Arc<Catalog>,
    target: Target,
    workers: usize,
}

impl Analyzer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            target: Target::All,
            workers: default_workers(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Parse and build the graph only.
    pub fn graph(
        &self,
        query_id: &str,
        sql: &str,
        plan: Option<&PlanFeatures>,
    ) -> Result<QueryGraph, AnalysisError> {
        build_graph(query_id, sql, plan)
    }

    pub fn analyze(&self, request: &QueryRequest) -> Result<QueryAnalysis, AnalysisError> {
        analyze_one(&self.catalog, &self.target, request)
    }

    /// Classify the rewrite `after` of `before`.
    pub fn classify_pair(
        &self,
        query_id: &str,
        before: &str,
        after: &str,
    ) -> Result<Classification, AnalysisError> {
        let before = build_graph(query_id, before, None)?;
        let after = build_graph(query_id, after, None)?;
        Ok(transform::classify(&before, &after, &self.catalog))
    }

    /// Analyze many queries in parallel. Completion order is not
    /// preserved; results are keyed by query id.
    pub async fn analyze_batch(&self, requests: Vec<QueryRequest>) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for request in requests {
            let semaphore = semaphore.clone();
            let catalog = self.catalog.clone();
            let target = self.target.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let id = request.id.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || analyze_one(&catalog, &target, &request))
                        .await;
                let result = outcome.unwrap_or_else(|e| {
                    Err(AnalysisError::Aborted {
                        query_id: id.clone(),
                        reason: abort_reason(e),
                    })
                });
                (id, result)
            });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(e) = &result {
                        tracing::warn!("{}", e);
                    }
                    if report.results.insert(id.clone(), result).is_some() {
                        tracing::warn!("Duplicate query id '{}' in batch, keeping the last result", id);
                    }
                }
                Err(e) => tracing::warn!("Batch worker failed: {}", e),
            }
        }

        let summary = report.summary();
        tracing::info!(
            "Batch finished: {} queries, {} succeeded, {} failed",
            summary.total,
            summary.succeeded,
            summary.failed
        );
        report
    }
}

fn build_graph(
    query_id: &str,
    sql: &str,
    plan: Option<&PlanFeatures>,
) -> Result<QueryGraph, AnalysisError> {
    let stmt = parser::parse(sql).map_err(|e| AnalysisError::parse(query_id, e))?;
    QueryGraph::build(&stmt, plan).map_err(|e| AnalysisError::graph(query_id, e))
}

fn analyze_one(
    catalog: &Catalog,
    target: &Target,
    request: &QueryRequest,
) -> Result<QueryAnalysis, AnalysisError> {
    let plan = request.plan.as_ref();
    let graph = build_graph(&request.id, &request.sql, plan)?;
    let verdicts = gates::evaluate(&graph, plan, catalog, target)
        .map_err(|e| AnalysisError::gates(&request.id, e))?;
    tracing::debug!(
        "Analyzed '{}': {} node(s), {} verdict(s)",
        request.id,
        graph.len(),
        verdicts.len()
    );
    Ok(QueryAnalysis {
        query_id: request.id.clone(),
        graph,
        verdicts,
    })
}

fn abort_reason(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Engine;
    use pretty_assertions::assert_eq;

    fn analyzer() -> Analyzer {
        Analyzer::new(Arc::new(Catalog::builtin(Engine::DuckDb).unwrap())).with_workers(2)
    }

    #[test]
    fn test_analyze_single() {
        let analysis = analyzer()
            .analyze(&QueryRequest::new(
                "q1",
                "SELECT a.k FROM t a, t b WHERE a.k = b.k",
            ))
            .unwrap();
        assert_eq!(analysis.query_id, "q1");
        assert_eq!(analysis.graph.len(), 1);
        assert_eq!(
            analysis.verdicts.len(),
            analyzer().catalog().pathologies().len()
        );
        assert!(
            analysis
                .admissible()
                .any(|v| v.pathology_id == "self_join_decomposition")
        );
    }

    #[test]
    fn test_stage_of_failure() {
        let a = analyzer();
        let err = a.analyze(&QueryRequest::new("bad", "SELEC 1")).unwrap_err();
        assert_eq!(err.stage(), "parse");
        assert_eq!(err.query_id(), "bad");

        let err = a
            .analyze(&QueryRequest::new(
                "fwd",
                "WITH a AS (SELECT k FROM b), b AS (SELECT 1 AS k) SELECT k FROM a",
            ))
            .unwrap_err();
        assert_eq!(err.stage(), "graph");

        let err = a
            .clone()
            .with_target(Target::Pathology("nope".into()))
            .analyze(&QueryRequest::new("q", "SELECT 1 AS one"))
            .unwrap_err();
        assert_eq!(err.stage(), "gates");
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let requests = vec![
            QueryRequest::new("ok1", "SELECT k FROM t WHERE a = 1 OR b = 2"),
            QueryRequest::new("broken", "SELECT FROM WHERE"),
            QueryRequest::new("ok2", "WITH x AS (SELECT k FROM t) SELECT k FROM x"),
        ];
        let report = analyzer().analyze_batch(requests).await;
        let summary = report.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failures_by_stage.get("parse"), Some(&1));
        assert!(report.results["ok1"].is_ok());
        assert!(report.results["broken"].is_err());
    }
}
