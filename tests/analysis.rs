use pretty_assertions::assert_eq;
use qgate::gates::{FailAction, Outcome};
use qgate::prelude::*;
use std::sync::Arc;

fn analyzer(engine: Engine) -> Analyzer {
    let catalog = Catalog::builtin(engine).expect("builtin catalog");
    Analyzer::new(Arc::new(catalog)).with_workers(2)
}

fn verdict<'a>(analysis: &'a QueryAnalysis, pathology: &str) -> &'a PathologyVerdict {
    analysis
        .verdicts
        .iter()
        .find(|v| v.pathology_id == pathology)
        .unwrap_or_else(|| panic!("no verdict for {}", pathology))
}

#[test]
fn test_cte_chain_yields_one_node_per_block() {
    let graph = analyzer(Engine::DuckDb)
        .graph(
            "q1",
            "WITH customer_total AS (
                 SELECT sr_customer_sk AS ctr_customer_sk, SUM(sr_return_amt) AS ctr_total
                 FROM store_returns GROUP BY sr_customer_sk
             ),
             high AS (SELECT ctr_customer_sk FROM customer_total WHERE ctr_total > 1000),
             named AS (
                 SELECT c.c_customer_id FROM customer c JOIN high h ON c.c_customer_sk = h.ctr_customer_sk
             )
             SELECT c_customer_id FROM named ORDER BY c_customer_id LIMIT 100",
            None,
        )
        .unwrap();

    let labels: Vec<&str> = graph.nodes().iter().map(|n| n.label.as_str()).collect();
    assert_eq!(labels, vec!["customer_total", "high", "named", "main"]);
    for node in graph.nodes() {
        for dep in &node.dependencies {
            assert!(dep.0 < node.id.0);
        }
    }
    assert_eq!(graph.metric(GraphMetric::CteChainDepth), 3);
    assert_eq!(graph.by_label("high").unwrap().flags.late_filter_count, 1);
}

#[test]
fn test_forward_reference_is_a_graph_error() {
    let err = analyzer(Engine::DuckDb)
        .analyze(&QueryRequest::new(
            "fwd",
            "WITH a AS (SELECT k FROM later), later AS (SELECT 1 AS k) SELECT k FROM a",
        ))
        .unwrap_err();
    assert_eq!(err.stage(), "graph");
    assert_eq!(err.query_id(), "fwd");
    assert!(err.to_string().contains("later"));
}

#[test]
fn test_same_column_or_is_not_split() {
    let analysis = analyzer(Engine::DuckDb)
        .analyze(&QueryRequest::new(
            "in_list",
            "SELECT ss_item_sk FROM store_sales WHERE ss_store_sk = 1 OR ss_store_sk = 2",
        ))
        .unwrap();
    assert_eq!(analysis.graph.main().unwrap().flags.or_branch_count, 1);

    let v = verdict(&analysis, "or_to_union");
    assert!(!v.admissible);
    assert_eq!(v.confidence, 0.0);
    let failed: Vec<&str> = v.failed_gates().map(|g| g.gate_id.as_str()).collect();
    assert_eq!(failed, vec!["or_to_union.distinct_columns"]);
}

#[test]
fn test_cross_column_or_is_admissible() {
    let analysis = analyzer(Engine::Postgres)
        .analyze(&QueryRequest::new(
            "cross",
            "SELECT ss_item_sk FROM store_sales WHERE ss_store_sk = 1 OR ss_promo_sk = 7",
        ))
        .unwrap();
    let v = verdict(&analysis, "or_to_union");
    assert!(v.admissible);
    assert_eq!(v.confidence, 1.0);
    assert!(v.gates.iter().all(|g| g.outcome == Outcome::Pass));
}

#[test]
fn test_parenthesized_or_of_conjunctions_is_admissible() {
    let analysis = analyzer(Engine::DuckDb)
        .analyze(&QueryRequest::new(
            "nested_or",
            "SELECT ss_item_sk FROM store_sales
             WHERE ((ss_store_sk = 1 AND ss_promo_sk = 2) OR (ss_store_sk = 3 AND ss_customer_sk = 4))",
        ))
        .unwrap();
    let main = analysis.graph.main().unwrap();
    assert_eq!(main.flags.or_groups.len(), 1);
    assert_eq!(main.flags.or_branch_count, 2);

    let v = verdict(&analysis, "or_to_union");
    assert!(v.admissible);
    assert_eq!(v.confidence, 1.0);
    assert!(v.gates.iter().all(|g| g.outcome == Outcome::Pass));
}

#[test]
fn test_parenthesized_or_on_same_columns_is_not_split() {
    let analysis = analyzer(Engine::DuckDb)
        .analyze(&QueryRequest::new(
            "nested_in_list",
            "SELECT ss_item_sk FROM store_sales
             WHERE ((ss_store_sk = 1 AND ss_promo_sk = 2) OR (ss_store_sk = 3 AND ss_promo_sk = 4))",
        ))
        .unwrap();
    assert_eq!(analysis.graph.main().unwrap().flags.or_branch_count, 1);

    let v = verdict(&analysis, "or_to_union");
    assert!(!v.admissible);
    let failed: Vec<&str> = v.failed_gates().map(|g| g.gate_id.as_str()).collect();
    assert_eq!(failed, vec!["or_to_union.distinct_columns"]);
}

#[test]
fn test_exists_blocks_materialization() {
    let analysis = analyzer(Engine::DuckDb)
        .analyze(&QueryRequest::new(
            "exists",
            "WITH s AS (SELECT ss_customer_sk FROM store_sales)
             SELECT c.c_customer_sk
             FROM customer c
             WHERE EXISTS (SELECT 1 FROM s WHERE s.ss_customer_sk = c.c_customer_sk)
               AND c.c_customer_sk IN (SELECT ss_customer_sk FROM s)",
        ))
        .unwrap();

    let s = analysis.graph.by_label("s").unwrap();
    assert_eq!(s.flags.cte_reference_count, 2);
    assert!(analysis.graph.main().unwrap().flags.has_exists);

    let v = verdict(&analysis, "materialize_shared_subexpression");
    assert!(!v.admissible);
    let exists = v
        .gates
        .iter()
        .find(|g| g.gate_id == "materialize_shared_subexpression.exists")
        .unwrap();
    assert_eq!(exists.outcome, Outcome::Fail);
    assert_eq!(exists.fail_action, Some(FailAction::SkipPathology));
    assert!(exists.rationale.contains("has_exists"));
}

#[test]
fn test_plan_signal_downgrades_decorrelation() {
    let sql = "SELECT c.c_customer_sk FROM customer c
               WHERE c.c_balance > (SELECT AVG(o.amount) FROM orders o WHERE o.cust = c.c_customer_sk)";
    let a = analyzer(Engine::DuckDb);

    let without_plan = a.analyze(&QueryRequest::new("corr", sql)).unwrap();
    let v = verdict(&without_plan, "decorrelate_subquery");
    assert!(v.admissible);
    assert_eq!(v.confidence, 1.0);

    let plan = PlanFeatures::default()
        .with_signal("hash_join_on_correlation_key", SignalValue::Bool(true));
    let with_plan = a
        .analyze(&QueryRequest::new("corr", sql).with_plan(plan))
        .unwrap();
    let v = verdict(&with_plan, "decorrelate_subquery");
    assert!(v.admissible);
    assert!(v.exploration_only);
    assert_eq!(v.confidence, 0.5);
}

#[test]
fn test_self_join_peers_across_blocks() {
    let graph = analyzer(Engine::DuckDb)
        .graph(
            "peers",
            "WITH y1 AS (SELECT d_date_sk FROM date_dim WHERE d_year = 1999),
                  y2 AS (SELECT d_date_sk FROM date_dim WHERE d_year = 2000)
             SELECT y1.d_date_sk FROM y1 JOIN y2 ON y1.d_date_sk = y2.d_date_sk",
            None,
        )
        .unwrap();
    let y1 = graph.by_label("y1").unwrap();
    let y2 = graph.by_label("y2").unwrap();
    assert!(y1.flags.self_join);
    assert_eq!(y1.flags.self_join_peers, vec![y2.id]);
    assert_eq!(y2.flags.self_join_peers, vec![y1.id]);
    assert_eq!(y1.flags.distinct_table_refs["date_dim"], 2);
}

#[test]
fn test_analysis_is_repeatable() {
    let a = analyzer(Engine::Snowflake);
    let request = QueryRequest::new(
        "repeat",
        "WITH x AS (SELECT k, v FROM t) SELECT a.k FROM x a JOIN x b ON a.k = b.k WHERE a.v = 1",
    );
    let first = serde_json::to_string(&a.analyze(&request).unwrap().report()).unwrap();
    let second = serde_json::to_string(&a.analyze(&request).unwrap().report()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_batch_from_files() {
    let dir = std::env::temp_dir().join(format!("qgate-batch-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("good.sql"), "SELECT k FROM t WHERE a = 1 OR b = 2").unwrap();
    std::fs::write(dir.join("good.plan.json"), r#"{ "signals": { "spill_mb": 12 } }"#).unwrap();
    std::fs::write(dir.join("bad.sql"), "SELECT k FROM").unwrap();

    let requests = vec![
        QueryRequest::from_file(&dir.join("good.sql")).unwrap(),
        QueryRequest::from_file(&dir.join("bad.sql")).unwrap(),
    ];
    assert!(requests[0].plan.is_some());
    assert!(requests[1].plan.is_none());

    let report = analyzer(Engine::Databricks).analyze_batch(requests).await;
    let summary = report.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failures_by_stage.get("parse"), Some(&1));
    assert!(report.results["good"].is_ok());
    assert_eq!(report.results["bad"].as_ref().unwrap_err().query_id(), "bad");

    std::fs::remove_dir_all(&dir).unwrap();
}
