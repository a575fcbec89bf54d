//! qgate: SQL rewrite gatekeeper
//!
//! Inspect query graphs, check which pathologies are admissible for a
//! query, and classify rewrites.
//!
//! # Usage
//!
//! ```bash
//! # Show the block graph of a query
//! qgate graph q17.sql
//!
//! # Evaluate gates with plan statistics
//! qgate gates q17.sql --plan q17.plan.json --engine postgres
//!
//! # Name the technique used by a rewrite
//! qgate classify q17.sql q17_rewrite.sql
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use qgate::gates::{Outcome, PathologyVerdict};
use qgate::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "qgate")]
#[command(version)]
#[command(about = "Structural gates for SQL rewrites", long_about = None)]
#[command(after_help = "EXAMPLES:
    qgate graph q17.sql
    qgate gates q17.sql --pathology decorrelate_subquery --plan q17.plan.json
    qgate classify q17.sql q17_rewrite.sql --format json
    qgate batch queries/ --engine snowflake")]
struct Cli {
    /// Target engine (duckdb, postgres, snowflake, databricks)
    #[arg(short, long, global = true, env = "QGATE_ENGINE")]
    engine: Option<String>,

    /// Directory with <engine>.toml catalog overrides
    #[arg(long, global = true)]
    catalog_dir: Option<PathBuf>,

    /// Config file (default: ./qgate.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the query graph: nodes, flags, costs, dependencies
    Graph {
        /// SQL file
        file: PathBuf,
        /// Plan features JSON
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Evaluate pathology gates for a query
    Gates {
        /// SQL file
        file: PathBuf,
        /// Only this pathology
        #[arg(long)]
        pathology: Option<String>,
        /// Plan features JSON
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Classify the rewrite of a query
    Classify {
        /// Original SQL file
        before: PathBuf,
        /// Rewritten SQL file
        after: PathBuf,
    },
    /// Analyze many queries in parallel
    Batch {
        /// SQL files or directories of .sql files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List the engine catalog
    Catalog,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config, cli.verbose);
    match &config.origin {
        Some(path) => tracing::debug!("Loaded config from {}", path.display()),
        None => tracing::debug!("No config file found, using defaults"),
    }

    let engine: Engine = match &cli.engine {
        Some(name) => name.parse()?,
        None => config.engine,
    };
    let catalog_dir = cli.catalog_dir.as_deref().or(config.catalog_dir.as_deref());
    let catalog = Arc::new(Catalog::load(engine, catalog_dir)?);
    if cli.verbose {
        println!(
            "{} {} ({})",
            "Catalog:".dimmed(),
            engine.to_string().cyan(),
            catalog.origin()
        );
    }

    let analyzer = Analyzer::new(catalog).with_workers(config.workers());

    match &cli.command {
        Commands::Graph { file, plan } => {
            let request = load_request(file, plan.as_deref())?;
            let graph = analyzer.graph(&request.id, &request.sql, request.plan.as_ref())?;
            print_graph(&graph, cli.format)
        }
        Commands::Gates {
            file,
            pathology,
            plan,
        } => {
            let request = load_request(file, plan.as_deref())?;
            let target = pathology
                .clone()
                .map(Target::Pathology)
                .unwrap_or(Target::All);
            let analysis = analyzer.with_target(target).analyze(&request)?;
            print_verdicts(&analysis.verdicts, cli.format)
        }
        Commands::Classify { before, after } => {
            let before_sql = read(before)?;
            let after_sql = read(after)?;
            let id = before
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let classification = analyzer.classify_pair(&id, &before_sql, &after_sql)?;
            print_classification(&classification, cli.format)
        }
        Commands::Batch { paths } => {
            let requests = collect_requests(paths)?;
            let report = analyzer.analyze_batch(requests).await;
            print_batch(&report, cli.format)
        }
        Commands::Catalog => print_catalog(analyzer.catalog(), cli.format),
    }
}

fn init_tracing(config: &Config, verbose: bool) {
    let filter = std::env::var("QGATE_LOG")
        .ok()
        .or_else(|| verbose.then(|| "qgate=debug".to_string()))
        .or_else(|| config.log.clone())
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_request(file: &Path, plan: Option<&Path>) -> anyhow::Result<QueryRequest> {
    let mut request = QueryRequest::from_file(file)?;
    if let Some(plan) = plan {
        request.plan = Some(PlanFeatures::from_file(plan)?);
    }
    Ok(request)
}

fn collect_requests(paths: &[PathBuf]) -> anyhow::Result<Vec<QueryRequest>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to list {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "sql"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    files.iter().map(|f| QueryRequest::from_file(f)).collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_graph(graph: &QueryGraph, format: OutputFormat) -> anyhow::Result<()> {
    let records = graph.to_records();
    if format == OutputFormat::Json {
        return print_json(&records);
    }

    println!("{}", "Query Graph".cyan().bold());
    println!();
    for r in &records {
        let deps = if r.dependencies.is_empty() {
            "-".to_string()
        } else {
            r.dependencies.join(", ")
        };
        println!(
            "{} {}  {}",
            r.id.to_string().dimmed(),
            r.label.white().bold(),
            format!("cost {:.3} ({})", r.cost_weight, r.cost_source).dimmed()
        );
        println!("    {} {}", "reads:".dimmed(), deps);
        if !r.base_tables.is_empty() {
            println!("    {} {}", "tables:".dimmed(), r.base_tables.join(", "));
        }
        println!("    {} {}", "outputs:".dimmed(), r.output_columns.join(", "));
        for c in &r.correlation {
            println!(
                "    {} {}.{}",
                "correlated with".yellow(),
                c.outer,
                c.column
            );
        }
        let f = &r.flags;
        let mut flags = Vec::new();
        for (on, name) in [
            (f.has_group_by, "group_by"),
            (f.has_window_function, "window"),
            (f.has_union_all, "union_all"),
            (f.has_set_op, "set_op"),
            (f.has_exists, "exists"),
            (f.has_not_exists, "not_exists"),
            (f.has_left_join, "left_join"),
            (f.has_comma_join, "comma_join"),
            (f.self_join, "self_join"),
        ] {
            if on {
                flags.push(name.to_string());
            }
        }
        if f.or_branch_count > 0 {
            flags.push(format!("or_groups={}", f.or_branch_count));
        }
        if f.late_filter_count > 0 {
            flags.push(format!("late_filters={}", f.late_filter_count));
        }
        if !flags.is_empty() {
            println!("    {} {}", "flags:".dimmed(), flags.join(" ").cyan());
        }
    }
    println!();
    println!("{} node(s)", records.len().to_string().cyan());
    Ok(())
}

fn print_verdicts(verdicts: &[PathologyVerdict], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&verdicts);
    }

    for v in verdicts {
        let status = if v.admissible {
            "ADMISSIBLE".green().bold()
        } else {
            "SKIPPED".red().bold()
        };
        println!(
            "{} {}  {}",
            status,
            v.pathology_id.white().bold(),
            format!("confidence {:.2}, cost {:?}", v.confidence, v.cost_basis).dimmed()
        );
        if v.exploration_only {
            println!("    {}", "exploration only".yellow());
        }
        if v.needs_review {
            println!("    {}", "needs manual review".yellow());
        }
        for g in &v.gates {
            let mark = match g.outcome {
                Outcome::Pass => "✓".green(),
                Outcome::Fail => "✗".red(),
            };
            println!(
                "    {} {:<48} {:<18} {}",
                mark,
                g.gate_id,
                format!("{}/{}", g.kind, g.severity).dimmed(),
                g.rationale
            );
        }
        println!();
    }
    Ok(())
}

fn print_classification(c: &Classification, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(c);
    }

    println!("{}", "Transform Labels".cyan().bold());
    for label in &c.labels {
        let tier = match label.confidence {
            Confidence::High => label.confidence.to_string().green(),
            Confidence::Medium => label.confidence.to_string().yellow(),
            Confidence::Low | Confidence::Fallback => label.confidence.to_string().dimmed(),
        };
        println!("  {:<28} {}", label.signature.white(), tier);
    }
    for flag in &c.flags {
        match flag {
            qgate::transform::ClassificationFlag::PossibleDuplication {
                retained,
                split_into,
            } => println!(
                "  {} '{}' is still referenced after being split into {}",
                "⚠ possible duplication:".yellow(),
                retained,
                split_into.join(", ")
            ),
        }
    }

    let changes = c.diff.changes();
    if !changes.is_empty() {
        println!();
        println!("{}", "Structural Diff".cyan().bold());
        for change in changes {
            println!("  {}", change);
        }
    }
    Ok(())
}

fn print_batch(report: &BatchReport, format: OutputFormat) -> anyhow::Result<()> {
    let summary = report.summary();
    if format == OutputFormat::Json {
        let entries: std::collections::BTreeMap<&str, serde_json::Value> = report
            .results
            .iter()
            .map(|(id, r)| {
                let value = match r {
                    Ok(analysis) => serde_json::to_value(analysis.report())
                        .unwrap_or(serde_json::Value::Null),
                    Err(e) => serde_json::json!({ "stage": e.stage(), "error": e.to_string() }),
                };
                (id.as_str(), value)
            })
            .collect();
        return print_json(&serde_json::json!({ "summary": summary, "results": entries }));
    }

    for (id, result) in &report.results {
        match result {
            Ok(analysis) => {
                let admissible: Vec<&str> = analysis
                    .admissible()
                    .map(|v| v.pathology_id.as_str())
                    .collect();
                println!(
                    "{} {:<24} {}",
                    "✓".green(),
                    id,
                    if admissible.is_empty() {
                        "-".dimmed().to_string()
                    } else {
                        admissible.join(", ")
                    }
                );
            }
            Err(e) => println!("{} {:<24} {}", "✗".red(), id, e.to_string().red()),
        }
    }
    println!();
    println!(
        "{} queries, {} succeeded, {} failed",
        summary.total.to_string().cyan(),
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red()
    );
    for (stage, count) in &summary.failures_by_stage {
        println!("  {} {}", format!("{}:", stage).dimmed(), count);
    }
    Ok(())
}

fn print_catalog(catalog: &Catalog, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(catalog);
    }

    println!(
        "{} {}",
        "Catalog".cyan().bold(),
        catalog.engine().to_string().white()
    );
    println!();
    for p in catalog.pathologies() {
        println!("{} {}", p.id.white().bold(), p.name.dimmed());
        for g in &p.gates {
            println!(
                "    {:<48} {:<18} {:<8} {}",
                g.id,
                g.kind.to_string(),
                g.severity.to_string(),
                g.fail_action.to_string().dimmed()
            );
        }
    }
    println!();
    println!("{}", "Transforms".cyan().bold());
    for t in catalog.transforms() {
        let generic = if t.generic { " (generic)" } else { "" };
        println!("  {:<28} {}{}", t.id.white(), t.name, generic.dimmed());
    }
    Ok(())
}
