//! Engine catalogs: pathologies, gates and transform signatures.
//!
//! One TOML file per engine, all against the same schema. The defaults are
//! compiled in; a catalog directory holding `<engine>.toml` overrides them.
//! Every entry is checked at load, so a malformed catalog fails before any
//! query is analyzed.

use crate::error::{CatalogError, CatalogResult};
use crate::gates::catalog::{GateDef, PathologyDef};
use crate::gates::{Gate, Pathology};
use crate::transform::TransformSignature;
use crate::transform::signature::TransformDef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    DuckDb,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    Snowflake,
    #[serde(alias = "spark")]
    Databricks,
}

impl Engine {
    pub const ALL: [Engine; 4] = [
        Engine::DuckDb,
        Engine::Postgres,
        Engine::Snowflake,
        Engine::Databricks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::DuckDb => "duckdb",
            Engine::Postgres => "postgres",
            Engine::Snowflake => "snowflake",
            Engine::Databricks => "databricks",
        }
    }

    fn builtin_source(&self) -> &'static str {
        match self {
            Engine::DuckDb => include_str!("../catalogs/duckdb.toml"),
            Engine::Postgres => include_str!("../catalogs/postgres.toml"),
            Engine::Snowflake => include_str!("../catalogs/snowflake.toml"),
            Engine::Databricks => include_str!("../catalogs/databricks.toml"),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Engine::DuckDb),
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "snowflake" => Ok(Engine::Snowflake),
            "databricks" | "spark" => Ok(Engine::Databricks),
            _ => Err(CatalogError::UnknownValue {
                entry: "catalog".to_string(),
                field: "engine",
                value: s.to_string(),
            }),
        }
    }
}

/// On-disk catalog layout.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    engine: String,
    #[serde(default)]
    pathologies: Vec<PathologyDef>,
    #[serde(default)]
    gates: Vec<GateDef>,
    #[serde(default)]
    transforms: Vec<TransformDef>,
}

/// Validated, read-only rule set for one engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Catalog {
    engine: Engine,
    origin: String,
    pathologies: Vec<Pathology>,
    transforms: Vec<TransformSignature>,
}

impl Catalog {
    /// The compiled-in catalog for `engine`.
    pub fn builtin(engine: Engine) -> CatalogResult<Self> {
        Self::from_toml(engine, engine.builtin_source(), &format!("builtin:{}", engine))
    }

    /// `<dir>/<engine>.toml` when present, else the compiled-in catalog.
    pub fn load(engine: Engine, dir: Option<&Path>) -> CatalogResult<Self> {
        if let Some(dir) = dir {
            let path = dir.join(format!("{}.toml", engine));
            if path.exists() {
                return Self::from_file(engine, &path);
            }
            tracing::debug!(
                "No {} catalog in {}, using builtin",
                engine,
                dir.display()
            );
        }
        Self::builtin(engine)
    }

    pub fn from_file(engine: Engine, path: &Path) -> CatalogResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(engine, &text, &path.display().to_string())
    }

    pub fn from_toml(engine: Engine, text: &str, origin: &str) -> CatalogResult<Self> {
        let file: CatalogFile = toml::from_str(text).map_err(|source| CatalogError::Toml {
            origin: origin.to_string(),
            source,
        })?;

        let declared: Engine = file.engine.parse()?;
        if declared != engine {
            return Err(CatalogError::EngineMismatch {
                expected: engine.to_string(),
                found: declared.to_string(),
            });
        }

        let mut gate_ids = BTreeSet::new();
        let mut gates_by_pathology: BTreeMap<String, Vec<Gate>> = BTreeMap::new();
        for def in file.gates {
            if !gate_ids.insert(def.id.clone()) {
                return Err(CatalogError::DuplicateId { entry: def.id });
            }
            let gate = def.compile()?;
            gates_by_pathology
                .entry(gate.pathology.clone())
                .or_default()
                .push(gate);
        }

        let mut pathologies: Vec<Pathology> = Vec::with_capacity(file.pathologies.len());
        for def in file.pathologies {
            if pathologies.iter().any(|p| p.id == def.id) {
                return Err(CatalogError::DuplicateId { entry: def.id });
            }
            let gates = gates_by_pathology.remove(&def.id).unwrap_or_default();
            pathologies.push(def.compile(gates)?);
        }
        if let Some((pathology, gates)) = gates_by_pathology.into_iter().next() {
            let gate = gates.first().map(|g| g.id.clone()).unwrap_or_default();
            return Err(CatalogError::UnknownPathology { gate, pathology });
        }

        let mut transforms: Vec<TransformSignature> = Vec::with_capacity(file.transforms.len());
        for def in file.transforms {
            if transforms.iter().any(|t| t.id == def.id) {
                return Err(CatalogError::DuplicateId { entry: def.id });
            }
            transforms.push(def.compile()?);
        }

        let catalog = Self {
            engine,
            origin: origin.to_string(),
            pathologies,
            transforms,
        };
        tracing::info!(
            "Loaded {} catalog from {}: {} pathologies, {} gates, {} transforms",
            engine,
            origin,
            catalog.pathologies.len(),
            catalog.gate_count(),
            catalog.transforms.len()
        );
        Ok(catalog)
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Where the catalog was loaded from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn pathologies(&self) -> &[Pathology] {
        &self.pathologies
    }

    pub fn pathology(&self, id: &str) -> Option<&Pathology> {
        self.pathologies.iter().find(|p| p.id == id)
    }

    pub fn transforms(&self) -> &[TransformSignature] {
        &self.transforms
    }

    pub fn transform(&self, id: &str) -> Option<&TransformSignature> {
        self.transforms.iter().find(|t| t.id == id)
    }

    pub fn gate_count(&self) -> usize {
        self.pathologies.iter().map(|p| p.gates.len()).sum()
    }
}
