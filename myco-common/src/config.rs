//! Configuration loading for the nowcast service
//!
//! Resolution priority for every value: command line → `MYCO_*` environment
//! variable → TOML config file → compiled default. Policy values (freshness
//! factors, query cell caps, retry ceiling, source cadences) are configuration
//! with fixed defaults, not hard-coded constants.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "myco.toml";

/// Central configuration for the nowcast service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Bind address for the HTTP listener
    pub bind_addr: String,
    /// Root directory for data files (catalog, seeds, database)
    pub data_dir: PathBuf,
    /// SQLite database path; defaults to `<data_dir>/myco.db`
    pub database_path: Option<PathBuf>,
    /// Species used when `/api/nowcast` is called without `species_id`
    pub default_species_id: String,
    /// Freshness state machine thresholds
    pub freshness: FreshnessSettings,
    /// Windowed query limits
    pub query: QuerySettings,
    /// Ingestion retry policy
    pub ingest: IngestSettings,
    /// Data sources, one ingestion pipeline each
    pub sources: Vec<SourceSettings>,
}

/// Thresholds for deriving per-source freshness status.
///
/// With `age = now - last_ingested`: `ok` while
/// `age <= warning_factor * expected_interval`, `warning` while
/// `age <= stale_factor * expected_interval`, `stale` beyond that.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreshnessSettings {
    pub warning_factor: f64,
    pub stale_factor: f64,
}

/// Caps on how many candidate cells a windowed query may score.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuerySettings {
    /// Max candidate cells for a refined-resolution query
    pub refined_max_cells: usize,
    /// Max candidate cells for a coarse-resolution query (lower cell density
    /// per unit area, so the ceiling is larger)
    pub coarse_max_cells: usize,
}

/// Retry/backoff policy for ingestion pipeline stages.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSettings {
    /// First retry delay after a transient stage failure
    pub initial_backoff_secs: u64,
    /// Cap on any single backoff sleep
    pub max_backoff_secs: u64,
    /// Cumulative retry budget per run; exhausting it marks the run failed
    pub ceiling_secs: u64,
}

/// Feed source kinds the orchestrator knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Normalized batches read from a local JSON file
    Seed,
    /// Normalized batches fetched from a staging HTTP endpoint
    Http,
}

/// One configured data source.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    pub source_id: String,
    pub kind: SourceKind,
    /// Expected ingestion cadence in minutes
    pub expected_interval_minutes: u64,
    /// Grid partition this source feeds: "coarse" or "refined"
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// Seed batch file, relative paths resolved against `data_dir`
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
    /// Staging endpoint serving normalized batches
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Short field labels this source feeds, reported in `X-Data-Freshness`
    /// (e.g. `soil`, `precip`)
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_resolution() -> String {
    "coarse".to_string()
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            warning_factor: 1.25,
            stale_factor: 2.0,
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            refined_max_cells: 2_000,
            coarse_max_cells: 20_000,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 30,
            max_backoff_secs: 3_600,
            ceiling_secs: 6 * 3_600,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5810".to_string(),
            data_dir: PathBuf::from("data"),
            database_path: None,
            default_species_id: "chanterelle".to_string(),
            freshness: FreshnessSettings::default(),
            query: QuerySettings::default(),
            ingest: IngestSettings::default(),
            sources: default_sources(),
        }
    }
}

/// Out-of-the-box sources: local seed batches under `<data_dir>/seeds/`.
fn default_sources() -> Vec<SourceSettings> {
    vec![
        SourceSettings {
            source_id: "weather".to_string(),
            kind: SourceKind::Seed,
            expected_interval_minutes: 24 * 60,
            resolution: "coarse".to_string(),
            seed_path: Some(PathBuf::from("seeds/weather_seed.json")),
            endpoint: None,
            fields: vec![
                "soil".to_string(),
                "precip".to_string(),
                "moisture".to_string(),
            ],
        },
        SourceSettings {
            source_id: "forest".to_string(),
            kind: SourceKind::Seed,
            expected_interval_minutes: 7 * 24 * 60,
            resolution: "coarse".to_string(),
            seed_path: Some(PathBuf::from("seeds/forest_seed.json")),
            endpoint: None,
            fields: vec![
                "canopy".to_string(),
                "hosts".to_string(),
                "elevation".to_string(),
            ],
        },
        SourceSettings {
            source_id: "refinement".to_string(),
            kind: SourceKind::Seed,
            expected_interval_minutes: 24 * 60,
            resolution: "refined".to_string(),
            seed_path: Some(PathBuf::from("seeds/refined_seed.json")),
            endpoint: None,
            fields: vec![],
        },
    ]
}

impl ServiceConfig {
    /// Load configuration.
    ///
    /// Priority for the file location: explicit CLI path → `MYCO_CONFIG` →
    /// `./myco.toml` if present → compiled defaults. Scalar overrides
    /// (`MYCO_BIND_ADDR`, `MYCO_DATA_DIR`, `MYCO_DEFAULT_SPECIES`) are applied
    /// on top of whatever the file provided.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_path {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("MYCO_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        None
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("MYCO_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("MYCO_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(species) = std::env::var("MYCO_DEFAULT_SPECIES") {
            self.default_species_id = species;
        }
    }

    /// Reject configurations that cannot work before any component starts.
    pub fn validate(&self) -> Result<()> {
        if self.freshness.warning_factor <= 0.0
            || self.freshness.stale_factor < self.freshness.warning_factor
        {
            return Err(Error::Config(format!(
                "Freshness factors must satisfy 0 < warning ({}) <= stale ({})",
                self.freshness.warning_factor, self.freshness.stale_factor
            )));
        }
        if self.query.refined_max_cells == 0 || self.query.coarse_max_cells == 0 {
            return Err(Error::Config(
                "Query cell caps must be non-zero".to_string(),
            ));
        }
        for source in &self.sources {
            if source.expected_interval_minutes == 0 {
                return Err(Error::Config(format!(
                    "Source '{}' has a zero expected interval",
                    source.source_id
                )));
            }
            match source.kind {
                SourceKind::Seed if source.seed_path.is_none() => {
                    return Err(Error::Config(format!(
                        "Seed source '{}' is missing seed_path",
                        source.source_id
                    )));
                }
                SourceKind::Http if source.endpoint.is_none() => {
                    return Err(Error::Config(format!(
                        "HTTP source '{}' is missing endpoint",
                        source.source_id
                    )));
                }
                _ => {}
            }
        }
        let mut ids: Vec<&str> = self.sources.iter().map(|s| s.source_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.sources.len() {
            return Err(Error::Config("Duplicate source_id in sources".to_string()));
        }
        Ok(())
    }

    /// Species catalog path: `<data_dir>/species_profiles.json`
    pub fn species_profile_path(&self) -> PathBuf {
        self.data_dir.join("species_profiles.json")
    }

    /// Resolved SQLite database path.
    pub fn database_file(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("myco.db"))
    }

    /// Resolve a source-relative path against `data_dir`.
    pub fn resolve_data_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}
