//! myco-nc - Mushroom Habitat Nowcast Service
//!
//! Fuses independently-cadenced environmental feeds into a versioned habitat
//! grid and serves species fruiting-likelihood estimates over it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use myco_common::config::ServiceConfig;
use myco_nc::grid::GridStore;
use myco_nc::ingest::{build_sources, IngestionOrchestrator};
use myco_nc::models::{Resolution, SpeciesCatalog};
use myco_nc::services::freshness::FreshnessTracker;
use myco_nc::services::merge::MergeEngine;
use myco_nc::AppState;

#[derive(Debug, Parser)]
#[command(name = "myco-nc", about = "Mushroom habitat nowcast service")]
struct Cli {
    /// Path to TOML config file (falls back to MYCO_CONFIG, then ./myco.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("Starting myco-nc (habitat nowcast service)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    let config = Arc::new(config);

    // species catalog: configuration errors fail loudly here, never at
    // scoring time
    let catalog_path = config.species_profile_path();
    let catalog = Arc::new(
        SpeciesCatalog::load(&catalog_path)
            .with_context(|| format!("Loading species catalog {}", catalog_path.display()))?,
    );
    info!(
        "Species catalog loaded: {} profiles, {} known hosts",
        catalog.species.len(),
        catalog.hosts.len()
    );

    let db_path = config.database_file();
    info!("Database: {}", db_path.display());
    let db_pool = myco_nc::db::init_database_pool(&db_path).await?;

    // hydrate the grid from the previous run's persisted state
    let grid = Arc::new(GridStore::new());
    let persisted = myco_nc::db::cells::load_all_cells(&db_pool).await?;
    let persisted_count = persisted.len();
    for cell in persisted {
        grid.upsert(cell).await;
    }
    info!(
        "Grid hydrated: {} cells ({} coarse, {} refined)",
        persisted_count,
        grid.len(Resolution::Coarse).await,
        grid.len(Resolution::Refined).await
    );

    let freshness = Arc::new(FreshnessTracker::with_db(config.freshness, db_pool.clone()));
    for source in &config.sources {
        freshness
            .register_source(
                &source.source_id,
                chrono::Duration::minutes(source.expected_interval_minutes as i64),
            )
            .await;
    }
    freshness
        .restore(myco_nc::db::freshness::load_all_sources(&db_pool).await?)
        .await;

    let merge = Arc::new(MergeEngine::with_db(
        grid.clone(),
        freshness.clone(),
        db_pool.clone(),
    ));

    // one independent pipeline per source
    let cancel = CancellationToken::new();
    let mut orchestrator = IngestionOrchestrator::new(
        merge.clone(),
        freshness.clone(),
        config.ingest,
        cancel.clone(),
    );
    for (source, cadence) in build_sources(&config)? {
        info!(
            source_id = %source.source_id(),
            cadence_secs = cadence.as_secs(),
            "Registering ingestion pipeline"
        );
        orchestrator.add_source(source, cadence);
    }
    let pipeline_handles = orchestrator.spawn();

    let state = AppState::new(grid, freshness, catalog, config.clone());
    let app = myco_nc::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Binding {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await?;

    cancel.cancel();
    for handle in pipeline_handles {
        let _ = handle.await;
    }
    info!("Shutdown complete");

    Ok(())
}
