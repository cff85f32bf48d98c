//! SQLite persistence
//!
//! The in-memory grid store is authoritative for queries; SQLite carries the
//! grid and freshness state across restarts. Two tables: `habitat_cells`
//! keyed by cell_id and `freshness` keyed by source_id.

pub mod cells;
pub mod freshness;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize the database connection pool and schema.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist. Idempotent; runs on every startup.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS habitat_cells (
            cell_id TEXT PRIMARY KEY,
            resolution TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            soil_temperature_c REAL,
            precipitation_mm_last_7d REAL,
            soil_moisture_index REAL,
            canopy_density_pct REAL,
            elevation_m REAL,
            host_species TEXT NOT NULL DEFAULT '[]',
            provenance TEXT NOT NULL DEFAULT '{}',
            last_observation TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS freshness (
            source_id TEXT PRIMARY KEY,
            expected_interval_minutes INTEGER NOT NULL,
            last_ingested TEXT,
            failed INTEGER NOT NULL DEFAULT 0,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (habitat_cells, freshness)");
    Ok(())
}
