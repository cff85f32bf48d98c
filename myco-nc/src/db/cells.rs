//! Habitat cell persistence
//!
//! Write-through from the merge engine, bulk load for startup hydration.
//! Host sets and provenance maps are stored as JSON columns; timestamps as
//! RFC 3339 text.

use crate::models::{HabitatCell, Resolution};
use chrono::{DateTime, Utc};
use myco_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Upsert one cell row.
pub async fn save_cell(pool: &SqlitePool, cell: &HabitatCell) -> Result<()> {
    let host_species = serde_json::to_string(&cell.host_species_present)
        .map_err(|e| Error::Internal(format!("Failed to serialize host species: {}", e)))?;
    let provenance = serde_json::to_string(&cell.provenance)
        .map_err(|e| Error::Internal(format!("Failed to serialize provenance: {}", e)))?;
    let last_observation = cell.last_observation.map(|dt| dt.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO habitat_cells (
            cell_id, resolution, latitude, longitude,
            soil_temperature_c, precipitation_mm_last_7d, soil_moisture_index,
            canopy_density_pct, elevation_m,
            host_species, provenance, last_observation
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(cell_id) DO UPDATE SET
            soil_temperature_c = excluded.soil_temperature_c,
            precipitation_mm_last_7d = excluded.precipitation_mm_last_7d,
            soil_moisture_index = excluded.soil_moisture_index,
            canopy_density_pct = excluded.canopy_density_pct,
            elevation_m = excluded.elevation_m,
            host_species = excluded.host_species,
            provenance = excluded.provenance,
            last_observation = excluded.last_observation
        "#,
    )
    .bind(&cell.cell_id)
    .bind(cell.resolution.as_str())
    .bind(cell.latitude)
    .bind(cell.longitude)
    .bind(cell.soil_temperature_c)
    .bind(cell.precipitation_mm_last_7d)
    .bind(cell.soil_moisture_index)
    .bind(cell.canopy_density_pct)
    .bind(cell.elevation_m)
    .bind(&host_species)
    .bind(&provenance)
    .bind(&last_observation)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every persisted cell, for startup hydration of the grid store.
pub async fn load_all_cells(pool: &SqlitePool) -> Result<Vec<HabitatCell>> {
    let rows = sqlx::query(
        r#"
        SELECT cell_id, resolution, latitude, longitude,
               soil_temperature_c, precipitation_mm_last_7d, soil_moisture_index,
               canopy_density_pct, elevation_m,
               host_species, provenance, last_observation
        FROM habitat_cells
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut cells = Vec::with_capacity(rows.len());
    for row in rows {
        let cell_id: String = row.try_get("cell_id")?;
        let resolution_str: String = row.try_get("resolution")?;
        let resolution = Resolution::parse(&resolution_str).ok_or_else(|| {
            Error::Internal(format!(
                "Cell '{}' has unknown resolution '{}'",
                cell_id, resolution_str
            ))
        })?;
        let host_species: String = row.try_get("host_species")?;
        let provenance: String = row.try_get("provenance")?;
        let last_observation: Option<String> = row.try_get("last_observation")?;

        cells.push(HabitatCell {
            cell_id,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            resolution,
            soil_temperature_c: row.try_get("soil_temperature_c")?,
            precipitation_mm_last_7d: row.try_get("precipitation_mm_last_7d")?,
            soil_moisture_index: row.try_get("soil_moisture_index")?,
            canopy_density_pct: row.try_get("canopy_density_pct")?,
            elevation_m: row.try_get("elevation_m")?,
            host_species_present: serde_json::from_str(&host_species)
                .map_err(|e| Error::Internal(format!("Corrupt host_species column: {}", e)))?,
            provenance: serde_json::from_str(&provenance)
                .map_err(|e| Error::Internal(format!("Corrupt provenance column: {}", e)))?,
            last_observation: parse_timestamp(last_observation)?,
        });
    }
    Ok(cells)
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Error::Internal(format!("Corrupt timestamp '{}': {}", text, e))),
    }
}
