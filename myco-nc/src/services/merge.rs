//! Merge engine
//!
//! The grid store's only writer. Fuses one source's reading for one cell into
//! the grid under a last-writer-wins-by-field-freshness rule: a field is
//! accepted iff its `observed_at` is strictly newer than the cell's current
//! provenance for that field, or the field is unset. Equal timestamps keep
//! the existing value, so re-merging the same batch is a no-op.
//!
//! Structural validation (unknown field name, out-of-physical-range value,
//! mismatched resolution) rejects the whole reading for that cell before any
//! mutation; partial field application within one rejected merge cannot
//! happen.

use crate::grid::GridStore;
use crate::models::{parse_cell_id, CellField, FieldProvenance, HabitatCell, Resolution};
use crate::services::freshness::FreshnessTracker;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use myco_common::{Error, Result};

/// Value of one field update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(f64),
    Hosts(BTreeSet<String>),
}

/// One field's incoming value plus its observation time.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub value: FieldValue,
    pub observed_at: DateTime<Utc>,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub cell_id: String,
    /// Fields accepted under the freshness rule
    pub fields_applied: usize,
    /// Fields skipped because existing provenance was at least as new
    pub fields_skipped: usize,
}

/// Serializes the read-reconcile-upsert window so field-level reconciliation
/// appears atomic to readers and concurrent pipelines cannot interleave
/// within one cell update.
pub struct MergeEngine {
    grid: Arc<GridStore>,
    freshness: Arc<FreshnessTracker>,
    db: Option<SqlitePool>,
    write_lock: Mutex<()>,
}

impl MergeEngine {
    pub fn new(grid: Arc<GridStore>, freshness: Arc<FreshnessTracker>) -> Self {
        Self {
            grid,
            freshness,
            db: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Engine with SQLite write-through for merged cells.
    pub fn with_db(
        grid: Arc<GridStore>,
        freshness: Arc<FreshnessTracker>,
        db: SqlitePool,
    ) -> Self {
        Self {
            grid,
            freshness,
            db: Some(db),
            write_lock: Mutex::new(()),
        }
    }

    /// Merge one source's reading for one cell.
    ///
    /// On success records a fresh ingest for `source_id`; on structural
    /// rejection records a failure and returns a validation error with the
    /// grid untouched.
    pub async fn merge_reading(
        &self,
        source_id: &str,
        cell_id: &str,
        updates: &BTreeMap<String, FieldUpdate>,
        resolution: Resolution,
    ) -> Result<MergeOutcome> {
        let validated = match self.validate(cell_id, updates, resolution) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    source_id = %source_id,
                    cell_id = %cell_id,
                    error = %e,
                    "Merge rejected"
                );
                self.freshness.record_failure(source_id, &e.to_string()).await;
                return Err(e);
            }
        };

        let outcome = {
            let _guard = self.write_lock.lock().await;

            let mut cell = match self.grid.get(cell_id).await {
                Some(cell) => cell,
                None => HabitatCell::new_empty(validated.latitude, validated.longitude, resolution),
            };

            let mut applied = 0usize;
            let mut skipped = 0usize;
            for (field, update) in &validated.updates {
                let newer = match cell.provenance_of(*field) {
                    None => true,
                    Some(existing) => update.observed_at > existing.observed_at,
                };
                if !newer {
                    skipped += 1;
                    continue;
                }
                match &update.value {
                    FieldValue::Scalar(value) => cell.set_scalar(*field, *value),
                    FieldValue::Hosts(hosts) => cell.host_species_present = hosts.clone(),
                }
                cell.provenance.insert(
                    field.name().to_string(),
                    FieldProvenance {
                        source: source_id.to_string(),
                        observed_at: update.observed_at,
                    },
                );
                applied += 1;
            }
            cell.recompute_last_observation();

            if let Some(db) = &self.db {
                if let Err(e) = crate::db::cells::save_cell(db, &cell).await {
                    // memory state stays authoritative; rehydration will lag
                    warn!(cell_id = %cell_id, error = %e, "Failed to persist cell");
                }
            }
            self.grid.upsert(cell).await;

            MergeOutcome {
                cell_id: cell_id.to_string(),
                fields_applied: applied,
                fields_skipped: skipped,
            }
        };

        debug!(
            source_id = %source_id,
            cell_id = %outcome.cell_id,
            applied = outcome.fields_applied,
            skipped = outcome.fields_skipped,
            "Merged reading"
        );
        self.freshness.record_success(source_id, Utc::now()).await;
        Ok(outcome)
    }

    /// Structural validation, all-or-nothing, before any mutation.
    fn validate(
        &self,
        cell_id: &str,
        updates: &BTreeMap<String, FieldUpdate>,
        resolution: Resolution,
    ) -> Result<ValidatedReading> {
        let Some((id_resolution, latitude, longitude)) = parse_cell_id(cell_id) else {
            return Err(Error::Validation(format!("Malformed cell id '{}'", cell_id)));
        };
        if id_resolution != resolution {
            return Err(Error::Validation(format!(
                "Cell '{}' does not belong to the {} grid",
                cell_id,
                resolution.as_str()
            )));
        }
        if updates.is_empty() {
            return Err(Error::Validation(format!(
                "Reading for cell '{}' carries no field updates",
                cell_id
            )));
        }

        let mut validated = BTreeMap::new();
        for (name, update) in updates {
            let Some(field) = CellField::parse(name) else {
                return Err(Error::Validation(format!("Unknown field name '{}'", name)));
            };
            match &update.value {
                FieldValue::Scalar(value) => {
                    if !field.is_scalar() {
                        return Err(Error::Validation(format!(
                            "Field '{}' expects a host set, got a scalar",
                            name
                        )));
                    }
                    if !value.is_finite() {
                        return Err(Error::Validation(format!(
                            "Field '{}' value is not finite",
                            name
                        )));
                    }
                    // scalar fields always carry a physical range
                    if let Some((min, max)) = field.physical_range() {
                        if *value < min || *value > max {
                            return Err(Error::Validation(format!(
                                "Field '{}' value {} outside physical range {}..{}",
                                name, value, min, max
                            )));
                        }
                    }
                }
                FieldValue::Hosts(_) => {
                    if field.is_scalar() {
                        return Err(Error::Validation(format!(
                            "Field '{}' expects a scalar, got a host set",
                            name
                        )));
                    }
                }
            }
            validated.insert(field, update.clone());
        }

        Ok(ValidatedReading {
            latitude,
            longitude,
            updates: validated,
        })
    }
}

struct ValidatedReading {
    latitude: f64,
    longitude: f64,
    updates: BTreeMap<CellField, FieldUpdate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cell_id_for;
    use crate::services::freshness::FreshnessStatus;
    use chrono::TimeZone;
    use myco_common::config::FreshnessSettings;

    fn engine() -> (MergeEngine, Arc<GridStore>, Arc<FreshnessTracker>) {
        let grid = Arc::new(GridStore::new());
        let freshness = Arc::new(FreshnessTracker::new(FreshnessSettings::default()));
        let engine = MergeEngine::new(grid.clone(), freshness.clone());
        (engine, grid, freshness)
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + seconds, 0).unwrap()
    }

    fn scalar(value: f64, observed_at: DateTime<Utc>) -> FieldUpdate {
        FieldUpdate {
            value: FieldValue::Scalar(value),
            observed_at,
        }
    }

    #[tokio::test]
    async fn newer_reading_wins_older_is_ignored() {
        let (engine, grid, _) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        // source A at t=100
        let updates = BTreeMap::from([(
            "soil_moisture_index".to_string(),
            scalar(0.6, at(100)),
        )]);
        engine
            .merge_reading("source-a", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();

        // source B at t=90 must not change the field
        let updates = BTreeMap::from([(
            "soil_moisture_index".to_string(),
            scalar(0.2, at(90)),
        )]);
        let outcome = engine
            .merge_reading("source-b", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();
        assert_eq!(outcome.fields_applied, 0);
        assert_eq!(outcome.fields_skipped, 1);

        let cell = grid.get(&cell_id).await.unwrap();
        assert_eq!(cell.soil_moisture_index, Some(0.6));
        let provenance = cell.provenance_of(CellField::SoilMoistureIndex).unwrap();
        assert_eq!(provenance.source, "source-a");
        assert_eq!(provenance.observed_at, at(100));
    }

    #[tokio::test]
    async fn equal_timestamp_re_merge_is_a_no_op() {
        let (engine, grid, freshness) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);
        let updates = BTreeMap::from([
            ("soil_temperature_c".to_string(), scalar(14.0, at(0))),
            ("precipitation_mm_last_7d".to_string(), scalar(22.0, at(0))),
        ]);

        engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();
        let before = grid.get(&cell_id).await.unwrap();

        let outcome = engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();
        assert_eq!(outcome.fields_applied, 0);
        assert_eq!(outcome.fields_skipped, 2);

        let after = grid.get(&cell_id).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(
            freshness.status_of("weather").await,
            Some(FreshnessStatus::Ok)
        );
    }

    #[tokio::test]
    async fn untouched_fields_are_preserved() {
        let (engine, grid, _) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        let updates = BTreeMap::from([("canopy_density_pct".to_string(), scalar(85.0, at(0)))]);
        engine
            .merge_reading("forest", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();

        let updates = BTreeMap::from([("soil_temperature_c".to_string(), scalar(12.0, at(60)))]);
        engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();

        let cell = grid.get(&cell_id).await.unwrap();
        assert_eq!(cell.canopy_density_pct, Some(85.0));
        assert_eq!(cell.soil_temperature_c, Some(12.0));
        assert_eq!(cell.provenance_of(CellField::CanopyDensityPct).unwrap().source, "forest");
        assert_eq!(cell.last_observation, Some(at(60)));
    }

    #[tokio::test]
    async fn host_sets_merge_under_the_same_freshness_rule() {
        let (engine, grid, _) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        let hosts = |names: &[&str], t| FieldUpdate {
            value: FieldValue::Hosts(names.iter().map(|s| s.to_string()).collect()),
            observed_at: t,
        };

        let updates =
            BTreeMap::from([("host_species_present".to_string(), hosts(&["douglas-fir"], at(0)))]);
        engine
            .merge_reading("forest", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();

        // newer survey replaces the set
        let updates = BTreeMap::from([(
            "host_species_present".to_string(),
            hosts(&["douglas-fir", "western-hemlock"], at(60)),
        )]);
        engine
            .merge_reading("forest", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();

        let cell = grid.get(&cell_id).await.unwrap();
        assert_eq!(cell.host_species_present.len(), 2);
    }

    #[tokio::test]
    async fn unknown_field_rejects_the_whole_reading() {
        let (engine, grid, freshness) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        let updates = BTreeMap::from([
            ("soil_temperature_c".to_string(), scalar(14.0, at(0))),
            ("surface_ph".to_string(), scalar(6.5, at(0))),
        ]);
        let err = engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown field name"));

        // atomic rejection: the valid field was not applied either
        assert!(grid.get(&cell_id).await.is_none());
        assert_eq!(
            freshness.status_of("weather").await,
            Some(FreshnessStatus::Failed)
        );
    }

    #[tokio::test]
    async fn out_of_physical_range_value_rejected() {
        let (engine, grid, _) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        let updates = BTreeMap::from([("soil_moisture_index".to_string(), scalar(1.4, at(0)))]);
        let err = engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside physical range"));
        assert!(grid.get(&cell_id).await.is_none());
    }

    #[tokio::test]
    async fn mismatched_resolution_rejected() {
        let (engine, _, _) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        let updates = BTreeMap::from([("soil_temperature_c".to_string(), scalar(14.0, at(0)))]);
        let err = engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Refined)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[tokio::test]
    async fn every_populated_scalar_has_provenance() {
        let (engine, grid, _) = engine();
        let cell_id = cell_id_for(47.0, -121.0, Resolution::Coarse);

        let updates = BTreeMap::from([
            ("soil_temperature_c".to_string(), scalar(14.0, at(0))),
            ("precipitation_mm_last_7d".to_string(), scalar(5.0, at(0))),
            ("elevation_m".to_string(), scalar(880.0, at(0))),
        ]);
        engine
            .merge_reading("weather", &cell_id, &updates, Resolution::Coarse)
            .await
            .unwrap();

        let cell = grid.get(&cell_id).await.unwrap();
        for field in CellField::SCALARS {
            assert_eq!(cell.scalar(field).is_some(), cell.provenance_of(field).is_some());
        }
    }
}
