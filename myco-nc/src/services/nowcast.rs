//! Windowed nowcast query service
//!
//! Read path over the grid store: check coverage, enforce the candidate-cell
//! cap before any scoring runs (scoring is the expensive step), then score,
//! filter and return. The cap is deliberate backpressure, not a data error.

use crate::grid::{BoundingBox, GridStore};
use crate::models::{Resolution, SpeciesCatalog};
use crate::services::scoring::{score_cell, ScoreComponent};
use chrono::{DateTime, Datelike, Utc};
use myco_common::config::QuerySettings;
use myco_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One scored cell in a nowcast response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCellSummary {
    pub cell_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub score: f64,
    pub components: Vec<ScoreComponent>,
    pub last_observation: Option<DateTime<Utc>>,
}

/// Nowcast evaluation result for one species.
///
/// `as_of` is the evaluation time, not a data timestamp. Cell order is not
/// semantically significant but is stable within one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowcastResult {
    pub species_id: String,
    pub as_of: DateTime<Utc>,
    pub count: usize,
    pub cells: Vec<ScoredCellSummary>,
}

/// Outcome of a windowed query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Ready(NowcastResult),
    /// Candidate set exceeds the cap; nothing was scored
    RejectedTooLarge { candidates: usize, max_cells: usize },
    /// Requested resolution has no coverage in the region (distinct from
    /// "zero matching cells")
    Unavailable,
}

/// Stateless-per-query service over the grid store and catalog snapshot.
pub struct NowcastService {
    grid: Arc<GridStore>,
    catalog: Arc<SpeciesCatalog>,
    limits: QuerySettings,
    scoring_calls: AtomicU64,
}

impl NowcastService {
    pub fn new(grid: Arc<GridStore>, catalog: Arc<SpeciesCatalog>, limits: QuerySettings) -> Self {
        Self {
            grid,
            catalog,
            limits,
            scoring_calls: AtomicU64::new(0),
        }
    }

    fn max_cells(&self, resolution: Resolution) -> usize {
        match resolution {
            Resolution::Coarse => self.limits.coarse_max_cells,
            Resolution::Refined => self.limits.refined_max_cells,
        }
    }

    /// Total scoring calls performed since construction.
    pub fn scoring_calls(&self) -> u64 {
        self.scoring_calls.load(Ordering::Relaxed)
    }

    /// Score all matching cells for a species within a bounding box.
    ///
    /// Checks run in order: coverage (no cells at this resolution in the
    /// region ⇒ `Unavailable`), candidate count vs cap (over ⇒
    /// `RejectedTooLarge`, zero scoring calls), then score + filter.
    pub async fn query(
        &self,
        species_id: &str,
        bbox: &BoundingBox,
        resolution: Resolution,
        min_score: f64,
        as_of: DateTime<Utc>,
    ) -> Result<QueryOutcome> {
        let profile = self
            .catalog
            .get(species_id)
            .ok_or_else(|| Error::NotFound(format!("Species '{}' not found", species_id)))?;
        if !(0.0..=1.0).contains(&min_score) {
            return Err(Error::InvalidInput(format!(
                "min_score {} outside 0.0-1.0",
                min_score
            )));
        }

        let candidates = self.grid.count(bbox, resolution).await;
        if candidates == 0 {
            return Ok(QueryOutcome::Unavailable);
        }
        let max_cells = self.max_cells(resolution);
        if candidates > max_cells {
            debug!(
                species_id = %species_id,
                candidates,
                max_cells,
                resolution = resolution.as_str(),
                "Rejecting oversized windowed query"
            );
            return Ok(QueryOutcome::RejectedTooLarge {
                candidates,
                max_cells,
            });
        }

        let evaluation_month = as_of.month();
        let cells = self.grid.query_bounding_box(bbox, resolution).await;
        let mut scored = Vec::new();
        for cell in &cells {
            let (score, components) = score_cell(profile, cell, evaluation_month);
            self.scoring_calls.fetch_add(1, Ordering::Relaxed);
            if score >= min_score {
                scored.push(ScoredCellSummary {
                    cell_id: cell.cell_id.clone(),
                    latitude: cell.latitude,
                    longitude: cell.longitude,
                    score,
                    components,
                    last_observation: cell.last_observation,
                });
            }
        }
        // stable order: best score first, cell id as tie-break
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cell_id.cmp(&b.cell_id))
        });

        Ok(QueryOutcome::Ready(NowcastResult {
            species_id: species_id.to_string(),
            as_of,
            count: scored.len(),
            cells: scored,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HabitatCell, Resolution};

    fn catalog() -> Arc<SpeciesCatalog> {
        Arc::new(
            SpeciesCatalog::from_json(
                r#"{
                    "hosts": [{"id": "douglas-fir", "scientific_name": "Pseudotsuga menziesii"}],
                    "species": [{
                        "id": "morel", "common_name": "Morel",
                        "soil_temperature_c": {"min": 10, "max": 18},
                        "host_species": ["douglas-fir"],
                        "weights": {"soil_temperature": 0.5, "host_species": 0.5}
                    }]
                }"#,
            )
            .unwrap(),
        )
    }

    async fn seeded_service(limits: QuerySettings, cells: usize) -> NowcastService {
        let grid = Arc::new(GridStore::new());
        for i in 0..cells {
            let mut cell = HabitatCell::new_empty(
                45.0 + (i as f64) * 0.003,
                -122.0,
                Resolution::Refined,
            );
            cell.soil_temperature_c = Some(14.0);
            cell.host_species_present.insert("douglas-fir".to_string());
            grid.upsert(cell).await;
        }
        NowcastService::new(grid, catalog(), limits)
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(44.0, 46.0, -123.0, -121.0).unwrap()
    }

    #[tokio::test]
    async fn one_cell_over_the_cap_scores_nothing() {
        let limits = QuerySettings {
            refined_max_cells: 4,
            coarse_max_cells: 100,
        };
        let service = seeded_service(limits, 5).await;

        let outcome = service
            .query("morel", &bbox(), Resolution::Refined, 0.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::RejectedTooLarge {
                candidates: 5,
                max_cells: 4
            }
        );
        assert_eq!(service.scoring_calls(), 0);
    }

    #[tokio::test]
    async fn at_the_cap_everything_is_scored() {
        let limits = QuerySettings {
            refined_max_cells: 5,
            coarse_max_cells: 100,
        };
        let service = seeded_service(limits, 5).await;

        let outcome = service
            .query("morel", &bbox(), Resolution::Refined, 0.0, Utc::now())
            .await
            .unwrap();
        let QueryOutcome::Ready(result) = outcome else {
            panic!("expected a ready result");
        };
        assert_eq!(result.count, 5);
        assert_eq!(service.scoring_calls(), 5);
    }

    #[tokio::test]
    async fn region_without_refined_coverage_is_unavailable() {
        let service = seeded_service(QuerySettings::default(), 3).await;
        // box well away from the seeded cells
        let empty_box = BoundingBox::new(30.0, 31.0, -100.0, -99.0).unwrap();

        let outcome = service
            .query("morel", &empty_box, Resolution::Refined, 0.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, QueryOutcome::Unavailable);
        assert_eq!(service.scoring_calls(), 0);
    }

    #[tokio::test]
    async fn min_score_filters_but_keeps_count_consistent() {
        let service = seeded_service(QuerySettings::default(), 3).await;
        // all seeded cells fully pass, so a high floor keeps them
        let outcome = service
            .query("morel", &bbox(), Resolution::Refined, 0.9, Utc::now())
            .await
            .unwrap();
        let QueryOutcome::Ready(result) = outcome else {
            panic!("expected a ready result");
        };
        assert_eq!(result.count, result.cells.len());
        assert_eq!(result.count, 3);
        assert!(result.cells.iter().all(|c| c.score >= 0.9));
    }

    #[tokio::test]
    async fn unknown_species_is_not_found() {
        let service = seeded_service(QuerySettings::default(), 1).await;
        let err = service
            .query("porcini", &bbox(), Resolution::Refined, 0.0, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_min_score_is_rejected() {
        let service = seeded_service(QuerySettings::default(), 1).await;
        let err = service
            .query("morel", &bbox(), Resolution::Refined, 1.5, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn result_order_is_stable() {
        let service = seeded_service(QuerySettings::default(), 4).await;
        let as_of = Utc::now();
        let first = service
            .query("morel", &bbox(), Resolution::Refined, 0.0, as_of)
            .await
            .unwrap();
        let second = service
            .query("morel", &bbox(), Resolution::Refined, 0.0, as_of)
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
