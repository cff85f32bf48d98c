//! Feed sources and the normalized batch format
//!
//! Provider-specific download/parsing adapters live outside this service;
//! every source hands the pipeline the same normalized batch of per-point
//! readings. The transform stage quantizes readings onto the source's target
//! grid and folds them into per-cell field updates for the merge engine.

use crate::models::{cell_id_for, Resolution};
use crate::services::merge::{FieldUpdate, FieldValue};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use myco_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One normalized observation at a point. Absent fields are simply not
/// carried by this source's reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceReading {
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub soil_temperature_c: Option<f64>,
    #[serde(default)]
    pub precipitation_mm_last_7d: Option<f64>,
    #[serde(default)]
    pub soil_moisture_index: Option<f64>,
    #[serde(default)]
    pub canopy_density_pct: Option<f64>,
    #[serde(default)]
    pub elevation_m: Option<f64>,
    #[serde(default)]
    pub host_species_present: Option<Vec<String>>,
}

/// A batch of readings from one fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBatch {
    pub readings: Vec<SourceReading>,
}

/// One feed source. Implementations fetch normalized batches; everything
/// after the fetch is shared pipeline machinery.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn source_id(&self) -> &str;
    /// Grid partition this source feeds
    fn resolution(&self) -> Resolution;
    async fn fetch(&self) -> Result<SourceBatch>;
}

/// Batch-level validation, before transformation.
pub fn validate_batch(batch: &SourceBatch, now: DateTime<Utc>) -> Result<()> {
    if batch.readings.is_empty() {
        return Err(Error::Validation("Batch carries no readings".to_string()));
    }
    let horizon = now + Duration::hours(1);
    for (index, reading) in batch.readings.iter().enumerate() {
        if !(-90.0..=90.0).contains(&reading.latitude)
            || !(-180.0..=180.0).contains(&reading.longitude)
        {
            return Err(Error::Validation(format!(
                "Reading {} has out-of-range coordinates ({}, {})",
                index, reading.latitude, reading.longitude
            )));
        }
        if reading.observed_at > horizon {
            return Err(Error::Validation(format!(
                "Reading {} observed_at {} is in the future",
                index, reading.observed_at
            )));
        }
    }
    Ok(())
}

/// Field updates destined for one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdates {
    pub cell_id: String,
    pub updates: BTreeMap<String, FieldUpdate>,
}

/// Quantize a validated batch onto the target grid, one update set per
/// affected cell. When several readings land in the same cell, the freshest
/// value per field is kept, so the merge engine is called once per cell.
pub fn transform_batch(batch: &SourceBatch, resolution: Resolution) -> Vec<CellUpdates> {
    let mut by_cell: BTreeMap<String, BTreeMap<String, FieldUpdate>> = BTreeMap::new();

    for reading in &batch.readings {
        let cell_id = cell_id_for(reading.latitude, reading.longitude, resolution);
        let updates = by_cell.entry(cell_id).or_default();

        let mut put = |name: &str, value: FieldValue| {
            let candidate = FieldUpdate {
                value,
                observed_at: reading.observed_at,
            };
            match updates.get(name) {
                Some(existing) if existing.observed_at >= candidate.observed_at => {}
                _ => {
                    updates.insert(name.to_string(), candidate);
                }
            }
        };

        if let Some(v) = reading.soil_temperature_c {
            put("soil_temperature_c", FieldValue::Scalar(v));
        }
        if let Some(v) = reading.precipitation_mm_last_7d {
            put("precipitation_mm_last_7d", FieldValue::Scalar(v));
        }
        if let Some(v) = reading.soil_moisture_index {
            put("soil_moisture_index", FieldValue::Scalar(v));
        }
        if let Some(v) = reading.canopy_density_pct {
            put("canopy_density_pct", FieldValue::Scalar(v));
        }
        if let Some(v) = reading.elevation_m {
            put("elevation_m", FieldValue::Scalar(v));
        }
        if let Some(hosts) = &reading.host_species_present {
            put(
                "host_species_present",
                FieldValue::Hosts(hosts.iter().cloned().collect()),
            );
        }
    }

    by_cell
        .into_iter()
        .filter(|(_, updates)| !updates.is_empty())
        .map(|(cell_id, updates)| CellUpdates { cell_id, updates })
        .collect()
}
