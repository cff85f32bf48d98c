//! Habitat grid cell model
//!
//! A cell is one spatial grid unit at a given resolution, identified by a
//! stable id derived from its quantized centroid. Every populated scalar field
//! carries a provenance entry ({source, observed_at}); `last_observation` is
//! the max timestamp across those entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Grid resolution tag. The two resolutions are independent partitions of the
/// grid store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Baseline grid, always available
    Coarse,
    /// Higher-resolution grid populated by the refinement pipeline
    Refined,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Coarse => "coarse",
            Resolution::Refined => "refined",
        }
    }

    /// Centroid quantization step in degrees. Refined cells are ~300 m at
    /// mid-latitudes (0.003°); coarse cells sit on the 0.05° anchor grid.
    pub fn grid_step(&self) -> f64 {
        match self {
            Resolution::Coarse => 0.05,
            Resolution::Refined => 0.003,
        }
    }

    pub fn parse(value: &str) -> Option<Resolution> {
        match value {
            "coarse" => Some(Resolution::Coarse),
            "refined" => Some(Resolution::Refined),
            _ => None,
        }
    }
}

/// One field of a habitat cell, as named in merge readings and provenance maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellField {
    SoilTemperatureC,
    PrecipitationMmLast7d,
    SoilMoistureIndex,
    CanopyDensityPct,
    ElevationM,
    HostSpecies,
}

impl CellField {
    /// All scalar fields, in canonical order.
    pub const SCALARS: [CellField; 5] = [
        CellField::SoilTemperatureC,
        CellField::PrecipitationMmLast7d,
        CellField::SoilMoistureIndex,
        CellField::CanopyDensityPct,
        CellField::ElevationM,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CellField::SoilTemperatureC => "soil_temperature_c",
            CellField::PrecipitationMmLast7d => "precipitation_mm_last_7d",
            CellField::SoilMoistureIndex => "soil_moisture_index",
            CellField::CanopyDensityPct => "canopy_density_pct",
            CellField::ElevationM => "elevation_m",
            CellField::HostSpecies => "host_species_present",
        }
    }

    pub fn parse(name: &str) -> Option<CellField> {
        match name {
            "soil_temperature_c" => Some(CellField::SoilTemperatureC),
            "precipitation_mm_last_7d" => Some(CellField::PrecipitationMmLast7d),
            "soil_moisture_index" => Some(CellField::SoilMoistureIndex),
            "canopy_density_pct" => Some(CellField::CanopyDensityPct),
            "elevation_m" => Some(CellField::ElevationM),
            "host_species_present" => Some(CellField::HostSpecies),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, CellField::HostSpecies)
    }

    /// Physically plausible value range for a scalar field. Values outside
    /// this window reject the whole reading at merge time.
    pub fn physical_range(&self) -> Option<(f64, f64)> {
        match self {
            CellField::SoilTemperatureC => Some((-60.0, 60.0)),
            CellField::PrecipitationMmLast7d => Some((0.0, 2_000.0)),
            CellField::SoilMoistureIndex => Some((0.0, 1.0)),
            CellField::CanopyDensityPct => Some((0.0, 100.0)),
            CellField::ElevationM => Some((-500.0, 9_000.0)),
            CellField::HostSpecies => None,
        }
    }
}

/// Provenance of one field of one cell: which source produced it, and when
/// the underlying observation was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

/// Latest fused environmental state for one grid cell.
///
/// Scalar fields are explicit options so "no data" and "zero value" stay
/// distinguishable in scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitatCell {
    pub cell_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub resolution: Resolution,
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
    pub host_species_present: BTreeSet<String>,
    /// Keyed by `CellField::name()`
    #[serde(default)]
    pub provenance: BTreeMap<String, FieldProvenance>,
    #[serde(default)]
    pub last_observation: Option<DateTime<Utc>>,
}

/// Quantize a coordinate onto the resolution's grid.
fn quantize(value: f64, step: f64) -> f64 {
    let q = (value / step).round() * step;
    // collapse -0.0 so id formatting is stable around the meridian/equator
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

/// Deterministic cell id for the cell containing (lat, lon) at a resolution.
///
/// Stable across re-ingestion: any coordinate inside the cell maps to the same
/// quantized centroid and therefore the same id.
pub fn cell_id_for(latitude: f64, longitude: f64, resolution: Resolution) -> String {
    let step = resolution.grid_step();
    format!(
        "{}:{:.4}:{:.4}",
        resolution.as_str(),
        quantize(latitude, step),
        quantize(longitude, step)
    )
}

/// Parse a cell id back into its resolution and quantized centroid.
pub fn parse_cell_id(cell_id: &str) -> Option<(Resolution, f64, f64)> {
    let mut parts = cell_id.splitn(3, ':');
    let resolution = Resolution::parse(parts.next()?)?;
    let latitude: f64 = parts.next()?.parse().ok()?;
    let longitude: f64 = parts.next()?.parse().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some((resolution, latitude, longitude))
}

impl HabitatCell {
    /// Create an empty cell at the quantized centroid containing (lat, lon).
    pub fn new_empty(latitude: f64, longitude: f64, resolution: Resolution) -> Self {
        let step = resolution.grid_step();
        let lat = quantize(latitude, step);
        let lon = quantize(longitude, step);
        Self {
            cell_id: cell_id_for(lat, lon, resolution),
            latitude: lat,
            longitude: lon,
            resolution,
            soil_temperature_c: None,
            precipitation_mm_last_7d: None,
            soil_moisture_index: None,
            canopy_density_pct: None,
            elevation_m: None,
            host_species_present: BTreeSet::new(),
            provenance: BTreeMap::new(),
            last_observation: None,
        }
    }

    /// Read a scalar field. Returns `None` for `HostSpecies`.
    pub fn scalar(&self, field: CellField) -> Option<f64> {
        match field {
            CellField::SoilTemperatureC => self.soil_temperature_c,
            CellField::PrecipitationMmLast7d => self.precipitation_mm_last_7d,
            CellField::SoilMoistureIndex => self.soil_moisture_index,
            CellField::CanopyDensityPct => self.canopy_density_pct,
            CellField::ElevationM => self.elevation_m,
            CellField::HostSpecies => None,
        }
    }

    /// Write a scalar field. `HostSpecies` is set via `host_species_present`.
    pub fn set_scalar(&mut self, field: CellField, value: f64) {
        match field {
            CellField::SoilTemperatureC => self.soil_temperature_c = Some(value),
            CellField::PrecipitationMmLast7d => self.precipitation_mm_last_7d = Some(value),
            CellField::SoilMoistureIndex => self.soil_moisture_index = Some(value),
            CellField::CanopyDensityPct => self.canopy_density_pct = Some(value),
            CellField::ElevationM => self.elevation_m = Some(value),
            CellField::HostSpecies => {}
        }
    }

    pub fn provenance_of(&self, field: CellField) -> Option<&FieldProvenance> {
        self.provenance.get(field.name())
    }

    /// Recompute `last_observation` as the max timestamp across provenance
    /// entries. Called after every reconciliation.
    pub fn recompute_last_observation(&mut self) {
        self.last_observation = self.provenance.values().map(|p| p.observed_at).max();
    }
}
