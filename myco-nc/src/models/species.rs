//! Species profile catalog
//!
//! Profiles are loaded once at startup from a JSON file into an immutable
//! snapshot. Catalog validation fails loudly at load time: a profile with a
//! zero total weight, a weight without a matching component, an unknown host
//! reference or a bad phenology month never reaches the scoring path.

use crate::models::cell::CellField;
use myco_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Numeric tolerance band for an environmental metric. Either bound may be
/// open (no constraint on that side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToleranceRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ToleranceRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    /// Human-readable range for score component details, e.g. `10-18`, `>=10`.
    pub fn describe(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{}-{}", min, max),
            (Some(min), None) => format!(">={}", min),
            (None, Some(max)) => format!("<={}", max),
            (None, None) => "unbounded".to_string(),
        }
    }

    fn validate(&self, context: &str) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::Config(format!(
                    "{}: inverted range ({} > {})",
                    context, min, max
                )));
            }
        }
        Ok(())
    }
}

/// One weighted sub-criterion of the scoring rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    SoilTemperature,
    Precipitation,
    SoilMoisture,
    Canopy,
    Elevation,
    HostSpecies,
    Phenology,
}

impl Component {
    pub fn name(&self) -> &'static str {
        match self {
            Component::SoilTemperature => "soil_temperature",
            Component::Precipitation => "precipitation",
            Component::SoilMoisture => "soil_moisture",
            Component::Canopy => "canopy",
            Component::Elevation => "elevation",
            Component::HostSpecies => "host_species",
            Component::Phenology => "phenology",
        }
    }

    /// The cell field a tolerance component reads, if any.
    pub fn cell_field(&self) -> Option<CellField> {
        match self {
            Component::SoilTemperature => Some(CellField::SoilTemperatureC),
            Component::Precipitation => Some(CellField::PrecipitationMmLast7d),
            Component::SoilMoisture => Some(CellField::SoilMoistureIndex),
            Component::Canopy => Some(CellField::CanopyDensityPct),
            Component::Elevation => Some(CellField::ElevationM),
            Component::HostSpecies | Component::Phenology => None,
        }
    }

    /// Unit suffix for component detail strings.
    pub fn unit(&self) -> &'static str {
        match self {
            Component::SoilTemperature => "°C",
            Component::Precipitation => "mm",
            Component::SoilMoisture => "",
            Component::Canopy => "%",
            Component::Elevation => "m",
            Component::HostSpecies | Component::Phenology => "",
        }
    }
}

/// A known mycorrhizal or saprotrophic host, referenced from profiles and
/// from cell host sets by its registry id (e.g. `douglas-fir`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSpecies {
    pub id: String,
    pub scientific_name: String,
    #[serde(default)]
    pub common_name: Option<String>,
}

/// Structured ecological profile for one target species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeciesProfile {
    /// Stable identifier used in APIs; immutable once scores reference it
    pub id: String,
    pub common_name: String,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub soil_temperature_c: Option<ToleranceRange>,
    #[serde(default)]
    pub precipitation_mm_last_7d: Option<ToleranceRange>,
    #[serde(default)]
    pub soil_moisture_index: Option<ToleranceRange>,
    #[serde(default)]
    pub canopy_density_pct: Option<ToleranceRange>,
    #[serde(default)]
    pub elevation_m: Option<ToleranceRange>,
    /// Host registry ids this species associates with
    #[serde(default)]
    pub host_species: Vec<String>,
    /// Months (1-12) when fruiting is possible
    #[serde(default)]
    pub phenology_months: Vec<u32>,
    /// Weight per declared component, keyed by `Component::name()`
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub soil_type_notes: Option<String>,
    /// Reference citations
    #[serde(default)]
    pub sources: Vec<String>,
}

impl SpeciesProfile {
    /// Tolerance range for a component, if that component is a tolerance.
    pub fn tolerance(&self, component: Component) -> Option<&ToleranceRange> {
        match component {
            Component::SoilTemperature => self.soil_temperature_c.as_ref(),
            Component::Precipitation => self.precipitation_mm_last_7d.as_ref(),
            Component::SoilMoisture => self.soil_moisture_index.as_ref(),
            Component::Canopy => self.canopy_density_pct.as_ref(),
            Component::Elevation => self.elevation_m.as_ref(),
            Component::HostSpecies | Component::Phenology => None,
        }
    }

    /// Components this profile declares, in declaration order.
    pub fn declared_components(&self) -> Vec<Component> {
        let mut components = Vec::new();
        for component in [
            Component::SoilTemperature,
            Component::Precipitation,
            Component::SoilMoisture,
            Component::Canopy,
            Component::Elevation,
        ] {
            if self.tolerance(component).is_some() {
                components.push(component);
            }
        }
        if !self.host_species.is_empty() {
            components.push(Component::HostSpecies);
        }
        if !self.phenology_months.is_empty() {
            components.push(Component::Phenology);
        }
        components
    }

    /// Weight of a declared component. Catalog validation guarantees the
    /// entry exists; missing entries count as zero.
    pub fn weight_of(&self, component: Component) -> f64 {
        self.weights.get(component.name()).copied().unwrap_or(0.0)
    }

    /// Sum of weights across declared components.
    pub fn total_weight(&self) -> f64 {
        self.declared_components()
            .iter()
            .map(|c| self.weight_of(*c))
            .sum()
    }

    fn validate(&self, known_hosts: &BTreeSet<&str>) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("Species profile with empty id".to_string()));
        }

        for component in [
            Component::SoilTemperature,
            Component::Precipitation,
            Component::SoilMoisture,
            Component::Canopy,
            Component::Elevation,
        ] {
            if let Some(range) = self.tolerance(component) {
                range.validate(&format!("{}: {}", self.id, component.name()))?;
            }
        }

        for month in &self.phenology_months {
            if !(1..=12).contains(month) {
                return Err(Error::Config(format!(
                    "{}: phenology month {} out of range 1-12",
                    self.id, month
                )));
            }
        }

        for host in &self.host_species {
            if !known_hosts.contains(host.as_str()) {
                return Err(Error::Config(format!(
                    "{}: unknown host species '{}'",
                    self.id, host
                )));
            }
        }

        // every declared component has exactly one weight, and nothing else
        let declared: BTreeSet<&str> = self
            .declared_components()
            .iter()
            .map(|c| c.name())
            .collect();
        for name in self.weights.keys() {
            if !declared.contains(name.as_str()) {
                return Err(Error::Config(format!(
                    "{}: weight '{}' has no declared component",
                    self.id, name
                )));
            }
        }
        for name in &declared {
            match self.weights.get(*name) {
                None => {
                    return Err(Error::Config(format!(
                        "{}: declared component '{}' has no weight",
                        self.id, name
                    )));
                }
                Some(weight) if *weight < 0.0 => {
                    return Err(Error::Config(format!(
                        "{}: negative weight for '{}'",
                        self.id, name
                    )));
                }
                Some(_) => {}
            }
        }

        if declared.is_empty() {
            return Err(Error::Config(format!(
                "{}: profile declares no components",
                self.id
            )));
        }
        if self.total_weight() <= 0.0 {
            return Err(Error::Config(format!(
                "{}: total component weight is zero",
                self.id
            )));
        }
        Ok(())
    }
}

/// Immutable catalog snapshot: host registry plus species profiles, in file
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeciesCatalog {
    #[serde(default)]
    pub hosts: Vec<HostSpecies>,
    pub species: Vec<SpeciesProfile>,
}

impl SpeciesCatalog {
    /// Load and validate a catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate a catalog from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: SpeciesCatalog = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Parse species catalog failed: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        let known_hosts: BTreeSet<&str> = self.hosts.iter().map(|h| h.id.as_str()).collect();
        if known_hosts.len() != self.hosts.len() {
            return Err(Error::Config("Duplicate host id in registry".to_string()));
        }

        let mut seen = BTreeSet::new();
        for profile in &self.species {
            profile.validate(&known_hosts)?;
            if !seen.insert(profile.id.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate species id '{}'",
                    profile.id
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, species_id: &str) -> Option<&SpeciesProfile> {
        self.species.iter().find(|p| p.id == species_id)
    }

    /// Profile ids in catalog (file) order.
    pub fn list_ids(&self) -> Vec<String> {
        self.species.iter().map(|p| p.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_json(weights: &str) -> String {
        format!(
            r#"{{
                "hosts": [
                    {{"id": "douglas-fir", "scientific_name": "Pseudotsuga menziesii"}}
                ],
                "species": [
                    {{
                        "id": "morel",
                        "common_name": "Morel",
                        "soil_temperature_c": {{"min": 10, "max": 18}},
                        "precipitation_mm_last_7d": {{"min": 10, "max": 50}},
                        "host_species": ["douglas-fir"],
                        "weights": {weights}
                    }}
                ]
            }}"#
        )
    }

    #[test]
    fn valid_catalog_loads() {
        let catalog = SpeciesCatalog::from_json(&catalog_json(
            r#"{"soil_temperature": 0.4, "precipitation": 0.3, "host_species": 0.3}"#,
        ))
        .unwrap();
        assert_eq!(catalog.list_ids(), vec!["morel".to_string()]);
        let profile = catalog.get("morel").unwrap();
        assert_eq!(
            profile.declared_components(),
            vec![
                Component::SoilTemperature,
                Component::Precipitation,
                Component::HostSpecies
            ]
        );
        assert!((profile.total_weight() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_total_weight_is_a_configuration_error() {
        let err = SpeciesCatalog::from_json(&catalog_json(
            r#"{"soil_temperature": 0.0, "precipitation": 0.0, "host_species": 0.0}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("total component weight is zero"));
    }

    #[test]
    fn missing_weight_for_declared_component_rejected() {
        let err = SpeciesCatalog::from_json(&catalog_json(
            r#"{"soil_temperature": 0.4, "precipitation": 0.3}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("has no weight"));
    }

    #[test]
    fn weight_without_component_rejected() {
        let err = SpeciesCatalog::from_json(&catalog_json(
            r#"{"soil_temperature": 0.4, "precipitation": 0.3, "host_species": 0.3, "phenology": 0.2}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("no declared component"));
    }

    #[test]
    fn unknown_host_reference_rejected() {
        let json = r#"{
            "hosts": [],
            "species": [{
                "id": "morel",
                "common_name": "Morel",
                "host_species": ["douglas-fir"],
                "weights": {"host_species": 1.0}
            }]
        }"#;
        let err = SpeciesCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("unknown host species"));
    }

    #[test]
    fn phenology_month_out_of_range_rejected() {
        let json = r#"{
            "hosts": [],
            "species": [{
                "id": "morel",
                "common_name": "Morel",
                "phenology_months": [4, 13],
                "weights": {"phenology": 1.0}
            }]
        }"#;
        let err = SpeciesCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn open_bounds_contain_correctly() {
        let min_only = ToleranceRange {
            min: Some(10.0),
            max: None,
        };
        assert!(min_only.contains(10.0));
        assert!(min_only.contains(1_000.0));
        assert!(!min_only.contains(9.9));
        assert_eq!(min_only.describe(), ">=10");

        let max_only = ToleranceRange {
            min: None,
            max: Some(18.0),
        };
        assert!(max_only.contains(-40.0));
        assert!(!max_only.contains(18.1));
        assert_eq!(max_only.describe(), "<=18");
    }
}
