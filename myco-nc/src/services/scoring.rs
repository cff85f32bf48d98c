//! Deterministic habitat scoring
//!
//! Pure evaluation of a species profile against one habitat cell: no hidden
//! state, no randomness, no side effects, so a given (profile, cell,
//! evaluation month) triple always reproduces the same score. Scoring many
//! cells needs no synchronization.

use crate::models::{Component, HabitatCell, SpeciesProfile};
use serde::{Deserialize, Serialize};

/// One evaluated sub-criterion with its copied weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub weight: f64,
}

/// Score a cell for a species at the given evaluation month (1-12).
///
/// Each declared component passes or fails independently; a missing cell
/// field fails its component with a "no data" detail rather than erroring.
/// Score = (sum of passed weights) / (sum of declared weights), in [0, 1].
/// Catalog validation rejects zero-total-weight profiles at load time, so
/// the zero guard here is unreachable for catalog-loaded profiles.
pub fn score_cell(
    profile: &SpeciesProfile,
    cell: &HabitatCell,
    evaluation_month: u32,
) -> (f64, Vec<ScoreComponent>) {
    let mut components = Vec::new();

    for component in profile.declared_components() {
        let weight = profile.weight_of(component);
        let (passed, detail) = match component {
            Component::HostSpecies => evaluate_hosts(profile, cell),
            Component::Phenology => (
                profile.phenology_months.contains(&evaluation_month),
                format!("month={}", evaluation_month),
            ),
            tolerance => evaluate_tolerance(profile, cell, tolerance),
        };
        components.push(ScoreComponent {
            name: component.name().to_string(),
            passed,
            detail,
            weight,
        });
    }

    let total: f64 = components.iter().map(|c| c.weight).sum();
    if total <= 0.0 {
        return (0.0, components);
    }
    let passed: f64 = components.iter().filter(|c| c.passed).map(|c| c.weight).sum();
    (passed / total, components)
}

fn evaluate_tolerance(
    profile: &SpeciesProfile,
    cell: &HabitatCell,
    component: Component,
) -> (bool, String) {
    // declared_components only yields tolerance components that are present
    let Some(range) = profile.tolerance(component) else {
        return (false, "no range declared".to_string());
    };
    let Some(field) = component.cell_field() else {
        return (false, "no cell field".to_string());
    };
    match cell.scalar(field) {
        Some(value) => (
            range.contains(value),
            format!(
                "observed={:.1}{}, range={}",
                value,
                component.unit(),
                range.describe()
            ),
        ),
        None => (false, "no data".to_string()),
    }
}

fn evaluate_hosts(profile: &SpeciesProfile, cell: &HabitatCell) -> (bool, String) {
    let matched: Vec<&str> = profile
        .host_species
        .iter()
        .filter(|host| cell.host_species_present.contains(*host))
        .map(|host| host.as_str())
        .collect();
    if matched.is_empty() {
        (false, "no host present".to_string())
    } else {
        (true, format!("matched {}", matched.join(", ")))
    }
}
