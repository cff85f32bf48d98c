//! Domain models for the nowcast service
//!
//! Habitat grid cells (with per-field provenance) and species profiles.

pub mod cell;
pub mod species;

pub use cell::{cell_id_for, parse_cell_id, CellField, FieldProvenance, HabitatCell, Resolution};
pub use species::{Component, HostSpecies, SpeciesCatalog, SpeciesProfile, ToleranceRange};
