//! Species catalog endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Species list response
#[derive(Debug, Serialize)]
pub struct SpeciesResponse {
    /// Profile ids in catalog order
    pub species: Vec<String>,
}

/// GET /api/species
pub async fn list_species(State(state): State<AppState>) -> Json<SpeciesResponse> {
    Json(SpeciesResponse {
        species: state.catalog.list_ids(),
    })
}

/// Build species routes
pub fn species_routes() -> Router<AppState> {
    Router::new().route("/api/species", get(list_species))
}
