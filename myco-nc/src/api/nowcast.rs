//! Nowcast endpoints
//!
//! Coarse catalog-wide scores and refined box-scoped scores. Both responses
//! carry an `X-Data-Freshness` header with one `field=status` pair per
//! scoring-relevant source field, so a map client can flag stale layers
//! without a second request.

use axum::{
    extract::{Query, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::grid::BoundingBox;
use crate::models::Resolution;
use crate::services::nowcast::{NowcastResult, QueryOutcome};
use crate::AppState;

/// Query parameters for GET /api/nowcast
#[derive(Debug, Deserialize)]
pub struct NowcastParams {
    pub species_id: Option<String>,
    pub min_score: Option<f64>,
    /// Optional evaluation time override, for reproducible responses
    pub as_of: Option<DateTime<Utc>>,
}

/// Query parameters for GET /api/nowcast_refined
#[derive(Debug, Deserialize)]
pub struct RefinedParams {
    pub species_id: Option<String>,
    pub min_score: Option<f64>,
    pub as_of: Option<DateTime<Utc>>,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// GET /api/nowcast - coarse grid, whole catalog
pub async fn nowcast(
    State(state): State<AppState>,
    Query(params): Query<NowcastParams>,
) -> ApiResult<Response> {
    let species_id = params
        .species_id
        .unwrap_or_else(|| state.config.default_species_id.clone());
    let min_score = validate_min_score(params.min_score)?;
    let as_of = params.as_of.unwrap_or_else(Utc::now);

    let outcome = state
        .nowcast
        .query(
            &species_id,
            &BoundingBox::whole_domain(),
            Resolution::Coarse,
            min_score,
            as_of,
        )
        .await?;
    respond(&state, outcome, Resolution::Coarse).await
}

/// GET /api/nowcast_refined - refined grid, scoped to a bounding box
pub async fn nowcast_refined(
    State(state): State<AppState>,
    Query(params): Query<RefinedParams>,
) -> ApiResult<Response> {
    let species_id = params
        .species_id
        .unwrap_or_else(|| state.config.default_species_id.clone());
    let min_score = validate_min_score(params.min_score)?;
    let as_of = params.as_of.unwrap_or_else(Utc::now);
    let bbox = BoundingBox::new(
        params.min_lat,
        params.max_lat,
        params.min_lon,
        params.max_lon,
    )?;

    let outcome = state
        .nowcast
        .query(&species_id, &bbox, Resolution::Refined, min_score, as_of)
        .await?;
    respond(&state, outcome, Resolution::Refined).await
}

fn validate_min_score(min_score: Option<f64>) -> ApiResult<f64> {
    let min_score = min_score.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&min_score) {
        return Err(ApiError::BadRequest(format!(
            "min_score must be between 0.0 and 1.0, got {}",
            min_score
        )));
    }
    Ok(min_score)
}

async fn respond(
    state: &AppState,
    outcome: QueryOutcome,
    resolution: Resolution,
) -> ApiResult<Response> {
    match outcome {
        QueryOutcome::Ready(result) => with_freshness_header(state, result).await,
        QueryOutcome::RejectedTooLarge {
            candidates,
            max_cells,
        } => Err(ApiError::CapacityExceeded(format!(
            "Requested window covers {} cells (cap {}); zoom in further",
            candidates, max_cells
        ))),
        QueryOutcome::Unavailable => Err(ApiError::Unavailable(format!(
            "No {} data for the requested region yet; try again later",
            resolution.as_str()
        ))),
    }
}

/// Attach the `X-Data-Freshness` header: semicolon-separated `field=status`
/// pairs, one per field label a configured source feeds.
async fn with_freshness_header(state: &AppState, result: NowcastResult) -> ApiResult<Response> {
    let statuses = state.freshness.all_statuses().await;
    let pairs: Vec<String> = state
        .field_sources
        .iter()
        .map(|(field, source_id)| {
            let status = statuses
                .get(source_id)
                .map(|s| s.as_str())
                .unwrap_or("stale");
            format!("{}={}", field, status)
        })
        .collect();

    let mut response = Json(result).into_response();
    if !pairs.is_empty() {
        let value = HeaderValue::from_str(&pairs.join(";"))
            .map_err(|e| ApiError::Internal(format!("Bad freshness header: {}", e)))?;
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-data-freshness"), value);
    }
    Ok(response)
}

/// Build nowcast routes
pub fn nowcast_routes() -> Router<AppState> {
    Router::new()
        .route("/api/nowcast", get(nowcast))
        .route("/api/nowcast_refined", get(nowcast_refined))
}
