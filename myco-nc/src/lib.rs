//! myco-nc library interface
//!
//! Exposes the application state and router builder so integration tests can
//! drive the full HTTP surface without a listener.

pub mod api;
pub mod db;
pub mod error;
pub mod grid;
pub mod ingest;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use myco_common::config::ServiceConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::grid::GridStore;
use crate::models::SpeciesCatalog;
use crate::services::freshness::FreshnessTracker;
use crate::services::nowcast::NowcastService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Habitat grid store (merge engine is the only writer)
    pub grid: Arc<GridStore>,
    /// Per-source freshness tracker
    pub freshness: Arc<FreshnessTracker>,
    /// Immutable species catalog snapshot
    pub catalog: Arc<SpeciesCatalog>,
    /// Windowed query service
    pub nowcast: Arc<NowcastService>,
    /// Service configuration
    pub config: Arc<ServiceConfig>,
    /// Field label → source_id, for the X-Data-Freshness header
    pub field_sources: Arc<BTreeMap<String, String>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        grid: Arc<GridStore>,
        freshness: Arc<FreshnessTracker>,
        catalog: Arc<SpeciesCatalog>,
        config: Arc<ServiceConfig>,
    ) -> Self {
        let nowcast = Arc::new(NowcastService::new(
            grid.clone(),
            catalog.clone(),
            config.query,
        ));
        let mut field_sources = BTreeMap::new();
        for source in &config.sources {
            for field in &source.fields {
                field_sources.insert(field.clone(), source.source_id.clone());
            }
        }
        Self {
            grid,
            freshness,
            catalog,
            nowcast,
            config,
            field_sources: Arc::new(field_sources),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::species_routes())
        .merge(api::nowcast_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
