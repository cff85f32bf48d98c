//! HTTP API for the nowcast service
//!
//! The outer routing layer mounts these routes; handlers stay thin and
//! delegate to the service tier.

pub mod health;
pub mod nowcast;
pub mod species;

pub use health::health_routes;
pub use nowcast::nowcast_routes;
pub use species::species_routes;
