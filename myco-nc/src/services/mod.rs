//! Service layer
//!
//! Freshness tracking, the merge engine (the grid's only writer), the pure
//! scoring engine, and the windowed nowcast query service.

pub mod freshness;
pub mod merge;
pub mod nowcast;
pub mod scoring;

pub use freshness::{FreshnessStatus, FreshnessTracker, SourceFreshness};
pub use merge::{FieldUpdate, FieldValue, MergeEngine, MergeOutcome};
pub use nowcast::{NowcastResult, NowcastService, QueryOutcome, ScoredCellSummary};
pub use scoring::{score_cell, ScoreComponent};
