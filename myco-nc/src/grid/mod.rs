//! Habitat grid storage
//!
//! Keyed storage of grid cells, partitioned by resolution and by spatial
//! tile so bounding-box queries run in time proportional to the matching
//! region rather than the whole grid.

pub mod store;

pub use store::{BoundingBox, GridStore};
