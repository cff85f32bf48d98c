//! In-memory habitat grid store
//!
//! The store is a keyed map plus a spatial predicate over centroids; it does
//! not merge. The merge engine is the only writer and always hands the store
//! a fully reconciled cell, so readers observe complete records only.
//!
//! Each resolution is an independent partition. Within a partition, cells are
//! indexed by 1° tiles keyed off the quantized centroid; a bounding-box query
//! walks only the tiles overlapping the box instead of scanning the grid.

use crate::models::{parse_cell_id, HabitatCell, Resolution};
use myco_common::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Inclusive geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&min_lat)
            || !(-90.0..=90.0).contains(&max_lat)
            || !(-180.0..=180.0).contains(&min_lon)
            || !(-180.0..=180.0).contains(&max_lon)
        {
            return Err(Error::InvalidInput(
                "Bounding box coordinates out of range".to_string(),
            ));
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(Error::InvalidInput(
                "Bounding box min bound exceeds max bound".to_string(),
            ));
        }
        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    /// The whole coordinate domain; used for catalog-wide coarse queries.
    pub fn whole_domain() -> Self {
        Self {
            min_lat: -90.0,
            max_lat: 90.0,
            min_lon: -180.0,
            max_lon: 180.0,
        }
    }

    /// Inclusive on all four bounds.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_lat
            && latitude <= self.max_lat
            && longitude >= self.min_lon
            && longitude <= self.max_lon
    }
}

/// 1° spatial tile key.
type TileKey = (i16, i16);

fn tile_of(latitude: f64, longitude: f64) -> TileKey {
    (latitude.floor() as i16, longitude.floor() as i16)
}

#[derive(Default)]
struct Partition {
    cells: HashMap<String, HabitatCell>,
    tiles: HashMap<TileKey, BTreeSet<String>>,
}

impl Partition {
    fn upsert(&mut self, cell: HabitatCell) {
        let tile = tile_of(cell.latitude, cell.longitude);
        self.tiles
            .entry(tile)
            .or_default()
            .insert(cell.cell_id.clone());
        self.cells.insert(cell.cell_id.clone(), cell);
    }

    /// Visit every cell whose centroid lies inside the box, walking only
    /// overlapping tiles.
    fn for_each_in<'a>(&'a self, bbox: &BoundingBox, mut visit: impl FnMut(&'a HabitatCell)) {
        let (min_tile_lat, min_tile_lon) = tile_of(bbox.min_lat, bbox.min_lon);
        let (max_tile_lat, max_tile_lon) = tile_of(bbox.max_lat, bbox.max_lon);
        for tile_lat in min_tile_lat..=max_tile_lat {
            for tile_lon in min_tile_lon..=max_tile_lon {
                let Some(ids) = self.tiles.get(&(tile_lat, tile_lon)) else {
                    continue;
                };
                for id in ids {
                    if let Some(cell) = self.cells.get(id) {
                        if bbox.contains(cell.latitude, cell.longitude) {
                            visit(cell);
                        }
                    }
                }
            }
        }
    }
}

/// Shared grid store. Reads proceed concurrently with unrelated writes;
/// writers replace whole cell values under the partition write lock.
#[derive(Default)]
pub struct GridStore {
    coarse: RwLock<Partition>,
    refined: RwLock<Partition>,
}

impl GridStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, resolution: Resolution) -> &RwLock<Partition> {
        match resolution {
            Resolution::Coarse => &self.coarse,
            Resolution::Refined => &self.refined,
        }
    }

    /// Replace the record for `cell.cell_id` wholesale. Field-level
    /// reconciliation happens in the merge engine before this call.
    pub async fn upsert(&self, cell: HabitatCell) {
        let mut partition = self.partition(cell.resolution).write().await;
        partition.upsert(cell);
    }

    /// Look up a cell by id; the resolution partition is parsed from the id.
    pub async fn get(&self, cell_id: &str) -> Option<HabitatCell> {
        let (resolution, _, _) = parse_cell_id(cell_id)?;
        let partition = self.partition(resolution).read().await;
        partition.cells.get(cell_id).cloned()
    }

    /// All cells whose centroid lies within the inclusive bounds, in stable
    /// (cell_id) order.
    pub async fn query_bounding_box(
        &self,
        bbox: &BoundingBox,
        resolution: Resolution,
    ) -> Vec<HabitatCell> {
        let partition = self.partition(resolution).read().await;
        let mut matches = Vec::new();
        partition.for_each_in(bbox, |cell| matches.push(cell.clone()));
        matches.sort_by(|a, b| a.cell_id.cmp(&b.cell_id));
        matches
    }

    /// Number of cells within the inclusive bounds. Cheap relative to
    /// `query_bounding_box`: no cloning, no sort.
    pub async fn count(&self, bbox: &BoundingBox, resolution: Resolution) -> usize {
        let partition = self.partition(resolution).read().await;
        let mut count = 0usize;
        partition.for_each_in(bbox, |_| count += 1);
        count
    }

    /// Total cells in one resolution partition.
    pub async fn len(&self, resolution: Resolution) -> usize {
        self.partition(resolution).read().await.cells.len()
    }

    pub async fn is_empty(&self, resolution: Resolution) -> bool {
        self.len(resolution).await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_at(lat: f64, lon: f64, resolution: Resolution) -> HabitatCell {
        HabitatCell::new_empty(lat, lon, resolution)
    }

    #[tokio::test]
    async fn get_returns_upserted_cell() {
        let store = GridStore::new();
        let cell = cell_at(47.4254, -121.4133, Resolution::Coarse);
        let id = cell.cell_id.clone();
        store.upsert(cell).await;

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.cell_id, id);
        assert!(store.get("coarse:0.0000:0.0000").await.is_none());
        assert!(store.get("not-a-cell-id").await.is_none());
    }

    #[tokio::test]
    async fn bounding_box_is_inclusive_on_all_bounds() {
        let store = GridStore::new();
        // centroid quantized to exactly 47.4000, -121.4000
        let cell = cell_at(47.4, -121.4, Resolution::Coarse);
        let (lat, lon) = (cell.latitude, cell.longitude);
        store.upsert(cell).await;

        // cell centroid exactly on each edge of the box
        for bbox in [
            BoundingBox::new(lat, lat + 1.0, lon, lon + 1.0).unwrap(),
            BoundingBox::new(lat - 1.0, lat, lon - 1.0, lon).unwrap(),
        ] {
            assert_eq!(
                store.query_bounding_box(&bbox, Resolution::Coarse).await.len(),
                1
            );
        }

        // just outside
        let outside = BoundingBox::new(lat + 0.001, lat + 1.0, lon, lon + 1.0).unwrap();
        assert_eq!(
            store.query_bounding_box(&outside, Resolution::Coarse).await.len(),
            0
        );
    }

    #[tokio::test]
    async fn queries_cross_tile_boundaries() {
        let store = GridStore::new();
        // cells in four adjacent 1° tiles
        for (lat, lon) in [(46.95, -121.95), (46.95, -122.05), (47.05, -121.95), (47.05, -122.05)] {
            store.upsert(cell_at(lat, lon, Resolution::Coarse)).await;
        }
        let bbox = BoundingBox::new(46.9, 47.1, -122.1, -121.9).unwrap();
        assert_eq!(store.count(&bbox, Resolution::Coarse).await, 4);

        let west_only = BoundingBox::new(46.9, 47.1, -122.1, -122.0).unwrap();
        assert_eq!(store.count(&west_only, Resolution::Coarse).await, 2);
    }

    #[tokio::test]
    async fn resolutions_are_independent_partitions() {
        let store = GridStore::new();
        store.upsert(cell_at(47.0, -121.0, Resolution::Coarse)).await;
        let bbox = BoundingBox::whole_domain();

        assert_eq!(store.count(&bbox, Resolution::Coarse).await, 1);
        assert_eq!(store.count(&bbox, Resolution::Refined).await, 0);
        assert!(store.is_empty(Resolution::Refined).await);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let store = GridStore::new();
        let mut cell = cell_at(47.0, -121.0, Resolution::Coarse);
        store.upsert(cell.clone()).await;

        cell.soil_temperature_c = Some(14.0);
        store.upsert(cell.clone()).await;

        let fetched = store.get(&cell.cell_id).await.unwrap();
        assert_eq!(fetched.soil_temperature_c, Some(14.0));
        assert_eq!(store.len(Resolution::Coarse).await, 1);
    }

    #[tokio::test]
    async fn query_results_are_sorted_by_cell_id() {
        let store = GridStore::new();
        for lon in [-121.0, -123.0, -122.0] {
            store.upsert(cell_at(47.0, lon, Resolution::Coarse)).await;
        }
        let cells = store
            .query_bounding_box(&BoundingBox::whole_domain(), Resolution::Coarse)
            .await;
        let ids: Vec<&str> = cells.iter().map(|c| c.cell_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn bounding_box_validation() {
        assert!(BoundingBox::new(47.0, 46.0, -122.0, -121.0).is_err());
        assert!(BoundingBox::new(46.0, 47.0, -121.0, -122.0).is_err());
        assert!(BoundingBox::new(-91.0, 47.0, -122.0, -121.0).is_err());
        assert!(BoundingBox::new(46.0, 47.0, -122.0, -121.0).is_ok());
    }

    #[test]
    fn tile_keys_floor_toward_negative_infinity() {
        assert_eq!(tile_of(47.5, -121.5), (47, -122));
        assert_eq!(tile_of(-0.5, 0.5), (-1, 0));
    }
}
