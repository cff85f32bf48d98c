//! Local seed feed source
//!
//! Reads a normalized batch from a JSON file on disk. Used for bootstrap
//! environments and tests where no staging endpoint is reachable.

use super::source::{FeedSource, SourceBatch};
use crate::models::Resolution;
use async_trait::async_trait;
use myco_common::{Error, Result};
use std::path::PathBuf;

pub struct SeedFileSource {
    source_id: String,
    resolution: Resolution,
    path: PathBuf,
}

impl SeedFileSource {
    pub fn new(source_id: impl Into<String>, resolution: Resolution, path: PathBuf) -> Self {
        Self {
            source_id: source_id.into(),
            resolution,
            path,
        }
    }
}

#[async_trait]
impl FeedSource for SeedFileSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn fetch(&self) -> Result<SourceBatch> {
        // read errors are transient (file may be mid-refresh); parse errors
        // are not and fail the run without retries
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Seed batch {} unreadable: {}", self.path.display(), e),
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Validation(format!(
                "Seed batch {} is malformed: {}",
                self.path.display(),
                e
            ))
        })
    }
}
