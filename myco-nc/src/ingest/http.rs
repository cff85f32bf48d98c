//! HTTP feed source
//!
//! Fetches a normalized batch from a staging endpoint. Raw provider feeds
//! (NOAA, Open-Meteo, SMAP, NLCD, FIA) are normalized by external adapters
//! before they reach this endpoint, so this client speaks only the batch
//! format.

use super::source::{FeedSource, SourceBatch};
use crate::models::Resolution;
use async_trait::async_trait;
use myco_common::{Error, Result};
use std::time::Duration;

const USER_AGENT: &str = concat!("myco-nc/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct HttpBatchSource {
    source_id: String,
    resolution: Resolution,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpBatchSource {
    pub fn new(
        source_id: impl Into<String>,
        resolution: Resolution,
        endpoint: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            source_id: source_id.into(),
            resolution,
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl FeedSource for HttpBatchSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn fetch(&self) -> Result<SourceBatch> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Fetch {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Internal(format!(
                "Fetch {} returned {}",
                self.endpoint, status
            )));
        }

        // a well-formed HTTP response with a malformed body will not improve
        // on retry
        let body = response
            .text()
            .await
            .map_err(|e| Error::Internal(format!("Read {} body failed: {}", self.endpoint, e)))?;
        serde_json::from_str(&body).map_err(|e| {
            Error::Validation(format!("Batch from {} is malformed: {}", self.endpoint, e))
        })
    }
}
