//! Per-source data freshness tracking
//!
//! Each data source has one freshness record; status is derived on demand
//! from the age of the last successful ingestion, never stored. An explicit
//! failure recorded by the ingestion path overrides the age-derived status
//! until the next success.
//!
//! Records are written through to the `freshness` table so status survives a
//! restart; a write-through failure is logged and never blocks ingestion.

use chrono::{DateTime, Duration, Utc};
use myco_common::config::FreshnessSettings;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::warn;

/// Derived health state of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessStatus {
    Ok,
    Warning,
    Stale,
    Failed,
}

impl FreshnessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessStatus::Ok => "ok",
            FreshnessStatus::Warning => "warning",
            FreshnessStatus::Stale => "stale",
            FreshnessStatus::Failed => "failed",
        }
    }
}

/// One source's freshness record.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFreshness {
    pub source_id: String,
    pub expected_interval: Duration,
    pub last_ingested: Option<DateTime<Utc>>,
    /// Set when the most recent attempt errored; cleared by the next success
    pub failed: bool,
    pub notes: Option<String>,
}

/// Derive status from a record at a point in time.
///
/// `age = now - last_ingested`; `ok` while age ≤ warning_factor × interval,
/// `warning` while age ≤ stale_factor × interval, `stale` beyond. A record
/// with no ingest yet is `stale`. `failed` overrides everything.
pub fn derive_status(
    policy: &FreshnessSettings,
    record: &SourceFreshness,
    now: DateTime<Utc>,
) -> FreshnessStatus {
    if record.failed {
        return FreshnessStatus::Failed;
    }
    let Some(last_ingested) = record.last_ingested else {
        return FreshnessStatus::Stale;
    };
    let age_ms = (now - last_ingested).num_milliseconds() as f64;
    let interval_ms = record.expected_interval.num_milliseconds() as f64;
    if interval_ms <= 0.0 {
        return FreshnessStatus::Stale;
    }
    if age_ms <= policy.warning_factor * interval_ms {
        FreshnessStatus::Ok
    } else if age_ms <= policy.stale_factor * interval_ms {
        FreshnessStatus::Warning
    } else {
        FreshnessStatus::Stale
    }
}

/// Tracks freshness for every configured source.
pub struct FreshnessTracker {
    policy: FreshnessSettings,
    db: Option<SqlitePool>,
    sources: RwLock<BTreeMap<String, SourceFreshness>>,
}

impl FreshnessTracker {
    pub fn new(policy: FreshnessSettings) -> Self {
        Self {
            policy,
            db: None,
            sources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Tracker with SQLite write-through.
    pub fn with_db(policy: FreshnessSettings, db: SqlitePool) -> Self {
        Self {
            policy,
            db: Some(db),
            sources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a configured source so `/api/health` reports it before its
    /// first ingest (status `stale` until then). Keeps any existing record.
    pub async fn register_source(&self, source_id: &str, expected_interval: Duration) {
        let mut sources = self.sources.write().await;
        sources
            .entry(source_id.to_string())
            .and_modify(|r| r.expected_interval = expected_interval)
            .or_insert_with(|| SourceFreshness {
                source_id: source_id.to_string(),
                expected_interval,
                last_ingested: None,
                failed: false,
                notes: None,
            });
    }

    /// Restore records persisted by a previous run. Only known fields
    /// (`last_ingested`, `failed`, notes) are taken; the cadence comes from
    /// current configuration.
    pub async fn restore(&self, records: Vec<SourceFreshness>) {
        let mut sources = self.sources.write().await;
        for record in records {
            match sources.get_mut(&record.source_id) {
                Some(existing) => {
                    existing.last_ingested = record.last_ingested;
                    existing.failed = record.failed;
                    existing.notes = record.notes;
                }
                None => {
                    sources.insert(record.source_id.clone(), record);
                }
            }
        }
    }

    /// Record a successful ingestion attempt. Creates the record on first
    /// success of an unregistered source and clears any failure flag.
    pub async fn record_success(&self, source_id: &str, at: DateTime<Utc>) {
        let snapshot = {
            let mut sources = self.sources.write().await;
            let record = sources
                .entry(source_id.to_string())
                .or_insert_with(|| SourceFreshness {
                    source_id: source_id.to_string(),
                    expected_interval: Duration::hours(24),
                    last_ingested: None,
                    failed: false,
                    notes: None,
                });
            record.last_ingested = Some(at);
            record.failed = false;
            record.notes = None;
            record.clone()
        };
        self.persist(&snapshot).await;
    }

    /// Record a failed ingestion attempt. The source reports `failed`
    /// regardless of age until the next success; `last_ingested` is
    /// untouched.
    pub async fn record_failure(&self, source_id: &str, reason: &str) {
        let snapshot = {
            let mut sources = self.sources.write().await;
            let record = sources
                .entry(source_id.to_string())
                .or_insert_with(|| SourceFreshness {
                    source_id: source_id.to_string(),
                    expected_interval: Duration::hours(24),
                    last_ingested: None,
                    failed: false,
                    notes: None,
                });
            record.failed = true;
            record.notes = Some(reason.to_string());
            record.clone()
        };
        self.persist(&snapshot).await;
    }

    pub async fn status_of(&self, source_id: &str) -> Option<FreshnessStatus> {
        self.status_of_at(source_id, Utc::now()).await
    }

    pub async fn status_of_at(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> Option<FreshnessStatus> {
        let sources = self.sources.read().await;
        sources
            .get(source_id)
            .map(|record| derive_status(&self.policy, record, now))
    }

    pub async fn all_statuses(&self) -> BTreeMap<String, FreshnessStatus> {
        self.all_statuses_at(Utc::now()).await
    }

    pub async fn all_statuses_at(
        &self,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, FreshnessStatus> {
        let sources = self.sources.read().await;
        sources
            .iter()
            .map(|(id, record)| (id.clone(), derive_status(&self.policy, record, now)))
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<SourceFreshness> {
        let sources = self.sources.read().await;
        sources.values().cloned().collect()
    }

    async fn persist(&self, record: &SourceFreshness) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = crate::db::freshness::save_source(db, record).await {
            warn!(
                source_id = %record.source_id,
                error = %e,
                "Failed to persist freshness record"
            );
        }
    }
}
