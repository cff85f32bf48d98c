//! Ingestion orchestration
//!
//! One independent pipeline per configured source, each a sequential stage
//! machine: Fetching → Validating → Transforming → Publishing → Done, with
//! Failed reachable from any stage. Pipelines run as separate tokio tasks and
//! share no mutable state except the merge engine's synchronized write path,
//! so one source's failure cannot block or delay the others.
//!
//! Stage failures retry in place with exponential backoff up to a cumulative
//! ceiling per run; a failed run records a freshness failure and the next
//! scheduled run starts fresh. Partial publishes are safe: re-running
//! reconciles idempotently under the merge engine's freshness rule.

pub mod http;
pub mod seed;
pub mod source;

pub use http::HttpBatchSource;
pub use seed::SeedFileSource;
pub use source::{FeedSource, SourceBatch, SourceReading};

use crate::models::Resolution;
use crate::services::freshness::FreshnessTracker;
use crate::services::merge::MergeEngine;
use chrono::{DateTime, Utc};
use myco_common::config::{IngestSettings, ServiceConfig, SourceKind};
use myco_common::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pipeline stage progression for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Fetching,
    Validating,
    Transforming,
    Publishing,
    Done,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Fetching => "fetching",
            RunStage::Validating => "validating",
            RunStage::Transforming => "transforming",
            RunStage::Publishing => "publishing",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source_id: String,
    pub stage: RunStage,
    pub cells_published: usize,
    pub cells_rejected: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Retry one stage with exponential backoff until it succeeds, fails
/// fatally, is cancelled, or the run's cumulative retry budget is spent.
async fn retry_stage<T, F, Fut>(
    stage: RunStage,
    source_id: &str,
    policy: &IngestSettings,
    run_started: Instant,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let ceiling = Duration::from_secs(policy.ceiling_secs);
    let mut backoff = Duration::from_secs(policy.initial_backoff_secs);
    let max_backoff = Duration::from_secs(policy.max_backoff_secs);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if attempt > 1 {
            debug!(
                source_id = %source_id,
                stage = stage.as_str(),
                attempt,
                "Retrying pipeline stage"
            );
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => {
                error!(
                    source_id = %source_id,
                    stage = stage.as_str(),
                    attempt,
                    error = %err,
                    "Pipeline stage failed fatally"
                );
                return Err(err);
            }
            Err(err) => {
                let elapsed = run_started.elapsed();
                if elapsed >= ceiling {
                    error!(
                        source_id = %source_id,
                        stage = stage.as_str(),
                        attempt,
                        elapsed_secs = elapsed.as_secs(),
                        ceiling_secs = ceiling.as_secs(),
                        "Pipeline stage failed: retry budget exhausted"
                    );
                    return Err(Error::Internal(format!(
                        "{} failed after {} attempts ({} s elapsed, ceiling {} s): {}",
                        stage.as_str(),
                        attempt,
                        elapsed.as_secs(),
                        ceiling.as_secs(),
                        err
                    )));
                }

                let sleep_for = backoff.min(max_backoff).min(ceiling - elapsed);
                warn!(
                    source_id = %source_id,
                    stage = stage.as_str(),
                    attempt,
                    backoff_secs = sleep_for.as_secs(),
                    error = %err,
                    "Pipeline stage failed, will retry after backoff"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(Error::Internal("Run cancelled".to_string()));
                    }
                    _ = tokio::time::sleep(sleep_for) => {}
                }
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

/// Execute one full pipeline run for a source.
pub async fn run_pipeline(
    source: &dyn FeedSource,
    merge: &MergeEngine,
    freshness: &FreshnessTracker,
    policy: &IngestSettings,
    cancel: &CancellationToken,
) -> RunReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let run_started = Instant::now();
    let source_id = source.source_id().to_string();

    info!(source_id = %source_id, run_id = %run_id, "Starting ingestion run");

    let mut report = RunReport {
        run_id,
        source_id: source_id.clone(),
        stage: RunStage::Fetching,
        cells_published: 0,
        cells_rejected: 0,
        started_at,
        finished_at: started_at,
        error: None,
    };

    let outcome = execute_stages(source, merge, policy, cancel, run_started, &mut report).await;
    report.finished_at = Utc::now();

    match outcome {
        Ok(()) if report.cells_rejected > 0 => {
            // any rejected reading marks the source failed for this run;
            // accepted cells stay published (idempotent re-run reconciles)
            report.stage = RunStage::Failed;
            let reason = format!(
                "{} of {} cell readings rejected",
                report.cells_rejected,
                report.cells_rejected + report.cells_published
            );
            freshness.record_failure(&source_id, &reason).await;
            report.error = Some(reason);
            warn!(
                source_id = %source_id,
                run_id = %run_id,
                published = report.cells_published,
                rejected = report.cells_rejected,
                "Ingestion run completed with rejections"
            );
        }
        Ok(()) => {
            report.stage = RunStage::Done;
            info!(
                source_id = %source_id,
                run_id = %run_id,
                published = report.cells_published,
                "Ingestion run completed"
            );
        }
        Err(err) => {
            report.stage = RunStage::Failed;
            report.error = Some(err.to_string());
            if !cancel.is_cancelled() {
                freshness.record_failure(&source_id, &err.to_string()).await;
                error!(
                    source_id = %source_id,
                    run_id = %run_id,
                    error = %err,
                    "Ingestion run failed"
                );
            }
        }
    }
    report
}

async fn execute_stages(
    source: &dyn FeedSource,
    merge: &MergeEngine,
    policy: &IngestSettings,
    cancel: &CancellationToken,
    run_started: Instant,
    report: &mut RunReport,
) -> Result<()> {
    let source_id = source.source_id();

    report.stage = RunStage::Fetching;
    let batch = retry_stage(
        RunStage::Fetching,
        source_id,
        policy,
        run_started,
        cancel,
        || source.fetch(),
    )
    .await?;

    report.stage = RunStage::Validating;
    retry_stage(
        RunStage::Validating,
        source_id,
        policy,
        run_started,
        cancel,
        || async { source::validate_batch(&batch, Utc::now()) },
    )
    .await?;

    report.stage = RunStage::Transforming;
    let cells = source::transform_batch(&batch, source.resolution());
    if cells.is_empty() {
        return Err(Error::Validation(
            "Batch transformed to zero usable cell updates".to_string(),
        ));
    }

    report.stage = RunStage::Publishing;
    for cell in &cells {
        if cancel.is_cancelled() {
            return Err(Error::Internal("Run cancelled".to_string()));
        }
        match merge
            .merge_reading(source_id, &cell.cell_id, &cell.updates, source.resolution())
            .await
        {
            Ok(_) => report.cells_published += 1,
            Err(_) => report.cells_rejected += 1, // merge logged and recorded it
        }
    }
    Ok(())
}

struct SourceEntry {
    source: Arc<dyn FeedSource>,
    cadence: Duration,
}

/// Runs one independent ingestion pipeline per source.
pub struct IngestionOrchestrator {
    entries: Vec<SourceEntry>,
    merge: Arc<MergeEngine>,
    freshness: Arc<FreshnessTracker>,
    policy: IngestSettings,
    cancel: CancellationToken,
}

impl IngestionOrchestrator {
    pub fn new(
        merge: Arc<MergeEngine>,
        freshness: Arc<FreshnessTracker>,
        policy: IngestSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            entries: Vec::new(),
            merge,
            freshness,
            policy,
            cancel,
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn FeedSource>, cadence: Duration) {
        self.entries.push(SourceEntry { source, cadence });
    }

    /// Run every pipeline once, concurrently, and return the reports.
    pub async fn run_all_once(&self) -> Vec<RunReport> {
        let mut tasks = JoinSet::new();
        for entry in &self.entries {
            let source = Arc::clone(&entry.source);
            let merge = Arc::clone(&self.merge);
            let freshness = Arc::clone(&self.freshness);
            let policy = self.policy;
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                run_pipeline(source.as_ref(), &merge, &freshness, &policy, &cancel).await
            });
        }
        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Ingestion task panicked"),
            }
        }
        reports
    }

    /// Spawn one long-lived task per source: run immediately, then on the
    /// source's cadence until cancelled.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for entry in self.entries {
            let merge = Arc::clone(&self.merge);
            let freshness = Arc::clone(&self.freshness);
            let policy = self.policy;
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let report =
                        run_pipeline(entry.source.as_ref(), &merge, &freshness, &policy, &cancel)
                            .await;
                    debug!(
                        source_id = %report.source_id,
                        stage = report.stage.as_str(),
                        "Scheduled run finished, sleeping until next cadence"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(entry.cadence) => {}
                    }
                }
                info!(source_id = %entry.source.source_id(), "Ingestion pipeline stopped");
            }));
        }
        handles
    }
}

/// Construct feed sources from configuration.
pub fn build_sources(config: &ServiceConfig) -> Result<Vec<(Arc<dyn FeedSource>, Duration)>> {
    let mut sources: Vec<(Arc<dyn FeedSource>, Duration)> = Vec::new();
    for settings in &config.sources {
        let resolution = Resolution::parse(&settings.resolution).ok_or_else(|| {
            Error::Config(format!(
                "Source '{}' has unknown resolution '{}'",
                settings.source_id, settings.resolution
            ))
        })?;
        let cadence = Duration::from_secs(settings.expected_interval_minutes * 60);
        let source: Arc<dyn FeedSource> = match settings.kind {
            SourceKind::Seed => {
                // validated non-None by ServiceConfig::validate
                let path = settings.seed_path.clone().ok_or_else(|| {
                    Error::Config(format!("Seed source '{}' missing path", settings.source_id))
                })?;
                Arc::new(SeedFileSource::new(
                    settings.source_id.clone(),
                    resolution,
                    config.resolve_data_path(&path),
                ))
            }
            SourceKind::Http => {
                let endpoint = settings.endpoint.clone().ok_or_else(|| {
                    Error::Config(format!(
                        "HTTP source '{}' missing endpoint",
                        settings.source_id
                    ))
                })?;
                Arc::new(HttpBatchSource::new(
                    settings.source_id.clone(),
                    resolution,
                    endpoint,
                )?)
            }
        };
        sources.push((source, cadence));
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridStore;
    use crate::services::freshness::FreshnessStatus;
    use async_trait::async_trait;
    use myco_common::config::FreshnessSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> IngestSettings {
        IngestSettings {
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            ceiling_secs: 3_600,
        }
    }

    fn reading(lat: f64, soil: f64) -> SourceReading {
        SourceReading {
            latitude: lat,
            longitude: -121.0,
            observed_at: Utc::now(),
            soil_temperature_c: Some(soil),
            precipitation_mm_last_7d: None,
            soil_moisture_index: None,
            canopy_density_pct: None,
            elevation_m: None,
            host_species_present: None,
        }
    }

    /// Fetch fails transiently `fails_before` times, then returns the batch.
    struct FlakySource {
        attempts: AtomicUsize,
        fails_before: usize,
        batch: SourceBatch,
        fatal: bool,
    }

    impl FlakySource {
        fn healthy(batch: SourceBatch) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                fails_before: 0,
                batch,
                fatal: false,
            }
        }
    }

    #[async_trait]
    impl FeedSource for FlakySource {
        fn source_id(&self) -> &str {
            "flaky"
        }

        fn resolution(&self) -> Resolution {
            Resolution::Coarse
        }

        async fn fetch(&self) -> myco_common::Result<SourceBatch> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(Error::Validation("bad feed".to_string()));
            }
            if attempt < self.fails_before {
                return Err(Error::Internal("connection reset".to_string()));
            }
            Ok(self.batch.clone())
        }
    }

    fn stack() -> (Arc<GridStore>, Arc<FreshnessTracker>, Arc<MergeEngine>) {
        let grid = Arc::new(GridStore::new());
        let freshness = Arc::new(FreshnessTracker::new(FreshnessSettings::default()));
        let merge = Arc::new(MergeEngine::new(grid.clone(), freshness.clone()));
        (grid, freshness, merge)
    }

    #[tokio::test]
    async fn successful_run_publishes_and_records_success() {
        let (grid, freshness, merge) = stack();
        let source = FlakySource::healthy(SourceBatch {
            readings: vec![reading(47.0, 12.0), reading(48.0, 14.0)],
        });

        let report = run_pipeline(
            &source,
            &merge,
            &freshness,
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.stage, RunStage::Done);
        assert_eq!(report.cells_published, 2);
        assert_eq!(report.cells_rejected, 0);
        assert_eq!(grid.len(Resolution::Coarse).await, 2);
        assert_eq!(
            freshness.status_of("flaky").await,
            Some(FreshnessStatus::Ok)
        );
    }

    #[tokio::test]
    async fn transient_fetch_failures_are_retried() {
        let (_, freshness, merge) = stack();
        let source = FlakySource {
            attempts: AtomicUsize::new(0),
            fails_before: 3,
            batch: SourceBatch {
                readings: vec![reading(47.0, 12.0)],
            },
            fatal: false,
        };

        let report = run_pipeline(
            &source,
            &merge,
            &freshness,
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.stage, RunStage::Done);
        assert_eq!(source.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_errors_fail_without_retry() {
        let (_, freshness, merge) = stack();
        let source = FlakySource {
            attempts: AtomicUsize::new(0),
            fails_before: 0,
            batch: SourceBatch { readings: vec![] },
            fatal: true,
        };

        let report = run_pipeline(
            &source,
            &merge,
            &freshness,
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.stage, RunStage::Failed);
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            freshness.status_of("flaky").await,
            Some(FreshnessStatus::Failed)
        );
    }

    #[tokio::test]
    async fn exhausted_retry_budget_marks_the_run_failed() {
        let (_, freshness, merge) = stack();
        let source = FlakySource {
            attempts: AtomicUsize::new(0),
            fails_before: usize::MAX,
            batch: SourceBatch { readings: vec![] },
            fatal: false,
        };
        let policy = IngestSettings {
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            ceiling_secs: 0,
        };

        let report = run_pipeline(
            &source,
            &merge,
            &freshness,
            &policy,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.stage, RunStage::Failed);
        assert!(report.error.unwrap().contains("ceiling"));
    }

    #[tokio::test]
    async fn rejected_readings_mark_the_run_failed_but_keep_good_cells() {
        let (grid, freshness, merge) = stack();
        // second reading's soil temperature is physically impossible and is
        // rejected by the merge engine, not by batch validation
        let source = FlakySource::healthy(SourceBatch {
            readings: vec![reading(47.0, 12.0), reading(48.0, 500.0)],
        });

        let report = run_pipeline(
            &source,
            &merge,
            &freshness,
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.stage, RunStage::Failed);
        assert_eq!(report.cells_published, 1);
        assert_eq!(report.cells_rejected, 1);
        assert_eq!(grid.len(Resolution::Coarse).await, 1);
        assert_eq!(
            freshness.status_of("flaky").await,
            Some(FreshnessStatus::Failed)
        );
    }

    #[tokio::test]
    async fn one_failing_source_does_not_block_the_others() {
        let (grid, freshness, merge) = stack();
        let cancel = CancellationToken::new();
        let mut orchestrator = IngestionOrchestrator::new(
            merge,
            freshness.clone(),
            fast_policy(),
            cancel,
        );

        struct NamedSource(FlakySource, &'static str);
        #[async_trait]
        impl FeedSource for NamedSource {
            fn source_id(&self) -> &str {
                self.1
            }
            fn resolution(&self) -> Resolution {
                Resolution::Coarse
            }
            async fn fetch(&self) -> myco_common::Result<SourceBatch> {
                self.0.fetch().await
            }
        }

        orchestrator.add_source(
            Arc::new(NamedSource(
                FlakySource {
                    attempts: AtomicUsize::new(0),
                    fails_before: 0,
                    batch: SourceBatch { readings: vec![] },
                    fatal: true,
                },
                "broken",
            )),
            Duration::from_secs(3_600),
        );
        orchestrator.add_source(
            Arc::new(NamedSource(
                FlakySource::healthy(SourceBatch {
                    readings: vec![reading(47.0, 12.0)],
                }),
                "healthy",
            )),
            Duration::from_secs(3_600),
        );

        let reports = orchestrator.run_all_once().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(grid.len(Resolution::Coarse).await, 1);
        assert_eq!(
            freshness.status_of("broken").await,
            Some(FreshnessStatus::Failed)
        );
        assert_eq!(
            freshness.status_of("healthy").await,
            Some(FreshnessStatus::Ok)
        );
    }

    #[tokio::test]
    async fn rerunning_a_pipeline_is_idempotent() {
        let (grid, freshness, merge) = stack();
        let observed_at = Utc::now();
        let mut r = reading(47.0, 12.0);
        r.observed_at = observed_at;
        let batch = SourceBatch { readings: vec![r] };

        let source = FlakySource::healthy(batch);
        let cancel = CancellationToken::new();

        run_pipeline(&source, &merge, &freshness, &fast_policy(), &cancel).await;
        let before = grid
            .query_bounding_box(&crate::grid::BoundingBox::whole_domain(), Resolution::Coarse)
            .await;

        run_pipeline(&source, &merge, &freshness, &fast_policy(), &cancel).await;
        let after = grid
            .query_bounding_box(&crate::grid::BoundingBox::whole_domain(), Resolution::Coarse)
            .await;

        assert_eq!(before, after);
        assert_eq!(
            freshness.status_of("flaky").await,
            Some(FreshnessStatus::Ok)
        );
    }
}
