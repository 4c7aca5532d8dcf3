//! Category collector.
//!
//! Pages through the search API for each scheduled category, drops papers
//! already seen, and commits fixed-size gzip NDJSON batches to object storage.
//! Every committed object gets a pending raw batch descriptor for the loader.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::PipelineContext;
use crate::models::{CategoryRunStats, PaperRecord, TrackingStatus};
use crate::repository::util::now_timestamp;
use crate::repository::{DieselError, NewDownloadedPaper};
use crate::search::SearchQuery;
use crate::storage::{
    batch_id, encode_ndjson_gz, object_key, upload_with_retry, PutOptions, RetryPolicy,
    StorageError,
};

/// Errors that abort a category run.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DieselError),
}

/// Entry ids seen by this invocation.
///
/// `window` starts from recently uploaded ids and grows with every admitted
/// paper, so a paper listed under two categories is uploaded once.
/// `in_flight` only covers the current category.
#[derive(Debug, Default)]
pub struct DedupSet {
    window: HashSet<String>,
    in_flight: HashSet<String>,
}

impl DedupSet {
    pub fn new(window: impl IntoIterator<Item = String>) -> Self {
        Self {
            window: window.into_iter().collect(),
            in_flight: HashSet::new(),
        }
    }

    /// Forget the previous category's in-flight ids.
    pub fn start_category(&mut self) {
        self.in_flight.clear();
    }

    /// Admit an id. Returns false if it was already seen.
    pub fn admit(&mut self, entry_id: &str) -> bool {
        if self.contains(entry_id) {
            return false;
        }
        self.window.insert(entry_id.to_string());
        self.in_flight.insert(entry_id.to_string());
        true
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.window.contains(entry_id) || self.in_flight.contains(entry_id)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Result of one category within a run.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub category: String,
    pub stats: CategoryRunStats,
    /// Batch ids committed, in order.
    pub batches: Vec<String>,
    pub error: Option<String>,
    /// Whether the category was marked finished afterwards.
    pub advanced: bool,
}

impl CategoryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a collector run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectReport {
    /// No category was pending when the run started.
    pub all_finished: bool,
    pub categories: Vec<CategoryOutcome>,
    /// Categories still pending after the run.
    pub remaining_categories: usize,
}

impl CollectReport {
    pub fn needs_another_run(&self) -> bool {
        self.remaining_categories > 0
    }

    pub fn records_uploaded(&self) -> u64 {
        self.categories
            .iter()
            .map(|c| u64::from(c.stats.s3_count))
            .sum()
    }
}

/// Running counters for one category.
#[derive(Debug, Default)]
struct CategoryCounts {
    uploaded: u32,
    admitted: u32,
    batches: Vec<String>,
}

/// Papers admitted but not yet committed.
#[derive(Debug, Default)]
struct PendingBatch {
    records: Vec<PaperRecord>,
    tracking: Vec<NewDownloadedPaper>,
}

impl PendingBatch {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Harvests scheduled categories into raw batch objects.
pub struct Collector {
    ctx: PipelineContext,
}

impl Collector {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.ctx.settings.s3_max_attempts,
            Duration::from_secs(self.ctx.settings.initial_delay_seconds),
        )
    }

    /// Run one collector invocation.
    pub async fn run(&self) -> Result<CollectReport, CollectError> {
        let settings = &self.ctx.settings;
        let scheduler = self.ctx.scheduler();

        scheduler
            .sync_categories(&settings.categories.flatten())
            .await?;

        let pending = scheduler.pending().await?;
        if pending.is_empty() {
            info!("All categories are finished");
            return Ok(CollectReport {
                all_finished: true,
                ..Default::default()
            });
        }
        let selected =
            super::select_next(&pending, settings.num_categories_per_run as usize).to_vec();
        info!(categories = ?selected, "Collecting categories");

        let mut dedup = self.load_dedup_window().await?;

        let mut report = CollectReport::default();
        for category in &selected {
            let started = Instant::now();
            let mut counts = CategoryCounts::default();
            let result = self
                .collect_category(category, &mut dedup, &mut counts)
                .await;

            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    error!(category = %category, error = %e, "Category run failed");
                    Some(e.to_string())
                }
            };
            let advanced = scheduler.finish_run(category, error.is_none()).await?;

            let stats = CategoryRunStats {
                category: category.clone(),
                elapsed_seconds: started.elapsed().as_secs_f64(),
                s3_count: counts.uploaded,
                pg_count: counts.admitted,
                recorded_at: Utc::now(),
            };
            info!(
                category = %category,
                time_sec = stats.elapsed_seconds,
                s3 = stats.s3_count,
                db = stats.pg_count,
                "Category summary"
            );
            report.categories.push(CategoryOutcome {
                category: category.clone(),
                stats,
                batches: counts.batches,
                error,
                advanced,
            });
        }

        let stats: Vec<CategoryRunStats> =
            report.categories.iter().map(|c| c.stats.clone()).collect();
        self.ctx.engine.settle(
            "insert category run stats",
            self.ctx.db.stats().record(&stats).await,
        )?;

        report.remaining_categories = scheduler.pending().await?.len();
        if report.needs_another_run() {
            info!(
                remaining = report.remaining_categories,
                "Categories remain, another collector run is needed"
            );
        } else {
            info!("All categories collected");
        }
        Ok(report)
    }

    /// Ids uploaded within the lookback window.
    async fn load_dedup_window(&self) -> Result<DedupSet, CollectError> {
        let months = Months::new(self.ctx.settings.lookback_months);
        let now = Utc::now();
        let since = now.checked_sub_months(months).unwrap_or(DateTime::UNIX_EPOCH);
        let ids = self.ctx.engine.settle(
            "select recent entry ids",
            self.ctx.db.downloads().uploaded_entry_ids_since(&since).await,
        )?;
        info!(count = ids.len(), since = %since, "Loaded dedup window");
        Ok(DedupSet::new(ids))
    }

    /// Harvest one category, committing a batch every `batch_size` papers.
    async fn collect_category(
        &self,
        category: &str,
        dedup: &mut DedupSet,
        counts: &mut CategoryCounts,
    ) -> Result<(), CollectError> {
        let settings = &self.ctx.settings;
        let page_size = settings.batch_size;
        let goal = settings.max_results_goal;

        dedup.start_category();
        info!(category, "Category started");

        let mut pending = PendingBatch::default();
        let mut offset = 0;
        while offset < goal {
            let size = page_size.min(goal - offset);
            let query = SearchQuery::new(category, offset, size);
            let entries = match self.ctx.search.fetch_page(&query).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(category, offset, error = %e, "Page fetch failed, skipping offset");
                    offset += size;
                    continue;
                }
            };
            if entries.is_empty() {
                break;
            }

            for entry in entries {
                if !dedup.admit(&entry.entry_id) {
                    continue;
                }
                pending.tracking.push(NewDownloadedPaper {
                    entry_id: entry.entry_id.clone(),
                    category: category.to_string(),
                    status: TrackingStatus::Pending.as_str().to_string(),
                    last_attempt: now_timestamp(),
                    error_msg: None,
                    etl_status: TrackingStatus::Pending.as_str().to_string(),
                    etl_batch_id: None,
                });
                pending.records.push(entry.into_record());
                counts.admitted += 1;

                if pending.len() >= page_size as usize {
                    self.commit_batch(category, &mut pending, counts).await?;
                }
            }
            offset += size;
        }

        if !pending.is_empty() {
            self.commit_batch(category, &mut pending, counts).await?;
        }
        Ok(())
    }

    /// Upload the pending batch, then record its descriptor and tracking rows.
    async fn commit_batch(
        &self,
        category: &str,
        pending: &mut PendingBatch,
        counts: &mut CategoryCounts,
    ) -> Result<(), CollectError> {
        let batch = std::mem::take(pending);
        let n = counts.batches.len() as u32;
        let now = Utc::now();
        let key = object_key(category, now.date_naive(), n, now.timestamp());
        let id = batch_id(category, now.date_naive(), n, now.timestamp());
        let record_count = batch.records.len() as u32;

        let body = encode_ndjson_gz(&batch.records)?;
        let mut tracking = batch.tracking;
        for row in &mut tracking {
            row.etl_batch_id = Some(id.clone());
        }

        let engine = &self.ctx.engine;
        let uploaded = upload_with_retry(
            self.ctx.store.as_ref(),
            &key,
            &body,
            &PutOptions::gzip_json(),
            self.retry_policy(),
        )
        .await;

        if let Err(e) = uploaded {
            let message = e.to_string();
            for row in &mut tracking {
                row.status = TrackingStatus::Failed.as_str().to_string();
                row.error_msg = Some(message.clone());
            }
            if let Err(db) = engine.settle(
                "insert failed tracking rows",
                self.ctx.db.downloads().insert_batch(&tracking).await,
            ) {
                error!(batch_id = %id, error = %db, "Could not record failed upload");
            }
            return Err(CollectError::Upload { key, source: e });
        }

        counts.uploaded += record_count;
        counts.batches.push(id.clone());

        engine.settle(
            "insert raw batch",
            self.ctx
                .db
                .batches()
                .register(&id, category, &key, record_count)
                .await,
        )?;
        for row in &mut tracking {
            row.status = TrackingStatus::Uploaded.as_str().to_string();
        }
        engine.settle(
            "insert tracking rows",
            self.ctx.db.downloads().insert_batch(&tracking).await,
        )?;

        info!(category, batch_id = %id, records = record_count, key = %key, "Committed batch");
        Ok(())
    }
}
