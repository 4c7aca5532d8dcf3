//! Claim-based batch loader.
//!
//! Claims pending raw batch descriptors, streams each object's records into
//! the content table (first write wins) and the history table (always
//! appended), then settles the descriptor as finished or failed.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::continuation::{ContinuationPayload, ContinuationTrigger};
use super::PipelineContext;
use crate::models::{PaperRecord, RawBatch, HISTORY_OPERATION_INSERT, HISTORY_STAGE_INITIAL_LOAD};
use crate::repository::util::format_timestamp;
use crate::repository::{DieselError, NewPaper, NewPaperHistory};
use crate::storage::{decode_ndjson_gz, StorageError};

/// Errors that fail a descriptor or the whole run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to fetch {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to decompress {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] DieselError),
}

/// Counters for one descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Parsed records.
    pub records: usize,
    /// Content rows actually inserted (duplicates excluded).
    pub inserted: usize,
    pub history_rows: usize,
    pub malformed_lines: usize,
    /// Rows that failed even when inserted on their own.
    pub dropped_rows: usize,
}

impl BatchOutcome {
    fn absorb(&mut self, other: &BatchOutcome) {
        self.records += other.records;
        self.inserted += other.inserted;
        self.history_rows += other.history_rows;
        self.malformed_lines += other.malformed_lines;
        self.dropped_rows += other.dropped_rows;
    }
}

/// Result of a loader run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub claimed: usize,
    pub finished: Vec<String>,
    /// `(batch_id, error)` for descriptors marked failed.
    pub failed: Vec<(String, String)>,
    pub totals: BatchOutcome,
    /// Descriptors still pending after this run.
    pub remaining_pending: i64,
}

impl LoadReport {
    /// More descriptors wait and this run made progress; another
    /// invocation should follow.
    ///
    /// A run that claimed nothing never chains, so a claim that keeps
    /// failing cannot spawn invocations forever.
    pub fn needs_continuation(&self) -> bool {
        self.claimed > 0 && self.remaining_pending > 0
    }
}

/// Claim cutoff for reclaiming stale `processing` descriptors.
///
/// A lease too long to subtract from `now` yields no cutoff, so nothing is
/// reclaimed.
fn lease_cutoff(lease_minutes: Option<u64>, now: DateTime<Utc>) -> Option<String> {
    lease_minutes
        .and_then(|minutes| i64::try_from(minutes).ok())
        .and_then(Duration::try_minutes)
        .and_then(|lease| now.checked_sub_signed(lease))
        .map(|cutoff| format_timestamp(&cutoff))
}

/// Loads claimed raw batches into the paper tables.
pub struct Loader {
    ctx: PipelineContext,
}

impl Loader {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Run one loader invocation.
    pub async fn run(&self) -> Result<LoadReport, LoadError> {
        let engine = &self.ctx.engine;
        let batches = self.ctx.db.batches();

        let cutoff = lease_cutoff(self.ctx.settings.etl_lease_minutes, Utc::now());
        let claimed = engine.settle(
            "claim raw batches",
            batches
                .claim_pending(self.ctx.settings.pending_gz_batch, cutoff.as_deref())
                .await,
        )?;

        let mut report = LoadReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            info!("No pending batches to load");
        }

        for descriptor in &claimed {
            info!(batch_id = %descriptor.batch_id, key = %descriptor.object_path, "Processing batch");
            match self.load_batch(descriptor).await {
                Ok(outcome) => {
                    engine.settle(
                        "mark batch finished",
                        batches.mark_finished(&descriptor.batch_id).await,
                    )?;
                    info!(
                        batch_id = %descriptor.batch_id,
                        records = outcome.records,
                        inserted = outcome.inserted,
                        malformed = outcome.malformed_lines,
                        dropped = outcome.dropped_rows,
                        "Batch loaded"
                    );
                    report.totals.absorb(&outcome);
                    report.finished.push(descriptor.batch_id.clone());
                }
                Err(e) => {
                    error!(batch_id = %descriptor.batch_id, error = %e, "Batch failed");
                    let message = e.to_string();
                    let marked = engine.settle(
                        "mark batch failed",
                        batches.mark_failed(&descriptor.batch_id, &message).await,
                    );
                    report.failed.push((descriptor.batch_id.clone(), message));
                    if matches!(e, LoadError::Database(_)) {
                        return Err(e);
                    }
                    marked?;
                }
            }
        }

        report.remaining_pending =
            engine.settle("count pending batches", batches.count_pending().await)?;
        info!(remaining = report.remaining_pending, "Pending batches remaining");
        Ok(report)
    }

    /// Run, then start one continuation if pending batches remain.
    ///
    /// A trigger failure is logged and does not fail the run.
    pub async fn run_and_chain(
        &self,
        trigger: &dyn ContinuationTrigger,
    ) -> Result<LoadReport, LoadError> {
        let report = self.run().await?;
        if report.needs_continuation() {
            info!("Batches remain, triggering continuation");
            if let Err(e) = trigger.trigger(&ContinuationPayload::auto()).await {
                error!(error = %e, "Failed to trigger continuation");
            }
        } else if report.remaining_pending > 0 {
            warn!(
                remaining = report.remaining_pending,
                "Batches remain but none were claimed, not chaining"
            );
        } else {
            info!("All batches loaded");
        }
        Ok(report)
    }

    /// Fetch, decompress and load one descriptor's object.
    async fn load_batch(&self, descriptor: &RawBatch) -> Result<BatchOutcome, LoadError> {
        let key = &descriptor.object_path;
        let body = self
            .ctx
            .store
            .get(key)
            .await
            .map_err(|source| LoadError::Fetch {
                key: key.clone(),
                source,
            })?;
        let lines = decode_ndjson_gz(&body).map_err(|source| LoadError::Decode {
            key: key.clone(),
            source,
        })?;

        let flush_at = self.ctx.settings.etl_batch_size.max(1) as usize;
        let mut outcome = BatchOutcome::default();
        let mut content: Vec<NewPaper> = Vec::with_capacity(flush_at);
        let mut history: Vec<NewPaperHistory> = Vec::with_capacity(flush_at);

        for (index, line) in lines.iter().enumerate() {
            let record: PaperRecord = match serde_json::from_slice(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        batch_id = %descriptor.batch_id,
                        line = index + 1,
                        error = %e,
                        "Skipping malformed line"
                    );
                    outcome.malformed_lines += 1;
                    continue;
                }
            };
            let now = Utc::now();
            content.push(content_row(&record, key, &now));
            history.push(history_row(&record, key, &now));
            outcome.records += 1;

            if content.len() >= flush_at {
                self.flush(&mut content, &mut history, &mut outcome).await?;
            }
        }
        self.flush(&mut content, &mut history, &mut outcome).await?;
        Ok(outcome)
    }

    async fn flush(
        &self,
        content: &mut Vec<NewPaper>,
        history: &mut Vec<NewPaperHistory>,
        outcome: &mut BatchOutcome,
    ) -> Result<(), LoadError> {
        let papers = self.ctx.db.papers();

        let (inserted, dropped) = insert_with_fallback("arxiv_papers", content.as_slice(), |rows| {
            papers.insert_content(rows)
        })
        .await;
        outcome.inserted += inserted;
        outcome.dropped_rows += dropped;

        let (appended, dropped) =
            insert_with_fallback("arxiv_papers_history", history.as_slice(), |rows| {
                papers.append_history(rows)
            })
            .await;
        outcome.history_rows += appended;
        outcome.dropped_rows += dropped;

        content.clear();
        history.clear();
        Ok(())
    }
}

/// Insert rows as one statement; if that fails, insert them one at a time
/// and drop the rows that still fail.
///
/// Returns `(rows inserted, rows dropped)`.
async fn insert_with_fallback<'a, T, F, Fut>(
    table: &str,
    rows: &'a [T],
    insert: F,
) -> (usize, usize)
where
    F: Fn(&'a [T]) -> Fut,
    Fut: Future<Output = Result<usize, DieselError>>,
{
    if rows.is_empty() {
        return (0, 0);
    }
    match insert(rows).await {
        Ok(inserted) => (inserted, 0),
        Err(e) => {
            warn!(table, rows = rows.len(), error = %e, "Batch insert failed, retrying row by row");
            let mut inserted = 0;
            let mut dropped = 0;
            for (index, row) in rows.chunks(1).enumerate() {
                match insert(row).await {
                    Ok(n) => inserted += n,
                    Err(e) => {
                        error!(table, row = index, error = %e, "Row insert failed, dropping row");
                        dropped += 1;
                    }
                }
            }
            (inserted, dropped)
        }
    }
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn content_row(record: &PaperRecord, key: &str, now: &DateTime<Utc>) -> NewPaper {
    NewPaper {
        entry_id: record.entry_id.clone(),
        title: record.title.clone(),
        authors: json_list(&record.authors),
        summary: record.summary.clone(),
        primary_category: record.primary_category.clone(),
        categories: json_list(&record.categories),
        published: record.published.clone(),
        updated: record.updated.clone(),
        journal_ref: record.journal_ref.clone(),
        doi: record.doi.clone(),
        comment: record.comment.clone(),
        published_date: record.published_date(),
        updated_date: record.updated_date(),
        loaded_at: format_timestamp(now),
        version: 1,
        source_object_key: key.to_string(),
    }
}

fn history_row(record: &PaperRecord, key: &str, now: &DateTime<Utc>) -> NewPaperHistory {
    NewPaperHistory {
        event_id: Uuid::new_v4().to_string(),
        entry_id: record.entry_id.clone(),
        event_ts: now.timestamp_micros() as f64 / 1_000_000.0,
        recorded_at: format_timestamp(now),
        stage: HISTORY_STAGE_INITIAL_LOAD.to_string(),
        operation: HISTORY_OPERATION_INSERT.to_string(),
        title: record.title.clone(),
        authors: json_list(&record.authors),
        summary: record.history_summary(),
        primary_category: record.primary_category.clone(),
        categories: json_list(&record.categories),
        published: record.published.clone(),
        updated: record.updated.clone(),
        journal_ref: record.journal_ref.clone(),
        doi: record.doi.clone(),
        comment: record.comment.clone(),
        source_object_key: key.to_string(),
    }
}
