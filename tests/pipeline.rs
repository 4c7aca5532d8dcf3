//! End-to-end pipeline tests.
//!
//! Runs the collector and loader against a SQLite file, an in-memory object
//! store and a scripted search backend, then inspects the database directly.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::Connection;
use tempfile::TempDir;

use paperharvest::config::{CategoryGroups, Settings, StorageBackend};
use paperharvest::models::{BatchStatus, CategoryStatus};
use paperharvest::repository::{DbContext, FailurePolicy};
use paperharvest::search::{PaperEntry, SearchApi, SearchError, SearchQuery};
use paperharvest::services::{
    CollectError, Collector, ContinuationPayload, ContinuationTrigger, Loader, PipelineContext,
    TriggerError,
};
use paperharvest::storage::{decode_ndjson_gz, MemoryObjectStore, ObjectStore};

/// Search backend serving fixed result lists per category.
#[derive(Default)]
struct ScriptedSearch {
    results: Mutex<HashMap<String, Vec<PaperEntry>>>,
    failing_offsets: Mutex<HashSet<(String, u32)>>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    fn set(&self, category: &str, ids: impl IntoIterator<Item = u32>) {
        let entries = ids.into_iter().map(entry).collect();
        self.results
            .lock()
            .unwrap()
            .insert(category.to_string(), entries);
    }

    fn fail_at(&self, category: &str, offset: u32) {
        self.failing_offsets
            .lock()
            .unwrap()
            .insert((category.to_string(), offset));
    }
}

#[async_trait]
impl SearchApi for ScriptedSearch {
    async fn fetch_page(&self, query: &SearchQuery) -> Result<Vec<PaperEntry>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_offsets
            .lock()
            .unwrap()
            .contains(&(query.category.clone(), query.start))
        {
            return Err(SearchError::Status(503));
        }
        let results = self.results.lock().unwrap();
        let all = results.get(&query.category).cloned().unwrap_or_default();
        let start = (query.start as usize).min(all.len());
        let end = (start + query.max_results as usize).min(all.len());
        Ok(all[start..end].to_vec())
    }
}

/// Continuation trigger that only counts calls.
#[derive(Default)]
struct CountingTrigger {
    calls: AtomicUsize,
}

#[async_trait]
impl ContinuationTrigger for CountingTrigger {
    async fn trigger(&self, payload: &ContinuationPayload) -> Result<(), TriggerError> {
        assert!(payload.is_auto());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn entry(n: u32) -> PaperEntry {
    let published = Utc
        .with_ymd_and_hms(2024, 1, 1 + n % 28, 12, 0, 0)
        .unwrap()
        .fixed_offset();
    PaperEntry {
        entry_id: format!("http://arxiv.org/abs/2401.{:05}v1", n),
        title: format!("Paper {}", n),
        authors: vec!["Ada Lovelace".to_string()],
        summary: format!("Summary of\npaper {}", n),
        primary_category: Some("cs.AI".to_string()),
        categories: vec!["cs.AI".to_string()],
        published: Some(published),
        updated: Some(published),
        ..Default::default()
    }
}

struct Harness {
    dir: TempDir,
    db: DbContext,
    store: Arc<MemoryObjectStore>,
    search: Arc<ScriptedSearch>,
    settings: Settings,
}

impl Harness {
    async fn new(categories: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.storage = StorageBackend::Memory;
        settings.categories = CategoryGroups(vec![(
            "default".to_string(),
            categories.iter().map(|c| c.to_string()).collect(),
        )]);
        settings.num_categories_per_run = categories.len() as u32;
        settings.initial_delay_seconds = 0;

        let db = DbContext::new(&settings.database_path());
        db.init_schema().await.unwrap();

        Self {
            dir,
            db,
            store: Arc::new(MemoryObjectStore::new()),
            search: Arc::new(ScriptedSearch::default()),
            settings,
        }
    }

    fn ctx(&self) -> PipelineContext {
        let store: Arc<dyn ObjectStore> = self.store.clone();
        let search: Arc<dyn SearchApi> = self.search.clone();
        PipelineContext::new(self.settings.clone(), self.db.clone(), store, search)
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join(&self.settings.database_filename)
    }

    fn count(&self, sql: &str) -> i64 {
        let conn = Connection::open(self.db_path()).unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    fn exec(&self, sql: &str) {
        let conn = Connection::open(self.db_path()).unwrap();
        conn.execute_batch(sql).unwrap();
    }
}

fn gzip_lines(lines: &[&str]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_collect_splits_into_full_batches() {
    let h = Harness::new(&["cs.AI"]).await;
    h.search.set("cs.AI", 0..250);

    let report = Collector::new(h.ctx()).run().await.unwrap();
    let outcome = &report.categories[0];
    assert!(outcome.succeeded());
    assert_eq!(outcome.batches.len(), 3);
    assert_eq!(outcome.stats.s3_count, 250);
    assert_eq!(outcome.stats.pg_count, 250);
    assert!(!report.needs_another_run());

    let batches = h.db.batches().get_by_category("cs.AI").await.unwrap();
    let mut sizes: Vec<u32> = batches.iter().map(|b| b.record_count).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 100, 100]);

    for batch in &batches {
        assert_eq!(batch.etl_status, BatchStatus::Pending);
        let object = h.store.object(&batch.object_path).unwrap();
        assert_eq!(object.options.content_encoding.as_deref(), Some("gzip"));
        let lines = decode_ndjson_gz(&object.body).unwrap();
        assert_eq!(lines.len() as u32, batch.record_count);
        assert!(batch.object_path.starts_with("raw/cs_AI/"));
    }

    assert_eq!(
        h.count("SELECT COUNT(*) FROM downloaded_papers WHERE status = 'uploaded'"),
        250
    );
    assert_eq!(
        h.count("SELECT COUNT(*) FROM category_progress WHERE status = 'Finished'"),
        1
    );
}

#[tokio::test]
async fn test_dedup_spans_runs_and_categories() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.search.set("cs.AI", 0..5);
    h.search.set("cs.LG", 3..8);
    Collector::new(h.ctx()).run().await.unwrap();

    // A category added later skips papers already uploaded under another.
    h.settings.categories = CategoryGroups(vec![(
        "default".to_string(),
        vec!["cs.AI".to_string(), "cs.LG".to_string()],
    )]);
    let report = Collector::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.categories.len(), 1);
    assert_eq!(report.categories[0].category, "cs.LG");
    assert_eq!(report.categories[0].stats.s3_count, 3);

    assert_eq!(
        h.count("SELECT COUNT(DISTINCT entry_id) FROM downloaded_papers"),
        8
    );
    assert_eq!(h.count("SELECT COUNT(*) FROM downloaded_papers"), 8);
}

#[tokio::test]
async fn test_dedup_within_one_run() {
    let h = Harness::new(&["cs.AI", "cs.LG"]).await;
    h.search.set("cs.AI", 0..10);
    h.search.set("cs.LG", 5..15);

    let report = Collector::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.categories[0].stats.s3_count, 10);
    assert_eq!(report.categories[1].stats.s3_count, 5);
    assert_eq!(report.records_uploaded(), 15);
}

#[tokio::test]
async fn test_failed_page_is_skipped() {
    let h = Harness::new(&["cs.AI"]).await;
    h.search.set("cs.AI", 0..250);
    h.search.fail_at("cs.AI", 100);

    let report = Collector::new(h.ctx()).run().await.unwrap();
    let outcome = &report.categories[0];
    assert!(outcome.succeeded());
    assert_eq!(outcome.stats.s3_count, 150);
    assert_eq!(outcome.batches.len(), 2);
}

#[tokio::test]
async fn test_zero_result_category_finishes_with_zero_stats() {
    let h = Harness::new(&["math.CO"]).await;

    let report = Collector::new(h.ctx()).run().await.unwrap();
    let outcome = &report.categories[0];
    assert!(outcome.advanced);
    assert!(outcome.batches.is_empty());
    assert_eq!(outcome.stats.s3_count, 0);
    assert_eq!(outcome.stats.pg_count, 0);
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 1);

    let stats = h.db.stats().latest_per_category().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].category, "math.CO");
    assert_eq!(stats[0].s3_count, 0);

    // Nothing pending: the next run reports completion.
    let report = Collector::new(h.ctx()).run().await.unwrap();
    assert!(report.all_finished);
}

#[tokio::test]
async fn test_upload_failure_aborts_category() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.settings.s3_max_attempts = 2;
    h.search.set("cs.AI", 0..150);
    h.store.fail_next_puts(2);

    let report = Collector::new(h.ctx()).run().await.unwrap();
    let outcome = &report.categories[0];
    assert!(!outcome.succeeded());
    assert!(outcome.batches.is_empty());
    assert_eq!(outcome.stats.s3_count, 0);
    // Default advance policy still finishes the category.
    assert!(outcome.advanced);

    assert_eq!(h.store.put_attempts(), 2);
    assert!(h.store.keys().is_empty());
    assert_eq!(h.count("SELECT COUNT(*) FROM raw_batches"), 0);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM downloaded_papers WHERE status = 'failed' AND error_msg IS NOT NULL"),
        100
    );
    let stats = h.db.stats().latest_per_category().await.unwrap();
    assert_eq!(stats.len(), 1);
}

#[tokio::test]
async fn test_failed_uploads_are_not_deduplicated() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.settings.s3_max_attempts = 1;
    h.search.set("cs.AI", 0..5);
    h.store.fail_next_puts(1);
    Collector::new(h.ctx()).run().await.unwrap();

    h.db.progress().reset_all().await.unwrap();
    let report = Collector::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.categories[0].stats.s3_count, 5);
}

#[tokio::test]
async fn test_on_success_policy_keeps_failed_category_pending() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.settings.s3_max_attempts = 1;
    h.settings.advance_policy = paperharvest::services::AdvancePolicy::OnSuccess;
    h.search.set("cs.AI", 0..5);
    h.store.fail_next_puts(1);

    let report = Collector::new(h.ctx()).run().await.unwrap();
    assert!(!report.categories[0].advanced);
    assert!(report.needs_another_run());

    let progress = h.db.progress().get_all().await.unwrap();
    assert_eq!(progress[0].status, CategoryStatus::Pending);
}

#[tokio::test]
async fn test_statement_failure_policy() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.search.set("cs.AI", 0..3);
    h.exec("DROP TABLE category_run_stats;");

    // Swallowed: the run completes without the stats rows.
    let report = Collector::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.records_uploaded(), 3);

    h.settings.statement_failure_policy = FailurePolicy::Propagate;
    h.db.progress().reset_all().await.unwrap();
    h.search.set("cs.AI", 10..13);
    let result = Collector::new(h.ctx()).run().await;
    assert!(matches!(result, Err(CollectError::Database(_))));
}

#[tokio::test]
async fn test_load_is_idempotent_per_entry() {
    let h = Harness::new(&["cs.AI"]).await;
    let line = r#"{"entry_id":"http://arxiv.org/abs/1","title":"First","authors":["A"],"summary":"a\nb"}"#;
    let again = r#"{"entry_id":"http://arxiv.org/abs/1","title":"Second","authors":["A"]}"#;
    h.store.insert("raw/a.jsonl.gz", gzip_lines(&[line]));
    h.store.insert("raw/b.jsonl.gz", gzip_lines(&[again]));
    let batches = h.db.batches();
    batches.register("a", "cs.AI", "raw/a.jsonl.gz", 1).await.unwrap();
    batches.register("b", "cs.AI", "raw/b.jsonl.gz", 1).await.unwrap();

    let report = Loader::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.finished, vec!["a", "b"]);
    assert_eq!(report.totals.inserted, 1);
    assert_eq!(report.totals.history_rows, 2);

    assert_eq!(h.db.papers().count_content().await.unwrap(), 1);
    assert_eq!(
        h.db.papers()
            .count_history(Some("http://arxiv.org/abs/1"))
            .await
            .unwrap(),
        2
    );
    let paper = h.db.papers().get("http://arxiv.org/abs/1").await.unwrap().unwrap();
    assert_eq!(paper.title, "First");
    assert_eq!(
        h.count("SELECT COUNT(*) FROM arxiv_papers_history WHERE summary = 'a b'"),
        1
    );
}

#[tokio::test]
async fn test_collect_then_load() {
    let h = Harness::new(&["cs.AI"]).await;
    h.search.set("cs.AI", 0..120);
    Collector::new(h.ctx()).run().await.unwrap();

    let trigger = CountingTrigger::default();
    let report = Loader::new(h.ctx()).run_and_chain(&trigger).await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.totals.records, 120);
    assert_eq!(report.remaining_pending, 0);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);

    assert_eq!(h.db.papers().count_content().await.unwrap(), 120);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM arxiv_papers WHERE published_date IS NOT NULL AND version = 1"),
        120
    );
    assert_eq!(
        h.count("SELECT COUNT(*) FROM raw_batches WHERE etl_status = 'finished' AND etl_finished_at IS NOT NULL"),
        2
    );
}

#[tokio::test]
async fn test_continuation_triggers_once_while_batches_remain() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.settings.pending_gz_batch = 1;
    for id in ["a", "b"] {
        let key = format!("raw/{}.jsonl.gz", id);
        let line = format!(r#"{{"entry_id":"{}","title":"t"}}"#, id);
        h.store.insert(&key, gzip_lines(&[&line]));
        h.db.batches().register(id, "cs.AI", &key, 1).await.unwrap();
    }

    let trigger = CountingTrigger::default();
    let first = Loader::new(h.ctx()).run_and_chain(&trigger).await.unwrap();
    assert_eq!(first.finished, vec!["a"]);
    assert_eq!(first.remaining_pending, 1);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);

    let second = Loader::new(h.ctx()).run_and_chain(&trigger).await.unwrap();
    assert_eq!(second.finished, vec!["b"]);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);

    // Nothing left: the run is a no-op and does not chain.
    let third = Loader::new(h.ctx()).run_and_chain(&trigger).await.unwrap();
    assert_eq!(third.claimed, 0);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_chain_when_nothing_claimed() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.settings.pending_gz_batch = 0;
    let key = "raw/a.jsonl.gz";
    h.store.insert(key, gzip_lines(&[r#"{"entry_id":"a","title":"t"}"#]));
    h.db.batches().register("a", "cs.AI", key, 1).await.unwrap();

    let trigger = CountingTrigger::default();
    for _ in 0..3 {
        let report = Loader::new(h.ctx()).run_and_chain(&trigger).await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(report.remaining_pending, 1);
    }
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM raw_batches WHERE etl_status = 'pending'"), 1);
}

#[tokio::test]
async fn test_partial_rows_do_not_fail_the_batch() {
    let h = Harness::new(&["cs.AI"]).await;
    let body = gzip_lines(&[
        r#"{"entry_id":"good","title":"ok"}"#,
        r#"{not json"#,
        r#"{"entry_id":"","title":"empty id"}"#,
    ]);
    h.store.insert("raw/p.jsonl.gz", body);
    h.db.batches().register("p", "cs.AI", "raw/p.jsonl.gz", 3).await.unwrap();

    let report = Loader::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.finished, vec!["p"]);
    assert_eq!(report.totals.records, 2);
    assert_eq!(report.totals.malformed_lines, 1);
    assert_eq!(report.totals.history_rows, 1);
    assert_eq!(report.totals.dropped_rows, 1);
    assert_eq!(h.db.papers().count_content().await.unwrap(), 1);

    let batch = h.db.batches().get("p").await.unwrap().unwrap();
    assert_eq!(batch.etl_status, BatchStatus::Finished);
}

#[tokio::test]
async fn test_unreadable_object_fails_descriptor() {
    let h = Harness::new(&["cs.AI"]).await;
    h.store.insert("raw/bad.jsonl.gz", b"not gzip at all".to_vec());
    let batches = h.db.batches();
    batches.register("bad", "cs.AI", "raw/bad.jsonl.gz", 1).await.unwrap();
    batches.register("gone", "cs.AI", "raw/missing.jsonl.gz", 1).await.unwrap();

    let report = Loader::new(h.ctx()).run().await.unwrap();
    assert!(report.finished.is_empty());
    assert_eq!(report.failed.len(), 2);

    for id in ["bad", "gone"] {
        let batch = batches.get(id).await.unwrap().unwrap();
        assert_eq!(batch.etl_status, BatchStatus::Failed);
        assert!(batch.error_msg.is_some());
        assert!(batch.etl_finished_at.is_some());
    }

    // Requeued descriptors are claimable again.
    assert_eq!(batches.requeue_failed().await.unwrap(), 2);
    assert_eq!(batches.count_pending().await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_claims_are_disjoint() {
    let h = Harness::new(&["cs.AI"]).await;
    let batches = h.db.batches();
    for n in 0..20 {
        batches
            .register(&format!("b{:02}", n), "cs.AI", &format!("raw/{}", n), 1)
            .await
            .unwrap();
    }

    let (left, right) = (h.db.batches(), h.db.batches());
    let (a, b) = tokio::join!(left.claim_pending(15, None), right.claim_pending(15, None));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.len() + b.len(), 20);

    let ids: HashSet<String> = a.iter().chain(b.iter()).map(|r| r.batch_id.clone()).collect();
    assert_eq!(ids.len(), 20);
    assert!(a
        .iter()
        .chain(b.iter())
        .all(|r| r.etl_status == BatchStatus::Processing && r.etl_started_at.is_some()));
    assert_eq!(batches.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stale_claims_reclaimed_only_with_lease() {
    let mut h = Harness::new(&["cs.AI"]).await;
    h.store
        .insert("raw/s.jsonl.gz", gzip_lines(&[r#"{"entry_id":"s","title":"t"}"#]));
    let batches = h.db.batches();
    batches.register("s", "cs.AI", "raw/s.jsonl.gz", 1).await.unwrap();
    assert_eq!(batches.claim_pending(1, None).await.unwrap().len(), 1);
    h.exec("UPDATE raw_batches SET etl_started_at = '2000-01-01T00:00:00.000000Z';");

    // Without a lease a crashed claim is left alone.
    let report = Loader::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.claimed, 0);

    h.settings.etl_lease_minutes = Some(30);
    let report = Loader::new(h.ctx()).run().await.unwrap();
    assert_eq!(report.finished, vec!["s"]);
}
