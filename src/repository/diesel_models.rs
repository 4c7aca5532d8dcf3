//! Diesel ORM models for database tables.
//!
//! Row structs are the only place database shapes appear; repositories
//! convert them to domain models at the boundary.

use diesel::prelude::*;

use crate::schema;

/// Category progress record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::category_progress)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CategoryProgressRecord {
    pub id: i32,
    pub category_name: String,
    pub status: String,
    pub updated_at: String,
}

/// New category progress row.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::category_progress)]
pub struct NewCategoryProgress {
    pub category_name: String,
    pub status: String,
    pub updated_at: String,
}

/// Paper ingestion attempt record.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::downloaded_papers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DownloadedPaperRecord {
    pub id: i32,
    pub entry_id: String,
    pub category: String,
    pub status: String,
    pub last_attempt: String,
    pub error_msg: Option<String>,
    pub etl_status: String,
    pub etl_batch_id: Option<String>,
}

/// New paper ingestion attempt row.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::downloaded_papers)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewDownloadedPaper {
    pub entry_id: String,
    pub category: String,
    pub status: String,
    pub last_attempt: String,
    pub error_msg: Option<String>,
    pub etl_status: String,
    pub etl_batch_id: Option<String>,
}

/// Raw batch descriptor record.
///
/// Also loaded by name from the claim statement's `RETURNING` clause.
#[derive(Queryable, QueryableByName, Selectable, Debug, Clone)]
#[diesel(table_name = schema::raw_batches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RawBatchRecord {
    pub batch_id: String,
    pub category: String,
    pub s3_path: String,
    pub record_count: i32,
    pub etl_status: String,
    pub created_at: String,
    pub etl_started_at: Option<String>,
    pub etl_finished_at: Option<String>,
    pub error_msg: Option<String>,
}

/// New raw batch descriptor row.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::raw_batches)]
pub struct NewRawBatch<'a> {
    pub batch_id: &'a str,
    pub category: &'a str,
    pub s3_path: &'a str,
    pub record_count: i32,
    pub etl_status: &'a str,
    pub created_at: &'a str,
}

/// Paper content record.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::arxiv_papers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PaperContentRecord {
    pub entry_id: String,
    pub title: String,
    pub authors: String,
    pub summary: Option<String>,
    pub primary_category: Option<String>,
    pub categories: String,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
    pub published_date: Option<String>,
    pub updated_date: Option<String>,
    pub loaded_at: String,
    pub version: i32,
    pub source_object_key: String,
}

/// New paper content row.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::arxiv_papers)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewPaper {
    pub entry_id: String,
    pub title: String,
    pub authors: String,
    pub summary: Option<String>,
    pub primary_category: Option<String>,
    pub categories: String,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
    pub published_date: Option<String>,
    pub updated_date: Option<String>,
    pub loaded_at: String,
    pub version: i32,
    pub source_object_key: String,
}

/// New paper history row.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::arxiv_papers_history)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewPaperHistory {
    pub event_id: String,
    pub entry_id: String,
    pub event_ts: f64,
    pub recorded_at: String,
    pub stage: String,
    pub operation: String,
    pub title: String,
    pub authors: String,
    pub summary: String,
    pub primary_category: Option<String>,
    pub categories: String,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
    pub source_object_key: String,
}

/// Category run stats record.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::category_run_stats)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CategoryRunStatsRecord {
    pub id: i32,
    pub category_name: String,
    pub time_sec: f64,
    pub s3_count: i32,
    pub pg_count: i32,
    pub updated_at: String,
}

/// New category run stats row.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::category_run_stats)]
pub struct NewCategoryRunStats {
    pub category_name: String,
    pub time_sec: f64,
    pub s3_count: i32,
    pub pg_count: i32,
    pub updated_at: String,
}
