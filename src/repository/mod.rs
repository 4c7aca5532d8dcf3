//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking.
//! Supports both SQLite and PostgreSQL backends.

pub mod context;
pub mod diesel_models;
pub mod engine;
pub mod pool;
pub mod util;

// Repositories
pub mod batches;
pub mod downloads;
pub mod papers;
pub mod progress;
pub mod stats;

pub use batches::BatchRepository;
pub use context::DbContext;
pub use downloads::DownloadRepository;
pub use engine::{Engine, FailurePolicy};
pub use papers::PaperRepository;
pub use pool::{DbPool, DieselError};
pub use progress::CategoryProgressRepository;
pub use stats::StatsRepository;

#[allow(unused_imports)]
pub use diesel_models::{
    CategoryProgressRecord, CategoryRunStatsRecord, DownloadedPaperRecord, NewCategoryProgress,
    NewCategoryRunStats, NewDownloadedPaper, NewPaper, NewPaperHistory, NewRawBatch,
    PaperContentRecord, RawBatchRecord,
};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
