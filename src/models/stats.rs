//! Per-category run statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timing and volume counters for one category in one collector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRunStats {
    pub category: String,
    pub elapsed_seconds: f64,
    /// Records written to object storage.
    pub s3_count: u32,
    /// Tracking rows admitted for the category.
    pub pg_count: u32,
    pub recorded_at: DateTime<Utc>,
}

impl CategoryRunStats {
    /// Zero-count stats for a category that produced nothing.
    pub fn empty(category: &str) -> Self {
        Self {
            category: category.to_string(),
            elapsed_seconds: 0.0,
            s3_count: 0,
            pg_count: 0,
            recorded_at: Utc::now(),
        }
    }
}
