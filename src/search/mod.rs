//! Paper search API abstraction.

mod arxiv;

pub use arxiv::{parse_feed, ArxivClient, DEFAULT_API_URL};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use thiserror::Error;

use crate::models::PaperRecord;

/// Errors from a search backend.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search API returned status {0}")]
    Status(u16),

    #[error("Malformed feed: {0}")]
    Feed(String),

    #[error("Search API error: {0}")]
    Api(String),
}

/// One page of a category query, newest submissions first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub category: String,
    /// Zero-based offset of the first result.
    pub start: u32,
    pub max_results: u32,
}

impl SearchQuery {
    pub fn new(category: &str, start: u32, max_results: u32) -> Self {
        Self {
            category: category.to_string(),
            start,
            max_results,
        }
    }

    /// Query expression selecting the category.
    pub fn expression(&self) -> String {
        format!("cat:{}", self.category)
    }
}

/// A search result as returned by the API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperEntry {
    pub entry_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub primary_category: Option<String>,
    pub categories: Vec<String>,
    pub published: Option<DateTime<FixedOffset>>,
    pub updated: Option<DateTime<FixedOffset>>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
}

impl PaperEntry {
    /// Normalize into the record stored in raw batches.
    pub fn into_record(self) -> PaperRecord {
        let timestamp = |dt: DateTime<FixedOffset>| dt.to_rfc3339_opts(SecondsFormat::Secs, false);
        PaperRecord {
            entry_id: self.entry_id,
            title: self.title,
            authors: self.authors,
            summary: Some(self.summary),
            primary_category: self.primary_category,
            categories: self.categories,
            published: self.published.map(timestamp),
            updated: self.updated.map(timestamp),
            journal_ref: self.journal_ref,
            doi: self.doi,
            comment: self.comment,
        }
    }
}

/// A paginated paper search backend.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Fetch one page. An empty page means the query is exhausted.
    async fn fetch_page(&self, query: &SearchQuery) -> Result<Vec<PaperEntry>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_expression() {
        assert_eq!(SearchQuery::new("cs.AI", 0, 100).expression(), "cat:cs.AI");
    }

    #[test]
    fn test_into_record_formats_timestamps() {
        let entry = PaperEntry {
            entry_id: "http://arxiv.org/abs/2401.00001v1".into(),
            title: "T".into(),
            summary: "S".into(),
            published: DateTime::parse_from_rfc3339("2024-01-02T18:59:59Z").ok(),
            ..Default::default()
        };
        let record = entry.into_record();
        assert_eq!(record.published.as_deref(), Some("2024-01-02T18:59:59+00:00"));
        assert_eq!(record.published_date().as_deref(), Some("2024-01-02"));
        assert_eq!(record.updated, None);
        assert_eq!(record.summary.as_deref(), Some("S"));
    }
}
