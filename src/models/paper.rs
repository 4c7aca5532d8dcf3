//! Paper record carried through raw batch objects.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// History stage written by the batch loader.
pub const HISTORY_STAGE_INITIAL_LOAD: &str = "initial_load";

/// History operation for a loaded record.
pub const HISTORY_OPERATION_INSERT: &str = "insert";

/// One normalized paper, serialized as a single NDJSON line in a raw batch.
///
/// Every field except `entry_id` tolerates absence so older or partial
/// objects still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub entry_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub primary_category: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// RFC 3339 submission time.
    #[serde(default)]
    pub published: Option<String>,
    /// RFC 3339 last revision time.
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub journal_ref: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl PaperRecord {
    /// Calendar date (`YYYY-MM-DD`) of the submission time, if parseable.
    pub fn published_date(&self) -> Option<String> {
        self.published.as_deref().and_then(date_of)
    }

    /// Calendar date (`YYYY-MM-DD`) of the last revision, if parseable.
    pub fn updated_date(&self) -> Option<String> {
        self.updated.as_deref().and_then(date_of)
    }

    /// Summary flattened for the history snapshot: NUL bytes dropped and
    /// line breaks turned into spaces.
    pub fn history_summary(&self) -> String {
        self.summary
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| *c != '\0')
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect()
    }
}

fn date_of(value: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.date_naive().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PaperRecord {
        PaperRecord {
            entry_id: "http://arxiv.org/abs/2401.00001v1".to_string(),
            title: "Sparse Attention".to_string(),
            authors: vec!["Ada Lovelace".to_string()],
            summary: Some("line one\nline two\r\0end".to_string()),
            primary_category: Some("cs.LG".to_string()),
            categories: vec!["cs.LG".to_string(), "stat.ML".to_string()],
            published: Some("2024-01-02T18:59:59+00:00".to_string()),
            updated: Some("2024-01-05T08:00:00Z".to_string()),
            journal_ref: None,
            doi: None,
            comment: None,
        }
    }

    #[test]
    fn test_dates_from_timestamps() {
        let r = record();
        assert_eq!(r.published_date().as_deref(), Some("2024-01-02"));
        assert_eq!(r.updated_date().as_deref(), Some("2024-01-05"));
    }

    #[test]
    fn test_unparseable_date_is_none() {
        let mut r = record();
        r.published = Some("last tuesday".to_string());
        assert_eq!(r.published_date(), None);
    }

    #[test]
    fn test_history_summary_sanitized() {
        assert_eq!(record().history_summary(), "line one line two end");
    }

    #[test]
    fn test_minimal_line_parses() {
        let r: PaperRecord = serde_json::from_str(r#"{"entry_id":"x1"}"#).unwrap();
        assert_eq!(r.entry_id, "x1");
        assert!(r.authors.is_empty());
        assert_eq!(r.history_summary(), "");
    }

    #[test]
    fn test_missing_entry_id_rejected() {
        assert!(serde_json::from_str::<PaperRecord>(r#"{"title":"no id"}"#).is_err());
    }
}
