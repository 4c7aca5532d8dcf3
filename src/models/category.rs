//! Category progress and per-paper tracking models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Harvest state of a declared category.
///
/// Transitions only from `Pending` to `Finished` during normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryStatus {
    Pending,
    Finished,
}

impl CategoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Finished => "Finished",
        }
    }

    /// Anything other than `Finished` counts as pending, matching how
    /// rows created with an empty status behave.
    pub fn from_str(s: &str) -> Self {
        match s {
            "Finished" => Self::Finished,
            _ => Self::Pending,
        }
    }
}

/// Progress row for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryProgress {
    pub name: String,
    pub status: CategoryStatus,
    pub updated_at: DateTime<Utc>,
}

/// Status of a single paper ingestion attempt in `downloaded_papers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    /// Admitted into a batch that has not been uploaded yet.
    Pending,
    /// Part of a batch committed to object storage.
    Uploaded,
    /// Part of a batch whose upload exhausted its retries.
    Failed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "uploaded" => Some(Self::Uploaded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_status_round_trip() {
        for status in [CategoryStatus::Pending, CategoryStatus::Finished] {
            assert_eq!(CategoryStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_blank_category_status_is_pending() {
        assert_eq!(CategoryStatus::from_str(""), CategoryStatus::Pending);
    }

    #[test]
    fn test_tracking_status_unknown() {
        assert_eq!(TrackingStatus::from_str("uploaded"), Some(TrackingStatus::Uploaded));
        assert_eq!(TrackingStatus::from_str("lost"), None);
    }
}
