//! Raw batch descriptor model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ETL state of a raw batch object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Finished,
    Failed,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Finished,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Descriptor of one compressed batch object awaiting or done with loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub batch_id: String,
    pub category: String,
    /// Object storage key.
    pub object_path: String,
    /// Number of NDJSON lines in the object when it was written.
    pub record_count: u32,
    pub etl_status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub etl_started_at: Option<DateTime<Utc>>,
    pub etl_finished_at: Option<DateTime<Utc>>,
    pub error_msg: Option<String>,
}
