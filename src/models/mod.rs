//! Data models for the harvest pipeline.

mod batch;
mod category;
mod paper;
mod stats;

pub use batch::{BatchStatus, RawBatch};
pub use category::{CategoryProgress, CategoryStatus, TrackingStatus};
pub use paper::{PaperRecord, HISTORY_OPERATION_INSERT, HISTORY_STAGE_INITIAL_LOAD};
pub use stats::CategoryRunStats;
