//! Object storage for raw batch objects.
//!
//! Batches are written once under a deterministic key and read back by the
//! loader. Backends implement [`ObjectStore`]; the collector only ever talks
//! to the trait.

mod codec;
mod http;
mod local;
mod memory;

pub use codec::{batch_id, category_slug, decode_ndjson_gz, encode_ndjson_gz, object_key};
pub use http::HttpObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Settings, StorageBackend};

/// Content type of raw batch objects.
pub const BATCH_CONTENT_TYPE: &str = "application/json";

/// Content encoding of raw batch objects.
pub const BATCH_CONTENT_ENCODING: &str = "gzip";

/// Errors raised by object storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage request for {key} failed with status {status}")]
    Status { key: String, status: u16 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Headers stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PutOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl PutOptions {
    /// Options for a gzip NDJSON batch object.
    pub fn gzip_json() -> Self {
        Self {
            content_type: Some(BATCH_CONTENT_TYPE.to_string()),
            content_encoding: Some(BATCH_CONTENT_ENCODING.to_string()),
        }
    }
}

/// A flat key/value object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object under the key.
    async fn put(&self, key: &str, body: Vec<u8>, options: &PutOptions)
        -> Result<(), StorageError>;

    /// Read an object's bytes exactly as they were written.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Bounded exponential backoff for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Delay after the failed attempt numbered `attempt` (zero-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

/// Upload an object, retrying failed attempts with exponential backoff.
///
/// Returns the error of the last attempt once `max_attempts` have failed.
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    key: &str,
    body: &[u8],
    options: &PutOptions,
    policy: RetryPolicy,
) -> Result<(), StorageError> {
    let mut attempt = 0;
    loop {
        match store.put(key, body.to_vec(), options).await {
            Ok(()) => {
                debug!(key, attempt = attempt + 1, "Uploaded object");
                return Ok(());
            }
            Err(e) if attempt + 1 >= policy.max_attempts => {
                warn!(key, attempts = attempt + 1, error = %e, "Upload failed, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    key,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Build the configured object store.
pub fn open_store(settings: &Settings) -> Result<Arc<dyn ObjectStore>, StorageError> {
    Ok(match &settings.storage {
        StorageBackend::Local { root } => Arc::new(LocalObjectStore::new(root.clone())),
        StorageBackend::Http { url, token } => Arc::new(HttpObjectStore::new(
            url,
            token.clone(),
            &settings.user_agent,
        )?),
        StorageBackend::Memory => Arc::new(MemoryObjectStore::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Paused time still advances about a millisecond per timer, so compare
    /// against the backoff total with a small allowance.
    fn assert_slept(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(elapsed >= expected, "slept {elapsed:?}, expected {expected:?}");
        assert!(
            elapsed < expected + Duration::from_millis(50),
            "slept {elapsed:?}, expected {expected:?}"
        );
    }

    #[test]
    fn test_delay_schedule_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let delays: Vec<u64> = (0..4).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        tokio::time::pause();
        let store = MemoryObjectStore::new();
        store.fail_next_puts(2);

        let start = Instant::now();
        upload_with_retry(
            &store,
            "raw/cs_AI/k.jsonl.gz",
            b"x",
            &PutOptions::gzip_json(),
            RetryPolicy::new(5, Duration::from_secs(1)),
        )
        .await
        .unwrap();

        // 1s after the first failure, 2s after the second.
        assert_slept(start, Duration::from_secs(3));
        assert_eq!(store.put_attempts(), 3);
        assert!(store.exists("raw/cs_AI/k.jsonl.gz").await.unwrap());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        tokio::time::pause();
        let store = MemoryObjectStore::new();
        store.fail_next_puts(5);

        let start = Instant::now();
        let result = upload_with_retry(
            &store,
            "k",
            b"x",
            &PutOptions::default(),
            RetryPolicy::new(5, Duration::from_secs(1)),
        )
        .await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(store.put_attempts(), 5);
        // 1 + 2 + 4 + 8, no sleep after the last attempt.
        assert_slept(start, Duration::from_secs(15));
        assert!(!store.exists("k").await.unwrap());
    }
}
