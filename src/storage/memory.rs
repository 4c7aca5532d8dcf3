//! In-process object store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ObjectStore, PutOptions, StorageError};

/// A stored object and its headers.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub options: PutOptions,
}

/// Object store held in memory.
///
/// Puts can be made to fail on demand to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failures_left: AtomicU32,
    put_attempts: AtomicU32,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts fail with [`StorageError::Unavailable`].
    pub fn fail_next_puts(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Total put calls, failed ones included.
    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// A stored object with its headers.
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.lock().get(key).cloned()
    }

    /// Store bytes directly, bypassing failure injection.
    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                options: PutOptions::default(),
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<(), StorageError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Unavailable(format!(
                "injected failure writing {key}"
            )));
        }
        self.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                options: options.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.lock()
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock().contains_key(key))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
