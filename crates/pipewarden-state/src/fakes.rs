//! In-memory fakes for the storage trait (testing only)
//!
//! Provides `MemoryStore`, which satisfies the `DurableStore` contract
//! without touching disk, and `FaultyStore`, a wrapper that rejects selected
//! writes so callers can exercise their write-failure paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory durable store backed by a `BTreeMap<key, bytes>`.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    store: Arc<Mutex<BTreeMap<StoreKey, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put_atomic(&self, key: &StoreKey, data: &[u8]) -> StorageResult<()> {
        lock(&self.store).insert(key.clone(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> StorageResult<Option<Vec<u8>>> {
        Ok(lock(&self.store).get(key).cloned())
    }

    async fn list(&self, prefix: &StoreKey) -> StorageResult<Vec<StoreKey>> {
        Ok(lock(&self.store)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &StoreKey) -> StorageResult<()> {
        lock(&self.store).remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FaultyStore
// ---------------------------------------------------------------------------

/// Wrapper that rejects writes to keys containing a configured fragment.
///
/// Rejected writes leave the inner store untouched, which is exactly what
/// an atomic backend guarantees when a write fails partway.
#[derive(Debug, Clone)]
pub struct FaultyStore<S> {
    inner: S,
    reject_fragment: Arc<Mutex<Option<String>>>,
    rejected: Arc<Mutex<Vec<StoreKey>>>,
}

impl<S: DurableStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reject_fragment: Arc::new(Mutex::new(None)),
            rejected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reject every subsequent write whose key contains `fragment`.
    pub fn fail_writes_containing(&self, fragment: impl Into<String>) {
        *lock(&self.reject_fragment) = Some(fragment.into());
    }

    /// Stop rejecting writes.
    pub fn heal(&self) {
        *lock(&self.reject_fragment) = None;
    }

    /// Keys whose writes were rejected, in order.
    pub fn rejected_keys(&self) -> Vec<StoreKey> {
        lock(&self.rejected).clone()
    }

    /// Access the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: DurableStore> DurableStore for FaultyStore<S> {
    async fn put_atomic(&self, key: &StoreKey, data: &[u8]) -> StorageResult<()> {
        let reject = lock(&self.reject_fragment)
            .as_deref()
            .is_some_and(|fragment| key.as_str().contains(fragment));
        if reject {
            lock(&self.rejected).push(key.clone());
            return Err(StorageError::WriteRejected {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        self.inner.put_atomic(key, data).await
    }

    async fn get(&self, key: &StoreKey) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &StoreKey) -> StorageResult<Vec<StoreKey>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &StoreKey) -> StorageResult<()> {
        self.inner.delete(key).await
    }
}
