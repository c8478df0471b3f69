//! Store doubles for exercising failure paths.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use relay_store::{KvStore, MemoryKvStore, StoreError};
use tokio::sync::watch;

/// Memory store that can be told to fail every call or to hold calls until
/// released.
pub struct FlakyStore {
    inner: MemoryKvStore,
    failing: AtomicBool,
    stalled: watch::Sender<bool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        let (stalled, _) = watch::channel(false);
        Self {
            inner: MemoryKvStore::new(),
            failing: AtomicBool::new(false),
            stalled,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.send_replace(stalled);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let mut rx = self.stalled.subscribe();
        let _ = rx.wait_for(|stalled| !*stalled).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.put(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.gate().await?;
        self.inner.purge_expired().await
    }
}
