//! Durable key-value contract consumed by the context repository.

use async_trait::async_trait;

use crate::error::StoreError;

/// A key-value store with per-key expiry.
///
/// No transactions and no atomic append: multi-step updates are
/// get-then-put at the call site.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace `key`, visible for `ttl_secs` seconds.
    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Physically drop expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}
