use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::kv::KvStore;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`KvStore`]. Deadlines follow the tokio clock, so paused-time
/// tests can age entries with `tokio::time::advance`.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn deadline(ttl_secs: u64) -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_secs(ttl_secs))
        // far enough to never matter for a running process
        .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            let _ = entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: deadline(ttl_secs),
        };
        let _ = self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _ = self.entries.lock().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryKvStore::new();
        store.put("a", "1", 60).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.len(), 1);
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_tokio_clock() {
        let store = MemoryKvStore::new();
        store.put("short", "1", 10).await.unwrap();
        store.put("long", "2", 100).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_counts_removed_entries() {
        let store = MemoryKvStore::new();
        store.put("a", "1", 5).await.unwrap();
        store.put("b", "2", 5).await.unwrap();
        store.put("c", "3", 50).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }
}
