use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::database::Database;
use crate::error::StoreError;
use crate::kv::KvStore;

/// [`KvStore`] backed by a single SQLite table.
///
/// Expiry is enforced on read; rows linger until [`KvStore::purge_expired`].
#[derive(Clone)]
pub struct SqliteKvStore {
    db: Database,
}

impl SqliteKvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline_ms(ttl_secs: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_ms().saturating_add(ttl_ms)
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_ms();
        self.db.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv WHERE key = ?1 AND expires_at > ?2",
                    rusqlite::params![key, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let expires_at = deadline_ms(ttl_secs);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                rusqlite::params![key, value, expires_at],
            )?;
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let removed = self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM kv WHERE expires_at <= ?1", [now])?;
            Ok(n)
        })?;
        if removed > 0 {
            debug!(removed, "purged expired keys");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteKvStore {
        SqliteKvStore::new(Database::in_memory().unwrap())
    }

    fn insert_expired(store: &SqliteKvStore, key: &str) {
        store
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES (?1, 'stale', ?2)",
                    rusqlite::params![key, now_ms() - 1_000],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = store();
        store.put("a", "1", 60).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn put_overwrites_and_refreshes() {
        let store = store();
        store.put("a", "1", 60).await.unwrap();
        store.put("a", "2", 120).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = store();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_and_tolerates_missing() {
        let store = store();
        store.put("a", "1", 60).await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_then_purged() {
        let store = store();
        insert_expired(&store, "old");
        store.put("fresh", "1", 60).await.unwrap();

        assert!(store.get("old").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_revives_expired_row() {
        let store = store();
        insert_expired(&store, "k");
        store.put("k", "new", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow() {
        let store = store();
        store.put("forever", "1", u64::MAX).await.unwrap();
        assert!(store.get("forever").await.unwrap().is_some());
    }
}
