//! Context items and the per-client pending/delivered indices.
//!
//! Key layout in the underlying [`KvStore`]:
//!
//! - `context:<item id>`: the serialized [`ContextItem`]
//! - `pending:<client id>`: JSON array of item ids, oldest first
//! - `delivered:<client id>`: JSON array of item ids already emitted
//! - `lastseen:<client id>`: RFC 3339 timestamp of the last session activity
//!
//! Index updates are whole-value read-modify-write. Two writers racing on the
//! same client's index can lose an update; submissions for one client are
//! expected to be serialized upstream, and a lost delivered-mark only causes a
//! redelivery.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::{ClientId, ContextItem, ContextItemId, Metadata};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::kv::KvStore;

/// Retention knobs for context items and indices.
#[derive(Clone, Debug)]
pub struct RetentionPolicy {
    /// TTL applied to items and both indices on every write.
    pub item_ttl_secs: u64,
    /// Maximum pending-index length before FIFO eviction.
    pub pending_cap: usize,
    /// TTL of the `lastseen` marker.
    pub presence_ttl_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            item_ttl_secs: 24 * 60 * 60,
            pending_cap: 100,
            presence_ttl_secs: 90,
        }
    }
}

fn item_key(id: &ContextItemId) -> String {
    format!("context:{id}")
}

fn pending_key(client_id: &ClientId) -> String {
    format!("pending:{client_id}")
}

fn delivered_key(client_id: &ClientId) -> String {
    format!("delivered:{client_id}")
}

fn presence_key(client_id: &ClientId) -> String {
    format!("lastseen:{client_id}")
}

pub struct ContextRepository {
    store: Arc<dyn KvStore>,
    policy: RetentionPolicy,
    evictions: TaskTracker,
}

impl ContextRepository {
    pub fn new(store: Arc<dyn KvStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            evictions: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Record a new item for `client_id` and append it to the pending index.
    ///
    /// Anonymous submissions are built but never persisted. When the pending
    /// index exceeds the cap, the oldest ids are dropped and their items are
    /// deleted in the background.
    pub async fn submit(
        &self,
        client_id: &ClientId,
        content: serde_json::Value,
        metadata: Metadata,
    ) -> Result<ContextItem, StoreError> {
        let ttl = self.policy.item_ttl_secs;
        let item = ContextItem::new(client_id.clone(), content, metadata, ttl);

        if client_id.is_anonymous() {
            debug!(item_id = %item.id, "anonymous context item not persisted");
            return Ok(item);
        }

        let body = serde_json::to_string(&item)?;
        self.store.put(&item_key(&item.id), &body, ttl).await?;

        let key = pending_key(client_id);
        let mut pending = self.read_ids(&key).await?;
        pending.push(item.id.clone());

        let cap = self.policy.pending_cap.max(1);
        let evicted: Vec<ContextItemId> = if pending.len() > cap {
            let overflow = pending.len() - cap;
            pending.drain(..overflow).collect()
        } else {
            Vec::new()
        };

        self.write_ids(&key, &pending, ttl).await?;

        if !evicted.is_empty() {
            self.schedule_eviction(client_id, evicted);
        }

        info!(client_id = %client_id, item_id = %item.id, "context item submitted");
        Ok(item)
    }

    /// Ids in the pending index that are not in the delivered index, in
    /// submission order.
    pub async fn list_undelivered(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<ContextItemId>, StoreError> {
        if client_id.is_anonymous() {
            return Ok(Vec::new());
        }
        let pending = self.read_ids(&pending_key(client_id)).await?;
        if pending.is_empty() {
            return Ok(pending);
        }
        let delivered: HashSet<ContextItemId> = self
            .read_ids(&delivered_key(client_id))
            .await?
            .into_iter()
            .collect();
        Ok(pending
            .into_iter()
            .filter(|id| !delivered.contains(id))
            .collect())
    }

    /// Load an item. Expired or evicted items are `None`, not an error.
    pub async fn fetch(&self, id: &ContextItemId) -> Result<Option<ContextItem>, StoreError> {
        let Some(body) = self.store.get(&item_key(id)).await? else {
            return Ok(None);
        };
        let item: ContextItem = serde_json::from_str(&body)?;
        if item.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Union `ids` into the client's delivered index.
    ///
    /// Previously delivered ids that have left the pending index are dropped
    /// on the way, so the delivered index never outgrows the pending cap by
    /// more than one batch.
    pub async fn mark_delivered(
        &self,
        client_id: &ClientId,
        ids: &[ContextItemId],
    ) -> Result<(), StoreError> {
        if client_id.is_anonymous() || ids.is_empty() {
            return Ok(());
        }

        let key = delivered_key(client_id);
        let pending: HashSet<ContextItemId> = self
            .read_ids(&pending_key(client_id))
            .await?
            .into_iter()
            .collect();

        let mut delivered: Vec<ContextItemId> = self
            .read_ids(&key)
            .await?
            .into_iter()
            .filter(|id| pending.contains(id))
            .collect();
        let mut seen: HashSet<ContextItemId> = delivered.iter().cloned().collect();
        for id in ids {
            if seen.insert(id.clone()) {
                delivered.push(id.clone());
            }
        }

        self.write_ids(&key, &delivered, self.policy.item_ttl_secs)
            .await?;
        debug!(client_id = %client_id, count = ids.len(), "marked delivered");
        Ok(())
    }

    /// Record session activity for `client_id`. Returns `false` for anonymous
    /// clients, which have nothing to record.
    pub async fn touch(&self, client_id: &ClientId) -> Result<bool, StoreError> {
        if client_id.is_anonymous() {
            return Ok(false);
        }
        self.store
            .put(
                &presence_key(client_id),
                &Utc::now().to_rfc3339(),
                self.policy.presence_ttl_secs,
            )
            .await?;
        Ok(true)
    }

    /// Last recorded session activity, if still within the presence TTL.
    pub async fn last_seen(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        if client_id.is_anonymous() {
            return Ok(None);
        }
        let Some(raw) = self.store.get(&presence_key(client_id)).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| StoreError::Serialization(format!("lastseen: {e}")))
    }

    /// Wait until every background eviction scheduled so far has finished.
    pub async fn wait_for_evictions(&self) {
        self.evictions.close();
        self.evictions.wait().await;
        self.evictions.reopen();
    }

    fn schedule_eviction(&self, client_id: &ClientId, ids: Vec<ContextItemId>) {
        let store = Arc::clone(&self.store);
        let client_id = client_id.clone();
        let _ = self.evictions.spawn(async move {
            for id in &ids {
                if let Err(e) = store.delete(&item_key(id)).await {
                    warn!(client_id = %client_id, item_id = %id, error = %e, "eviction failed");
                }
            }
            debug!(client_id = %client_id, count = ids.len(), "evicted context items");
        });
    }

    async fn read_ids(&self, key: &str) -> Result<Vec<ContextItemId>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_ids(
        &self,
        key: &str,
        ids: &[ContextItemId],
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(ids)?;
        self.store.put(key, &raw, ttl_secs).await
    }
}
