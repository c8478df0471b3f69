use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, ContextItemId};

/// Free-form metadata attached to a context item.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A unit of out-of-band information addressed to one client.
///
/// Immutable once built; the store removes it when `expires_at` passes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: ContextItemId,
    pub client_id: ClientId,
    pub content: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ContextItem {
    /// Build a fresh item stamped with the current time.
    pub fn new(
        client_id: ClientId,
        content: serde_json::Value,
        metadata: Metadata,
        ttl_secs: u64,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::from(u32::MAX)));
        Self {
            id: ContextItemId::new(),
            client_id,
            content,
            metadata,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
