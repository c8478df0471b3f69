use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::{ContextItem, Metadata};
use crate::ids::{ClientId, ContextItemId};

/// Events emitted on a subscription stream.
///
/// Each variant maps to one named event with a single JSON payload.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Connected {
        client_id: ClientId,
        timestamp: DateTime<Utc>,
        protocol_version: String,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Context(ContextPayload),
}

/// Body of a `context` event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub id: ContextItemId,
    pub content: serde_json::Value,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl From<ContextItem> for ContextPayload {
    fn from(item: ContextItem) -> Self {
        Self {
            id: item.id,
            content: item.content,
            metadata: item.metadata,
            created_at: item.created_at,
        }
    }
}

impl SessionEvent {
    pub fn connected(client_id: ClientId, protocol_version: impl Into<String>) -> Self {
        Self::Connected {
            client_id,
            timestamp: Utc::now(),
            protocol_version: protocol_version.into(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn context(item: ContextItem) -> Self {
        Self::Context(item.into())
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Context(_) => "context",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Connected {
                client_id,
                timestamp,
                protocol_version,
            } => serde_json::json!({
                "clientId": client_id,
                "timestamp": timestamp.to_rfc3339(),
                "protocolVersion": protocol_version,
            }),
            Self::Heartbeat { timestamp } => serde_json::json!({
                "timestamp": timestamp.to_rfc3339(),
            }),
            Self::Context(payload) => {
                serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
            }
        }
    }

    /// Item id carried by a `context` event.
    pub fn item_id(&self) -> Option<&ContextItemId> {
        match self {
            Self::Context(payload) => Some(&payload.id),
            _ => None,
        }
    }

    /// Encode as one text/event-stream frame: `event:` line, single-line
    /// `data:` line, blank line.
    pub fn to_frame(&self) -> String {
        // serde_json never emits raw newlines in compact mode
        format!("event: {}\ndata: {}\n\n", self.name(), self.payload())
    }
}
