//! Settings sections.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub delivery: DeliverySettings,
    pub store: StoreSettings,
    pub provider: ProviderSettings,
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.delivery;
        if d.pending_cap == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery.pendingCap must be at least 1".into(),
            ));
        }
        if d.poll_interval_ms == 0 || d.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery intervals must be non-zero".into(),
            ));
        }
        if d.item_ttl_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery.itemTtlSecs must be non-zero".into(),
            ));
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.path.is_empty() {
            return Err(SettingsError::InvalidValue(
                "store.path is required for the sqlite backend".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks an ephemeral port).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Subscription and retention timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Delivery poll period.
    pub poll_interval_ms: u64,
    /// Heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Absolute session lifetime.
    pub max_session_secs: u64,
    /// TTL of context items and per-client indices.
    pub item_ttl_secs: u64,
    /// Pending index length before FIFO eviction.
    pub pending_cap: usize,
    /// Version string announced in the `connected` event.
    pub protocol_version: String,
    /// Outbound event buffer per session.
    pub channel_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            max_session_secs: 3_600,
            item_ttl_secs: 86_400,
            pending_cap: 100,
            protocol_version: "1.0".to_string(),
            channel_capacity: 256,
        }
    }
}

/// Store backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Durable store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// SQLite file path. Relative paths resolve against `~/.relay`.
    pub path: String,
    /// How often expired keys are physically removed.
    pub purge_interval_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "relay.db".to_string(),
            purge_interval_secs: 300,
        }
    }
}

/// Third-party data provider used by the tool gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.dataforseo.com/v3".to_string(),
            login: None,
            password: None,
            timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    /// Both credentials are present and non-empty.
    pub fn has_credentials(&self) -> bool {
        matches!(
            (self.login.as_deref(), self.password.as_deref()),
            (Some(l), Some(p)) if !l.is_empty() && !p.is_empty()
        )
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
