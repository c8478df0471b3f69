//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open subscription sessions across all clients.
    pub active_sessions: usize,
    /// Registered tools.
    pub tools: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    sessions: usize,
    tools: usize,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions: sessions,
        tools,
    }
}
