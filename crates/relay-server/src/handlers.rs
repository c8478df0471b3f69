//! HTTP handlers.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use relay_core::{ClientId, ContextItemId, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ApiError;
use crate::health::{health_check, HealthResponse};
use crate::server::AppState;
use crate::session::SubscriptionSession;
use crate::sink::event_channel;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeQuery {
    pub client_id: Option<String>,
}

/// GET /events?clientId=...
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Response, ApiError> {
    open_stream(&state, ClientId::new(query.client_id.unwrap_or_default()))
}

/// GET /events/{client_id}
pub async fn subscribe_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    open_stream(&state, ClientId::new(client_id))
}

fn open_stream(state: &AppState, client_id: ClientId) -> Result<Response, ApiError> {
    if state.shutdown.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }

    let (sink, stream) = event_channel(state.channel_capacity);
    let mut session = SubscriptionSession::new(
        client_id.clone(),
        state.repo.clone(),
        sink,
        state.session_config.clone(),
        state.shutdown.token(),
    );
    if client_id.is_anonymous() {
        session = session.with_live_feed(state.relay.subscribe());
    }

    let guard = state.sessions.enter(&client_id);
    let _ = state.shutdown.spawn(async move {
        let _guard = guard;
        let _ = session.run().await;
    });

    let body = Body::from_stream(stream.into_frames().map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                header::HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub client_id: Option<String>,
    pub content: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub id: ContextItemId,
    pub client_id: ClientId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// POST /context
pub async fn submit_context(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let client_id = match req.client_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => ClientId::new(id),
        _ => return Err(ApiError::BadRequest("clientId is required".into())),
    };
    let content = match req.content {
        Some(content) if !is_blank(&content) => content,
        _ => return Err(ApiError::BadRequest("content is required".into())),
    };

    let item = state
        .repo
        .submit(&client_id, content, req.metadata.unwrap_or_default())
        .await?;

    if client_id.is_anonymous() {
        let reached = state.relay.publish(item.clone());
        debug!(item_id = %item.id, reached, "anonymous item relayed");
    }

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: item.id,
            client_id: item.client_id,
            created_at: item.created_at,
            expires_at: item.expires_at,
        }),
    ))
}

fn is_blank(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub client_id: ClientId,
    pub last_seen: Option<DateTime<Utc>>,
    pub online: bool,
    pub active_sessions: usize,
    pub pending: usize,
}

/// GET /clients/{client_id}
pub async fn client_status(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientStatus>, ApiError> {
    let client_id = ClientId::new(client_id);
    let last_seen = state.repo.last_seen(&client_id).await?;
    let pending = state.repo.list_undelivered(&client_id).await?.len();
    let active_sessions = state.sessions.sessions_for(&client_id);

    Ok(Json(ClientStatus {
        online: active_sessions > 0 || last_seen.is_some(),
        client_id,
        last_seen,
        active_sessions,
        pending,
    }))
}

/// GET /tools
pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.tools.registry().definitions() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    #[serde(alias = "name")]
    pub tool: String,
    #[serde(default)]
    pub arguments: Option<Value>,
    pub client_id: Option<String>,
}

/// POST /tools/call
pub async fn call_tool(
    State(state): State<AppState>,
    payload: Result<Json<ToolCallRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let args = req.arguments.unwrap_or_else(|| json!({}));
    let client_id = ClientId::new(req.client_id.unwrap_or_default());

    let abort = state.shutdown.token().child_token();
    let result = state.tools.invoke(&req.tool, args, client_id, abort).await?;
    Ok(Json(json!({ "result": result })))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.sessions.total(),
        state.tools.registry().count(),
        state.shutdown.is_shutting_down(),
    ))
}
