//! HTTP client for the third-party data provider.
//!
//! Every call posts a one-element task array to `<base_url>/<endpoint>` with
//! basic auth. The provider wraps results in an envelope carrying its own
//! status codes (`20000` means success) at both the response and task level.

use std::time::Duration;

use relay_core::tools::ToolError;
use relay_settings::ProviderSettings;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

const PROVIDER_OK: i64 = 20000;
const MAX_ERROR_BODY: usize = 2_000;

/// Provider endpoint and credentials.
#[derive(Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    pub login: Option<String>,
    pub password: Option<SecretString>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Credentials are only carried over when both halves are present.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let (login, password) = if settings.has_credentials() {
            (
                settings.login.clone(),
                settings.password.clone().map(SecretString::from),
            )
        } else {
            (None, None)
        };
        Self {
            base_url: settings.base_url.clone(),
            login,
            password,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

struct Credentials {
    login: String,
    password: SecretString,
}

pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        let credentials = match (config.login, config.password) {
            (Some(login), Some(password)) if !login.is_empty() => Some(Credentials { login, password }),
            _ => None,
        };
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Post a single task and return the task's `result` field.
    pub async fn post_task(&self, endpoint: &str, task: Value) -> Result<Value, ToolError> {
        let Some(creds) = &self.credentials else {
            return Err(ToolError::NotConfigured);
        };
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        debug!(%url, "provider request");

        let response = self
            .http
            .post(&url)
            .basic_auth(&creds.login, Some(creds.password.expose_secret()))
            .json(&Value::Array(vec![task]))
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("provider request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_in_place(&mut body, MAX_ERROR_BODY);
            warn!(%url, status = status.as_u16(), "provider returned error status");
            return Err(ToolError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid provider response: {e}")))?;
        unwrap_envelope(envelope)
    }
}

/// Pull the first task's result out of a provider envelope.
pub fn unwrap_envelope(envelope: Value) -> Result<Value, ToolError> {
    check_status(&envelope)?;
    let task = envelope
        .get("tasks")
        .and_then(Value::as_array)
        .and_then(|tasks| tasks.first())
        .ok_or_else(|| ToolError::ExecutionFailed("provider response has no tasks".into()))?;
    check_status(task)?;
    Ok(task.get("result").cloned().unwrap_or(Value::Null))
}

fn check_status(value: &Value) -> Result<(), ToolError> {
    match value.get("status_code").and_then(Value::as_i64) {
        None | Some(PROVIDER_OK) => Ok(()),
        Some(code) => Err(ToolError::ProviderRejected {
            code,
            message: value
                .get("status_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
    }
}

fn truncate_in_place(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn fake_provider(reply: (StatusCode, Value)) -> String {
        let app = Router::new().route(
            "/v3/serp/live",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if !auth.starts_with("Basic ") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({})));
                    }
                    assert!(body.is_array());
                    (reply.0, Json(reply.1))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}/v3/")
    }

    fn client(base_url: String, with_credentials: bool) -> ProviderClient {
        ProviderClient::new(ProviderConfig {
            base_url,
            login: with_credentials.then(|| "user".to_string()),
            password: with_credentials.then(|| SecretString::from("secret".to_string())),
            timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn settings_need_both_credentials() {
        let mut settings = ProviderSettings {
            login: Some("user".into()),
            ..ProviderSettings::default()
        };
        assert!(!ProviderClient::new(ProviderConfig::from_settings(&settings)).is_configured());
        settings.password = Some("secret".into());
        assert!(ProviderClient::new(ProviderConfig::from_settings(&settings)).is_configured());
    }

    #[test]
    fn missing_credentials_means_unconfigured() {
        assert!(!client("http://localhost".into(), false).is_configured());
        assert!(client("http://localhost".into(), true).is_configured());
    }

    #[tokio::test]
    async fn unconfigured_client_fails_fast() {
        let err = client("http://localhost".into(), false)
            .post_task("serp/live", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotConfigured));
    }

    #[tokio::test]
    async fn successful_task_returns_result() {
        let base = fake_provider((
            StatusCode::OK,
            json!({
                "status_code": 20000,
                "tasks": [{"status_code": 20000, "result": [{"keyword": "rust", "search_volume": 100}]}]
            }),
        ))
        .await;
        let result = client(base, true)
            .post_task("/serp/live", json!({"keyword": "rust"}))
            .await
            .unwrap();
        assert_eq!(result[0]["search_volume"], 100);
    }

    #[tokio::test]
    async fn http_errors_carry_status() {
        let base = fake_provider((StatusCode::INTERNAL_SERVER_ERROR, json!({"oops": true}))).await;
        let err = client(base, true)
            .post_task("serp/live", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Provider { status: 500, .. }));
    }

    #[tokio::test]
    async fn task_level_rejection_is_reported() {
        let base = fake_provider((
            StatusCode::OK,
            json!({
                "status_code": 20000,
                "tasks": [{"status_code": 40501, "status_message": "Invalid Field"}]
            }),
        ))
        .await;
        let err = client(base, true)
            .post_task("serp/live", json!({}))
            .await
            .unwrap_err();
        match err {
            ToolError::ProviderRejected { code, message } => {
                assert_eq!(code, 40501);
                assert_eq!(message, "Invalid Field");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn envelope_without_tasks_is_an_error() {
        assert!(unwrap_envelope(json!({"status_code": 20000})).is_err());
        assert!(matches!(
            unwrap_envelope(json!({"status_code": 40100, "status_message": "auth"})),
            Err(ToolError::ProviderRejected { code: 40100, .. })
        ));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate_in_place(&mut s, 2);
        assert_eq!(s, "h");
    }
}
