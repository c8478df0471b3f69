use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::tools::ToolError;
use relay_store::StoreError;
use serde_json::json;

/// Error returned by HTTP handlers, rendered as `{"error": {code, message}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Tool(e) => match e {
                ToolError::UnknownTool(_) | ToolError::InvalidArguments(_) => StatusCode::BAD_REQUEST,
                ToolError::NotConfigured | ToolError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                ToolError::Provider { .. }
                | ToolError::ProviderRejected { .. }
                | ToolError::ExecutionFailed(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Store(_) => "STORE_ERROR",
            Self::Tool(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
