use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ClientId, ToolCallId};

/// Context available to tools during execution.
pub struct ToolContext {
    pub call_id: ToolCallId,
    pub client_id: ClientId,
    pub abort_signal: CancellationToken,
}

impl ToolContext {
    /// `abort_signal` is cancelled when the caller gives up on the call.
    pub fn new(client_id: ClientId, abort_signal: CancellationToken) -> Self {
        Self {
            call_id: ToolCallId::new(),
            client_id,
            abort_signal,
        }
    }
}

/// Tool definition advertised to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A named remote operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("provider not configured")]
    NotConfigured,
    #[error("provider error {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("provider rejected task ({code}): {message}")]
    ProviderRejected { code: i64, message: String },
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Caller-side mistakes, as opposed to provider or transport failures.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::InvalidArguments(_))
    }

    /// Short classification string for responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "UNKNOWN_TOOL",
            Self::InvalidArguments(_) => "INVALID_ARGUMENTS",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::ProviderRejected { .. } => "PROVIDER_REJECTED",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}
