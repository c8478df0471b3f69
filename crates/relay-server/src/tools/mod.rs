//! Named remote operations callable over `POST /tools/call`.

pub mod catalog;
pub mod provider;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use relay_core::tools::{Tool, ToolContext, ToolDefinition, ToolError};
use relay_core::ClientId;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use catalog::{provider_tools, register_provider_tools, ProviderTool};
pub use provider::{ProviderClient, ProviderConfig};
pub use validate::validate_arguments;

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let _ = self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

/// Validates a call against the registry and dispatches it.
pub struct ToolGateway {
    registry: ToolRegistry,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `name` with `args` on behalf of `client_id`. Cancelling `abort`
    /// ends an in-flight call with `ToolError::Cancelled`.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        client_id: ClientId,
        abort: CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        validate_arguments(&tool.parameters_schema(), &args).map_err(ToolError::InvalidArguments)?;

        let ctx = ToolContext::new(client_id, abort);
        let start = Instant::now();
        let result = tool.execute(args, &ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => info!(
                tool = name,
                call_id = %ctx.call_id,
                client_id = %ctx.client_id,
                elapsed_ms,
                "tool call succeeded"
            ),
            Err(e) => warn!(
                tool = name,
                call_id = %ctx.call_id,
                client_id = %ctx.client_id,
                elapsed_ms,
                code = e.code(),
                error = %e,
                "tool call failed"
            ),
        }
        result
    }
}
