//! Built-in provider tools. Each maps validated arguments onto one provider
//! task body and returns the task result unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::tools::{Tool, ToolContext, ToolError};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::provider::ProviderClient;
use super::ToolRegistry;

/// United States / English, used when the caller does not pick a market.
const DEFAULT_LOCATION_CODE: i64 = 2840;
const DEFAULT_LANGUAGE_CODE: &str = "en";

pub struct ProviderTool {
    name: &'static str,
    description: &'static str,
    endpoint: &'static str,
    schema: Value,
    localized: bool,
    client: Arc<ProviderClient>,
}

impl ProviderTool {
    pub fn endpoint(&self) -> &str {
        self.endpoint
    }

    /// Task body for the provider: the caller's arguments plus market
    /// defaults for localized endpoints.
    pub fn build_task(&self, args: &Value) -> Value {
        let mut task: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        task.retain(|_, v| !v.is_null());
        if self.localized {
            let _ = task
                .entry("location_code")
                .or_insert_with(|| json!(DEFAULT_LOCATION_CODE));
            let _ = task
                .entry("language_code")
                .or_insert_with(|| json!(DEFAULT_LANGUAGE_CODE));
        }
        Value::Object(task)
    }
}

#[async_trait]
impl Tool for ProviderTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task = self.build_task(&args);
        debug!(call_id = %ctx.call_id, tool = self.name, endpoint = self.endpoint, "dispatching provider task");
        tokio::select! {
            biased;
            () = ctx.abort_signal.cancelled() => Err(ToolError::Cancelled),
            result = self.client.post_task(self.endpoint, task) => result,
        }
    }
}

fn market_properties() -> Map<String, Value> {
    let mut props = Map::new();
    let _ = props.insert(
        "location_code".into(),
        json!({"type": "integer", "description": "Provider location code (default 2840, United States)"}),
    );
    let _ = props.insert(
        "language_code".into(),
        json!({"type": "string", "description": "Language code (default \"en\")"}),
    );
    props
}

fn object_schema(required: &[&str], mut props: Map<String, Value>, localized: bool) -> Value {
    if localized {
        props.extend(market_properties());
    }
    json!({
        "type": "object",
        "required": required,
        "properties": props,
    })
}

fn props(entries: Value) -> Map<String, Value> {
    match entries {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn provider_tool(
    client: &Arc<ProviderClient>,
    name: &'static str,
    description: &'static str,
    endpoint: &'static str,
    required: &[&str],
    properties: Value,
    localized: bool,
) -> ProviderTool {
    ProviderTool {
        name,
        description,
        endpoint,
        schema: object_schema(required, props(properties), localized),
        localized,
        client: Arc::clone(client),
    }
}

/// The full provider catalog, sharing one client.
pub fn provider_tools(client: &Arc<ProviderClient>) -> Vec<ProviderTool> {
    vec![
        provider_tool(
            client,
            "keyword_search_volume",
            "Monthly search volume, CPC and competition for up to 1000 keywords",
            "keywords_data/google_ads/search_volume/live",
            &["keywords"],
            json!({
                "keywords": {"type": "array", "items": {"type": "string"}, "description": "Keywords to look up"}
            }),
            true,
        ),
        provider_tool(
            client,
            "serp_organic",
            "Live organic search results for a keyword",
            "serp/google/organic/live/advanced",
            &["keyword"],
            json!({
                "keyword": {"type": "string", "description": "Search query"},
                "depth": {"type": "integer", "description": "Number of results to return"},
                "device": {"type": "string", "enum": ["desktop", "mobile"]}
            }),
            true,
        ),
        provider_tool(
            client,
            "keyword_ideas",
            "Related keyword suggestions for seed keywords",
            "dataforseo_labs/google/keyword_ideas/live",
            &["keywords"],
            json!({
                "keywords": {"type": "array", "items": {"type": "string"}, "description": "Seed keywords"},
                "limit": {"type": "integer", "description": "Maximum number of ideas"}
            }),
            true,
        ),
        provider_tool(
            client,
            "backlinks_summary",
            "Backlink profile overview for a domain or URL",
            "backlinks/summary/live",
            &["target"],
            json!({
                "target": {"type": "string", "description": "Domain, subdomain or page URL"}
            }),
            false,
        ),
        provider_tool(
            client,
            "ranked_keywords",
            "Keywords a domain ranks for in organic search",
            "dataforseo_labs/google/ranked_keywords/live",
            &["target"],
            json!({
                "target": {"type": "string", "description": "Domain to analyse"},
                "limit": {"type": "integer", "description": "Maximum number of keywords"}
            }),
            true,
        ),
    ]
}

/// Register every catalog tool.
pub fn register_provider_tools(registry: &mut ToolRegistry, client: &Arc<ProviderClient>) {
    for tool in provider_tools(client) {
        registry.register(Arc::new(tool));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::provider::ProviderConfig;
    use crate::tools::validate::validate_arguments;
    use std::time::Duration;

    fn client() -> Arc<ProviderClient> {
        Arc::new(ProviderClient::new(ProviderConfig {
            base_url: "http://localhost:1".into(),
            login: None,
            password: None,
            timeout: Duration::from_secs(1),
        }))
    }

    fn find(name: &str) -> ProviderTool {
        provider_tools(&client())
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    #[test]
    fn catalog_names_are_unique() {
        let tools = provider_tools(&client());
        let mut names: Vec<_> = tools.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len());
        assert_eq!(tools.len(), 5);
    }

    #[test]
    fn localized_tasks_get_market_defaults() {
        let task = find("serp_organic").build_task(&json!({"keyword": "rust", "depth": null}));
        assert_eq!(task["keyword"], "rust");
        assert_eq!(task["location_code"], 2840);
        assert_eq!(task["language_code"], "en");
        assert!(task.get("depth").is_none());
    }

    #[test]
    fn explicit_market_is_kept() {
        let task = find("keyword_ideas")
            .build_task(&json!({"keywords": ["a"], "location_code": 2826, "language_code": "de"}));
        assert_eq!(task["location_code"], 2826);
        assert_eq!(task["language_code"], "de");
    }

    #[test]
    fn backlinks_task_has_no_market() {
        let tool = find("backlinks_summary");
        let task = tool.build_task(&json!({"target": "example.com"}));
        assert!(task.get("location_code").is_none());
        assert_eq!(tool.endpoint(), "backlinks/summary/live");
        assert!(tool.parameters_schema()["properties"].get("location_code").is_none());
    }

    #[test]
    fn schemas_drive_validation() {
        let schema = find("keyword_search_volume").parameters_schema();
        assert!(validate_arguments(&schema, &json!({"keywords": ["rust"]})).is_ok());
        assert!(validate_arguments(&schema, &json!({"keywords": "rust"})).is_err());
        assert!(validate_arguments(&schema, &json!({"location_code": 2840})).is_err());
    }

    #[tokio::test]
    async fn aborted_call_is_cancelled() {
        let tool = find("backlinks_summary");
        let abort = tokio_util::sync::CancellationToken::new();
        abort.cancel();
        let ctx = ToolContext::new(relay_core::ClientId::new("c1"), abort);
        let err = tool.execute(json!({"target": "example.com"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
