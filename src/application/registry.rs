use crate::domain::types::ToolResult;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// An asynchronous local capability the model may invoke by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError>;
}

struct PrefixRoute {
    prefix: String,
    handler: Arc<dyn ToolHandler>,
}

/// Maps tool names to handlers. Resolution is an ordered lookup: an exact
/// name match wins, then a single optional catch-all prefix route, then an
/// "unknown tool" failure. Handler errors are captured at this boundary so a
/// failing tool can never abort the orchestration loop.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    fallback: Option<PrefixRoute>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Route any otherwise-unknown tool whose name starts with `prefix` to
    /// `handler`, forwarding `{ "tool": name, "params": params }`.
    pub fn register_prefix(&mut self, prefix: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.fallback = Some(PrefixRoute {
            prefix: prefix.into(),
            handler,
        });
    }

    pub async fn dispatch(&self, name: &str, params: Value) -> ToolResult {
        if let Some(handler) = self.handlers.get(name) {
            return Self::run_handler(name, handler.as_ref(), params).await;
        }

        if let Some(route) = &self.fallback {
            if name.starts_with(&route.prefix) {
                let forwarded = json!({ "tool": name, "params": params });
                return Self::run_handler(name, route.handler.as_ref(), forwarded).await;
            }
        }

        warn!(tool = %name, "Unknown tool requested");
        ToolResult::failure(format!("unknown tool: {name}"))
    }

    async fn run_handler(name: &str, handler: &dyn ToolHandler, params: Value) -> ToolResult {
        match handler.call(params).await {
            Ok(result) => {
                info!(tool = %name, success = result.success, "Tool executed");
                result
            }
            Err(error) => {
                warn!(tool = %name, %error, "Tool handler failed");
                ToolResult::failure(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
            Ok(ToolResult::from_value(json!({ "echoed": params })))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        async fn call(&self, _params: Value) -> Result<ToolResult, HandlerError> {
            Err("handler exploded".into())
        }
    }

    #[tokio::test]
    async fn exact_match_wins_over_prefix() {
        let mut registry = ToolRegistry::new();
        registry.register("vault_info", Arc::new(EchoTool));
        registry.register_prefix("vault_", Arc::new(FailingTool));

        let result = registry.dispatch("vault_info", json!({"a": 1})).await;
        assert!(result.success);
        assert_eq!(result.payload["echoed"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn prefix_route_forwards_name_and_params() {
        let mut registry = ToolRegistry::new();
        registry.register_prefix("vault_", Arc::new(EchoTool));

        let result = registry.dispatch("vault_get_config", json!({"x": true})).await;
        assert!(result.success);
        assert_eq!(
            result.payload["echoed"],
            json!({"tool": "vault_get_config", "params": {"x": true}})
        );
    }

    #[tokio::test]
    async fn unknown_tool_returns_failure_without_panicking() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch("nope", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown tool: nope"));
    }

    #[tokio::test]
    async fn handler_error_is_converted_to_failure() {
        let mut registry = ToolRegistry::new();
        registry.register("boom", Arc::new(FailingTool));

        let result = registry.dispatch("boom", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("handler exploded"));
    }
}
