use crate::application::registry::{HandlerError, ToolHandler};
use crate::domain::types::ToolResult;
use crate::infrastructure::bridge::{BridgeError, ProcessBridge};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// Adapts the JSON-RPC process bridge into the tool registry. Registered
/// as a prefix route, so it receives `{ "tool": name, "params": params }`.
pub struct BridgeTool {
    bridge: ProcessBridge,
}

#[derive(Debug, Deserialize)]
struct BridgeCall {
    tool: String,
    #[serde(default)]
    params: Value,
}

impl BridgeTool {
    pub fn new(bridge: ProcessBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ToolHandler for BridgeTool {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
        let call: BridgeCall = serde_json::from_value(params)
            .map_err(|err| format!("invalid bridge call: {err}"))?;

        match self.bridge.call_tool(&call.tool, call.params).await {
            Ok(value) => Ok(ToolResult::from_value(value)),
            Err(BridgeError::NotConnected) => {
                Ok(ToolResult::failure("bridge not connected"))
            }
            Err(err) => Ok(ToolResult::failure(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeSettings;
    use serde_json::json;
    use std::collections::HashMap;

    fn unstarted_bridge() -> ProcessBridge {
        ProcessBridge::new(BridgeSettings {
            command: "does-not-exist".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            prefix: "vault_".to_string(),
        })
    }

    #[tokio::test]
    async fn disconnected_bridge_yields_failure_result() {
        let tool = BridgeTool::new(unstarted_bridge());
        let result = tool
            .call(json!({"tool": "vault_list", "params": {}}))
            .await
            .expect("handler ok");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("bridge not connected"));
    }

    #[tokio::test]
    async fn malformed_call_is_a_handler_error() {
        let tool = BridgeTool::new(unstarted_bridge());
        let err = tool.call(json!({"params": {}})).await.expect_err("missing tool name");
        assert!(err.to_string().contains("invalid bridge call"));
    }
}
