use crate::domain::types::TokenUsage;
use crate::infrastructure::bridge::BridgeToolInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

fn default_conversation_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub tokens: TokenUsage,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClearRequest {
    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearResponse {
    pub success: bool,
    pub conversation_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub model: String,
    pub authenticated: bool,
    pub bridge_ready: bool,
    pub skill_count: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BridgeCallRequest {
    pub tool: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BridgeToolsResponse {
    pub ready: bool,
    pub tools: Vec<BridgeToolInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
