use super::dto::{
    BridgeCallRequest, BridgeToolsResponse, ChatRequest, ChatResponse, ClearRequest,
    ClearResponse, ErrorResponse, HealthResponse,
};
use super::routes;
use crate::domain::types::{TokenUsage, ToolResult};
use crate::infrastructure::bridge::BridgeToolInfo;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::chat::chat_handler,
        routes::chat::clear_handler,
        routes::health::health_handler,
        routes::bridge::bridge_call_handler,
        routes::bridge::bridge_tools_handler
    ),
    components(
        schemas(
            ChatRequest,
            ChatResponse,
            ClearRequest,
            ClearResponse,
            HealthResponse,
            BridgeCallRequest,
            BridgeToolsResponse,
            BridgeToolInfo,
            ErrorResponse,
            TokenUsage,
            ToolResult
        )
    ),
    tags(
        (name = "chat", description = "Conversational turns against the agent"),
        (name = "health", description = "Service liveness and readiness"),
        (name = "bridge", description = "Direct access to the JSON-RPC tool bridge")
    )
)]
pub(super) struct ApiDoc;
