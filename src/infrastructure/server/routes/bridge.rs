use super::super::dto::{BridgeCallRequest, BridgeToolsResponse, ErrorResponse};
use super::super::state::ServerState;
use crate::infrastructure::bridge::BridgeError;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

#[utoipa::path(
    post,
    path = "/bridge",
    tag = "bridge",
    request_body = BridgeCallRequest,
    responses(
        (status = 200, description = "Tool invocation result", body = Object),
        (status = 502, description = "Bridge call failed", body = ErrorResponse),
        (status = 503, description = "Bridge not connected", body = ErrorResponse)
    )
)]
pub async fn bridge_call_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<BridgeCallRequest>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let Some(bridge) = state.bridge.as_ref() else {
        return Err(not_connected());
    };

    info!(tool = payload.tool.as_str(), "Received /bridge request");
    match bridge.call_tool(&payload.tool, payload.params).await {
        Ok(value) => Ok(Json(value)),
        Err(BridgeError::NotConnected) => Err(not_connected()),
        Err(err) => {
            error!(%err, tool = payload.tool.as_str(), "Bridge call failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            ))
        }
    }
}

#[utoipa::path(
    get,
    path = "/bridge/tools",
    tag = "bridge",
    responses(
        (status = 200, description = "Bridge tool catalogue", body = BridgeToolsResponse)
    )
)]
pub async fn bridge_tools_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<BridgeToolsResponse> {
    match state.bridge.as_ref() {
        Some(bridge) => Json(BridgeToolsResponse {
            ready: bridge.is_ready(),
            tools: bridge.list_tools().await,
        }),
        None => Json(BridgeToolsResponse {
            ready: false,
            tools: Vec::new(),
        }),
    }
}

fn not_connected() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "bridge not connected".to_string(),
        }),
    )
}
