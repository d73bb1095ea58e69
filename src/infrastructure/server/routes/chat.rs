use super::super::dto::{ChatRequest, ChatResponse, ClearRequest, ClearResponse, ErrorResponse};
use super::super::state::ServerState;
use crate::application::orchestrator::EngineError;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{error, info};

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Turn completed", body = ChatResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Provider credential missing", body = ErrorResponse),
        (status = 502, description = "Completion provider unreachable", body = ErrorResponse)
    )
)]
pub async fn chat_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ChatRequest {
        message,
        conversation_id,
    } = payload;

    info!(conversation = conversation_id.as_str(), "Received /chat request");

    if message.trim().is_empty() {
        error!("Rejecting /chat request due to empty message");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "message cannot be empty".to_string(),
            }),
        ));
    }

    let system_prompt = state.prompt.current();
    match state
        .engine
        .run(&message, &conversation_id, &system_prompt, state.max_rounds)
        .await
    {
        Ok(outcome) => {
            info!(
                conversation = conversation_id.as_str(),
                tokens = outcome.tokens.total(),
                "Chat turn completed"
            );
            Ok(Json(ChatResponse {
                success: true,
                response: outcome.response,
                reasoning: outcome.reasoning,
                tokens: outcome.tokens,
            }))
        }
        Err(err) => {
            error!(%err, "Chat turn failed");
            let status = match err {
                EngineError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
            };
            Err((
                status,
                Json(ErrorResponse {
                    error: err.user_message(),
                }),
            ))
        }
    }
}

#[utoipa::path(
    post,
    path = "/chat/clear",
    tag = "chat",
    request_body = ClearRequest,
    responses(
        (status = 200, description = "Conversation history cleared", body = ClearResponse)
    )
)]
pub async fn clear_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ClearRequest>,
) -> Json<ClearResponse> {
    info!(
        conversation = payload.conversation_id.as_str(),
        "Clearing conversation history"
    );
    state.store.clear(&payload.conversation_id).await;
    Json(ClearResponse {
        success: true,
        conversation_id: payload.conversation_id,
    })
}
