use super::super::dto::HealthResponse;
use super::super::state::ServerState;
use axum::Json;
use axum::extract::State;
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.provider.clone(),
        model: state.model.clone(),
        authenticated: state.engine.is_authenticated(),
        bridge_ready: state
            .bridge
            .as_ref()
            .is_some_and(|bridge| bridge.is_ready()),
        skill_count: state.prompt.library().count().await,
    })
}
