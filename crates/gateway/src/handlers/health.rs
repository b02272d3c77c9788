//! Health check handler

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db: &'static str,
    pub embedder: &'static str,
    pub llm: &'static str,
}

/// Never blocks on the LLM: `LlmGateway::status` uses `try_lock` and
/// reports its best approximation if generation is in flight.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = if state.db.ping().await.is_ok() { "up" } else { "down" };
    let llm = state.llm.status();
    let status = if db == "up" && llm != "unavailable" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        db,
        embedder: "up",
        llm,
    })
}
