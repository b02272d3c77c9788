//! `POST /rag`: full parse -> retrieve -> format -> prompt -> generate
//! pipeline, degrading gracefully to retrieval-only output on LLM failure
//! or timeout.

use crate::AppState;
use avoda_common::db::RequestView;
use avoda_common::errors::{AppError, Result};
use avoda_common::metrics::RequestMetrics;
use avoda_retrieval::ParsedQuery;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

fn default_top_k() -> usize {
    20
}

fn default_use_llm() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RagRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_use_llm")]
    pub use_llm: bool,
    #[serde(default)]
    pub include_details: bool,
}

#[derive(Serialize)]
pub struct RagResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub requests: Vec<RequestView>,
    pub total_count: i64,
    pub parsed: ParsedQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_ms: Option<u64>,
}

pub async fn rag(State(state): State<AppState>, Json(request): Json<RagRequest>) -> Result<Json<RagResponse>> {
    let metrics = RequestMetrics::start("POST", "/rag");

    if request.query.trim().is_empty() {
        let err = AppError::MissingField {
            field: "query".to_string(),
        };
        metrics.finish(err.status_code().as_u16());
        return Err(err);
    }

    let started = Instant::now();
    let outcome = match state.orchestrator.answer(&request.query, request.top_k, request.use_llm).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics.finish(e.status_code().as_u16());
            return Err(e);
        }
    };

    tracing::info!(
        query = %request.query,
        results = outcome.requests.len(),
        degraded = outcome.degraded,
        latency_ms = started.elapsed().as_millis() as u64,
        "rag completed"
    );

    let requests = crate::handlers::project_fields(
        outcome.requests,
        &outcome.parsed.target_fields,
        request.include_details,
    );

    metrics.finish(200);

    Ok(Json(RagResponse {
        answer: outcome.answer,
        requests,
        total_count: outcome.total_count,
        parsed: outcome.parsed,
        device: outcome.device,
        generation_ms: outcome.generation_ms,
    }))
}
