//! `POST /search`: parse + retrieve only, no LLM involved.

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

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub include_details: bool,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub requests: Vec<RequestView>,
    pub total_count: i64,
    pub parsed: ParsedQuery,
}

pub async fn search(State(state): State<AppState>, Json(request): Json<SearchRequest>) -> Result<Json<SearchResponse>> {
    let metrics = RequestMetrics::start("POST", "/search");

    if request.query.trim().is_empty() {
        let err = AppError::MissingField {
            field: "query".to_string(),
        };
        metrics.finish(err.status_code().as_u16());
        return Err(err);
    }

    let started = Instant::now();
    let outcome = match state.orchestrator.search(&request.query, request.top_k).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics.finish(e.status_code().as_u16());
            return Err(e);
        }
    };

    tracing::info!(
        query = %request.query,
        results = outcome.requests.len(),
        latency_ms = started.elapsed().as_millis() as u64,
        "search completed"
    );

    let requests = crate::handlers::project_fields(
        outcome.requests,
        &outcome.parsed.target_fields,
        request.include_details,
    );

    metrics.finish(200);

    Ok(Json(SearchResponse {
        requests,
        total_count: outcome.total_count,
        parsed: outcome.parsed,
    }))
}
