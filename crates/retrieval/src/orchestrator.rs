//! RAG Orchestrator: parse -> retrieve -> (short-circuit | format -> prompt
//! -> generate), strictly sequential within a single request.

use crate::formatter::{format_context, format_project_counts};
use crate::prompt::build_prompt;
use crate::query_parser::{parse_query, ParsedQuery, QueryType};
use crate::retrieval::{HybridRetriever, RetrievalResult};
use avoda_common::config::QueryConfig;
use avoda_common::db::DbPool;
use avoda_common::embeddings::Embedder;
use avoda_common::errors::{AppError, Result};
use avoda_common::llm::LlmGateway;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const NOT_FOUND_MESSAGE: &str = "The source request for this similarity search was not found.";
const DEGRADED_MESSAGE: &str = "An answer could not be produced in time; returning the retrieved set.";

#[derive(Debug, Clone, Serialize)]
pub struct RagOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub requests: Vec<avoda_common::db::RequestView>,
    pub total_count: i64,
    pub parsed: ParsedQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_ms: Option<u64>,
    /// Set when generation was skipped or degraded but the retrieval set
    /// is still being returned (timeout, LLM unavailable, overload).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

pub struct Orchestrator {
    retriever: HybridRetriever,
    llm: Arc<LlmGateway>,
    config: QueryConfig,
    total_timeout: Duration,
    generate_timeout: Duration,
}

impl Orchestrator {
    pub fn new(db: DbPool, embedder: Arc<dyn Embedder>, llm: Arc<LlmGateway>, config: QueryConfig, total_timeout: Duration, generate_timeout: Duration) -> Self {
        let retriever = HybridRetriever::new(db, embedder, config.clone());
        Self {
            retriever,
            llm,
            config,
            total_timeout,
            generate_timeout,
        }
    }

    /// `/search`: parse + retrieve only, no LLM involved. The only way this
    /// path can time out is inside the SQL retrieval itself, so a deadline
    /// miss here surfaces as `DbTimeout` (504) rather than the LLM-path
    /// `Timeout` that degrades to a 200.
    pub async fn search(&self, raw_query: &str, top_k: usize) -> Result<RagOutcome> {
        let started = Instant::now();
        let parsed = parse_query(raw_query, &self.config);

        let result = match tokio::time::timeout(self.total_timeout, self.retriever.retrieve(&parsed, top_k)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::DbTimeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        Ok(retrieval_only_outcome(parsed, result))
    }

    /// `/rag`: full pipeline with the short-circuits from the top-level
    /// behaviour table, each returning before the LLM is touched.
    pub async fn answer(&self, raw_query: &str, top_k: usize, use_llm: bool) -> Result<RagOutcome> {
        let started = Instant::now();
        let deadline = self.total_timeout;

        let outcome = tokio::time::timeout(deadline, self.answer_inner(raw_query, top_k, use_llm)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                // The total deadline fired; we don't have a retrieval
                // result to attach because retrieve() itself is what
                // timed out. Surface the graceful degrade with no set.
                let parsed = parse_query(raw_query, &self.config);
                tracing::warn!(elapsed_ms = started.elapsed().as_millis() as u64, "total deadline exceeded");
                Ok(RagOutcome {
                    answer: Some(DEGRADED_MESSAGE.to_string()),
                    requests: vec![],
                    total_count: 0,
                    parsed,
                    device: None,
                    generation_ms: None,
                    degraded: true,
                })
            }
        }
    }

    async fn answer_inner(&self, raw_query: &str, top_k: usize, use_llm: bool) -> Result<RagOutcome> {
        let parsed = parse_query(raw_query, &self.config);
        let result = self.retriever.retrieve(&parsed, top_k).await?;

        if !use_llm {
            return Ok(retrieval_only_outcome(parsed, result));
        }

        if parsed.query_type == QueryType::Count && parsed.entities.projects_query {
            let answer = format_project_counts(&result.requests);
            return Ok(RagOutcome {
                answer: Some(answer),
                requests: result.requests,
                total_count: result.total_count,
                parsed,
                device: None,
                generation_ms: None,
                degraded: false,
            });
        }

        if parsed.query_type == QueryType::Similar && result.source_not_found {
            return Ok(RagOutcome {
                answer: Some(NOT_FOUND_MESSAGE.to_string()),
                requests: result.requests,
                total_count: result.total_count,
                parsed,
                device: None,
                generation_ms: None,
                degraded: false,
            });
        }

        let context = format_context(&result, &parsed, &self.config, self.config.urgency_horizon_days);
        let (system, user) = build_prompt(&parsed, &context);
        let combined_prompt = format!("{system}\n\n{user}");

        match tokio::time::timeout(self.generate_timeout, self.llm.generate(&combined_prompt)).await {
            Ok(Ok(generation)) => Ok(RagOutcome {
                answer: Some(generation.text),
                requests: result.requests,
                total_count: result.total_count,
                parsed,
                device: Some(device_label(generation.device)),
                generation_ms: Some(generation.duration.as_millis() as u64),
                degraded: false,
            }),
            Ok(Err(AppError::LlmUnavailable { .. })) | Ok(Err(AppError::Overloaded)) => Ok(RagOutcome {
                answer: None,
                requests: result.requests,
                total_count: result.total_count,
                parsed,
                device: None,
                generation_ms: None,
                degraded: true,
            }),
            Ok(Err(other)) => Err(other),
            Err(_) => Ok(RagOutcome {
                answer: Some(DEGRADED_MESSAGE.to_string()),
                requests: result.requests,
                total_count: result.total_count,
                parsed,
                device: None,
                generation_ms: None,
                degraded: true,
            }),
        }
    }
}

fn retrieval_only_outcome(parsed: ParsedQuery, result: RetrievalResult) -> RagOutcome {
    RagOutcome {
        answer: None,
        requests: result.requests,
        total_count: result.total_count,
        parsed,
        device: None,
        generation_ms: None,
        degraded: false,
    }
}

fn device_label(device: avoda_common::llm::LlmDevice) -> &'static str {
    match device {
        avoda_common::llm::LlmDevice::Cpu => "cpu",
        avoda_common::llm::LlmDevice::Gpu => "gpu",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_parser::{Entities, Intent};

    #[test]
    fn test_device_label_matches_lowercase_wire_form() {
        assert_eq!(device_label(avoda_common::llm::LlmDevice::Cpu), "cpu");
        assert_eq!(device_label(avoda_common::llm::LlmDevice::Gpu), "gpu");
    }

    #[test]
    fn test_retrieval_only_outcome_has_no_answer_or_device() {
        let parsed = ParsedQuery {
            raw_query: "q".to_string(),
            intent: Intent::General,
            query_type: QueryType::Find,
            entities: Entities::default(),
            target_fields: vec![],
        };
        let outcome = retrieval_only_outcome(parsed, RetrievalResult::default());
        assert!(outcome.answer.is_none());
        assert!(outcome.device.is_none());
        assert!(!outcome.degraded);
    }
}
