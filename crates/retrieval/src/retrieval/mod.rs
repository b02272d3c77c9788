//! Hybrid Retriever: composes SQL predicates, substring predicates, and
//! semantic ranking into one query; returns ranked requests plus an
//! accurate total count.
//!
//! Two execution paths:
//! - **Structured-only.** No text entities and no pure-semantic intent —
//!   queries the `requests` table directly, no embedding call, no
//!   similarity threshold. This is what keeps count-accuracy exact for
//!   exact-classifier queries.
//! - **Hybrid/semantic.** Text entities present, or intent is `general` —
//!   joins chunk embeddings, applies a similarity threshold keyed to the
//!   query shape, and boosts/deduplicates by request id.

use crate::query_parser::{DateRangeType, Intent, ParsedQuery, QueryType};
use avoda_common::config::{BoostConfig, QueryConfig};
use avoda_common::db::{DbPool, Repository, RequestView};
use avoda_common::embeddings::Embedder;
use avoda_common::errors::{AppError, Result, SqlKind};
use sea_orm::{DbBackend, FromQueryResult, Statement, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetrievalResult {
    pub requests: Vec<RequestView>,
    pub total_count: i64,
    pub scores: HashMap<String, f32>,
    /// Populated only for `similar` queries: the source request's own
    /// fields, used by the formatter's source-block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<RequestView>,
    /// Set when a similar-by-id query named a request id that does not
    /// exist in the corpus.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub source_not_found: bool,
}

pub struct HybridRetriever {
    db: DbPool,
    repository: Repository,
    embedder: Arc<dyn Embedder>,
    config: QueryConfig,
}

impl HybridRetriever {
    pub fn new(db: DbPool, embedder: Arc<dyn Embedder>, config: QueryConfig) -> Self {
        let repository = Repository::new(db.clone());
        Self {
            db,
            repository,
            embedder,
            config,
        }
    }

    pub async fn retrieve(&self, parsed: &ParsedQuery, top_k: usize) -> Result<RetrievalResult> {
        if parsed.raw_query.trim().is_empty() {
            return Ok(RetrievalResult::default());
        }

        let has_text_entities =
            parsed.entities.person_name.is_some() || parsed.entities.project_name.is_some();
        let pure_semantic = !has_text_entities && parsed.intent == Intent::General;

        let started = std::time::Instant::now();
        let result = if !has_text_entities && !pure_semantic {
            self.retrieve_structured_only(parsed, top_k).await
        } else {
            self.retrieve_hybrid(parsed, top_k).await
        };

        if let Ok(outcome) = &result {
            avoda_common::metrics::record_retrieval(
                parsed.query_type.as_key(),
                started.elapsed().as_secs_f64(),
                outcome.requests.len(),
            );
        }

        result
    }

    async fn retrieve_structured_only(&self, parsed: &ParsedQuery, top_k: usize) -> Result<RetrievalResult> {
        let (conditions, params) = structured_predicates(parsed, self.config.urgency_horizon_days, 1);
        let where_clause = if conditions.is_empty() {
            "TRUE".to_string()
        } else {
            conditions.join(" AND ")
        };

        let count_sql = format!("SELECT COUNT(*) AS count FROM requests r WHERE {where_clause}");
        #[derive(FromQueryResult)]
        struct CountRow {
            count: i64,
        }
        let count_row = CountRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &count_sql,
            params.clone(),
        ))
        .one(self.db.connection())
        .await
        .map_err(|e| AppError::BackendError {
            kind: SqlKind::Count,
            message: e.to_string(),
        })?;
        let total_count = count_row.map(|r| r.count).unwrap_or(0);

        let search_sql = format!(
            "SELECT r.* FROM requests r WHERE {where_clause} ORDER BY r.request_id ASC LIMIT {top_k}"
        );
        let rows = avoda_common::db::models::Request::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &search_sql,
            params,
        ))
        .all(self.db.connection())
        .await
        .map_err(|e| AppError::BackendError {
            kind: SqlKind::Search,
            message: e.to_string(),
        })?;

        let mut scores = HashMap::new();
        let requests: Vec<RequestView> = rows
            .into_iter()
            .map(|r| {
                scores.insert(r.request_id.clone(), 1.0);
                request_to_view(r, 1.0, 1.0)
            })
            .collect();

        Ok(RetrievalResult {
            requests,
            total_count,
            scores,
            source: None,
            source_not_found: false,
        })
    }

    async fn retrieve_hybrid(&self, parsed: &ParsedQuery, top_k: usize) -> Result<RetrievalResult> {
        let (query_vector, source, source_not_found) = self.resolve_query_vector(parsed).await?;
        if source_not_found {
            return Ok(RetrievalResult {
                source_not_found: true,
                ..Default::default()
            });
        }
        let Some(query_vector) = query_vector else {
            return Ok(RetrievalResult::default());
        };

        let has_text_entities =
            parsed.entities.person_name.is_some() || parsed.entities.project_name.is_some();
        let has_structured = parsed.entities.type_id.is_some()
            || parsed.entities.status_id.is_some()
            || parsed.entities.date_range.is_some()
            || parsed.entities.urgency;

        let threshold = if has_text_entities && has_structured {
            self.config.thresholds.mixed
        } else if has_text_entities {
            self.config.thresholds.person_project
        } else {
            self.config.thresholds.general
        };

        let (mut conditions, mut params) = structured_predicates(parsed, self.config.urgency_horizon_days, 1);
        let mut next_param = params.len() + 1;

        let mut entity_values: Vec<String> = Vec::new();
        if let Some(name) = &parsed.entities.person_name {
            conditions.push(substring_condition("e.text_chunk", next_param));
            params.push(escape_like_pattern(name).into());
            next_param += 1;
            entity_values.push(name.clone());
        }
        if let Some(name) = &parsed.entities.project_name {
            conditions.push(substring_condition("e.text_chunk", next_param));
            params.push(escape_like_pattern(name).into());
            next_param += 1;
            entity_values.push(name.clone());
        }

        if let Some(exclude_id) = parsed.entities.request_id.as_ref().filter(|_| parsed.query_type == QueryType::Similar) {
            conditions.push(format!("r.request_id <> ${next_param}"));
            params.push(exclude_id.clone().into());
            next_param += 1;
        }

        conditions.push("e.embedding IS NOT NULL".to_string());

        let where_clause = conditions.join(" AND ");
        let vector_literal = Repository::format_vector_literal(&query_vector);

        let count_sql = format!(
            "WITH qv AS (SELECT '{vector_literal}'::vector AS embedding) \
             SELECT COUNT(DISTINCT r.request_id) AS count \
             FROM requests r JOIN request_embeddings e ON e.request_id = r.request_id \
             CROSS JOIN qv \
             WHERE {where_clause} AND (1 - (e.embedding::vector <=> qv.embedding)) >= {threshold}"
        );
        #[derive(FromQueryResult)]
        struct CountRow {
            count: i64,
        }
        let count_row = CountRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &count_sql,
            params.clone(),
        ))
        .one(self.db.connection())
        .await
        .map_err(|e| AppError::BackendError {
            kind: SqlKind::Count,
            message: e.to_string(),
        })?;
        let total_count = count_row.map(|r| r.count).unwrap_or(0);

        let fetch_limit = top_k * self.config.chunk_fetch_multiplier.max(1);
        let search_sql = format!(
            "WITH qv AS (SELECT '{vector_literal}'::vector AS embedding) \
             SELECT r.request_id AS request_id, e.text_chunk AS text_chunk, \
                    (1 - (e.embedding::vector <=> qv.embedding)) AS similarity \
             FROM requests r JOIN request_embeddings e ON e.request_id = r.request_id \
             CROSS JOIN qv \
             WHERE {where_clause} AND (1 - (e.embedding::vector <=> qv.embedding)) >= {threshold} \
             ORDER BY similarity DESC LIMIT {fetch_limit}"
        );

        #[derive(Debug, FromQueryResult)]
        struct ChunkRow {
            request_id: String,
            text_chunk: String,
            similarity: f32,
        }

        let rows = ChunkRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &search_sql,
            params,
        ))
        .all(self.db.connection())
        .await
        .map_err(|e| AppError::BackendError {
            kind: SqlKind::Search,
            message: e.to_string(),
        })?;

        // Deduplicate by request id, keeping the maximum sim*boost rank,
        // then rank and truncate.
        let mut best: HashMap<String, f32> = HashMap::new();
        for row in rows {
            let boost = compute_boost(&row.text_chunk, &parsed.target_fields, &entity_values, &self.config.boosts);
            let rank = row.similarity * boost;
            best.entry(row.request_id)
                .and_modify(|existing| *existing = existing.max(rank))
                .or_insert(rank);
        }

        let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        let ordered_ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut rank_by_id: HashMap<String, f32> = ranked.into_iter().collect();

        let fetched = if ordered_ids.is_empty() {
            Vec::new()
        } else {
            use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
            avoda_common::db::models::RequestEntity::find()
                .filter(avoda_common::db::models::RequestColumn::RequestId.is_in(ordered_ids.clone()))
                .all(self.db.connection())
                .await
                .map_err(|e| AppError::BackendError {
                    kind: SqlKind::Search,
                    message: e.to_string(),
                })?
        };
        let mut by_id: HashMap<String, avoda_common::db::models::Request> =
            fetched.into_iter().map(|r| (r.request_id.clone(), r)).collect();

        let mut scores = HashMap::new();
        let mut requests = Vec::with_capacity(ordered_ids.len());
        for id in &ordered_ids {
            let rank = rank_by_id.remove(id).unwrap_or(0.0);
            if let Some(request) = by_id.remove(id) {
                scores.insert(id.clone(), rank);
                requests.push(request_to_view(request, rank, 1.0));
            }
        }

        Ok(RetrievalResult {
            requests,
            total_count,
            scores,
            source,
            source_not_found: false,
        })
    }

    /// Resolve the query vector: either the similar-by-id source chunk's
    /// embedding, or a fresh embedding of the user's query text.
    async fn resolve_query_vector(
        &self,
        parsed: &ParsedQuery,
    ) -> Result<(Option<Vec<f32>>, Option<RequestView>, bool)> {
        if parsed.query_type == QueryType::Similar {
            if let Some(request_id) = &parsed.entities.request_id {
                if !self.repository.request_exists(request_id).await? {
                    return Ok((None, None, true));
                }
                let embedding = self.repository.fetch_one_chunk_embedding(request_id).await?;
                let source = self.lookup_request_view(request_id).await?;
                return Ok((embedding, source, false));
            }
        }

        let embedding = self.embedder.embed(&parsed.raw_query).await?;
        Ok((Some(embedding), None, false))
    }

    async fn lookup_request_view(&self, request_id: &str) -> Result<Option<RequestView>> {
        use sea_orm::EntityTrait;
        let found = avoda_common::db::models::RequestEntity::find_by_id(request_id.to_string())
            .one(self.db.connection())
            .await
            .map_err(|e| AppError::BackendError {
                kind: SqlKind::Lookup,
                message: e.to_string(),
            })?;
        Ok(found.map(|r| request_to_view(r, 1.0, 1.0)))
    }
}

fn request_to_view(r: avoda_common::db::models::Request, similarity: f32, boost: f32) -> RequestView {
    let fields = serde_json::to_value(&r)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .map(|obj| obj.into_iter().collect::<HashMap<_, _>>())
        .unwrap_or_default();
    RequestView {
        request_id: r.request_id,
        fields,
        similarity,
        boost,
    }
}

/// Structured predicates over `requests` columns: `type_id`, `status_id`,
/// `date_range` against `status_date` cast to date, and `urgency`
/// (status-date within the configured horizon, inclusive both ends). All
/// present filters combine with AND; `urgency=false` adds nothing.
fn structured_predicates(parsed: &ParsedQuery, horizon_days: i64, start_param: usize) -> (Vec<String>, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    let mut next = start_param;

    if let Some(type_id) = parsed.entities.type_id {
        conditions.push(format!("r.type_id = ${next}"));
        params.push(type_id.into());
        next += 1;
    }
    if let Some(status_id) = parsed.entities.status_id {
        conditions.push(format!("r.status_id = ${next}"));
        params.push(status_id.into());
        next += 1;
    }

    if let Some(range) = &parsed.entities.date_range {
        match range.range_type {
            DateRangeType::LastNDays | DateRangeType::LastWeek | DateRangeType::LastMonth => {
                if let Some(days) = range.days {
                    conditions.push(format!(
                        "r.status_date::date BETWEEN (CURRENT_DATE - ${next}::int) AND CURRENT_DATE"
                    ));
                    params.push((days as i32).into());
                    next += 1;
                }
            }
            DateRangeType::Range => {
                if let (Some(start), Some(end)) = (&range.start, &range.end) {
                    conditions.push(format!("r.status_date::date BETWEEN ${next} AND ${}", next + 1));
                    params.push(start.clone().into());
                    params.push(end.clone().into());
                    next += 2;
                }
            }
            DateRangeType::Single => {
                if let Some(start) = &range.start {
                    conditions.push(format!("r.status_date::date >= ${next}"));
                    params.push(start.clone().into());
                    next += 1;
                }
                if let Some(end) = &range.end {
                    conditions.push(format!("r.status_date::date <= ${next}"));
                    params.push(end.clone().into());
                    next += 1;
                }
            }
        }
    }

    if parsed.entities.urgency {
        conditions.push(format!(
            "r.status_date::date BETWEEN CURRENT_DATE AND (CURRENT_DATE + ${next}::int)"
        ));
        params.push((horizon_days as i32).into());
    }

    (conditions, params)
}

/// `ILIKE $n ESCAPE '\'` against a text column, paired with a pre-escaped
/// pattern value — keeps the escaping in code rather than relying on the
/// driver, per the "substring predicates escape `%`/`_`" requirement.
fn substring_condition(column: &str, param: usize) -> String {
    format!("{column} ILIKE ${param} ESCAPE '\\'")
}

fn escape_like_pattern(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

/// Boost multiplier for one chunk's text: 2.0 if it contains `"<label>:
/// <entity>"` for any of `target_fields` paired with any entity value,
/// 1.5 if it contains the entity value anywhere, 1.0 otherwise. Multiple
/// matches take the maximum, never the product.
fn compute_boost(chunk_text: &str, target_fields: &[String], entity_values: &[String], boosts: &BoostConfig) -> f32 {
    let mut boost = boosts.base;
    for value in entity_values {
        for field in target_fields {
            let label_pattern = format!("{field}: {value}");
            if chunk_text.contains(&label_pattern) {
                boost = boost.max(boosts.exact_in_target_field);
            }
        }
        if chunk_text.contains(value.as_str()) {
            boost = boost.max(boosts.entity_in_chunk);
        }
    }
    boost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_parser::{Entities, ParsedQuery};

    fn boosts() -> BoostConfig {
        BoostConfig {
            exact_in_target_field: 2.0,
            entity_in_chunk: 1.5,
            base: 1.0,
        }
    }

    #[test]
    fn test_escape_like_pattern_escapes_wildcards() {
        assert_eq!(escape_like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_compute_boost_exact_field_match() {
        let chunk = "Updated By: Alice | Status: Open";
        let boost = compute_boost(chunk, &["Updated By".to_string()], &["Alice".to_string()], &boosts());
        assert_eq!(boost, 2.0);
    }

    #[test]
    fn test_compute_boost_entity_anywhere() {
        let chunk = "Remarks: mentions Alice in passing";
        let boost = compute_boost(chunk, &["Updated By".to_string()], &["Alice".to_string()], &boosts());
        assert_eq!(boost, 1.5);
    }

    #[test]
    fn test_compute_boost_base_when_no_match() {
        let chunk = "Remarks: nothing relevant here";
        let boost = compute_boost(chunk, &["Updated By".to_string()], &["Alice".to_string()], &boosts());
        assert_eq!(boost, 1.0);
    }

    #[test]
    fn test_structured_predicates_combine_with_and() {
        let parsed = ParsedQuery {
            raw_query: "requests of type 4".to_string(),
            intent: Intent::Type,
            query_type: QueryType::Find,
            entities: Entities {
                type_id: Some(4),
                urgency: true,
                ..Default::default()
            },
            target_fields: vec![],
        };
        let (conditions, params) = structured_predicates(&parsed, 7, 1);
        assert_eq!(conditions.len(), 2);
        assert_eq!(params.len(), 2);
    }
}
