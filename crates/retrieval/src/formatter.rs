//! Context Formatter: assembles a `RetrievalResult` into prompt-ready
//! textual context for the LLM, adapting layout to query type. Labels are
//! configurable strings (Hebrew at runtime); structure is language-neutral.

use crate::query_parser::{ParsedQuery, QueryType};
use crate::retrieval::RetrievalResult;
use avoda_common::config::QueryConfig;
use avoda_common::db::RequestView;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Fallback labels used when the caller's `field_label_map` doesn't carry an
/// entry for a particular display field; these never touch `text_chunk`
/// matching, only the rendered context.
const FALLBACK_LABELS: &[(&str, &str)] = &[
    ("project", "Project"),
    ("updated_by", "Updated By"),
    ("type", "Type"),
    ("status", "Status"),
];

pub fn format_context(result: &RetrievalResult, parsed: &ParsedQuery, config: &QueryConfig, urgency_horizon_days: i64) -> String {
    match parsed.query_type {
        QueryType::Urgent => format_urgent(result, config, urgency_horizon_days),
        QueryType::Similar => format_similar(result, config),
        QueryType::Summarize => format_summarize(result, config),
        QueryType::Count | QueryType::Find | QueryType::AnswerRetrieval => format_enumerated(result, config),
    }
}

/// Display label for a field key (`"project"`, `"updated_by"`, `"type"`,
/// `"status"`), preferring the deployment's own `field_label_map`:
/// `field_label_map` stores Hebrew keyword -> display label, so this looks
/// up the entry whose display label matches `key` and surfaces its
/// keyword, falling back to the built-in English label when the
/// deployment's map doesn't cover this field.
fn label(key: &str, config: &QueryConfig) -> String {
    config
        .field_label_map
        .iter()
        .find(|(_, display)| normalize_field_key(display) == key)
        .map(|(keyword, _)| keyword.clone())
        .unwrap_or_else(|| fallback_label(key).to_string())
}

fn normalize_field_key(display_label: &str) -> String {
    display_label.to_lowercase().replace(' ', "_")
}

fn fallback_label(key: &str) -> &str {
    FALLBACK_LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or(key)
}

fn field_str(view: &RequestView, key: &str) -> Option<String> {
    view.fields.get(key).and_then(|v| match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// One enumerated line per request, trimming null fields: `"N. Request
/// <id> | Project: … | Updated By: … | Type: … | Status: …"`.
fn enumerate_line(index: usize, view: &RequestView, config: &QueryConfig) -> String {
    let mut parts = vec![format!("Request {}", view.request_id)];
    for key in ["project_name", "updated_by", "type_id", "status_id"] {
        if let Some(value) = field_str(view, key) {
            let display_key = key.trim_end_matches("_id").trim_end_matches("_name");
            parts.push(format!("{}: {value}", label(display_key, config)));
        }
    }
    format!("{}. {}", index + 1, parts.join(" | "))
}

fn format_enumerated(result: &RetrievalResult, config: &QueryConfig) -> String {
    if result.requests.is_empty() {
        return "No matching requests were found.".to_string();
    }
    result
        .requests
        .iter()
        .enumerate()
        .map(|(i, v)| enumerate_line(i, v, config))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_urgent(result: &RetrievalResult, config: &QueryConfig, urgency_horizon_days: i64) -> String {
    if result.requests.is_empty() {
        return "No urgent requests were found.".to_string();
    }
    result
        .requests
        .iter()
        .enumerate()
        .map(|(i, view)| {
            let days = days_until_deadline(view, urgency_horizon_days);
            format!("{} | Deadline: {days} days", enumerate_line(i, view, config))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn days_until_deadline(view: &RequestView, horizon: i64) -> i64 {
    field_str(view, "status_date")
        .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
        .map(|status_date| (status_date - chrono::Utc::now().date_naive()).num_days())
        .unwrap_or(horizon)
}

/// Source block plus candidates, each annotated with similarity percent
/// and check-mark bullets for fields matching the source.
fn format_similar(result: &RetrievalResult, config: &QueryConfig) -> String {
    let Some(source) = &result.source else {
        return format_enumerated(result, config);
    };

    let mut out = vec![format!(
        "Source request {} | {}: {} | {}: {} | {}: {}",
        source.request_id,
        label("project", config),
        field_str(source, "project_name").unwrap_or_default(),
        label("type", config),
        field_str(source, "type_id").unwrap_or_default(),
        label("status", config),
        field_str(source, "status_id").unwrap_or_default(),
    )];

    for (i, view) in result.requests.iter().enumerate() {
        let mut line = format!(
            "{}. Request {} (similarity: {:.0}%)",
            i + 1,
            view.request_id,
            view.similarity * 100.0
        );
        let checks = matching_fields(source, view);
        if !checks.is_empty() {
            line.push_str(&format!(" | matches: {}", checks.join(", ")));
        }
        out.push(line);
    }
    out.join("\n")
}

fn matching_fields(source: &RequestView, candidate: &RequestView) -> Vec<&'static str> {
    let mut checks = Vec::new();
    if field_str(source, "project_name") == field_str(candidate, "project_name") && field_str(source, "project_name").is_some() {
        checks.push("same project");
    }
    if field_str(source, "type_id") == field_str(candidate, "type_id") && field_str(source, "type_id").is_some() {
        checks.push("same type");
    }
    if field_str(source, "status_id") == field_str(candidate, "status_id") && field_str(source, "status_id").is_some() {
        checks.push("same status");
    }
    if field_str(source, "updated_by") == field_str(candidate, "updated_by") && field_str(source, "updated_by").is_some() {
        checks.push("same updater");
    }
    if within_30_days(field_str(source, "status_date"), field_str(candidate, "status_date")) {
        checks.push("status date within 30 days");
    }
    checks
}

fn within_30_days(a: Option<String>, b: Option<String>) -> bool {
    let parse = |s: String| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok();
    match (a.and_then(parse), b.and_then(parse)) {
        (Some(a), Some(b)) => (a - b).num_days().abs() <= 30,
        _ => false,
    }
}

/// Per-project, per-status, per-type tallies plus a bounded enumerated
/// sample.
fn format_summarize(result: &RetrievalResult, config: &QueryConfig) -> String {
    let mut by_project: HashMap<String, usize> = HashMap::new();
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut by_type: HashMap<String, usize> = HashMap::new();

    for view in &result.requests {
        if let Some(v) = field_str(view, "project_name") {
            *by_project.entry(v).or_default() += 1;
        }
        if let Some(v) = field_str(view, "status_id") {
            *by_status.entry(v).or_default() += 1;
        }
        if let Some(v) = field_str(view, "type_id") {
            *by_type.entry(v).or_default() += 1;
        }
    }

    let mut out = vec![format!("Total matching requests: {}", result.total_count)];
    out.push(format!("By {}: {}", label("project", config), tally_line(&by_project)));
    out.push(format!("By {}: {}", label("status", config), tally_line(&by_status)));
    out.push(format!("By {}: {}", label("type", config), tally_line(&by_type)));

    const SAMPLE_SIZE: usize = 10;
    out.push("Sample:".to_string());
    for (i, view) in result.requests.iter().take(SAMPLE_SIZE).enumerate() {
        out.push(enumerate_line(i, view, config));
    }
    out.join("\n")
}

fn tally_line(counts: &HashMap<String, usize>) -> String {
    let mut pairs: Vec<(&String, &usize)> = counts.iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Deterministic "how many projects" text block — the orchestrator's
/// short-circuit for `count` + `projects_query` never reaches this
/// formatter, building its own answer directly from grouped counts.
pub fn format_project_counts(requests: &[RequestView]) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for view in requests {
        if let Some(project) = field_str(view, "project_name") {
            *counts.entry(project).or_default() += 1;
        }
    }
    let mut pairs: Vec<(&String, &usize)> = counts.iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = vec![format!("{} distinct projects found.", pairs.len())];
    for (project, count) in pairs {
        out.push(format!("{project}: {count}"));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: &str, fields: &[(&str, &str)]) -> RequestView {
        RequestView {
            request_id: id.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect(),
            similarity: 0.9,
            boost: 1.0,
        }
    }

    #[test]
    fn test_format_enumerated_trims_missing_fields() {
        let result = RetrievalResult {
            requests: vec![view("1", &[("project_name", "Apollo")])],
            total_count: 1,
            ..Default::default()
        };
        let text = format_enumerated(&result, &sample_config());
        assert!(text.contains("Request 1"));
        assert!(text.contains("Project: Apollo"));
        assert!(!text.contains("Status:"));
    }

    #[test]
    fn test_label_prefers_field_label_map_over_fallback() {
        let mut config = sample_config();
        config.field_label_map.insert("פרויקט".to_string(), "Project".to_string());
        assert_eq!(label("project", &config), "פרויקט");
    }

    #[test]
    fn test_label_falls_back_when_map_has_no_entry() {
        assert_eq!(label("project", &sample_config()), "Project");
    }

    #[test]
    fn test_format_project_counts_sorted_desc() {
        let requests = vec![
            view("1", &[("project_name", "Apollo")]),
            view("2", &[("project_name", "Apollo")]),
            view("3", &[("project_name", "Zeus")]),
        ];
        let text = format_project_counts(&requests);
        assert!(text.contains("2 distinct projects"));
        assert!(text.find("Apollo: 2").unwrap() < text.find("Zeus: 1").unwrap());
    }

    fn sample_config() -> QueryConfig {
        QueryConfig {
            intent_triggers: HashMap::new(),
            urgency_triggers: vec![],
            projects_entity_triggers: vec![],
            answer_retrieval_triggers: vec![],
            query_type_triggers: HashMap::new(),
            field_label_map: HashMap::new(),
            stop_words_for_name_extraction: vec![],
            target_fields_by_intent: HashMap::new(),
            thresholds: avoda_common::config::ThresholdConfig {
                person_project: 0.5,
                general: 0.4,
                mixed: 0.2,
            },
            urgency_horizon_days: 7,
            chunk_fetch_multiplier: 3,
            boosts: avoda_common::config::BoostConfig {
                exact_in_target_field: 2.0,
                entity_in_chunk: 1.5,
                base: 1.0,
            },
        }
    }
}
