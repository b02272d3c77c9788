//! Prompt Builder: turns a parsed query plus formatted retrieval context
//! into the system+user prompt handed to the LLM gateway.

use crate::query_parser::{Intent, ParsedQuery, QueryType};

const SYSTEM_PROMPT: &str = "You are an assistant answering questions about a corpus of work requests, in the language the user asked in.";

fn instruction_for(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Count => "State the number first, then break down the result.",
        QueryType::Urgent => "List the requests ordered by days until deadline.",
        QueryType::Similar => "Explain what the candidates share with the source request.",
        QueryType::Summarize => "Include per-project, per-status, and per-type tallies.",
        QueryType::Find => "Summarise the matching set briefly.",
        QueryType::AnswerRetrieval => "Quote the answer from the source request if present.",
    }
}

/// Prose description of the filters the retriever applied, so the model
/// never needs to guess at scope.
fn entity_context_block(parsed: &ParsedQuery) -> String {
    let mut clauses = Vec::new();
    let entities = &parsed.entities;

    if let Some(name) = &entities.person_name {
        clauses.push(format!("restricted to person \"{name}\""));
    }
    if let Some(name) = &entities.project_name {
        clauses.push(format!("restricted to project \"{name}\""));
    }
    if let Some(type_id) = entities.type_id {
        clauses.push(format!("restricted to type {type_id}"));
    }
    if let Some(status_id) = entities.status_id {
        clauses.push(format!("restricted to status {status_id}"));
    }
    if let Some(range) = &entities.date_range {
        clauses.push(describe_date_range(range));
    }
    if entities.urgency {
        clauses.push("restricted to requests nearing their deadline".to_string());
    }
    if let Some(id) = &entities.request_id {
        clauses.push(format!("anchored on source request {id}"));
    }
    if matches!(parsed.intent, Intent::General) && clauses.is_empty() {
        clauses.push("no structured filters applied; matched by meaning alone".to_string());
    }

    if clauses.is_empty() {
        "No filters were applied.".to_string()
    } else {
        format!("Filters applied: {}.", clauses.join("; "))
    }
}

fn describe_date_range(range: &crate::query_parser::DateRange) -> String {
    use crate::query_parser::DateRangeType;
    match range.range_type {
        DateRangeType::LastNDays => format!("restricted to the last {} days", range.days.unwrap_or(0)),
        DateRangeType::LastWeek => "restricted to the last week".to_string(),
        DateRangeType::LastMonth => "restricted to the last month".to_string(),
        DateRangeType::Range => format!(
            "restricted to the window {} to {}",
            range.start.clone().unwrap_or_default(),
            range.end.clone().unwrap_or_default()
        ),
        DateRangeType::Single => format!("restricted to {}", range.start.clone().unwrap_or_default()),
    }
}

/// Builds the user-segment body.
pub fn build_user_segment(parsed: &ParsedQuery, formatted_context: &str) -> String {
    format!(
        "<instruction>{instruction}\n\n{entity_context}</instruction>\n\nContext:\n{context}\n\nQuestion: {query}",
        instruction = instruction_for(parsed.query_type),
        entity_context = entity_context_block(parsed),
        context = formatted_context,
        query = parsed.raw_query,
    )
}

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Full two-segment prompt; the orchestrator concatenates the pair into
/// the single string the LLM gateway's `generate` call accepts.
pub fn build_prompt(parsed: &ParsedQuery, formatted_context: &str) -> (String, String) {
    (system_prompt().to_string(), build_user_segment(parsed, formatted_context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_parser::Entities;

    fn parsed(query_type: QueryType, intent: Intent, entities: Entities) -> ParsedQuery {
        ParsedQuery {
            raw_query: "how many requests".to_string(),
            intent,
            query_type,
            entities,
            target_fields: vec![],
        }
    }

    #[test]
    fn test_count_instruction_mentions_number_first() {
        let p = parsed(QueryType::Count, Intent::General, Entities::default());
        let user = build_user_segment(&p, "ctx");
        assert!(user.contains("State the number first"));
    }

    #[test]
    fn test_entity_context_lists_person_filter() {
        let mut entities = Entities::default();
        entities.person_name = Some("Dana".to_string());
        let p = parsed(QueryType::Find, Intent::Person, entities);
        let user = build_user_segment(&p, "ctx");
        assert!(user.contains("restricted to person \"Dana\""));
    }

    #[test]
    fn test_no_entities_general_intent_declares_semantic_only() {
        let p = parsed(QueryType::Find, Intent::General, Entities::default());
        let user = build_user_segment(&p, "ctx");
        assert!(user.contains("matched by meaning alone"));
    }

    #[test]
    fn test_prompt_never_mentions_absent_fields() {
        let p = parsed(QueryType::Find, Intent::General, Entities::default());
        let user = build_user_segment(&p, "ctx");
        assert!(!user.contains("restricted to type"));
        assert!(!user.contains("restricted to status"));
    }
}
