//! Query Parser: lexes a free-text question into a structured
//! `ParsedQuery` using a configurable, language-aware pattern set. Rule
//! based and deterministic, never statistical, and never fails — on
//! unrecognised input it returns `intent=general`, `query_type=find`,
//! empty entities.

use avoda_common::config::QueryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Person,
    Project,
    Type,
    Status,
    General,
}

impl Intent {
    fn as_key(self) -> &'static str {
        match self {
            Intent::Person => "person",
            Intent::Project => "project",
            Intent::Type => "type",
            Intent::Status => "status",
            Intent::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Find,
    Count,
    Summarize,
    Similar,
    Urgent,
    AnswerRetrieval,
}

impl QueryType {
    pub(crate) fn as_key(self) -> &'static str {
        match self {
            QueryType::Find => "find",
            QueryType::Count => "count",
            QueryType::Summarize => "summarize",
            QueryType::Similar => "similar",
            QueryType::Urgent => "urgent",
            QueryType::AnswerRetrieval => "answer_retrieval",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRangeType {
    LastNDays,
    LastWeek,
    LastMonth,
    Range,
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
    pub days: Option<i64>,
    pub range_type: DateRangeType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    pub person_name: Option<String>,
    pub project_name: Option<String>,
    pub type_id: Option<i32>,
    pub status_id: Option<i32>,
    pub date_range: Option<DateRange>,
    pub urgency: bool,
    pub request_id: Option<String>,
    pub projects_query: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub raw_query: String,
    pub intent: Intent,
    pub query_type: QueryType,
    pub entities: Entities,
    pub target_fields: Vec<String>,
}

/// Right-to-left / left-to-right mark characters that may surround
/// numbers in bidi text; skipped when scanning for a digit run.
const BIDI_MARKS: &[char] = &['\u{200e}', '\u{200f}', '\u{202a}', '\u{202b}', '\u{202c}'];

/// Filler words that follow "bring me"-style phrasing and must never end
/// up inside an extracted name, even if a deployment's stop-word list
/// omits them.
const FILLER_WORDS: &[&str] = &["לי", "me", "please", "בבקשה"];

pub fn parse_query(raw: &str, config: &QueryConfig) -> ParsedQuery {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedQuery {
            raw_query: raw.to_string(),
            intent: Intent::General,
            query_type: QueryType::Find,
            entities: Entities::default(),
            target_fields: Vec::new(),
        };
    }

    let query_type = detect_query_type(trimmed, config);
    let intent = detect_intent(trimmed, config);

    let mut entities = Entities::default();
    entities.person_name = extract_name(trimmed, config, "person");
    entities.project_name = extract_name(trimmed, config, "project");
    entities.type_id = extract_classifier_id(trimmed, config, "type");
    entities.status_id = extract_classifier_id(trimmed, config, "status");
    entities.date_range = extract_date_range(trimmed);
    entities.urgency = any_trigger_present(trimmed, &config.urgency_triggers);
    entities.request_id = extract_request_id(trimmed, config, query_type);

    if query_type == QueryType::Count && any_trigger_present(trimmed, &config.projects_entity_triggers) {
        entities.projects_query = true;
    }

    let mut target_fields = config
        .target_fields_by_intent
        .get(intent.as_key())
        .cloned()
        .unwrap_or_default();
    append_field_label_matches(trimmed, config, &mut target_fields);

    ParsedQuery {
        raw_query: raw.to_string(),
        intent,
        query_type,
        entities,
        target_fields,
    }
}

/// Appends any `field_label_map` entries whose Hebrew keyword appears in
/// the raw query text, translating it to the same display-label vocabulary
/// `target_fields_by_intent` uses, so a field named explicitly in the query
/// (rather than implied by intent alone) still ends up in `target_fields`.
/// Matches are sorted before appending to keep the result deterministic
/// regardless of the map's iteration order.
fn append_field_label_matches(text: &str, config: &QueryConfig, target_fields: &mut Vec<String>) {
    let mut matches: Vec<&String> = config
        .field_label_map
        .iter()
        .filter(|(keyword, _)| !keyword.is_empty() && text.contains(keyword.as_str()))
        .map(|(_, label)| label)
        .collect();
    matches.sort();
    for label in matches {
        if !target_fields.contains(label) {
            target_fields.push(label.clone());
        }
    }
}

fn any_trigger_present(text: &str, triggers: &[String]) -> bool {
    triggers.iter().any(|t| !t.is_empty() && text.contains(t.as_str()))
}

fn earliest_trigger_position(text: &str, triggers: &[String]) -> Option<(usize, usize)> {
    triggers
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| text.find(t.as_str()).map(|pos| (pos, t.len())))
        .min_by_key(|(pos, _)| *pos)
}

/// Query-type detection runs independently of intent, in fixed priority
/// order: urgent -> answer_retrieval -> similar -> count -> summarize ->
/// find (default).
fn detect_query_type(text: &str, config: &QueryConfig) -> QueryType {
    const PRIORITY: &[QueryType] = &[
        QueryType::Urgent,
        QueryType::AnswerRetrieval,
        QueryType::Similar,
        QueryType::Count,
        QueryType::Summarize,
    ];

    for &qt in PRIORITY {
        if let Some(triggers) = config.query_type_triggers.get(qt.as_key()) {
            if any_trigger_present(text, triggers) {
                return qt;
            }
        }
    }
    QueryType::Find
}

/// Intent is chosen by the earliest-appearing trigger across all intent
/// categories; ties broken by a fixed specificity order. A query with no
/// intent trigger at all falls back to `general` — this is what keeps
/// bare multi-word phrases from being misread as `person` (no marker, no
/// person intent).
fn detect_intent(text: &str, config: &QueryConfig) -> Intent {
    const CANDIDATES: &[(Intent, &str)] = &[
        (Intent::Person, "person"),
        (Intent::Project, "project"),
        (Intent::Type, "type"),
        (Intent::Status, "status"),
    ];

    let mut best: Option<(usize, Intent)> = None;
    for (intent, key) in CANDIDATES {
        let Some(triggers) = config.intent_triggers.get(*key) else {
            continue;
        };
        if let Some((pos, _)) = earliest_trigger_position(text, triggers) {
            match best {
                Some((best_pos, _)) if pos >= best_pos => {}
                _ => best = Some((pos, *intent)),
            }
        }
    }
    best.map(|(_, intent)| intent).unwrap_or(Intent::General)
}

/// Name-extraction rules (person and project share the same algorithm):
/// given a marker `m` found in the text, the name is the longest prefix
/// of the text following `m` consisting of whitespace-separated words,
/// stopping at the first stop-word, the first type/status marker, or end
/// of input.
///
/// Markers that are glued to the following word with no separating space
/// (the common Hebrew pattern of a one-letter preposition prefix, e.g.
/// `"מאליס"` = `מ` + `"אליס"`) are handled by the same code path: the
/// remainder simply starts at the byte right after the marker, whether or
/// not that was preceded by whitespace. This also means the `"preserve
/// the א"`/`"strip the מ"` cases in the distilled rules need no special
/// casing — they fall out of always slicing the remainder immediately
/// after the matched marker, never after a following space.
fn extract_name(text: &str, config: &QueryConfig, intent_key: &str) -> Option<String> {
    let triggers = config.intent_triggers.get(intent_key)?;
    let mut candidates: Vec<String> = triggers.clone();
    candidates.sort_by_key(|t| std::cmp::Reverse(t.len()));

    let (marker_pos, marker_len) = candidates
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| text.find(t.as_str()).map(|pos| (pos, t.len())))
        .min_by_key(|(pos, _)| *pos)?;

    let remainder = &text[marker_pos + marker_len..];
    let remainder = remainder.trim_start();

    let stop_words = &config.stop_words_for_name_extraction;
    let type_status_markers: Vec<&str> = config
        .intent_triggers
        .get("type")
        .into_iter()
        .chain(config.intent_triggers.get("status"))
        .flat_map(|v| v.iter().map(String::as_str))
        .collect();

    let mut collected: Vec<&str> = Vec::new();
    for word in remainder.split_whitespace() {
        if stop_words.iter().any(|sw| sw == word)
            || FILLER_WORDS.contains(&word)
            || type_status_markers.iter().any(|m| word.starts_with(m))
        {
            break;
        }
        collected.push(word);
    }

    if collected.is_empty() {
        None
    } else {
        Some(collected.join(" "))
    }
}

/// Integer immediately following a type/status marker, tolerant of bidi
/// marks around the digits.
fn extract_classifier_id(text: &str, config: &QueryConfig, key: &str) -> Option<i32> {
    let triggers = config.intent_triggers.get(key)?;
    let (pos, len) = earliest_trigger_position(text, triggers)?;
    let remainder = &text[pos + len..];
    extract_leading_int(remainder)
}

fn extract_leading_int(text: &str) -> Option<i32> {
    let cleaned: String = text
        .chars()
        .skip_while(|c| c.is_whitespace() || BIDI_MARKS.contains(c))
        .collect();
    let digits: String = cleaned
        .chars()
        .take_while(|c| c.is_ascii_digit() || BIDI_MARKS.contains(c))
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Request id: the digit run immediately following an `answer_retrieval`
/// or `similar` marker, or anywhere in the query when `query_type=similar`.
fn extract_request_id(text: &str, config: &QueryConfig, query_type: QueryType) -> Option<String> {
    let mut marker_triggers: Vec<String> = Vec::new();
    if let Some(t) = config.query_type_triggers.get("answer_retrieval") {
        marker_triggers.extend(t.clone());
    }
    if let Some(t) = config.query_type_triggers.get("similar") {
        marker_triggers.extend(t.clone());
    }

    if let Some((pos, len)) = earliest_trigger_position(text, &marker_triggers) {
        let remainder = &text[pos + len..];
        if let Some(id) = extract_digit_run(remainder) {
            return Some(id);
        }
    }

    if query_type == QueryType::Similar {
        return extract_digit_run(text);
    }

    None
}

fn extract_digit_run(text: &str) -> Option<String> {
    let mut run = String::new();
    let mut started = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run.push(c);
            started = true;
        } else if BIDI_MARKS.contains(&c) {
            continue;
        } else if started {
            break;
        }
    }
    if run.is_empty() {
        None
    } else {
        Some(run)
    }
}

/// Date-range extraction: numeric "last N days/weeks/months" forms,
/// "from DATE to DATE" ranges, and bounded "from DATE" / "until DATE"
/// single forms. Recognised in both English and the transliterated
/// Hebrew markers deployments commonly use for this small, closed
/// vocabulary — unlike intent/query-type triggers this isn't listed as a
/// separate configuration key, so the unit words are fixed here.
fn extract_date_range(text: &str) -> Option<DateRange> {
    if let Some(days) = last_n(text, &["day", "days", "יום", "ימים"]) {
        return Some(DateRange {
            start: None,
            end: None,
            days: Some(days),
            range_type: DateRangeType::LastNDays,
        });
    }
    if any_trigger_present(text, &["last week".into(), "שבוע שעבר".into()]) {
        return Some(DateRange {
            start: None,
            end: None,
            days: Some(7),
            range_type: DateRangeType::LastWeek,
        });
    }
    if any_trigger_present(text, &["last month".into(), "חודש שעבר".into()]) {
        return Some(DateRange {
            start: None,
            end: None,
            days: Some(30),
            range_type: DateRangeType::LastMonth,
        });
    }
    if let (Some(from), Some(to)) = (find_date_after(text, &["from", "מ-", "מתאריך"]), find_date_after(text, &["to", "עד"])) {
        return Some(DateRange {
            start: Some(from),
            end: Some(to),
            days: None,
            range_type: DateRangeType::Range,
        });
    }
    if let Some(until) = find_date_after(text, &["until", "עד"]) {
        return Some(DateRange {
            start: None,
            end: Some(until),
            days: None,
            range_type: DateRangeType::Single,
        });
    }
    if let Some(from) = find_date_after(text, &["from", "מ-", "מתאריך"]) {
        return Some(DateRange {
            start: Some(from),
            end: None,
            days: None,
            range_type: DateRangeType::Single,
        });
    }
    None
}

fn last_n(text: &str, units: &[&str]) -> Option<i64> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        if let Ok(n) = word.parse::<i64>() {
            if let Some(next) = words.get(i + 1) {
                if units.iter().any(|u| next.contains(u)) {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// Find a date-looking token (`YYYY-MM-DD` or `DD/MM/YYYY`) following one
/// of `markers` anywhere in `text`.
fn find_date_after(text: &str, markers: &[&str]) -> Option<String> {
    for marker in markers {
        if let Some(pos) = text.find(marker) {
            let remainder = text[pos + marker.len()..].trim_start();
            if let Some(word) = remainder.split_whitespace().next() {
                if looks_like_date(word) {
                    return Some(word.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_string());
                }
            }
        }
    }
    None
}

fn looks_like_date(word: &str) -> bool {
    let digits = word.chars().filter(|c| c.is_ascii_digit()).count();
    let separators = word.chars().filter(|c| *c == '-' || *c == '/').count();
    digits >= 6 && separators >= 2
}

/// Render a parsed query back into a string containing its recognised
/// trigger tokens, for the idempotence property: `parse(render(parse(q)))
/// == parse(q)`.
pub fn render(parsed: &ParsedQuery, config: &QueryConfig) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(triggers) = config.query_type_triggers.get(parsed.query_type.as_key()) {
        if let Some(t) = triggers.first() {
            parts.push(t.clone());
        }
    }
    if let Some(triggers) = config.intent_triggers.get(parsed.intent.as_key()) {
        if let Some(t) = triggers.first() {
            parts.push(t.clone());
        }
    }
    if let Some(name) = &parsed.entities.person_name {
        parts.push(name.clone());
    }
    if let Some(name) = &parsed.entities.project_name {
        parts.push(name.clone());
    }
    if let Some(id) = parsed.entities.request_id.as_ref() {
        parts.push(id.clone());
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QueryConfig {
        let mut intent_triggers = HashMap::new();
        intent_triggers.insert("person".to_string(), vec!["by".to_string(), "מ".to_string()]);
        intent_triggers.insert("project".to_string(), vec!["project".to_string()]);
        intent_triggers.insert("type".to_string(), vec!["type".to_string()]);
        intent_triggers.insert("status".to_string(), vec!["status".to_string()]);

        let mut query_type_triggers = HashMap::new();
        query_type_triggers.insert("urgent".to_string(), vec!["urgent".to_string()]);
        query_type_triggers.insert("answer_retrieval".to_string(), vec!["answer for".to_string()]);
        query_type_triggers.insert("similar".to_string(), vec!["similar to".to_string()]);
        query_type_triggers.insert("count".to_string(), vec!["how many".to_string()]);
        query_type_triggers.insert("summarize".to_string(), vec!["summarize".to_string()]);

        let mut target_fields_by_intent = HashMap::new();
        target_fields_by_intent.insert(
            "person".to_string(),
            vec!["Updated By".to_string(), "Created By".to_string()],
        );

        QueryConfig {
            intent_triggers,
            urgency_triggers: vec!["urgent".to_string()],
            projects_entity_triggers: vec!["projects".to_string()],
            answer_retrieval_triggers: vec!["answer for".to_string()],
            query_type_triggers,
            field_label_map: {
                let mut m = HashMap::new();
                m.insert("פרויקט".to_string(), "Project".to_string());
                m
            },
            stop_words_for_name_extraction: vec!["of".to_string(), "in".to_string(), "from".to_string()],
            target_fields_by_intent,
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

    #[test]
    fn test_empty_query_never_fails() {
        let parsed = parse_query("", &config());
        assert_eq!(parsed.intent, Intent::General);
        assert_eq!(parsed.query_type, QueryType::Find);
    }

    #[test]
    fn test_exact_classifier_type() {
        let parsed = parse_query("requests of type 4", &config());
        assert_eq!(parsed.intent, Intent::Type);
        assert_eq!(parsed.entities.type_id, Some(4));
    }

    #[test]
    fn test_person_requires_context_marker() {
        let parsed = parse_query("planning coordination", &config());
        assert_eq!(parsed.intent, Intent::General);
    }

    #[test]
    fn test_person_with_marker_extracts_name() {
        let parsed = parse_query("requests by Alice of type 4", &config());
        assert_eq!(parsed.intent, Intent::Person);
        assert_eq!(parsed.entities.person_name.as_deref(), Some("Alice"));
        assert_eq!(parsed.entities.type_id, Some(4));
    }

    #[test]
    fn test_urgency_defaults_false() {
        let parsed = parse_query("requests by Alice", &config());
        assert!(!parsed.entities.urgency);
    }

    #[test]
    fn test_count_projects_query_flag() {
        let parsed = parse_query("how many projects does Alice have", &config());
        assert_eq!(parsed.query_type, QueryType::Count);
        assert!(parsed.entities.projects_query);
    }

    #[test]
    fn test_similar_extracts_request_id() {
        let parsed = parse_query("requests similar to 211000001", &config());
        assert_eq!(parsed.query_type, QueryType::Similar);
        assert_eq!(parsed.entities.request_id.as_deref(), Some("211000001"));
    }

    #[test]
    fn test_bidi_marks_do_not_block_digit_extraction() {
        let text = format!("requests of type \u{200e}4\u{200f}");
        let parsed = parse_query(&text, &config());
        assert_eq!(parsed.entities.type_id, Some(4));
    }

    #[test]
    fn test_field_label_map_keyword_adds_target_field() {
        let parsed = parse_query("requests of type 4 \u{5e4}\u{5e8}\u{5d5}\u{5d9}\u{5e7}\u{5d8}", &config());
        assert!(parsed.target_fields.contains(&"Project".to_string()));
    }

    #[test]
    fn test_glued_hebrew_preposition_extracts_name() {
        let parsed = parse_query("\u{5de}\u{5dc}\u{5d9}\u{5e1}", &config());
        // "מ" + "ליס" glued together; the marker is a single character and
        // everything after it is kept as the name.
        assert_eq!(parsed.intent, Intent::Person);
        assert!(parsed.entities.person_name.is_some());
    }
}
