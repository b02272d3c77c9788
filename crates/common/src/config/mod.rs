//! Configuration management for the Avoda service
//!
//! Layered loading from default/environment/local files and `APP__`-prefixed
//! environment variables, following the same `config`-crate builder chain
//! used across this family of services.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub observability: ObservabilityConfig,
    /// The rule-based query parser and hybrid retriever's tunables.
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Which embedder backend to construct; `"candle"` loads the real
    /// local model, anything else falls back to the deterministic embedder.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// HuggingFace repo id of the sentence-embedding model.
    #[serde(default = "default_embedding_model")]
    pub model_repo: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// HuggingFace repo id of the causal language model.
    #[serde(default = "default_llm_model")]
    pub model_repo: String,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    pub generation: GenerationConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_new_tokens_cpu")]
    pub max_new_tokens_cpu: usize,
    #[serde(default = "default_max_new_tokens_accel")]
    pub max_new_tokens_accel: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_decoding")]
    pub decoding: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_total_timeout_ms")]
    pub total_ms: u64,
    #[serde(default = "default_generate_timeout_ms")]
    pub generate_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// Every tunable driving the rule-based query parser and the hybrid
/// retriever. Loaded as a JSON document (or the `query` table of the layered
/// config sources) rather than hard-coded, since the trigger/label
/// vocabularies are deployment-specific (Hebrew at runtime).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// intent -> trigger tokens
    #[serde(default = "default_intent_triggers")]
    pub intent_triggers: HashMap<String, Vec<String>>,
    #[serde(default = "default_urgency_triggers")]
    pub urgency_triggers: Vec<String>,
    #[serde(default = "default_projects_entity_triggers")]
    pub projects_entity_triggers: Vec<String>,
    #[serde(default = "default_answer_retrieval_triggers")]
    pub answer_retrieval_triggers: Vec<String>,
    /// query_type -> trigger tokens
    #[serde(default = "default_query_type_triggers")]
    pub query_type_triggers: HashMap<String, Vec<String>>,
    /// Hebrew keyword -> internal text-chunk field label (the same label
    /// strings `target_fields_by_intent` uses)
    #[serde(default = "default_field_label_map")]
    pub field_label_map: HashMap<String, String>,
    #[serde(default = "default_stop_words_for_name_extraction")]
    pub stop_words_for_name_extraction: Vec<String>,
    /// intent -> ordered list of target field labels
    #[serde(default = "default_target_fields_by_intent")]
    pub target_fields_by_intent: HashMap<String, Vec<String>>,
    #[serde(default = "default_thresholds")]
    pub thresholds: ThresholdConfig,
    #[serde(default = "default_urgency_horizon_days")]
    pub urgency_horizon_days: i64,
    #[serde(default = "default_chunk_fetch_multiplier")]
    pub chunk_fetch_multiplier: usize,
    #[serde(default = "default_boosts")]
    pub boosts: BoostConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_threshold_person_project")]
    pub person_project: f32,
    #[serde(default = "default_threshold_general")]
    pub general: f32,
    #[serde(default = "default_threshold_mixed")]
    pub mixed: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoostConfig {
    #[serde(default = "default_boost_exact")]
    pub exact_in_target_field: f32,
    #[serde(default = "default_boost_entity")]
    pub entity_in_chunk: f32,
    #[serde(default = "default_boost_base")]
    pub base: f32,
}

// Default value functions, following the pattern of one free function per
// defaulted field.
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "candle".to_string() }
fn default_embedding_model() -> String { "sentence-transformers/all-MiniLM-L6-v2".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_llm_model() -> String { "Qwen/Qwen2.5-1.5B-Instruct".to_string() }
fn default_queue_depth() -> usize { 4 }
fn default_max_new_tokens_cpu() -> usize { 200 }
fn default_max_new_tokens_accel() -> usize { 500 }
fn default_temperature() -> f32 { 0.7 }
fn default_decoding() -> String { "greedy".to_string() }
fn default_total_timeout_ms() -> u64 { 120_000 }
fn default_generate_timeout_ms() -> u64 { 90_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "avoda".to_string() }
fn default_urgency_horizon_days() -> i64 { 7 }
fn default_chunk_fetch_multiplier() -> usize { 3 }
fn default_threshold_person_project() -> f32 { 0.5 }
fn default_threshold_general() -> f32 { 0.4 }
fn default_threshold_mixed() -> f32 { 0.2 }
fn default_boost_exact() -> f32 { 2.0 }
fn default_boost_entity() -> f32 { 1.5 }
fn default_boost_base() -> f32 { 1.0 }

fn default_thresholds() -> ThresholdConfig {
    ThresholdConfig {
        person_project: default_threshold_person_project(),
        general: default_threshold_general(),
        mixed: default_threshold_mixed(),
    }
}

fn default_boosts() -> BoostConfig {
    BoostConfig {
        exact_in_target_field: default_boost_exact(),
        entity_in_chunk: default_boost_entity(),
        base: default_boost_base(),
    }
}

// Default Hebrew/English vocabulary for the rule-based query parser. These
// back a clean checkout with a working parser out of the box; a real
// deployment overrides them with its own `query` config table.
fn default_intent_triggers() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert("person".to_string(), vec!["by".to_string(), "מאת".to_string(), "מ".to_string()]);
    m.insert("project".to_string(), vec!["project".to_string(), "פרויקט".to_string()]);
    m.insert("type".to_string(), vec!["type".to_string(), "סוג".to_string()]);
    m.insert("status".to_string(), vec!["status".to_string(), "סטטוס".to_string()]);
    m
}

fn default_urgency_triggers() -> Vec<String> {
    vec!["urgent".to_string(), "דחוף".to_string()]
}

fn default_projects_entity_triggers() -> Vec<String> {
    vec!["projects".to_string(), "פרויקטים".to_string()]
}

fn default_answer_retrieval_triggers() -> Vec<String> {
    vec!["answer for".to_string(), "תשובה עבור".to_string()]
}

fn default_query_type_triggers() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert("urgent".to_string(), vec!["urgent".to_string(), "דחוף".to_string()]);
    m.insert("answer_retrieval".to_string(), vec!["answer for".to_string(), "תשובה עבור".to_string()]);
    m.insert("similar".to_string(), vec!["similar to".to_string(), "דומה ל".to_string()]);
    m.insert("count".to_string(), vec!["how many".to_string(), "כמה".to_string()]);
    m.insert("summarize".to_string(), vec!["summarize".to_string(), "סכם".to_string()]);
    m
}

/// Hebrew field keyword -> the same display-label strings
/// `target_fields_by_intent` uses, so a keyword found in the raw query text
/// maps straight onto a target field without a second vocabulary.
fn default_field_label_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("פרויקט".to_string(), "Project".to_string());
    m.insert("עודכן על ידי".to_string(), "Updated By".to_string());
    m.insert("סוג".to_string(), "Type".to_string());
    m.insert("סטטוס".to_string(), "Status".to_string());
    m
}

fn default_stop_words_for_name_extraction() -> Vec<String> {
    vec![
        "of".to_string(),
        "in".to_string(),
        "from".to_string(),
        "של".to_string(),
        "עם".to_string(),
    ]
}

fn default_target_fields_by_intent() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert("person".to_string(), vec!["Updated By".to_string(), "Created By".to_string()]);
    m.insert("project".to_string(), vec!["Project".to_string()]);
    m.insert("type".to_string(), vec!["Type".to_string()]);
    m.insert("status".to_string(), vec!["Status".to_string()]);
    m
}

impl AppConfig {
    /// Load configuration from layered files and `APP__`-prefixed environment
    /// variables.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file, still honouring `APP__` environment
    /// overrides on top.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.llm.timeouts.total_ms)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.llm.timeouts.generate_ms)
    }

    /// Read connection credentials from environment variables, falling
    /// back to a fully-assembled `DATABASE_URL` when present.
    pub fn read_database_url() -> Option<String> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Some(url);
        }
        let host = std::env::var("PGHOST").ok()?;
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let db = std::env::var("PGDATABASE").ok()?;
        let user = std::env::var("PGUSER").ok()?;
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        Some(format!(
            "postgres://{user}:{password}@{host}:{port}/{db}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_query_config() -> QueryConfig {
        QueryConfig {
            intent_triggers: HashMap::new(),
            urgency_triggers: vec![],
            projects_entity_triggers: vec![],
            answer_retrieval_triggers: vec![],
            query_type_triggers: HashMap::new(),
            field_label_map: HashMap::new(),
            stop_words_for_name_extraction: vec![],
            target_fields_by_intent: HashMap::new(),
            thresholds: ThresholdConfig {
                person_project: default_threshold_person_project(),
                general: default_threshold_general(),
                mixed: default_threshold_mixed(),
            },
            urgency_horizon_days: default_urgency_horizon_days(),
            chunk_fetch_multiplier: default_chunk_fetch_multiplier(),
            boosts: BoostConfig {
                exact_in_target_field: default_boost_exact(),
                entity_in_chunk: default_boost_entity(),
                base: default_boost_base(),
            },
        }
    }

    #[test]
    fn test_threshold_defaults_match_spec() {
        let q = sample_query_config();
        assert_eq!(q.thresholds.person_project, 0.5);
        assert_eq!(q.thresholds.general, 0.4);
        assert_eq!(q.thresholds.mixed, 0.2);
    }

    #[test]
    fn test_boost_defaults_match_spec() {
        let q = sample_query_config();
        assert_eq!(q.boosts.exact_in_target_field, 2.0);
        assert_eq!(q.boosts.entity_in_chunk, 1.5);
        assert_eq!(q.boosts.base, 1.0);
    }

    #[test]
    fn test_urgency_horizon_default_is_seven_days() {
        assert_eq!(default_urgency_horizon_days(), 7);
    }

    #[test]
    fn test_query_config_deserializes_from_empty_document() {
        // A clean checkout with no `query` table at all must still produce a
        // working parser vocabulary rather than failing to deserialize.
        let q: QueryConfig = serde_json::from_str("{}").expect("QueryConfig should fall back to defaults");
        assert!(q.intent_triggers.contains_key("person"));
        assert!(!q.field_label_map.is_empty());
        assert!(!q.target_fields_by_intent.is_empty());
    }
}
