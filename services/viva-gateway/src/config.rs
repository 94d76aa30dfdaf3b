//! Gateway configuration, loaded once from the environment at startup and
//! passed to everything that needs it.

use secrecy::SecretString;
use std::env;
use std::time::Duration;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub llm_api_key: SecretString,
    pub chat_endpoint: String,
    pub decision_model: String,
    pub generation_model: String,
    pub knowledge_endpoint: Option<String>,
    pub audit_endpoint: Option<String>,
    pub interview_duration: Duration,
    pub time_warning_before_end: Duration,
    pub completion_grace: Duration,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidVar(String, String),
}

fn duration_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidVar(name.to_string(), raw)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `LLM_API_KEY`: Secret key for the model provider. Required.
    // *   `CHAT_ENDPOINT`: (Optional) Chat-completions URL. Defaults to the OpenAI endpoint.
    // *   `DECISION_MODEL`: (Optional) Fast classifier model. Defaults to "gpt-4o-mini".
    // *   `GENERATION_MODEL`: (Optional) Spoken-response model. Defaults to "gpt-4o".
    // *   `KNOWLEDGE_ENDPOINT`: (Optional) Retrieval collaborator URL. Retrieval is skipped without it.
    // *   `AUDIT_ENDPOINT`: (Optional) Audit collaborator URL. Records go to the log without it.
    // *   `INTERVIEW_DURATION_SECS`: (Optional) Session wall clock. Defaults to 2700 (45 min).
    // *   `TIME_WARNING_SECS`: (Optional) Warning lead time before expiry. Defaults to 300.
    // *   `COMPLETION_GRACE_SECS`: (Optional) Readable window after completion. Defaults to 5.
    // *   `BIND_ADDR`: (Optional) Listen address. Defaults to "0.0.0.0:3000".
    // *   `RUST_LOG`: (Optional) Logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env for local development; ignored when absent.
        dotenvy::dotenv().ok();

        let llm_api_key = env::var("LLM_API_KEY")
            .map_err(|_| ConfigError::MissingVar("LLM_API_KEY".to_string()))?;

        let chat_endpoint = env::var("CHAT_ENDPOINT")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let decision_model =
            env::var("DECISION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let generation_model =
            env::var("GENERATION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidVar("RUST_LOG".to_string(), log_level_str))?;

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            llm_api_key: SecretString::from(llm_api_key),
            chat_endpoint,
            decision_model,
            generation_model,
            knowledge_endpoint: env::var("KNOWLEDGE_ENDPOINT").ok(),
            audit_endpoint: env::var("AUDIT_ENDPOINT").ok(),
            interview_duration: duration_secs("INTERVIEW_DURATION_SECS", 45 * 60)?,
            time_warning_before_end: duration_secs("TIME_WARNING_SECS", 5 * 60)?,
            completion_grace: duration_secs("COMPLETION_GRACE_SECS", 5)?,
            log_level,
        })
    }
}
