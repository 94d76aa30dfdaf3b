use secrecy::SecretString;
use std::env;
use tracing::Level;

/// The size of each audio chunk pulled from the microphone stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// The size of each audio chunk for the playback stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Playback ring buffer length in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;

/// Holds all configuration loaded from the environment.
#[derive(Clone)]
pub struct Config {
    pub gateway_url: String,
    pub recognition_url: String,
    pub credential_endpoint: String,
    pub synthesis_endpoint: String,
    pub speech_api_key: SecretString,
    pub voice: String,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `SPEECH_API_KEY`: Key used to mint ephemeral speech credentials. Required.
    // *   `GATEWAY_URL`: (Optional) Interview gateway ws endpoint. Defaults to "ws://localhost:3000/ws".
    // *   `RECOGNITION_URL`: (Optional) Realtime recognition ws endpoint.
    // *   `CREDENTIAL_ENDPOINT`: (Optional) Ephemeral-credential endpoint.
    // *   `SYNTHESIS_ENDPOINT`: (Optional) Speech-synthesis endpoint.
    // *   `VOICE`: (Optional) Synthesis voice. Defaults to "sage".
    // *   `RUST_LOG`: (Optional) Logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let speech_api_key = env::var("SPEECH_API_KEY")
            .map_err(|_| ConfigError::MissingVar("SPEECH_API_KEY".to_string()))?;

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gateway_url: env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "ws://localhost:3000/ws".to_string()),
            recognition_url: env::var("RECOGNITION_URL")
                .unwrap_or_else(|_| "wss://api.openai.com/v1/realtime/transcribe".to_string()),
            credential_endpoint: env::var("CREDENTIAL_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/realtime/sessions".to_string()),
            synthesis_endpoint: env::var("SYNTHESIS_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/audio/speech".to_string()),
            speech_api_key: SecretString::from(speech_api_key),
            voice: env::var("VOICE").unwrap_or_else(|_| "sage".to_string()),
            log_level,
        })
    }
}
