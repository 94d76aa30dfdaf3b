use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

pub struct Config {
    url: String,
    session_token: SecretString,
    capacity: usize,
    heartbeat_interval: Duration,
    max_reconnect_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(url: &str, session_token: &str) -> Self {
        Self {
            config: Config {
                url: url.to_string(),
                session_token: SecretString::from(session_token.to_string()),
                capacity: DEFAULT_CAPACITY,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
                backoff_base: DEFAULT_BACKOFF_BASE,
                backoff_cap: DEFAULT_BACKOFF_CAP,
            },
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_cap = cap;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Config {
    pub fn builder(url: &str, session_token: &str) -> ConfigBuilder {
        ConfigBuilder::new(url, session_token)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    pub fn backoff_cap(&self) -> Duration {
        self.backoff_cap
    }

    /// Builds the websocket handshake request. The session token doubles as
    /// the authentication credential, passed as a query parameter the way
    /// browser clients have to.
    pub(crate) fn build_request(&self) -> anyhow::Result<Request> {
        let url = format!(
            "{}?token={}",
            self.url,
            self.session_token.expose_secret()
        );
        Ok(url.into_client_request()?)
    }
}
