use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

/// Errors from the response-generation stream. Cloneable so a single failure
/// can be both sent down the token channel and logged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),
    #[error("generation stream interrupted: {0}")]
    Stream(String),
}

pub type TokenRx = mpsc::Receiver<Result<String, GenerationError>>;

/// The model that produces the natural-language utterances actually spoken to
/// the candidate. Pure token stream; no structured output.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn stream(
        &self,
        system_prompt: String,
        user_prompt: String,
    ) -> Result<TokenRx, GenerationError>;
}

pub struct GenerationClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl GenerationClient {
    pub fn new(endpoint: &str, api_key: SecretString, model: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    /// Pulls the `content` delta out of one SSE `data:` payload, if any.
    fn delta_content(payload: &str) -> Option<String> {
        let json: serde_json::Value = serde_json::from_str(payload).ok()?;
        json["choices"][0]["delta"]["content"]
            .as_str()
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl ResponseGenerator for GenerationClient {
    async fn stream(
        &self,
        system_prompt: String,
        user_prompt: String,
    ) -> Result<TokenRx, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "stream": true,
            "temperature": 0.7
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);

        // Forward tokens as they arrive; the orchestrator relays each one to
        // the transport rather than buffering the whole response.
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            'outer: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GenerationError::Stream(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited; anything after the last
                // newline is an incomplete frame and stays in the buffer.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        break 'outer;
                    }
                    if let Some(content) = Self::delta_content(payload) {
                        if tx.send(Ok(content)).await.is_err() {
                            // Receiver gone (e.g. playback stopped); stop
                            // pulling from the model.
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
