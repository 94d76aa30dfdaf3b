use crate::device::DeviceError;
use crate::dsp::{Compressor, DcBlocker};
use crate::pcm;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use viva_types::speech::{
    AudioAppendEvent, RecognitionClientEvent, RecognitionServerEvent, RecognitionSessionUpdate,
    VadConfig,
};

#[cfg(test)]
use mockall::automock;

/// Capture-side failures, each with a message fit for the candidate UI.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("The speech service rejected this session's credentials. Please sign in again.")]
    Unauthorized,
    #[error("The speech service refused access for this session.")]
    Forbidden,
    #[error("The speech service is rate limiting this session. Try again in a moment.")]
    RateLimited,
    #[error("The speech service reported an error (HTTP {0}). Try again shortly.")]
    Service(u16),
    #[error("Lost the speech connection and ran out of reconnection attempts.")]
    ReconnectExhausted,
    #[error("speech connection failed: {0}")]
    Connection(String),
}

pub(crate) fn classify_status(status: u16) -> CaptureError {
    match status {
        401 => CaptureError::Unauthorized,
        403 => CaptureError::Forbidden,
        429 => CaptureError::RateLimited,
        other => CaptureError::Service(other),
    }
}

/// What the capture client surfaces upward. Speech start/stop are contentless
/// UI pulses; only finalized segments carry text.
#[derive(Debug)]
pub enum CaptureEvent {
    SpeechStarted,
    SpeechStopped,
    Final(String),
    /// Terminal failure. Emitted at most once; no further reconnection will
    /// be attempted after it.
    Error(CaptureError),
}

/// Supplies the short-lived credential for the recognition channel. The
/// long-lived API key never reaches the capture client.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn ephemeral_token(&self) -> Result<SecretString, CaptureError>;
}

/// Fetches ephemeral tokens from the session-credential endpoint.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: &str, api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn ephemeral_token(&self) -> Result<SecretString, CaptureError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| CaptureError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status().as_u16()));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CaptureError::Connection(e.to_string()))?;
        let token = body["token"]
            .as_str()
            .ok_or_else(|| CaptureError::Connection("credential response missing token".into()))?;
        Ok(SecretString::from(token.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub url: String,
    pub vad: VadConfig,
    /// Reconnects allowed within any rolling minute.
    pub max_reconnects_per_minute: u32,
    /// Reconnects allowed over the life of the session.
    pub max_reconnects_lifetime: u32,
    pub reconnect_delay: Duration,
}

impl CaptureConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            vad: VadConfig::default(),
            max_reconnects_per_minute: 4,
            max_reconnects_lifetime: 12,
            reconnect_delay: Duration::from_millis(500),
        }
    }

    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    pub fn with_reconnect_limits(mut self, per_minute: u32, lifetime: u32) -> Self {
        self.max_reconnects_per_minute = per_minute;
        self.max_reconnects_lifetime = lifetime;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Two independent reconnect budgets: a rolling per-minute window and a
/// lifetime total. Either one running out stops reconnection for good.
pub(crate) struct ReconnectLimiter {
    window: Duration,
    per_window: u32,
    lifetime: u32,
    recent: VecDeque<Instant>,
    total: u32,
}

impl ReconnectLimiter {
    pub(crate) fn new(window: Duration, per_window: u32, lifetime: u32) -> Self {
        Self {
            window,
            per_window,
            lifetime,
            recent: VecDeque::new(),
            total: 0,
        }
    }

    /// Records an attempt at `now` if either budget still allows one.
    pub(crate) fn allow(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.recent.front() {
            if now.duration_since(front) >= self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.total >= self.lifetime || self.recent.len() as u32 >= self.per_window {
            return false;
        }
        self.recent.push_back(now);
        self.total += 1;
        true
    }
}

/// Capture side of the speech pipeline: a realtime recognition connection fed
/// with preprocessed microphone audio.
///
/// Feed device frames through [`SpeechCapture::audio_sender`]; finalized
/// transcripts and speech pulses come back on the event receiver returned by
/// [`SpeechCapture::start`].
pub struct SpeechCapture {
    audio_tx: tokio::sync::mpsc::Sender<Vec<f32>>,
    close_tx: tokio::sync::watch::Sender<bool>,
}

impl SpeechCapture {
    pub fn start(
        config: CaptureConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> (Self, tokio::sync::mpsc::Receiver<CaptureEvent>) {
        let (audio_tx, audio_rx) = tokio::sync::mpsc::channel(256);
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(256);
        let (close_tx, close_rx) = tokio::sync::watch::channel(false);

        tokio::spawn(run_supervisor(config, provider, audio_rx, events_tx, close_rx));

        (Self { audio_tx, close_tx }, events_rx)
    }

    /// Sender for raw mono f32 frames from the device callback.
    pub fn audio_sender(&self) -> tokio::sync::mpsc::Sender<Vec<f32>> {
        self.audio_tx.clone()
    }

    /// Deliberate teardown: closes the connection and suppresses any further
    /// reconnection.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }
}

async fn run_supervisor(
    config: CaptureConfig,
    provider: Arc<dyn CredentialProvider>,
    mut audio_rx: tokio::sync::mpsc::Receiver<Vec<f32>>,
    events_tx: tokio::sync::mpsc::Sender<CaptureEvent>,
    mut close_rx: tokio::sync::watch::Receiver<bool>,
) {
    let mut limiter = ReconnectLimiter::new(
        Duration::from_secs(60),
        config.max_reconnects_per_minute,
        config.max_reconnects_lifetime,
    );
    // Filter state deliberately survives reconnects; the microphone signal
    // doesn't restart just because the socket did.
    let mut dc = DcBlocker::default();
    let mut compressor = Compressor::default();
    let mut first = true;

    loop {
        if *close_rx.borrow() {
            return;
        }
        if !first {
            if !limiter.allow(Instant::now()) {
                // Exactly one terminal error, then permanent silence.
                let _ = events_tx
                    .send(CaptureEvent::Error(CaptureError::ReconnectExhausted))
                    .await;
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(config.reconnect_delay) => {}
                _ = close_rx.changed() => return,
            }
        }
        first = false;

        let ws = match open_session(&config, provider.as_ref()).await {
            Ok(ws) => ws,
            Err(CaptureError::Connection(message)) => {
                tracing::warn!(error = %message, "recognition connect failed, will retry");
                continue;
            }
            Err(terminal) => {
                // Credential/service-level refusals won't heal by retrying.
                let _ = events_tx.send(CaptureEvent::Error(terminal)).await;
                return;
            }
        };

        let intentional = run_connection(
            ws,
            &mut audio_rx,
            &events_tx,
            &mut close_rx,
            &mut dc,
            &mut compressor,
        )
        .await;
        if intentional {
            return;
        }
        tracing::info!("recognition connection dropped");
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_session(
    config: &CaptureConfig,
    provider: &dyn CredentialProvider,
) -> Result<WsStream, CaptureError> {
    let token = provider.ephemeral_token().await?;

    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| CaptureError::Connection(e.to_string()))?;
    let bearer = format!("Bearer {}", token.expose_secret());
    request.headers_mut().insert(
        "Authorization",
        bearer
            .parse()
            .map_err(|_| CaptureError::Connection("invalid credential header".into()))?,
    );

    let (mut ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(resp) => {
                classify_status(resp.status().as_u16())
            }
            other => CaptureError::Connection(other.to_string()),
        })?;

    // Perception only: VAD tuned for quick turn-taking, response
    // auto-generation off.
    let update = RecognitionClientEvent::SessionUpdate(RecognitionSessionUpdate::new(
        config.vad.clone(),
    ));
    let text = serde_json::to_string(&update)
        .map_err(|e| CaptureError::Connection(e.to_string()))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| CaptureError::Connection(e.to_string()))?;
    Ok(ws)
}

/// Runs one live recognition connection. Returns true for deliberate
/// teardown, false when the connection dropped and reconnection should be
/// considered.
async fn run_connection(
    ws: WsStream,
    audio_rx: &mut tokio::sync::mpsc::Receiver<Vec<f32>>,
    events_tx: &tokio::sync::mpsc::Sender<CaptureEvent>,
    close_rx: &mut tokio::sync::watch::Receiver<bool>,
    dc: &mut DcBlocker,
    compressor: &mut Compressor,
) -> bool {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = close_rx.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return true;
            }
            maybe_audio = audio_rx.recv() => {
                let Some(mut frames) = maybe_audio else {
                    // Audio source gone; treat like a deliberate close.
                    let _ = write.send(Message::Close(None)).await;
                    return true;
                };
                dc.process(&mut frames);
                compressor.process(&mut frames);
                let event = RecognitionClientEvent::AudioAppend(AudioAppendEvent::new(
                    pcm::encode_f32(&frames),
                ));
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if write.send(Message::Text(text)).await.is_err() {
                            // Live audio is useless to queue; drop and let the
                            // supervisor reconnect.
                            return false;
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize audio event: {}", e),
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RecognitionServerEvent>(&text) {
                            Ok(RecognitionServerEvent::TranscriptionCompleted(e)) => {
                                let transcript = e.transcript().trim().to_owned();
                                if !transcript.is_empty() {
                                    let _ = events_tx.send(CaptureEvent::Final(transcript)).await;
                                }
                            }
                            Ok(RecognitionServerEvent::SpeechStarted) => {
                                let _ = events_tx.send(CaptureEvent::SpeechStarted).await;
                            }
                            Ok(RecognitionServerEvent::SpeechStopped) => {
                                let _ = events_tx.send(CaptureEvent::SpeechStopped).await;
                            }
                            Ok(RecognitionServerEvent::Error(e)) => {
                                tracing::warn!("recognition service error: {}", e.message());
                            }
                            Err(e) => {
                                tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("recognition read error: {}", e);
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn limiter_enforces_the_rolling_window() {
        let mut limiter = ReconnectLimiter::new(Duration::from_secs(60), 4, 100);
        let start = Instant::now();
        for _ in 0..4 {
            assert!(limiter.allow(start));
        }
        assert!(!limiter.allow(start + Duration::from_secs(1)));
        // A minute later the window has rolled over.
        assert!(limiter.allow(start + Duration::from_secs(61)));
    }

    #[test]
    fn limiter_enforces_the_lifetime_cap() {
        let mut limiter = ReconnectLimiter::new(Duration::from_secs(60), 100, 3);
        let start = Instant::now();
        for i in 0..3 {
            assert!(limiter.allow(start + Duration::from_secs(i * 120)));
        }
        // Even with the window long since clear, the lifetime budget is gone.
        assert!(!limiter.allow(start + Duration::from_secs(3600)));
        assert!(!limiter.allow(start + Duration::from_secs(7200)));
    }

    #[test]
    fn status_codes_map_to_distinct_errors() {
        assert!(matches!(classify_status(401), CaptureError::Unauthorized));
        assert!(matches!(classify_status(403), CaptureError::Forbidden));
        assert!(matches!(classify_status(429), CaptureError::RateLimited));
        assert!(matches!(classify_status(503), CaptureError::Service(503)));
    }

    fn stub_provider() -> Arc<dyn CredentialProvider> {
        let mut provider = MockCredentialProvider::new();
        provider
            .expect_ephemeral_token()
            .returning(|| Ok(SecretString::from("ephemeral-token".to_string())));
        Arc::new(provider)
    }

    #[tokio::test]
    async fn emits_finals_and_exactly_one_terminal_error_past_the_cap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connections = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let connections_count = connections.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                connections_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut ws = accept_async(stream).await.unwrap();
                // Expect the session_update, answer with one final, then die.
                let _ = ws.next().await;
                let _ = ws
                    .send(Message::Text(
                        r#"{"type":"transcription_completed","transcript":" hello world "}"#
                            .to_string(),
                    ))
                    .await;
                drop(ws);
            }
        });

        let config = CaptureConfig::new(&format!("ws://{addr}"))
            .with_reconnect_limits(10, 2)
            .with_reconnect_delay(Duration::from_millis(10));
        let (_capture, mut events) = SpeechCapture::start(config, stub_provider());

        let mut finals = 0;
        let mut errors = 0;
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for capture events")
        {
            match event {
                CaptureEvent::Final(text) => {
                    assert_eq!(text, "hello world");
                    finals += 1;
                }
                CaptureEvent::Error(e) => {
                    assert!(matches!(e, CaptureError::ReconnectExhausted));
                    errors += 1;
                }
                _ => {}
            }
        }
        // Channel closed => supervisor exited for good.
        assert_eq!(errors, 1, "exactly one terminal error");
        assert_eq!(finals, 3, "initial connection plus two reconnects");
        assert_eq!(connections.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn intentional_close_suppresses_reconnection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connections = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let connections_count = connections.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                connections_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut ws = accept_async(stream).await.unwrap();
                while ws.next().await.is_some() {}
            }
        });

        let config = CaptureConfig::new(&format!("ws://{addr}"))
            .with_reconnect_delay(Duration::from_millis(10));
        let (capture, mut events) = SpeechCapture::start(config, stub_provider());

        // Let the connection come up, then tear it down on purpose.
        tokio::time::sleep(Duration::from_millis(100)).await;
        capture.close();

        // The event channel closes without any terminal error.
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for capture shutdown")
        {
            assert!(
                !matches!(event, CaptureEvent::Error(_)),
                "intentional close must not surface an error"
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connections.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
