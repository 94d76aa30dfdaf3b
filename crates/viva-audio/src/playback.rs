use crate::device::DeviceError;
use crate::dsp::LevelMeter;
use crate::pcm;
use futures_util::{Stream, StreamExt};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use viva_types::speech::SynthesisRequest;

/// First scheduled chunk, kept small so audio starts as soon as possible.
pub const FIRST_CHUNK_BYTES: usize = 4096;
/// Steady-state chunk size, larger for smooth playback.
pub const STEADY_CHUNK_BYTES: usize = 16384;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("The speech service rejected the synthesis credentials. Please sign in again.")]
    Unauthorized,
    #[error("The speech service refused the synthesis request.")]
    Forbidden,
    #[error("The speech service is rate limiting synthesis. Try again in a moment.")]
    RateLimited,
    #[error("The speech service reported an error (HTTP {0}). Try again shortly.")]
    Service(u16),
    #[error("synthesis stream failed: {0}")]
    Network(String),
}

fn classify_status(status: u16) -> PlaybackError {
    match status {
        401 => PlaybackError::Unauthorized,
        403 => PlaybackError::Forbidden,
        429 => PlaybackError::RateLimited,
        other => PlaybackError::Service(other),
    }
}

/// Where decoded samples go. The device binding implements this over a ring
/// buffer; tests implement it over a Vec.
pub trait AudioSink: Send + Sync {
    fn write(&self, samples: &[f32]);
    /// Discards everything scheduled but not yet played.
    fn clear(&self);
}

/// Ring-buffer sink feeding the `cpal` output callback. `clear` is a flag the
/// callback honors before serving its next sample, since only the consumer
/// side can drop queued audio.
pub struct RingSink {
    producer: Mutex<HeapProd<f32>>,
    flush: Arc<AtomicBool>,
}

impl RingSink {
    /// Returns the sink plus the consumer half and flush flag for
    /// [`crate::device::build_playback_stream`].
    pub fn new(capacity: usize) -> (Self, HeapCons<f32>, Arc<AtomicBool>) {
        let (producer, consumer) = pcm::shared_buffer(capacity).split();
        let flush = Arc::new(AtomicBool::new(false));
        (
            Self {
                producer: Mutex::new(producer),
                flush: flush.clone(),
            },
            consumer,
            flush,
        )
    }
}

impl AudioSink for RingSink {
    fn write(&self, samples: &[f32]) {
        let Ok(mut producer) = self.producer.lock() else {
            tracing::error!("playback ring buffer lock poisoned");
            return;
        };
        for &sample in samples {
            if producer.try_push(sample).is_err() {
                tracing::warn!("playback buffer full, dropping samples");
                break;
            }
        }
    }

    fn clear(&self) {
        self.flush.store(true, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SynthesisConfig {
    endpoint: String,
    api_key: SecretString,
    voice: String,
    model: String,
}

impl SynthesisConfig {
    pub fn new(endpoint: &str, api_key: SecretString) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            voice: "sage".to_string(),
            model: "tts-1".to_string(),
        }
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.voice = voice.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

/// Playback side of the speech pipeline: fetches a synthesized byte stream
/// and schedules decoded chunks back-to-back into the sink.
///
/// `stop()` is safe at any point mid-stream: it aborts the fetch, drops all
/// scheduled audio and resolves any [`SpeechPlayer::finished`] waiter
/// immediately.
pub struct SpeechPlayer {
    http: reqwest::Client,
    config: SynthesisConfig,
    sink: Arc<dyn AudioSink>,
    stopping: AtomicBool,
    stop_notify: Notify,
    speaking_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    level_bits: AtomicU32,
}

impl SpeechPlayer {
    pub fn new(config: SynthesisConfig, sink: Arc<dyn AudioSink>) -> Self {
        let (speaking_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(true);
        Self {
            http: reqwest::Client::new(),
            config,
            sink,
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
            speaking_tx,
            done_tx,
            level_bits: AtomicU32::new(0),
        }
    }

    /// Speaks one utterance to completion (or until stopped).
    pub async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        let request = SynthesisRequest::new(text, &self.config.voice, &self.config.model);
        self.stopping.store(false, Ordering::Release);
        self.done_tx.send_replace(false);

        let resp = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.fail(PlaybackError::Network(e.to_string())))?;
        if !resp.status().is_success() {
            return Err(self.fail(classify_status(resp.status().as_u16())));
        }

        let stream = Box::pin(
            resp.bytes_stream()
                .map(|item| item.map_err(|e| PlaybackError::Network(e.to_string()))),
        );
        self.play_stream(stream).await
    }

    /// Hard stop. Safe to call at any time, from any task.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    /// Resolves when the current utterance has fully drained into the sink,
    /// errored, or been stopped.
    pub async fn finished(&self) {
        let mut rx = self.done_tx.subscribe();
        // An Err here means the player is being dropped, which also counts
        // as done.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Observes speaking-start / speaking-end transitions.
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Smoothed output level for UI animation.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    fn fail(&self, error: PlaybackError) -> PlaybackError {
        self.done_tx.send_replace(true);
        error
    }

    /// Core scheduling loop, split from `speak` so it can be driven by any
    /// byte stream.
    pub(crate) async fn play_stream<S>(&self, mut stream: S) -> Result<(), PlaybackError>
    where
        S: Stream<Item = Result<bytes::Bytes, PlaybackError>> + Unpin,
    {
        let mut buffer: Vec<u8> = Vec::new();
        let mut first_scheduled = false;
        let mut meter = LevelMeter::default();

        let result = loop {
            if self.stopping.load(Ordering::Acquire) {
                break Ok(());
            }
            tokio::select! {
                _ = self.stop_notify.notified() => {
                    break Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        self.drain_ready(&mut buffer, &mut first_scheduled, &mut meter);
                    }
                    Some(Err(e)) => break Err(e),
                    None => {
                        // Stream complete; flush whatever is left.
                        if !buffer.is_empty() {
                            self.schedule(&buffer, &mut first_scheduled, &mut meter);
                        }
                        break Ok(());
                    }
                },
            }
        };

        if self.stopping.load(Ordering::Acquire) {
            self.sink.clear();
        }
        self.speaking_tx.send_replace(false);
        self.level_bits.store(0f32.to_bits(), Ordering::Relaxed);
        self.done_tx.send_replace(true);
        result
    }

    /// Schedules every complete chunk currently buffered. The first chunk is
    /// deliberately small; the rest are large.
    fn drain_ready(&self, buffer: &mut Vec<u8>, first_scheduled: &mut bool, meter: &mut LevelMeter) {
        loop {
            let target = if *first_scheduled {
                STEADY_CHUNK_BYTES
            } else {
                FIRST_CHUNK_BYTES
            };
            if buffer.len() < target {
                return;
            }
            let chunk: Vec<u8> = buffer.drain(..target).collect();
            self.schedule(&chunk, first_scheduled, meter);
        }
    }

    fn schedule(&self, chunk: &[u8], first_scheduled: &mut bool, meter: &mut LevelMeter) {
        let samples = pcm::bytes_to_f32(chunk);
        if samples.is_empty() {
            return;
        }
        if !*first_scheduled {
            *first_scheduled = true;
            self.speaking_tx.send_replace(true);
        }
        let level = meter.update(&samples);
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
        self.sink.write(&samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct TestSink {
        writes: Mutex<Vec<usize>>,
        cleared: AtomicUsize,
    }

    impl AudioSink for TestSink {
        fn write(&self, samples: &[f32]) {
            self.writes.lock().unwrap().push(samples.len());
        }

        fn clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn player_with_sink() -> (Arc<SpeechPlayer>, Arc<TestSink>) {
        let sink = Arc::new(TestSink::default());
        let config = SynthesisConfig::new(
            "http://localhost:0/synthesize",
            SecretString::from("test-key".to_string()),
        );
        (
            Arc::new(SpeechPlayer::new(config, sink.clone())),
            sink,
        )
    }

    fn bytes_chunk(len: usize) -> bytes::Bytes {
        bytes::Bytes::from(vec![0x22u8; len])
    }

    #[tokio::test]
    async fn first_chunk_is_small_then_steady_state() {
        let (player, sink) = player_with_sink();
        let total = FIRST_CHUNK_BYTES + STEADY_CHUNK_BYTES + 1000;
        let stream =
            futures::stream::iter(vec![Ok::<_, PlaybackError>(bytes_chunk(total))]);

        player.play_stream(stream).await.unwrap();

        let writes = sink.writes.lock().unwrap().clone();
        assert_eq!(
            writes,
            vec![FIRST_CHUNK_BYTES / 2, STEADY_CHUNK_BYTES / 2, 500],
            "small first chunk, large steady chunks, flushed tail"
        );
    }

    #[tokio::test]
    async fn completion_resolves_finished_and_speaking_transitions() {
        let (player, _sink) = player_with_sink();
        let mut speaking = player.speaking();
        player.done_tx.send_replace(false);

        // Two chunks far enough apart that the speaking=true window is
        // observable from this task.
        let stream = Box::pin(futures::stream::unfold(0u32, |n| async move {
            if n >= 2 {
                return None;
            }
            if n > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Some((Ok::<_, PlaybackError>(bytes_chunk(FIRST_CHUNK_BYTES)), n + 1))
        }));

        let play = {
            let player = player.clone();
            tokio::spawn(async move { player.play_stream(stream).await })
        };

        speaking.wait_for(|s| *s).await.unwrap();
        speaking.wait_for(|s| !*s).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), player.finished())
            .await
            .expect("finished() must resolve on completion");
        play.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_mid_stream_cuts_audio_and_resolves_waiter() {
        let (player, sink) = player_with_sink();
        player.done_tx.send_replace(false);

        // A slow multi-chunk stream: one chunk every 30ms.
        let stream = Box::pin(futures::stream::unfold(0u32, |n| async move {
            if n >= 20 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            Some((Ok::<_, PlaybackError>(bytes_chunk(FIRST_CHUNK_BYTES)), n + 1))
        }));

        let play = {
            let player = player.clone();
            tokio::spawn(async move { player.play_stream(stream).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        player.stop();

        // The pending waiter resolves promptly instead of hanging.
        tokio::time::timeout(Duration::from_millis(100), player.finished())
            .await
            .expect("finished() must resolve immediately after stop()");
        play.await.unwrap().unwrap();

        // Scheduled audio was dropped and nothing further arrives.
        assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);
        let writes_at_stop = sink.writes.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(sink.writes.lock().unwrap().len(), writes_at_stop);
    }

    #[tokio::test]
    async fn stream_error_still_resolves_finished() {
        let (player, _sink) = player_with_sink();
        player.done_tx.send_replace(false);
        let stream = futures::stream::iter(vec![
            Ok(bytes_chunk(256)),
            Err(PlaybackError::Network("connection reset".to_string())),
        ]);

        let result = player.play_stream(stream).await;
        assert!(matches!(result, Err(PlaybackError::Network(_))));
        tokio::time::timeout(Duration::from_millis(100), player.finished())
            .await
            .expect("finished() must resolve on stream error");
    }

    #[tokio::test]
    async fn level_follows_scheduled_audio() {
        let (player, _sink) = player_with_sink();
        // Loud PCM16 samples: 0x7fff repeated.
        let loud: Vec<u8> = std::iter::repeat([0xff, 0x7f])
            .take(FIRST_CHUNK_BYTES / 2)
            .flatten()
            .collect();
        let stream =
            futures::stream::iter(vec![Ok::<_, PlaybackError>(bytes::Bytes::from(loud))]);
        player.play_stream(stream).await.unwrap();
        // Level resets to zero once playback finishes.
        assert_eq!(player.level(), 0.0);
    }
}
