mod config;

use crate::config::{Config, INPUT_CHUNK_SIZE, OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};
use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::StreamTrait;
use rubato::{FastFixedIn, Resampler};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::time::ChronoLocal;
use viva_audio::capture::{CaptureConfig, HttpCredentialProvider, SpeechCapture};
use viva_audio::device;
use viva_audio::pcm::{self, SPEECH_SERVICE_SAMPLE_RATE};
use viva_audio::playback::{AudioSink, RingSink, SpeechPlayer, SynthesisConfig};
use viva_audio::CaptureEvent;
use viva_transport::{Channel, ChannelEvent};
use viva_types::events::client::{
    CandidateInterruptEvent, CandidateTranscriptFinalEvent, CandidateTranscriptPartialEvent,
};
use viva_types::{ClientEvent, ServerEvent};

#[derive(Parser)]
struct Cli {
    /// The session token issued by the gateway
    token: String,
}

/// Converts the 24kHz synthesis stream to the output device rate on its way
/// into the playback ring buffer.
struct ResamplingSink {
    inner: RingSink,
    resampler: Mutex<FastFixedIn<f32>>,
    pending: Mutex<Vec<f32>>,
    chunk_size: usize,
}

impl ResamplingSink {
    fn new(inner: RingSink, resampler: FastFixedIn<f32>, chunk_size: usize) -> Self {
        Self {
            inner,
            resampler: Mutex::new(resampler),
            pending: Mutex::new(Vec::new()),
            chunk_size,
        }
    }
}

impl AudioSink for ResamplingSink {
    fn write(&self, samples: &[f32]) {
        let (Ok(mut pending), Ok(mut resampler)) = (self.pending.lock(), self.resampler.lock())
        else {
            tracing::error!("resampling sink lock poisoned");
            return;
        };
        pending.extend_from_slice(samples);
        while pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = pending.drain(..self.chunk_size).collect();
            if let Ok(resampled) = resampler.process(&[chunk.as_slice()], None) {
                if let Some(resampled) = resampled.first() {
                    self.inner.write(resampled);
                }
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        self.inner.clear();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load client configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let cli = Cli::parse();

    // --- Microphone ---
    let input = device::get_or_default_input(None).context("Failed to open microphone")?;
    let (mic_tx, mut mic_rx) = tokio::sync::mpsc::channel::<Vec<f32>>(256);
    let (input_stream, input_rate) = device::build_capture_stream(&input, INPUT_CHUNK_SIZE, mic_tx)
        .context("Failed to build microphone stream")?;
    input_stream.play()?;
    tracing::info!("Microphone running at {input_rate} Hz");

    // --- Speakers ---
    let output = device::get_or_default_output(None).context("Failed to open speakers")?;
    let (ring_sink, consumer, flush) = RingSink::new(48000 * OUTPUT_LATENCY_MS / 1000);
    let (output_stream, output_rate) =
        device::build_playback_stream(&output, OUTPUT_CHUNK_SIZE, consumer, flush)
            .context("Failed to build playback stream")?;
    output_stream.play()?;
    tracing::info!("Speakers running at {output_rate} Hz");

    let out_resampler = pcm::resampler(SPEECH_SERVICE_SAMPLE_RATE, output_rate, OUTPUT_CHUNK_SIZE)?;
    let sink = Arc::new(ResamplingSink::new(ring_sink, out_resampler, OUTPUT_CHUNK_SIZE));

    let player = Arc::new(SpeechPlayer::new(
        SynthesisConfig::new(&config.synthesis_endpoint, config.speech_api_key.clone())
            .with_voice(&config.voice),
        sink,
    ));

    // --- Speech capture ---
    let provider = Arc::new(HttpCredentialProvider::new(
        &config.credential_endpoint,
        config.speech_api_key.clone(),
    ));
    let (capture, mut capture_events) =
        SpeechCapture::start(CaptureConfig::new(&config.recognition_url), provider);
    let capture_audio = capture.audio_sender();

    // Resample microphone chunks to the recognition rate and feed them in.
    let mut in_resampler = pcm::resampler(input_rate, SPEECH_SERVICE_SAMPLE_RATE, INPUT_CHUNK_SIZE)?;
    let mic_pump = tokio::spawn(async move {
        let mut buffer: VecDeque<f32> = VecDeque::with_capacity(INPUT_CHUNK_SIZE * 2);
        while let Some(frames) = mic_rx.recv().await {
            buffer.extend(frames);
            while buffer.len() >= INPUT_CHUNK_SIZE {
                let chunk: Vec<f32> = buffer.drain(..INPUT_CHUNK_SIZE).collect();
                if let Ok(resampled) = in_resampler.process(&[chunk.as_slice()], None) {
                    if let Some(resampled) = resampled.first() {
                        if capture_audio.send(resampled.clone()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    // --- Interview channel ---
    let channel = Arc::new(
        Channel::connect(viva_transport::Config::builder(&config.gateway_url, &cli.token).build())
            .await
            .context("Failed to connect to the interview gateway")?,
    );

    // Capture events: finals go to the gateway; speech-start during AI
    // playback is a barge-in.
    let capture_channel = channel.clone();
    let capture_player = player.clone();
    let capture_loop = tokio::spawn(async move {
        let speaking = capture_player.speaking();
        while let Some(event) = capture_events.recv().await {
            match event {
                CaptureEvent::Final(text) => {
                    tracing::info!("You said: \"{}\"", text);
                    if let Err(e) = capture_channel
                        .send(ClientEvent::CandidateTranscriptFinal(
                            CandidateTranscriptFinalEvent::new(&text),
                        ))
                        .await
                    {
                        tracing::error!("failed to send transcript: {:?}", e);
                    }
                }
                CaptureEvent::SpeechStarted => {
                    if *speaking.borrow() {
                        capture_player.stop();
                        let _ = capture_channel
                            .send(ClientEvent::CandidateInterrupt(
                                CandidateInterruptEvent::new(),
                            ))
                            .await;
                    } else {
                        // Contentless listening pulse.
                        let _ = capture_channel
                            .send(ClientEvent::CandidateTranscriptPartial(
                                CandidateTranscriptPartialEvent::new(),
                            ))
                            .await;
                    }
                }
                CaptureEvent::SpeechStopped => {}
                CaptureEvent::Error(e) => {
                    tracing::error!("speech capture failed: {}", e);
                    break;
                }
            }
        }
    });

    // Gateway events: completed AI messages get spoken; everything else is
    // informational.
    let mut channel_events = channel.events();
    let channel_player = player.clone();
    let channel_loop = tokio::spawn(async move {
        loop {
            let event = match channel_events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event consumer lagging");
                    continue;
                }
                Err(_) => break,
            };
            match event {
                ChannelEvent::Server(ServerEvent::AiMessageEnd(e)) => {
                    tracing::info!("Interviewer: \"{}\"", e.text());
                    // Cut anything still playing and wait for its teardown
                    // before starting the new utterance.
                    channel_player.stop();
                    channel_player.finished().await;
                    let player = channel_player.clone();
                    let text = e.text().to_string();
                    tokio::spawn(async move {
                        if let Err(err) = player.speak(&text).await {
                            tracing::error!("playback failed: {}", err);
                        }
                    });
                }
                ChannelEvent::Server(ServerEvent::QuestionAdvanced(e)) => {
                    tracing::info!("Question {} of {}", e.index() + 1, e.total());
                }
                ChannelEvent::Server(ServerEvent::TimeWarning(e)) => {
                    tracing::warn!("{} seconds remaining", e.remaining_seconds());
                }
                ChannelEvent::Server(ServerEvent::InterviewEnded(_)) => {
                    tracing::info!("Interview ended. Goodbye!");
                    break;
                }
                ChannelEvent::Server(ServerEvent::Error(e)) => {
                    tracing::error!("gateway error [{}]: {}", e.code(), e.message());
                }
                ChannelEvent::Resynced(state) => {
                    tracing::info!(
                        "Resynced: question={:?}, pending transcript={:?}",
                        state.last_question_index,
                        state.pending_transcript
                    );
                }
                ChannelEvent::Reconnecting { attempt, delay_ms } => {
                    tracing::warn!("Reconnecting (attempt {attempt}, in {delay_ms} ms)...");
                }
                ChannelEvent::Terminal { message } => {
                    tracing::error!("{}", message);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = capture_loop => {},
        _ = channel_loop => {},
        _ = mic_pump => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
        }
    }

    capture.close();
    channel.close();
    player.stop();
    tracing::info!("Shutting down...");
    Ok(())
}
