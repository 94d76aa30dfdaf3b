//! Wire contracts for the external speech services: the realtime recognition
//! channel on the capture side and the synthesis request on the playback side.

/// Server-side voice activity detection settings for the recognition channel.
///
/// The defaults are tuned for conversational turn-taking: a short silence
/// window keeps the finalize latency under ~200ms without clipping slow
/// speakers mid-word.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VadConfig {
    /// Activation threshold (0.0 to 1.0).
    threshold: f32,

    /// Amount of audio to include before detected speech, in milliseconds.
    prefix_padding_ms: u32,

    /// Duration of silence that finalizes a segment, in milliseconds.
    silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 180,
        }
    }
}

impl VadConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_prefix_padding_ms(mut self, prefix_padding_ms: u32) -> Self {
        self.prefix_padding_ms = prefix_padding_ms;
        self
    }

    pub fn with_silence_duration_ms(mut self, silence_duration_ms: u32) -> Self {
        self.silence_duration_ms = silence_duration_ms;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn prefix_padding_ms(&self) -> u32 {
        self.prefix_padding_ms
    }

    pub fn silence_duration_ms(&self) -> u32 {
        self.silence_duration_ms
    }
}

/// Events sent to the recognition service.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum RecognitionClientEvent {
    /// Configure the recognition session. `create_response` stays false:
    /// transcription is a pure perception channel and response generation
    /// belongs entirely to the orchestrator.
    #[serde(rename = "session_update")]
    SessionUpdate(RecognitionSessionUpdate),
    #[serde(rename = "audio_append")]
    AudioAppend(AudioAppendEvent),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecognitionSessionUpdate {
    vad: VadConfig,
    create_response: bool,
}

impl RecognitionSessionUpdate {
    pub fn new(vad: VadConfig) -> Self {
        Self {
            vad,
            create_response: false,
        }
    }

    pub fn vad(&self) -> &VadConfig {
        &self.vad
    }

    pub fn create_response(&self) -> bool {
        self.create_response
    }
}

/// Base64-encoded PCM16 audio appended to the recognition input buffer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioAppendEvent {
    audio: String,
}

impl AudioAppendEvent {
    pub fn new(audio: String) -> Self {
        Self { audio }
    }

    pub fn audio(&self) -> &str {
        &self.audio
    }
}

/// Events received from the recognition service.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum RecognitionServerEvent {
    #[serde(rename = "transcription_completed")]
    TranscriptionCompleted(TranscriptionCompletedEvent),
    #[serde(rename = "speech_started")]
    SpeechStarted,
    #[serde(rename = "speech_stopped")]
    SpeechStopped,
    #[serde(rename = "error")]
    Error(RecognitionErrorEvent),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TranscriptionCompletedEvent {
    transcript: String,
}

impl TranscriptionCompletedEvent {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
        }
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecognitionErrorEvent {
    message: String,
}

impl RecognitionErrorEvent {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Request body for the speech-synthesis service. The response is a streamed
/// raw PCM16 byte body, not JSON.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SynthesisRequest {
    text: String,
    voice: String,
    model: String,
}

impl SynthesisRequest {
    pub fn new(text: &str, voice: &str, model: &str) -> Self {
        Self {
            text: text.to_string(),
            voice: voice.to_string(),
            model: model.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_disables_response_creation() {
        let update = RecognitionSessionUpdate::new(VadConfig::default());
        let json = serde_json::to_value(
            RecognitionClientEvent::SessionUpdate(update),
        )
        .unwrap();
        assert_eq!(json["type"], "session_update");
        assert_eq!(json["create_response"], false);
        assert_eq!(json["vad"]["silence_duration_ms"], 180);
    }

    #[test]
    fn recognition_events_deserialize_by_tag() {
        let event: RecognitionServerEvent = serde_json::from_str(
            r#"{"type":"transcription_completed","transcript":"hello there"}"#,
        )
        .unwrap();
        match event {
            RecognitionServerEvent::TranscriptionCompleted(e) => {
                assert_eq!(e.transcript(), "hello there")
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: RecognitionServerEvent =
            serde_json::from_str(r#"{"type":"speech_started"}"#).unwrap();
        assert!(matches!(event, RecognitionServerEvent::SpeechStarted));
    }
}
