/// `candidate_transcript_final` event — one finalized speech segment. This is
/// the only transcript content the server ever receives.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CandidateTranscriptFinalEvent {
    text: String,
}

impl CandidateTranscriptFinalEvent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// `candidate_transcript_partial` event — an empty-content "still listening"
/// pulse. Partial transcript text never leaves the client.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CandidateTranscriptPartialEvent {}

impl CandidateTranscriptPartialEvent {
    pub fn new() -> Self {
        Self {}
    }
}

/// `candidate_interrupt` event — the candidate started talking over the
/// interviewer; playback was cut client-side.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CandidateInterruptEvent {}

impl CandidateInterruptEvent {
    pub fn new() -> Self {
        Self {}
    }
}

/// `mic_muted` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MicMutedEvent {
    muted: bool,
}

impl MicMutedEvent {
    pub fn new(muted: bool) -> Self {
        Self { muted }
    }

    pub fn muted(&self) -> bool {
        self.muted
    }
}

/// `end_interview` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EndInterviewEvent {}

impl EndInterviewEvent {
    pub fn new() -> Self {
        Self {}
    }
}
