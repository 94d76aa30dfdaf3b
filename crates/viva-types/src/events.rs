pub mod client;
pub mod server;

use client::*;
use server::*;

/// Events travelling server -> client over the interview channel.
///
/// The `type` tags are a cross-component wire contract shared with the web
/// client; they must stay stable even when the Rust-side names change.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session_started")]
    SessionStarted(SessionStartedEvent),
    #[serde(rename = "ai_message_start")]
    AiMessageStart(AiMessageStartEvent),
    #[serde(rename = "ai_message_token")]
    AiMessageToken(AiMessageTokenEvent),
    #[serde(rename = "ai_message_end")]
    AiMessageEnd(AiMessageEndEvent),
    #[serde(rename = "question_advanced")]
    QuestionAdvanced(QuestionAdvancedEvent),
    #[serde(rename = "file_ready")]
    FileReady(FileReadyEvent),
    #[serde(rename = "time_warning")]
    TimeWarning(TimeWarningEvent),
    #[serde(rename = "time_expired")]
    TimeExpired(TimeExpiredEvent),
    #[serde(rename = "interview_ended")]
    InterviewEnded(InterviewEndedEvent),
    #[serde(rename = "error")]
    Error(ErrorEvent),
}

/// Events travelling client -> server over the interview channel.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "candidate_transcript_final")]
    CandidateTranscriptFinal(CandidateTranscriptFinalEvent),
    #[serde(rename = "candidate_transcript_partial")]
    CandidateTranscriptPartial(CandidateTranscriptPartialEvent),
    #[serde(rename = "candidate_interrupt")]
    CandidateInterrupt(CandidateInterruptEvent),
    #[serde(rename = "mic_muted")]
    MicMuted(MicMutedEvent),
    #[serde(rename = "end_interview")]
    EndInterview(EndInterviewEvent),
}
