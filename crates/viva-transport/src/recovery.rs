use std::time::Duration;
use viva_types::{ClientEvent, ServerEvent};

/// Delay before reconnect attempt `attempt` (1-based): doubles from `base`,
/// capped at `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2u32.saturating_pow(exp)).min(cap)
}

/// The client's local cache of the last server-confirmed facts, surfaced on
/// reconnect so the UI can resynchronize optimistically. Never authoritative:
/// the server re-emits whatever actually matters once the orchestrator
/// continues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconnectionState {
    pub last_question_index: Option<usize>,
    pub last_ai_message: Option<String>,
    /// The last finalized transcript sent but not yet acknowledged by any
    /// server activity.
    pub pending_transcript: Option<String>,
}

impl ReconnectionState {
    /// Folds an observed server event into the cached view.
    pub fn observe(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::SessionStarted(e) => {
                self.last_question_index = Some(e.question_index());
            }
            ServerEvent::QuestionAdvanced(e) => {
                self.last_question_index = Some(e.index());
            }
            ServerEvent::AiMessageStart(_) => {
                // The orchestrator is responding, so our last transcript made
                // it through.
                self.pending_transcript = None;
            }
            ServerEvent::AiMessageEnd(e) => {
                self.last_ai_message = Some(e.text().to_string());
            }
            _ => {}
        }
    }

    /// Notes an outbound event so it can be re-surfaced if the connection
    /// drops before the server reacts to it.
    pub fn note_sent(&mut self, event: &ClientEvent) {
        if let ClientEvent::CandidateTranscriptFinal(e) = event {
            self.pending_transcript = Some(e.text().to_string());
        }
    }
}
