/// `session_started` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionStartedEvent {
    session_id: String,

    /// Index of the question the interview is currently on. Non-zero when the
    /// client reconnects to a session that is already under way.
    question_index: usize,

    total_questions: usize,
}

impl SessionStartedEvent {
    pub fn new(session_id: &str, question_index: usize, total_questions: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            question_index,
            total_questions,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn total_questions(&self) -> usize {
        self.total_questions
    }
}

/// `ai_message_start` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AiMessageStartEvent {}

impl AiMessageStartEvent {
    pub fn new() -> Self {
        Self {}
    }
}

/// `ai_message_token` event — one streamed text chunk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AiMessageTokenEvent {
    token: String,
}

impl AiMessageTokenEvent {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// `ai_message_end` event — carries the full assembled text so the client can
/// reconcile against whatever tokens it actually received.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AiMessageEndEvent {
    text: String,
}

impl AiMessageEndEvent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// `question_advanced` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuestionAdvancedEvent {
    index: usize,
    total: usize,
}

impl QuestionAdvancedEvent {
    pub fn new(index: usize, total: usize) -> Self {
        Self { index, total }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// `file_ready` event — an uploaded reference document finished processing
/// and its summary is now part of the interview context.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileReadyEvent {
    file_name: String,
}

impl FileReadyEvent {
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// `time_warning` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimeWarningEvent {
    remaining_seconds: u64,
}

impl TimeWarningEvent {
    pub fn new(remaining_seconds: u64) -> Self {
        Self { remaining_seconds }
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }
}

/// `time_expired` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TimeExpiredEvent {}

impl TimeExpiredEvent {
    pub fn new() -> Self {
        Self {}
    }
}

/// `interview_ended` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct InterviewEndedEvent {}

impl InterviewEndedEvent {
    pub fn new() -> Self {
        Self {}
    }
}

/// `error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    code: String,

    /// Human-readable message, safe to surface in the candidate UI.
    message: String,
}

impl ErrorEvent {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
