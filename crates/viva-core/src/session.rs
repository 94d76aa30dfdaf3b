use chrono::{DateTime, Utc};

/// How many transcript turns a session keeps for model context. Older entries
/// fall off; the transcript is not a record, just a working window.
pub const TRANSCRIPT_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Fixed question list driven by the turn state machine.
    #[default]
    Structured,
    /// Free-form Q&A grounded in retrieved knowledge; no question index.
    Inquiry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Interviewer,
    Candidate,
}

/// One fixed interview question, snapshotted from template storage at session
/// start. Immutable for the life of the session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub rubric: String,
    pub max_followups: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub role: SpeakerRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// The live state of one interview session. The cache holds exactly one of
/// these per session token; every write replaces the whole record.
///
/// Field names serialize in camelCase because the record is shared with the
/// web client and the post-processing workers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub template_id: String,
    #[serde(default)]
    pub mode: SessionMode,
    pub current_question_index: usize,
    pub followups_used_current: u32,
    pub status: SessionStatus,
    pub questions: Vec<Question>,
    pub recent_transcript: Vec<TranscriptEntry>,
    #[serde(default)]
    pub candidate_files_summary: Option<String>,
}

impl SessionState {
    pub fn new(
        session_id: &str,
        template_id: &str,
        mode: SessionMode,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            template_id: template_id.to_string(),
            mode,
            current_question_index: 0,
            followups_used_current: 0,
            status: SessionStatus::InProgress,
            questions,
            recent_transcript: Vec::new(),
            candidate_files_summary: None,
        }
    }

    /// The question the interview is currently on, or `None` once the index
    /// has run past the end of the list.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question_index)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Pushes a transcript entry, dropping the oldest once the window is full.
    pub fn push_transcript(&mut self, role: SpeakerRole, content: &str) {
        self.recent_transcript.push(TranscriptEntry {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        if self.recent_transcript.len() > TRANSCRIPT_WINDOW {
            let excess = self.recent_transcript.len() - TRANSCRIPT_WINDOW;
            self.recent_transcript.drain(..excess);
        }
    }
}

/// A shallow partial update for `SessionStore::update`. Only the fields that
/// are `Some` are merged onto the stored record.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub followups_used_current: Option<u32>,
    pub candidate_files_summary: Option<String>,
}

impl SessionPatch {
    pub fn apply(self, state: &mut SessionState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(followups) = self.followups_used_current {
            state.followups_used_current = followups;
        }
        if let Some(summary) = self.candidate_files_summary {
            state.candidate_files_summary = Some(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {id}"),
            rubric: "rubric".to_string(),
            max_followups: 2,
        }
    }

    #[test]
    fn transcript_window_keeps_most_recent_in_order() {
        let mut state = SessionState::new("s1", "t1", SessionMode::Structured, vec![question("q0")]);
        for i in 0..(TRANSCRIPT_WINDOW + 1) {
            state.push_transcript(SpeakerRole::Candidate, &format!("turn {i}"));
        }
        assert_eq!(state.recent_transcript.len(), TRANSCRIPT_WINDOW);
        // Oldest entry ("turn 0") fell off; order is preserved.
        assert_eq!(state.recent_transcript[0].content, "turn 1");
        assert_eq!(
            state.recent_transcript.last().unwrap().content,
            format!("turn {TRANSCRIPT_WINDOW}")
        );
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let state = SessionState::new("s1", "t1", SessionMode::Structured, vec![question("q0")]);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["currentQuestionIndex"], 0);
        assert_eq!(json["followupsUsedCurrent"], 0);
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["questions"][0]["maxFollowups"], 2);
    }

    #[test]
    fn mode_defaults_to_structured_when_absent() {
        let json = r#"{
            "sessionId": "s1",
            "templateId": "t1",
            "currentQuestionIndex": 0,
            "followupsUsedCurrent": 0,
            "status": "in_progress",
            "questions": [],
            "recentTranscript": []
        }"#;
        let state: SessionState = serde_json::from_str(json).unwrap();
        assert_eq!(state.mode, SessionMode::Structured);
    }

    #[test]
    fn patch_merges_shallowly() {
        let mut state = SessionState::new("s1", "t1", SessionMode::Structured, vec![question("q0")]);
        state.push_transcript(SpeakerRole::Candidate, "hello");
        SessionPatch {
            status: Some(SessionStatus::Completed),
            ..Default::default()
        }
        .apply(&mut state);
        assert!(state.is_completed());
        // Untouched fields survive the merge.
        assert_eq!(state.recent_transcript.len(), 1);
    }
}
