use crate::audit::{AuditSink, EvaluationDecision};
use crate::decision::{Decision, DecisionModel, NextAction, TurnContext};
use crate::generation::ResponseGenerator;
use crate::jobs::PostProcessor;
use crate::knowledge::{
    HeuristicQuestionDetector, KnowledgeRetriever, Passage, QuestionDetector, TOP_K_DEFAULT,
    TOP_K_QUESTION,
};
use crate::session::{SessionMode, SessionState, SessionStatus, SpeakerRole};
use crate::store::SessionStore;
use crate::transport::Transport;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use viva_types::ServerEvent;
use viva_types::events::server::{
    AiMessageEndEvent, AiMessageStartEvent, AiMessageTokenEvent, InterviewEndedEvent,
    QuestionAdvancedEvent, SessionStartedEvent,
};

/// Spoken when the generation stream dies mid-utterance. The stream still
/// ends cleanly so the client always sees a well-formed message.
const APOLOGY_UTTERANCE: &str = "Sorry, I lost my train of thought for a second. Let's keep going.";

/// Spoken when the candidate asked something the knowledge base doesn't cover.
const NO_ANSWER_UTTERANCE: &str =
    "I don't have that information on hand, so I'll note your question for the team. Let's continue.";

const FAREWELL_UTTERANCE: &str =
    "That's everything I had for you today. Thanks for taking the time - the team will be in touch with next steps.";

const GENERATION_SYSTEM_PROMPT: &str = "You are a professional, friendly AI interviewer speaking \
out loud to a candidate. Keep utterances short, natural and spoken-word: no markdown, no lists, \
no stage directions.";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a completed session stays readable before the record is
    /// invalidated, so in-flight client reads can still finish.
    pub completion_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            completion_grace: Duration::from_secs(5),
        }
    }
}

/// Drives one turn of the interview per candidate transcript event.
///
/// All collaborators are injected; the orchestrator owns no connections of
/// its own. Per session it is the only writer of session state, which is what
/// makes the store's last-writer-wins semantics safe.
pub struct Orchestrator {
    store: SessionStore,
    decider: Arc<dyn DecisionModel>,
    generator: Arc<dyn ResponseGenerator>,
    knowledge: Arc<dyn KnowledgeRetriever>,
    detector: Arc<dyn QuestionDetector>,
    audit: Arc<dyn AuditSink>,
    jobs: Arc<dyn PostProcessor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: SessionStore,
        decider: Arc<dyn DecisionModel>,
        generator: Arc<dyn ResponseGenerator>,
        knowledge: Arc<dyn KnowledgeRetriever>,
        audit: Arc<dyn AuditSink>,
        jobs: Arc<dyn PostProcessor>,
    ) -> Self {
        Self {
            store,
            decider,
            generator,
            knowledge,
            detector: Arc::new(HeuristicQuestionDetector),
            audit,
            jobs,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn QuestionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Entry point for one finalized candidate utterance.
    pub async fn handle_transcript(
        &self,
        token: &str,
        transport: &dyn Transport,
        utterance: &str,
    ) -> Result<()> {
        let Some(state) = self.store.get(token).await? else {
            tracing::debug!(token, "transcript for unknown session, ignoring");
            return Ok(());
        };
        if state.is_completed() {
            tracing::debug!(token, "transcript after completion, ignoring");
            return Ok(());
        }

        // The candidate turn becomes part of the working transcript before
        // anything else looks at the session.
        let state = self
            .store
            .append_message(token, SpeakerRole::Candidate, utterance)
            .await?
            .unwrap_or(state);

        match state.mode {
            SessionMode::Structured => {
                self.structured_turn(token, transport, utterance, state).await
            }
            SessionMode::Inquiry => self.inquiry_turn(token, transport, utterance, state).await,
        }
    }

    /// Called when the transport channel for a session comes up. Emits the
    /// authoritative `session_started` snapshot; a fresh structured session
    /// also gets its first question delivered. Reconnects don't re-ask —
    /// the question is already in the transcript.
    pub async fn handle_session_start(
        &self,
        token: &str,
        transport: &dyn Transport,
    ) -> Result<()> {
        let Some(state) = self.store.get(token).await? else {
            return Ok(());
        };
        if state.is_completed() {
            return Ok(());
        }
        self.emit(
            transport,
            ServerEvent::SessionStarted(SessionStartedEvent::new(
                &state.session_id,
                state.current_question_index,
                state.questions.len(),
            )),
        )
        .await;

        if state.mode == SessionMode::Structured
            && state.current_question_index == 0
            && state.recent_transcript.is_empty()
        {
            if let Some(question) = state.current_question() {
                let text = question.text.clone();
                self.stream_verbatim(token, transport, &text).await?;
            }
        }
        Ok(())
    }

    /// Explicit end signal: the client's `end_interview` event or the session
    /// timer's `time_expired`. Safe to call more than once.
    pub async fn handle_end(&self, token: &str, transport: &dyn Transport) -> Result<()> {
        let Some(state) = self.store.get(token).await? else {
            return Ok(());
        };
        if state.is_completed() {
            return Ok(());
        }
        self.end_interview(token, transport).await
    }

    async fn structured_turn(
        &self,
        token: &str,
        transport: &dyn Transport,
        utterance: &str,
        state: SessionState,
    ) -> Result<()> {
        let knowledge = self.retrieve_context(token, utterance).await;

        let ctx = TurnContext {
            question: state.current_question().cloned(),
            followups_used: state.followups_used_current,
            transcript: state.recent_transcript.clone(),
            utterance: utterance.to_string(),
            files_summary: state.candidate_files_summary.clone(),
            knowledge,
        };

        let (mut decision, fallback) = match self.decider.decide(ctx).await {
            Ok(decision) => (decision, false),
            Err(e) => {
                tracing::warn!(
                    token,
                    question = state.current_question_index,
                    error = %e,
                    "decision model failed, falling back to advance"
                );
                (Decision::fallback_advance(), true)
            }
        };

        // The per-question follow-up budget is enforced here, not in the
        // store: an over-budget ask becomes an advance.
        if decision.next_action == NextAction::AskFollowup {
            if let Some(q) = state.current_question() {
                if state.followups_used_current >= q.max_followups {
                    tracing::debug!(
                        token,
                        question = state.current_question_index,
                        "follow-up budget exhausted, advancing instead"
                    );
                    decision.next_action = NextAction::AdvanceQuestion;
                }
            }
        }

        self.record_audit(&state, &decision, fallback);

        match decision.next_action {
            NextAction::AskFollowup => {
                self.store
                    .increment_followup(token)
                    .await
                    .context("recording follow-up use")?;
                let user_prompt = followup_prompt(&state, &decision, utterance);
                self.stream_generated(token, transport, user_prompt).await?;
            }
            NextAction::AdvanceQuestion => {
                self.advance(token, transport).await?;
            }
            NextAction::AnswerCandidateQuestion => match &decision.kb_answer {
                Some(answer) => {
                    let user_prompt = kb_answer_prompt(&decision, answer, utterance);
                    self.stream_generated(token, transport, user_prompt).await?;
                }
                None => {
                    self.stream_verbatim(token, transport, NO_ANSWER_UTTERANCE)
                        .await?;
                }
            },
            NextAction::HandleMeta => {
                let user_prompt = meta_prompt(&state, utterance);
                self.stream_generated(token, transport, user_prompt).await?;
            }
            NextAction::EndInterview => {
                self.end_interview(token, transport).await?;
            }
        }
        Ok(())
    }

    /// Inquiry sessions have no question machinery: every turn is a grounded
    /// answer straight from the generator.
    async fn inquiry_turn(
        &self,
        token: &str,
        transport: &dyn Transport,
        utterance: &str,
        state: SessionState,
    ) -> Result<()> {
        let knowledge = self.retrieve_context(token, utterance).await;
        let user_prompt = inquiry_prompt(&state, &knowledge, utterance);
        self.stream_generated(token, transport, user_prompt).await?;
        Ok(())
    }

    /// Knowledge lookup with depth picked by question detection. Retrieval is
    /// best-effort: on failure the turn proceeds with no passages.
    async fn retrieve_context(&self, token: &str, utterance: &str) -> Vec<Passage> {
        let (query, top_k) = match self.detector.detect(utterance) {
            Some(query) => (query, TOP_K_QUESTION),
            None => (utterance.to_string(), TOP_K_DEFAULT),
        };
        match self.knowledge.retrieve(&query, top_k).await {
            Ok(passages) => passages,
            Err(e) => {
                tracing::warn!(token, error = %e, "knowledge retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    async fn advance(&self, token: &str, transport: &dyn Transport) -> Result<()> {
        let Some(state) = self
            .store
            .advance_question(token)
            .await
            .context("advancing question")?
        else {
            return Ok(());
        };

        match state.current_question() {
            Some(question) => {
                self.emit(
                    transport,
                    ServerEvent::QuestionAdvanced(QuestionAdvancedEvent::new(
                        state.current_question_index,
                        state.questions.len(),
                    )),
                )
                .await;
                // Fixed questions are delivered verbatim; the generator never
                // rephrases them.
                let text = question.text.clone();
                self.stream_verbatim(token, transport, &text).await?;
            }
            None => {
                self.end_interview(token, transport).await?;
            }
        }
        Ok(())
    }

    async fn end_interview(&self, token: &str, transport: &dyn Transport) -> Result<()> {
        self.stream_verbatim(token, transport, FAREWELL_UTTERANCE)
            .await?;

        let state = self
            .store
            .update_status(token, SessionStatus::Completed)
            .await
            .context("marking session completed")?;

        if let Some(state) = state {
            let jobs = self.jobs.clone();
            let session_id = state.session_id.clone();
            tokio::spawn(async move {
                if let Err(e) = jobs.enqueue_summary(&session_id).await {
                    tracing::warn!(session = %session_id, error = %e, "failed to enqueue summary job");
                }
            });
        }

        self.emit(transport, ServerEvent::InterviewEnded(InterviewEndedEvent::new()))
            .await;

        // Leave the record readable for a moment so in-flight client reads
        // can complete, then drop it.
        let store = self.store.clone();
        let token = token.to_string();
        let grace = self.config.completion_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = store.invalidate(&token).await {
                tracing::warn!(token, error = %e, "failed to invalidate completed session");
            }
        });
        Ok(())
    }

    /// Streams a generator-phrased utterance: start, one event per token, end
    /// with the full text. A dead stream is patched with a short apology so
    /// the bracket always closes.
    async fn stream_generated(
        &self,
        token: &str,
        transport: &dyn Transport,
        user_prompt: String,
    ) -> Result<String> {
        self.emit(transport, ServerEvent::AiMessageStart(AiMessageStartEvent::new()))
            .await;

        let mut full = String::new();
        match self
            .generator
            .stream(GENERATION_SYSTEM_PROMPT.to_string(), user_prompt)
            .await
        {
            Ok(mut rx) => {
                let mut broke = false;
                while let Some(item) = rx.recv().await {
                    match item {
                        Ok(chunk) => {
                            self.emit(
                                transport,
                                ServerEvent::AiMessageToken(AiMessageTokenEvent::new(&chunk)),
                            )
                            .await;
                            full.push_str(&chunk);
                        }
                        Err(e) => {
                            tracing::warn!(token, error = %e, "generation stream broke mid-utterance");
                            broke = true;
                            break;
                        }
                    }
                }
                if broke {
                    if !full.is_empty() {
                        full.push(' ');
                    }
                    full.push_str(APOLOGY_UTTERANCE);
                    self.emit(
                        transport,
                        ServerEvent::AiMessageToken(AiMessageTokenEvent::new(APOLOGY_UTTERANCE)),
                    )
                    .await;
                }
            }
            Err(e) => {
                tracing::warn!(token, error = %e, "generation request failed");
                full.push_str(APOLOGY_UTTERANCE);
                self.emit(
                    transport,
                    ServerEvent::AiMessageToken(AiMessageTokenEvent::new(APOLOGY_UTTERANCE)),
                )
                .await;
            }
        }

        self.emit(transport, ServerEvent::AiMessageEnd(AiMessageEndEvent::new(&full)))
            .await;
        self.store
            .append_message(token, SpeakerRole::Interviewer, &full)
            .await
            .context("recording interviewer utterance")?;
        Ok(full)
    }

    /// Streams fixed text through the same start/token/end bracket the client
    /// expects for every AI message.
    async fn stream_verbatim(
        &self,
        token: &str,
        transport: &dyn Transport,
        text: &str,
    ) -> Result<()> {
        self.emit(transport, ServerEvent::AiMessageStart(AiMessageStartEvent::new()))
            .await;
        self.emit(transport, ServerEvent::AiMessageToken(AiMessageTokenEvent::new(text)))
            .await;
        self.emit(transport, ServerEvent::AiMessageEnd(AiMessageEndEvent::new(text)))
            .await;
        self.store
            .append_message(token, SpeakerRole::Interviewer, text)
            .await
            .context("recording interviewer utterance")?;
        Ok(())
    }

    fn record_audit(&self, state: &SessionState, decision: &Decision, fallback: bool) {
        let record = EvaluationDecision::from_decision(
            &state.session_id,
            state.current_question_index,
            state.followups_used_current,
            decision,
            fallback,
        );
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.record(record).await {
                tracing::warn!(error = %e, "failed to write audit record");
            }
        });
    }

    /// Emit failures mean the client is gone; the turn still has to finish
    /// writing its state, so they are logged rather than propagated.
    async fn emit(&self, transport: &dyn Transport, event: ServerEvent) {
        if let Err(e) = transport.emit(event).await {
            tracing::warn!(error = %e, "transport emit failed");
        }
    }
}

fn transcript_lines(state: &SessionState) -> String {
    state
        .recent_transcript
        .iter()
        .map(|entry| {
            let role = match entry.role {
                SpeakerRole::Interviewer => "interviewer",
                SpeakerRole::Candidate => "candidate",
            };
            format!("{role}: {}", entry.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn followup_prompt(state: &SessionState, decision: &Decision, utterance: &str) -> String {
    let question = state
        .current_question()
        .map(|q| q.text.as_str())
        .unwrap_or_default();
    let missing = decision.missing_points.join("; ");
    let seed = decision.followup_question.as_deref().unwrap_or_default();
    format!(
        "The interview question was: \"{question}\"\n\
         The candidate just said: \"{utterance}\"\n\
         Rubric points still missing: {missing}\n\
         Suggested follow-up: \"{seed}\"\n\
         Ask ONE short follow-up question that probes the missing points. Do not repeat the original question."
    )
}

fn meta_prompt(state: &SessionState, utterance: &str) -> String {
    format!(
        "Conversation so far:\n{}\n\nThe candidate said something off-topic or procedural: \"{utterance}\"\n\
         Acknowledge it briefly and steer back to the current question in one or two sentences.",
        transcript_lines(state)
    )
}

fn kb_answer_prompt(decision: &Decision, answer: &str, utterance: &str) -> String {
    let asked = decision
        .detected_candidate_question
        .as_deref()
        .unwrap_or(utterance);
    format!(
        "The candidate asked: \"{asked}\"\n\
         Grounded answer from the knowledge base: \"{answer}\"\n\
         Say that answer conversationally in one or two sentences, then invite them to continue with the question at hand. \
         Do not add facts beyond the grounded answer."
    )
}

fn inquiry_prompt(state: &SessionState, knowledge: &[Passage], utterance: &str) -> String {
    let mut prompt = String::new();
    if let Some(summary) = &state.candidate_files_summary {
        prompt.push_str(&format!("Uploaded document summary:\n{summary}\n\n"));
    }
    if !knowledge.is_empty() {
        prompt.push_str("Reference passages:\n");
        for passage in knowledge {
            prompt.push_str(&format!("- ({}) {}\n", passage.source, passage.text));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Conversation so far:\n{}\n\nThey said: \"{utterance}\"\n\
         Answer directly, grounded only in the material above. If the material doesn't cover it, say so honestly.",
        transcript_lines(state)
    ));
    prompt
}
