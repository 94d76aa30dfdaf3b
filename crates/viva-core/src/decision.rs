use crate::knowledge::Passage;
use crate::session::{Question, TranscriptEntry};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

/// What kind of turn the candidate just took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnType {
    Answer,
    Question,
    Meta,
}

/// The closed action set the decision model chooses from. Modeled as an enum
/// so that adding an action forces every dispatch site through the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    AskFollowup,
    AdvanceQuestion,
    AnswerCandidateQuestion,
    HandleMeta,
    EndInterview,
}

/// The strict structured-output contract of the decision model. Field names
/// match the model-side JSON schema exactly; anything that doesn't parse into
/// this shape is treated as a decision failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Decision {
    pub turn_type: TurnType,
    pub is_sufficient: bool,
    #[serde(default)]
    pub missing_points: Vec<String>,
    pub next_action: NextAction,
    #[serde(default)]
    pub followup_question: Option<String>,
    #[serde(default)]
    pub candidate_answer_summary: Option<String>,
    #[serde(default)]
    pub detected_candidate_question: Option<String>,
    #[serde(default)]
    pub kb_answer: Option<String>,
    #[serde(default)]
    pub kb_citations: Vec<String>,
    #[serde(default)]
    pub file_reference: Option<String>,
}

impl Decision {
    /// The deterministic fallback used when the decision call fails or
    /// returns something unparseable: keep the interview moving.
    pub fn fallback_advance() -> Self {
        Self {
            turn_type: TurnType::Answer,
            is_sufficient: false,
            missing_points: Vec::new(),
            next_action: NextAction::AdvanceQuestion,
            followup_question: None,
            candidate_answer_summary: None,
            detected_candidate_question: None,
            kb_answer: None,
            kb_citations: Vec::new(),
            file_reference: None,
        }
    }
}

/// Everything the decision model sees for one turn. Assembled fresh per turn
/// from the session record plus retrieval.
#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Current fixed question; `None` for inquiry-mode sessions.
    pub question: Option<Question>,
    pub followups_used: u32,
    pub transcript: Vec<TranscriptEntry>,
    pub utterance: String,
    pub files_summary: Option<String>,
    pub knowledge: Vec<Passage>,
}

/// The fast classifier that decides what happens after each candidate turn.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn decide(&self, ctx: TurnContext) -> Result<Decision>;
}

pub struct DecisionClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl DecisionClient {
    pub fn new(endpoint: &str, api_key: SecretString, model: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    fn build_user_prompt(ctx: &TurnContext) -> String {
        let mut prompt = String::new();

        match &ctx.question {
            Some(q) => {
                prompt.push_str(&format!(
                    "Current interview question: \"{}\"\nRubric: {}\nFollow-ups already used on this question: {} of {}\n\n",
                    q.text, q.rubric, ctx.followups_used, q.max_followups
                ));
            }
            None => prompt.push_str("This is an open inquiry session with no fixed question.\n\n"),
        }

        if !ctx.transcript.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for entry in &ctx.transcript {
                let role = match entry.role {
                    crate::session::SpeakerRole::Interviewer => "interviewer",
                    crate::session::SpeakerRole::Candidate => "candidate",
                };
                prompt.push_str(&format!("- {role}: {}\n", entry.content));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("Latest candidate utterance:\n\"{}\"\n\n", ctx.utterance));

        if let Some(summary) = &ctx.files_summary {
            prompt.push_str(&format!("Candidate's uploaded documents (summary):\n{summary}\n\n"));
        }

        if !ctx.knowledge.is_empty() {
            prompt.push_str("Reference passages (cite by number when answering a candidate question):\n");
            for (i, passage) in ctx.knowledge.iter().enumerate() {
                prompt.push_str(&format!("[{}] ({}) {}\n", i + 1, passage.source, passage.text));
            }
            prompt.push('\n');
        }

        prompt.push_str(
            r#"Classify the utterance and choose exactly one next action. Respond with STRICT JSON only:
{
  "turn_type": "answer" | "question" | "meta",
  "is_sufficient": true | false,
  "missing_points": ["<rubric point not yet covered>", ...],
  "next_action": "ask_followup" | "advance_question" | "answer_candidate_question" | "handle_meta" | "end_interview",
  "followup_question": "<string or null>",
  "candidate_answer_summary": "<string or null>",
  "detected_candidate_question": "<string or null>",
  "kb_answer": "<string or null>",
  "kb_citations": ["<passage number>", ...],
  "file_reference": "<string or null>"
}
Rules:
- "ask_followup" only when the answer is insufficient AND follow-up budget remains.
- "advance_question" when the answer is sufficient, or the follow-up budget is exhausted.
- "answer_candidate_question" when the candidate asked something; ground "kb_answer" ONLY in the reference passages, leave it null if they don't cover it.
- "handle_meta" for off-topic or procedural remarks.
- "end_interview" only when the candidate clearly asks to stop.
Do NOT add any explanation, just the JSON."#,
        );
        prompt
    }
}

const DECISION_SYSTEM_PROMPT: &str = "You are the turn-routing brain of a structured AI interview. \
You never talk to the candidate directly; you only emit one strict JSON decision per turn.";

#[async_trait]
impl DecisionModel for DecisionClient {
    async fn decide(&self, ctx: TurnContext) -> Result<Decision> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": DECISION_SYSTEM_PROMPT },
                { "role": "user", "content": Self::build_user_prompt(&ctx) }
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.1
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        let content = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("no choices in decision response"))?
            .message
            .content;

        let decision: Decision = serde_json::from_str(content)
            .map_err(|e| anyhow::anyhow!("decision output did not match contract: {e}: {content}"))?;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_decision_parses() {
        let json = r#"{
            "turn_type": "answer",
            "is_sufficient": false,
            "missing_points": ["no mention of indexing"],
            "next_action": "ask_followup",
            "followup_question": "How would indexes change that?",
            "candidate_answer_summary": "Described a full table scan.",
            "detected_candidate_question": null,
            "kb_answer": null,
            "kb_citations": [],
            "file_reference": null
        }"#;
        let decision: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(decision.next_action, NextAction::AskFollowup);
        assert_eq!(decision.missing_points.len(), 1);
        assert_eq!(
            decision.followup_question.as_deref(),
            Some("How would indexes change that?")
        );
    }

    #[test]
    fn minimal_decision_parses_with_defaults() {
        let json = r#"{"turn_type":"meta","is_sufficient":true,"next_action":"handle_meta"}"#;
        let decision: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(decision.next_action, NextAction::HandleMeta);
        assert!(decision.missing_points.is_empty());
        assert!(decision.kb_answer.is_none());
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        // An out-of-vocabulary action must fail parsing so the caller takes
        // the deterministic fallback path instead of guessing.
        let json = r#"{"turn_type":"answer","is_sufficient":true,"next_action":"repeat_question"}"#;
        assert!(serde_json::from_str::<Decision>(json).is_err());
    }

    #[test]
    fn fallback_is_advance() {
        assert_eq!(
            Decision::fallback_advance().next_action,
            NextAction::AdvanceQuestion
        );
    }

    #[test]
    fn prompt_includes_question_budget_and_passages() {
        let ctx = TurnContext {
            question: Some(Question {
                id: "q0".to_string(),
                text: "Explain TCP slow start.".to_string(),
                rubric: "mentions congestion window growth".to_string(),
                max_followups: 2,
            }),
            followups_used: 1,
            transcript: Vec::new(),
            utterance: "What does the rubric say?".to_string(),
            files_summary: None,
            knowledge: vec![Passage {
                source: "handbook.md".to_string(),
                text: "Slow start doubles cwnd per RTT.".to_string(),
                score: 0.9,
            }],
        };
        let prompt = DecisionClient::build_user_prompt(&ctx);
        assert!(prompt.contains("Explain TCP slow start."));
        assert!(prompt.contains("1 of 2"));
        assert!(prompt.contains("[1] (handbook.md)"));
    }
}
