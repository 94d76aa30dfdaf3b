use crate::decision::{Decision, NextAction, TurnType};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

#[cfg(test)]
use mockall::automock;

/// Append-only audit record written once per orchestrated turn. Consumed by
/// durable storage outside this system; from here it is write-only and
/// fire-and-forget — a failed write never blocks the turn.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDecision {
    pub session_id: String,
    pub question_index: usize,
    pub followups_used: u32,
    pub turn_type: TurnType,
    pub is_sufficient: bool,
    pub next_action: NextAction,
    pub followup_question: Option<String>,
    /// True when the recorded action came from the deterministic fallback
    /// rather than the model.
    pub fallback: bool,
    pub recorded_at: DateTime<Utc>,
}

impl EvaluationDecision {
    pub fn from_decision(
        session_id: &str,
        question_index: usize,
        followups_used: u32,
        decision: &Decision,
        fallback: bool,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            question_index,
            followups_used,
            turn_type: decision.turn_type,
            is_sufficient: decision.is_sufficient,
            next_action: decision.next_action,
            followup_question: decision.followup_question.clone(),
            fallback,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, decision: EvaluationDecision) -> Result<()>;
}

/// Posts each record to the audit collaborator.
pub struct HttpAuditSink {
    client: Client,
    endpoint: String,
}

impl HttpAuditSink {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn record(&self, decision: EvaluationDecision) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&decision)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Sink that only logs. Useful for local runs without the audit collaborator.
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, decision: EvaluationDecision) -> Result<()> {
        tracing::info!(
            session = %decision.session_id,
            question = decision.question_index,
            action = ?decision.next_action,
            fallback = decision.fallback,
            "turn decision"
        );
        Ok(())
    }
}
