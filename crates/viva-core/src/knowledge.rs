use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

#[cfg(test)]
use mockall::automock;

/// Passages fetched when the candidate asks something, where a wider net is
/// worth the extra context.
pub const TOP_K_QUESTION: usize = 7;
/// Passages fetched for ordinary answer turns.
pub const TOP_K_DEFAULT: usize = 5;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Passage {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// External knowledge-base lookup used to ground answers to candidate
/// questions. Consumed as a black box.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

/// Decides whether a candidate utterance is a question (rather than an
/// answer) and, if so, extracts the retrieval query for it. Pluggable so the
/// heuristic can be swapped for a model-based classifier later.
pub trait QuestionDetector: Send + Sync {
    /// Returns the extracted retrieval query when the utterance looks like a
    /// question, `None` otherwise.
    fn detect(&self, utterance: &str) -> Option<String>;
}

/// Cheap lexical detector: a trailing question mark, or a final sentence that
/// opens with an interrogative. Good enough to pick the retrieval depth; the
/// decision model makes the authoritative turn classification.
#[derive(Debug, Default)]
pub struct HeuristicQuestionDetector;

const INTERROGATIVES: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can", "could", "would", "should",
    "do", "does", "did", "is", "are", "will",
];

impl HeuristicQuestionDetector {
    fn last_sentence(utterance: &str) -> &str {
        utterance
            .rsplit(['.', '!'])
            .find(|s| !s.trim().is_empty())
            .unwrap_or(utterance)
            .trim()
    }
}

impl QuestionDetector for HeuristicQuestionDetector {
    fn detect(&self, utterance: &str) -> Option<String> {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return None;
        }

        let sentence = Self::last_sentence(trimmed);
        if trimmed.ends_with('?') {
            return Some(sentence.trim_end_matches('?').trim().to_string());
        }

        let first_word = sentence
            .split_whitespace()
            .next()
            .map(|w| w.to_lowercase())?;
        if INTERROGATIVES.contains(&first_word.as_str()) {
            return Some(sentence.to_string());
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    passages: Vec<Passage>,
}

/// HTTP client for the knowledge-retrieval collaborator.
pub struct KnowledgeClient {
    client: Client,
    endpoint: String,
}

impl KnowledgeClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl KnowledgeRetriever for KnowledgeClient {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let body = serde_json::json!({ "query": query, "top_k": top_k });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<RetrievalResponse>()
            .await?;
        Ok(resp.passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_detected_and_stripped() {
        let detector = HeuristicQuestionDetector;
        assert_eq!(
            detector.detect("By the way, what benefits does the role include?"),
            Some("By the way, what benefits does the role include".to_string())
        );
    }

    #[test]
    fn interrogative_opening_without_question_mark() {
        let detector = HeuristicQuestionDetector;
        assert_eq!(
            detector.detect("how does the on-call rotation work"),
            Some("how does the on-call rotation work".to_string())
        );
    }

    #[test]
    fn last_sentence_is_the_query() {
        let detector = HeuristicQuestionDetector;
        let query = detector
            .detect("I think that covers it. What's the next step?")
            .unwrap();
        assert_eq!(query, "What's the next step");
    }

    #[test]
    fn plain_answers_are_not_questions() {
        let detector = HeuristicQuestionDetector;
        assert!(detector.detect("I would shard the table by tenant id.").is_none());
        assert!(detector.detect("").is_none());
    }
}
