use crate::session::{SessionPatch, SessionState, SessionStatus, SpeakerRole, TRANSCRIPT_WINDOW};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(test)]
use mockall::automock;

/// Default lifetime of a cached session record. Refreshed on every write, so
/// an active interview never expires under the orchestrator.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Errors from the session store. A missing key is not an error — operations
/// return `Ok(None)` for that — so anything here means the backing store
/// itself failed and the turn must fail hard rather than fake success.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode session state: {0}")]
    Codec(#[from] serde_json::Error),
}

/// The raw keyed cache underneath the session store. The production
/// deployment points this at Redis; tests and the single-node gateway use
/// [`MemoryBackend`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory cache backend with per-key expiry instants. Expiry is checked
/// lazily on read, which is all the TTL contract requires.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if Instant::now() < *expires_at {
                return Ok(Some(value.clone()));
            }
        }
        // Either absent or expired; drop the stale entry on the way out.
        self.entries.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Keyed store for live session state, one record per session token.
///
/// Every operation is an independent round trip to the backing store: read
/// the most recent record, mutate, write the whole record back. `update` and
/// friends are therefore NOT atomic — concurrent writers on the same token
/// can lose a write (last-writer-wins). That is an accepted trade-off: each
/// session has exactly one writer (its orchestrator). Do not add a second
/// writer without moving to versioned writes first.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(token: &str) -> String {
        format!("session:{token}")
    }

    pub async fn get(&self, token: &str) -> Result<Option<SessionState>, StoreError> {
        match self.backend.get(&Self::key(token)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Full overwrite; resets the TTL.
    pub async fn set(&self, token: &str, state: &SessionState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state)?;
        self.backend.put(&Self::key(token), raw, self.ttl).await
    }

    /// Read-modify-write with a shallow merge. Returns the merged record, or
    /// `None` if the session is absent.
    pub async fn update(
        &self,
        token: &str,
        patch: SessionPatch,
    ) -> Result<Option<SessionState>, StoreError> {
        self.mutate(token, move |state| patch.apply(state)).await
    }

    pub async fn append_message(
        &self,
        token: &str,
        role: SpeakerRole,
        content: &str,
    ) -> Result<Option<SessionState>, StoreError> {
        let content = content.to_string();
        self.mutate(token, move |state| {
            state.push_transcript(role, &content);
            debug_assert!(state.recent_transcript.len() <= TRANSCRIPT_WINDOW);
        })
        .await
    }

    /// Moves the session to the next question: index +1, follow-up counter
    /// zeroed, transcript cleared.
    pub async fn advance_question(
        &self,
        token: &str,
    ) -> Result<Option<SessionState>, StoreError> {
        self.mutate(token, |state| {
            state.current_question_index += 1;
            state.followups_used_current = 0;
            state.recent_transcript.clear();
        })
        .await
    }

    pub async fn increment_followup(
        &self,
        token: &str,
    ) -> Result<Option<SessionState>, StoreError> {
        self.mutate(token, |state| state.followups_used_current += 1)
            .await
    }

    pub async fn update_status(
        &self,
        token: &str,
        status: SessionStatus,
    ) -> Result<Option<SessionState>, StoreError> {
        self.mutate(token, move |state| state.status = status).await
    }

    pub async fn set_files_summary(
        &self,
        token: &str,
        text: &str,
    ) -> Result<Option<SessionState>, StoreError> {
        let text = text.to_string();
        self.mutate(token, move |state| {
            // Append-only until invalidation.
            match &mut state.candidate_files_summary {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&text);
                }
                None => state.candidate_files_summary = Some(text),
            }
        })
        .await
    }

    /// Deletes the record immediately rather than waiting for TTL expiry.
    pub async fn invalidate(&self, token: &str) -> Result<(), StoreError> {
        self.backend.delete(&Self::key(token)).await
    }

    async fn mutate<F>(&self, token: &str, f: F) -> Result<Option<SessionState>, StoreError>
    where
        F: FnOnce(&mut SessionState),
    {
        let Some(mut state) = self.get(token).await? else {
            return Ok(None);
        };
        f(&mut state);
        self.set(token, &state).await?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Question, SessionMode};

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryBackend::new()))
    }

    fn seeded_state(n_questions: usize) -> SessionState {
        let questions = (0..n_questions)
            .map(|i| Question {
                id: format!("q{i}"),
                text: format!("Question {i}?"),
                rubric: "covers the basics".to_string(),
                max_followups: 2,
            })
            .collect();
        SessionState::new("s1", "tmpl-1", SessionMode::Structured, questions)
    }

    #[tokio::test]
    async fn get_is_idempotent_without_intervening_writes() {
        let store = store();
        store.set("tok", &seeded_state(3)).await.unwrap();

        let first = store.get("tok").await.unwrap().unwrap();
        let second = store.get("tok").await.unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn missing_token_returns_none_not_error() {
        let store = store();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.increment_followup("nope").await.unwrap().is_none());
        assert!(store.advance_question("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_message_enforces_the_window_bound() {
        let store = store();
        store.set("tok", &seeded_state(1)).await.unwrap();

        for i in 0..(TRANSCRIPT_WINDOW + 1) {
            store
                .append_message("tok", SpeakerRole::Candidate, &format!("turn {i}"))
                .await
                .unwrap();
        }

        let state = store.get("tok").await.unwrap().unwrap();
        assert_eq!(state.recent_transcript.len(), TRANSCRIPT_WINDOW);
        assert_eq!(state.recent_transcript[0].content, "turn 1");
        assert_eq!(
            state.recent_transcript.last().unwrap().content,
            format!("turn {TRANSCRIPT_WINDOW}")
        );
    }

    #[tokio::test]
    async fn advance_question_resets_followups_and_transcript() {
        let store = store();
        store.set("tok", &seeded_state(3)).await.unwrap();
        store.increment_followup("tok").await.unwrap();
        store
            .append_message("tok", SpeakerRole::Candidate, "some answer")
            .await
            .unwrap();

        let state = store.advance_question("tok").await.unwrap().unwrap();
        assert_eq!(state.current_question_index, 1);
        assert_eq!(state.followups_used_current, 0);
        assert!(state.recent_transcript.is_empty());
    }

    #[tokio::test]
    async fn invalidate_then_get_returns_absent() {
        let store = store();
        store.set("tok", &seeded_state(1)).await.unwrap();
        store.invalidate("tok").await.unwrap();
        assert!(store.get("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = SessionStore::new(Arc::new(MemoryBackend::new()))
            .with_ttl(Duration::from_millis(20));
        store.set("tok", &seeded_state(1)).await.unwrap();
        assert!(store.get("tok").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_refresh_the_ttl() {
        let store = SessionStore::new(Arc::new(MemoryBackend::new()))
            .with_ttl(Duration::from_millis(60));
        store.set("tok", &seeded_state(1)).await.unwrap();

        // Keep writing past the original expiry; the record must survive.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            store
                .append_message("tok", SpeakerRole::Candidate, "still here")
                .await
                .unwrap();
        }
        assert!(store.get("tok").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn files_summary_accumulates() {
        let store = store();
        store.set("tok", &seeded_state(1)).await.unwrap();
        store.set_files_summary("tok", "resume: 5y Rust").await.unwrap();
        let state = store
            .set_files_summary("tok", "portfolio: 3 services")
            .await
            .unwrap()
            .unwrap();
        let summary = state.candidate_files_summary.unwrap();
        assert!(summary.contains("resume: 5y Rust"));
        assert!(summary.contains("portfolio: 3 services"));
    }
}
