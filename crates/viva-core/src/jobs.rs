use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Hand-off to the external background-job system. The only job the engine
/// enqueues itself is the post-interview summary.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn enqueue_summary(&self, session_id: &str) -> Result<()>;
}

/// No-op processor for tests and local runs.
#[derive(Debug, Default)]
pub struct NoopPostProcessor;

#[async_trait]
impl PostProcessor for NoopPostProcessor {
    async fn enqueue_summary(&self, session_id: &str) -> Result<()> {
        tracing::debug!(session = %session_id, "summary job skipped (noop processor)");
        Ok(())
    }
}
