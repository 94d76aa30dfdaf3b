use anyhow::Result;
use async_trait::async_trait;
use viva_types::ServerEvent;

#[cfg(test)]
use mockall::automock;

/// The one capability the orchestrator needs from whatever carries events to
/// the candidate. Keeping this narrow means the orchestrator never sees a
/// concrete socket type, and tests can record emissions directly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit(&self, event: ServerEvent) -> Result<()>;
}
