use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use viva_core::Transport;
use viva_types::ServerEvent;

/// The orchestrator-facing side of one websocket connection: a narrow
/// `emit` capability backed by the connection's writer task.
#[derive(Clone)]
pub struct SocketTransport {
    tx: mpsc::Sender<ServerEvent>,
}

impl SocketTransport {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn emit(&self, event: ServerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("client connection closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_forwards_to_the_writer() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = SocketTransport::new(tx);
        transport
            .emit(ServerEvent::TimeExpired(
                viva_types::events::server::TimeExpiredEvent::new(),
            ))
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::TimeExpired(_)
        ));
    }

    #[tokio::test]
    async fn emit_errors_once_the_writer_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let transport = SocketTransport::new(tx);
        assert!(
            transport
                .emit(ServerEvent::TimeExpired(
                    viva_types::events::server::TimeExpiredEvent::new(),
                ))
                .await
                .is_err()
        );
    }
}
