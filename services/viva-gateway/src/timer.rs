use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use viva_core::Transport;
use viva_types::ServerEvent;
use viva_types::events::server::{TimeExpiredEvent, TimeWarningEvent};

/// The session wall clock: one warning, then expiry. Both timers are owned
/// here and die with the connection — dropping the timer aborts them, so a
/// torn-down connection can't fire stale events.
pub struct SessionTimer {
    warning: tokio::task::JoinHandle<()>,
    expiry: tokio::task::JoinHandle<()>,
}

impl SessionTimer {
    pub fn start<F, Fut>(
        transport: Arc<dyn Transport>,
        total: Duration,
        warn_before: Duration,
        on_expired: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let warn_after = total.saturating_sub(warn_before);
        let warning_transport = transport.clone();
        let warning = tokio::spawn(async move {
            tokio::time::sleep(warn_after).await;
            let remaining = (total - warn_after).as_secs();
            if let Err(e) = warning_transport
                .emit(ServerEvent::TimeWarning(TimeWarningEvent::new(remaining)))
                .await
            {
                tracing::debug!(error = %e, "time warning not delivered");
            }
        });

        let expiry = tokio::spawn(async move {
            tokio::time::sleep(total).await;
            if let Err(e) = transport
                .emit(ServerEvent::TimeExpired(TimeExpiredEvent::new()))
                .await
            {
                tracing::debug!(error = %e, "time expiry not delivered");
            }
            // Expiry is treated exactly like an explicit end signal.
            on_expired().await;
        });

        Self { warning, expiry }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.warning.abort();
        self.expiry.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingTransport {
        events: Mutex<Vec<ServerEvent>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn emit(&self, event: ServerEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn fires_warning_then_expiry_then_end_hook() {
        let transport = Arc::new(RecordingTransport {
            events: Mutex::new(Vec::new()),
        });
        let ended = Arc::new(AtomicBool::new(false));
        let ended_flag = ended.clone();

        let _timer = SessionTimer::start(
            transport.clone(),
            Duration::from_millis(80),
            Duration::from_millis(40),
            move || async move {
                ended_flag.store(true, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        let events = transport.events.lock().unwrap();
        assert!(matches!(events[0], ServerEvent::TimeWarning(_)));
        assert!(matches!(events[1], ServerEvent::TimeExpired(_)));
        assert!(ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_the_timer_cancels_everything() {
        let transport = Arc::new(RecordingTransport {
            events: Mutex::new(Vec::new()),
        });

        let timer = SessionTimer::start(
            transport.clone(),
            Duration::from_millis(50),
            Duration::from_millis(20),
            || async {},
        );
        drop(timer);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(transport.events.lock().unwrap().is_empty());
    }
}
