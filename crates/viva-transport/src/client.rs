use crate::config::Config;
use crate::recovery::{ReconnectionState, backoff_delay};
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use viva_types::{ClientEvent, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the connection went away. Server-initiated closes are deliberate and
/// never retried; network failures feed the reconnection loop.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    Server(Option<String>),
    Network(String),
}

/// Everything the channel surfaces to its owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connection established. `reconnect` is false only for the first one.
    Connected { reconnect: bool },
    /// On every reconnect (never the first connect): the locally cached
    /// state for optimistic UI resync.
    Resynced(ReconnectionState),
    Server(ServerEvent),
    Disconnected(DisconnectReason),
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnection budget exhausted; the session needs a fresh page load.
    Terminal { message: String },
    /// Deliberate local teardown finished.
    Closed,
}

const TERMINAL_MESSAGE: &str = "Connection lost. Please refresh the page to continue.";

enum Phase {
    Retry(u32),
    Shutdown,
}

/// Client side of the interview channel: a persistent, ordered, bidirectional
/// event stream that survives network blips.
///
/// Outbound events are accepted at any time; while the socket is down they
/// queue in memory and flush, in original order, as soon as the connection is
/// back. Incoming events are fanned out over a broadcast channel.
pub struct Channel {
    outbound_tx: tokio::sync::mpsc::Sender<ClientEvent>,
    events_tx: tokio::sync::broadcast::Sender<ChannelEvent>,
    close_tx: tokio::sync::watch::Sender<bool>,
}

impl Channel {
    /// Connects and spawns the supervisor. The initial connect is not
    /// retried: a session that can't be reached even once is surfaced to the
    /// caller directly.
    pub async fn connect(config: Config) -> Result<Self> {
        let request = config.build_request()?;
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;

        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(config.capacity());
        let (events_tx, _) = tokio::sync::broadcast::channel(config.capacity());
        let (close_tx, close_rx) = tokio::sync::watch::channel(false);

        let supervisor_events = events_tx.clone();
        tokio::spawn(run_supervisor(
            config,
            ws,
            outbound_rx,
            supervisor_events,
            close_rx,
        ));

        Ok(Self {
            outbound_tx,
            events_tx,
            close_tx,
        })
    }

    /// Queues an event for delivery. Ordering is preserved across
    /// disconnects; delivery is at-most-once per event.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.outbound_tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("channel supervisor has shut down"))
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    /// Deliberate teardown: closes the socket and suppresses reconnection.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }
}

async fn run_supervisor(
    config: Config,
    initial: WsStream,
    mut outbound_rx: tokio::sync::mpsc::Receiver<ClientEvent>,
    events_tx: tokio::sync::broadcast::Sender<ChannelEvent>,
    mut close_rx: tokio::sync::watch::Receiver<bool>,
) {
    let mut ws = Some(initial);
    let mut attempt: u32 = 0;
    let mut first = true;
    let mut pending: VecDeque<ClientEvent> = VecDeque::new();
    let mut recon = ReconnectionState::default();

    loop {
        let stream = match ws.take() {
            Some(stream) => stream,
            None => match config.build_request() {
                Ok(request) => match tokio_tungstenite::connect_async(request).await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                        match schedule_retry(&config, attempt, &events_tx, &mut close_rx).await {
                            Phase::Retry(next) => {
                                attempt = next;
                                continue;
                            }
                            Phase::Shutdown => return,
                        }
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "failed to build handshake request");
                    let _ = events_tx.send(ChannelEvent::Terminal {
                        message: TERMINAL_MESSAGE.to_string(),
                    });
                    return;
                }
            },
        };

        attempt = 0;
        let _ = events_tx.send(ChannelEvent::Connected { reconnect: !first });
        if !first {
            let _ = events_tx.send(ChannelEvent::Resynced(recon.clone()));
        }
        first = false;

        let reason = run_connection(
            &config,
            stream,
            &mut outbound_rx,
            &events_tx,
            &mut close_rx,
            &mut pending,
            &mut recon,
        )
        .await;

        let reason = match reason {
            Some(reason) => reason,
            None => {
                // Deliberate teardown or owner dropped.
                let _ = events_tx.send(ChannelEvent::Closed);
                return;
            }
        };

        let _ = events_tx.send(ChannelEvent::Disconnected(reason.clone()));
        match reason {
            DisconnectReason::Server(reason) => {
                // The server meant it; reconnecting would just get us closed
                // again.
                tracing::info!(?reason, "server closed the channel, not reconnecting");
                return;
            }
            DisconnectReason::Network(_) => {
                match schedule_retry(&config, attempt, &events_tx, &mut close_rx).await {
                    Phase::Retry(next) => attempt = next,
                    Phase::Shutdown => return,
                }
            }
        }
    }
}

/// Bumps the attempt counter, enforces the budget, and sleeps out the
/// backoff. Close requests cut the sleep short.
async fn schedule_retry(
    config: &Config,
    attempt: u32,
    events_tx: &tokio::sync::broadcast::Sender<ChannelEvent>,
    close_rx: &mut tokio::sync::watch::Receiver<bool>,
) -> Phase {
    let attempt = attempt + 1;
    if attempt > config.max_reconnect_attempts() {
        let _ = events_tx.send(ChannelEvent::Terminal {
            message: TERMINAL_MESSAGE.to_string(),
        });
        return Phase::Shutdown;
    }
    let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_cap());
    let _ = events_tx.send(ChannelEvent::Reconnecting {
        attempt,
        delay_ms: delay.as_millis() as u64,
    });
    tokio::select! {
        _ = tokio::time::sleep(delay) => Phase::Retry(attempt),
        _ = close_rx.changed() => Phase::Shutdown,
    }
}

/// Runs one live connection until it dies. Returns the disconnect reason, or
/// `None` for deliberate teardown.
async fn run_connection(
    config: &Config,
    stream: WsStream,
    outbound_rx: &mut tokio::sync::mpsc::Receiver<ClientEvent>,
    events_tx: &tokio::sync::broadcast::Sender<ChannelEvent>,
    close_rx: &mut tokio::sync::watch::Receiver<bool>,
    pending: &mut VecDeque<ClientEvent>,
    recon: &mut ReconnectionState,
) -> Option<DisconnectReason> {
    let (mut write, mut read) = stream.split();

    // Flush everything queued while we were away, in original order.
    while let Some(event) = pending.pop_front() {
        match serde_json::to_string(&event) {
            Ok(text) => {
                recon.note_sent(&event);
                if let Err(e) = write.send(Message::Text(text)).await {
                    // Connection died mid-flush; this event has not been
                    // delivered, so it goes back to the head of the queue.
                    pending.push_front(event);
                    return Some(DisconnectReason::Network(e.to_string()));
                }
            }
            Err(e) => tracing::error!("failed to serialize queued event: {}", e),
        }
    }

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately; skip it so the ping cadence starts
    // one interval from now.
    heartbeat.tick().await;
    let mut last_pong: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = close_rx.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return None;
            }
            maybe_event = outbound_rx.recv() => {
                let Some(event) = maybe_event else {
                    // Owner dropped the channel handle.
                    let _ = write.send(Message::Close(None)).await;
                    return None;
                };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        recon.note_sent(&event);
                        if let Err(e) = write.send(Message::Text(text)).await {
                            pending.push_front(event);
                            return Some(DisconnectReason::Network(e.to_string()));
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize event: {}", e),
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return Some(DisconnectReason::Network(e.to_string()));
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                recon.observe(&event);
                                let _ = events_tx.send(ChannelEvent::Server(event));
                            }
                            Err(e) => {
                                tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Liveness observation only; a silent peer is left to
                        // the read half to detect.
                        last_pong = Some(Instant::now());
                        tracing::trace!(?last_pong, "pong received");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        return Some(DisconnectReason::Server(reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Some(DisconnectReason::Network(e.to_string()));
                    }
                    None => {
                        return Some(DisconnectReason::Network("stream ended".to_string()));
                    }
                }
            }
        }
    }
}
