mod config;
mod socket;
mod timer;

use crate::config::Config;
use crate::socket::SocketTransport;
use crate::timer::SessionTimer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::RngCore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::fmt::time::ChronoLocal;
use viva_core::audit::{AuditSink, HttpAuditSink, LogAuditSink};
use viva_core::decision::DecisionClient;
use viva_core::generation::GenerationClient;
use viva_core::jobs::NoopPostProcessor;
use viva_core::knowledge::{KnowledgeClient, KnowledgeRetriever, Passage};
use viva_core::session::Question;
use viva_core::store::MemoryBackend;
use viva_core::{
    Orchestrator, OrchestratorConfig, SessionMode, SessionState, SessionStore, Transport,
};
use viva_types::events::server::ErrorEvent;
use viva_types::{ClientEvent, ServerEvent};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    store: SessionStore,
    config: Arc<Config>,
}

/// Retrieval stand-in for deployments without a knowledge collaborator.
struct NoRetrieval;

#[async_trait]
impl KnowledgeRetriever for NoRetrieval {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load gateway configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
    tracing::info!("Configuration loaded, starting interview gateway...");

    let store = SessionStore::new(Arc::new(MemoryBackend::new()));

    let decider = Arc::new(DecisionClient::new(
        &config.chat_endpoint,
        config.llm_api_key.clone(),
        &config.decision_model,
    ));
    let generator = Arc::new(GenerationClient::new(
        &config.chat_endpoint,
        config.llm_api_key.clone(),
        &config.generation_model,
    ));
    let knowledge: Arc<dyn KnowledgeRetriever> = match &config.knowledge_endpoint {
        Some(endpoint) => Arc::new(KnowledgeClient::new(endpoint)),
        None => Arc::new(NoRetrieval),
    };
    let audit: Arc<dyn AuditSink> = match &config.audit_endpoint {
        Some(endpoint) => Arc::new(HttpAuditSink::new(endpoint)),
        None => Arc::new(LogAuditSink),
    };

    let orchestrator = Arc::new(
        Orchestrator::new(
            store.clone(),
            decider,
            generator,
            knowledge,
            audit,
            Arc::new(NoopPostProcessor),
        )
        .with_config(OrchestratorConfig {
            completion_grace: config.completion_grace,
        }),
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        orchestrator,
        store,
        config: Arc::new(config),
    };

    // Permissive CORS so the web client can reach the gateway from any origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/sessions", post(create_session))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    tracing::info!("Listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    template_id: String,
    #[serde(default)]
    mode: SessionMode,
    #[serde(default)]
    questions: Vec<Question>,
    #[serde(default)]
    files_summary: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    token: String,
    session_id: String,
}

fn new_session_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Seeds a session from a template snapshot. Template storage itself lives
/// outside the engine; the caller hands us the already-resolved questions and
/// any processed file summaries.
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, StatusCode> {
    if request.mode == SessionMode::Structured && request.questions.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let token = new_session_token();
    let mut session = SessionState::new(&token, &request.template_id, request.mode, request.questions);
    session.candidate_files_summary = request.files_summary;

    if let Err(e) = state.store.set(&token, &session).await {
        tracing::error!(error = %e, "failed to seed session");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    tracing::info!(token = %token, template = %request.template_id, "session seeded");
    Ok(Json(CreateSessionResponse {
        session_id: token.clone(),
        token,
    }))
}

#[derive(serde::Deserialize)]
struct WsParams {
    token: String,
}

/// Authenticates the session token before the upgrade completes; an unknown
/// token never gets a socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    match state.store.get(&params.token).await {
        Ok(Some(_)) => {
            Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, params.token)))
        }
        Ok(None) => {
            tracing::info!(token = %params.token, "rejected connect for unknown session");
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            tracing::error!(error = %e, "session lookup failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, token: String) {
    tracing::info!(token = %token, "interview channel established");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<ServerEvent>(256);

    // Writer task: the single place events become wire frames.
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialize event: {}", e),
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let transport = Arc::new(SocketTransport::new(event_tx));

    if let Err(e) = state
        .orchestrator
        .handle_session_start(&token, transport.as_ref())
        .await
    {
        tracing::error!(token = %token, error = %e, "session start failed");
    }

    // The wall clock lives and dies with this connection's scope.
    let timer = {
        let orchestrator = state.orchestrator.clone();
        let timer_transport = transport.clone();
        let timer_token = token.clone();
        SessionTimer::start(
            transport.clone(),
            state.config.interview_duration,
            state.config.time_warning_before_end,
            move || async move {
                if let Err(e) = orchestrator
                    .handle_end(&timer_token, timer_transport.as_ref())
                    .await
                {
                    tracing::error!(token = %timer_token, error = %e, "time-expired end failed");
                }
            },
        )
    };

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(token = %token, error = %e, "read error, closing channel");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(&state, &token, transport.as_ref(), event).await
                }
                Err(e) => {
                    tracing::warn!(token = %token, "unparseable client event: {}, text=> {:?}", e, text)
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(timer);
    writer.abort();
    tracing::info!(token = %token, "interview channel closed");
}

async fn handle_client_event(
    state: &AppState,
    token: &str,
    transport: &SocketTransport,
    event: ClientEvent,
) {
    match event {
        ClientEvent::CandidateTranscriptFinal(e) => {
            if let Err(err) = state
                .orchestrator
                .handle_transcript(token, transport, e.text())
                .await
            {
                // Store unavailability is a hard failure for this turn; the
                // candidate hears about it instead of silence.
                tracing::error!(token = %token, error = %err, "turn failed");
                let _ = transport
                    .emit(ServerEvent::Error(ErrorEvent::new(
                        "turn_failed",
                        "Something went wrong processing that answer. Please try again.",
                    )))
                    .await;
            }
        }
        ClientEvent::CandidateTranscriptPartial(_) => {
            // Listening pulse; no content ever arrives in partials.
            tracing::trace!(token = %token, "candidate still speaking");
        }
        ClientEvent::CandidateInterrupt(_) => {
            tracing::debug!(token = %token, "candidate interrupted playback");
        }
        ClientEvent::MicMuted(e) => {
            tracing::debug!(token = %token, muted = e.muted(), "mic state changed");
        }
        ClientEvent::EndInterview(_) => {
            if let Err(err) = state.orchestrator.handle_end(token, transport).await {
                tracing::error!(token = %token, error = %err, "end interview failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_unique_and_url_safe() {
        let a = new_session_token();
        let b = new_session_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(a.len() >= 32);
    }

    #[test]
    fn create_session_request_accepts_camel_case() {
        let json = r#"{
            "templateId": "tmpl-7",
            "questions": [
                {"id": "q0", "text": "Walk me through your last project.", "rubric": "ownership, impact", "maxFollowups": 2}
            ],
            "filesSummary": "resume: staff engineer, 8y"
        }"#;
        let request: CreateSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.template_id, "tmpl-7");
        assert_eq!(request.mode, SessionMode::Structured);
        assert_eq!(request.questions[0].max_followups, 2);
        assert_eq!(request.files_summary.as_deref(), Some("resume: staff engineer, 8y"));
    }
}
