//! HTTP front-end.
//!
//! Serves the same chat flow as the terminal over JSON, one session per
//! client. All sessions share the process-wide [`KnowledgeCache`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/knowledge` | Knowledge base status |
//! | `POST`   | `/knowledge/reset` | Forget the cached knowledge base |
//! | `POST`   | `/sessions` | Create a session seeded with the knowledge base |
//! | `GET`    | `/sessions/{id}` | Session transcript |
//! | `POST`   | `/sessions/{id}/messages` | Ask a question: `{ "text": "…" }` |
//! | `DELETE` | `/sessions/{id}` | Destroy a session |
//!
//! A question the model could not answer is not an HTTP error: the response
//! is `200` and carries the failed assistant turn plus its `error` code, the
//! same way the terminal shows the explanation in place of a reply.
//!
//! # Session lifetime
//!
//! A session lives until `DELETE` or until it has not been used for
//! `[server].session_idle_secs` (default one hour, `0` disables expiry).
//! An expired id answers `404` like any unknown one.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no session with id …" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ChatError;
use crate::knowledge::KnowledgeCache;
use crate::models::Turn;
use crate::progress::NoProgress;
use crate::session::{ChatSession, SessionRegistry};
use crate::sync::SyncReport;
use crate::traits::{ChatModel, DocumentStore};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    knowledge: Arc<KnowledgeCache>,
    store: Arc<dyn DocumentStore>,
    model: Arc<dyn ChatModel>,
    sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            config: Arc::new(config),
            knowledge: Arc::new(KnowledgeCache::new()),
            store,
            model,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}

/// Route table with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/knowledge", get(handle_knowledge))
        .route("/knowledge/reset", post(handle_knowledge_reset))
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/{id}/messages", post(handle_send_message))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(
    config: Config,
    store: Arc<dyn DocumentStore>,
    model: Arc<dyn ChatModel>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let idle = config.server.session_idle();
    let state = AppState::new(config, store, model);
    if let Some(idle) = idle {
        spawn_idle_sweep(state.sessions.clone(), idle);
    }
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop sessions idle for longer than `idle`.
pub fn spawn_idle_sweep(sessions: Arc<SessionRegistry>, idle: Duration) -> JoinHandle<()> {
    let period = (idle / 4).clamp(Duration::from_millis(10), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            sessions.sweep_idle(idle);
        }
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid session id: {}", raw)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /knowledge ============

#[derive(Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum KnowledgeStatus {
    NotBuilt {
        generation: u64,
    },
    Ready {
        generation: u64,
        documents: Vec<String>,
        report: SyncReport,
    },
    Failed {
        generation: u64,
        error: String,
    },
}

async fn handle_knowledge(State(state): State<AppState>) -> Json<KnowledgeStatus> {
    let generation = state.knowledge.generation();
    let status = match state.knowledge.peek() {
        None => KnowledgeStatus::NotBuilt { generation },
        Some(outcome) => match outcome.as_ref() {
            Ok(kb) => KnowledgeStatus::Ready {
                generation,
                documents: kb.names().into_iter().map(String::from).collect(),
                report: kb.report.clone(),
            },
            Err(e) => KnowledgeStatus::Failed {
                generation,
                error: e.to_string(),
            },
        },
    };
    Json(status)
}

#[derive(Serialize)]
struct ResetResponse {
    generation: u64,
}

async fn handle_knowledge_reset(State(state): State<AppState>) -> Json<ResetResponse> {
    Json(ResetResponse {
        generation: state.knowledge.reset(),
    })
}

// ============ /sessions ============

#[derive(Serialize)]
struct SessionCreated {
    id: Uuid,
    documents: Vec<String>,
    /// Set when the knowledge base could not be built; the session exists
    /// but every question is answered with an explanation.
    knowledge_error: Option<String>,
}

async fn handle_create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionCreated>), AppError> {
    let outcome = state
        .knowledge
        .load(&state.config, state.store.as_ref(), &NoProgress)
        .await;

    let mut session = ChatSession::new();
    let knowledge_error = match outcome.as_ref() {
        Ok(kb) => {
            session
                .open(kb, &state.config.chat, state.config.gemini.safety)
                .map_err(|e| internal(e.to_string()))?;
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "session created without knowledge base");
            Some(e.to_string())
        }
    };

    let documents = session.documents().to_vec();
    let id = state.sessions.insert(session);
    tracing::debug!(%id, documents = documents.len(), "session created");

    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            id,
            documents,
            knowledge_error,
        }),
    ))
}

#[derive(Serialize)]
struct SessionView {
    id: Uuid,
    open: bool,
    documents: Vec<String>,
    transcript: Vec<Turn>,
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let id = parse_id(&raw_id)?;
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("no session with id {}", id)))?;
    let session = session.lock().await;

    Ok(Json(SessionView {
        id,
        open: session.is_open(),
        documents: session.documents().to_vec(),
        transcript: session.transcript().to_vec(),
    }))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&raw_id)?;
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id {}", id)))
    }
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

#[derive(Serialize)]
struct MessageResponse {
    turn: Turn,
    /// Machine-readable failure category when `turn.status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&raw_id)?;
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("no session with id {}", id)))?;
    let mut session = session.lock().await;

    let result = session
        .send(state.model.as_ref(), &req.text)
        .await
        .cloned();
    match result {
        Ok(turn) => Ok(Json(MessageResponse {
            turn,
            error: None,
        })),
        Err(ChatError::EmptyMessage) => Err(bad_request("text must not be empty")),
        Err(err) => {
            let turn = session
                .transcript()
                .last()
                .cloned()
                .ok_or_else(|| internal("failed turn was not recorded"))?;
            Ok(Json(MessageResponse {
                turn,
                error: Some(err.code()),
            }))
        }
    }
}
