//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | Liveness message |
//! | `GET`    | `/health` | Version and index status |
//! | `POST`   | `/upload` | Multipart upload (field `file`), stored and ingested |
//! | `POST`   | `/api/chat` | Ask a question; returns answer and context preview |
//! | `GET`    | `/api/history?session_id=` | Turns recorded for a session |
//! | `DELETE` | `/api/history?session_id=` | Clear a session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing multipart field 'file'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `ingest_failed` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser front
//! end can be served from a different origin.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use docqa_core::chat::ChatModel;
use docqa_core::embedding::Embedder;
use docqa_core::models::{Role, Turn};

use crate::agent::AnsweringAgent;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::{ingest_document, sanitize_filename, save_upload};
use crate::knowledge::{IndexStatus, KnowledgeBase};
use crate::llm::create_chat_model;
use crate::sessions::{SessionStore, DEFAULT_SESSION_ID};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kb: Arc<KnowledgeBase>,
    pub agent: Arc<AnsweringAgent>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Wire up state from explicit model implementations.
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, model: Arc<dyn ChatModel>) -> Self {
        let kb = Arc::new(KnowledgeBase::new(config.storage.index_path.clone(), embedder));
        let agent = Arc::new(AnsweringAgent::new(kb.clone(), model, &config));
        let sessions = Arc::new(SessionStore::new(&config.sessions));
        Self {
            config: Arc::new(config),
            kb,
            agent,
            sessions,
        }
    }

    /// Wire up state using the providers named in the configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_chat_model(&config.llm)?;
        Ok(Self::new(config.clone(), embedder, model))
    }
}

/// Build the router for `state`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.server.max_upload_mb.saturating_mul(1024 * 1024);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/api/chat", post(handle_chat))
        .route("/api/history", get(handle_get_history).delete(handle_clear_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Load the index, start the idle-session sweeper, and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;

    if state.kb.load_existing_index().await {
        info!("knowledge base ready");
    } else {
        info!("no knowledge base loaded yet; upload a document to create one");
    }

    spawn_session_sweeper(state.sessions.clone(), config.sessions.idle_ttl_secs);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("docqa listening on http://{}", bind_addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn spawn_session_sweeper(sessions: Arc<SessionStore>, idle_ttl_secs: u64) {
    if idle_ttl_secs == 0 {
        return;
    }
    let period = Duration::from_secs(idle_ttl_secs.clamp(1, 300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle().await;
            if evicted > 0 {
                info!(evicted, "dropped idle chat sessions");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn ingest_failed() -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "ingest_failed".to_string(),
        message: "Ingestion failed internally.".to_string(),
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "Document QA backend running" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    index: IndexStatus,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        index: state.kb.status().await,
    })
}

// ============ POST /upload ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .and_then(sanitize_filename)
            .ok_or_else(|| bad_request("uploaded file has no usable file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| bad_request("missing multipart field 'file'"))?;

    let path = save_upload(&state.config.storage.upload_dir, &filename, &bytes)
        .await
        .map_err(|e| {
            error!(error = %format!("{:#}", e), "failed to store upload");
            internal(format!("{:#}", e))
        })?;
    info!(path = %path.display(), bytes = bytes.len(), "stored upload");

    if !ingest_document(&state.kb, &state.config.chunking, &path).await {
        return Err(ingest_failed());
    }

    Ok(Json(MessageResponse {
        message: "File processed and saved successfully.".to_string(),
    }))
}

// ============ POST /api/chat ============

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    retrieved_context: String,
}

async fn handle_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Json<ChatResponse> {
    // Held until both turns are recorded.
    let mut session = state.sessions.lock(&req.session_id).await;

    if req.message.is_empty() && req.history.is_empty() {
        session.clear();
        return Json(ChatResponse {
            response: "History cleared.".to_string(),
            retrieved_context: String::new(),
        });
    }

    let out = state.agent.answer(&req.message, &req.history).await;
    session.push(Role::User, req.message);
    session.push(Role::Assistant, out.answer.clone());

    Json(ChatResponse {
        response: out.answer,
        retrieved_context: out.context_preview,
    })
}

// ============ /api/history ============

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_session_id")]
    session_id: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<Turn>,
}

async fn handle_get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        history: state.sessions.get_history(&q.session_id).await,
    })
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<MessageResponse> {
    state.sessions.clear(&q.session_id).await;
    Json(MessageResponse {
        message: "History cleared".to_string(),
    })
}
