//! HTTP server for document chat.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check, always `{"status": "OK"}` |
//! | `POST` | `/chat/` | Ask a question; answer streamed as SSE (`/chat` also accepted) |
//!
//! # Chat flow
//!
//! 1. Validate the body (`message`, `conversation_id` non-empty; `role`
//!    defaults to `user`).
//! 2. Get or create the conversation and lock it for the whole turn.
//! 3. Reject closed conversations with `404`.
//! 4. Retrieve the top-k chunks for the raw message and append the
//!    augmented user turn.
//! 5. Stream the model's answer (see [`crate::stream`]).
//!
//! Failures before the body starts use the status code; failures after
//! that are reported in-band by the stream.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `session_closed` (404), `internal` (500).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, Credentials};
use crate::document::load_document;
use crate::embedding::create_provider;
use crate::index::{Retriever, VectorIndex};
use crate::llm::{ChatModel, OpenAIChatModel};
use crate::models::{ChatRequest, HealthResponse, Message};
use crate::session::{SessionError, SessionStore};
use crate::stream::{respond, sse_frames};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionStore>,
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
    pacing: Duration,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionStore>,
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn ChatModel>,
        top_k: usize,
        pacing: Duration,
    ) -> Self {
        Self {
            sessions,
            retriever,
            model,
            top_k,
            pacing,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

/// Build the router with CORS and request tracing.
pub fn build_router(state: AppState, cors_allow_all: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/chat/", post(handle_chat))
        .route("/chat", post(handle_chat))
        .with_state(state);

    if cors_allow_all {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

/// Load the configured document and build the retrieval index over it.
///
/// Any failure here must keep the server from starting.
pub async fn build_index(
    config: &Config,
    credentials: Option<&Credentials>,
) -> anyhow::Result<VectorIndex> {
    let text = load_document(&config.document.path)
        .with_context(|| format!("Error loading document {}", config.document.path.display()))?;

    let provider = create_provider(&config.embedding, credentials)?;
    let index = VectorIndex::new(
        Arc::from(provider),
        config.chunking.clone(),
        config.embedding.batch_size,
    );
    index
        .build(&text)
        .await
        .context("Failed to build retrieval index")?;
    Ok(index)
}

/// Start the chat server.
///
/// Startup is all-or-nothing: missing credentials, an unreadable or empty
/// document, or an index build failure return an error before the listener
/// is bound. Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let credentials = Credentials::from_env()?;

    let index = build_index(config, Some(&credentials)).await?;
    let model = OpenAIChatModel::new(&config.llm, &credentials)?;
    tracing::info!(model = model.model(), "chat model configured");

    let state = AppState::new(
        Arc::new(SessionStore::new(config.llm.system_prompt.clone())),
        Arc::new(index),
        Arc::new(model),
        config.retrieval.top_k,
        Duration::from_millis(config.stream.pacing_ms),
    );
    let app = build_router(state, config.server.cors_allow_all);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("doc-chat listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Build the user turn sent upstream: the question followed by the
/// retrieved passages, one per line, most relevant first.
pub fn augment_question(message: &str, chunks: &[String]) -> String {
    format!(
        "Question: {}\n\nRelevant context from the document:\n{}",
        message,
        chunks.join("\n")
    )
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

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn session_closed(err: SessionError) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "session_closed",
        message: err.to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ GET /health ============

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

// ============ POST /chat/ ============

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    request.validate().map_err(bad_request)?;

    let handle = state.sessions.get_or_create(&request.conversation_id);
    let mut conversation = handle.lock_owned().await;
    if !conversation.is_active() {
        return Err(session_closed(SessionError::Closed));
    }

    let chunks = state
        .retriever
        .retrieve(&request.message, state.top_k)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Error in chat endpoint");
            internal(format!("Internal server error: {}", e))
        })?;

    tracing::debug!(
        conversation_id = %request.conversation_id,
        chunks = chunks.len(),
        "retrieved context"
    );

    conversation
        .push(Message::new(
            request.role,
            augment_question(&request.message, &chunks),
        ))
        .map_err(session_closed)?;

    let events = respond(conversation, state.model.clone(), state.pacing);
    Ok(sse_response(Body::from_stream(sse_frames(events))))
}

fn sse_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}
