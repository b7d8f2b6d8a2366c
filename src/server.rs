//! HTTP server for ingestion and streamed asks.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ai/embeddings/title` | Embed and upsert a post title |
//! | `POST` | `/ai/embeddings/content` | Chunk, embed and replace a post body |
//! | `POST` | `/ai/ask` | Answer a question as a server-sent event stream |
//! | `GET`  | `/ai/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Non-stream errors share one JSON shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embedding_error` (502), `internal` (500).
//! Once `/ai/ask` has started streaming, faults end the stream early instead.
//!
//! # CORS
//!
//! `[server].cors_origins` lists allowed origins; an empty list allows any.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use blog_qa_core::chunk::BpeTokenizer;
use blog_qa_core::embedding::EmbeddingProvider;
use blog_qa_core::store::Store;
use blog_qa_core::AskError;

use crate::config::Config;
use crate::ingest::{ingest_content, ingest_title};
use crate::synth::{AskEvent, AskRequest, Synthesizer};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub tokenizer: Arc<BpeTokenizer>,
    pub synthesizer: Arc<Synthesizer>,
}

/// Build the router with all routes and the CORS layer.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.server.cors_origins)?;

    Ok(Router::new()
        .route("/ai/embeddings/title", post(handle_ingest_title))
        .route("/ai/embeddings/content", post(handle_ingest_content))
        .route("/ai/ask", post(handle_ask))
        .route("/ai/health", get(handle_health))
        .layer(cors)
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "blog QA server listening");
    axum::serve(listener, app).await?;

    Ok(())
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

/// Error type that converts into a JSON HTTP response.
#[derive(Debug)]
pub struct AppError {
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

/// Ingestion failures: blank input → 400, anything else → 502 (provider) or 500.
fn ingest_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    tracing::error!(error = %message, "ingestion failed");
    if message.contains("must not be empty") {
        bad_request(message)
    } else if message.contains("API error")
        || message.contains("connection error")
        || message.contains("disabled")
        || message.contains("dimensions")
    {
        AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "embedding_error".to_string(),
            message,
        }
    } else {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message,
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        let status = match err {
            AskError::Validation(_) => StatusCode::BAD_REQUEST,
            AskError::Retrieval(_) | AskError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

// ============ GET /ai/health ============

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

// ============ POST /ai/embeddings/title ============

#[derive(Deserialize)]
struct TitleRequest {
    post_id: i64,
    title: String,
}

async fn handle_ingest_title(
    State(state): State<AppState>,
    payload: Result<Json<TitleRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req = json_body(payload)?;
    ingest_title(
        state.store.as_ref(),
        state.embedder.as_ref(),
        req.post_id,
        &req.title,
    )
    .await
    .map_err(ingest_error)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============ POST /ai/embeddings/content ============

#[derive(Deserialize)]
struct ContentRequest {
    post_id: i64,
    content: String,
}

#[derive(Serialize)]
struct ContentResponse {
    post_id: i64,
    chunk_count: usize,
    success: bool,
}

async fn handle_ingest_content(
    State(state): State<AppState>,
    payload: Result<Json<ContentRequest>, JsonRejection>,
) -> Result<Json<ContentResponse>, AppError> {
    let req = json_body(payload)?;
    let report = ingest_content(
        state.store.as_ref(),
        state.embedder.as_ref(),
        state.tokenizer.as_ref(),
        &state.config.chunking,
        state.config.embedding.batch_size,
        req.post_id,
        &req.content,
    )
    .await
    .map_err(ingest_error)?;

    Ok(Json(ContentResponse {
        post_id: report.post_id,
        chunk_count: report.chunk_count,
        success: true,
    }))
}

// ============ POST /ai/ask ============

fn sse_event(event: AskEvent) -> Event {
    Event::default().event(event.name()).data(event.data())
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let request = json_body(payload)?;
    let rx = state.synthesizer.start(request)?;

    let events = ReceiverStream::new(rx).map(|event| Ok(sse_event(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
