//! axum HTTP server.
//!
//! Exposes OpenAI-compatible endpoints:
//! - `POST /v1/chat/completions`
//! - `POST /v1/completions`
//! - `GET /v1/models`
//! - `GET /v1/sessions`, `DELETE /v1/sessions/{fingerprint}`
//! - `GET /health`

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};
use webbridge_browser::CredentialSet;
use webbridge_core::{Bridge, BridgeError, Generation, SessionInfo, StreamFramer, DONE_SENTINEL};
use webbridge_protocol::{
    model_list, ChatCompletionRequest, CompletionRequest, GenerationRequest, ModelList,
    ResponseKind,
};

use crate::error::ApiError;

struct AppState {
    bridge: Arc<Bridge>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    time: String,
    uptime_secs: u64,
    active_sessions: usize,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionList {
    object: &'static str,
    data: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
struct ClosedSessions {
    closed: Vec<SessionInfo>,
}

pub struct WebbridgeServer {
    bridge: Arc<Bridge>,
}

impl WebbridgeServer {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            bridge: self.bridge.clone(),
            start_time: Instant::now(),
            started_at: Utc::now(),
        });
        Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .route("/v1/completions", post(completions_handler))
            .route("/v1/models", get(models_handler))
            .route("/v1/sessions", get(list_sessions_handler))
            .route("/v1/sessions/{fingerprint}", delete(close_session_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, host: &str, port: u16, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!(addr = %addr, "webbridge listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error")?;

        Ok(())
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_sessions = state.bridge.coordinator().session_count().await;
    Json(HealthResponse {
        status: "ok",
        time: Utc::now().to_rfc3339(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn models_handler(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(model_list(state.started_at.timestamp()))
}

async fn list_sessions_handler(State(state): State<Arc<AppState>>) -> Json<SessionList> {
    Json(SessionList {
        object: "list",
        data: state.bridge.coordinator().list().await,
    })
}

async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
) -> Result<Json<ClosedSessions>, ApiError> {
    let closed = state.bridge.coordinator().close(&fingerprint).await?;
    Ok(Json(ClosedSessions { closed }))
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let credentials = credentials_from_headers(&headers)?;
    let request = GenerationRequest::from_chat(&body)?;
    respond(&state.bridge, request, credentials, ResponseKind::Chat).await
}

async fn completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let credentials = credentials_from_headers(&headers)?;
    let request = GenerationRequest::from_completion(&body)?;
    respond(&state.bridge, request, credentials, ResponseKind::Completion).await
}

/// Cookies travel as the bearer token of the `Authorization` header.
fn credentials_from_headers(headers: &HeaderMap) -> Result<Option<CredentialSet>, ApiError> {
    let value = match headers.get(header::AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| {
            BridgeError::InvalidCredentials("authorization header is not valid UTF-8".to_string())
        })?),
        None => None,
    };
    Ok(CredentialSet::from_authorization(value)?)
}

async fn respond(
    bridge: &Bridge,
    request: GenerationRequest,
    credentials: Option<CredentialSet>,
    kind: ResponseKind,
) -> Result<Response, ApiError> {
    let stream = request.stream;
    info!(
        backend = %request.backend,
        model = %request.model,
        stream,
        chars = request.prompt.len(),
        "Generation requested"
    );

    let generation = bridge.start(request, credentials).await?;
    if stream {
        return Ok(sse_response(generation, kind));
    }

    let framer = StreamFramer::new(kind, generation.model());
    let (text, finish) = generation.collect().await?;
    Ok(Json(framer.aggregate(text, finish)).into_response())
}

/// Frame a generation as `text/event-stream`. Dropping the body, e.g. on
/// client disconnect, drops the generation and stops page polling.
fn sse_response(generation: Generation, kind: ResponseKind) -> Response {
    let framer = StreamFramer::new(kind, generation.model());
    let envelopes = generation.envelopes(kind);

    let events = async_stream::stream! {
        futures::pin_mut!(envelopes);
        while let Some(item) = envelopes.next().await {
            match item {
                Ok(envelope) => match framer.render(&envelope) {
                    Ok(data) => yield Ok::<Event, Infallible>(Event::default().data(data)),
                    Err(e) => {
                        error!(error = %e, "Failed to render stream chunk");
                        break;
                    }
                },
                Err(e) => {
                    error!(error = %e, "Generation failed mid-stream");
                    let body = serde_json::to_string(&ApiError(e).body()).unwrap_or_default();
                    yield Ok(Event::default().data(body));
                    yield Ok(Event::default().data(DONE_SENTINEL));
                }
            }
        }
    };

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
