//! HTTP gateway.
//!
//! | Route                        | Method | Description                          |
//! |------------------------------|--------|--------------------------------------|
//! | `/health`                    | GET    | Status, version, connector health    |
//! | `/api/v1/message`            | POST   | Run one turn, return the reply       |
//! | `/api/v1/stream`             | POST   | Run one turn as server-sent events   |
//! | `/api/v1/connectors`         | GET    | Registered connector descriptors     |
//! | `/api/v1/sessions`           | GET    | Session metadata                     |
//! | `/api/v1/sessions/{key}`     | GET    | One session with its messages        |
//! | `/api/v1/sessions/{key}`     | DELETE | Forget a session                     |
//!
//! Every internal failure is answered with the sanitized agent error text;
//! raw errors only reach the log.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::agent::{AgentLoop, INTERNAL_ERROR_MESSAGE};
use crate::bus::{InboundMessage, StreamEvent};
use crate::config::GatewayConfig;
use crate::connectors::{ConnectorRegistry, ConnectorStatus};
use crate::error::{DatabotError, Result};

const STREAM_EVENT_BUFFER: usize = 64;

/// Shared handles for the route handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub agent: Arc<AgentLoop>,
    pub connectors: Arc<ConnectorRegistry>,
}

impl GatewayState {
    pub fn new(agent: Arc<AgentLoop>, connectors: Arc<ConnectorRegistry>) -> Self {
        Self { agent, connectors }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

impl MessageRequest {
    fn into_inbound(self) -> InboundMessage {
        let sender = self.sender.unwrap_or_else(|| "api".to_string());
        let chat_id = self.chat_id.unwrap_or_else(|| "api".to_string());
        InboundMessage::new("api", &sender, &chat_id, &self.message)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub response: String,
    /// Specialist that answered, when routing is enabled
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent: Option<String>,
}

/// JSON `{error}` body with a status code.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Log `err` and answer with the fixed internal-error text.
    fn internal(err: DatabotError) -> Self {
        error!(error = %err, "Gateway request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/message", post(post_message))
        .route("/api/v1/stream", post(post_stream))
        .route("/api/v1/connectors", get(list_connectors))
        .route("/api/v1/sessions", get(list_sessions))
        .route(
            "/api/v1/sessions/{key}",
            get(get_session).delete(delete_session),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.host:config.port` and serve until `shutdown` resolves.
pub async fn serve<F>(config: &GatewayConfig, state: GatewayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Gateway listening");

    state.agent.metrics().set_ready(true);
    let metrics = Arc::clone(state.agent.metrics());
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;
    metrics.set_ready(false);
    served?;
    info!("Gateway stopped");
    Ok(())
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let connectors = state.connectors.health_check_all().await;
    let degraded = connectors
        .values()
        .any(|s| matches!(s, ConnectorStatus::Unreachable | ConnectorStatus::Degraded));
    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "connectors": connectors,
        "metrics": state.agent.metrics().snapshot(),
    }))
}

async fn post_message(
    State(state): State<GatewayState>,
    Json(request): Json<MessageRequest>,
) -> std::result::Result<Json<MessageResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message is required"));
    }
    let msg = request.into_inbound();
    let reply = state
        .agent
        .process_reply(&msg)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(MessageResponse {
        response: reply.content,
        agent: reply.agent,
    }))
}

async fn post_stream(
    State(state): State<GatewayState>,
    Json(request): Json<MessageRequest>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    if request.message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message is required"));
    }
    let msg = request.into_inbound().streaming();
    let (tx, rx) = mpsc::channel(STREAM_EVENT_BUFFER);
    let agent = Arc::clone(&state.agent);
    tokio::spawn(async move {
        // Terminal events are sent by the agent on both paths.
        let _ = agent.process_stream(&msg, &tx).await;
    });
    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}

fn event_stream(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default()
            .event(event.kind.name())
            .data(event.to_wire().to_string());
        Some((Ok(sse), rx))
    })
}

async fn list_connectors(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.connectors.descriptors())
}

async fn list_sessions(
    State(state): State<GatewayState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let sessions = state
        .agent
        .sessions()
        .list()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<GatewayState>,
    Path(key): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    match state
        .agent
        .sessions()
        .peek(&key)
        .await
        .map_err(ApiError::internal)?
    {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", key),
        )),
    }
}

async fn delete_session(
    State(state): State<GatewayState>,
    Path(key): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .agent
        .sessions()
        .delete(&key)
        .await
        .map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}
