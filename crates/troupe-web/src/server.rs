//! Axum server setup, router construction and handlers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use troupe::Message;
use troupe::agent::AgentService;
use troupe::agent::service::validate_request;

use crate::events::EventAdapter;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<dyn AgentService>,
}

/// Request body for `POST /responses`.
#[derive(Deserialize, Debug)]
pub struct ResponsesRequest {
    /// Conversation so far, oldest first. Each entry needs at least
    /// `role` and `content`.
    pub message: Vec<Message>,
    /// Conversation id; doubles as the agent's thread id.
    pub chat_id: String,
}

/// POST /responses: stream the agent's answer as server-sent events.
///
/// Every event's `data` is a JSON [`ResponseEvent`](crate::ResponseEvent).
/// Returns 400 for an empty message list or chat id.
pub async fn post_responses(
    State(app): State<AppState>,
    Json(body): Json<ResponsesRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    if let Err(e) = validate_request(&body.message, &body.chat_id) {
        warn!("Rejected /responses request: {e}");
        return Err((StatusCode::BAD_REQUEST, e.to_string()));
    }
    info!(
        "Chat '{}': {} message(s) for agent '{}'",
        body.chat_id,
        body.message.len(),
        app.agent.metadata().name
    );

    let adapter = EventAdapter::new(&app.agent.tool_definitions());
    let chunks = app.agent.chat_stream(body.message, &body.chat_id);
    let events = adapter.adapt(chunks).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(data))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /health: liveness plus the served agent's identity.
pub async fn get_health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let metadata = app.agent.metadata();
    Json(serde_json::json!({
        "status": "ok",
        "agent": metadata.name.as_str(),
        "model": metadata.model.identifier(),
    }))
}

/// Build the full axum router.
///
/// The router serves:
/// - `POST /responses` (SSE)
/// - `GET /health`
pub fn build_router(agent: Arc<dyn AgentService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/responses", post(post_responses))
        .route("/health", get(get_health))
        .with_state(AppState { agent })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind_addr`, serve `router` on a Tokio task and return the bound
/// address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!("Server on {addr} stopped: {e}");
        }
    });

    info!("Listening on http://{addr}");
    Ok(addr)
}
