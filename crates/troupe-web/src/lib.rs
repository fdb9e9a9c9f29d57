//! HTTP front end for `troupe` agents.
//!
//! `troupe-web` serves any [`AgentService`] over a single streaming
//! endpoint. A client posts the conversation and a chat id; the answer
//! comes back as server-sent events.
//!
//! # Quick start
//!
//! ```ignore
//! use troupe_web::{WebConfig, spawn_web};
//!
//! let agent: Arc<dyn AgentService> = Arc::new(runtime);
//! let addr = spawn_web(agent, WebConfig::default()).await?;
//! println!("POST http://{addr}/responses");
//! ```
//!
//! # Wire format
//!
//! ```text
//! POST /responses  {"message": [{"role": "user", "content": "..."}], "chat_id": "abc"}
//!
//! data: {"type":"start","output":"Agent started"}
//! data: {"type":"action","output":"{\"q\":\"acme\"}","action":"search","action_desc":"Search the web"}
//! data: {"type":"result","output":"Acme is "}
//! data: {"type":"result","output":"a widget maker."}
//! data: {"type":"end","output":"Agent finished"}
//! ```

pub mod events;
mod server;

pub use events::{EventAdapter, ResponseEvent, ResponseEventType};
pub use server::{AppState, ResponsesRequest, build_router, start_server};

use std::net::SocketAddr;
use std::sync::Arc;

use troupe::agent::AgentService;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:8000`.
    pub bind_addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(agent: Arc<dyn AgentService>, config: WebConfig) -> std::io::Result<SocketAddr> {
    let router = build_router(agent);
    start_server(router, config.bind_addr).await
}
