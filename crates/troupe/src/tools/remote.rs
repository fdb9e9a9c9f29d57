//! Remote tool discovery over the Model Context Protocol.
//!
//! A [`ToolTransportConfig`] maps logical server names to connection
//! parameters. [`discover_all`] asks a [`ToolDiscovery`] implementation for
//! every server's tools and only returns once *all* servers answered, so a
//! partially reachable configuration never produces a partial tool set.
//!
//! [`McpDiscovery`] is the built-in implementation: it speaks JSON-RPC
//! (`initialize`, `tools/list`, `tools/call`) over streamable HTTP, SSE or
//! a child process's stdio, and wraps each discovered tool in a
//! [`RemoteTool`] that forwards calls back to the originating server.
//!
//! ```json
//! {
//!   "search": {"transport": "streamable_http", "url": "http://localhost:8000/mcp"},
//!   "files": {"transport": "stdio", "command": "files-server", "args": ["--root", "/srv"]}
//! }
//! ```

use crate::error::AgentError;
use crate::tools::core::{Tool, ToolFuture};
use crate::ToolDef;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transport::Channel;

/// MCP protocol revision sent during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Default per-request timeout for remote tool servers.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ── Configuration ──────────────────────────────────────────────────

/// How a remote tool server is reached.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[serde(alias = "streamable-http", alias = "http")]
    StreamableHttp,
    Sse,
    Stdio,
}

/// Connection parameters for one remote tool server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServerConnection {
    pub transport: TransportKind,
    /// Endpoint URL for HTTP-based transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Executable for the `stdio` transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for the `stdio` child process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Extra HTTP headers sent with every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Bearer token sent as `Authorization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ServerConnection {
    fn with_transport(transport: TransportKind) -> Self {
        Self {
            transport,
            url: None,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            headers: BTreeMap::new(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Connection to a streamable-HTTP server at `url`.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::with_transport(TransportKind::StreamableHttp)
        }
    }

    /// Connection to a server whose event stream is served at `url`.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::with_transport(TransportKind::Sse)
        }
    }

    /// Server run as a child process, spoken to over its stdin and stdout.
    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: Some(command.into()),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::with_transport(TransportKind::Stdio)
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set a bearer token (builder pattern).
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Server name → connection parameters. Ordered by name so that discovered
/// tools are merged in a stable order.
pub type ToolTransportConfig = BTreeMap<String, ServerConnection>;

// ── Discovery ──────────────────────────────────────────────────────

/// Boxed future returned by [`ToolDiscovery::discover`].
pub type DiscoveryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Arc<dyn Tool>>, AgentError>> + Send + 'a>>;

/// A source of remote tools.
pub trait ToolDiscovery: Send + Sync {
    /// Fetch the ordered tool list of one server.
    fn discover<'a>(&'a self, server: &'a str, connection: &'a ServerConnection)
    -> DiscoveryFuture<'a>;
}

/// Query every configured server concurrently and concatenate their tools
/// in server-name order.
///
/// All-or-nothing: the first failing server fails the whole call and no
/// tools are returned.
pub async fn discover_all(
    discovery: &dyn ToolDiscovery,
    config: &ToolTransportConfig,
) -> Result<Vec<Arc<dyn Tool>>, AgentError> {
    let per_server = futures::future::try_join_all(
        config
            .iter()
            .map(|(server, connection)| discovery.discover(server, connection)),
    )
    .await?;

    let tools: Vec<Arc<dyn Tool>> = per_server.into_iter().flatten().collect();
    info!(
        "Discovered {} remote tool(s) from {} server(s)",
        tools.len(),
        config.len()
    );
    Ok(tools)
}

/// A tool descriptor as returned by `tools/list`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

impl McpToolDescriptor {
    /// Convert to a model-facing definition, rejecting malformed descriptors.
    pub fn to_tool_def(&self) -> Result<ToolDef, String> {
        if self.name.trim().is_empty() {
            return Err("tool descriptor without a name".into());
        }
        let schema = match &self.input_schema {
            Some(schema @ Value::Object(_)) => schema.clone(),
            Some(other) => {
                return Err(format!(
                    "tool '{}' has a non-object input schema: {other}",
                    self.name
                ));
            }
            None => json!({"type": "object", "properties": {}}),
        };
        Ok(ToolDef::new(
            self.name.clone(),
            self.description.clone().unwrap_or_default(),
            schema,
        ))
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpToolDescriptor>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    is_error: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

// ── McpDiscovery ───────────────────────────────────────────────────

/// [`ToolDiscovery`] over MCP. The transport comes from each server's
/// [`ServerConnection`].
#[derive(Debug, Clone, Default)]
pub struct McpDiscovery;

impl McpDiscovery {
    pub fn new() -> Self {
        Self
    }
}

impl ToolDiscovery for McpDiscovery {
    fn discover<'a>(
        &'a self,
        server: &'a str,
        connection: &'a ServerConnection,
    ) -> DiscoveryFuture<'a> {
        Box::pin(async move {
            let session = McpSession::connect(server, connection)
                .await
                .map_err(|e| AgentError::tool_discovery(server, e))?;
            let session = Arc::new(session);
            session
                .initialize()
                .await
                .map_err(|e| AgentError::tool_discovery(server, e))?;
            let descriptors = session
                .list_tools()
                .await
                .map_err(|e| AgentError::tool_discovery(server, e))?;

            let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(descriptors.len());
            for descriptor in descriptors {
                let def = descriptor
                    .to_tool_def()
                    .map_err(|e| AgentError::tool_discovery(server, e))?;
                tools.push(Arc::new(RemoteTool {
                    def,
                    session: Arc::clone(&session),
                }));
            }
            debug!("Server '{server}' offered {} tool(s)", tools.len());
            Ok(tools)
        })
    }
}

/// One JSON-RPC session with an MCP server.
struct McpSession {
    server: String,
    channel: Channel,
    next_id: AtomicI64,
}

impl McpSession {
    async fn connect(server: &str, connection: &ServerConnection) -> Result<Self, String> {
        Ok(Self {
            server: server.to_string(),
            channel: Channel::open(server, connection).await?,
            next_id: AtomicI64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let payload = self.channel.request(id, &body).await?;
        decode_response(payload, id)
    }

    async fn notify(&self, method: &str) -> Result<(), String> {
        self.channel
            .notify(&json!({"jsonrpc": "2.0", "method": method}))
            .await
    }

    async fn initialize(&self) -> Result<(), String> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "troupe", "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;
        debug!(
            "Server '{}' initialized (protocol {})",
            self.server,
            result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
        );
        self.notify("notifications/initialized").await
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, String> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match cursor.take() {
                Some(c) => json!({"cursor": c}),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| format!("malformed tools/list result: {e}"))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, String> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| format!("malformed tools/call result: {e}"))?;

        let text = call
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if call.is_error == Some(true) {
            return Err(if text.is_empty() {
                "Unknown error".into()
            } else {
                text
            });
        }
        Ok(text)
    }
}

/// Extract `result` from a JSON-RPC response, surfacing `error` objects.
fn decode_response(payload: Value, id: i64) -> Result<Value, String> {
    if payload.get("id").and_then(|i| i.as_i64()) != Some(id) {
        return Err(format!("response id mismatch (expected {id})"));
    }
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(format!("JSON-RPC error: {message}"));
    }
    payload
        .get("result")
        .cloned()
        .ok_or_else(|| "JSON-RPC response without result".to_string())
}

// ── RemoteTool ─────────────────────────────────────────────────────

/// A tool served by a remote MCP server.
pub struct RemoteTool {
    def: ToolDef,
    session: Arc<McpSession>,
}

impl RemoteTool {
    /// Name of the server this tool came from.
    pub fn server(&self) -> &str {
        &self.session.server
    }
}

impl Tool for RemoteTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: Value = if arguments.trim().is_empty() {
                json!({})
            } else {
                match serde_json::from_str(&arguments) {
                    Ok(v) => v,
                    Err(e) => return format!("Error: invalid JSON arguments: {e}"),
                }
            };
            match self.session.call_tool(&self.def.function.name, args).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        "Remote tool '{}' on '{}' failed: {e}",
                        self.def.function.name, self.session.server
                    );
                    format!("Error: {e}")
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_config_deserializes() {
        let json = r#"{
            "weather": {"transport": "streamable-http", "url": "http://localhost:8000/mcp"},
            "files": {"transport": "stdio", "command": "files-server", "args": ["--root", "/tmp"]}
        }"#;
        let config: ToolTransportConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config["weather"].transport, TransportKind::StreamableHttp);
        assert_eq!(config["weather"].timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config["files"].args, vec!["--root", "/tmp"]);
        // BTreeMap iteration is name-ordered.
        let names: Vec<&String> = config.keys().collect();
        assert_eq!(names, vec!["files", "weather"]);
    }

    #[test]
    fn descriptor_without_name_is_malformed() {
        let d = McpToolDescriptor {
            name: String::new(),
            description: None,
            input_schema: None,
        };
        assert!(d.to_tool_def().is_err());
    }

    #[test]
    fn descriptor_with_non_object_schema_is_malformed() {
        let d = McpToolDescriptor {
            name: "x".into(),
            description: None,
            input_schema: Some(json!("string")),
        };
        assert!(d.to_tool_def().unwrap_err().contains("non-object"));
    }

    #[test]
    fn descriptor_defaults_missing_schema() {
        let d = McpToolDescriptor {
            name: "x".into(),
            description: Some("does x".into()),
            input_schema: None,
        };
        let def = d.to_tool_def().unwrap();
        assert_eq!(def.function.parameters["type"], "object");
        assert_eq!(def.function.description, "does x");
    }

    #[test]
    fn decode_surfaces_rpc_errors() {
        let err = decode_response(
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}}),
            1,
        )
        .unwrap_err();
        assert!(err.contains("no such method"));
        assert!(decode_response(json!({"jsonrpc": "2.0", "id": 2, "result": {}}), 1).is_err());
    }

    #[test]
    fn stdio_connection_builder() {
        let connection = ServerConnection::stdio("files-server", ["--root", "/srv"]).with_timeout_secs(5);
        assert_eq!(connection.transport, TransportKind::Stdio);
        assert_eq!(connection.command.as_deref(), Some("files-server"));
        assert_eq!(connection.args, vec!["--root", "/srv"]);
        assert_eq!(connection.timeout_secs, 5);
        assert!(connection.url.is_none());
    }

    #[tokio::test]
    async fn missing_executable_is_a_discovery_error() {
        let connection = ServerConnection::stdio("/nonexistent/troupe-mcp-server", Vec::<String>::new());
        let err = match McpDiscovery::new().discover("files", &connection).await {
            Err(e) => e,
            Ok(_) => panic!("spawning a missing executable should fail"),
        };
        assert!(
            matches!(err, AgentError::ToolDiscovery { ref server, ref message } if server == "files" && message.contains("spawn"))
        );
    }

    #[tokio::test]
    async fn url_transports_require_a_url() {
        let connection = ServerConnection {
            url: None,
            ..ServerConnection::sse("unused")
        };
        let err = match McpDiscovery::new().discover("events", &connection).await {
            Err(e) => e,
            Ok(_) => panic!("sse without a url should fail"),
        };
        assert!(matches!(err, AgentError::ToolDiscovery { ref server, .. } if server == "events"));
    }
}
