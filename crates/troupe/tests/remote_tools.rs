//! MCP discovery against in-process servers: a streamable-HTTP endpoint and
//! an SSE endpoint served by axum, plus a stdio server run through `sh`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use troupe::error::AgentError;
use troupe::tools::Tool;
use troupe::tools::remote::{
    McpDiscovery, ServerConnection, ToolDiscovery, ToolTransportConfig, discover_all,
};

// ── Stub MCP server ─────────────────────────────────────────────────

fn lookup_descriptor() -> Value {
    json!({
        "name": "lookup",
        "description": "Look up a company",
        "inputSchema": {
            "type": "object",
            "properties": {"company": {"type": "string"}},
            "required": ["company"]
        }
    })
}

/// The JSON-RPC response to `body`, or `None` for notifications.
fn answer(body: &Value) -> Option<Value> {
    let id = body.get("id")?.clone();
    let result = match body["method"].as_str().unwrap_or_default() {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "stub", "version": "0.0.1"}
        }),
        // Two pages, to exercise the cursor.
        "tools/list" => match body["params"]["cursor"].as_str() {
            None => json!({"tools": [lookup_descriptor()], "nextCursor": "page-2"}),
            Some("page-2") => json!({"tools": [{"name": "weather", "description": "Forecast"}]}),
            Some(other) => {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32602, "message": format!("unknown cursor {other}")}
                }));
            }
        },
        "tools/call" => match body["params"]["name"].as_str() {
            Some("lookup") => {
                let company = body["params"]["arguments"]["company"].as_str().unwrap_or("?");
                json!({"content": [{"type": "text", "text": format!("{company} makes widgets")}]})
            }
            _ => json!({"content": [{"type": "text", "text": "no forecast today"}], "isError": true}),
        },
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("no method {other}")}
            }));
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// Method name and `Mcp-Session-Id` header of every request received.
type RequestLog = Arc<Mutex<Vec<(String, Option<String>)>>>;

async fn streamable_endpoint(
    State(log): State<RequestLog>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    log.lock().unwrap().push((method.clone(), session));

    let Some(reply) = answer(&body) else {
        return StatusCode::ACCEPTED.into_response();
    };
    match method.as_str() {
        "initialize" => {
            let mut response = Json(reply).into_response();
            response
                .headers_mut()
                .insert("mcp-session-id", HeaderValue::from_static("session-1"));
            response
        }
        // Tool results come back as an event-stream body.
        "tools/call" => (
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("event: message\ndata: {reply}\n\n"),
        )
            .into_response(),
        _ => Json(reply).into_response(),
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn streamable_server() -> (SocketAddr, RequestLog) {
    let log = RequestLog::default();
    let router = Router::new()
        .route("/mcp", post(streamable_endpoint))
        .with_state(log.clone());
    (serve(router).await, log)
}

// ── Streamable HTTP ─────────────────────────────────────────────────

#[tokio::test]
async fn streamable_http_pages_tools_and_calls_them() {
    let (addr, log) = streamable_server().await;
    let connection = ServerConnection::http(format!("http://{addr}/mcp"));

    let tools = McpDiscovery::new().discover("stub", &connection).await.unwrap();
    let names: Vec<String> = tools.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["lookup", "weather"]);
    assert_eq!(tools[0].description(), "Look up a company");
    assert_eq!(tools[1].definition().function.parameters["type"], "object");

    assert_eq!(tools[0].execute(r#"{"company": "Acme"}"#).await, "Acme makes widgets");
    assert_eq!(tools[1].execute("").await, "Error: no forecast today");

    let log = log.lock().unwrap().clone();
    let methods: Vec<&str> = log.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(
        methods,
        vec![
            "initialize",
            "notifications/initialized",
            "tools/list",
            "tools/list",
            "tools/call",
            "tools/call",
        ]
    );
    assert_eq!(log[0].1, None);
    assert!(log[1..].iter().all(|(_, s)| s.as_deref() == Some("session-1")));
}

#[tokio::test]
async fn one_unreachable_server_fails_the_whole_load() {
    let (addr, _log) = streamable_server().await;
    let mut config = ToolTransportConfig::new();
    config.insert("stub".into(), ServerConnection::http(format!("http://{addr}/mcp")));
    config.insert(
        "missing".into(),
        ServerConnection::stdio("/nonexistent/troupe-mcp-server", Vec::<String>::new()),
    );

    let err = match discover_all(&McpDiscovery::new(), &config).await {
        Err(e) => e,
        Ok(tools) => panic!("expected failure, got {} tool(s)", tools.len()),
    };
    assert!(matches!(err, AgentError::ToolDiscovery { ref server, .. } if server == "missing"));

    config.remove("missing");
    let tools = discover_all(&McpDiscovery::new(), &config).await.unwrap();
    assert_eq!(tools.len(), 2);
}

// ── SSE ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct SseStub {
    outbox: mpsc::UnboundedSender<String>,
    inbox: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
}

async fn sse_stream(State(stub): State<SseStub>) -> Response {
    let Some(rx) = stub.inbox.lock().unwrap().take() else {
        return StatusCode::CONFLICT.into_response();
    };
    let endpoint = futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().event("endpoint").data("/messages?session=abc"))
    });
    let messages = futures::stream::unfold(rx, |mut rx| async move {
        let data = rx.recv().await?;
        Some((Ok(Event::default().event("message").data(data)), rx))
    });
    Sse::new(endpoint.chain(messages)).into_response()
}

async fn sse_messages(State(stub): State<SseStub>, Json(body): Json<Value>) -> StatusCode {
    if let Some(reply) = answer(&body) {
        let _ = stub.outbox.send(reply.to_string());
    }
    StatusCode::ACCEPTED
}

#[tokio::test]
async fn sse_transport_routes_responses_from_the_event_stream() {
    let (outbox, inbox) = mpsc::unbounded_channel();
    let stub = SseStub {
        outbox,
        inbox: Arc::new(Mutex::new(Some(inbox))),
    };
    let router = Router::new()
        .route("/sse", get(sse_stream))
        .route("/messages", post(sse_messages))
        .with_state(stub);
    let addr = serve(router).await;

    let connection = ServerConnection::sse(format!("http://{addr}/sse"));
    let tools = McpDiscovery::new().discover("events", &connection).await.unwrap();
    let names: Vec<String> = tools.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["lookup", "weather"]);
    assert_eq!(tools[0].execute(r#"{"company": "Initech"}"#).await, "Initech makes widgets");
}

// ── stdio ───────────────────────────────────────────────────────────

/// Answers requests 1 (initialize), 2 (tools/list) and 3 (tools/call) in
/// order, with a log line and a notification mixed into the output.
#[cfg(unix)]
const STDIO_SERVER: &str = r#"
read -r _initialize
printf '%s\n' 'stub server starting'
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}}}}'
read -r _initialized
read -r _list
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","description":"Ping the server","inputSchema":{"type":"object"}}]}}'
read -r _call
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}'
read -r _rest
"#;

#[cfg(unix)]
#[tokio::test]
async fn stdio_transport_speaks_line_delimited_json() {
    let connection = ServerConnection::stdio("sh", ["-c", STDIO_SERVER]).with_timeout_secs(10);
    let tools = McpDiscovery::new().discover("local", &connection).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name(), "ping");
    assert_eq!(tools[0].description(), "Ping the server");
    assert_eq!(tools[0].execute("{}").await, "pong");
}

#[cfg(unix)]
#[tokio::test]
async fn stdio_server_that_exits_is_a_discovery_error() {
    let connection = ServerConnection::stdio("sh", ["-c", "read -r _line"]);
    let err = match McpDiscovery::new().discover("quitter", &connection).await {
        Err(e) => e,
        Ok(_) => panic!("a server that exits cannot be initialized"),
    };
    assert!(
        matches!(err, AgentError::ToolDiscovery { ref server, ref message } if server == "quitter" && message.contains("closed"))
    );
}
