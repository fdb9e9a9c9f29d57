//! JSON-RPC channels to MCP servers.
//!
//! A [`Channel`] moves one request body to a server and hands back the
//! response payload carrying the same id. Three transports are supported:
//!
//! | Transport | Requests | Responses |
//! |-----------|----------|-----------|
//! | `streamable_http` | `POST` to the endpoint | JSON body, or an SSE body |
//! | `sse` | `POST` to the endpoint announced on the event stream | `message` events on the long-lived `GET` stream |
//! | `stdio` | newline-delimited JSON on the child's stdin | newline-delimited JSON on its stdout |

use super::remote::{ServerConnection, TransportKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub(crate) enum Channel {
    Http(HttpChannel),
    Sse(SseChannel),
    Stdio(StdioChannel),
}

impl Channel {
    pub(crate) async fn open(server: &str, connection: &ServerConnection) -> Result<Self, String> {
        let timeout = Duration::from_secs(connection.timeout_secs);
        match connection.transport {
            TransportKind::StreamableHttp => HttpChannel::new(connection, timeout).map(Self::Http),
            TransportKind::Sse => SseChannel::open(server, connection, timeout)
                .await
                .map(Self::Sse),
            TransportKind::Stdio => StdioChannel::spawn(server, connection, timeout).map(Self::Stdio),
        }
    }

    /// Send `body` and wait for the payload whose `id` is `id`.
    pub(crate) async fn request(&self, id: i64, body: &Value) -> Result<Value, String> {
        match self {
            Self::Http(http) => http.request(id, body).await,
            Self::Sse(sse) => sse.request(id, body).await,
            Self::Stdio(stdio) => stdio.request(id, body).await,
        }
    }

    /// Send a message that gets no response.
    pub(crate) async fn notify(&self, body: &Value) -> Result<(), String> {
        match self {
            Self::Http(http) => http.post(body).await.map(|_| ()),
            Self::Sse(sse) => sse.post(body).await,
            Self::Stdio(stdio) => stdio.write(body).await,
        }
    }
}

fn auth_headers(connection: &ServerConnection) -> BTreeMap<String, String> {
    let mut headers = connection.headers.clone();
    if let Some(ref token) = connection.auth_token {
        headers.insert("Authorization".into(), format!("Bearer {token}"));
    }
    headers
}

fn with_headers(
    mut request: reqwest::RequestBuilder,
    headers: &BTreeMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name, value);
    }
    request
}

fn require_url(connection: &ServerConnection) -> Result<String, String> {
    connection
        .url
        .clone()
        .ok_or_else(|| format!("{:?} transport requires a url", connection.transport))
}

fn response_id(payload: &Value) -> Option<i64> {
    payload.get("id").and_then(|i| i.as_i64())
}

// ── Streamable HTTP ────────────────────────────────────────────────

pub(crate) struct HttpChannel {
    endpoint: String,
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
    session_id: Mutex<Option<String>>,
}

impl HttpChannel {
    fn new(connection: &ServerConnection, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            endpoint: require_url(connection)?,
            client,
            headers: auth_headers(connection),
            session_id: Mutex::new(None),
        })
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, String> {
        let mut request = with_headers(
            self.client
                .post(&self.endpoint)
                .header("Accept", "application/json, text/event-stream")
                .json(body),
            &self.headers,
        );
        if let Some(id) = self.current_session_id() {
            request = request.header("Mcp-Session-Id", id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {text}"));
        }
        Ok(response)
    }

    async fn request(&self, id: i64, body: &Value) -> Result<Value, String> {
        let response = self.post(body).await?;

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(session.to_string());
        }

        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        if is_sse {
            find_sse_response(&text, id)
                .ok_or_else(|| format!("no response for request {id} in event stream"))
        } else {
            serde_json::from_str(&text).map_err(|e| format!("invalid JSON-RPC response: {e}"))
        }
    }
}

/// Pick the JSON-RPC response with the given id out of an SSE body.
pub(crate) fn find_sse_response(body: &str, id: i64) -> Option<Value> {
    let mut events = EventBuffer::default();
    let mut parsed = events.push(body.as_bytes());
    parsed.extend(events.push(b"\n\n"));
    parsed
        .into_iter()
        .filter_map(|(_, data)| serde_json::from_str::<Value>(&data).ok())
        .find(|v| response_id(v) == Some(id))
}

// ── SSE (HTTP POST + event stream) ─────────────────────────────────

/// Splits an SSE byte stream into `(event, data)` pairs.
#[derive(Default)]
struct EventBuffer {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<(String, String)> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    let event = self.event.take().unwrap_or_else(|| "message".into());
                    out.push((event, self.data.join("\n")));
                    self.data.clear();
                }
                self.event = None;
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        out
    }
}

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

pub(crate) struct SseChannel {
    post_url: String,
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    pending: Pending,
    reader: JoinHandle<()>,
}

impl SseChannel {
    async fn open(server: &str, connection: &ServerConnection, timeout: Duration) -> Result<Self, String> {
        let url = require_url(connection)?;
        let base = reqwest::Url::parse(&url).map_err(|e| format!("invalid url '{url}': {e}"))?;
        // The event stream stays open for the session, so only connecting
        // and individual POSTs are bounded.
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        let headers = auth_headers(connection);

        let mut response = with_headers(
            client.get(base.clone()).header("Accept", "text/event-stream"),
            &headers,
        )
        .send()
        .await
        .map_err(|e| format!("failed to open event stream: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}: event stream refused", response.status()));
        }

        let mut events = EventBuffer::default();
        let endpoint = tokio::time::timeout(timeout, async {
            loop {
                let Some(bytes) = response
                    .chunk()
                    .await
                    .map_err(|e| format!("event stream failed: {e}"))?
                else {
                    return Err("event stream closed before announcing an endpoint".to_string());
                };
                if let Some((_, data)) = events.push(&bytes).into_iter().find(|(e, _)| e == "endpoint") {
                    return Ok(data);
                }
            }
        })
        .await
        .map_err(|_| "timed out waiting for the endpoint event".to_string())??;

        let post_url = base
            .join(endpoint.trim())
            .map_err(|e| format!("invalid endpoint '{endpoint}': {e}"))?
            .to_string();
        debug!("Server '{server}' accepts messages at {post_url}");

        let pending: Pending = Arc::default();
        let reader = tokio::spawn(read_events(
            server.to_string(),
            response,
            events,
            Arc::clone(&pending),
        ));

        Ok(Self {
            post_url,
            client,
            headers,
            timeout,
            pending,
            reader,
        })
    }

    async fn post(&self, body: &Value) -> Result<(), String> {
        let response = with_headers(
            self.client.post(&self.post_url).timeout(self.timeout).json(body),
            &self.headers,
        )
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {text}"));
        }
        Ok(())
    }

    async fn request(&self, id: i64, body: &Value) -> Result<Value, String> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let outcome = match self.post(body).await {
            Ok(()) => tokio::time::timeout(self.timeout, rx)
                .await
                .map_err(|_| format!("no response for request {id} within {}s", self.timeout.as_secs()))
                .and_then(|r| r.map_err(|_| "event stream closed".to_string())),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
        }
        outcome
    }
}

impl Drop for SseChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Route `message` events to the requests waiting for them.
async fn read_events(
    server: String,
    mut response: reqwest::Response,
    mut events: EventBuffer,
    pending: Pending,
) {
    loop {
        let bytes = match response.chunk().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                warn!("Event stream of '{server}' failed: {e}");
                break;
            }
        };
        for (event, data) in events.push(&bytes) {
            if event != "message" {
                continue;
            }
            let Ok(payload) = serde_json::from_str::<Value>(&data) else {
                trace!("Ignoring non-JSON event from '{server}': {data}");
                continue;
            };
            let waiter = response_id(&payload).and_then(|id| {
                pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id)
            });
            match waiter {
                Some(tx) => {
                    let _ = tx.send(payload);
                }
                None => trace!("Unclaimed message from '{server}': {data}"),
            }
        }
    }
    debug!("Event stream of '{server}' ended");
    pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

// ── stdio ──────────────────────────────────────────────────────────

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    _child: Child,
}

pub(crate) struct StdioChannel {
    server: String,
    pipes: tokio::sync::Mutex<StdioPipes>,
    timeout: Duration,
}

impl StdioChannel {
    fn spawn(server: &str, connection: &ServerConnection, timeout: Duration) -> Result<Self, String> {
        let command = connection
            .command
            .as_deref()
            .ok_or_else(|| "stdio transport requires a command".to_string())?;
        let mut child = Command::new(command)
            .args(&connection.args)
            .envs(&connection.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn '{command}': {e}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| format!("no stdin for '{command}'"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| format!("no stdout for '{command}'"))?;
        debug!("Spawned '{command}' for server '{server}'");

        Ok(Self {
            server: server.to_string(),
            pipes: tokio::sync::Mutex::new(StdioPipes {
                stdin,
                stdout: BufReader::new(stdout),
                _child: child,
            }),
            timeout,
        })
    }

    async fn write(&self, body: &Value) -> Result<(), String> {
        let mut pipes = self.pipes.lock().await;
        write_line(&mut pipes.stdin, body).await
    }

    /// Exchanges are serialized: the pipe lock is held until the matching
    /// response has been read.
    async fn request(&self, id: i64, body: &Value) -> Result<Value, String> {
        let mut pipes = self.pipes.lock().await;
        write_line(&mut pipes.stdin, body).await?;

        let read = async {
            let mut line = String::new();
            loop {
                line.clear();
                let n = pipes
                    .stdout
                    .read_line(&mut line)
                    .await
                    .map_err(|e| format!("failed to read from server: {e}"))?;
                if n == 0 {
                    return Err("server closed its output".to_string());
                }
                let Ok(payload) = serde_json::from_str::<Value>(line.trim()) else {
                    trace!("Skipping non-JSON output from '{}': {}", self.server, line.trim());
                    continue;
                };
                if response_id(&payload) == Some(id) {
                    return Ok(payload);
                }
                trace!("Skipping unrelated message from '{}'", self.server);
            }
        };
        tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| format!("no response for request {id} within {}s", self.timeout.as_secs()))?
    }
}

async fn write_line(stdin: &mut ChildStdin, body: &Value) -> Result<(), String> {
    let mut line = serde_json::to_vec(body).map_err(|e| format!("failed to encode request: {e}"))?;
    line.push(b'\n');
    stdin
        .write_all(&line)
        .await
        .map_err(|e| format!("failed to write to server: {e}"))?;
    stdin
        .flush()
        .await
        .map_err(|e| format!("failed to write to server: {e}"))
}
