//! Integration tests for the single-agent runtime.
//!
//! Every test runs against scripted in-process models, so no network access
//! or API key is needed.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::StreamExt;
use troupe::agent::STEP_LIMIT_MESSAGE;
use troupe::api::model::ModelFuture;
use troupe::prelude::*;
use troupe::tools::remote::{DiscoveryFuture, ServerConnection, ToolDiscovery};

// ── Stub models ──────────────────────────────────────────────────────

/// Replies with the content of the last user message.
struct EchoModel;

impl ChatModel for EchoModel {
    fn identifier(&self) -> &str {
        "stub/echo"
    }

    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text().to_string())
            .unwrap_or_default();
        Box::pin(async move { Ok(ModelResponse::text(text)) })
    }
}

/// Replays a fixed script and records the tool names of every request.
#[derive(Default)]
struct ScriptedModel {
    script: Mutex<VecDeque<ModelResponse>>,
    tools_seen: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    fn new(script: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            tools_seen: Mutex::new(Vec::new()),
        })
    }

    fn tools_seen(&self) -> Vec<Vec<String>> {
        self.tools_seen.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.tools_seen.lock().unwrap().len()
    }
}

impl ChatModel for ScriptedModel {
    fn identifier(&self) -> &str {
        "stub/scripted"
    }

    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        self.tools_seen
            .lock()
            .unwrap()
            .push(request.tools.iter().map(|t| t.name().to_string()).collect());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ModelResponse::text("ok"));
        Box::pin(async move { Ok(reply) })
    }
}

/// Fails with a transient error `failures` times, then answers.
struct FlakyModel {
    failures: Mutex<u32>,
}

impl ChatModel for FlakyModel {
    fn identifier(&self) -> &str {
        "stub/flaky"
    }

    fn complete<'a>(&'a self, _request: &'a ModelRequest) -> ModelFuture<'a> {
        let fail = {
            let mut left = self.failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        };
        Box::pin(async move {
            if fail {
                Err("OpenRouter API HTTP 503: overloaded".to_string())
            } else {
                Ok(ModelResponse::text("recovered"))
            }
        })
    }
}

// ── Personas and tools ───────────────────────────────────────────────

/// Sends the conversation as is and starts with no tools.
struct EchoPersona;

impl AgentPersona for EchoPersona {
    fn prompt(&self, state: &AgentState) -> Vec<Message> {
        state.messages.clone()
    }

    fn tools_initial(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }
}

fn named_tool(name: &str) -> Arc<dyn Tool> {
    let def = ToolDef::new(
        name,
        format!("The {name} tool"),
        serde_json::json!({"type": "object", "properties": {}}),
    );
    let label = name.to_string();
    Arc::new(FnTool::new(def, move |_: serde_json::Value| {
        let label = label.clone();
        async move { format!("{label} ran") }
    }))
}

fn metadata(name: &str) -> AgentMetadata {
    AgentMetadata::new(name, ModelBinding::new("stub").with_provider("test"))
}

fn echo_runtime() -> AgentRuntime<EchoPersona> {
    AgentRuntime::builder(metadata("echo"), EchoPersona)
        .with_model(Arc::new(EchoModel))
        .build()
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn echo_end_to_end() {
    let agent = echo_runtime();
    let state = agent.chat(vec![Message::user("hello")], "x").await.unwrap();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.last_text(), "hello");
    assert_eq!(state.messages[1].role, MessageRole::Assistant);
    assert_eq!(state.messages[1].name.as_deref(), Some("echo"));
}

#[tokio::test]
async fn next_invocation_sees_exactly_the_mutated_tools() {
    let model = ScriptedModel::new(Vec::new());
    let mut agent = AgentRuntime::builder(metadata("tooling"), SystemPromptPersona::new("").with_tool(ThinkTool))
        .with_model(model.clone())
        .build()
        .unwrap();

    agent.chat(vec![Message::user("1")], "t").await.unwrap();
    agent.add_tools(vec![named_tool("search"), named_tool("fetch")]).unwrap();
    agent.chat(vec![Message::user("2")], "t").await.unwrap();
    agent.update_tools(vec![named_tool("only")]).unwrap();
    agent.chat(vec![Message::user("3")], "t").await.unwrap();
    agent.update_tools(Vec::new()).unwrap();
    agent.chat(vec![Message::user("4")], "t").await.unwrap();

    assert_eq!(
        model.tools_seen(),
        vec![
            vec!["think".to_string()],
            vec!["think".into(), "search".into(), "fetch".into()],
            vec!["only".into()],
            Vec::<String>::new(),
        ]
    );
}

#[tokio::test]
async fn reset_tools_matches_a_fresh_runtime() {
    let fresh_model = ScriptedModel::new(Vec::new());
    let fresh = AgentRuntime::builder(metadata("a"), SystemPromptPersona::new("sys").with_tool(ThinkTool))
        .with_model(fresh_model.clone())
        .build()
        .unwrap();

    let reset_model = ScriptedModel::new(Vec::new());
    let mut reset = AgentRuntime::builder(metadata("a"), SystemPromptPersona::new("sys").with_tool(ThinkTool))
        .with_model(reset_model.clone())
        .build()
        .unwrap();
    reset.add_tools(vec![named_tool("extra")]).unwrap();
    reset.reset_tools().unwrap();

    let a = fresh.chat(vec![Message::user("hi")], "t").await.unwrap();
    let b = reset.chat(vec![Message::user("hi")], "t").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(fresh_model.tools_seen(), reset_model.tools_seen());
    assert_eq!(reset.tools().names(), vec!["think"]);
}

#[tokio::test]
async fn checkpoint_isolates_threads() {
    let store = Arc::new(MemoryCheckpointer::new());
    let agent = AgentRuntime::builder(metadata("echo"), EchoPersona)
        .with_model(Arc::new(EchoModel))
        .with_checkpoint(CheckpointPolicy::Enabled(store.clone()))
        .build()
        .unwrap();

    agent.chat(vec![Message::user("alpha")], "t1").await.unwrap();
    agent.chat(vec![Message::user("beta")], "t2").await.unwrap();
    let t1 = agent.chat(vec![Message::user("gamma")], "t1").await.unwrap();
    let t2 = agent.chat(vec![Message::user("delta")], "t2").await.unwrap();

    let texts = |state: &AgentState| state.messages.iter().map(|m| m.text().to_string()).collect::<Vec<_>>();
    assert_eq!(texts(&t1), vec!["alpha", "alpha", "gamma", "gamma"]);
    assert_eq!(texts(&t2), vec!["beta", "beta", "delta", "delta"]);

    let mut threads = store.list_threads("echo").await.unwrap();
    threads.sort();
    assert_eq!(threads, vec!["t1", "t2"]);
}

#[tokio::test]
async fn without_checkpointing_each_call_starts_fresh() {
    let agent = echo_runtime();
    agent.chat(vec![Message::user("one")], "t").await.unwrap();
    let state = agent.chat(vec![Message::user("two")], "t").await.unwrap();
    assert_eq!(state.messages.len(), 2);
}

#[tokio::test]
async fn file_checkpointer_survives_runtime_restart() {
    let dir = tempfile::tempdir().unwrap();
    let build = || {
        AgentRuntime::builder(metadata("echo"), EchoPersona)
            .with_model(Arc::new(EchoModel))
            .with_checkpoint(CheckpointPolicy::enabled(FileCheckpointer::new(dir.path()).unwrap()))
            .build()
            .unwrap()
    };

    build().chat(vec![Message::user("first")], "session").await.unwrap();
    let state = build().chat(vec![Message::user("second")], "session").await.unwrap();
    assert_eq!(state.messages.len(), 4);
    assert_eq!(state.messages[0].text(), "first");
}

#[tokio::test]
async fn streaming_is_deterministic() {
    let script = || {
        vec![
            ModelResponse::tool_calls(vec![ToolCall::new("c1", "search", "{}")]),
            ModelResponse::text("found it"),
        ]
    };
    let options = RuntimeOptions::default().with_stream_modes([StreamMode::Updates, StreamMode::Messages]);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut agent = AgentRuntime::builder(metadata("streamer"), EchoPersona)
            .with_model(ScriptedModel::new(script()))
            .with_options(options.clone())
            .build()
            .unwrap();
        agent.add_tools(vec![named_tool("search")]).unwrap();
        let chunks: Vec<StreamChunk> = agent
            .chat_stream(vec![Message::user("look")], "t")
            .map(|c| c.unwrap())
            .collect()
            .await;
        runs.push(chunks);
    }

    assert_eq!(runs[0], runs[1]);
    let deltas: String = runs[0]
        .iter()
        .filter_map(|c| match c {
            StreamChunk::MessageDelta { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, "found it");
    let update_nodes: Vec<&str> = runs[0]
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Update { node, .. } => Some(node.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(update_nodes, vec!["agent", "tools", "agent"]);
}

#[tokio::test]
async fn dropping_a_stream_stops_the_run() {
    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![ToolCall::new("c1", "search", "{}")]),
        ModelResponse::text("never reached"),
    ]);
    let mut agent = AgentRuntime::builder(metadata("cancel"), EchoPersona)
        .with_model(model.clone())
        .build()
        .unwrap();
    agent.add_tools(vec![named_tool("search")]).unwrap();

    let mut stream = agent.chat_stream(vec![Message::user("go")], "t");
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, StreamChunk::Message { ref message, .. } if message.has_tool_calls()));
    drop(stream);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn stream_rejects_empty_input() {
    let agent = echo_runtime();
    let items: Vec<_> = agent.chat_stream(Vec::new(), "t").collect().await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(AgentError::InvalidRequest(_))));
}

#[tokio::test]
async fn step_limit_answers_with_apology() {
    let looping: Vec<ModelResponse> = (0..10)
        .map(|i| ModelResponse::tool_calls(vec![ToolCall::new(format!("c{i}"), "search", "{}")]))
        .collect();
    let mut agent = AgentRuntime::builder(metadata("looper"), EchoPersona)
        .with_model(ScriptedModel::new(looping))
        .with_options(RuntimeOptions::default().with_max_steps(5))
        .build()
        .unwrap();
    agent.add_tools(vec![named_tool("search")]).unwrap();

    let state = agent.chat(vec![Message::user("loop")], "t").await.unwrap();
    assert_eq!(state.last_text(), STEP_LIMIT_MESSAGE);
}

#[tokio::test]
async fn transient_model_errors_are_retried_within_budget() {
    let build = |retries: u32| {
        let options = RuntimeOptions::default().with_retry(troupe::api::RetryConfig::default().immediate());
        AgentRuntime::builder(
            metadata("flaky").with_sampling(SamplingParameters {
                max_retries: Some(retries),
                ..Default::default()
            }),
            EchoPersona,
        )
        .with_model(Arc::new(FlakyModel {
            failures: Mutex::new(2),
        }))
        .with_options(options)
        .build()
        .unwrap()
    };

    let state = build(2).chat(vec![Message::user("hi")], "t").await.unwrap();
    assert_eq!(state.last_text(), "recovered");

    let err = build(1).chat(vec![Message::user("hi")], "t").await.unwrap_err();
    assert!(matches!(err, AgentError::Invocation(_)));
}

// ── Remote tools ─────────────────────────────────────────────────────

/// Serves `named_tool`s for every server except those named `broken*`.
struct FakeDiscovery;

impl ToolDiscovery for FakeDiscovery {
    fn discover<'a>(&'a self, server: &'a str, _connection: &'a ServerConnection) -> DiscoveryFuture<'a> {
        Box::pin(async move {
            if server.starts_with("broken") {
                Err(AgentError::tool_discovery(server, "connection refused"))
            } else {
                Ok(vec![named_tool(&format!("{server}_a")), named_tool(&format!("{server}_b"))])
            }
        })
    }
}

#[tokio::test]
async fn remote_tools_load_all_or_nothing() {
    let mut agent = echo_runtime();
    let generation = agent.generation();

    let mut config = ToolTransportConfig::new();
    config.insert("docs".into(), ServerConnection::http("http://localhost:1/mcp"));
    config.insert("broken".into(), ServerConnection::http("http://localhost:2/mcp"));
    let err = agent.load_remote_tools(&FakeDiscovery, &config).await.unwrap_err();
    assert!(matches!(err, AgentError::ToolDiscovery { ref server, .. } if server == "broken"));
    assert!(agent.tools().is_empty());
    assert_eq!(agent.generation(), generation);

    config.remove("broken");
    let added = agent.load_remote_tools(&FakeDiscovery, &config).await.unwrap();
    assert_eq!(added, 2);
    assert_eq!(agent.tools().names(), vec!["docs_a", "docs_b"]);
    assert!(agent.current_graph().unwrap().tool_names().contains(&"docs_b".to_string()));
}

#[tokio::test]
async fn structured_response_is_stored_in_state() {
    #[derive(serde::Deserialize, schemars::JsonSchema)]
    #[allow(dead_code)]
    struct Pick {
        company: String,
    }

    let model = ScriptedModel::new(vec![
        ModelResponse::text("Acme looks right."),
        ModelResponse::text(r#"{"company": "Acme"}"#),
    ]);
    let agent = AgentRuntime::builder(metadata("picker"), EchoPersona)
        .with_model(model)
        .with_options(RuntimeOptions::default().with_response_format(ResponseFormat::for_type::<Pick>("pick")))
        .build()
        .unwrap();

    let state = agent.chat(vec![Message::user("pick")], "t").await.unwrap();
    assert_eq!(state.structured_response.as_ref().unwrap()["company"], "Acme");
    assert_eq!(state.last_text(), "Acme looks right.");
}
