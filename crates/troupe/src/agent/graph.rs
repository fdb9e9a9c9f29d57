//! Compiled execution graphs.
//!
//! An [`ExecutionGraph`] is the immutable product of compiling an agent's
//! inputs: the resolved model, a snapshot of its tools, the persona's
//! prompt strategy, the optional structured-response format and pre-model
//! hook, the state schema, and the checkpoint policy. Runtimes rebuild it
//! whenever an input changes and share it through an `Arc`, so an
//! invocation that is already running keeps the graph it started with.
//!
//! # Nodes
//!
//! ```text
//!            ┌──────────── tool calls ────────────┐
//!            v                                    │
//! start ─> agent ──(no tool calls)──> [respond] ──┴─> end
//!            ^                                    │
//!            └────────────── tools <──────────────┘
//! ```
//!
//! - **agent** runs the pre-model hook, builds the prompt, and calls the
//!   model. When fewer than two steps remain and the model still wants
//!   tools, the reply is replaced by [`STEP_LIMIT_MESSAGE`].
//! - **tools** executes every tool call of the last assistant message in
//!   order. Calls to `transfer_to_<agent>` run the embedded child graph.
//! - **generate_structured_response** runs once after the loop when a
//!   response format is configured and validates the model's JSON against
//!   the schema.
//!
//! State is checkpointed after every completed step.

use crate::agent::checkpoint::{Checkpoint, CheckpointPolicy, ThreadKey};
use crate::agent::config::RuntimeOptions;
use crate::agent::hooks::PreModelHook;
use crate::agent::metadata::SamplingParameters;
use crate::agent::persona::AgentPersona;
use crate::agent::service::{AgentFuture, ChunkStream, error_stream};
use crate::agent::state::{AgentState, StateSchema, add_messages};
use crate::agent::stream::{StreamChunk, StreamMode, StreamModes};
use crate::api::model::{ChatModel, DeltaStream, ModelRequest, ModelResponse, ResponseFormat};
use crate::api::retry::{RetryConfig, with_retry};
use crate::api::streaming::{ResponseAssembler, StreamEvent};
use crate::error::{AgentError, AgentResult};
use crate::tools::core::ToolRegistry;
use crate::{Message, MessageRole, ToolCall, ToolDef};
use futures::StreamExt;
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reply substituted when the step budget runs out mid-task.
pub const STEP_LIMIT_MESSAGE: &str = "Sorry, need more steps to process this request.";

/// Prefix of the tools a supervisor uses to delegate to a child.
pub const HANDOFF_PREFIX: &str = "transfer_to_";

/// Name of the handoff tool that delegates to `agent`.
pub fn handoff_tool_name(agent: &str) -> String {
    format!("{HANDOFF_PREFIX}{agent}")
}

// ── Graph ──────────────────────────────────────────────────────────

/// A child graph a supervisor can delegate to.
#[derive(Clone)]
pub struct Delegate {
    pub name: String,
    pub description: String,
    pub graph: Arc<ExecutionGraph>,
}

impl Delegate {
    fn handoff_definition(&self) -> ToolDef {
        let description = if self.description.is_empty() {
            format!("Ask agent '{}' for help.", self.name)
        } else {
            format!("Ask agent '{}' for help. {}", self.name, self.description)
        };
        ToolDef::new(
            handoff_tool_name(&self.name),
            description,
            json!({"type": "object", "properties": {}}),
        )
    }
}

/// An immutable, invocable agent graph.
#[derive(Clone)]
pub struct ExecutionGraph {
    name: String,
    model: Arc<dyn ChatModel>,
    sampling: SamplingParameters,
    tools: ToolRegistry,
    persona: Arc<dyn AgentPersona>,
    response_format: Option<ResponseFormat>,
    response_validator: Option<Arc<jsonschema::Validator>>,
    pre_model_hook: Option<Arc<dyn PreModelHook>>,
    state_schema: StateSchema,
    checkpoint: CheckpointPolicy,
    stream_modes: StreamModes,
    max_steps: u32,
    retry: RetryConfig,
    delegates: Vec<Delegate>,
    generation: u64,
}

impl fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("name", &self.name)
            .field("model", &self.model.identifier())
            .field("tools", &self.tools.names())
            .field(
                "delegates",
                &self.delegates.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            )
            .field("checkpoint", &self.checkpoint)
            .field("generation", &self.generation)
            .finish()
    }
}

impl ExecutionGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation of the runtime inputs this graph was compiled from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn model_identifier(&self) -> &str {
        self.model.identifier()
    }

    /// Names of the tools in this graph's snapshot (handoffs excluded).
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    /// Definitions sent to the model: regular tools followed by handoffs.
    pub fn tool_definitions(&self) -> Vec<ToolDef> {
        let mut defs = self.tools.definitions();
        defs.extend(self.delegates.iter().map(Delegate::handoff_definition));
        defs
    }

    pub fn delegates(&self) -> &[Delegate] {
        &self.delegates
    }

    pub fn checkpoint_policy(&self) -> &CheckpointPolicy {
        &self.checkpoint
    }

    pub fn stream_modes(&self) -> &StreamModes {
        &self.stream_modes
    }

    /// Copy of this graph as it runs inside a parent with `parent` policy.
    /// `Inherit` resolves to the parent's store, recursively for nested
    /// children.
    pub fn embedded_under(&self, parent: &CheckpointPolicy) -> ExecutionGraph {
        let checkpoint = self.checkpoint.resolve_under(parent);
        let delegates = self
            .delegates
            .iter()
            .map(|d| Delegate {
                graph: Arc::new(d.graph.embedded_under(&checkpoint)),
                ..d.clone()
            })
            .collect();
        ExecutionGraph {
            checkpoint,
            delegates,
            ..self.clone()
        }
    }

    fn delegate_for(&self, tool_name: &str) -> Option<&Delegate> {
        let agent = tool_name.strip_prefix(HANDOFF_PREFIX)?;
        self.delegates.iter().find(|d| d.name == agent)
    }

    fn token_streaming(&self) -> bool {
        self.stream_modes.contains(StreamMode::Messages) && self.sampling.streaming != Some(false)
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.sampling.max_retries.unwrap_or(0),
            ..self.retry.clone()
        }
    }

    async fn call_model(&self, request: &ModelRequest) -> AgentResult<ModelResponse> {
        let label = format!("model call for '{}'", self.name);
        with_retry(&self.retry_config(), &label, || self.model.complete(request))
            .await
            .map_err(|e| {
                AgentError::invocation(format!("model '{}' failed: {e}", self.model.identifier()))
            })
    }

    /// Run to completion on `thread_id`.
    pub fn invoke<'a>(
        self: &'a Arc<Self>,
        input: Vec<Message>,
        thread_id: &'a str,
    ) -> AgentFuture<'a, AgentState> {
        Box::pin(async move {
            let mut run = GraphRun::start(Arc::clone(self), input, thread_id).await?;
            while run.next != Node::End {
                run.step().await?;
            }
            debug!(
                "Agent '{}' finished thread '{thread_id}' with {} message(s)",
                self.name,
                run.state.messages.len()
            );
            Ok(run.state)
        })
    }

    /// Run on `thread_id`, yielding units for the configured stream modes.
    /// Lazy: nothing runs until the first poll.
    pub fn stream(self: &Arc<Self>, input: Vec<Message>, thread_id: &str) -> ChunkStream {
        if input.is_empty() {
            return error_stream(AgentError::invalid_request("message list is empty"));
        }
        let driver = StreamDriver {
            graph: Arc::clone(self),
            start: Some((input, thread_id.to_string())),
            run: None,
            inflight: None,
            queue: VecDeque::new(),
            done: false,
        };
        Box::pin(futures::stream::unfold(driver, |mut driver| async move {
            driver.next_chunk().await.map(|item| (item, driver))
        }))
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Collects graph inputs and compiles them into an [`ExecutionGraph`].
pub struct GraphBuilder {
    name: String,
    model: Option<Arc<dyn ChatModel>>,
    sampling: SamplingParameters,
    tools: ToolRegistry,
    persona: Option<Arc<dyn AgentPersona>>,
    options: RuntimeOptions,
    delegates: Vec<Delegate>,
    generation: u64,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            sampling: SamplingParameters::default(),
            tools: ToolRegistry::new(),
            persona: None,
            options: RuntimeOptions::default(),
            delegates: Vec::new(),
            generation: 0,
        }
    }

    pub fn model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn sampling(mut self, sampling: SamplingParameters) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn persona(mut self, persona: Arc<dyn AgentPersona>) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Embed `graph` as a delegation target.
    pub fn delegate(mut self, name: impl Into<String>, description: impl Into<String>, graph: Arc<ExecutionGraph>) -> Self {
        self.delegates.push(Delegate {
            name: name.into(),
            description: description.into(),
            graph,
        });
        self
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn compile(self) -> AgentResult<ExecutionGraph> {
        if self.name.trim().is_empty() {
            return Err(AgentError::configuration("agent name is empty"));
        }
        let model = self.model.ok_or_else(|| {
            AgentError::configuration(format!("no model bound to agent '{}'", self.name))
        })?;
        let persona = self.persona.ok_or_else(|| {
            AgentError::configuration(format!("no persona set for agent '{}'", self.name))
        })?;
        self.options.validate()?;

        let response_validator = match self.options.response_format {
            Some(ref format) => Some(Arc::new(jsonschema::validator_for(&format.schema).map_err(|e| {
                AgentError::configuration(format!("invalid response schema '{}': {e}", format.name))
            })?)),
            None => None,
        };

        let tool_names = self.tools.names();
        let mut delegates: Vec<Delegate> = Vec::with_capacity(self.delegates.len());
        for delegate in self.delegates {
            if delegates.iter().any(|d| d.name == delegate.name) {
                return Err(AgentError::configuration(format!(
                    "duplicate child agent name '{}'",
                    delegate.name
                )));
            }
            let handoff = handoff_tool_name(&delegate.name);
            if tool_names.contains(&handoff) {
                return Err(AgentError::configuration(format!(
                    "tool '{handoff}' clashes with the handoff to child agent '{}'",
                    delegate.name
                )));
            }
            let graph = Arc::new(delegate.graph.embedded_under(&self.options.checkpoint));
            delegates.push(Delegate { graph, ..delegate });
        }

        debug!(
            "Compiled graph '{}' (generation {}): model={}, tools={:?}, delegates={}",
            self.name,
            self.generation,
            model.identifier(),
            tool_names,
            delegates.len()
        );

        Ok(ExecutionGraph {
            name: self.name,
            model,
            sampling: self.sampling,
            tools: self.tools,
            persona,
            response_format: self.options.response_format,
            response_validator,
            pre_model_hook: self.options.pre_model_hook,
            state_schema: self.options.state_schema,
            checkpoint: self.options.checkpoint,
            stream_modes: self.options.stream_modes,
            max_steps: self.options.max_steps,
            retry: self.options.retry,
            delegates,
            generation: self.generation,
        })
    }
}

// ── Execution ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Agent,
    Tools,
    Respond,
    End,
}

impl Node {
    fn label(self) -> &'static str {
        match self {
            Node::Agent => "agent",
            Node::Tools => "tools",
            Node::Respond => "generate_structured_response",
            Node::End => "end",
        }
    }
}

/// Messages produced by one node execution.
struct StepOutput {
    node: Node,
    messages: Vec<Message>,
}

/// One in-progress invocation of a graph on a thread.
struct GraphRun {
    graph: Arc<ExecutionGraph>,
    thread_id: String,
    key: Option<ThreadKey>,
    state: AgentState,
    next: Node,
    step: u64,
}

impl GraphRun {
    async fn start(graph: Arc<ExecutionGraph>, input: Vec<Message>, thread_id: &str) -> AgentResult<Self> {
        if input.is_empty() {
            return Err(AgentError::invalid_request("message list is empty"));
        }
        let key = graph
            .checkpoint
            .store()
            .map(|_| ThreadKey::new(thread_id, graph.name.clone()));

        let mut state = AgentState::default();
        let mut step = 0;
        if let (Some(store), Some(key)) = (graph.checkpoint.store(), key.as_ref())
            && let Some(checkpoint) = store.load(key).await?
        {
            debug!("Resuming {key} at step {}", checkpoint.step);
            state = checkpoint.state;
            step = checkpoint.step;
        }

        graph.state_schema.apply_defaults(&mut state.values);
        state.remaining_steps = graph.max_steps;
        state.structured_response = None;
        add_messages(&graph.name, &mut state.messages, input);

        info!(
            "Agent '{}' invoked on thread '{thread_id}' ({} message(s) in state)",
            graph.name,
            state.messages.len()
        );
        Ok(Self {
            graph,
            thread_id: thread_id.to_string(),
            key,
            state,
            next: Node::Agent,
            step,
        })
    }

    async fn step(&mut self) -> AgentResult<StepOutput> {
        let output = match self.next {
            Node::Agent => {
                let request = self.prepare_request();
                let response = self.graph.call_model(&request).await?;
                self.finish_agent(response)
            }
            Node::Tools => self.run_tools().await?,
            Node::Respond => self.run_respond().await?,
            Node::End => {
                return Ok(StepOutput {
                    node: Node::End,
                    messages: Vec::new(),
                });
            }
        };
        self.commit().await?;
        Ok(output)
    }

    /// Run the pre-model hook and build the model request.
    fn prepare_request(&mut self) -> ModelRequest {
        let graph = Arc::clone(&self.graph);
        let mut prompt_view: Option<AgentState> = None;
        if let Some(ref hook) = graph.pre_model_hook {
            let outcome = hook.before_model(&self.state);
            if let Some(messages) = outcome.messages {
                self.state.messages.clear();
                add_messages(&graph.name, &mut self.state.messages, messages);
            }
            if let Some(input) = outcome.llm_input_messages {
                prompt_view = Some(AgentState {
                    messages: input,
                    ..self.state.clone()
                });
            }
        }

        let view = prompt_view.as_ref().unwrap_or(&self.state);
        ModelRequest {
            messages: graph.persona.prompt(view),
            tools: graph.tool_definitions(),
            sampling: graph.sampling.clone(),
            response_format: None,
        }
    }

    fn finish_agent(&mut self, response: ModelResponse) -> StepOutput {
        let mut message = response.into_message().named(self.graph.name.clone());
        if message.has_tool_calls() && self.state.remaining_steps < 2 {
            warn!(
                "Agent '{}' ran out of steps with {} pending tool call(s)",
                self.graph.name,
                message.calls().len()
            );
            message = Message::assistant_text(STEP_LIMIT_MESSAGE).named(self.graph.name.clone());
        }

        self.next = if message.has_tool_calls() {
            Node::Tools
        } else if self.graph.response_format.is_some() {
            Node::Respond
        } else {
            Node::End
        };
        self.append(Node::Agent, vec![message])
    }

    async fn run_tools(&mut self) -> AgentResult<StepOutput> {
        let calls: Vec<ToolCall> = self
            .state
            .last_message()
            .map(|m| m.calls().to_vec())
            .unwrap_or_default();

        let mut produced = Vec::with_capacity(calls.len());
        for call in &calls {
            let name = &call.function.name;
            match self.graph.delegate_for(name) {
                Some(delegate) => {
                    let delegate = delegate.clone();
                    produced.extend(self.handoff(&delegate, call).await?);
                }
                None => {
                    let result = self.graph.tools.execute(name, &call.function.arguments).await;
                    produced.push(Message::tool_result(call.id.clone(), result).named(name.clone()));
                }
            }
        }

        self.next = Node::Agent;
        Ok(self.append(Node::Tools, produced))
    }

    /// Run a child graph on the conversation so far and bring its answer
    /// back into this graph's state.
    async fn handoff(&self, delegate: &Delegate, call: &ToolCall) -> AgentResult<Vec<Message>> {
        let history: Vec<Message> = self
            .state
            .messages
            .iter()
            .take(self.state.messages.len().saturating_sub(1))
            .cloned()
            .collect();
        info!(
            "Agent '{}' delegating thread '{}' to '{}'",
            self.graph.name, self.thread_id, delegate.name
        );

        let child_state = delegate.graph.invoke(history, &self.thread_id).await?;
        let mut messages = vec![
            Message::tool_result(
                call.id.clone(),
                format!("Successfully transferred to {}", delegate.name),
            )
            .named(call.function.name.clone()),
        ];
        if let Some(reply) = child_state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
        {
            // Keeps the child's id so the copy merges with the child's own
            // message when this history is handed over again.
            let mut reply = reply.clone();
            if reply.name.is_none() {
                reply.name = Some(delegate.name.clone());
            }
            messages.push(reply);
        }
        Ok(messages)
    }

    async fn run_respond(&mut self) -> AgentResult<StepOutput> {
        self.next = Node::End;
        let (Some(format), Some(validator)) = (
            self.graph.response_format.clone(),
            self.graph.response_validator.clone(),
        ) else {
            return Ok(self.append(Node::Respond, Vec::new()));
        };

        let request = ModelRequest {
            messages: self.graph.persona.prompt(&self.state),
            tools: Vec::new(),
            sampling: self.graph.sampling.clone(),
            response_format: Some(format.clone()),
        };
        let response = self.graph.call_model(&request).await?;
        let text = response.content.unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(strip_code_fence(&text)).map_err(|e| {
            AgentError::invocation(format!("structured response '{}' is not JSON: {e}", format.name))
        })?;

        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(AgentError::invocation(format!(
                "structured response does not match '{}': {}",
                format.name,
                errors.join("; ")
            )));
        }

        self.state.structured_response = Some(value);
        Ok(self.append(Node::Respond, Vec::new()))
    }

    /// Merge produced messages into state and count the step.
    fn append(&mut self, node: Node, produced: Vec<Message>) -> StepOutput {
        self.state.remaining_steps = self.state.remaining_steps.saturating_sub(1);
        let start = self.state.messages.len();
        add_messages(&self.graph.name, &mut self.state.messages, produced);
        let messages = self.state.messages.iter().skip(start).cloned().collect();
        debug!(
            "Agent '{}' step '{}' done, {} step(s) left",
            self.graph.name,
            node.label(),
            self.state.remaining_steps
        );
        StepOutput { node, messages }
    }

    async fn commit(&mut self) -> AgentResult<()> {
        self.step += 1;
        if let (Some(store), Some(key)) = (self.graph.checkpoint.store(), self.key.as_ref()) {
            store
                .save(&Checkpoint::new(key.clone(), self.state.clone(), self.step))
                .await?;
        }
        Ok(())
    }
}

/// Strip a surrounding Markdown code fence, which some models add around
/// JSON output.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

// ── Streaming ──────────────────────────────────────────────────────

/// A model call whose deltas are being forwarded.
struct Inflight {
    request: ModelRequest,
    events: DeltaStream,
    assembler: ResponseAssembler,
    received: bool,
    attempt: u32,
}

struct StreamDriver {
    graph: Arc<ExecutionGraph>,
    start: Option<(Vec<Message>, String)>,
    run: Option<GraphRun>,
    inflight: Option<Inflight>,
    queue: VecDeque<StreamChunk>,
    done: bool,
}

impl StreamDriver {
    async fn next_chunk(&mut self) -> Option<AgentResult<StreamChunk>> {
        loop {
            if let Some(chunk) = self.queue.pop_front() {
                return Some(Ok(chunk));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.advance().await {
                self.done = true;
                self.queue.clear();
                return Some(Err(e));
            }
        }
    }

    async fn advance(&mut self) -> AgentResult<()> {
        if let Some((input, thread_id)) = self.start.take() {
            self.run = Some(GraphRun::start(Arc::clone(&self.graph), input, &thread_id).await?);
            return Ok(());
        }
        let Some(run) = self.run.as_mut() else {
            self.done = true;
            return Ok(());
        };

        if let Some(inflight) = self.inflight.as_mut() {
            match inflight.events.next().await {
                Some(Ok(event)) => {
                    inflight.received = true;
                    if let StreamEvent::TextDelta(ref text) = event {
                        self.queue.push_back(StreamChunk::MessageDelta {
                            agent: self.graph.name.clone(),
                            node: Node::Agent.label().to_string(),
                            content: text.clone(),
                        });
                    }
                    inflight.assembler.push(event);
                }
                Some(Err(e)) => {
                    let retry = self.graph.retry_config();
                    let delay = (!inflight.received)
                        .then(|| retry.next_delay(inflight.attempt, &e))
                        .flatten();
                    if let Some(delay) = delay {
                        warn!(
                            "Streaming model call for '{}' failed, retrying in {:.1}s: {e}",
                            self.graph.name,
                            delay.as_secs_f64()
                        );
                        tokio::time::sleep(delay).await;
                        inflight.attempt += 1;
                        inflight.events = Arc::clone(&self.graph.model).complete_stream(inflight.request.clone());
                        return Ok(());
                    }
                    return Err(AgentError::invocation(format!(
                        "model '{}' failed: {e}",
                        self.graph.model.identifier()
                    )));
                }
                None => {
                    if let Some(inflight) = self.inflight.take() {
                        let streamed = inflight.assembler.text().to_string();
                        let output = run.finish_agent(inflight.assembler.finish());
                        run.commit().await?;
                        emit(&mut self.queue, &self.graph, &run.state, output, &streamed);
                    }
                }
            }
            return Ok(());
        }

        match run.next {
            Node::End => self.done = true,
            Node::Agent if self.graph.token_streaming() => {
                let request = run.prepare_request();
                let events = Arc::clone(&self.graph.model).complete_stream(request.clone());
                self.inflight = Some(Inflight {
                    request,
                    events,
                    assembler: ResponseAssembler::default(),
                    received: false,
                    attempt: 0,
                });
            }
            _ => {
                let output = run.step().await?;
                emit(&mut self.queue, &self.graph, &run.state, output, "");
            }
        }
        Ok(())
    }
}

/// Queue the units one completed step contributes, per stream mode.
/// `streamed` is the assistant text already delivered as deltas.
fn emit(
    queue: &mut VecDeque<StreamChunk>,
    graph: &ExecutionGraph,
    state: &AgentState,
    output: StepOutput,
    streamed: &str,
) {
    let node = output.node.label().to_string();
    if graph.stream_modes.contains(StreamMode::Messages) {
        for message in &output.messages {
            let already_streamed = output.node == Node::Agent
                && !message.has_tool_calls()
                && !streamed.is_empty()
                && message.text() == streamed;
            if already_streamed {
                continue;
            }
            let agent = match (&message.role, &message.name) {
                (MessageRole::Assistant, Some(name)) => name.clone(),
                _ => graph.name.clone(),
            };
            queue.push_back(StreamChunk::Message {
                agent,
                node: node.clone(),
                message: message.clone(),
            });
        }
    }
    if graph.stream_modes.contains(StreamMode::Updates) {
        queue.push_back(StreamChunk::Update {
            agent: graph.name.clone(),
            node,
            messages: output.messages,
        });
    }
    if graph.stream_modes.contains(StreamMode::Values) {
        queue.push_back(StreamChunk::Values {
            agent: graph.name.clone(),
            state: state.clone(),
        });
    }
}
