//! The single-agent runtime.
//!
//! [`AgentRuntime`] owns an agent's configuration (metadata, persona, tool
//! registry, runtime options) and the [`ExecutionGraph`] compiled from it.
//! Every mutation compiles a candidate graph first and only then swaps
//! registry, metadata and graph together, so a failed mutation leaves the
//! runtime exactly as it was.
//!
//! Mutations take `&mut self` and invocations take `&self`. Share a runtime
//! across tasks behind a `tokio::sync::RwLock`.
//!
//! ```ignore
//! let mut agent = AgentRuntime::builder(metadata, SystemPromptPersona::new("Be brief."))
//!     .with_model(model)
//!     .build()?;
//!
//! agent.add_tools(vec![Arc::new(lookup)])?;
//! agent.load_mcp_tools(&config.tool_servers).await?;
//! let state = agent.chat(vec![Message::user("hi")], "thread-1").await?;
//! ```

use crate::agent::checkpoint::CheckpointPolicy;
use crate::agent::config::RuntimeOptions;
use crate::agent::graph::{Delegate, ExecutionGraph, GraphBuilder};
use crate::agent::metadata::{AgentMetadata, ModelBinding, SamplingParameters};
use crate::agent::persona::AgentPersona;
use crate::agent::service::{AgentFuture, AgentService, ChunkStream, error_stream, validate_request};
use crate::agent::state::AgentState;
use crate::agent::supervisor::AgentMember;
use crate::api::model::{ChatModel, FixedModel, ModelResolver};
use crate::api::openrouter::OpenRouterResolver;
use crate::error::{AgentError, AgentResult};
use crate::tools::core::{Tool, ToolRegistry};
use crate::tools::remote::{McpDiscovery, ToolDiscovery, ToolTransportConfig, discover_all};
use crate::{Message, ToolDef};
use std::sync::Arc;
use tracing::{debug, info};

// ── Graph cache ────────────────────────────────────────────────────

/// The compiled graph a runtime serves, or the marker that it must be
/// rebuilt first.
#[derive(Debug, Clone)]
pub enum GraphCache {
    Fresh(Arc<ExecutionGraph>),
    Stale,
}

// ── Shared core ────────────────────────────────────────────────────

/// Configuration plus cached graph, shared by [`AgentRuntime`] and
/// [`Supervisor`](super::supervisor::Supervisor). Supervisors pass their
/// children's graphs as `delegates`.
pub(crate) struct RuntimeCore<P: AgentPersona> {
    pub(crate) metadata: AgentMetadata,
    pub(crate) persona: Arc<P>,
    pub(crate) tools: ToolRegistry,
    pub(crate) options: RuntimeOptions,
    resolver: Arc<dyn ModelResolver>,
    model: Arc<dyn ChatModel>,
    graph: GraphCache,
    generation: u64,
}

impl<P: AgentPersona> RuntimeCore<P> {
    fn compile(
        &self,
        metadata: &AgentMetadata,
        model: &Arc<dyn ChatModel>,
        tools: &ToolRegistry,
        delegates: Vec<Delegate>,
        generation: u64,
    ) -> AgentResult<ExecutionGraph> {
        let persona: Arc<dyn AgentPersona> = self.persona.clone();
        let mut builder = GraphBuilder::new(metadata.name.clone())
            .model(Arc::clone(model))
            .sampling(metadata.sampling.clone())
            .tools(tools.clone())
            .persona(persona)
            .options(self.options.clone())
            .generation(generation);
        for delegate in delegates {
            builder = builder.delegate(delegate.name, delegate.description, delegate.graph);
        }
        builder.compile()
    }

    /// Compile from the given inputs and, on success, make them current.
    fn install(
        &mut self,
        metadata: AgentMetadata,
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        delegates: Vec<Delegate>,
    ) -> AgentResult<()> {
        let generation = self.generation + 1;
        let graph = self.compile(&metadata, &model, &tools, delegates, generation)?;
        info!(
            "Rebuilt graph for '{}' (generation {generation}, {} tool(s), model {})",
            metadata.name,
            tools.len(),
            model.identifier()
        );
        self.metadata = metadata;
        self.model = model;
        self.tools = tools;
        self.graph = GraphCache::Fresh(Arc::new(graph));
        self.generation = generation;
        Ok(())
    }

    pub(crate) fn rebuild(&mut self, delegates: Vec<Delegate>) -> AgentResult<()> {
        self.install(
            self.metadata.clone(),
            Arc::clone(&self.model),
            self.tools.clone(),
            delegates,
        )
    }

    pub(crate) fn invalidate(&mut self) {
        if matches!(self.graph, GraphCache::Fresh(_)) {
            debug!("Graph for '{}' marked stale", self.metadata.name);
        }
        self.graph = GraphCache::Stale;
    }

    pub(crate) fn is_stale(&self) -> bool {
        !matches!(self.graph, GraphCache::Fresh(ref g) if g.generation() == self.generation)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn current_graph(&self) -> AgentResult<Arc<ExecutionGraph>> {
        match self.graph {
            GraphCache::Fresh(ref graph) if graph.generation() == self.generation => {
                Ok(Arc::clone(graph))
            }
            _ => Err(AgentError::stale_graph(self.metadata.name.clone())),
        }
    }

    pub(crate) fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>, delegates: Vec<Delegate>) -> AgentResult<()> {
        let mut registry = self.tools.clone();
        registry.extend(tools);
        self.install(self.metadata.clone(), Arc::clone(&self.model), registry, delegates)
    }

    pub(crate) fn update_tools(&mut self, tools: Vec<Arc<dyn Tool>>, delegates: Vec<Delegate>) -> AgentResult<()> {
        let mut registry = self.tools.clone();
        registry.replace(tools);
        self.install(self.metadata.clone(), Arc::clone(&self.model), registry, delegates)
    }

    pub(crate) fn reset_tools(&mut self, delegates: Vec<Delegate>) -> AgentResult<()> {
        self.update_tools(self.persona.tools_initial(), delegates)
    }

    pub(crate) fn update_model_info(&mut self, binding: ModelBinding, delegates: Vec<Delegate>) -> AgentResult<()> {
        let mut metadata = self.metadata.clone();
        metadata.update_model_info(binding);
        let model = self.resolver.resolve(&metadata.model, &metadata.sampling)?;
        self.install(metadata, model, self.tools.clone(), delegates)
    }

    pub(crate) fn update_sampling_parameters(
        &mut self,
        update: SamplingParameters,
        delegates: Vec<Delegate>,
    ) -> AgentResult<()> {
        let mut metadata = self.metadata.clone();
        metadata.update_sampling_parameters(update);
        let model = self.resolver.resolve(&metadata.model, &metadata.sampling)?;
        self.install(metadata, model, self.tools.clone(), delegates)
    }

    pub(crate) fn chat<'a>(&'a self, messages: Vec<Message>, thread_id: &'a str) -> AgentFuture<'a, AgentState> {
        Box::pin(async move {
            validate_request(&messages, thread_id)?;
            let graph = self.current_graph()?;
            graph.invoke(messages, thread_id).await
        })
    }

    pub(crate) fn chat_stream(&self, messages: Vec<Message>, thread_id: &str) -> ChunkStream {
        if let Err(e) = validate_request(&messages, thread_id) {
            return error_stream(e);
        }
        match self.current_graph() {
            Ok(graph) => graph.stream(messages, thread_id),
            Err(e) => error_stream(e),
        }
    }

    pub(crate) fn tool_definitions(&self) -> Vec<ToolDef> {
        match self.graph {
            GraphCache::Fresh(ref graph) => graph.tool_definitions(),
            GraphCache::Stale => self.tools.definitions(),
        }
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`AgentRuntime`] and
/// [`Supervisor`](super::supervisor::Supervisor).
pub struct RuntimeBuilder<P: AgentPersona> {
    metadata: AgentMetadata,
    persona: P,
    resolver: Option<Arc<dyn ModelResolver>>,
    options: RuntimeOptions,
}

impl<P: AgentPersona> RuntimeBuilder<P> {
    pub fn new(metadata: AgentMetadata, persona: P) -> Self {
        Self {
            metadata,
            persona,
            resolver: None,
            options: RuntimeOptions::default(),
        }
    }

    /// Use `model` regardless of the metadata's binding.
    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.resolver = Some(Arc::new(FixedModel(model)));
        self
    }

    /// Resolve bindings with `resolver` instead of the OpenRouter default.
    pub fn with_resolver(mut self, resolver: impl ModelResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Shorthand for setting [`RuntimeOptions::checkpoint`].
    pub fn with_checkpoint(mut self, policy: CheckpointPolicy) -> Self {
        self.options.checkpoint = policy;
        self
    }

    /// Resolve the model and compile the first graph.
    pub fn build(self) -> AgentResult<AgentRuntime<P>> {
        Ok(AgentRuntime {
            core: self.into_core(Vec::new())?,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.metadata.name
    }

    pub(crate) fn into_core(self, delegates: Vec<Delegate>) -> AgentResult<RuntimeCore<P>> {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(OpenRouterResolver::new()));
        let model = resolver.resolve(&self.metadata.model, &self.metadata.sampling)?;
        let tools = ToolRegistry::from_tools(self.persona.tools_initial());
        let mut core = RuntimeCore {
            metadata: self.metadata.clone(),
            persona: Arc::new(self.persona),
            tools: tools.clone(),
            options: self.options,
            resolver,
            model: Arc::clone(&model),
            graph: GraphCache::Stale,
            generation: 0,
        };
        core.install(self.metadata, model, tools, delegates)?;
        Ok(core)
    }
}

// ── AgentRuntime ───────────────────────────────────────────────────

/// A single agent: one persona, one model, one tool registry.
pub struct AgentRuntime<P: AgentPersona> {
    core: RuntimeCore<P>,
}

impl<P: AgentPersona> AgentRuntime<P> {
    pub fn builder(metadata: AgentMetadata, persona: P) -> RuntimeBuilder<P> {
        RuntimeBuilder::new(metadata, persona)
    }

    pub fn persona(&self) -> &P {
        &self.core.persona
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.core.tools
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.core.options
    }

    /// Incremented by every successful rebuild.
    pub fn generation(&self) -> u64 {
        self.core.generation()
    }

    pub fn is_stale(&self) -> bool {
        self.core.is_stale()
    }

    /// The graph invocations run against.
    ///
    /// # Errors
    ///
    /// [`AgentError::StaleGraph`] after [`invalidate`](Self::invalidate)
    /// until the next [`rebuild`](Self::rebuild).
    pub fn current_graph(&self) -> AgentResult<Arc<ExecutionGraph>> {
        self.core.current_graph()
    }

    /// Recompile the graph from the current inputs. Idempotent.
    pub fn rebuild(&mut self) -> AgentResult<()> {
        self.core.rebuild(Vec::new())
    }

    /// Mark the cached graph stale without rebuilding.
    pub fn invalidate(&mut self) {
        self.core.invalidate();
    }

    /// Append `tools` and rebuild.
    pub fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        self.core.add_tools(tools, Vec::new())
    }

    /// Replace the tool set with `tools` and rebuild.
    pub fn update_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        self.core.update_tools(tools, Vec::new())
    }

    /// Go back to the persona's initial tools and rebuild.
    pub fn reset_tools(&mut self) -> AgentResult<()> {
        self.core.reset_tools(Vec::new())
    }

    /// Discover tools from every server in `config` and add them.
    ///
    /// All-or-nothing: if any server fails, the registry and graph are
    /// untouched. Returns the number of tools added.
    pub async fn load_remote_tools(
        &mut self,
        discovery: &dyn ToolDiscovery,
        config: &ToolTransportConfig,
    ) -> AgentResult<usize> {
        let tools = discover_all(discovery, config).await?;
        let count = tools.len();
        self.add_tools(tools)?;
        info!("Loaded {count} remote tool(s) into '{}'", self.core.metadata.name);
        Ok(count)
    }

    /// [`load_remote_tools`](Self::load_remote_tools) over MCP.
    pub async fn load_mcp_tools(&mut self, config: &ToolTransportConfig) -> AgentResult<usize> {
        self.load_remote_tools(&McpDiscovery::new(), config).await
    }

    /// Replace the model binding, re-resolve the model and rebuild.
    pub fn update_model_info(&mut self, binding: ModelBinding) -> AgentResult<()> {
        self.core.update_model_info(binding, Vec::new())
    }

    /// Merge `update` into the sampling parameters and rebuild.
    pub fn update_sampling_parameters(&mut self, update: SamplingParameters) -> AgentResult<()> {
        self.core.update_sampling_parameters(update, Vec::new())
    }
}

impl<P: AgentPersona> AgentService for AgentRuntime<P> {
    fn metadata(&self) -> &AgentMetadata {
        &self.core.metadata
    }

    fn chat<'a>(&'a self, messages: Vec<Message>, thread_id: &'a str) -> AgentFuture<'a, AgentState> {
        self.core.chat(messages, thread_id)
    }

    fn chat_stream(&self, messages: Vec<Message>, thread_id: &str) -> ChunkStream {
        self.core.chat_stream(messages, thread_id)
    }

    fn tool_definitions(&self) -> Vec<ToolDef> {
        self.core.tool_definitions()
    }
}

impl<P: AgentPersona> AgentMember for AgentRuntime<P> {
    fn compiled_graph(&self) -> AgentResult<Arc<ExecutionGraph>> {
        self.core.current_graph()
    }

    fn description(&self) -> String {
        self.core.persona.description()
    }

    fn rebuild(&mut self) -> AgentResult<()> {
        AgentRuntime::rebuild(self)
    }

    fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        AgentRuntime::add_tools(self, tools)
    }

    fn update_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        AgentRuntime::update_tools(self, tools)
    }

    fn reset_tools(&mut self) -> AgentResult<()> {
        AgentRuntime::reset_tools(self)
    }
}
