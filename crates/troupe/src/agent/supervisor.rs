//! Supervisors: agents that delegate to other agents.
//!
//! A [`Supervisor`] has its own persona, model and tools, plus an ordered
//! list of members. Its graph embeds every member's compiled graph and
//! offers the model one `transfer_to_<member>` tool per member. Members
//! embedded with [`CheckpointPolicy::Inherit`](super::checkpoint::CheckpointPolicy::Inherit)
//! checkpoint into the supervisor's store under their own namespace.
//!
//! Member changes are detected, not propagated: reaching a member through
//! [`Supervisor::member_mut`] marks the supervisor stale, and it refuses to
//! serve until [`Supervisor::rebuild`] picks up the members' new graphs.

use crate::agent::checkpoint::CheckpointPolicy;
use crate::agent::config::RuntimeOptions;
use crate::agent::graph::{Delegate, ExecutionGraph};
use crate::agent::metadata::{AgentMetadata, ModelBinding, SamplingParameters};
use crate::agent::persona::AgentPersona;
use crate::agent::runtime::{RuntimeBuilder, RuntimeCore};
use crate::agent::service::{AgentFuture, AgentService, ChunkStream};
use crate::agent::state::AgentState;
use crate::api::model::{ChatModel, ModelResolver};
use crate::error::{AgentError, AgentResult};
use crate::tools::core::{Tool, ToolRegistry};
use crate::tools::remote::{McpDiscovery, ToolDiscovery, ToolTransportConfig, discover_all};
use crate::{Message, ToolDef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// An agent that can be embedded in a [`Supervisor`].
///
/// The supervisor reaches its members only through this trait: it reads
/// their compiled graphs and never rebuilds them itself.
pub trait AgentMember: AgentService {
    /// The member's current graph.
    ///
    /// # Errors
    ///
    /// [`AgentError::StaleGraph`] when the member must be rebuilt first.
    fn compiled_graph(&self) -> AgentResult<Arc<ExecutionGraph>>;

    /// Shown to the supervisor's model next to the handoff tool.
    fn description(&self) -> String;

    fn rebuild(&mut self) -> AgentResult<()>;
    fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()>;
    fn update_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()>;
    fn reset_tools(&mut self) -> AgentResult<()>;
}

/// Member names must differ from each other and from the supervisor, whose
/// name is also the checkpoint namespace of its state.
fn ensure_unique_names(supervisor: &str, members: &[Box<dyn AgentMember>]) -> AgentResult<()> {
    let mut seen = HashSet::from([supervisor]);
    for member in members {
        let name = member.metadata().name.as_str();
        if name == supervisor {
            return Err(AgentError::configuration(format!(
                "child agent '{name}' has the same name as its supervisor"
            )));
        }
        if !seen.insert(name) {
            return Err(AgentError::configuration(format!(
                "duplicate child agent name '{name}'"
            )));
        }
    }
    Ok(())
}

/// Every graph in the embedded tree checkpoints under its own name, so no
/// name may appear twice anywhere below `supervisor`.
fn ensure_distinct_namespaces(supervisor: &str, delegates: &[Delegate]) -> AgentResult<()> {
    fn walk<'a>(delegates: &'a [Delegate], seen: &mut HashSet<&'a str>) -> Result<(), &'a str> {
        for delegate in delegates {
            if !seen.insert(delegate.name.as_str()) {
                return Err(delegate.name.as_str());
            }
            walk(delegate.graph.delegates(), seen)?;
        }
        Ok(())
    }

    let mut seen = HashSet::from([supervisor]);
    walk(delegates, &mut seen).map_err(|name| {
        AgentError::configuration(format!(
            "agent name '{name}' appears more than once under supervisor '{supervisor}'"
        ))
    })
}

fn collect_delegates(supervisor: &str, members: &[Box<dyn AgentMember>]) -> AgentResult<Vec<Delegate>> {
    let delegates = members
        .iter()
        .map(|member| {
            Ok(Delegate {
                name: member.metadata().name.clone(),
                description: member.description(),
                graph: member.compiled_graph()?,
            })
        })
        .collect::<AgentResult<Vec<_>>>()?;
    ensure_distinct_namespaces(supervisor, &delegates)?;
    Ok(delegates)
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`Supervisor`].
pub struct SupervisorBuilder<P: AgentPersona> {
    inner: RuntimeBuilder<P>,
    members: Vec<Box<dyn AgentMember>>,
}

impl<P: AgentPersona> SupervisorBuilder<P> {
    /// Add a member. Order is kept in the handoff tool list.
    pub fn member(mut self, member: impl AgentMember + 'static) -> Self {
        self.members.push(Box::new(member));
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.inner = self.inner.with_model(model);
        self
    }

    pub fn with_resolver(mut self, resolver: impl ModelResolver + 'static) -> Self {
        self.inner = self.inner.with_resolver(resolver);
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.inner = self.inner.with_options(options);
        self
    }

    pub fn with_checkpoint(mut self, policy: CheckpointPolicy) -> Self {
        self.inner = self.inner.with_checkpoint(policy);
        self
    }

    /// Check member names, then resolve the model and compile.
    ///
    /// # Errors
    ///
    /// [`AgentError::Configuration`] when a name repeats among the members,
    /// their own embedded agents, or the supervisor itself. Raised before
    /// anything is resolved or compiled. [`AgentError::StaleGraph`]
    /// when a member has not been rebuilt.
    pub fn build(self) -> AgentResult<Supervisor<P>> {
        ensure_unique_names(self.inner.name(), &self.members)?;
        let delegates = collect_delegates(self.inner.name(), &self.members)?;
        info!(
            "Building supervisor '{}' over {} member(s)",
            self.inner.name(),
            self.members.len()
        );
        Ok(Supervisor {
            core: self.inner.into_core(delegates)?,
            members: self.members,
        })
    }
}

// ── Supervisor ─────────────────────────────────────────────────────

/// An agent whose model can hand the conversation to member agents.
pub struct Supervisor<P: AgentPersona> {
    core: RuntimeCore<P>,
    members: Vec<Box<dyn AgentMember>>,
}

impl<P: AgentPersona> Supervisor<P> {
    pub fn builder(metadata: AgentMetadata, persona: P) -> SupervisorBuilder<P> {
        SupervisorBuilder {
            inner: RuntimeBuilder::new(metadata, persona),
            members: Vec::new(),
        }
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

    pub fn generation(&self) -> u64 {
        self.core.generation()
    }

    pub fn is_stale(&self) -> bool {
        self.core.is_stale()
    }

    pub fn current_graph(&self) -> AgentResult<Arc<ExecutionGraph>> {
        self.core.current_graph()
    }

    /// Member names in handoff order.
    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.metadata().name.clone()).collect()
    }

    pub fn member(&self, name: &str) -> Option<&dyn AgentMember> {
        self.members
            .iter()
            .find(|m| m.metadata().name == name)
            .map(|m| &**m)
    }

    /// Mutable access to a member. Marks this supervisor stale until the
    /// next [`rebuild`](Self::rebuild).
    pub fn member_mut(&mut self, name: &str) -> Option<&mut dyn AgentMember> {
        let member = self.members.iter_mut().find(|m| m.metadata().name == name)?;
        self.core.invalidate();
        Some(&mut **member)
    }

    fn delegates(&self) -> AgentResult<Vec<Delegate>> {
        collect_delegates(&self.core.metadata.name, &self.members)
    }

    /// Recompile over the members' current graphs.
    ///
    /// # Errors
    ///
    /// [`AgentError::StaleGraph`] naming the first member that has not been
    /// rebuilt since it changed. Members are never rebuilt from here.
    pub fn rebuild(&mut self) -> AgentResult<()> {
        let delegates = self.delegates()?;
        self.core.rebuild(delegates)
    }

    pub fn invalidate(&mut self) {
        self.core.invalidate();
    }

    /// Append tools to the supervisor's own registry and rebuild.
    pub fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        let delegates = self.delegates()?;
        self.core.add_tools(tools, delegates)
    }

    pub fn update_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        let delegates = self.delegates()?;
        self.core.update_tools(tools, delegates)
    }

    pub fn reset_tools(&mut self) -> AgentResult<()> {
        let delegates = self.delegates()?;
        self.core.reset_tools(delegates)
    }

    /// Discover tools for the supervisor itself. All-or-nothing.
    pub async fn load_remote_tools(
        &mut self,
        discovery: &dyn ToolDiscovery,
        config: &ToolTransportConfig,
    ) -> AgentResult<usize> {
        let tools = discover_all(discovery, config).await?;
        let count = tools.len();
        self.add_tools(tools)?;
        info!("Loaded {count} remote tool(s) into supervisor '{}'", self.core.metadata.name);
        Ok(count)
    }

    pub async fn load_mcp_tools(&mut self, config: &ToolTransportConfig) -> AgentResult<usize> {
        self.load_remote_tools(&McpDiscovery::new(), config).await
    }

    pub fn update_model_info(&mut self, binding: ModelBinding) -> AgentResult<()> {
        let delegates = self.delegates()?;
        self.core.update_model_info(binding, delegates)
    }

    pub fn update_sampling_parameters(&mut self, update: SamplingParameters) -> AgentResult<()> {
        let delegates = self.delegates()?;
        self.core.update_sampling_parameters(update, delegates)
    }
}

impl<P: AgentPersona> AgentService for Supervisor<P> {
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

impl<P: AgentPersona> AgentMember for Supervisor<P> {
    fn compiled_graph(&self) -> AgentResult<Arc<ExecutionGraph>> {
        self.core.current_graph()
    }

    fn description(&self) -> String {
        self.core.persona.description()
    }

    fn rebuild(&mut self) -> AgentResult<()> {
        Supervisor::rebuild(self)
    }

    fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        Supervisor::add_tools(self, tools)
    }

    fn update_tools(&mut self, tools: Vec<Arc<dyn Tool>>) -> AgentResult<()> {
        Supervisor::update_tools(self, tools)
    }

    fn reset_tools(&mut self) -> AgentResult<()> {
        Supervisor::reset_tools(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::persona::SystemPromptPersona;
    use crate::agent::runtime::AgentRuntime;
    use crate::api::model::{ModelFuture, ModelRequest, ModelResponse};
    use crate::tools::core::ThinkTool;

    struct Quiet;

    impl ChatModel for Quiet {
        fn identifier(&self) -> &str {
            "test/quiet"
        }

        fn complete<'a>(&'a self, _request: &'a ModelRequest) -> ModelFuture<'a> {
            Box::pin(async { Ok(ModelResponse::text("ok")) })
        }
    }

    fn child(name: &str) -> AgentRuntime<SystemPromptPersona> {
        AgentRuntime::builder(
            AgentMetadata::new(name, ModelBinding::new("test")),
            SystemPromptPersona::new("").with_description(format!("{name} things")),
        )
        .with_model(Arc::new(Quiet))
        .build()
        .unwrap()
    }

    fn supervisor() -> Supervisor<SystemPromptPersona> {
        Supervisor::builder(
            AgentMetadata::new("boss", ModelBinding::new("test")),
            SystemPromptPersona::new("Route work."),
        )
        .with_model(Arc::new(Quiet))
        .member(child("research"))
        .member(child("writing"))
        .build()
        .unwrap()
    }

    #[test]
    fn handoff_tools_follow_member_order() {
        let sup = supervisor();
        let names: Vec<String> = sup
            .tool_definitions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["transfer_to_research", "transfer_to_writing"]);
        assert_eq!(sup.member_names(), vec!["research", "writing"]);
        assert!(sup.member("research").unwrap().description().contains("research"));
    }

    #[test]
    fn member_mut_marks_supervisor_stale() {
        let mut sup = supervisor();
        sup.member_mut("research")
            .unwrap()
            .add_tools(vec![Arc::new(ThinkTool)])
            .unwrap();
        assert!(sup.is_stale());
        assert!(matches!(sup.current_graph(), Err(AgentError::StaleGraph { .. })));

        sup.rebuild().unwrap();
        let graph = sup.current_graph().unwrap();
        assert_eq!(graph.delegates()[0].graph.tool_names(), vec!["think"]);
    }

    #[test]
    fn stale_member_is_reported_not_repaired() {
        let mut stale = child("research");
        stale.invalidate();
        let err = Supervisor::builder(
            AgentMetadata::new("boss", ModelBinding::new("test")),
            SystemPromptPersona::new(""),
        )
        .with_model(Arc::new(Quiet))
        .member(stale)
        .build()
        .err()
        .unwrap();
        assert!(matches!(err, AgentError::StaleGraph { ref agent } if agent == "research"));
    }

    #[test]
    fn unknown_member_does_not_invalidate() {
        let mut sup = supervisor();
        assert!(sup.member_mut("nobody").is_none());
        assert!(!sup.is_stale());
    }
}
