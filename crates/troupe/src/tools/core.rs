//! The [`Tool`] trait and the per-agent [`ToolRegistry`].
//!
//! A tool is a static [`ToolDef`] (what the model sees) plus an async
//! `execute` taking the raw JSON argument string. Tools never fail with a
//! Rust error: problems come back as `"Error: ..."` text so the model can
//! read them and correct itself on the next step.
//!
//! A registry is the ordered tool list of one agent. Compiled graphs hold a
//! clone of it, so later mutations of the runtime's registry never reach a
//! graph that is already running.

use crate::ToolDef;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Results longer than this many bytes are cut before they reach the model.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

const ARGS_PREVIEW_CHARS: usize = 120;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// Something the model can call.
///
/// ```ignore
/// struct CompanyLookup { client: reqwest::Client }
///
/// impl Tool for CompanyLookup {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("lookup", "Look up a company", json_schema_for::<LookupArgs>())
///     }
///
///     fn execute(&self, arguments: &str) -> ToolFuture<'_> {
///         let parsed = parse_tool_args::<LookupArgs>(arguments);
///         Box::pin(async move {
///             match parsed {
///                 Ok(args) => self.fetch(&args.company).await,
///                 Err(e) => e,
///             }
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    /// Run with the model's raw JSON arguments.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().function.name
    }

    fn description(&self) -> String {
        self.definition().function.description
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// How [`ToolRegistry::execute`] treats a call.
#[derive(Debug, Clone, PartialEq)]
struct DispatchPolicy {
    max_result_bytes: usize,
    validate_args: bool,
    timeout: Option<Duration>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
            timeout: None,
        }
    }
}

/// The ordered tools of one agent.
///
/// Order is registration order and is what the model sees. Duplicate names
/// are kept; a call goes to the first tool with that name. Cloning shares
/// the tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    policy: DispatchPolicy,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            tools,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.policy.max_result_bytes = max;
        self
    }

    /// Check arguments against each tool's parameter schema before running it.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.policy.validate_args = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.policy.timeout = timeout;
        self
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn extend(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        self.tools.extend(tools);
    }

    /// Swap the tool list. Dispatch settings are kept.
    pub fn replace(&mut self, tools: Vec<Arc<dyn Tool>>) {
        self.tools = tools;
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch one call. Unknown names, rejected arguments and timeouts all
    /// come back as `"Error: ..."` results.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = self.get(name) else {
            warn!("Model called unregistered tool '{name}'");
            return format!("Error: unknown tool '{name}'");
        };
        if self.policy.validate_args
            && let Err(e) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            return e;
        }

        log_tool_call(name, arguments);
        let started = Instant::now();
        let result = match self.policy.timeout {
            None => tool.execute(arguments).await,
            Some(limit) => tokio::time::timeout(limit, tool.execute(arguments))
                .await
                .unwrap_or_else(|_| {
                    info!("Tool {name} timed out after {:.1}s", limit.as_secs_f64());
                    format!("Error: tool '{name}' timed out after {:.0} seconds.", limit.as_secs_f64())
                }),
        };
        debug!(
            "Tool {name} finished in {}ms with {} bytes",
            started.elapsed().as_millis(),
            result.len()
        );
        trace!("Tool {name} result: {result}");

        truncate_result(result, self.policy.max_result_bytes)
    }
}

// ── FnTool ────────────────────────────────────────────────────────

type BoxedHandler = Box<dyn Fn(String) -> ToolFuture<'static> + Send + Sync>;

/// A tool built from a [`ToolDef`] and an async closure over typed
/// arguments.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     /// Company name to look up.
///     company: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("lookup", "Look up a company", json_schema_for::<LookupArgs>()),
///     |args: LookupArgs| async move { format!("{} is a company", args.company) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: BoxedHandler,
}

impl FnTool {
    /// Arguments that fail to deserialize into `A` never reach `handler`;
    /// the parse error is returned to the model instead.
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let handler: BoxedHandler = Box::new(move |raw: String| -> ToolFuture<'static> {
            match parse_tool_args::<A>(&raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(std::future::ready(e)),
            }
        });
        Self { def, handler }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        (self.handler)(arguments.to_owned())
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnTool({})", self.def.function.name)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Check `arguments` against the tool's parameter schema. The error is
/// phrased for the model.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Result<(), String> {
    let name = tool.name();
    let value: serde_json::Value = serde_json::from_str(arguments)
        .map_err(|e| format!("Error: arguments for tool '{name}' are not valid JSON: {e}"))?;

    // Tools with an unusable schema are not validated.
    let Ok(validator) = jsonschema::validator_for(&tool.definition().function.parameters) else {
        return Ok(());
    };
    let problems: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Error: arguments for tool '{name}' do not match its schema:\n{}\nFix them and call the tool again.",
            problems.join("\n")
        ))
    }
}

fn log_tool_call(name: &str, arguments: &str) {
    let mut preview: String = arguments.chars().take(ARGS_PREVIEW_CHARS).collect();
    if preview.len() < arguments.len() {
        preview.push_str("...");
    }
    info!("[tool] {name}({preview})");
}

/// Cut `s` to at most `max` bytes on a char boundary, noting the original
/// size.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let cut = (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    let kept = s.get(..cut).unwrap_or_default();
    format!("{kept}...\n[truncated: {} bytes total]", s.len())
}

/// Deserialize tool arguments, or produce the error text a tool should
/// return.
pub fn parse_tool_args<T: DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments)
        .map_err(|e| format!("Error: invalid tool arguments: {e}. Send JSON matching the tool's parameters."))
}

// ── ThinkTool ──────────────────────────────────────────────────────

/// Scratchpad with no side effects: echoes the model's reasoning back.
pub struct ThinkTool;

#[derive(Deserialize, JsonSchema)]
pub struct ThinkArgs {
    /// Your step-by-step reasoning or analysis.
    pub reasoning: String,
}

impl Tool for ThinkTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "think",
            "Reason step by step before acting. Put your reasoning in the \
             'reasoning' argument; nothing else happens.",
            crate::json_schema_for::<ThinkArgs>(),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let reasoning = parse_tool_args::<ThinkArgs>(arguments)
            .map(|args| args.reasoning)
            .unwrap_or_else(|_| "[no reasoning provided]".into());
        Box::pin(std::future::ready(reasoning))
    }
}
