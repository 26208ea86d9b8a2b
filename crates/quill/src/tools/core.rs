//! Tool abstraction for LLM function-calling agents.
//!
//! The [`Tool`] trait defines the interface every tool implements: a static
//! API definition (name, description, JSON Schema) and an async `execute`
//! method over a parsed JSON argument tree. Tools are collected into a
//! [`ToolSet`] which owns the [`ToolGuard`] and handles dispatch: the guard
//! runs first, and the handler runs only when the guard has no objection.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use tracing::{debug, info, trace};

use crate::ToolDef;
use crate::tools::guard::{Policy, ToolGuard};
use crate::tools::result::ToolResult;

/// Boxed future returned by [`Tool::execute`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that the agent can invoke via function-calling.
///
/// Implementors provide:
/// - A static definition ([`Tool::definition`]) describing the tool's name,
///   description, and JSON Schema parameters for the LLM. The same schema
///   is what the guard validates raw arguments against.
/// - An async [`Tool::execute`] method that receives the parsed JSON
///   argument tree and returns a [`ToolResult`] envelope.
///
/// Handlers never panic and never return transport errors: every failure is
/// an envelope with a stable `error_code`, so the agent can hand it to the
/// model as a tool message.
pub trait Tool: Send + Sync {
    /// The tool definition sent to the LLM API.
    fn definition(&self) -> ToolDef;

    /// The declarative schema the guard validates against. Defaults to the
    /// definition's parameter schema — override only if the two diverge.
    fn schema(&self) -> Value {
        self.definition().function.parameters
    }

    /// Execute the tool with the parsed JSON arguments.
    ///
    /// Arguments arrive as a generic JSON tree so tools can pattern-match
    /// over them and inspect fields beyond their declared schema without
    /// rejection.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible.
    fn execute(&self, args: &Value) -> ToolFuture<'_>;

    /// The tool's name (convenience — delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name, fronted by one [`ToolGuard`].
///
/// Registered once at session start via [`build_tools`](crate::tools::build_tools);
/// immutable thereafter. Dispatch order per call:
///
/// 1. unknown name → `NOT_FOUND` failure
/// 2. [`ToolGuard::check`] (deny-list, schema, containment, audit)
/// 3. the handler
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
    guard: ToolGuard,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.order)
            .field("workspace_root", &self.guard.workspace_root())
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set guarding `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>, policy: Policy, audit_log: Option<PathBuf>) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            guard: ToolGuard::new(workspace_root, policy, audit_log),
        }
    }

    /// The canonical workspace root all path-bearing tools are contained to.
    pub fn workspace_root(&self) -> &Path {
        self.guard.workspace_root()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Return all tool definitions for the LLM API, in registration order.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute a tool call by name against parsed arguments.
    ///
    /// The guard is consulted first; if it objects, the returned envelope is
    /// the guard's and the handler never runs.
    pub async fn execute(&self, name: &str, args: &Value) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::failure("NOT_FOUND", format!("Unknown tool '{name}'."));
        };

        if let Some(rejection) = self.guard.check(name, args, Some(&tool.schema())) {
            info!(
                "[tool] {name} rejected by guard: {}",
                rejection.error_code.as_deref().unwrap_or("?")
            );
            return rejection;
        }

        log_tool_call(name, args);
        let start = std::time::Instant::now();
        let result = tool.execute(args).await;
        let elapsed = start.elapsed();
        debug!(
            "Tool {name} completed in {:.0}ms (ok={})",
            elapsed.as_secs_f64() * 1000.0,
            result.ok,
        );
        trace!(
            "Tool {name} message: {}",
            result.message.chars().take(300).collect::<String>()
        );
        result
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Log a tool call at INFO level with a truncated preview of arguments.
fn log_tool_call(name: &str, args: &Value) {
    let rendered = args.to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {name}({preview}{})",
        if rendered.len() > 120 { "..." } else { "" }
    );
}

/// Parse the JSON argument tree into a typed struct.
///
/// The guard has already validated required fields and types against the
/// declared schema, so a failure here means the arguments are structurally
/// off in a way the schema cannot express; the error is returned as an
/// `INVALID_ARGS` envelope for the model to self-correct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolResult> {
    serde_json::from_value(args.clone()).map_err(|e| {
        ToolResult::failure("INVALID_ARGS", format!("Could not parse arguments: {e}"))
    })
}

/// Truncate a string to at most `max` characters, appending a notice if
/// trimmed. Used by tools that cap inline payloads (shell output, file
/// content) before putting them into the envelope.
pub fn truncate_text(s: String, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...\n[truncated: {} chars total]", s.chars().count())
    } else {
        s
    }
}
