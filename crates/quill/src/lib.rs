//! Model-agnostic coding agent core.
//!
//! `quill` drives a large language model through a reason-act loop inside a
//! user's source-code workspace: the model reads, searches, edits, and runs
//! commands through a guarded tool layer, and the loop feeds results back
//! until the model produces a text-only answer.
//!
//! Three subsystems carry the weight:
//!
//! 1. **The agent loop** ([`agent::runner::Agent`]) — streaming LLM calls,
//!    sequential tool dispatch, bounded-progress termination, interrupt
//!    handling, and a one-shot history fallback for models that reject
//!    tool-formatted messages.
//! 2. **The conversation store** ([`conversation::Conversation`]) — ordered
//!    history with a cached token estimate and two-phase compaction that
//!    never touches the system prompt and never orphans a tool result.
//! 3. **The tool layer** ([`tools`]) — a uniform [`ToolResult`](tools::result::ToolResult)
//!    envelope, a guard that validates arguments and enforces workspace-path
//!    containment ([`tools::guard::ToolGuard`]), and the concrete tool set
//!    built once per session by [`tools::build_tools`].
//!
//! # Getting started
//!
//! ```ignore
//! use quill::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let client = LlmClient::new(LlmOptions {
//!         model: "anthropic/claude-sonnet-4".into(),
//!         api_base: "https://openrouter.ai/api/v1".into(),
//!         api_key: Some(std::env::var("QUILL_API_KEY").unwrap_or_default()),
//!         ..Default::default()
//!     })?;
//!     client.verify_connection().await?;
//!
//!     let workspace = std::env::current_dir().unwrap();
//!     let tools = build_tools(&workspace, Policy::default(), None);
//!     let conversation = Conversation::new(SYSTEM_PROMPT, &client.model());
//!
//!     let mut agent = Agent::new(client, conversation, tools);
//!     let answer = agent.run_turn("Read src/main.rs and summarize it.").await;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Tool contracts** — [`tools::fs`], [`tools::search`], [`tools::shell`],
//!   [`tools::git`], [`tools::quality`], [`tools::workspace`], [`tools::state`],
//!   and [`tools::patch`]. Every tool returns the same envelope; failures are
//!   data, never panics.
//! - **Safety** — [`tools::guard`]: policy deny-list, schema validation,
//!   workspace containment, audit log. The guard runs before every handler.
//! - **Permissions** — [`agent::permissions::PermissionGate`]: pre-execution
//!   approval with session memory and a destructive-command override.
//! - **Interrupts** — [`agent::interrupt::InterruptController`]: one atomic
//!   flag shared between the signal handler, the key watcher, and the loop.
//! - **Streaming** — [`api::streaming`]: SSE parsing with mid-stream
//!   cancellation.

pub mod agent;
pub mod api;
pub mod conversation;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` the OpenAI function-calling API expects,
/// and the same schema the [`ToolGuard`](tools::guard::ToolGuard)
/// validates raw arguments against.
///
/// # Example
///
/// ```
/// use quill::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body for an OpenAI-compatible endpoint.
/// Unused optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
///
/// `tool_call_id` is set only on `Tool` messages and must reference a
/// tool-call record carried by an earlier `Assistant` message — the
/// pairing invariant the [`Conversation`](crate::conversation::Conversation)
/// store maintains.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant message carrying tool-call records, with optional
    /// leading text. Argument strings inside `calls` are stored verbatim.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
///
/// `function.arguments` is the raw JSON string the model emitted. It is
/// stored and round-tripped verbatim; parsing happens at dispatch time so
/// whatever the model sent survives in history.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// Assembled response from a chat completion.
#[derive(Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
