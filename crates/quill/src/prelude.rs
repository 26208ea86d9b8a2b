//! Convenience re-exports for building an agent.
//!
//! ```ignore
//! use quill::prelude::*;
//! ```

pub use crate::agent::events::{AgentEvent, EventHandler, LoggingHandler, NoopHandler};
pub use crate::agent::interrupt::InterruptController;
pub use crate::agent::permissions::{ApprovalRequest, PermissionGate, Prompter};
pub use crate::agent::runner::{Agent, AgentConfig};
pub use crate::api::client::{LlmClient, LlmError, LlmOptions, ModelClient};
pub use crate::api::streaming::StreamEvent;
pub use crate::conversation::Conversation;
pub use crate::tools::build_tools;
pub use crate::tools::core::{Tool, ToolFuture, ToolSet};
pub use crate::tools::guard::{Policy, ToolGuard};
pub use crate::tools::result::ToolResult;
pub use crate::{ChatCompletion, ChatRequest, Message, MessageRole, ToolCall, ToolDef};
