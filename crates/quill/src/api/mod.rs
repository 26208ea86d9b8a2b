//! LLM transport: the streaming chat client and its error taxonomy.

pub mod client;
pub mod streaming;

pub use client::{LlmClient, LlmError, LlmOptions, ModelClient};
pub use streaming::StreamEvent;
