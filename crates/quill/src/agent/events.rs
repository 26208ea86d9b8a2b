//! Observation surface for the agent loop.
//!
//! The library never prints: everything a front end needs to render — text
//! deltas, tool activity, warnings — is delivered through [`EventHandler`].
//! Handlers observe; they cannot alter the loop (permission decisions go
//! through the [`PermissionGate`](crate::agent::permissions::PermissionGate),
//! not events).

use tracing::{info, warn};

/// Events emitted by the agent loop during a turn.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// A streamed text fragment from the model.
    TextDelta(&'a str),
    /// A tool call is about to execute (post-guard, post-permission).
    ToolStarted { name: &'a str, arguments: &'a str },
    /// A tool call finished; `ok` mirrors the envelope.
    ToolFinished {
        name: &'a str,
        call_id: &'a str,
        ok: bool,
        message: &'a str,
    },
    /// A non-fatal condition the user should see (livelock stop, iteration
    /// cap, repeated failures, interrupts).
    Warning(&'a str),
    /// Informational note (fallback retry in progress, compaction).
    Info(&'a str),
    /// The turn completed and the final assistant text is available.
    TurnFinished,
}

/// Receives [`AgentEvent`]s during a turn.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>);
}

/// Handler that ignores all events.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &AgentEvent<'_>) {}
}

/// Handler that forwards events to `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::TextDelta(_) => {}
            AgentEvent::ToolStarted { name, arguments } => {
                let preview: String = arguments.chars().take(120).collect();
                info!("[agent] tool {name}({preview})");
            }
            AgentEvent::ToolFinished { name, ok, message, .. } => {
                if *ok {
                    info!("[agent] {name} ok: {message}");
                } else {
                    info!("[agent] {name} failed: {message}");
                }
            }
            AgentEvent::Warning(msg) => warn!("[agent] {msg}"),
            AgentEvent::Info(msg) => info!("[agent] {msg}"),
            AgentEvent::TurnFinished => info!("[agent] turn finished"),
        }
    }
}
