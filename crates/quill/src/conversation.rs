//! Conversation store: ordered message history with a bounded token budget.
//!
//! Invariants maintained here:
//!
//! - The first message is always the system prompt and is never mutated or
//!   removed, by compaction or anything else.
//! - Every `tool` message's `tool_call_id` references a tool-call record in
//!   a preceding `assistant` message (pairing). Compaction removes an
//!   assistant message together with the contiguous run of tool results
//!   that follow it, so no orphaned `tool` message survives.
//!
//! Token counts are estimated: `ceil(chars/4)` per message plus a flat 50
//! per tool-call record. This is a deliberate under-approximation — there
//! is no provider-side counter for arbitrary `api_base` models — and the
//! compaction budget should be set with slack accordingly. The estimate is
//! cached and invalidated on every mutation.

use std::cell::Cell;

use tracing::debug;

use crate::{Message, MessageRole, ToolCall};

/// Tool outputs longer than this are truncated in place by compaction
/// before any whole message is dropped.
const MAX_TOOL_OUTPUT_CHARS: usize = 1000;

/// Preview length for tool results in the simplified view.
const MAX_TOOL_RESULT_PREVIEW: usize = 300;

/// Flat token overhead charged per tool-call record.
const TOOL_CALL_TOKEN_OVERHEAD: usize = 50;

/// Ordered message history for one session.
pub struct Conversation {
    messages: Vec<Message>,
    model: String,
    token_cache: Cell<Option<usize>>,
}

impl Conversation {
    /// Create a conversation seeded with the system prompt.
    pub fn new(system_prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            model: model.into(),
            token_cache: Cell::new(None),
        }
    }

    /// The model identifier used for token estimation.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switch the model identifier (the `/model` command).
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.invalidate();
    }

    fn invalidate(&self) {
        self.token_cache.set(None);
    }

    /// Append a plain message.
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) {
        let message = match role {
            MessageRole::System => Message::system(content),
            MessageRole::User => Message::user(content),
            MessageRole::Assistant => Message::assistant_text(content),
            MessageRole::Tool => Message {
                role: MessageRole::Tool,
                content: Some(content.into()),
                tool_calls: None,
                tool_call_id: None,
            },
        };
        self.messages.push(message);
        self.invalidate();
    }

    /// Append an assistant message carrying tool-call records. Argument
    /// strings are stored verbatim.
    pub fn append_assistant_tool_calls(&mut self, text: Option<String>, calls: Vec<ToolCall>) {
        self.messages.push(Message::assistant_tool_calls(text, calls));
        self.invalidate();
    }

    /// Append a tool result paired to an earlier tool-call id.
    pub fn append_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.messages.push(Message::tool_result(tool_call_id, content));
        self.invalidate();
    }

    /// All messages, for the LLM API.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages, including the system prompt.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the history contains tool-formatted messages (used to decide
    /// whether the simplified-history fallback can help).
    pub fn has_tool_messages(&self) -> bool {
        self.messages.iter().any(|m| {
            m.role == MessageRole::Tool
                || (m.role == MessageRole::Assistant && m.tool_calls.is_some())
        })
    }

    /// Drop everything after the system prompt.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
        self.invalidate();
    }

    // ── Token estimation ───────────────────────────────────────────

    /// Estimated token count, cached between mutations.
    pub fn token_count(&self) -> usize {
        if let Some(cached) = self.token_cache.get() {
            return cached;
        }
        let estimate = self.estimate_tokens();
        self.token_cache.set(Some(estimate));
        estimate
    }

    fn estimate_tokens(&self) -> usize {
        let mut total = 0;
        for m in &self.messages {
            if let Some(ref content) = m.content {
                total += content.len().div_ceil(4);
            }
            if let Some(ref calls) = m.tool_calls {
                for call in calls {
                    total += TOOL_CALL_TOKEN_OVERHEAD;
                    total += call.function.arguments.len().div_ceil(4);
                }
            }
        }
        total
    }

    // ── Compaction ─────────────────────────────────────────────────

    /// Shrink the history until the estimate fits `max_tokens`.
    ///
    /// Two phases, repeated: first truncate the oldest over-long tool
    /// output in place, then drop the oldest non-system message (taking
    /// the contiguous tool-result run with an assistant message so no
    /// orphan survives). Exits unconditionally when a full pass stops
    /// reducing the estimate, so `max_tokens = 0` still terminates.
    pub fn truncate_if_needed(&mut self, max_tokens: usize) {
        let mut prev_estimate = usize::MAX;
        loop {
            let estimate = self.estimate_tokens();
            if estimate <= max_tokens || estimate >= prev_estimate {
                break;
            }
            prev_estimate = estimate;

            if self.prune_oldest_tool_output() {
                continue;
            }
            if !self.remove_oldest_exchange() {
                break;
            }
        }
        self.invalidate();
    }

    /// Truncate the oldest tool output above the threshold. Returns
    /// whether anything changed.
    fn prune_oldest_tool_output(&mut self) -> bool {
        for m in &mut self.messages {
            if m.role != MessageRole::Tool {
                continue;
            }
            let Some(ref content) = m.content else {
                continue;
            };
            // Already-truncated outputs sit just over the threshold by the
            // marker's length; re-truncating them would loop forever.
            if content.ends_with("...[truncated]") {
                continue;
            }
            if content.chars().count() > MAX_TOOL_OUTPUT_CHARS {
                let truncated: String = content.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
                m.content = Some(format!("{truncated}\n...[truncated]"));
                return true;
            }
        }
        false
    }

    /// Remove the oldest non-system message; an assistant message takes
    /// its trailing tool results with it. Returns whether anything was
    /// removed.
    fn remove_oldest_exchange(&mut self) -> bool {
        let Some(oldest) = self
            .messages
            .iter()
            .position(|m| m.role != MessageRole::System)
        else {
            return false;
        };

        let mut end = oldest + 1;
        if self.messages[oldest].role == MessageRole::Assistant {
            while end < self.messages.len() && self.messages[end].role == MessageRole::Tool {
                end += 1;
            }
        }
        debug!(
            "Compaction dropping messages {oldest}..{end} of {}",
            self.messages.len()
        );
        self.messages.drain(oldest..end);
        true
    }

    // ── Simplified view ────────────────────────────────────────────

    /// Flatten tool-call/tool-result pairs into plain assistant text, for
    /// models that reject tool-formatted messages.
    ///
    /// Each assistant-with-tool-calls message absorbs the tool results
    /// that follow it, rendered as `[Tool: name(args)]` and
    /// `[Result: preview]` lines. Orphaned tool messages are dropped.
    pub fn messages_simplified(&self) -> Vec<Message> {
        let mut simplified = Vec::with_capacity(self.messages.len());
        let mut i = 0;
        while i < self.messages.len() {
            let msg = &self.messages[i];
            match (&msg.role, &msg.tool_calls) {
                (MessageRole::Assistant, Some(calls)) => {
                    let mut parts: Vec<String> = Vec::new();
                    if let Some(ref text) = msg.content
                        && !text.is_empty()
                    {
                        parts.push(text.clone());
                    }
                    for call in calls {
                        parts.push(format!(
                            "[Tool: {}({})]",
                            call.function.name, call.function.arguments
                        ));
                    }
                    while i + 1 < self.messages.len()
                        && self.messages[i + 1].role == MessageRole::Tool
                    {
                        i += 1;
                        if let Some(ref result) = self.messages[i].content
                            && !result.is_empty()
                        {
                            let preview: String =
                                result.chars().take(MAX_TOOL_RESULT_PREVIEW).collect();
                            parts.push(format!("[Result: {preview}]"));
                        }
                    }
                    let content = if parts.is_empty() {
                        "[Tool call]".to_string()
                    } else {
                        parts.join("\n")
                    };
                    simplified.push(Message::assistant_text(content));
                }
                (MessageRole::Tool, _) => {} // orphaned tool result — skip
                _ => simplified.push(msg.clone()),
            }
            i += 1;
        }
        simplified
    }
}
