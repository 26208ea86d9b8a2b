//! Server-Sent Events (SSE) streaming for chat completions.
//!
//! Provides [`StreamEvent`] and [`LlmClient::chat_stream_live`], which
//! invokes a callback for each event as it arrives off the wire so the
//! REPL can render text deltas live and the agent can abandon the stream
//! when the interrupt flag fires (the callback returns `false`).
//!
//! Tool-call arguments arrive as string fragments spread over many
//! deltas; [`assemble_tool_calls_from_stream`] reassembles them verbatim —
//! the concatenated argument string is exactly what the model emitted.

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::api::client::{LlmClient, LlmError};
use crate::{ChatCompletion, ChatRequest, ToolCall, UsageInfo};

/// A single event from an SSE stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// A tool call chunk (accumulated until complete).
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Token usage information (sent in the final chunk).
    Usage(UsageInfo),
    /// The stream is complete.
    Done,
}

// ── Raw chunk shapes ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

impl LlmClient {
    /// Send a streaming chat request, invoking `on_event` for each event as
    /// it arrives.
    ///
    /// When `on_event` returns `false` the stream is abandoned: reading
    /// stops immediately and the events received so far are returned. The
    /// agent uses this for interrupt handling — the flag is checked after
    /// every delta.
    pub async fn chat_stream_live(
        &self,
        body: &ChatRequest,
        on_event: &mut (dyn FnMut(&StreamEvent) -> bool + Send),
    ) -> Result<Vec<StreamEvent>, LlmError> {
        let mut stream_body = body.clone();
        stream_body.stream = Some(true);

        debug!(
            "LLM stream request: model={}, messages={}, tools={}",
            stream_body.model,
            stream_body.messages.len(),
            stream_body.tools.as_ref().map_or(0, Vec::len),
        );

        let mut resp = self
            .authorize(self.http.post(self.completions_url()))
            .json(&stream_body)
            .send()
            .await
            .map_err(|e| self.translate_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.translate_status(status.as_u16(), &text));
        }

        let mut events = Vec::new();
        let mut buffer = String::new();
        let mut done = false;
        let mut abandoned = false;

        'read: while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| self.translate_transport(&e))?
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process all complete lines in the buffer.
            while let Some(newline_pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline_pos).collect();
                let line = line.trim();
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                if line == "data: [DONE]" {
                    let ev = StreamEvent::Done;
                    on_event(&ev);
                    events.push(ev);
                    done = true;
                    break 'read;
                }
                if let Some(data) = line.strip_prefix("data: ") {
                    let before = events.len();
                    parse_sse_data(data, &mut events);
                    for ev in &events[before..] {
                        if !on_event(ev) {
                            abandoned = true;
                            break 'read;
                        }
                    }
                }
            }
        }

        // Process any remaining data in the buffer (incomplete final line).
        if !done && !abandoned {
            let remaining = buffer.trim();
            if !remaining.is_empty()
                && remaining != "data: [DONE]"
                && let Some(data) = remaining.strip_prefix("data: ")
            {
                let before = events.len();
                parse_sse_data(data, &mut events);
                for ev in &events[before..] {
                    on_event(ev);
                }
            }
        }

        if !abandoned && !events.iter().any(|e| matches!(e, StreamEvent::Done)) {
            let ev = StreamEvent::Done;
            on_event(&ev);
            events.push(ev);
        }

        debug!(
            "Stream completed with {} events{}",
            events.len(),
            if abandoned { " (abandoned)" } else { "" }
        );
        Ok(events)
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(usage) = chunk.usage {
                events.push(StreamEvent::Usage(usage));
            }
            if let Some(choices) = chunk.choices {
                for choice in choices {
                    if let Some(delta) = choice.delta {
                        if let Some(content) = delta.content
                            && !content.is_empty()
                        {
                            events.push(StreamEvent::TextDelta(content));
                        }
                        if let Some(tool_calls) = delta.tool_calls {
                            for tc in tool_calls {
                                let func = tc.function.unwrap_or(StreamFunctionDelta {
                                    name: None,
                                    arguments: None,
                                });
                                events.push(StreamEvent::ToolCallDelta {
                                    index: tc.index.unwrap_or(0),
                                    id: tc.id,
                                    name: func.name,
                                    arguments_delta: func.arguments.unwrap_or_default(),
                                });
                            }
                        }
                    }
                    if choice.finish_reason.is_some() {
                        trace!("Stream finish_reason: {:?}", choice.finish_reason);
                    }
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} — data: {data}");
        }
    }
}

/// Assemble a complete text string from a sequence of stream events.
pub fn collect_text(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

/// Extract usage info from stream events (if present).
pub fn extract_usage(events: &[StreamEvent]) -> Option<UsageInfo> {
    for event in events.iter().rev() {
        if let StreamEvent::Usage(usage) = event {
            return Some(usage.clone());
        }
    }
    None
}

/// Assemble complete tool calls from streaming `ToolCallDelta` events.
///
/// The first delta for an index carries the id and name; subsequent deltas
/// carry argument fragments. Fragments are concatenated verbatim so the
/// final argument string round-trips exactly as the model emitted it.
pub fn assemble_tool_calls_from_stream(events: &[StreamEvent]) -> Vec<ToolCall> {
    use std::collections::BTreeMap;

    let mut calls: BTreeMap<usize, (Option<String>, Option<String>, String)> = BTreeMap::new();

    for event in events {
        if let StreamEvent::ToolCallDelta {
            index,
            id,
            name,
            arguments_delta,
        } = event
        {
            let entry = calls.entry(*index).or_insert((None, None, String::new()));
            if let Some(id) = id {
                entry.0 = Some(id.clone());
            }
            if let Some(name) = name {
                entry.1 = Some(name.clone());
            }
            entry.2.push_str(arguments_delta);
        }
    }

    calls
        .into_values()
        .filter_map(|(id, name, arguments)| {
            let id = id?;
            let name = name?;
            Some(ToolCall::new(id, name, arguments))
        })
        .collect()
}

/// Build a [`ChatCompletion`] from a finished (or abandoned) event list.
pub fn assemble_completion(events: &[StreamEvent]) -> ChatCompletion {
    let text = collect_text(events);
    ChatCompletion {
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls: assemble_tool_calls_from_stream(events),
        usage: extract_usage(events),
        finish_reason: events
            .iter()
            .any(|e| matches!(e, StreamEvent::Done))
            .then(|| "stop".to_string()),
    }
}
