//! The reason-act agent loop.
//!
//! One [`Agent::run_turn`] call handles one user input: stream a
//! completion, execute any tool calls sequentially, append results, and
//! repeat until the model answers in plain text or a bound trips. Bounds:
//!
//! - `max_iterations` (default 40) LLM calls per turn;
//! - `max_repeated` (default 4) identical tool signatures in a row
//!   (livelock guard);
//! - interrupt checks at the top of the loop, after each stream delta,
//!   between tool calls, and at the top of each tool call.
//!
//! Per-tool failures are data: they are serialized into tool messages for
//! the model to react to, never raised. The only errors that end a turn
//! are LLM transport errors — and of those, a "rejected the request"
//! failure with tool-formatted history triggers one retry with the
//! simplified history and no tools before giving up.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::api::client::ModelClient;
use crate::api::streaming::{StreamEvent, assemble_completion};
use crate::agent::events::{AgentEvent, EventHandler, NoopHandler};
use crate::agent::interrupt::InterruptController;
use crate::agent::permissions::PermissionGate;
use crate::conversation::Conversation;
use crate::tools::core::{ToolSet, truncate_text};
use crate::{ChatCompletion, MessageRole, ToolCall, ToolDef};

// ── Configuration ──────────────────────────────────────────────────

/// Bounds and budgets for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum LLM calls per user turn.
    pub max_iterations: u32,
    /// Consecutive tool failures before a warning is surfaced.
    pub max_retries: u32,
    /// Identical tool signatures in a row before the turn is abandoned.
    pub max_repeated: u32,
    /// Context budget handed to conversation compaction before each call.
    pub max_context_tokens: usize,
    /// Cap on tool output fed back to the model, in characters.
    pub max_tool_output_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            max_retries: 3,
            max_repeated: 4,
            max_context_tokens: 128_000,
            max_tool_output_chars: 30_000,
        }
    }
}

// ── Agent ──────────────────────────────────────────────────────────

/// The reason-act driver tying LLM, conversation, and tools together.
pub struct Agent<C: ModelClient> {
    client: C,
    conversation: Conversation,
    tools: ToolSet,
    permissions: PermissionGate,
    interrupt: InterruptController,
    handler: Box<dyn EventHandler>,
    config: AgentConfig,
    consecutive_failures: u32,
}

impl<C: ModelClient> Agent<C> {
    /// Create an agent with default bounds, an allow-all permission gate,
    /// and no event handler. Front ends replace the gate and handler.
    pub fn new(client: C, conversation: Conversation, tools: ToolSet) -> Self {
        Self {
            client,
            conversation,
            tools,
            permissions: PermissionGate::allow_all(),
            interrupt: InterruptController::new(),
            handler: Box::new(NoopHandler),
            config: AgentConfig::default(),
            consecutive_failures: 0,
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionGate) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_event_handler(mut self, handler: Box<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptController) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// The interrupt controller this agent checks.
    pub fn interrupt(&self) -> &InterruptController {
        &self.interrupt
    }

    /// Read access to the conversation history.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Mutable access for the REPL (`/clear`, `/compact`, resume replay).
    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// Mutable access to the permission gate (`/approve`, `/auto-allow`).
    pub fn permissions_mut(&mut self) -> &mut PermissionGate {
        &mut self.permissions
    }

    /// The underlying model client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Mutable access to the client (the `/model` command).
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    // ── The loop ───────────────────────────────────────────────────

    /// Run one user turn to completion. Returns the final assistant text
    /// (empty when the turn was interrupted or abandoned).
    pub async fn run_turn(&mut self, user_input: &str) -> String {
        self.interrupt.clear();
        self.conversation.append(MessageRole::User, user_input);

        let tool_defs = self.tools.definitions();
        let mut last_signature: Option<String> = None;
        let mut repeated_count: u32 = 0;

        for iteration in 0..self.config.max_iterations {
            if self.interrupt.is_interrupted() {
                return self.interrupted_turn("[Interrupted by user]");
            }

            self.conversation
                .truncate_if_needed(self.config.max_context_tokens);

            debug!(
                "Turn iteration {iteration}: {} messages, ~{} tokens",
                self.conversation.len(),
                self.conversation.token_count(),
            );

            let completion = match self.stream_completion(Some(&tool_defs)).await {
                Ok(c) => c,
                Err(e) => {
                    let message = e.to_string();
                    if message.contains("rejected the request")
                        && self.conversation.has_tool_messages()
                    {
                        return self.retry_with_simplified_history().await;
                    }
                    self.emit(AgentEvent::Warning(&message));
                    return String::new();
                }
            };

            // Interrupt fired mid-stream: the stream was abandoned.
            if self.interrupt.is_interrupted() {
                return self.interrupted_turn("[Interrupted by user]");
            }

            if completion.tool_calls.is_empty() {
                let text = completion.content.unwrap_or_default();
                self.conversation
                    .append(MessageRole::Assistant, text.clone());
                self.emit(AgentEvent::TurnFinished);
                return text;
            }

            // Livelock guard: identical signatures repeating means the
            // model is stuck, not working.
            let signature = tool_signature(&completion.tool_calls);
            if last_signature.as_deref() == Some(signature.as_str()) {
                repeated_count += 1;
            } else {
                repeated_count = 1;
                last_signature = Some(signature);
            }
            if repeated_count >= self.config.max_repeated {
                let warning = format!(
                    "Stopped: same tool call repeated {} times in a row.",
                    self.config.max_repeated
                );
                self.emit(AgentEvent::Warning(&warning));
                return String::new();
            }

            // Assistant message (with verbatim argument strings) goes in
            // before any result, preserving the pairing invariant.
            self.conversation.append_assistant_tool_calls(
                completion.content.clone(),
                completion.tool_calls.clone(),
            );

            for call in &completion.tool_calls {
                if self.interrupt.is_interrupted() {
                    return self
                        .interrupted_turn("[Interrupted by user during tool execution]");
                }
                self.handle_tool_call(call).await;
            }
        }

        let warning = format!(
            "Stopped: agent exceeded {} iterations without finishing.",
            self.config.max_iterations
        );
        self.emit(AgentEvent::Warning(&warning));
        String::new()
    }

    /// Stream one completion over the current history.
    async fn stream_completion(
        &self,
        tools: Option<&[ToolDef]>,
    ) -> Result<ChatCompletion, crate::api::client::LlmError> {
        let mut request = self.client.prepare(self.conversation.messages().to_vec());
        request.tools = tools.map(<[ToolDef]>::to_vec);

        let interrupt = self.interrupt.clone();
        let handler = self.handler.as_ref();
        let mut on_event = |event: &StreamEvent| -> bool {
            if let StreamEvent::TextDelta(delta) = event {
                handler.on_event(&AgentEvent::TextDelta(delta));
            }
            !interrupt.is_interrupted()
        };

        let events = self.client.stream_chat(request, &mut on_event).await?;
        Ok(assemble_completion(&events))
    }

    /// One-shot fallback for models that reject tool-formatted history:
    /// re-stream with the flattened history and no tools. Success ends the
    /// turn with the retry's text; failure ends the turn empty-handed.
    async fn retry_with_simplified_history(&mut self) -> String {
        self.emit(AgentEvent::Info(
            "Retrying with simplified history (model lacks tool support)...",
        ));

        let simplified = self.conversation.messages_simplified();
        let request = self.client.prepare(simplified);

        let interrupt = self.interrupt.clone();
        let handler = self.handler.as_ref();
        let mut on_event = |event: &StreamEvent| -> bool {
            if let StreamEvent::TextDelta(delta) = event {
                handler.on_event(&AgentEvent::TextDelta(delta));
            }
            !interrupt.is_interrupted()
        };

        match self.client.stream_chat(request, &mut on_event).await {
            Ok(events) => {
                let completion = assemble_completion(&events);
                let text = completion.content.unwrap_or_default();
                self.conversation
                    .append(MessageRole::Assistant, text.clone());
                self.emit(AgentEvent::TurnFinished);
                text
            }
            Err(e) => {
                let message = e.to_string();
                self.emit(AgentEvent::Warning(&message));
                String::new()
            }
        }
    }

    /// Parse, gate, execute, and record a single tool call.
    async fn handle_tool_call(&mut self, call: &ToolCall) {
        let name = &call.function.name;
        let raw_args = &call.function.arguments;

        let args: Value = match serde_json::from_str(raw_args) {
            Ok(v) => v,
            Err(_) => {
                let error = format!("Invalid JSON in tool arguments: {raw_args}");
                self.conversation
                    .append_tool_result(&call.id, json!({ "error": error }).to_string());
                self.register_failure();
                return;
            }
        };

        if !self.permissions.check_approval(name, &args) {
            self.conversation.append_tool_result(
                &call.id,
                json!({
                    "error": "User denied permission to execute this tool",
                    "output": "",
                })
                .to_string(),
            );
            self.emit(AgentEvent::ToolFinished {
                name,
                call_id: &call.id,
                ok: false,
                message: "denied by user",
            });
            return;
        }

        self.emit(AgentEvent::ToolStarted {
            name,
            arguments: raw_args,
        });

        let result = self.tools.execute(name, &args).await;
        self.emit(AgentEvent::ToolFinished {
            name,
            call_id: &call.id,
            ok: result.ok,
            message: &result.message,
        });

        let output = truncate_text(result.output(), self.config.max_tool_output_chars);
        let content = if !result.ok {
            self.register_failure();
            json!({ "error": result.message, "output": output }).to_string()
        } else {
            self.consecutive_failures = 0;
            if result.message.is_empty() {
                output
            } else {
                json!({ "message": result.message, "output": output }).to_string()
            }
        };
        self.conversation.append_tool_result(&call.id, content);
    }

    fn register_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.max_retries {
            warn!(
                "{} consecutive tool failures (threshold {})",
                self.consecutive_failures, self.config.max_retries
            );
            let warning = format!(
                "{} consecutive tool failures.",
                self.consecutive_failures
            );
            self.emit(AgentEvent::Warning(&warning));
        }
    }

    fn interrupted_turn(&mut self, marker: &str) -> String {
        self.emit(AgentEvent::Warning("Interrupted! Stopping agent."));
        self.conversation.append(MessageRole::Assistant, marker);
        String::new()
    }

    fn emit(&self, event: AgentEvent<'_>) {
        self.handler.on_event(&event);
    }
}

/// Stable string over the ordered `(name, raw-arguments)` pairs of an
/// assistant's tool calls, for the livelock guard.
fn tool_signature(calls: &[ToolCall]) -> String {
    let pairs: Vec<(&str, &str)> = calls
        .iter()
        .map(|c| (c.function.name.as_str(), c.function.arguments.as_str()))
        .collect();
    format!("{pairs:?}")
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{LlmError, StreamCallback};
    use crate::conversation::Conversation;
    use crate::tools::build_tools;
    use crate::tools::guard::Policy;
    use crate::ChatRequest;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted model client: replays canned event streams and records
    /// every request it receives.
    struct FakeClient {
        responses: Mutex<VecDeque<Result<Vec<StreamEvent>, LlmError>>>,
        requests: Arc<Mutex<Vec<ChatRequest>>>,
        calls: Arc<AtomicU32>,
        /// When set, fires this interrupt before delivering events,
        /// simulating ESC mid-stream.
        interrupt_on_stream: Option<InterruptController>,
    }

    impl FakeClient {
        fn new(responses: Vec<Result<Vec<StreamEvent>, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(AtomicU32::new(0)),
                interrupt_on_stream: None,
            }
        }

        fn request_log(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
            self.requests.clone()
        }

        fn call_counter(&self) -> Arc<AtomicU32> {
            self.calls.clone()
        }
    }

    impl ModelClient for FakeClient {
        fn stream_chat<'a>(
            &'a self,
            request: ChatRequest,
            on_event: StreamCallback<'a>,
        ) -> BoxFuture<'a, Result<Vec<StreamEvent>, LlmError>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(ref interrupt) = self.interrupt_on_stream {
                    interrupt.interrupt();
                }
                let next = self
                    .responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(text_events("out of script")));
                if let Ok(ref events) = next {
                    for ev in events {
                        if !on_event(ev) {
                            break;
                        }
                    }
                }
                next
            })
        }

        fn model(&self) -> &str {
            "fake-model"
        }
    }

    fn text_events(text: &str) -> Vec<StreamEvent> {
        vec![StreamEvent::TextDelta(text.into()), StreamEvent::Done]
    }

    fn tool_events(id: &str, name: &str, args: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some(id.into()),
                name: Some(name.into()),
                arguments_delta: args.into(),
            },
            StreamEvent::Done,
        ]
    }

    fn agent_in(
        dir: &std::path::Path,
        responses: Vec<Result<Vec<StreamEvent>, LlmError>>,
    ) -> Agent<FakeClient> {
        let client = FakeClient::new(responses);
        let tools = build_tools(dir, Policy::default(), None);
        let conversation = Conversation::new("You are a coding agent.", "fake-model");
        Agent::new(client, conversation, tools)
    }

    #[tokio::test]
    async fn plain_text_turn() {
        let tmp = tempfile::tempdir().unwrap();
        let mut agent = agent_in(tmp.path(), vec![Ok(text_events("Hello there."))]);

        let answer = agent.run_turn("hi").await;
        assert_eq!(answer, "Hello there.");

        let roles: Vec<MessageRole> = agent
            .conversation()
            .messages()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]
        );
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), "a\nb\nc\n").unwrap();

        let mut agent = agent_in(
            tmp.path(),
            vec![
                Ok(tool_events("c1", "file_read", r#"{"path":"hello.txt"}"#)),
                Ok(text_events("The file has three lines.")),
            ],
        );

        let answer = agent.run_turn("what's in hello.txt?").await;
        assert_eq!(answer, "The file has three lines.");

        let messages = agent.conversation().messages();
        // system, user, assistant+call, tool, assistant
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert!(messages[2].tool_calls.is_some());
        assert_eq!(messages[3].role, MessageRole::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(
            messages[3]
                .content
                .as_deref()
                .unwrap()
                .contains("Read 3 of 3 lines")
        );
    }

    #[tokio::test]
    async fn failed_tool_is_reported_not_raised() {
        let tmp = tempfile::tempdir().unwrap();
        let mut agent = agent_in(
            tmp.path(),
            vec![
                Ok(tool_events("c1", "file_read", r#"{"path":"missing.txt"}"#)),
                Ok(text_events("It does not exist.")),
            ],
        );

        let answer = agent.run_turn("read missing.txt").await;
        assert_eq!(answer, "It does not exist.");

        let tool_msg = &agent.conversation().messages()[3];
        let content = tool_msg.content.as_deref().unwrap();
        assert!(content.contains("\"error\""));
        assert!(content.contains("does not exist"));
    }

    #[tokio::test]
    async fn invalid_json_arguments_become_error_result() {
        let tmp = tempfile::tempdir().unwrap();
        let mut agent = agent_in(
            tmp.path(),
            vec![
                Ok(tool_events("c1", "file_read", "{not json")),
                Ok(text_events("sorry")),
            ],
        );

        agent.run_turn("go").await;
        let tool_msg = &agent.conversation().messages()[3];
        assert!(
            tool_msg
                .content
                .as_deref()
                .unwrap()
                .contains("Invalid JSON in tool arguments")
        );
    }

    #[tokio::test]
    async fn livelock_guard_stops_after_max_repeated_signatures() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "x").unwrap();

        let same = || Ok(tool_events("c1", "file_read", r#"{"path":"f.txt"}"#));
        let responses: Vec<_> = (0..10).map(|_| same()).collect();
        let client = FakeClient::new(responses);
        let calls = client.call_counter();
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let mut agent = Agent::new(client, conversation, tools);

        let answer = agent.run_turn("loop forever").await;
        assert_eq!(answer, "");
        // The 4th identical signature trips the guard: no further LLM calls.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn changing_signatures_reset_the_livelock_counter() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "x").unwrap();

        let mut agent = agent_in(
            tmp.path(),
            vec![
                Ok(tool_events("c1", "file_read", r#"{"path":"f.txt"}"#)),
                Ok(tool_events("c2", "file_read", r#"{"path":"f.txt","offset":0}"#)),
                Ok(tool_events("c3", "file_read", r#"{"path":"f.txt"}"#)),
                Ok(text_events("done")),
            ],
        );
        let answer = agent.run_turn("go").await;
        assert_eq!(answer, "done");
    }

    #[tokio::test]
    async fn iteration_bound_holds() {
        let tmp = tempfile::tempdir().unwrap();
        // Distinct signatures forever: the livelock guard never trips, the
        // iteration bound must.
        let responses: Vec<_> = (0..60)
            .map(|i| {
                Ok(tool_events(
                    &format!("c{i}"),
                    "file_read",
                    &format!(r#"{{"path":"missing-{i}.txt"}}"#),
                ))
            })
            .collect();
        let client = FakeClient::new(responses);
        let calls = client.call_counter();
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let mut agent = Agent::new(client, conversation, tools).with_config(AgentConfig {
            max_iterations: 7,
            ..Default::default()
        });

        let answer = agent.run_turn("go").await;
        assert_eq!(answer, "");
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn permission_denial_is_reported_to_model() {
        use crate::agent::permissions::{DenyAll, PermissionGate};

        let tmp = tempfile::tempdir().unwrap();
        let client = FakeClient::new(vec![
            Ok(tool_events(
                "c1",
                "file_write",
                r#"{"path":"new.txt","content":"data"}"#,
            )),
            Ok(text_events("understood")),
        ]);
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let mut agent = Agent::new(client, conversation, tools)
            .with_permissions(PermissionGate::new(Box::new(DenyAll)));

        let answer = agent.run_turn("write a file").await;
        assert_eq!(answer, "understood");

        let tool_msg = &agent.conversation().messages()[3];
        assert!(
            tool_msg
                .content
                .as_deref()
                .unwrap()
                .contains("User denied permission")
        );
        assert!(!tmp.path().join("new.txt").exists());
    }

    #[tokio::test]
    async fn rejected_request_retries_with_simplified_history() {
        let tmp = tempfile::tempdir().unwrap();
        let client = FakeClient::new(vec![
            Err(LlmError::Rejected {
                api_base: "http://x".into(),
                detail: "tool roles unsupported".into(),
            }),
            Ok(text_events("plain answer")),
        ]);
        let requests = client.request_log();
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let mut agent = Agent::new(client, conversation, tools);

        // Seed tool-formatted history from a previous turn.
        agent.conversation_mut().append_assistant_tool_calls(
            None,
            vec![ToolCall::new("old", "glob", r#"{"pattern":"*"}"#)],
        );
        agent.conversation_mut().append_tool_result("old", "a.rs");

        let answer = agent.run_turn("continue").await;
        assert_eq!(answer, "plain answer");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // First request carried tools; the retry carried none and a
        // flattened history.
        assert!(requests[0].tools.is_some());
        assert!(requests[1].tools.is_none());
        assert!(
            requests[1]
                .messages
                .iter()
                .all(|m| m.role != MessageRole::Tool && m.tool_calls.is_none())
        );
    }

    #[tokio::test]
    async fn rejected_without_tool_history_does_not_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let client = FakeClient::new(vec![Err(LlmError::Rejected {
            api_base: "http://x".into(),
            detail: "bad request".into(),
        })]);
        let calls = client.call_counter();
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let mut agent = Agent::new(client, conversation, tools);

        let answer = agent.run_turn("hello").await;
        assert_eq!(answer, "");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_ends_turn() {
        let tmp = tempfile::tempdir().unwrap();
        let mut agent = agent_in(
            tmp.path(),
            vec![Err(LlmError::Timeout {
                api_base: "http://x".into(),
            })],
        );
        let answer = agent.run_turn("hello").await;
        assert_eq!(answer, "");
        // No assistant message was fabricated.
        let last = agent.conversation().messages().last().unwrap();
        assert_eq!(last.role, MessageRole::User);
    }

    #[tokio::test]
    async fn interrupt_during_streaming_abandons_turn() {
        let tmp = tempfile::tempdir().unwrap();
        let interrupt = InterruptController::new();
        let mut client = FakeClient::new(vec![Ok(text_events("should be abandoned"))]);
        client.interrupt_on_stream = Some(interrupt.clone());
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let mut agent = Agent::new(client, conversation, tools).with_interrupt(interrupt);

        let answer = agent.run_turn("hello").await;
        assert_eq!(answer, "");

        let last = agent.conversation().messages().last().unwrap();
        assert_eq!(last.content.as_deref(), Some("[Interrupted by user]"));
    }

    #[tokio::test]
    async fn interrupt_between_tool_calls_stops_remaining_tools() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "x").unwrap();

        // One assistant message with two calls; the interrupt fires while
        // the first (a short sleep) runs.
        let events = vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some("c1".into()),
                name: Some("shell".into()),
                arguments_delta: r#"{"command":"sleep 1"}"#.into(),
            },
            StreamEvent::ToolCallDelta {
                index: 1,
                id: Some("c2".into()),
                name: Some("file_read".into()),
                arguments_delta: r#"{"path":"f.txt"}"#.into(),
            },
            StreamEvent::Done,
        ];
        let client = FakeClient::new(vec![Ok(events)]);
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let conversation = Conversation::new("sys", "fake-model");
        let interrupt = InterruptController::new();
        let mut agent =
            Agent::new(client, conversation, tools).with_interrupt(interrupt.clone());

        let trigger = interrupt.clone();
        let firing = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            trigger.interrupt();
        });

        let answer = agent.run_turn("go").await;
        firing.await.unwrap();
        assert_eq!(answer, "");

        let messages = agent.conversation().messages();
        let last = messages.last().unwrap();
        assert_eq!(
            last.content.as_deref(),
            Some("[Interrupted by user during tool execution]")
        );
        // The first tool completed and produced a result; the second never ran.
        assert!(messages.iter().any(|m| m.tool_call_id.as_deref() == Some("c1")));
        assert!(!messages.iter().any(|m| m.tool_call_id.as_deref() == Some("c2")));
    }

    #[tokio::test]
    async fn compaction_runs_before_each_llm_call() {
        let tmp = tempfile::tempdir().unwrap();
        let client = FakeClient::new(vec![Ok(text_events("short answer"))]);
        let tools = build_tools(tmp.path(), Policy::default(), None);
        let mut conversation = Conversation::new("sys", "fake-model");
        // Seed oversized history from previous turns.
        for _ in 0..5 {
            conversation.append(MessageRole::User, "q".repeat(4000));
            conversation.append(MessageRole::Assistant, "a".repeat(4000));
        }
        let mut agent = Agent::new(client, conversation, tools).with_config(AgentConfig {
            max_context_tokens: 2000,
            ..Default::default()
        });

        agent.run_turn("final question").await;
        assert!(agent.conversation().token_count() <= 2000);
        assert_eq!(
            agent.conversation().messages()[0].role,
            MessageRole::System
        );
    }
}
