//! Streaming chat client for OpenAI-compatible endpoints.
//!
//! The agent is model-agnostic: any server speaking the chat-completions
//! protocol works, selected by `api_base` (LiteLLM proxies, OpenRouter,
//! Ollama, llama.cpp, …). Transport failures are translated into one
//! semantic error family ([`LlmError`]) whose messages carry stable
//! discriminator strings the agent and the REPL key off:
//!
//! | variant | message contains |
//! |---|---|
//! | `Authentication` | "Authentication failed" |
//! | `Connection` | "Cannot connect" + the server URL |
//! | `Timeout` | "timed out" |
//! | `Server` | the HTTP status code |
//! | `Rejected` | "rejected the request" (the agent's retry signal) |
//! | `Unexpected` | "Unexpected error" + the error type |
//!
//! The API key lives in the `Authorization` header only — it is never
//! interpolated into an error message.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::api::streaming::StreamEvent;
use crate::{ChatRequest, Message};

/// Timeout for the startup connectivity probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a full streaming completion.
const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

// ── Errors ─────────────────────────────────────────────────────────

/// Semantic transport errors. One family, discriminated by message.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error(
        "Authentication failed connecting to the model server.\n\n  Server: {api_base}\n\nCheck the api_key in your config file."
    )]
    Authentication { api_base: String },

    #[error(
        "Cannot connect to the model server.\n\n  Server: {api_base}\n  Error: {detail}\n\nSuggestions:\n  1. Verify the server is running at {api_base}\n  2. Check your network/firewall settings\n  3. Verify api_base in your config file"
    )]
    Connection { api_base: String, detail: String },

    #[error(
        "Connection to the model server timed out.\n\n  Server: {api_base}\n\nThe server may be overloaded or unreachable. Check your network connection."
    )]
    Timeout { api_base: String },

    #[error(
        "Model server request failed (status {status}).\n\n  Server: {api_base}\n\nCheck the server configuration and logs."
    )]
    Server { api_base: String, status: u16 },

    #[error(
        "Model rejected the request.\n\n  Server: {api_base}\n  Error: {detail}\n\nThe model may not support tool calls or this message format.\nTry switching models with /model <name>."
    )]
    Rejected { api_base: String, detail: String },

    #[error("Unexpected error from the model server: {type_name}: {detail}")]
    Unexpected { type_name: String, detail: String },
}

// ── Options ────────────────────────────────────────────────────────

/// Connection and sampling options for [`LlmClient`].
#[derive(Debug, Clone)]
pub struct LlmOptions {
    /// Model identifier forwarded to the server.
    pub model: String,
    /// Base URL of the chat-completions endpoint (no trailing
    /// `/chat/completions`). Must start with `http://` or `https://`.
    pub api_base: String,
    /// Bearer token. `None` for servers that take no key (Ollama).
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-response output token cap.
    pub max_output_tokens: u32,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            api_base: String::new(),
            api_key: None,
            temperature: 0.2,
            max_output_tokens: 8192,
            top_p: None,
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
pub struct LlmClient {
    pub(crate) http: reqwest::Client,
    pub(crate) options: LlmOptions,
}

impl LlmClient {
    /// Create a new client. Fails only when the HTTP client cannot be built.
    pub fn new(options: LlmOptions) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent("quill-agent/0.3")
            .timeout(STREAM_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Unexpected {
                type_name: "reqwest::Error".into(),
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, options })
    }

    /// The configured model identifier.
    pub fn model(&self) -> &str {
        &self.options.model
    }

    /// The configured server base URL.
    pub fn api_base(&self) -> &str {
        &self.options.api_base
    }

    /// Switch the model for subsequent requests (the `/model` command).
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.options.model = model.into();
    }

    /// Full URL of the chat completions endpoint.
    pub(crate) fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.options.api_base.trim_end_matches('/')
        )
    }

    /// Fill the request with this client's model and sampling options.
    pub fn request_for(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages,
            max_tokens: self.options.max_output_tokens,
            temperature: self.options.temperature,
            top_p: self.options.top_p,
            ..Default::default()
        }
    }

    /// Attach the bearer header when a key is configured.
    pub(crate) fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.options.api_key {
            Some(ref key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    /// Translate a reqwest transport error into the semantic family.
    pub(crate) fn translate_transport(&self, e: &reqwest::Error) -> LlmError {
        let api_base = self.options.api_base.clone();
        if e.is_timeout() {
            LlmError::Timeout { api_base }
        } else if e.is_connect() {
            LlmError::Connection {
                api_base,
                detail: connect_detail(e),
            }
        } else {
            LlmError::Unexpected {
                type_name: "reqwest::Error".into(),
                detail: connect_detail(e),
            }
        }
    }

    /// Translate a non-success HTTP status into the semantic family.
    pub(crate) fn translate_status(&self, status: u16, body: &str) -> LlmError {
        let api_base = self.options.api_base.clone();
        match status {
            401 | 403 => LlmError::Authentication { api_base },
            400 | 422 => LlmError::Rejected {
                api_base,
                detail: body.chars().take(400).collect(),
            },
            _ => LlmError::Server { api_base, status },
        }
    }

    /// Verify connectivity with a 1-token probe.
    ///
    /// Sends a minimal non-streaming completion so the startup path can
    /// distinguish authentication, connectivity, and server failures before
    /// the REPL begins.
    pub async fn verify_connection(&self) -> Result<(), LlmError> {
        let mut body = self.request_for(vec![Message::user("ping")]);
        body.max_tokens = 1;

        debug!("Verifying connection to {}", self.options.api_base);
        let response = self
            .authorize(self.http.post(self.completions_url()))
            .timeout(PROBE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.translate_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.translate_status(status.as_u16(), &text));
        }
        Ok(())
    }
}

/// Human-readable detail for a reqwest error, without URL userinfo.
///
/// reqwest never puts header values (so never the API key) into its
/// Display output; source-chain text is still capped defensively.
fn connect_detail(e: &reqwest::Error) -> String {
    let mut detail = e.to_string();
    if let Some(inner) = std::error::Error::source(e) {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
    }
    detail.chars().take(300).collect()
}

// ── Model client seam ──────────────────────────────────────────────

/// Callback invoked per stream event; returning `false` abandons the
/// stream (interrupt fired mid-generation).
pub type StreamCallback<'a> = &'a mut (dyn FnMut(&StreamEvent) -> bool + Send);

/// The streaming seam between the agent loop and the transport.
///
/// [`LlmClient`] is the production implementation; tests drive the loop
/// with scripted implementations.
pub trait ModelClient: Send + Sync {
    /// Stream a chat completion, invoking `on_event` for each event as it
    /// arrives. Returns the full event list for post-hoc assembly.
    fn stream_chat<'a>(
        &'a self,
        request: ChatRequest,
        on_event: StreamCallback<'a>,
    ) -> BoxFuture<'a, Result<Vec<StreamEvent>, LlmError>>;

    /// The model identifier requests default to.
    fn model(&self) -> &str;

    /// Build the request skeleton for this client: model plus messages,
    /// with whatever sampling options the implementation carries. The
    /// agent fills in `tools` afterwards.
    fn prepare(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: self.model().to_string(),
            messages,
            ..Default::default()
        }
    }
}

impl ModelClient for LlmClient {
    fn stream_chat<'a>(
        &'a self,
        request: ChatRequest,
        on_event: StreamCallback<'a>,
    ) -> BoxFuture<'a, Result<Vec<StreamEvent>, LlmError>> {
        Box::pin(async move { self.chat_stream_live(&request, on_event).await })
    }

    fn model(&self) -> &str {
        &self.options.model
    }

    fn prepare(&self, messages: Vec<Message>) -> ChatRequest {
        self.request_for(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LlmClient {
        LlmClient::new(LlmOptions {
            model: "test-model".into(),
            api_base: "http://localhost:4000".into(),
            api_key: Some("sk-secret-key-value".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn completions_url_joins_without_double_slash() {
        let c = client();
        assert_eq!(
            c.completions_url(),
            "http://localhost:4000/chat/completions"
        );

        let c2 = LlmClient::new(LlmOptions {
            api_base: "http://localhost:4000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            c2.completions_url(),
            "http://localhost:4000/chat/completions"
        );
    }

    #[test]
    fn status_401_is_authentication() {
        let c = client();
        let err = c.translate_status(401, "unauthorized");
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[test]
    fn status_400_is_rejected_with_retry_discriminator() {
        let c = client();
        let err = c.translate_status(400, "tool messages unsupported");
        let msg = err.to_string();
        assert!(msg.contains("rejected the request"));
        assert!(msg.contains("tool messages unsupported"));
    }

    #[test]
    fn status_500_names_the_code() {
        let c = client();
        let err = c.translate_status(500, "boom");
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn error_messages_include_server_but_never_the_key() {
        let c = client();
        for err in [
            c.translate_status(401, ""),
            c.translate_status(400, "detail"),
            c.translate_status(503, "oops"),
        ] {
            let msg = err.to_string();
            assert!(!msg.contains("sk-secret-key-value"), "leaked key: {msg}");
        }
        // Connection-style messages carry the server URL for diagnostics.
        let err = LlmError::Connection {
            api_base: c.options.api_base.clone(),
            detail: "refused".into(),
        };
        assert!(err.to_string().contains("http://localhost:4000"));
        assert!(err.to_string().contains("Cannot connect"));
    }

    #[test]
    fn timeout_message_has_discriminator() {
        let err = LlmError::Timeout {
            api_base: "http://x".into(),
        };
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn unexpected_message_has_discriminator() {
        let err = LlmError::Unexpected {
            type_name: "SomeError".into(),
            detail: "who knows".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Unexpected error"));
        assert!(msg.contains("SomeError"));
    }

    #[test]
    fn request_for_applies_options() {
        let c = client();
        let req = c.request_for(vec![Message::user("hi")]);
        assert_eq!(req.model, "test-model");
        assert_eq!(req.max_tokens, 8192);
        assert_eq!(req.messages.len(), 1);
    }
}
