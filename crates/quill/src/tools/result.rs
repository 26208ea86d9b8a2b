//! The uniform outcome envelope for all tools.
//!
//! Every tool returns a [`ToolResult`] — success or failure, always data,
//! never a panic or an `Err` that escapes to the agent loop. The agent
//! serializes the envelope to JSON when feeding results back to the model,
//! so stable `error_code` strings are part of the tool contract.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Standard envelope for all tool responses.
///
/// `ok=false` requires a non-empty `error_code` (stable SCREAMING_SNAKE
/// identifier) and a human-readable `message`. `warnings` carries non-fatal
/// notes (truncated result sets, non-zero exit codes) and does not flip
/// `ok`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolResult {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
    pub data: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl ToolResult {
    /// A successful result with structured payload.
    pub fn success(data: Map<String, Value>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: message.into(),
            data,
            warnings: Vec::new(),
        }
    }

    /// A successful result with no payload.
    pub fn success_empty(message: impl Into<String>) -> Self {
        Self::success(Map::new(), message)
    }

    /// A failed result. `error_code` must be a stable identifier from the
    /// documented taxonomy (`FILE_NOT_FOUND`, `PATH_OUTSIDE_WORKSPACE`, …).
    pub fn failure(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(error_code.into()),
            message: message.into(),
            data: Map::new(),
            warnings: Vec::new(),
        }
    }

    /// A failed result that still carries payload (e.g. captured stdout).
    pub fn failure_with_data(
        error_code: impl Into<String>,
        message: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            ok: false,
            error_code: Some(error_code.into()),
            message: message.into(),
            data,
            warnings: Vec::new(),
        }
    }

    /// Attach warnings (builder style).
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Attach a single warning (builder style).
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// The primary textual output of this result, used when feeding the
    /// result back to the model: `data["content"]`, then `data["output"]`,
    /// then `data["stdout"]`, then the message.
    pub fn output(&self) -> String {
        for key in ["content", "output", "stdout"] {
            if let Some(Value::String(s)) = self.data.get(key)
                && !s.is_empty()
            {
                return s.clone();
            }
        }
        self.message.clone()
    }
}

/// Build a `serde_json::Map` payload from `(key, value)` pairs.
///
/// Small sugar so tool bodies read like the table in their contract:
///
/// ```ignore
/// ToolResult::success(
///     payload([("content", json!(text)), ("total_lines", json!(n))]),
///     format!("Read {n} lines"),
/// )
/// ```
pub fn payload<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    let mut map = Map::with_capacity(N);
    for (k, v) in entries {
        map.insert(k.to_string(), v);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_has_no_error_code() {
        let r = ToolResult::success_empty("done");
        assert!(r.ok);
        assert!(r.error_code.is_none());
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn failure_carries_code_and_message() {
        let r = ToolResult::failure("FILE_NOT_FOUND", "File 'x' does not exist.");
        assert!(!r.ok);
        assert_eq!(r.error_code.as_deref(), Some("FILE_NOT_FOUND"));
        assert_eq!(r.message, "File 'x' does not exist.");
    }

    #[test]
    fn warnings_do_not_flip_ok() {
        let r = ToolResult::success(payload([("matches", json!([]))]), "No matches")
            .with_warning("Result set truncated at 500 entries");
        assert!(r.ok);
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn output_prefers_content_then_output_then_message() {
        let r = ToolResult::success(
            payload([("content", json!("file body")), ("output", json!("other"))]),
            "Read file",
        );
        assert_eq!(r.output(), "file body");

        let r = ToolResult::success(payload([("output", json!("shell out"))]), "Ran");
        assert_eq!(r.output(), "shell out");

        let r = ToolResult::success_empty("just a message");
        assert_eq!(r.output(), "just a message");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let r = ToolResult::failure("TIMEOUT", "Command timed out after 60s");
        let s = serde_json::to_string(&r).unwrap();
        let back: ToolResult = serde_json::from_str(&s).unwrap();
        assert!(!back.ok);
        assert_eq!(back.error_code.as_deref(), Some("TIMEOUT"));
    }
}
