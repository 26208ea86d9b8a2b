//! Per-session scratch pad: `state_set` / `state_get`.
//!
//! A small key→JSON store the model can use to stash intermediate results
//! between turns. The store is created by [`build_tools`](crate::tools::build_tools)
//! and shared by the two tool instances, so it is isolated per agent
//! instance and vanishes with the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::result::{ToolResult, payload};

/// Shared key→value store backing the state tools.
pub type StateStore = Arc<Mutex<HashMap<String, Value>>>;

/// Create a fresh, empty state store.
pub fn new_state_store() -> StateStore {
    Arc::new(Mutex::new(HashMap::new()))
}

// ── Argument types ──────────────────────────────────────────────────

/// Typed arguments for `state_set`.
#[derive(Deserialize, JsonSchema)]
pub struct StateSetArgs {
    /// Key to store under.
    pub key: String,
    /// Any JSON-serializable value.
    pub value: Value,
}

/// Typed arguments for `state_get`.
#[derive(Deserialize, JsonSchema)]
pub struct StateGetArgs {
    /// Key to read. Omit to list all stored keys.
    #[serde(default)]
    pub key: Option<String>,
}

// ── StateSet ────────────────────────────────────────────────────────

/// Store a value in the session scratch pad.
pub struct StateSet {
    store: StateStore,
}

impl StateSet {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl Tool for StateSet {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "state_set",
            "Store a JSON value under a key in the session scratch pad. \
             Use this to remember intermediate results between steps.",
            json_schema_for::<StateSetArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let store = self.store.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: StateSetArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let previous = store
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(args.key.clone(), args.value);
            ToolResult::success(
                payload([
                    ("key", json!(args.key)),
                    ("replaced", json!(previous.is_some())),
                ]),
                format!("Stored '{}'", args.key),
            )
        })
    }
}

// ── StateGet ────────────────────────────────────────────────────────

/// Read a value (or list keys) from the session scratch pad.
pub struct StateGet {
    store: StateStore,
}

impl StateGet {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl Tool for StateGet {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "state_get",
            "Read a value from the session scratch pad by key, or omit key \
             to list all stored keys.",
            json_schema_for::<StateGetArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let store = self.store.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: StateGetArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let store = store.lock().unwrap_or_else(|e| e.into_inner());
            match args.key {
                Some(key) => match store.get(&key) {
                    Some(value) => ToolResult::success(
                        payload([("key", json!(key)), ("value", value.clone())]),
                        format!("Value for '{key}'"),
                    ),
                    None => ToolResult::failure(
                        "NOT_FOUND",
                        format!("No value stored under '{key}'."),
                    ),
                },
                None => {
                    let mut keys: Vec<&String> = store.keys().collect();
                    keys.sort();
                    ToolResult::success(
                        payload([("keys", json!(keys))]),
                        format!("{} key(s) stored", store.len()),
                    )
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = new_state_store();
        let set = StateSet::new(store.clone());
        let get = StateGet::new(store);

        let result = set
            .execute(&json!({"key": "plan", "value": {"steps": [1, 2, 3]}}))
            .await;
        assert!(result.ok);
        assert_eq!(result.data["replaced"], false);

        let result = get.execute(&json!({"key": "plan"})).await;
        assert!(result.ok);
        assert_eq!(result.data["value"]["steps"][2], 3);
    }

    #[tokio::test]
    async fn overwrite_reports_replaced() {
        let store = new_state_store();
        let set = StateSet::new(store);
        set.execute(&json!({"key": "k", "value": 1})).await;
        let result = set.execute(&json!({"key": "k", "value": 2})).await;
        assert_eq!(result.data["replaced"], true);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = new_state_store();
        let get = StateGet::new(store);
        let result = get.execute(&json!({"key": "absent"})).await;
        assert_eq!(result.error_code.as_deref(), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn listing_keys() {
        let store = new_state_store();
        let set = StateSet::new(store.clone());
        let get = StateGet::new(store);
        set.execute(&json!({"key": "b", "value": 1})).await;
        set.execute(&json!({"key": "a", "value": 2})).await;

        let result = get.execute(&json!({})).await;
        let keys: Vec<String> = serde_json::from_value(result.data["keys"].clone()).unwrap();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn stores_are_isolated_per_instance() {
        let set_a = StateSet::new(new_state_store());
        let get_b = StateGet::new(new_state_store());
        set_a.execute(&json!({"key": "k", "value": 1})).await;
        let result = get_b.execute(&json!({"key": "k"})).await;
        assert_eq!(result.error_code.as_deref(), Some("NOT_FOUND"));
    }
}
