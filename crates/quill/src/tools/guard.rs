//! Guard middleware: policy deny-list, schema validation, workspace-path
//! containment, and the audit log.
//!
//! [`ToolGuard::check`] runs before every tool handler. Returning `None`
//! means "no objection — proceed"; returning a failure envelope means the
//! handler must not run. The guard never raises: every rejection is a
//! [`ToolResult`] the agent can hand back to the model.
//!
//! Workspace-path containment is the central safety invariant: any `path`
//! argument must resolve to the workspace root or a descendant of it.
//! Tools whose path-bearing arguments are named differently (`src`, `dst`,
//! `cwd`, patch targets) perform the equivalent check themselves via
//! [`resolve_in_workspace`].

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::result::ToolResult;

// ── Policy ─────────────────────────────────────────────────────────

/// Deny-list policy, read-only for the lifetime of the guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Tool names that may never run.
    #[serde(default)]
    pub deny_tools: HashSet<String>,
    /// Per-tool action switches; `true` denies the tool.
    #[serde(default)]
    pub deny_actions: HashMap<String, bool>,
}

impl Policy {
    /// Whether the policy denies `tool_name` outright.
    pub fn denies(&self, tool_name: &str) -> bool {
        self.deny_tools.contains(tool_name)
            || self.deny_actions.get(tool_name).copied().unwrap_or(false)
    }
}

// ── Path containment ───────────────────────────────────────────────

/// Resolve `raw` against the canonical workspace `root` and verify the
/// result stays inside it.
///
/// Relative paths are joined onto the root; absolute paths are taken
/// as-is. The joined path is normalized lexically (`.` dropped, `..`
/// popped), then the longest existing ancestor is canonicalized so
/// symlinks cannot smuggle the result outside. Paths that do not exist
/// yet (targets of `file_write`, `file_move`) are still checkable: the
/// non-existent tail is re-appended after canonicalization.
///
/// Returns the resolved absolute path, or a `PATH_OUTSIDE_WORKSPACE`
/// failure envelope.
pub fn resolve_in_workspace(root: &Path, raw: &str) -> Result<PathBuf, ToolResult> {
    // Tolerate a non-canonical root (tests, symlinked temp dirs).
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let root = root.as_path();
    let candidate = {
        let p = Path::new(raw);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            root.join(p)
        }
    };

    let outside = || {
        ToolResult::failure(
            "PATH_OUTSIDE_WORKSPACE",
            format!("Path '{raw}' resolves outside the workspace."),
        )
    };

    // Lexical normalization: collapse `.` and `..` without touching disk.
    let mut normalized = PathBuf::new();
    for comp in candidate.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(outside());
                }
            }
            other => normalized.push(other),
        }
    }

    // Canonicalize the deepest existing ancestor so symlinked prefixes
    // resolve to their real location before the containment check.
    let mut existing = normalized.as_path();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Err(outside()),
        }
    }
    let mut resolved = match existing.canonicalize() {
        Ok(p) => p,
        Err(_) => return Err(outside()),
    };
    for part in tail.iter().rev() {
        resolved.push(part);
    }

    if resolved == root || resolved.starts_with(root) {
        Ok(resolved)
    } else {
        Err(outside())
    }
}

// ── ToolGuard ──────────────────────────────────────────────────────

/// Pre-execution check pipeline for every tool call.
///
/// Evaluation order, short-circuiting on the first failure:
///
/// 1. policy deny-list → `DENIED_BY_POLICY`
/// 2. JSON Schema validation → `INVALID_ARGS` naming the offending field
/// 3. `path` containment → `PATH_OUTSIDE_WORKSPACE`
/// 4. one audit line, allowed or denied
pub struct ToolGuard {
    workspace_root: PathBuf,
    policy: Policy,
    log_path: Option<PathBuf>,
}

impl ToolGuard {
    /// Create a guard rooted at `workspace_root` (canonicalized here, once).
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        policy: Policy,
        log_path: Option<PathBuf>,
    ) -> Self {
        let raw: PathBuf = workspace_root.into();
        let workspace_root = raw.canonicalize().unwrap_or(raw);
        Self {
            workspace_root,
            policy,
            log_path,
        }
    }

    /// The canonical workspace root this guard encloses.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Run all checks for a tool call. `None` means proceed.
    pub fn check(&self, tool_name: &str, args: &Value, schema: Option<&Value>) -> Option<ToolResult> {
        // 1. Policy deny-list — before schema, path, or handler.
        if self.policy.deny_tools.contains(tool_name) {
            let result = ToolResult::failure(
                "DENIED_BY_POLICY",
                format!("Tool '{tool_name}' is denied by policy."),
            );
            self.log(tool_name, Some(&result));
            return Some(result);
        }
        if self.policy.deny_actions.get(tool_name).copied().unwrap_or(false) {
            let result = ToolResult::failure(
                "DENIED_BY_POLICY",
                format!("Action '{tool_name}' is denied by policy."),
            );
            self.log(tool_name, Some(&result));
            return Some(result);
        }

        // 2. Schema validation.
        if let Some(schema) = schema
            && let Some(error) = validate_against_schema(args, schema)
        {
            let result = ToolResult::failure(
                "INVALID_ARGS",
                format!("Invalid arguments for tool '{tool_name}': {error}"),
            );
            self.log(tool_name, Some(&result));
            return Some(result);
        }

        // 3. Containment for a single-line `path` argument. Multi-line
        // string values (diff payloads) are content, not paths.
        if let Some(Value::String(path_arg)) = args.get("path")
            && !path_arg.contains('\n')
            && let Err(result) = resolve_in_workspace(&self.workspace_root, path_arg)
        {
            self.log(tool_name, Some(&result));
            return Some(result);
        }

        self.log(tool_name, None);
        None
    }

    /// Append one JSON line to the audit log. The file is opened fresh per
    /// write so concurrent sessions interleave whole lines.
    fn log(&self, tool_name: &str, result: Option<&ToolResult>) {
        let Some(ref log_path) = self.log_path else {
            return;
        };
        let denied = result.is_some_and(|r| !r.ok);
        let entry = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "tool_name": tool_name,
            "denied": denied,
            "error_code": result.and_then(|r| r.error_code.as_deref()),
        });
        debug!("audit: {entry}");
        let line = format!("{entry}\n");
        let write = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = write {
            warn!("Failed to write audit log {}: {e}", log_path.display());
        }
    }
}

/// Validate raw arguments against a tool's declared JSON Schema.
///
/// Returns `None` if valid, or `Some(error_string)` naming the offending
/// field. Extra fields are allowed — the model may pass anything beyond the
/// declared properties and tools can inspect unknown fields freely.
pub fn validate_against_schema(args: &Value, schema: &Value) -> Option<String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        // An invalid schema is a registration bug, not the model's fault.
        Err(_) => return None,
    };

    validator.iter_errors(args).next().map(|e| {
        let path = e.instance_path().to_string();
        if path.is_empty() {
            e.to_string()
        } else {
            format!("field '{}': {e}", path.trim_start_matches('/'))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guard_in(dir: &Path) -> ToolGuard {
        ToolGuard::new(dir, Policy::default(), None)
    }

    #[test]
    fn deny_tools_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        policy.deny_tools.insert("shell".into());
        let guard = ToolGuard::new(tmp.path(), policy, None);

        // Even invalid args are not inspected once policy denies.
        let result = guard
            .check("shell", &json!({"bogus": true}), Some(&json!({"required": ["command"]})))
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("DENIED_BY_POLICY"));
    }

    #[test]
    fn deny_actions_flag_denies() {
        let tmp = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        policy.deny_actions.insert("git_commit".into(), true);
        let guard = ToolGuard::new(tmp.path(), policy, None);

        let result = guard.check("git_commit", &json!({}), None).unwrap();
        assert_eq!(result.error_code.as_deref(), Some("DENIED_BY_POLICY"));
    }

    #[test]
    fn missing_required_field_is_invalid_args() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let schema = json!({
            "type": "object",
            "properties": {"pattern": {"type": "string"}},
            "required": ["pattern"]
        });

        let result = guard.check("grep", &json!({}), Some(&schema)).unwrap();
        assert_eq!(result.error_code.as_deref(), Some("INVALID_ARGS"));
        assert!(result.message.contains("pattern"));
    }

    #[test]
    fn wrong_type_is_invalid_args_naming_field() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let schema = json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}},
            "required": []
        });

        let result = guard
            .check("file_read", &json!({"limit": "three"}), Some(&schema))
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("INVALID_ARGS"));
        assert!(result.message.contains("limit"));
    }

    #[test]
    fn extra_fields_are_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let schema = json!({
            "type": "object",
            "properties": {"pattern": {"type": "string"}},
            "required": ["pattern"]
        });

        let verdict = guard.check(
            "grep",
            &json!({"pattern": "x", "experimental_flag": 7}),
            Some(&schema),
        );
        assert!(verdict.is_none());
    }

    #[test]
    fn traversal_path_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());

        let result = guard
            .check("file_read", &json!({"path": "../../etc/passwd"}), None)
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());

        let result = guard
            .check("file_read", &json!({"path": "/etc/passwd"}), None)
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
    }

    #[test]
    fn multiline_path_value_skips_containment() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());

        // A diff payload that happens to sit under a `path` key is content.
        let verdict = guard.check(
            "file_patch",
            &json!({"path": "--- a/../x\n+++ b/../x\n"}),
            None,
        );
        assert!(verdict.is_none());
    }

    #[test]
    fn nonexistent_target_inside_root_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());

        let verdict = guard.check("file_write", &json!({"path": "new/dir/file.txt"}), None);
        assert!(verdict.is_none());
    }

    #[test]
    fn resolve_in_workspace_accepts_root_itself() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let resolved = resolve_in_workspace(&root, ".").unwrap();
        assert_eq!(resolved, root);
    }

    #[test]
    fn audit_log_one_line_per_check() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("audit.jsonl");
        let guard = ToolGuard::new(tmp.path(), Policy::default(), Some(log.clone()));

        assert!(guard.check("file_read", &json!({"path": "ok.txt"}), None).is_none());
        assert!(
            guard
                .check("file_read", &json!({"path": "../nope"}), None)
                .is_some()
        );

        let lines: Vec<String> = std::fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(lines.len(), 2);

        let allowed: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(allowed["denied"], false);
        assert_eq!(allowed["error_code"], Value::Null);

        let denied: Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(denied["denied"], true);
        assert_eq!(denied["error_code"], "PATH_OUTSIDE_WORKSPACE");
    }
}
