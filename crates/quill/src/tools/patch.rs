//! `file_patch`: apply unified diffs or structured hunk lists.
//!
//! Two input shapes, mutually exclusive:
//!
//! - `diff_text` — a unified diff. Applied with the `diffy` parser for
//!   single-file diffs; multi-file diffs fall back to the external `patch`
//!   binary. The binary path cannot report per-hunk rejections, so its
//!   failures degrade to `PATCH_FAILED` with captured output.
//! - `patches` — a structured list `[{path, hunks: [{start, end,
//!   replace_with}]}]` with 1-based inclusive line ranges. Hunks are
//!   applied per file in reverse start order so earlier line numbers stay
//!   valid. Out-of-range hunks land in `rejected_hunks`; partial success
//!   is `ok=true` with a warning.
//!
//! An optional `file_hash` (SHA-256 hex of the target's current bytes)
//! rejects the whole patch with `HASH_MISMATCH` when the file changed
//! since the hash was computed.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::guard::resolve_in_workspace;
use crate::tools::result::{ToolResult, payload};

// ── Argument types ──────────────────────────────────────────────────

/// Typed arguments for `file_patch`.
#[derive(Deserialize, JsonSchema)]
pub struct FilePatchArgs {
    /// A unified diff (`--- a/… +++ b/… @@ … @@`). Mutually exclusive with `patches`.
    #[serde(default)]
    pub diff_text: Option<String>,
    /// Structured patch list. Mutually exclusive with `diff_text`.
    #[serde(default)]
    pub patches: Option<Vec<PatchSpec>>,
    /// SHA-256 hex digest of the target file's current content. The patch
    /// is rejected when the file has changed since the hash was computed.
    #[serde(default)]
    pub file_hash: Option<String>,
}

/// One file's worth of structured hunks.
#[derive(Deserialize, JsonSchema, Clone)]
pub struct PatchSpec {
    /// Target file path relative to the workspace root.
    pub path: String,
    /// Hunks to apply, 1-based inclusive line ranges.
    pub hunks: Vec<Hunk>,
}

/// A contiguous line-range replacement.
#[derive(Deserialize, JsonSchema, Clone)]
pub struct Hunk {
    /// First line to replace (1-based, inclusive).
    pub start: u64,
    /// Last line to replace (1-based, inclusive).
    pub end: u64,
    /// Replacement text for the range. May contain any number of lines.
    pub replace_with: String,
}

// ── FilePatch ───────────────────────────────────────────────────────

/// Apply patches to files in the workspace.
pub struct FilePatch {
    workspace_root: PathBuf,
}

impl FilePatch {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for FilePatch {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_patch",
            "Apply patches to workspace files. Accepts either a unified diff \
             string (diff_text) or a structured hunk list (patches). Prefer \
             file_patch over file_write for surgical edits. Structured hunks \
             report per-hunk rejections; the unified-diff fallback via the \
             external patch binary reports only pass/fail.",
            json_schema_for::<FilePatchArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FilePatchArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };

            match (args.diff_text, args.patches) {
                (None, None) => ToolResult::failure(
                    "MISSING_INPUT",
                    "Provide either diff_text (unified diff) or patches (structured hunks).",
                ),
                (Some(_), Some(_)) => ToolResult::failure(
                    "AMBIGUOUS_INPUT",
                    "Provide either diff_text or patches, not both.",
                ),
                (Some(diff), None) => apply_unified_diff(&root, &diff, args.file_hash.as_deref()).await,
                (None, Some(patches)) => {
                    apply_structured(&root, &patches, args.file_hash.as_deref()).await
                }
            }
        })
    }
}

// ── Structured hunks ────────────────────────────────────────────────

async fn apply_structured(
    root: &Path,
    patches: &[PatchSpec],
    file_hash: Option<&str>,
) -> ToolResult {
    let mut files_changed: Vec<String> = Vec::new();
    let mut rejected: Vec<Value> = Vec::new();

    for spec in patches {
        let full_path = match resolve_in_workspace(root, &spec.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(_) => {
                for hunk in &spec.hunks {
                    rejected.push(json!({
                        "path": spec.path,
                        "start": hunk.start,
                        "end": hunk.end,
                        "reason": "file not found",
                    }));
                }
                continue;
            }
        };

        if let Some(expected) = file_hash
            && let Some(mismatch) = check_hash(&spec.path, content.as_bytes(), expected)
        {
            return mismatch;
        }

        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let had_trailing_newline = content.ends_with('\n');

        // Reverse start order keeps earlier line numbers valid as later
        // ranges are spliced out.
        let mut hunks = spec.hunks.clone();
        hunks.sort_by(|a, b| b.start.cmp(&a.start));

        let mut applied_any = false;
        for hunk in &hunks {
            let total = lines.len() as u64;
            if hunk.start == 0 || hunk.end < hunk.start || hunk.end > total {
                rejected.push(json!({
                    "path": spec.path,
                    "start": hunk.start,
                    "end": hunk.end,
                    "reason": format!("range out of bounds (file has {total} lines)"),
                }));
                continue;
            }
            let start = (hunk.start - 1) as usize;
            let end = hunk.end as usize;
            let replacement: Vec<String> = if hunk.replace_with.is_empty() {
                Vec::new()
            } else {
                hunk.replace_with.lines().map(String::from).collect()
            };
            lines.splice(start..end, replacement);
            applied_any = true;
        }

        if applied_any {
            let mut new_content = lines.join("\n");
            if had_trailing_newline && !new_content.is_empty() {
                new_content.push('\n');
            }
            if let Err(e) = tokio::fs::write(&full_path, &new_content).await {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not write '{}': {e}", spec.path),
                );
            }
            files_changed.push(spec.path.clone());
        }
    }

    let applied = !files_changed.is_empty();
    let rejected_count = rejected.len();
    let mut result = ToolResult::success(
        payload([
            ("applied", json!(applied)),
            ("files_changed", json!(files_changed)),
            ("rejected_hunks", json!(rejected)),
        ]),
        format!(
            "Applied patches to {} file(s), {} hunk(s) rejected",
            if applied { "some" } else { "no" },
            rejected_count
        ),
    );
    if rejected_count > 0 {
        result = result.with_warning(format!("{rejected_count} hunk(s) were rejected."));
    }
    result
}

// ── Unified diff ────────────────────────────────────────────────────

async fn apply_unified_diff(root: &Path, diff_text: &str, file_hash: Option<&str>) -> ToolResult {
    // Fast path: single-file diffs through the diffy parser, which can
    // check the hash and report a clean parse error.
    match diffy::Patch::from_str(diff_text) {
        Ok(patch) => apply_with_diffy(root, &patch, file_hash).await,
        Err(_) => {
            // Multi-file or otherwise unparseable diff: hand it to the
            // external `patch` binary if we have one.
            if which::which("patch").is_ok() {
                apply_with_patch_binary(root, diff_text).await
            } else {
                ToolResult::failure(
                    "NO_PATCH_BACKEND",
                    "Could not parse the diff as a single-file patch and no \
                     external 'patch' binary is available.",
                )
            }
        }
    }
}

async fn apply_with_diffy(
    root: &Path,
    patch: &diffy::Patch<'_, str>,
    file_hash: Option<&str>,
) -> ToolResult {
    let target = patch
        .modified()
        .or_else(|| patch.original())
        .map(strip_diff_prefix);
    let Some(target) = target else {
        return ToolResult::failure("PARSE_ERROR", "Diff does not name a target file.");
    };

    let full_path = match resolve_in_workspace(root, &target) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let base = match tokio::fs::read_to_string(&full_path).await {
        Ok(c) => c,
        Err(_) => {
            return ToolResult::failure(
                "FILE_NOT_FOUND",
                format!("Patch target '{target}' does not exist."),
            );
        }
    };

    if let Some(expected) = file_hash
        && let Some(mismatch) = check_hash(&target, base.as_bytes(), expected)
    {
        return mismatch;
    }

    match diffy::apply(&base, patch) {
        Ok(new_content) => {
            if let Err(e) = tokio::fs::write(&full_path, &new_content).await {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not write '{target}': {e}"),
                );
            }
            ToolResult::success(
                payload([
                    ("applied", json!(true)),
                    ("files_changed", json!([target])),
                    ("rejected_hunks", json!([])),
                ]),
                format!("Applied unified diff to {target}"),
            )
        }
        Err(e) => ToolResult::failure(
            "PATCH_FAILED",
            format!("Diff did not apply cleanly to '{target}': {e}"),
        ),
    }
}

/// Apply a diff via the external `patch` binary (`-p1`, workspace cwd).
///
/// This backend cannot report per-hunk rejections: a non-zero exit
/// degrades to `PATCH_FAILED` with the captured output.
async fn apply_with_patch_binary(root: &Path, diff_text: &str) -> ToolResult {
    let mut child = match Command::new("patch")
        .args(["-p1", "--batch"])
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return ToolResult::failure("EXEC_ERROR", format!("Could not run patch: {e}"));
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(diff_text.as_bytes()).await;
    }

    let output = match child.wait_with_output().await {
        Ok(o) => o,
        Err(e) => {
            return ToolResult::failure("EXEC_ERROR", format!("patch did not complete: {e}"));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        // `patch` reports targets as "patching file <path>".
        let files_changed: Vec<String> = stdout
            .lines()
            .filter_map(|l| l.strip_prefix("patching file "))
            .map(String::from)
            .collect();
        ToolResult::success(
            payload([
                ("applied", json!(true)),
                ("files_changed", json!(files_changed)),
                ("rejected_hunks", json!([])),
                ("output", json!(stdout)),
            ]),
            "Applied unified diff via patch binary",
        )
    } else {
        ToolResult::failure_with_data(
            "PATCH_FAILED",
            "patch binary reported failure",
            payload([("output", json!(format!("{stdout}{stderr}")))]),
        )
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Strip the `a/` / `b/` prefixes unified diffs carry on file names.
fn strip_diff_prefix(name: &str) -> String {
    name.strip_prefix("a/")
        .or_else(|| name.strip_prefix("b/"))
        .unwrap_or(name)
        .to_string()
}

/// Compare the SHA-256 of `bytes` against `expected`; `None` when they
/// match, the `HASH_MISMATCH` envelope otherwise.
fn check_hash(rel: &str, bytes: &[u8], expected: &str) -> Option<ToolResult> {
    let actual = hex_digest(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        None
    } else {
        Some(ToolResult::failure(
            "HASH_MISMATCH",
            format!("File '{rel}' has changed since the hash was computed. Re-read it and retry."),
        ))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(root: &Path, rel: &str, content: &str) {
        std::fs::write(root.join(rel), content).unwrap();
    }

    #[tokio::test]
    async fn neither_input_is_missing_input() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FilePatch::new(tmp.path());
        let result = tool.execute(&json!({})).await;
        assert_eq!(result.error_code.as_deref(), Some("MISSING_INPUT"));
    }

    #[tokio::test]
    async fn both_inputs_is_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FilePatch::new(tmp.path());
        let result = tool
            .execute(&json!({"diff_text": "x", "patches": []}))
            .await;
        assert_eq!(result.error_code.as_deref(), Some("AMBIGUOUS_INPUT"));
    }

    #[tokio::test]
    async fn structured_hunks_apply_in_reverse_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "f.txt", "one\ntwo\nthree\nfour\nfive\n");

        let tool = FilePatch::new(tmp.path());
        // Two hunks with line numbers valid against the ORIGINAL file;
        // reverse-order application must keep both valid.
        let result = tool
            .execute(&json!({"patches": [{
                "path": "f.txt",
                "hunks": [
                    {"start": 1, "end": 1, "replace_with": "ONE"},
                    {"start": 4, "end": 5, "replace_with": "FOUR+FIVE"},
                ],
            }]}))
            .await;
        assert!(result.ok, "{}", result.message);
        assert_eq!(result.data["applied"], true);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "ONE\ntwo\nthree\nFOUR+FIVE\n"
        );
    }

    #[tokio::test]
    async fn out_of_range_hunk_is_rejected_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "f.txt", "a\nb\n");

        let tool = FilePatch::new(tmp.path());
        let result = tool
            .execute(&json!({"patches": [{
                "path": "f.txt",
                "hunks": [
                    {"start": 1, "end": 1, "replace_with": "A"},
                    {"start": 10, "end": 12, "replace_with": "nope"},
                ],
            }]}))
            .await;
        assert!(result.ok);
        assert_eq!(result.data["rejected_hunks"].as_array().unwrap().len(), 1);
        assert!(!result.warnings.is_empty());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "A\nb\n"
        );
    }

    #[tokio::test]
    async fn hash_mismatch_rejects_whole_patch() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "f.txt", "current content\n");

        let tool = FilePatch::new(tmp.path());
        let stale = hex_digest(b"previous content\n");
        let result = tool
            .execute(&json!({
                "patches": [{"path": "f.txt", "hunks": [{"start": 1, "end": 1, "replace_with": "x"}]}],
                "file_hash": stale,
            }))
            .await;
        assert_eq!(result.error_code.as_deref(), Some("HASH_MISMATCH"));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "current content\n"
        );
    }

    #[tokio::test]
    async fn matching_hash_applies() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "f.txt", "keep\nswap\n");

        let tool = FilePatch::new(tmp.path());
        let current = hex_digest(b"keep\nswap\n");
        let result = tool
            .execute(&json!({
                "patches": [{"path": "f.txt", "hunks": [{"start": 2, "end": 2, "replace_with": "swapped"}]}],
                "file_hash": current,
            }))
            .await;
        assert!(result.ok);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "keep\nswapped\n"
        );
    }

    #[tokio::test]
    async fn unified_diff_applies_via_diffy() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "greet.txt", "hello\nworld\n");

        let diff = "\
--- a/greet.txt
+++ b/greet.txt
@@ -1,2 +1,2 @@
-hello
+goodbye
 world
";
        let tool = FilePatch::new(tmp.path());
        let result = tool.execute(&json!({"diff_text": diff})).await;
        assert!(result.ok, "{}", result.message);
        assert_eq!(result.data["files_changed"][0], "greet.txt");
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("greet.txt")).unwrap(),
            "goodbye\nworld\n"
        );
    }

    #[tokio::test]
    async fn unified_diff_conflict_is_patch_failed() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "greet.txt", "entirely different\n");

        let diff = "\
--- a/greet.txt
+++ b/greet.txt
@@ -1,2 +1,2 @@
-hello
+goodbye
 world
";
        let tool = FilePatch::new(tmp.path());
        let result = tool.execute(&json!({"diff_text": diff})).await;
        assert_eq!(result.error_code.as_deref(), Some("PATCH_FAILED"));
    }

    #[tokio::test]
    async fn structured_patch_outside_workspace_is_contained() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FilePatch::new(tmp.path());
        let result = tool
            .execute(&json!({"patches": [{
                "path": "../escape.txt",
                "hunks": [{"start": 1, "end": 1, "replace_with": "x"}],
            }]}))
            .await;
        assert_eq!(result.error_code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
    }

    #[test]
    fn strip_prefix_handles_both_sides() {
        assert_eq!(strip_diff_prefix("a/src/x.rs"), "src/x.rs");
        assert_eq!(strip_diff_prefix("b/src/x.rs"), "src/x.rs");
        assert_eq!(strip_diff_prefix("plain.txt"), "plain.txt");
    }
}
