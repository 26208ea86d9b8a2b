//! Git tools: structured snapshots over the `git` binary.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`GitStatus`] | `git_status` | Branch plus staged/unstaged/untracked file lists |
//! | [`GitDiff`] | `git_diff` | Unified diff of the working tree or the index |
//! | [`GitCommit`] | `git_commit` | Stage (optionally) and commit, gated on `confirmed=true` |
//!
//! Everything shells out to `git` in the workspace root; there is no
//! in-process git implementation to keep in sync with the user's repo
//! state.

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::guard::resolve_in_workspace;
use crate::tools::result::{ToolResult, payload};

// ── Helper ──────────────────────────────────────────────────────────

/// Run a git command in the workspace root.
///
/// Failures to spawn are `EXEC_ERROR`; a "not a git repository" complaint
/// is `NOT_A_REPO`; any other non-zero exit is `GIT_ERROR` unless the
/// caller wants the raw triple to interpret itself.
async fn run_git(root: &Path, args: &[&str]) -> Result<(i32, String, String), ToolResult> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| ToolResult::failure("EXEC_ERROR", format!("Could not run git: {e}")))?;

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if code != 0 && stderr.to_lowercase().contains("not a git repository") {
        return Err(ToolResult::failure(
            "NOT_A_REPO",
            "The workspace is not a git repository.",
        ));
    }
    Ok((code, stdout, stderr))
}

/// Run a git command that must succeed; non-zero exit becomes `GIT_ERROR`.
async fn run_git_checked(root: &Path, args: &[&str]) -> Result<String, ToolResult> {
    let (code, stdout, stderr) = run_git(root, args).await?;
    if code != 0 {
        return Err(ToolResult::failure(
            "GIT_ERROR",
            format!("git {} failed: {}", args.first().unwrap_or(&"?"), stderr.trim()),
        ));
    }
    Ok(stdout)
}

// ── GitStatus ───────────────────────────────────────────────────────

/// Typed arguments for `git_status` (none).
#[derive(Deserialize, JsonSchema)]
pub struct GitStatusArgs {}

/// Structured working-tree status.
pub struct GitStatus {
    workspace_root: PathBuf,
}

impl GitStatus {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for GitStatus {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "git_status",
            "Show the working tree status: current branch plus staged, \
             unstaged, and untracked file lists. Use git_diff to see the \
             content of changes.",
            json_schema_for::<GitStatusArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let _ = args;
        Box::pin(async move {
            let branch = match run_git_checked(&root, &["rev-parse", "--abbrev-ref", "HEAD"]).await
            {
                Ok(out) => out.trim().to_string(),
                // A freshly-initialised repo has no HEAD yet; that is not an error.
                Err(e) if e.error_code.as_deref() == Some("NOT_A_REPO") => return e,
                Err(_) => String::from("(no commits yet)"),
            };

            let porcelain = match run_git_checked(&root, &["status", "--porcelain"]).await {
                Ok(out) => out,
                Err(e) => return e,
            };

            let mut staged: Vec<String> = Vec::new();
            let mut unstaged: Vec<String> = Vec::new();
            let mut untracked: Vec<String> = Vec::new();
            for line in porcelain.lines() {
                if line.len() < 4 {
                    continue;
                }
                let (index_flag, worktree_flag) = {
                    let mut chars = line.chars();
                    (chars.next().unwrap_or(' '), chars.next().unwrap_or(' '))
                };
                let file = line.get(3..).unwrap_or("").to_string();
                if index_flag == '?' {
                    untracked.push(file);
                    continue;
                }
                if index_flag != ' ' {
                    staged.push(file.clone());
                }
                if worktree_flag != ' ' {
                    unstaged.push(file);
                }
            }

            let clean = staged.is_empty() && unstaged.is_empty() && untracked.is_empty();
            ToolResult::success(
                payload([
                    ("branch", json!(branch)),
                    ("staged", json!(staged)),
                    ("unstaged", json!(unstaged)),
                    ("untracked", json!(untracked)),
                    ("clean", json!(clean)),
                ]),
                if clean {
                    format!("On branch {branch}, working tree clean")
                } else {
                    format!("On branch {branch}, working tree has changes")
                },
            )
        })
    }
}

// ── GitDiff ─────────────────────────────────────────────────────────

/// Typed arguments for `git_diff`.
#[derive(Deserialize, JsonSchema)]
pub struct GitDiffArgs {
    /// Show staged changes instead of unstaged.
    #[serde(default)]
    pub staged: Option<bool>,
    /// Limit the diff to a specific file or directory.
    #[serde(default)]
    pub path: Option<String>,
}

/// Unified diff of the working tree or the index.
pub struct GitDiff {
    workspace_root: PathBuf,
}

impl GitDiff {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for GitDiff {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "git_diff",
            "Show file changes as a unified diff — unstaged by default, the \
             index with staged=true. Use git_status when you only need the \
             list of changed files.",
            json_schema_for::<GitDiffArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: GitDiffArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };

            let mut cmd_args: Vec<String> = vec!["diff".into()];
            if args.staged.unwrap_or(false) {
                cmd_args.push("--staged".into());
            }
            if let Some(ref p) = args.path {
                if let Err(e) = resolve_in_workspace(&root, p) {
                    return e;
                }
                cmd_args.push("--".into());
                cmd_args.push(p.clone());
            }

            let refs: Vec<&str> = cmd_args.iter().map(String::as_str).collect();
            let diff = match run_git_checked(&root, &refs).await {
                Ok(out) => out,
                Err(e) => return e,
            };

            let files_changed = diff
                .lines()
                .filter(|l| l.starts_with("diff --git "))
                .count();
            ToolResult::success(
                payload([
                    ("diff", json!(diff)),
                    ("files_changed", json!(files_changed)),
                    ("staged", json!(args.staged.unwrap_or(false))),
                ]),
                format!("{files_changed} file(s) in diff"),
            )
        })
    }
}

// ── GitCommit ───────────────────────────────────────────────────────

/// Typed arguments for `git_commit`.
#[derive(Deserialize, JsonSchema)]
pub struct GitCommitArgs {
    /// Commit message.
    pub message: String,
    /// Must be true — the model is expected to confirm intent explicitly.
    #[serde(default)]
    pub confirmed: Option<bool>,
    /// Files to stage before committing. Omit to commit what is already staged.
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

/// Stage files (optionally) and create a commit.
pub struct GitCommit {
    workspace_root: PathBuf,
}

impl GitCommit {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for GitCommit {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "git_commit",
            "Create a git commit. Requires confirmed=true. Provide paths to \
             stage specific files first, or omit paths to commit whatever is \
             already staged. Refuses when nothing is staged. Do not commit \
             unless the user asked for it.",
            json_schema_for::<GitCommitArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: GitCommitArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };

            if !args.confirmed.unwrap_or(false) {
                return ToolResult::failure(
                    "CONFIRMATION_REQUIRED",
                    "Pass confirmed=true to create the commit.",
                );
            }
            if args.message.trim().is_empty() {
                return ToolResult::failure("INVALID_ARGS", "Commit message must not be empty.");
            }

            // Stage requested paths, each contained to the workspace.
            if let Some(ref paths) = args.paths
                && !paths.is_empty()
            {
                for p in paths {
                    if let Err(e) = resolve_in_workspace(&root, p) {
                        return e;
                    }
                }
                let mut add_args: Vec<&str> = vec!["add", "--"];
                add_args.extend(paths.iter().map(String::as_str));
                let (code, _, stderr) = match run_git(&root, &add_args).await {
                    Ok(t) => t,
                    Err(e) => return e,
                };
                if code != 0 {
                    return ToolResult::failure(
                        "GIT_ADD_FAILED",
                        format!("git add failed: {}", stderr.trim()),
                    );
                }
            }

            let staged = match run_git_checked(&root, &["diff", "--staged", "--name-only"]).await {
                Ok(out) => out,
                Err(e) => return e,
            };
            let files: Vec<String> = staged.lines().map(String::from).collect();
            if files.is_empty() {
                return ToolResult::failure(
                    "NOTHING_TO_COMMIT",
                    "Nothing is staged. Stage files first (or pass paths).",
                );
            }

            let (code, _, stderr) =
                match run_git(&root, &["commit", "-m", &args.message]).await {
                    Ok(t) => t,
                    Err(e) => return e,
                };
            if code != 0 {
                return ToolResult::failure(
                    "COMMIT_FAILED",
                    format!("git commit failed: {}", stderr.trim()),
                );
            }

            let hash = match run_git_checked(&root, &["rev-parse", "--short", "HEAD"]).await {
                Ok(out) => out.trim().to_string(),
                Err(e) => return e,
            };

            ToolResult::success(
                payload([("commit_hash", json!(hash)), ("files", json!(files))]),
                format!("Committed {} file(s) as {hash}", files.len()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    /// Initialise a git repo with identity configured, so commits work in CI.
    fn init_repo(root: &Path) {
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(root)
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
    }

    #[tokio::test]
    async fn status_outside_repo_is_not_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        // Guard against the temp dir living under some enclosing repo.
        std::fs::write(tmp.path().join(".git"), "gitdir: /nonexistent").unwrap();
        let tool = GitStatus::new(tmp.path());
        let result = tool.execute(&json!({})).await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn status_reports_untracked_and_staged() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("new.txt"), "x").unwrap();

        let tool = GitStatus::new(tmp.path());
        let result = tool.execute(&json!({})).await;
        assert!(result.ok, "{}", result.message);
        let untracked: Vec<String> =
            serde_json::from_value(result.data["untracked"].clone()).unwrap();
        assert!(untracked.contains(&"new.txt".to_string()));
        assert_eq!(result.data["clean"], false);
    }

    #[tokio::test]
    async fn commit_requires_confirmation() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let tool = GitCommit::new(tmp.path());
        let result = tool.execute(&json!({"message": "test"})).await;
        assert_eq!(result.error_code.as_deref(), Some("CONFIRMATION_REQUIRED"));
    }

    #[tokio::test]
    async fn commit_refuses_empty_stage() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let tool = GitCommit::new(tmp.path());
        let result = tool
            .execute(&json!({"message": "test", "confirmed": true}))
            .await;
        assert_eq!(result.error_code.as_deref(), Some("NOTHING_TO_COMMIT"));
    }

    #[tokio::test]
    async fn commit_stages_paths_and_returns_short_hash() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("a.txt"), "hello").unwrap();

        let tool = GitCommit::new(tmp.path());
        let result = tool
            .execute(&json!({
                "message": "add a.txt",
                "confirmed": true,
                "paths": ["a.txt"],
            }))
            .await;
        assert!(result.ok, "{}", result.message);
        let hash = result.data["commit_hash"].as_str().unwrap();
        assert!((4..=12).contains(&hash.len()));
        let files: Vec<String> = serde_json::from_value(result.data["files"].clone()).unwrap();
        assert_eq!(files, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn commit_rejects_paths_outside_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let tool = GitCommit::new(tmp.path());
        let result = tool
            .execute(&json!({
                "message": "x",
                "confirmed": true,
                "paths": ["../../etc/passwd"],
            }))
            .await;
        assert_eq!(result.error_code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
    }

    #[tokio::test]
    async fn diff_shows_unstaged_changes() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("f.txt"), "one\n").unwrap();
        let commit = GitCommit::new(tmp.path());
        commit
            .execute(&json!({"message": "init", "confirmed": true, "paths": ["f.txt"]}))
            .await;
        std::fs::write(tmp.path().join("f.txt"), "two\n").unwrap();

        let tool = GitDiff::new(tmp.path());
        let result = tool.execute(&json!({})).await;
        assert!(result.ok);
        assert_eq!(result.data["files_changed"], 1);
        assert!(result.data["diff"].as_str().unwrap().contains("-one"));
    }
}
