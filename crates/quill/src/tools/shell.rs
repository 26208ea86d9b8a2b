//! Shell tools: raw `shell` and pattern-guarded `safe_shell`.
//!
//! `shell` runs anything (the permission system prompts before it does);
//! `safe_shell` evaluates a deny-list first, then an allow-list, and only
//! then executes. Blocked commands are *successful* results carrying
//! `{blocked: true, reason, matched_pattern, suggested_safe_alternative}`
//! so the model can route around them instead of retrying blindly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::guard::resolve_in_workspace;
use crate::tools::result::{ToolResult, payload};

/// Default timeout for shell commands, in seconds.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 60;

/// Deny patterns for `safe_shell` (case-insensitive regexes, checked first).
pub const DEFAULT_DENYLIST: &[&str] = &[
    r"rm\s+-rf",
    r"rm\s+--no-preserve-root",
    r"del\s+/s",
    r"\bshutdown\b",
    r"\breboot\b",
    r"\bmkfs\b",
    r"format\s+[A-Za-z]:",
    r"curl\s+.*\|\s*(bash|sh|zsh)",
    r"wget\s+.*\|\s*(bash|sh|zsh)",
    r">\s*/etc/",
    r">\s*/bin/",
    r">\s*/usr/",
];

/// Allow patterns for `safe_shell`: common dev commands (tests, linters,
/// git read operations, package-manager installs, text utilities).
pub const DEFAULT_ALLOWLIST: &[&str] = &[
    r"^ls(\s|$)",
    r"^cat\s",
    r"^echo\s",
    r"^pwd$",
    r"^env$",
    r"^which\s",
    r"^find\s",
    r"^head\s",
    r"^tail\s",
    r"^wc\s",
    r"^sort\s",
    r"^uniq\s",
    r"^grep\s",
    r"^rg\s",
    r"^git\s+(status|log|diff|show|branch|remote|fetch|pull)",
    r"^make\s",
    r"^cargo\s+(build|test|check|clippy|fmt)",
    r"^go\s+(build|test|vet|fmt)",
    r"^python3?\s",
    r"^python\s+-m\s+pytest",
    r"^pytest",
    r"^pip3?\s+install",
    r"^npm\s+test",
    r"^npm\s+run\s+\w+",
    r"^npm\s+install",
    r"^tsc\b",
    r"^mypy\s",
    r"^pyright\s",
    r"^ruff\s+(check|format)",
];

// ── Argument types ──────────────────────────────────────────────────

/// Typed arguments for `shell` and `safe_shell`.
#[derive(Deserialize, JsonSchema)]
pub struct ShellArgs {
    /// Shell command to execute.
    pub command: String,
    /// Working directory, relative to the workspace root. Defaults to the root.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Timeout in seconds. Default: 60.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

// ── Execution helper ────────────────────────────────────────────────

/// Run `command` through `sh -c` in `cwd`, returning (exit_code, stdout,
/// stderr). Spawn failures surface as an `EXEC_ERROR` envelope; expiry of
/// `timeout` as `TIMEOUT`.
pub(crate) async fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
) -> Result<(i32, String, String), ToolResult> {
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, spawned).await {
        Err(_) => Err(ToolResult::failure(
            "TIMEOUT",
            format!("Command timed out after {}s", timeout.as_secs()),
        )),
        Ok(Err(e)) => Err(ToolResult::failure(
            "EXEC_ERROR",
            format!("Could not run command: {e}"),
        )),
        Ok(Ok(output)) => Ok((
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )),
    }
}

/// Resolve the `cwd` argument against the workspace root.
fn resolve_cwd(root: &Path, cwd: Option<&str>) -> Result<PathBuf, ToolResult> {
    let Some(raw) = cwd else {
        return Ok(root.to_path_buf());
    };
    let resolved = resolve_in_workspace(root, raw)?;
    if !resolved.is_dir() {
        return Err(ToolResult::failure(
            "CWD_NOT_FOUND",
            format!("Working directory '{raw}' does not exist."),
        ));
    }
    Ok(resolved)
}

fn exec_payload(exit_code: i32, stdout: String, stderr: String) -> ToolResult {
    let success = exit_code == 0;
    let mut result = ToolResult::success(
        payload([
            ("exit_code", json!(exit_code)),
            ("stdout", json!(stdout)),
            ("stderr", json!(stderr)),
            ("success", json!(success)),
        ]),
        format!("Exit code {exit_code}"),
    );
    if !success {
        result = result.with_warning(format!("Command exited with non-zero code {exit_code}"));
    }
    result
}

// ── Shell ───────────────────────────────────────────────────────────

/// Execute a shell command in the workspace. No pattern guards — the
/// permission system is the gate for this tool.
pub struct Shell {
    workspace_root: PathBuf,
}

impl Shell {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for Shell {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "shell",
            "Execute a shell command and return exit code, stdout, and \
             stderr. Prefer safe_shell for routine commands; use shell only \
             when safe_shell blocks something you genuinely need.",
            json_schema_for::<ShellArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: ShellArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let cwd = match resolve_cwd(&root, args.cwd.as_deref()) {
                Ok(p) => p,
                Err(e) => return e,
            };
            let timeout =
                Duration::from_secs(args.timeout_sec.unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS));

            match run_shell(&args.command, &cwd, timeout).await {
                Ok((code, stdout, stderr)) => exec_payload(code, stdout, stderr),
                Err(e) => e,
            }
        })
    }
}

// ── SafeShell ───────────────────────────────────────────────────────

/// Execute a shell command after deny-list and allow-list evaluation.
///
/// Deny patterns are evaluated first; a match returns `ok=true` with
/// `blocked=true` and a suggested safe alternative. Commands matching no
/// allow pattern are blocked the same way. Only allowed commands execute.
pub struct SafeShell {
    workspace_root: PathBuf,
    denylist: Vec<String>,
    allowlist: Vec<String>,
}

impl SafeShell {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            denylist: DEFAULT_DENYLIST.iter().map(|s| (*s).to_string()).collect(),
            allowlist: DEFAULT_ALLOWLIST.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Replace the deny-list (builder style).
    pub fn denylist(mut self, patterns: Vec<String>) -> Self {
        self.denylist = patterns;
        self
    }

    /// Replace the allow-list (builder style).
    pub fn allowlist(mut self, patterns: Vec<String>) -> Self {
        self.allowlist = patterns;
        self
    }
}

/// First pattern in `patterns` matching `command`, case-insensitively.
fn match_pattern<'a>(command: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns.iter().map(String::as_str).find(|pat| {
        RegexBuilder::new(pat)
            .case_insensitive(true)
            .build()
            .is_ok_and(|re| re.is_match(command))
    })
}

/// A safe alternative suggestion for a matched deny pattern.
fn suggest_alternative(matched_pattern: &str) -> String {
    const SUGGESTIONS: &[(&str, &str)] = &[
        (
            "rm",
            "Use file_delete with recursive=true for a safe, logged deletion.",
        ),
        (
            "shutdown|reboot",
            "This is a system-level command; it cannot be run from the agent.",
        ),
        ("mkfs|format", "Disk formatting is not permitted from the agent."),
        (
            "curl|wget",
            "Download the script first, inspect it, then run it explicitly.",
        ),
        (
            "/etc/|/bin/|/usr/",
            "Writing to system directories is not permitted.",
        ),
    ];
    for (key, suggestion) in SUGGESTIONS {
        if RegexBuilder::new(key)
            .case_insensitive(true)
            .build()
            .is_ok_and(|re| re.is_match(matched_pattern))
        {
            return (*suggestion).to_string();
        }
    }
    "Consider using a more specific, purpose-built tool (file_delete, git_commit, run_tests, …)."
        .to_string()
}

fn blocked_result(reason: &str, matched_pattern: &str, suggestion: String) -> ToolResult {
    ToolResult::success(
        payload([
            ("blocked", json!(true)),
            ("reason", json!(reason)),
            ("matched_pattern", json!(matched_pattern)),
            ("suggested_safe_alternative", json!(suggestion)),
        ]),
        format!("Blocked: {reason}"),
    )
    .with_warning(reason.to_string())
}

impl Tool for SafeShell {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "safe_shell",
            "Execute a shell command after checking it against an allow-list \
             and deny-list. This is the PREFERRED shell tool — use raw shell \
             only for commands not covered here. Blocked commands return a \
             structured reason and a suggested safe alternative.",
            json_schema_for::<ShellArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let denylist = self.denylist.clone();
        let allowlist = self.allowlist.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: ShellArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };

            // Deny-list first: a deny match wins even if an allow pattern
            // would also match.
            if let Some(pat) = match_pattern(&args.command, &denylist) {
                return blocked_result(
                    "Command matched denylist pattern.",
                    pat,
                    suggest_alternative(pat),
                );
            }
            if match_pattern(&args.command, &allowlist).is_none() {
                return blocked_result(
                    "Command not in allowlist.",
                    "",
                    "If this command is safe, run it through the raw shell tool explicitly."
                        .to_string(),
                );
            }

            let cwd = match resolve_cwd(&root, args.cwd.as_deref()) {
                Ok(p) => p,
                Err(e) => return e,
            };
            let timeout =
                Duration::from_secs(args.timeout_sec.unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS));

            match run_shell(&args.command, &cwd, timeout).await {
                Ok((code, stdout, stderr)) => {
                    let mut result = exec_payload(code, stdout, stderr);
                    result.data.insert("blocked".into(), json!(false));
                    result
                }
                Err(e) => e,
            }
        })
    }
}
