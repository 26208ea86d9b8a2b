//! Quality tools: `run_tests`, `run_lint`, `typecheck`.
//!
//! Each tool auto-detects the matching runner from the workspace (Cargo,
//! pytest, npm, ruff, mypy, tsc), executes it, and parses the output into a
//! structured result so the model can act on failures without re-parsing
//! free text. The envelope is `ok=true` even when tests fail — a red test
//! run is information, not a tool error. `parser_used` names the parser
//! that interpreted the output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args, truncate_text};
use crate::tools::result::{ToolResult, payload};
use crate::tools::shell::run_shell;

/// Default timeout for test runs, in seconds.
const TEST_TIMEOUT_SECS: u64 = 300;

/// Default timeout for lint runs, in seconds.
const LINT_TIMEOUT_SECS: u64 = 120;

/// Default timeout for typecheck runs, in seconds.
const TYPECHECK_TIMEOUT_SECS: u64 = 120;

/// Cap on raw output carried in the envelope.
const MAX_RAW_OUTPUT_CHARS: usize = 20_000;

// ── Argument types ──────────────────────────────────────────────────

/// Typed arguments shared by the quality tools.
#[derive(Deserialize, JsonSchema)]
pub struct QualityArgs {
    /// Explicit command to run instead of auto-detection.
    #[serde(default)]
    pub command: Option<String>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

// ── Workspace probing ───────────────────────────────────────────────

fn has(root: &Path, name: &str) -> bool {
    root.join(name).exists()
}

/// Pick the test runner for this workspace: `(command, parser_used)`.
fn detect_test_runner(root: &Path) -> Option<(String, &'static str)> {
    if has(root, "Cargo.toml") {
        return Some(("cargo test".into(), "cargo-test"));
    }
    if has(root, "pyproject.toml") || has(root, "pytest.ini") || has(root, "setup.py") {
        return Some(("pytest".into(), "pytest"));
    }
    if has(root, "package.json") {
        return Some(("npm test".into(), "npm"));
    }
    None
}

fn detect_linter(root: &Path) -> Option<(String, &'static str)> {
    if has(root, "Cargo.toml") {
        return Some(("cargo clippy --message-format short 2>&1".into(), "clippy"));
    }
    if has(root, "pyproject.toml") || has(root, "setup.py") {
        return Some(("ruff check .".into(), "ruff"));
    }
    if has(root, "package.json") {
        return Some(("npm run lint".into(), "npm"));
    }
    None
}

fn detect_typechecker(root: &Path) -> Option<(String, &'static str)> {
    if has(root, "Cargo.toml") {
        return Some(("cargo check --message-format short 2>&1".into(), "cargo-check"));
    }
    if has(root, "tsconfig.json") {
        return Some(("tsc --noEmit".into(), "tsc"));
    }
    if has(root, "pyproject.toml") || has(root, "setup.py") {
        return Some(("mypy .".into(), "mypy"));
    }
    None
}

// ── Output parsing ──────────────────────────────────────────────────

/// Parse test output into a list of failure descriptions.
fn parse_test_failures(parser: &str, output: &str) -> Vec<String> {
    match parser {
        "cargo-test" => output
            .lines()
            .filter(|l| l.trim_start().starts_with("test ") && l.ends_with("FAILED"))
            .map(|l| l.trim().to_string())
            .collect(),
        "pytest" => output
            .lines()
            .filter(|l| l.starts_with("FAILED ") || l.starts_with("ERROR "))
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract `(passed, failed)` counts where the runner reports them.
fn parse_test_counts(parser: &str, output: &str) -> (Option<u64>, Option<u64>) {
    let grab = |re: &str| {
        Regex::new(re)
            .ok()
            .and_then(|re| re.captures(output))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
    };
    match parser {
        // Sum across "test result:" lines would need accumulation; the last
        // summary line is enough for the model's purposes.
        "cargo-test" => (
            grab(r"test result:.*?(\d+) passed"),
            grab(r"test result:.*?\d+ passed; (\d+) failed"),
        ),
        "pytest" => (grab(r"(\d+) passed"), grab(r"(\d+) failed")),
        _ => (None, None),
    }
}

/// Parse lint/typecheck output into issue lines (capped).
fn parse_issue_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.contains("error") || l.contains("warning"))
        .map(|l| l.trim().to_string())
        .take(100)
        .collect()
}

// ── RunTests ────────────────────────────────────────────────────────

/// Execute the workspace's test suite and report structured results.
pub struct RunTests {
    workspace_root: PathBuf,
}

impl RunTests {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for RunTests {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "run_tests",
            "Run the project's test suite (auto-detected: cargo test, \
             pytest, or npm test; override with command). Returns pass/fail \
             state, failure list, and raw output.",
            json_schema_for::<QualityArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: QualityArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let (command, parser) = match args.command {
                Some(cmd) => (cmd, "generic"),
                None => match detect_test_runner(&root) {
                    Some(pair) => pair,
                    None => {
                        return ToolResult::failure(
                            "COMMAND_REQUIRED",
                            "No test runner detected in the workspace. Pass an explicit command.",
                        );
                    }
                },
            };
            let timeout = Duration::from_secs(args.timeout_sec.unwrap_or(TEST_TIMEOUT_SECS));

            let (code, stdout, stderr) = match run_shell(&command, &root, timeout).await {
                Ok(t) => t,
                Err(e) => return e,
            };
            let combined = format!("{stdout}{stderr}");
            let failures = parse_test_failures(parser, &combined);
            let (passed_count, failed_count) = parse_test_counts(parser, &combined);

            ToolResult::success(
                payload([
                    ("passed", json!(code == 0)),
                    ("failures", json!(failures)),
                    ("passed_count", json!(passed_count)),
                    ("failed_count", json!(failed_count)),
                    ("raw_output", json!(truncate_text(combined, MAX_RAW_OUTPUT_CHARS))),
                    ("parser_used", json!(parser)),
                    ("command", json!(command)),
                ]),
                if code == 0 {
                    "Tests passed".to_string()
                } else {
                    format!("Tests failed ({} failure(s) parsed)", failures.len())
                },
            )
        })
    }
}

// ── RunLint ─────────────────────────────────────────────────────────

/// Execute the workspace's linter and report structured results.
pub struct RunLint {
    workspace_root: PathBuf,
}

impl RunLint {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for RunLint {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "run_lint",
            "Run the project's linter (auto-detected: cargo clippy, ruff, or \
             npm run lint; override with command). Returns clean state, issue \
             lines, and raw output.",
            json_schema_for::<QualityArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: QualityArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let (command, parser) = match args.command {
                Some(cmd) => (cmd, "generic"),
                None => match detect_linter(&root) {
                    Some(pair) => pair,
                    None => {
                        return ToolResult::failure(
                            "COMMAND_REQUIRED",
                            "No linter detected in the workspace. Pass an explicit command.",
                        );
                    }
                },
            };
            let timeout = Duration::from_secs(args.timeout_sec.unwrap_or(LINT_TIMEOUT_SECS));

            let (code, stdout, stderr) = match run_shell(&command, &root, timeout).await {
                Ok(t) => t,
                Err(e) => return e,
            };
            let combined = format!("{stdout}{stderr}");
            let issues = parse_issue_lines(&combined);

            ToolResult::success(
                payload([
                    ("clean", json!(code == 0)),
                    ("issues", json!(issues)),
                    ("raw_output", json!(truncate_text(combined, MAX_RAW_OUTPUT_CHARS))),
                    ("parser_used", json!(parser)),
                    ("command", json!(command)),
                ]),
                if code == 0 {
                    "Lint clean".to_string()
                } else {
                    format!("Lint reported {} issue line(s)", issues.len())
                },
            )
        })
    }
}

// ── Typecheck ───────────────────────────────────────────────────────

/// Execute the workspace's type checker and report structured results.
pub struct Typecheck {
    workspace_root: PathBuf,
}

impl Typecheck {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for Typecheck {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "typecheck",
            "Type-check the project (auto-detected: cargo check, tsc, or \
             mypy; override with command). Returns clean state, issue lines, \
             and raw output.",
            json_schema_for::<QualityArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: QualityArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let (command, parser) = match args.command {
                Some(cmd) => (cmd, "generic"),
                None => match detect_typechecker(&root) {
                    Some(pair) => pair,
                    None => {
                        return ToolResult::failure(
                            "COMMAND_REQUIRED",
                            "No type checker detected in the workspace. Pass an explicit command.",
                        );
                    }
                },
            };
            let timeout =
                Duration::from_secs(args.timeout_sec.unwrap_or(TYPECHECK_TIMEOUT_SECS));

            let (code, stdout, stderr) = match run_shell(&command, &root, timeout).await {
                Ok(t) => t,
                Err(e) => return e,
            };
            let combined = format!("{stdout}{stderr}");
            let issues = parse_issue_lines(&combined);

            ToolResult::success(
                payload([
                    ("clean", json!(code == 0)),
                    ("issues", json!(issues)),
                    ("raw_output", json!(truncate_text(combined, MAX_RAW_OUTPUT_CHARS))),
                    ("parser_used", json!(parser)),
                    ("command", json!(command)),
                ]),
                if code == 0 {
                    "Typecheck clean".to_string()
                } else {
                    format!("Typecheck reported {} issue line(s)", issues.len())
                },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_cargo_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        assert_eq!(detect_test_runner(tmp.path()).unwrap().1, "cargo-test");
        assert_eq!(detect_linter(tmp.path()).unwrap().1, "clippy");
        assert_eq!(detect_typechecker(tmp.path()).unwrap().1, "cargo-check");
    }

    #[test]
    fn detects_python_project() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("pyproject.toml"), "[project]\nname = \"x\"\n").unwrap();
        assert_eq!(detect_test_runner(tmp.path()).unwrap().1, "pytest");
        assert_eq!(detect_linter(tmp.path()).unwrap().1, "ruff");
        assert_eq!(detect_typechecker(tmp.path()).unwrap().1, "mypy");
    }

    #[test]
    fn cargo_test_failures_parsed() {
        let output = "\
running 3 tests
test conversions::works ... ok
test parser::rejects_bad_input ... FAILED
test result: FAILED. 2 passed; 1 failed; 0 ignored
";
        let failures = parse_test_failures("cargo-test", output);
        assert_eq!(failures, vec!["test parser::rejects_bad_input ... FAILED"]);
        let (passed, failed) = parse_test_counts("cargo-test", output);
        assert_eq!(passed, Some(2));
        assert_eq!(failed, Some(1));
    }

    #[test]
    fn pytest_summary_parsed() {
        let output = "\
FAILED tests/test_x.py::test_one - AssertionError
==== 1 failed, 7 passed in 0.32s ====
";
        let failures = parse_test_failures("pytest", output);
        assert_eq!(failures.len(), 1);
        let (passed, failed) = parse_test_counts("pytest", output);
        assert_eq!(passed, Some(7));
        assert_eq!(failed, Some(1));
    }

    #[test]
    fn issue_lines_capped_and_filtered() {
        let output = "warning: unused variable `x`\nnote: irrelevant\nerror[E0308]: mismatched types\n";
        let issues = parse_issue_lines(output);
        assert_eq!(issues.len(), 2);
    }

    #[tokio::test]
    async fn no_runner_detected_requires_command() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = RunTests::new(tmp.path());
        let result = tool.execute(&json!({})).await;
        assert_eq!(result.error_code.as_deref(), Some("COMMAND_REQUIRED"));
    }

    #[tokio::test]
    async fn explicit_command_runs_with_generic_parser() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = RunTests::new(tmp.path());
        let result = tool.execute(&json!({"command": "true"})).await;
        assert!(result.ok);
        assert_eq!(result.data["passed"], true);
        assert_eq!(result.data["parser_used"], "generic");

        let result = tool.execute(&json!({"command": "false"})).await;
        assert!(result.ok);
        assert_eq!(result.data["passed"], false);
    }

    #[tokio::test]
    async fn lint_with_explicit_command_reports_issue_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = RunLint::new(tmp.path());
        let result = tool
            .execute(&json!({"command": "echo 'warning: something is off'; exit 1"}))
            .await;
        assert!(result.ok);
        assert_eq!(result.data["clean"], false);
        assert_eq!(result.data["issues"].as_array().unwrap().len(), 1);
    }
}
