//! Search tools: `glob` (find files by pattern) and `grep` (find text by
//! regex).
//!
//! `grep` has two backends: ripgrep when the `rg` binary is available (fast
//! path), and a pure-Rust regex walker otherwise. The envelope reports
//! `parser_used` so callers and tests can tell which ran. Both backends
//! produce the same match shape: `{file, line, text}` with 1-based line
//! numbers and workspace-relative paths.

use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use ignore::WalkBuilder;
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

/// Default cap on glob matches.
pub const DEFAULT_MAX_GLOB_RESULTS: u64 = 500;

/// Default cap on grep matches.
pub const DEFAULT_MAX_GREP_RESULTS: u64 = 200;

// ── Argument types ──────────────────────────────────────────────────

/// Typed arguments for `glob`.
#[derive(Deserialize, JsonSchema)]
pub struct GlobArgs {
    /// Glob pattern (e.g. 'src/**/*.rs', '*.toml').
    pub pattern: String,
    /// Directory to search from, relative to the workspace root.
    #[serde(default)]
    pub base_path: Option<String>,
    /// Include hidden files and directories. Default: false.
    #[serde(default)]
    pub include_hidden: Option<bool>,
    /// Maximum number of matches to return. Default: 500.
    #[serde(default)]
    pub max_results: Option<u64>,
}

/// Typed arguments for `grep`.
#[derive(Deserialize, JsonSchema)]
pub struct GrepArgs {
    /// Regular expression to search for.
    pub pattern: String,
    /// File or directory to search. Defaults to the workspace root.
    #[serde(default)]
    pub path: Option<String>,
    /// Limit the search to files matching this glob (e.g. '*.rs').
    #[serde(default)]
    pub glob: Option<String>,
    /// Case-sensitive search. Default: true.
    #[serde(default)]
    pub case_sensitive: Option<bool>,
    /// Maximum number of matching lines to return. Default: 200.
    #[serde(default)]
    pub max_results: Option<u64>,
    /// Lines of context before/after each match. Default: 0.
    #[serde(default)]
    pub context_lines: Option<u64>,
}

// ── Glob ────────────────────────────────────────────────────────────

/// Find files matching a glob pattern.
pub struct GlobTool {
    workspace_root: PathBuf,
}

impl GlobTool {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for GlobTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "glob",
            "Find files by glob pattern (e.g. 'src/**/*.rs'). Returns sorted \
             workspace-relative paths. Use grep to search file contents \
             instead of names.",
            json_schema_for::<GlobArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: GlobArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let base_rel = args.base_path.as_deref().unwrap_or(".");
            let base = match resolve_in_workspace(&root, base_rel) {
                Ok(p) => p,
                Err(e) => return e,
            };
            if !base.is_dir() {
                return ToolResult::failure(
                    "DIR_NOT_FOUND",
                    format!("Base path '{base_rel}' is not a directory."),
                );
            }

            let matcher = match GlobBuilder::new(&args.pattern).build() {
                Ok(g) => g.compile_matcher(),
                Err(e) => {
                    return ToolResult::failure(
                        "PARSE_ERROR",
                        format!("Invalid glob pattern '{}': {e}", args.pattern),
                    );
                }
            };

            let include_hidden = args.include_hidden.unwrap_or(false);
            let max_results = args.max_results.unwrap_or(DEFAULT_MAX_GLOB_RESULTS) as usize;

            let mut matches: Vec<String> = Vec::new();
            let walker = WalkBuilder::new(&base)
                .hidden(!include_hidden)
                .git_ignore(false)
                .git_global(false)
                .git_exclude(false)
                .ignore(false)
                .build();
            for entry in walker.flatten() {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&base)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                if matcher.is_match(&rel) {
                    matches.push(rel);
                }
            }

            matches.sort();
            let total = matches.len();
            let truncated = total > max_results;
            matches.truncate(max_results);

            let mut result = ToolResult::success(
                payload([
                    ("matches", json!(matches)),
                    ("total", json!(total)),
                    ("truncated", json!(truncated)),
                ]),
                format!("{total} file(s) match '{}'", args.pattern),
            );
            if truncated {
                result = result.with_warning(format!(
                    "Match list truncated to {max_results} of {total} entries."
                ));
            }
            result
        })
    }
}

// ── Grep ────────────────────────────────────────────────────────────

/// Regex search in file contents: ripgrep fast path, regex walker fallback.
pub struct GrepTool {
    workspace_root: PathBuf,
    rg_available: bool,
}

impl GrepTool {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            rg_available: which::which("rg").is_ok(),
        }
    }

    /// Force the pure-regex backend (used by tests and `--no-ripgrep`).
    pub fn without_ripgrep(mut self) -> Self {
        self.rg_available = false;
        self
    }
}

impl Tool for GrepTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "grep",
            "Search file contents with a regular expression. Returns matches \
             as {file, line, text} with 1-based line numbers. Use glob to \
             find files by name instead.",
            json_schema_for::<GrepArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let rg_available = self.rg_available;
        let args = args.clone();
        Box::pin(async move {
            let args: GrepArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let case_sensitive = args.case_sensitive.unwrap_or(true);

            // Compile client-side regardless of backend: a broken pattern is
            // INVALID_REGEX either way, and the fallback needs the regex.
            let regex = match RegexBuilder::new(&args.pattern)
                .case_insensitive(!case_sensitive)
                .build()
            {
                Ok(r) => r,
                Err(e) => {
                    return ToolResult::failure(
                        "INVALID_REGEX",
                        format!("Invalid regex '{}': {e}", args.pattern),
                    );
                }
            };

            let search_rel = args.path.as_deref().unwrap_or(".");
            let search_path = match resolve_in_workspace(&root, search_rel) {
                Ok(p) => p,
                Err(e) => return e,
            };
            if !search_path.exists() {
                return ToolResult::failure(
                    "NOT_FOUND",
                    format!("Search path '{search_rel}' does not exist."),
                );
            }

            let max_results = args.max_results.unwrap_or(DEFAULT_MAX_GREP_RESULTS) as usize;
            let context_lines = args.context_lines.unwrap_or(0) as usize;

            let (mut matches, parser_used) = if rg_available {
                match run_ripgrep(&args, case_sensitive, &search_path, max_results).await {
                    Ok(m) => (m, "ripgrep"),
                    // rg refused the pattern or crashed: the walker still works.
                    Err(_) => (
                        run_regex_walker(&regex, args.glob.as_deref(), &search_path, max_results),
                        "regex",
                    ),
                }
            } else {
                (
                    run_regex_walker(&regex, args.glob.as_deref(), &search_path, max_results),
                    "regex",
                )
            };

            let truncated = matches.len() > max_results;
            matches.truncate(max_results);

            if context_lines > 0 {
                attach_context(&search_path, &mut matches, context_lines).await;
            }

            // Report paths relative to the workspace root where possible.
            let root_canon = root.canonicalize().unwrap_or(root);
            let rendered: Vec<Value> = matches
                .iter()
                .map(|m| {
                    let file = Path::new(&m.file)
                        .strip_prefix(&root_canon)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_else(|_| m.file.clone());
                    let mut obj = json!({"file": file, "line": m.line, "text": m.text});
                    if let Some(ref ctx) = m.context {
                        obj["context"] = json!(ctx);
                    }
                    obj
                })
                .collect();

            let count = rendered.len();
            let mut result = ToolResult::success(
                payload([
                    ("matches", json!(rendered)),
                    ("truncated", json!(truncated)),
                    ("parser_used", json!(parser_used)),
                ]),
                format!("{count} match(es) for '{}'", args.pattern),
            );
            if truncated {
                result = result.with_warning(format!("Match list truncated to {max_results} lines."));
            }
            result
        })
    }
}

struct GrepMatch {
    file: String,
    line: u64,
    text: String,
    context: Option<String>,
}

/// Run ripgrep and parse `path:line:text` rows.
async fn run_ripgrep(
    args: &GrepArgs,
    case_sensitive: bool,
    search_path: &Path,
    max_results: usize,
) -> Result<Vec<GrepMatch>, String> {
    let mut cmd = Command::new("rg");
    cmd.args(["--line-number", "--with-filename", "--color=never", "--no-heading"]);
    // One extra row lets the caller detect truncation.
    cmd.arg(format!("--max-count={}", max_results + 1));
    if !case_sensitive {
        cmd.arg("-i");
    }
    if let Some(ref glob) = args.glob {
        cmd.args(["-g", glob]);
    }
    cmd.arg("--").arg(&args.pattern).arg(search_path);

    let output = cmd.output().await.map_err(|e| e.to_string())?;
    // rg exits 1 on "no matches" — not an error.
    if !output.status.success() && output.status.code() != Some(1) {
        return Err(String::from_utf8_lossy(&output.stderr).into_owned());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut matches = Vec::new();
    for row in stdout.lines() {
        // path:line:text — the path may contain ':' on Windows only, which
        // this parser does not attempt to handle.
        let mut parts = row.splitn(3, ':');
        let (Some(file), Some(line), Some(text)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(line) = line.parse::<u64>() else {
            continue;
        };
        matches.push(GrepMatch {
            file: file.to_string(),
            line,
            text: text.to_string(),
            context: None,
        });
    }
    Ok(matches)
}

/// Pure-Rust fallback: walk the tree and scan line by line.
fn run_regex_walker(
    regex: &regex::Regex,
    glob: Option<&str>,
    search_path: &Path,
    max_results: usize,
) -> Vec<GrepMatch> {
    let glob_matcher = glob.and_then(|g| {
        GlobBuilder::new(g)
            .build()
            .ok()
            .map(|g| g.compile_matcher())
    });

    let mut matches = Vec::new();
    let files: Vec<PathBuf> = if search_path.is_file() {
        vec![search_path.to_path_buf()]
    } else {
        WalkBuilder::new(search_path)
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .map(|e| e.into_path())
            .collect()
    };

    'outer: for file in files {
        if let Some(ref matcher) = glob_matcher {
            let rel = file.strip_prefix(search_path).unwrap_or(&file);
            let name_match = file
                .file_name()
                .is_some_and(|n| matcher.is_match(Path::new(n)));
            if !matcher.is_match(rel) && !name_match {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue; // binary or unreadable
        };
        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(GrepMatch {
                    file: file.to_string_lossy().to_string(),
                    line: (idx + 1) as u64,
                    text: line.to_string(),
                    context: None,
                });
                // One extra row lets the caller detect truncation.
                if matches.len() > max_results {
                    break 'outer;
                }
            }
        }
    }
    matches
}

/// Read surrounding lines for each match into its `context` field.
async fn attach_context(search_path: &Path, matches: &mut [GrepMatch], context_lines: usize) {
    for m in matches.iter_mut() {
        let path = Path::new(&m.file);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            search_path.join(path)
        };
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        let line_idx = (m.line as usize).saturating_sub(1);
        let start = line_idx.saturating_sub(context_lines);
        let end = (line_idx + context_lines + 1).min(lines.len());
        m.context = Some(lines[start..end].join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(p, content).unwrap();
    }

    #[tokio::test]
    async fn glob_matches_are_sorted_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/b.rs", "");
        write(tmp.path(), "src/a.rs", "");
        write(tmp.path(), "src/notes.md", "");

        let tool = GlobTool::new(tmp.path());
        let result = tool.execute(&json!({"pattern": "src/*.rs"})).await;
        assert!(result.ok);
        let matches: Vec<String> = serde_json::from_value(result.data["matches"].clone()).unwrap();
        assert_eq!(matches, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(result.data["truncated"], false);
    }

    #[tokio::test]
    async fn glob_caps_results_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write(tmp.path(), &format!("f{i}.txt"), "");
        }

        let tool = GlobTool::new(tmp.path());
        let result = tool
            .execute(&json!({"pattern": "*.txt", "max_results": 3}))
            .await;
        assert!(result.ok);
        assert_eq!(result.data["truncated"], true);
        assert_eq!(result.data["matches"].as_array().unwrap().len(), 3);
        assert!(!result.warnings.is_empty());
    }

    #[tokio::test]
    async fn glob_hidden_files_are_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ".config/settings.toml", "");
        write(tmp.path(), "visible.toml", "");

        let tool = GlobTool::new(tmp.path());
        let result = tool.execute(&json!({"pattern": "**/*.toml"})).await;
        let matches: Vec<String> = serde_json::from_value(result.data["matches"].clone()).unwrap();
        assert_eq!(matches, vec!["visible.toml"]);

        let result = tool
            .execute(&json!({"pattern": "**/*.toml", "include_hidden": true}))
            .await;
        let matches: Vec<String> = serde_json::from_value(result.data["matches"].clone()).unwrap();
        assert!(matches.contains(&".config/settings.toml".to_string()));
    }

    #[tokio::test]
    async fn glob_bad_pattern_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = GlobTool::new(tmp.path());
        let result = tool.execute(&json!({"pattern": "a[unclosed"})).await;
        assert_eq!(result.error_code.as_deref(), Some("PARSE_ERROR"));
    }

    #[tokio::test]
    async fn grep_walker_finds_matches_with_line_numbers() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.txt", "alpha\nneedle here\nomega\n");
        write(tmp.path(), "b.txt", "no hit\n");

        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool.execute(&json!({"pattern": "needle"})).await;
        assert!(result.ok);
        assert_eq!(result.data["parser_used"], "regex");
        let matches = result.data["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["file"], "a.txt");
        assert_eq!(matches[0]["line"], 2);
        assert_eq!(matches[0]["text"], "needle here");
    }

    #[tokio::test]
    async fn grep_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.txt", "Needle\n");

        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool
            .execute(&json!({"pattern": "needle", "case_sensitive": false}))
            .await;
        assert_eq!(result.data["matches"].as_array().unwrap().len(), 1);

        let result = tool.execute(&json!({"pattern": "needle"})).await;
        assert_eq!(result.data["matches"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn grep_glob_filter_restricts_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "x.rs", "target\n");
        write(tmp.path(), "x.md", "target\n");

        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool
            .execute(&json!({"pattern": "target", "glob": "*.rs"}))
            .await;
        let matches = result.data["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["file"], "x.rs");
    }

    #[tokio::test]
    async fn grep_invalid_regex() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool.execute(&json!({"pattern": "(unclosed"})).await;
        assert_eq!(result.error_code.as_deref(), Some("INVALID_REGEX"));
    }

    #[tokio::test]
    async fn grep_caps_results() {
        let tmp = tempfile::tempdir().unwrap();
        let body: String = (0..50).map(|i| format!("hit {i}\n")).collect();
        write(tmp.path(), "many.txt", &body);

        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool
            .execute(&json!({"pattern": "hit", "max_results": 10}))
            .await;
        assert_eq!(result.data["matches"].as_array().unwrap().len(), 10);
        assert_eq!(result.data["truncated"], true);
    }

    #[tokio::test]
    async fn grep_context_lines() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "ctx.txt", "before\nmatch me\nafter\n");

        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool
            .execute(&json!({"pattern": "match", "context_lines": 1}))
            .await;
        let matches = result.data["matches"].as_array().unwrap();
        let context = matches[0]["context"].as_str().unwrap();
        assert!(context.contains("before"));
        assert!(context.contains("after"));
    }

    #[tokio::test]
    async fn grep_missing_path() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = GrepTool::new(tmp.path()).without_ripgrep();
        let result = tool
            .execute(&json!({"pattern": "x", "path": "missing-dir"}))
            .await;
        assert_eq!(result.error_code.as_deref(), Some("NOT_FOUND"));
    }
}
