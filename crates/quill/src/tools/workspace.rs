//! Workspace-introspection tools: `workspace_info`, `dependencies_read`,
//! and `symbols_index`.
//!
//! `workspace_info` probes the environment once and caches the answer —
//! probing spawns half a dozen `--version` subprocesses, and the answer
//! does not change mid-session. `refresh=true` forces a re-probe.
//!
//! `symbols_index` is a cross-file symbol scan driven by per-language
//! regex patterns (Rust, Python, JavaScript/TypeScript). The envelope
//! reports `parser_used` so callers know which scanner interpreted the
//! source.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use ignore::WalkBuilder;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::guard::resolve_in_workspace;
use crate::tools::result::{ToolResult, payload};
use crate::tools::shell::run_shell;

// ── WorkspaceInfo ───────────────────────────────────────────────────

/// Typed arguments for `workspace_info`.
#[derive(Deserialize, JsonSchema)]
pub struct WorkspaceInfoArgs {
    /// Force a fresh probe instead of the cached result.
    #[serde(default)]
    pub refresh: Option<bool>,
}

/// One-time (cached) probe of OS, installed runtimes, and project kind.
pub struct WorkspaceInfo {
    workspace_root: PathBuf,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl WorkspaceInfo {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            cache: Mutex::new(None),
        }
    }
}

/// Binaries probed for availability and version.
const PROBED_RUNTIMES: &[&str] = &["git", "python3", "node", "cargo", "rg"];

async fn probe_workspace(root: &Path) -> Map<String, Value> {
    let mut runtimes = Map::new();
    for bin in PROBED_RUNTIMES {
        if which::which(bin).is_err() {
            continue;
        }
        let version = run_shell(&format!("{bin} --version"), root, Duration::from_secs(5))
            .await
            .ok()
            .map(|(_, stdout, _)| stdout.lines().next().unwrap_or("").trim().to_string())
            .filter(|v| !v.is_empty());
        runtimes.insert((*bin).to_string(), json!(version.unwrap_or_default()));
    }

    let mut project_kinds: Vec<&str> = Vec::new();
    if root.join("Cargo.toml").exists() {
        project_kinds.push("rust");
    }
    if root.join("pyproject.toml").exists() || root.join("setup.py").exists() {
        project_kinds.push("python");
    }
    if root.join("package.json").exists() {
        project_kinds.push("node");
    }

    let mut info = Map::new();
    info.insert("os".into(), json!(std::env::consts::OS));
    info.insert("arch".into(), json!(std::env::consts::ARCH));
    info.insert(
        "workspace_root".into(),
        json!(root.to_string_lossy().to_string()),
    );
    info.insert("project_kinds".into(), json!(project_kinds));
    info.insert("runtimes".into(), Value::Object(runtimes));
    info
}

impl Tool for WorkspaceInfo {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "workspace_info",
            "Report the OS, installed runtimes (git, python3, node, cargo, \
             rg), and detected project kind. Cached after the first call; \
             pass refresh=true to re-probe.",
            json_schema_for::<WorkspaceInfoArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let args = args.clone();
        Box::pin(async move {
            let args: WorkspaceInfoArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let refresh = args.refresh.unwrap_or(false);

            if !refresh
                && let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone()
            {
                let mut data = cached;
                data.insert("cached".into(), json!(true));
                return ToolResult::success(data, "Workspace info (cached)");
            }

            let mut info = probe_workspace(&self.workspace_root).await;
            *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(info.clone());
            info.insert("cached".into(), json!(false));
            ToolResult::success(info, "Workspace info")
        })
    }
}

// ── DependenciesRead ────────────────────────────────────────────────

/// Typed arguments for `dependencies_read`.
#[derive(Deserialize, JsonSchema)]
pub struct DependenciesReadArgs {
    /// Dependency file to parse. Defaults to the first of Cargo.toml,
    /// pyproject.toml, requirements.txt, package.json found in the root.
    #[serde(default)]
    pub path: Option<String>,
}

/// Parse the workspace's dependency manifest into a structured list.
pub struct DependenciesRead {
    workspace_root: PathBuf,
}

impl DependenciesRead {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

const KNOWN_DEPENDENCY_FILES: &[&str] = &[
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "package.json",
];

impl Tool for DependenciesRead {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "dependencies_read",
            "Parse the project's dependency manifest (Cargo.toml, \
             pyproject.toml, requirements.txt, or package.json) into a \
             structured dependency list.",
            json_schema_for::<DependenciesReadArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: DependenciesReadArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };

            let rel = match args.path {
                Some(p) => p,
                None => {
                    match KNOWN_DEPENDENCY_FILES
                        .iter()
                        .find(|f| root.join(f).exists())
                    {
                        Some(f) => (*f).to_string(),
                        None => {
                            return ToolResult::failure(
                                "NO_DEPENDENCY_FILE",
                                "No dependency file found (looked for Cargo.toml, \
                                 pyproject.toml, requirements.txt, package.json).",
                            );
                        }
                    }
                }
            };

            let full_path = match resolve_in_workspace(&root, &rel) {
                Ok(p) => p,
                Err(e) => return e,
            };
            let content = match tokio::fs::read_to_string(&full_path).await {
                Ok(c) => c,
                Err(_) => {
                    return ToolResult::failure(
                        "FILE_NOT_FOUND",
                        format!("Dependency file '{rel}' does not exist."),
                    );
                }
            };

            let file_name = full_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let parsed = match file_name.as_str() {
                "Cargo.toml" => parse_cargo_toml(&content),
                "pyproject.toml" => parse_pyproject(&content),
                "requirements.txt" => Ok(parse_requirements(&content)),
                "package.json" => parse_package_json(&content),
                other => {
                    return ToolResult::failure(
                        "UNSUPPORTED_FORMAT",
                        format!("'{other}' is not a recognised dependency file."),
                    );
                }
            };

            match parsed {
                Ok((format, deps, dev_deps)) => {
                    let message = format!(
                        "{} dependencies, {} dev dependencies from {rel}",
                        deps.len(),
                        dev_deps.len()
                    );
                    ToolResult::success(
                        payload([
                            ("file", json!(rel)),
                            ("format", json!(format)),
                            ("dependencies", json!(deps)),
                            ("dev_dependencies", json!(dev_deps)),
                        ]),
                        message,
                    )
                }
                Err(e) => ToolResult::failure("PARSE_ERROR", format!("Could not parse {rel}: {e}")),
            }
        })
    }
}

type DepList = Vec<Value>;

fn dep(name: &str, version: Option<&str>) -> Value {
    json!({"name": name, "version": version})
}

fn toml_table_deps(table: Option<&toml::Value>) -> DepList {
    let Some(toml::Value::Table(table)) = table else {
        return Vec::new();
    };
    table
        .iter()
        .map(|(name, spec)| match spec {
            toml::Value::String(v) => dep(name, Some(v)),
            toml::Value::Table(t) => dep(name, t.get("version").and_then(|v| v.as_str())),
            _ => dep(name, None),
        })
        .collect()
}

fn parse_cargo_toml(content: &str) -> Result<(&'static str, DepList, DepList), String> {
    let value: toml::Value = content.parse().map_err(|e| format!("{e}"))?;
    Ok((
        "cargo",
        toml_table_deps(value.get("dependencies")),
        toml_table_deps(value.get("dev-dependencies")),
    ))
}

fn parse_pyproject(content: &str) -> Result<(&'static str, DepList, DepList), String> {
    let value: toml::Value = content.parse().map_err(|e| format!("{e}"))?;
    let mut deps: DepList = Vec::new();
    if let Some(list) = value
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        for entry in list {
            if let Some(s) = entry.as_str() {
                deps.push(parse_requirement_line(s));
            }
        }
    }
    // Poetry projects keep dependencies under [tool.poetry.dependencies].
    let poetry = value
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"));
    deps.extend(toml_table_deps(poetry));
    Ok(("pyproject", deps, Vec::new()))
}

fn parse_requirements(content: &str) -> (&'static str, DepList, DepList) {
    let deps = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
        .map(parse_requirement_line)
        .collect();
    ("requirements", deps, Vec::new())
}

/// Split a pip requirement specifier (`name==1.2`, `name>=1.0`) in two.
fn parse_requirement_line(line: &str) -> Value {
    for op in ["==", ">=", "<=", "~=", "!=", ">", "<"] {
        if let Some((name, version)) = line.split_once(op) {
            return dep(name.trim(), Some(version.trim()));
        }
    }
    dep(line.trim(), None)
}

fn parse_package_json(content: &str) -> Result<(&'static str, DepList, DepList), String> {
    let value: Value = serde_json::from_str(content).map_err(|e| format!("{e}"))?;
    let section = |key: &str| -> DepList {
        value
            .get(key)
            .and_then(|d| d.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(name, v)| dep(name, v.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    };
    Ok(("npm", section("dependencies"), section("devDependencies")))
}

// ── SymbolsIndex ────────────────────────────────────────────────────

/// Typed arguments for `symbols_index`.
#[derive(Deserialize, JsonSchema)]
pub struct SymbolsIndexArgs {
    /// Symbol name (or name fragment) to search for, case-insensitive.
    pub query: String,
    /// Directory to search, relative to the workspace root.
    #[serde(default)]
    pub path: Option<String>,
    /// Restrict to one language: 'rust', 'python', or 'javascript'.
    #[serde(default)]
    pub language: Option<String>,
}

/// Cross-file symbol search with per-language regex scanners.
pub struct SymbolsIndex {
    workspace_root: PathBuf,
}

impl SymbolsIndex {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

/// Cap on returned symbols.
const MAX_SYMBOLS: usize = 200;

/// `(language, extensions, pattern)` — the pattern's first capture group is
/// the symbol kind keyword, the second is the symbol name.
fn language_scanners() -> Vec<(&'static str, Vec<&'static str>, Regex)> {
    vec![
        (
            "rust",
            vec!["rs"],
            Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?(fn|struct|enum|trait|mod|const|static|type)[ \t]+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        ),
        (
            "python",
            vec!["py"],
            Regex::new(r"(?m)^[ \t]*(def|class)[ \t]+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        ),
        (
            "javascript",
            vec!["js", "jsx", "ts", "tsx"],
            Regex::new(r"(?m)^[ \t]*(?:export[ \t]+)?(function|class|interface|const|let)[ \t]+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap(),
        ),
    ]
}

impl Tool for SymbolsIndex {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "symbols_index",
            "Search for symbol definitions (functions, types, classes) \
             across the workspace by name fragment. Covers Rust, Python, and \
             JavaScript/TypeScript sources.",
            json_schema_for::<SymbolsIndexArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: SymbolsIndexArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            if args.query.trim().is_empty() {
                return ToolResult::failure("EMPTY_QUERY", "query must not be empty.");
            }
            let search_rel = args.path.as_deref().unwrap_or(".");
            let base = match resolve_in_workspace(&root, search_rel) {
                Ok(p) => p,
                Err(e) => return e,
            };

            let query = args.query.to_lowercase();
            let scanners: Vec<_> = language_scanners()
                .into_iter()
                .filter(|(lang, _, _)| {
                    args.language
                        .as_deref()
                        .is_none_or(|want| want.eq_ignore_ascii_case(lang))
                })
                .collect();
            if scanners.is_empty() {
                return ToolResult::failure(
                    "UNSUPPORTED_FORMAT",
                    format!(
                        "Unknown language '{}'. Use 'rust', 'python', or 'javascript'.",
                        args.language.as_deref().unwrap_or("")
                    ),
                );
            }

            let mut symbols: Vec<Value> = Vec::new();
            let root_canon = root.canonicalize().unwrap_or_else(|_| root.clone());

            let walker = WalkBuilder::new(&base).build();
            'outer: for entry in walker.flatten() {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let path = entry.path();
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                let Some((lang, _, pattern)) =
                    scanners.iter().find(|(_, exts, _)| exts.contains(&ext.as_str()))
                else {
                    continue;
                };
                let Ok(content) = std::fs::read_to_string(path) else {
                    continue;
                };
                for caps in pattern.captures_iter(&content) {
                    let name = caps.get(2).map_or("", |m| m.as_str());
                    if !name.to_lowercase().contains(&query) {
                        continue;
                    }
                    let kind = caps.get(1).map_or("", |m| m.as_str());
                    let offset = caps.get(0).map_or(0, |m| m.start());
                    let line = content
                        .get(..offset)
                        .map_or(1, |head| head.lines().count() + 1);
                    let rel_file = path
                        .strip_prefix(&root_canon)
                        .unwrap_or(path)
                        .to_string_lossy()
                        .to_string();
                    symbols.push(json!({
                        "name": name,
                        "kind": kind,
                        "file": rel_file,
                        "line": line,
                        "language": lang,
                    }));
                    if symbols.len() > MAX_SYMBOLS {
                        break 'outer;
                    }
                }
            }

            let truncated = symbols.len() > MAX_SYMBOLS;
            symbols.truncate(MAX_SYMBOLS);
            let count = symbols.len();

            let mut result = ToolResult::success(
                payload([
                    ("symbols", json!(symbols)),
                    ("truncated", json!(truncated)),
                    ("parser_used", json!("regex")),
                ]),
                format!("{count} symbol(s) matching '{}'", args.query),
            );
            if truncated {
                result = result.with_warning(format!("Symbol list truncated at {MAX_SYMBOLS}."));
            }
            result
        })
    }
}
