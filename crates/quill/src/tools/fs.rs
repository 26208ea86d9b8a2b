//! Filesystem tools: read, write, edit, list, move, delete.
//!
//! All paths are workspace-relative unless absolute, and every resolved
//! path must stay inside the workspace root. The guard checks the `path`
//! argument; `file_move` checks its `src`/`dst` pair in-handler with the
//! same [`resolve_in_workspace`] helper.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`FileRead`] | `file_read` | Read a file with offset/limit paging |
//! | [`FileWrite`] | `file_write` | Create or overwrite a file |
//! | [`FileEdit`] | `file_edit` | Replace exactly one occurrence of a string |
//! | [`FileList`] | `file_list` | List a directory tree |
//! | [`FileMove`] | `file_move` | Move or rename a file |
//! | [`FileDelete`] | `file_delete` | Delete a file or directory |

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;

use crate::ToolDef;
use crate::json_schema_for;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::guard::resolve_in_workspace;
use crate::tools::result::{ToolResult, payload};

// ── Typed argument structs ──────────────────────────────────────────

/// Typed arguments for `file_read`.
#[derive(Deserialize, JsonSchema)]
pub struct FileReadArgs {
    /// File path relative to the workspace root (e.g. 'src/main.rs').
    pub path: String,
    /// Starting line index (0-based). Default: 0.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Maximum number of lines to return. Default: all lines.
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Typed arguments for `file_write`.
#[derive(Deserialize, JsonSchema)]
pub struct FileWriteArgs {
    /// File path relative to the workspace root.
    pub path: String,
    /// Full file content to write.
    pub content: String,
    /// Overwrite an existing file. Default: true.
    #[serde(default)]
    pub overwrite: Option<bool>,
}

/// Typed arguments for `file_edit`.
#[derive(Deserialize, JsonSchema)]
pub struct FileEditArgs {
    /// File path relative to the workspace root.
    pub path: String,
    /// Exact text to find. Must occur exactly once in the file.
    pub old_str: String,
    /// Replacement text.
    pub new_str: String,
}

/// Typed arguments for `file_list`.
#[derive(Deserialize, JsonSchema)]
pub struct FileListArgs {
    /// Directory path relative to the workspace root. Default: the root.
    #[serde(default)]
    pub path: Option<String>,
    /// Maximum directory depth to recurse into. Default: 2.
    #[serde(default)]
    pub depth: Option<u64>,
    /// Include hidden entries (dotfiles). Default: false.
    #[serde(default)]
    pub include_hidden: Option<bool>,
    /// Restrict to 'file' or 'dir' entries. Default: both.
    #[serde(default)]
    pub kind: Option<String>,
    /// Maximum number of entries to return. Default: 500.
    #[serde(default)]
    pub max_entries: Option<u64>,
}

/// Typed arguments for `file_move`.
#[derive(Deserialize, JsonSchema)]
pub struct FileMoveArgs {
    /// Source path relative to the workspace root.
    pub src: String,
    /// Destination path relative to the workspace root.
    pub dst: String,
    /// Overwrite the destination if it exists. Default: false.
    #[serde(default)]
    pub overwrite: Option<bool>,
}

/// Typed arguments for `file_delete`.
#[derive(Deserialize, JsonSchema)]
pub struct FileDeleteArgs {
    /// Path relative to the workspace root.
    pub path: String,
    /// Required true to delete a directory and its contents.
    #[serde(default)]
    pub recursive: Option<bool>,
}

// ── FileRead ────────────────────────────────────────────────────────

/// Read a file as UTF-8 (invalid bytes replaced), with optional paging.
pub struct FileRead {
    workspace_root: PathBuf,
}

impl FileRead {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for FileRead {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_read",
            "Read a file from the workspace. Returns the content plus line \
             accounting. For large files pass offset (0-based line index) and \
             limit to read a window.",
            json_schema_for::<FileReadArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FileReadArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let full_path = match resolve_in_workspace(&root, &args.path) {
                Ok(p) => p,
                Err(e) => return e,
            };

            match fs::metadata(&full_path).await {
                Ok(meta) if !meta.is_file() => {
                    return ToolResult::failure(
                        "NOT_A_FILE",
                        format!("'{}' is not a regular file.", args.path),
                    );
                }
                Ok(_) => {}
                Err(_) => {
                    return ToolResult::failure(
                        "FILE_NOT_FOUND",
                        format!("File '{}' does not exist.", args.path),
                    );
                }
            }

            let bytes = match fs::read(&full_path).await {
                Ok(b) => b,
                Err(e) => {
                    return ToolResult::failure(
                        "READ_ERROR",
                        format!("Could not read '{}': {e}", args.path),
                    );
                }
            };
            let content = String::from_utf8_lossy(&bytes).into_owned();

            let total_lines = content.lines().count() as u64;
            let offset = args.offset.unwrap_or(0);
            let limit = args.limit.unwrap_or(u64::MAX);

            let (window, returned_lines) = if offset == 0 && limit >= total_lines {
                (content.clone(), total_lines)
            } else {
                let selected: Vec<&str> = content
                    .lines()
                    .skip(offset as usize)
                    .take(limit.min(u64::from(u32::MAX)) as usize)
                    .collect();
                let count = selected.len() as u64;
                let mut text = selected.join("\n");
                if count > 0 {
                    text.push('\n');
                }
                (text, count)
            };

            ToolResult::success(
                payload([
                    ("content", json!(window)),
                    ("total_lines", json!(total_lines)),
                    ("returned_lines", json!(returned_lines)),
                    ("offset", json!(offset)),
                ]),
                format!("Read {returned_lines} of {total_lines} lines from {}", args.path),
            )
        })
    }
}

// ── FileWrite ───────────────────────────────────────────────────────

/// Create or overwrite a file, creating parent directories as needed.
pub struct FileWrite {
    workspace_root: PathBuf,
}

impl FileWrite {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for FileWrite {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_write",
            "Write content to a file in the workspace, creating parent \
             directories. Overwrites by default; pass overwrite=false to \
             refuse clobbering an existing file. Prefer file_edit or \
             file_patch for targeted changes to existing files.",
            json_schema_for::<FileWriteArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FileWriteArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let full_path = match resolve_in_workspace(&root, &args.path) {
                Ok(p) => p,
                Err(e) => return e,
            };

            let existed = fs::metadata(&full_path).await.is_ok();
            if existed && !args.overwrite.unwrap_or(true) {
                return ToolResult::failure(
                    "FILE_EXISTS",
                    format!("File '{}' already exists and overwrite=false.", args.path),
                );
            }

            if let Some(parent) = full_path.parent()
                && let Err(e) = fs::create_dir_all(parent).await
            {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not create directories for '{}': {e}", args.path),
                );
            }

            if let Err(e) = fs::write(&full_path, &args.content).await {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not write '{}': {e}", args.path),
                );
            }

            ToolResult::success(
                payload([
                    ("bytes_written", json!(args.content.len())),
                    ("created", json!(!existed)),
                    ("overwritten", json!(existed)),
                ]),
                format!(
                    "{} {} ({} bytes)",
                    if existed { "Overwrote" } else { "Created" },
                    args.path,
                    args.content.len(),
                ),
            )
        })
    }
}

// ── FileEdit ────────────────────────────────────────────────────────

/// Replace exactly one occurrence of `old_str` with `new_str`.
///
/// Zero occurrences is `MATCH_NOT_FOUND`; more than one is
/// `AMBIGUOUS_MATCH`. Either way the file is left untouched.
pub struct FileEdit {
    workspace_root: PathBuf,
}

impl FileEdit {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for FileEdit {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_edit",
            "Edit a file by replacing an exact string. old_str must occur \
             exactly once — include enough surrounding context to make it \
             unique. Prefer this over file_write for modifying existing \
             content.",
            json_schema_for::<FileEditArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FileEditArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let full_path = match resolve_in_workspace(&root, &args.path) {
                Ok(p) => p,
                Err(e) => return e,
            };

            let content = match fs::read_to_string(&full_path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return ToolResult::failure(
                        "FILE_NOT_FOUND",
                        format!("File '{}' does not exist.", args.path),
                    );
                }
                Err(e) => {
                    return ToolResult::failure(
                        "READ_ERROR",
                        format!("Could not read '{}': {e}", args.path),
                    );
                }
            };

            let count = content.matches(&args.old_str).count();
            if count == 0 {
                return ToolResult::failure(
                    "MATCH_NOT_FOUND",
                    format!(
                        "old_str not found in {}. Verify the exact text, including \
                         whitespace and indentation.",
                        args.path
                    ),
                );
            }
            if count > 1 {
                return ToolResult::failure(
                    "AMBIGUOUS_MATCH",
                    format!(
                        "old_str occurs {count} times in {}. Provide more surrounding \
                         context to make it unique.",
                        args.path
                    ),
                );
            }

            // Line number of the single match, for the confirmation message.
            let start_byte = content.find(&args.old_str).unwrap_or(0);
            let line = content
                .get(..start_byte)
                .map_or(1, |head| head.lines().count().max(1));

            let new_content = content.replacen(&args.old_str, &args.new_str, 1);
            if let Err(e) = fs::write(&full_path, &new_content).await {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not write '{}': {e}", args.path),
                );
            }

            ToolResult::success(
                payload([("replacements", json!(1)), ("line", json!(line))]),
                format!("Edited {}: replaced 1 occurrence (line {line})", args.path),
            )
        })
    }
}

// ── FileList ────────────────────────────────────────────────────────

/// List a directory tree with depth, hidden, and kind filters.
pub struct FileList {
    workspace_root: PathBuf,
}

impl FileList {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

const DEFAULT_LIST_DEPTH: u64 = 2;
const DEFAULT_LIST_MAX_ENTRIES: u64 = 500;

impl Tool for FileList {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_list",
            "List a directory tree. Directories are suffixed with '/'. \
             Hidden entries are skipped unless include_hidden=true; kind \
             restricts output to 'file' or 'dir' entries.",
            json_schema_for::<FileListArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FileListArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let rel = args.path.as_deref().unwrap_or(".");
            let full_path = match resolve_in_workspace(&root, rel) {
                Ok(p) => p,
                Err(e) => return e,
            };
            match fs::metadata(&full_path).await {
                Ok(meta) if meta.is_dir() => {}
                _ => {
                    return ToolResult::failure(
                        "DIR_NOT_FOUND",
                        format!("Directory '{rel}' does not exist."),
                    );
                }
            }

            let depth = args.depth.unwrap_or(DEFAULT_LIST_DEPTH) as usize;
            let include_hidden = args.include_hidden.unwrap_or(false);
            let max_entries = args.max_entries.unwrap_or(DEFAULT_LIST_MAX_ENTRIES) as usize;
            let kind = match args.kind.as_deref() {
                None | Some("all") => KindFilter::All,
                Some("file") | Some("files") => KindFilter::Files,
                Some("dir") | Some("dirs") => KindFilter::Dirs,
                Some(other) => {
                    return ToolResult::failure(
                        "INVALID_ARGS",
                        format!("Invalid kind '{other}'. Use 'file', 'dir', or 'all'."),
                    );
                }
            };

            let mut entries: Vec<String> = Vec::new();
            if let Err(e) =
                collect_entries(&full_path, depth, 0, include_hidden, kind, &mut entries).await
            {
                return ToolResult::failure("READ_ERROR", e);
            }

            let total = entries.len();
            let truncated = total > max_entries;
            entries.truncate(max_entries);

            let mut result = ToolResult::success(
                payload([
                    ("entries", json!(entries)),
                    ("total", json!(total)),
                    ("truncated", json!(truncated)),
                ]),
                format!("Listed {total} entries under {rel}"),
            );
            if truncated {
                result = result.with_warning(format!(
                    "Listing truncated to {max_entries} of {total} entries."
                ));
            }
            result
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum KindFilter {
    All,
    Files,
    Dirs,
}

/// Recursively collect indented tree entries, sorted per directory level.
async fn collect_entries(
    dir: &std::path::Path,
    max_depth: usize,
    current_depth: usize,
    include_hidden: bool,
    kind: KindFilter,
    out: &mut Vec<String>,
) -> Result<(), String> {
    let mut rd = fs::read_dir(dir)
        .await
        .map_err(|e| format!("cannot read directory: {e}"))?;

    let mut children: Vec<(String, bool)> = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| e.to_string())? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        children.push((name, is_dir));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    let indent = "  ".repeat(current_depth);
    for (name, is_dir) in &children {
        let keep = match kind {
            KindFilter::All => true,
            KindFilter::Files => !is_dir,
            KindFilter::Dirs => *is_dir,
        };
        if keep {
            let suffix = if *is_dir { "/" } else { "" };
            out.push(format!("{indent}{name}{suffix}"));
        }

        if *is_dir && current_depth + 1 < max_depth {
            let child = dir.join(name);
            // Best-effort: unreadable subdirectories are skipped.
            let _ = Box::pin(collect_entries(
                &child,
                max_depth,
                current_depth + 1,
                include_hidden,
                kind,
                out,
            ))
            .await;
        }
    }
    Ok(())
}

// ── FileMove ────────────────────────────────────────────────────────

/// Move or rename a file, creating destination parent directories.
///
/// Containment for `src` and `dst` is checked here — the guard only sees
/// `path` arguments.
pub struct FileMove {
    workspace_root: PathBuf,
}

impl FileMove {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for FileMove {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_move",
            "Move or rename a file inside the workspace. Creates parent \
             directories for the destination. Refuses to overwrite unless \
             overwrite=true.",
            json_schema_for::<FileMoveArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FileMoveArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let src = match resolve_in_workspace(&root, &args.src) {
                Ok(p) => p,
                Err(e) => return e,
            };
            let dst = match resolve_in_workspace(&root, &args.dst) {
                Ok(p) => p,
                Err(e) => return e,
            };

            if fs::metadata(&src).await.is_err() {
                return ToolResult::failure(
                    "FILE_NOT_FOUND",
                    format!("Source '{}' does not exist.", args.src),
                );
            }
            let dst_exists = fs::metadata(&dst).await.is_ok();
            if dst_exists && !args.overwrite.unwrap_or(false) {
                return ToolResult::failure(
                    "FILE_EXISTS",
                    format!("Destination '{}' already exists and overwrite=false.", args.dst),
                );
            }

            if let Some(parent) = dst.parent()
                && let Err(e) = fs::create_dir_all(parent).await
            {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not create directories for '{}': {e}", args.dst),
                );
            }

            if let Err(e) = fs::rename(&src, &dst).await {
                return ToolResult::failure(
                    "WRITE_ERROR",
                    format!("Could not move '{}' to '{}': {e}", args.src, args.dst),
                );
            }

            ToolResult::success(
                payload([
                    ("src", json!(args.src)),
                    ("dst", json!(args.dst)),
                    ("overwritten", json!(dst_exists)),
                ]),
                format!("Moved {} to {}", args.src, args.dst),
            )
        })
    }
}

// ── FileDelete ──────────────────────────────────────────────────────

/// Delete a file, or a directory when `recursive=true`.
pub struct FileDelete {
    workspace_root: PathBuf,
}

impl FileDelete {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Tool for FileDelete {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file_delete",
            "Delete a file from the workspace. Deleting a directory requires \
             recursive=true and removes its entire contents.",
            json_schema_for::<FileDeleteArgs>(),
        )
    }

    fn execute(&self, args: &Value) -> ToolFuture<'_> {
        let root = self.workspace_root.clone();
        let args = args.clone();
        Box::pin(async move {
            let args: FileDeleteArgs = match parse_tool_args(&args) {
                Ok(a) => a,
                Err(e) => return e,
            };
            let full_path = match resolve_in_workspace(&root, &args.path) {
                Ok(p) => p,
                Err(e) => return e,
            };

            let meta = match fs::metadata(&full_path).await {
                Ok(m) => m,
                Err(_) => {
                    return ToolResult::failure(
                        "FILE_NOT_FOUND",
                        format!("Path '{}' does not exist.", args.path),
                    );
                }
            };

            let was_dir = meta.is_dir();
            if was_dir && !args.recursive.unwrap_or(false) {
                return ToolResult::failure(
                    "RECURSIVE_REQUIRED",
                    format!(
                        "'{}' is a directory. Pass recursive=true to delete it and \
                         its contents.",
                        args.path
                    ),
                );
            }

            let outcome = if was_dir {
                fs::remove_dir_all(&full_path).await
            } else {
                fs::remove_file(&full_path).await
            };
            if let Err(e) = outcome {
                return ToolResult::failure(
                    "DELETE_ERROR",
                    format!("Could not delete '{}': {e}", args.path),
                );
            }

            ToolResult::success(
                payload([("deleted", json!(args.path)), ("was_dir", json!(was_dir))]),
                format!(
                    "Deleted {} {}",
                    if was_dir { "directory" } else { "file" },
                    args.path
                ),
            )
        })
    }
}
