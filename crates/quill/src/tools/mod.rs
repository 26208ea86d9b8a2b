//! The tool layer: envelope, guard, trait, and the concrete tool set.
//!
//! Tools are registered explicitly by [`build_tools`] once at session
//! start — there is no import-time registration, and the returned
//! [`ToolSet`](core::ToolSet) is immutable thereafter. Every handler
//! returns the [`ToolResult`](result::ToolResult) envelope and is fronted
//! by the [`ToolGuard`](guard::ToolGuard).

pub mod core;
pub mod fs;
pub mod git;
pub mod guard;
pub mod patch;
pub mod quality;
pub mod result;
pub mod search;
pub mod shell;
pub mod state;
pub mod workspace;

use std::path::{Path, PathBuf};

use crate::tools::core::ToolSet;
use crate::tools::guard::Policy;

/// Build the full tool set for a workspace.
///
/// The workspace root is canonicalized once here and every tool gets the
/// canonical path, so containment checks agree across the guard and the
/// in-handler checks.
pub fn build_tools(workspace_root: &Path, policy: Policy, audit_log: Option<PathBuf>) -> ToolSet {
    let root = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());
    let state_store = state::new_state_store();

    ToolSet::new(&root, policy, audit_log)
        .with(fs::FileRead::new(&root))
        .with(fs::FileWrite::new(&root))
        .with(fs::FileEdit::new(&root))
        .with(fs::FileList::new(&root))
        .with(fs::FileMove::new(&root))
        .with(fs::FileDelete::new(&root))
        .with(patch::FilePatch::new(&root))
        .with(search::GlobTool::new(&root))
        .with(search::GrepTool::new(&root))
        .with(shell::Shell::new(&root))
        .with(shell::SafeShell::new(&root))
        .with(git::GitStatus::new(&root))
        .with(git::GitDiff::new(&root))
        .with(git::GitCommit::new(&root))
        .with(quality::RunTests::new(&root))
        .with(quality::RunLint::new(&root))
        .with(quality::Typecheck::new(&root))
        .with(workspace::WorkspaceInfo::new(&root))
        .with(workspace::DependenciesRead::new(&root))
        .with(workspace::SymbolsIndex::new(&root))
        .with(state::StateSet::new(state_store.clone()))
        .with(state::StateGet::new(state_store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_tools_registers_full_set() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = build_tools(tmp.path(), Policy::default(), None);
        assert_eq!(tools.len(), 22);

        let names: Vec<String> = tools
            .definitions()
            .iter()
            .map(|d| d.function.name.clone())
            .collect();
        for expected in [
            "file_read",
            "file_write",
            "file_edit",
            "file_list",
            "file_move",
            "file_delete",
            "file_patch",
            "glob",
            "grep",
            "shell",
            "safe_shell",
            "git_status",
            "git_diff",
            "git_commit",
            "run_tests",
            "run_lint",
            "typecheck",
            "workspace_info",
            "dependencies_read",
            "symbols_index",
            "state_set",
            "state_get",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn definitions_carry_object_schemas() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = build_tools(tmp.path(), Policy::default(), None);
        for def in tools.definitions() {
            assert_eq!(
                def.function.parameters["type"], "object",
                "{} schema is not an object",
                def.function.name
            );
        }
    }
}
