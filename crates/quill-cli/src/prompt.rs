//! The coding-agent system prompt.

/// System prompt for interactive coding sessions.
///
/// Kept deliberately short: tool descriptions carry the per-tool guidance,
/// and project-specific instructions are appended from `QUILL.md` when the
/// workspace has one.
pub fn coding_system_prompt() -> String {
    "\
You are a coding agent working inside the user's source-code workspace.

You have tools to read, search, edit, and create files, run shell commands, \
inspect git state, and run tests, linters, and type checkers. Use them; do \
not guess at file contents or command output.

Guidelines:
- Read before you edit. Make minimal, focused changes.
- Prefer file_edit and file_patch over rewriting whole files.
- Prefer safe_shell for routine commands; raw shell prompts the user.
- After making changes, verify them: run the tests or the type checker.
- Never run destructive commands without being asked to.
- When you are done, reply with a concise summary of what you did.\
"
    .to_string()
}

/// Append project instructions from `QUILL.md` when the workspace has one.
pub fn with_project_instructions(base: String, workspace_root: &std::path::Path) -> String {
    let path = workspace_root.join("QUILL.md");
    match std::fs::read_to_string(&path) {
        Ok(instructions) if !instructions.trim().is_empty() => {
            format!("{base}\n\n# Project instructions\n\n{}", instructions.trim())
        }
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_the_tooling_contract() {
        let prompt = coding_system_prompt();
        assert!(prompt.contains("safe_shell"));
        assert!(prompt.contains("file_edit"));
    }

    #[test]
    fn project_instructions_are_appended_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("QUILL.md"), "Always use tabs.").unwrap();
        let prompt = with_project_instructions("base".into(), tmp.path());
        assert!(prompt.starts_with("base"));
        assert!(prompt.contains("Always use tabs."));
    }

    #[test]
    fn missing_project_file_leaves_prompt_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let prompt = with_project_instructions("base".into(), tmp.path());
        assert_eq!(prompt, "base");
    }
}
