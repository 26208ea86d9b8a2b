//! Pre-execution approval with session memory.
//!
//! Three tools require approval before running: `file_write`, `file_edit`,
//! and `shell`. Approvals are remembered for the session under a short
//! *approval key* — the first command token for shell, the target's parent
//! directory for file writes/edits — so non-destructive repeats don't
//! re-prompt. Shell commands matching the destructive pattern set always
//! prompt with a heightened warning, even when the key was previously
//! approved and even under auto-allow.
//!
//! The prompt itself is delegated through [`Prompter`] so the library
//! stays free of terminal I/O; the CLI supplies a stdin implementation.
//! EOF at the prompt is a denial.

use std::collections::HashSet;
use std::path::Path;

use regex::RegexBuilder;
use serde_json::Value;

/// Tools gated on user approval.
pub const TOOLS_REQUIRING_APPROVAL: &[&str] = &["file_write", "file_edit", "shell"];

/// Shell patterns that always trigger the heightened-warning prompt.
/// Distinct from `safe_shell`'s deny-list: these warn, they do not block.
pub const DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+",
    r"rm\s+-r\s+",
    r"rmdir\s+/s\s+/q",
    r"del\s+/s\s+/q",
    r"rd\s+/s\s+/q",
    r"format\s+",
    r"mkfs",
    r"shred",
    r">\s*/dev/",
    r"dd\s+if=",
];

// ── Prompter ───────────────────────────────────────────────────────

/// An approval request shown to the user.
#[derive(Debug)]
pub struct ApprovalRequest<'a> {
    pub tool_name: &'a str,
    pub args: &'a Value,
    /// Heightened warning: the command matched a destructive pattern.
    pub destructive: bool,
}

/// Asks the user `[Y/n]`. `None` means EOF (treated as denial).
pub trait Prompter: Send + Sync {
    fn confirm(&self, request: &ApprovalRequest<'_>) -> Option<bool>;
}

/// Prompter that approves everything. Default for non-interactive/library
/// use where no terminal exists to ask at.
pub struct ApproveAll;

impl Prompter for ApproveAll {
    fn confirm(&self, _request: &ApprovalRequest<'_>) -> Option<bool> {
        Some(true)
    }
}

/// Prompter that denies everything.
pub struct DenyAll;

impl Prompter for DenyAll {
    fn confirm(&self, _request: &ApprovalRequest<'_>) -> Option<bool> {
        None
    }
}

// ── PermissionGate ─────────────────────────────────────────────────

/// Session-scoped approval state.
pub struct PermissionGate {
    prompter: Box<dyn Prompter>,
    approved: HashSet<String>,
    auto_allow: bool,
}

impl PermissionGate {
    /// A gate that prompts through the given prompter.
    pub fn new(prompter: Box<dyn Prompter>) -> Self {
        Self {
            prompter,
            approved: HashSet::new(),
            auto_allow: false,
        }
    }

    /// A gate that approves everything except destructive shell commands,
    /// which still prompt (and so are denied under a non-interactive
    /// prompter).
    pub fn allow_all() -> Self {
        let mut gate = Self::new(Box::new(ApproveAll));
        gate.auto_allow = true;
        gate
    }

    /// Toggle auto-allow (`/auto-allow on|off`). Destructive shell
    /// commands still prompt.
    pub fn set_auto_allow(&mut self, enabled: bool) {
        self.auto_allow = enabled;
    }

    pub fn auto_allow(&self) -> bool {
        self.auto_allow
    }

    /// Forget all session approvals (session end).
    pub fn clear(&mut self) {
        self.approved.clear();
    }

    /// Record an approval without prompting (the `/approve` command).
    pub fn approve(&mut self, tool_name: &str, args: &Value) {
        self.approved.insert(approval_key(tool_name, args));
    }

    /// Decide whether `tool_name(args)` may execute, prompting if needed.
    pub fn check_approval(&mut self, tool_name: &str, args: &Value) -> bool {
        if !TOOLS_REQUIRING_APPROVAL.contains(&tool_name) {
            return true;
        }

        // Destructive shell commands always prompt, regardless of session
        // memory or auto-allow.
        if tool_name == "shell" {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("");
            if is_destructive(command) {
                let request = ApprovalRequest {
                    tool_name,
                    args,
                    destructive: true,
                };
                return self.prompter.confirm(&request).unwrap_or(false);
            }
        }

        if self.auto_allow {
            return true;
        }

        let key = approval_key(tool_name, args);
        if self.approved.contains(&key) {
            return true;
        }

        let request = ApprovalRequest {
            tool_name,
            args,
            destructive: false,
        };
        match self.prompter.confirm(&request) {
            Some(true) => {
                self.approved.insert(key);
                true
            }
            Some(false) | None => false,
        }
    }
}

/// Whether a shell command matches the destructive pattern set.
pub fn is_destructive(command: &str) -> bool {
    DESTRUCTIVE_PATTERNS.iter().any(|pat| {
        RegexBuilder::new(pat)
            .case_insensitive(true)
            .build()
            .is_ok_and(|re| re.is_match(command))
    })
}

/// Derive the session-memory key for an approval.
///
/// Shell approvals generalise over the first command token; file writes
/// and edits over the target's parent directory; everything else shares a
/// per-tool constant.
pub fn approval_key(tool_name: &str, args: &Value) -> String {
    match tool_name {
        "shell" => {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("");
            match command.split_whitespace().next() {
                Some(first) => format!("shell:{first}"),
                None => "shell:unknown".to_string(),
            }
        }
        "file_write" | "file_edit" => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("");
            if path.is_empty() {
                format!("{tool_name}:default")
            } else {
                let parent = Path::new(path)
                    .parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                format!("{tool_name}:{parent}")
            }
        }
        _ => format!("{tool_name}:default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    use std::sync::Arc;

    /// Scripted prompter that records requests and replays canned answers.
    struct Scripted {
        answers: Mutex<Vec<Option<bool>>>,
        prompts: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl Scripted {
        fn new(answers: Vec<Option<bool>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn prompt_log(&self) -> Arc<Mutex<Vec<(String, bool)>>> {
            self.prompts.clone()
        }
    }

    impl Prompter for Scripted {
        fn confirm(&self, request: &ApprovalRequest<'_>) -> Option<bool> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.tool_name.to_string(), request.destructive));
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                None
            } else {
                answers.remove(0)
            }
        }
    }

    #[test]
    fn tools_outside_approval_set_pass() {
        let mut gate = PermissionGate::new(Box::new(DenyAll));
        assert!(gate.check_approval("file_read", &json!({"path": "x"})));
        assert!(gate.check_approval("grep", &json!({"pattern": "x"})));
    }

    #[test]
    fn approval_is_remembered_per_key() {
        let prompter = Box::new(Scripted::new(vec![Some(true)]));
        let mut gate = PermissionGate::new(prompter);

        assert!(gate.check_approval("shell", &json!({"command": "ls -la"})));
        // Same first token — no second prompt (Scripted would return None).
        assert!(gate.check_approval("shell", &json!({"command": "ls /tmp"})));
    }

    #[test]
    fn different_key_prompts_again() {
        let prompter = Box::new(Scripted::new(vec![Some(true), Some(false)]));
        let mut gate = PermissionGate::new(prompter);

        assert!(gate.check_approval("shell", &json!({"command": "ls"})));
        assert!(!gate.check_approval("shell", &json!({"command": "cargo build"})));
    }

    #[test]
    fn destructive_command_prompts_even_when_approved() {
        let prompter = Box::new(Scripted::new(vec![Some(false)]));
        let mut gate = PermissionGate::new(prompter);

        // Approve the `rm` key via a harmless command first.
        gate.approve("shell", &json!({"command": "rm notes.txt"}));
        // Destructive variant must still prompt — here the user says no.
        assert!(!gate.check_approval("shell", &json!({"command": "rm -rf build/"})));
    }

    #[test]
    fn destructive_prompt_carries_warning_flag() {
        let scripted = Scripted::new(vec![Some(true)]);
        let log = scripted.prompt_log();
        let mut gate = PermissionGate::new(Box::new(scripted));
        gate.check_approval("shell", &json!({"command": "dd if=/dev/zero of=disk"}));
        let prompts = log.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].1, "destructive flag not set");
    }

    #[test]
    fn eof_is_denial() {
        let mut gate = PermissionGate::new(Box::new(DenyAll));
        assert!(!gate.check_approval("file_write", &json!({"path": "a/b.txt", "content": ""})));
    }

    #[test]
    fn auto_allow_skips_prompt_but_not_destructive() {
        let mut gate = PermissionGate::new(Box::new(DenyAll));
        gate.set_auto_allow(true);
        assert!(gate.check_approval("file_write", &json!({"path": "x", "content": ""})));
        // Destructive still prompts; DenyAll answers EOF → denied.
        assert!(!gate.check_approval("shell", &json!({"command": "rm -rf /tmp/x"})));
    }

    #[test]
    fn clear_forgets_approvals() {
        let prompter = Box::new(Scripted::new(vec![Some(true)]));
        let mut gate = PermissionGate::new(prompter);
        assert!(gate.check_approval("shell", &json!({"command": "ls"})));
        gate.clear();
        // Prompter script exhausted → EOF → denied.
        assert!(!gate.check_approval("shell", &json!({"command": "ls"})));
    }

    #[test]
    fn key_derivation_shapes() {
        assert_eq!(
            approval_key("shell", &json!({"command": "git status"})),
            "shell:git"
        );
        assert_eq!(approval_key("shell", &json!({"command": ""})), "shell:unknown");
        assert_eq!(
            approval_key("file_write", &json!({"path": "src/deep/mod.rs"})),
            "file_write:src/deep"
        );
        assert_eq!(
            approval_key("file_edit", &json!({"path": "top.txt"})),
            "file_edit:"
        );
        assert_eq!(approval_key("git_commit", &json!({})), "git_commit:default");
    }

    #[test]
    fn destructive_patterns_match_expected_commands() {
        assert!(is_destructive("rm -rf /"));
        assert!(is_destructive("sudo rm -r ./build"));
        assert!(is_destructive("mkfs.ext4 /dev/sda1"));
        assert!(is_destructive("echo x > /dev/sda"));
        assert!(!is_destructive("rm notes.txt"));
        assert!(!is_destructive("cargo build"));
        assert!(!is_destructive("ls -la"));
    }
}
