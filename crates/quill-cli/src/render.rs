//! Minimal ANSI rendering for the REPL, plus the stdin approval prompter.
//!
//! The library emits [`AgentEvent`]s; [`TerminalRenderer`] turns them into
//! terminal output: streamed text as it arrives, dim one-liners for tool
//! activity, red `error:` lines for failures, and yellow warnings.

use std::io::{BufRead, Write};

use quill::agent::events::{AgentEvent, EventHandler};
use quill::agent::permissions::{ApprovalRequest, Prompter};

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";

/// Renders agent events to stdout/stderr.
pub struct TerminalRenderer;

impl TerminalRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Print the REPL input prompt.
    pub fn input_prompt(&self) {
        print!("{CYAN}❯ {RESET}");
        let _ = std::io::stdout().flush();
    }

    pub fn print_info(&self, message: &str) {
        println!("{DIM}{message}{RESET}");
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{RED}error: {message}{RESET}");
    }

    pub fn print_warning(&self, message: &str) {
        eprintln!("{YELLOW}{message}{RESET}");
    }

    /// Multi-line diagnostics for LLM transport errors (server URL and
    /// remediation hints are already in the message).
    pub fn print_llm_error(&self, message: &str) {
        eprintln!("{RED}{message}{RESET}");
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for TerminalRenderer {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::TextDelta(delta) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ToolStarted { name, arguments } => {
                let preview: String = arguments.chars().take(100).collect();
                let ellipsis = if arguments.chars().count() > 100 { "…" } else { "" };
                println!("{DIM}→ {name}({preview}{ellipsis}){RESET}");
            }
            AgentEvent::ToolFinished { ok, message, .. } => {
                if *ok {
                    println!("{GREEN}  ✓{RESET} {DIM}{message}{RESET}");
                } else {
                    eprintln!("{RED}  error: {message}{RESET}");
                }
            }
            AgentEvent::Warning(message) => self.print_warning(message),
            AgentEvent::Info(message) => self.print_info(message),
            AgentEvent::TurnFinished => println!(),
        }
    }
}

// ── Approval prompting ─────────────────────────────────────────────

/// `[Y/n]` approval prompt on stdin. Empty input approves; EOF denies.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, request: &ApprovalRequest<'_>) -> Option<bool> {
        if request.destructive {
            eprintln!("{RED}{BOLD}⚠ WARNING: potentially destructive command!{RESET}");
        }
        println!("{DIM}Tool: {}{RESET}", request.tool_name);
        println!("{DIM}Parameters: {}{RESET}", request.args);
        print!("{CYAN}Allow {}?{RESET} [Y/n]: ", request.tool_name);
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None, // EOF
            Ok(_) => {
                let answer = line.trim().to_lowercase();
                Some(answer.is_empty() || answer == "y" || answer == "yes")
            }
        }
    }
}
