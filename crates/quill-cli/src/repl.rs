//! The interactive REPL: user input, slash commands, turn execution, and
//! session persistence.

use std::io::BufRead;
use std::path::PathBuf;

use quill::agent::runner::Agent;
use quill::api::LlmClient;
use quill::{Message, MessageRole};

use crate::config::CliConfig;
use crate::render::TerminalRenderer;
use crate::session::SessionStore;
use crate::skills::list_skills;

/// Default context budget when the config does not set one.
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 128_000;

/// One todo entry managed by `/todo`.
struct TodoItem {
    text: String,
    done: bool,
}

/// REPL state wrapping the agent for one terminal session.
pub struct Repl {
    agent: Agent<LlmClient>,
    renderer: TerminalRenderer,
    store: SessionStore,
    session_id: Option<String>,
    /// Number of conversation messages already written to the transcript.
    persisted: usize,
    config: CliConfig,
    workspace_root: PathBuf,
    todos: Vec<TodoItem>,
    plan: Option<String>,
}

/// What the REPL should do after handling one input.
enum Flow {
    Continue,
    Exit,
}

impl Repl {
    pub fn new(
        agent: Agent<LlmClient>,
        store: SessionStore,
        config: CliConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            agent,
            renderer: TerminalRenderer::new(),
            store,
            session_id: None,
            persisted: 0,
            config,
            workspace_root,
            todos: Vec::new(),
            plan: None,
        }
    }

    /// Adopt an existing session (resume): transcript appends continue in
    /// the same file, and the already-replayed messages are not re-written.
    pub fn attach_session(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        self.persisted = self.agent.conversation().len();
    }

    /// Run the REPL until EOF, `exit`, or `/exit`.
    pub async fn run(&mut self) {
        self.renderer
            .print_info("quill — type a request, /help for commands, exit to quit.");

        loop {
            self.renderer.input_prompt();

            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => break, // Ctrl-D
                Ok(_) => {}
            }
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input == "exit" || input == "quit" {
                break;
            }

            let flow = if let Some(command) = input.strip_prefix('/') {
                self.handle_slash(command)
            } else {
                self.run_agent_turn(input).await;
                Flow::Continue
            };
            if matches!(flow, Flow::Exit) {
                break;
            }
        }

        // Session approvals do not outlive the session.
        self.agent.permissions_mut().clear();
    }

    /// One agent turn: key watcher armed for its duration, transcript
    /// persisted afterwards.
    async fn run_agent_turn(&mut self, input: &str) {
        let watcher = self.agent.interrupt().spawn_key_watcher();
        let _answer = self.agent.run_turn(input).await;
        drop(watcher);
        self.persist_new_messages();
    }

    /// Append any not-yet-persisted messages to the session transcript,
    /// creating the session on first use.
    fn persist_new_messages(&mut self) {
        if self.session_id.is_none() {
            let title_source = self
                .agent
                .conversation()
                .messages()
                .iter()
                .find(|m| m.role == MessageRole::User)
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            match self
                .store
                .create(self.agent.conversation().model(), &title_source)
            {
                Ok(meta) => self.session_id = Some(meta.id),
                Err(e) => {
                    self.renderer
                        .print_warning(&format!("Could not create session transcript: {e}"));
                    return;
                }
            }
        }
        let Some(ref id) = self.session_id else {
            return;
        };

        // Compaction may have shrunk the history since the last persist.
        let start = self.persisted.min(self.agent.conversation().len());
        let messages: Vec<Message> =
            self.agent.conversation().messages()[start..].to_vec();
        for message in &messages {
            if let Err(e) = self.store.append_message(id, message) {
                self.renderer
                    .print_warning(&format!("Could not persist session: {e}"));
                return;
            }
        }
        self.persisted = self.agent.conversation().len();
    }

    // ── Slash commands ─────────────────────────────────────────────

    fn handle_slash(&mut self, command: &str) -> Flow {
        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match name {
            "help" => self.cmd_help(),
            "clear" => {
                self.agent.conversation_mut().clear();
                self.persisted = self.persisted.min(self.agent.conversation().len());
                self.renderer.print_info("Conversation cleared.");
            }
            "compact" => {
                let budget = self
                    .config
                    .max_context_tokens
                    .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);
                self.agent.conversation_mut().truncate_if_needed(budget);
                let tokens = self.agent.conversation().token_count();
                self.renderer
                    .print_info(&format!("Compacted: ~{tokens} tokens in context."));
            }
            "sessions" => self.cmd_sessions(),
            "model" => {
                if rest.is_empty() {
                    self.renderer
                        .print_info(&format!("Current model: {}", self.agent.client().model()));
                } else {
                    self.agent.client_mut().set_model(rest);
                    self.agent.conversation_mut().set_model(rest);
                    self.renderer.print_info(&format!("Switched model to {rest}."));
                }
            }
            "init" => self.cmd_init(),
            "todo" => self.cmd_todo(rest),
            "plan" => self.cmd_plan(rest),
            "approve" => {
                self.agent.permissions_mut().set_auto_allow(true);
                self.renderer
                    .print_info("Approvals enabled for this session (destructive commands still prompt).");
            }
            "reject" => {
                let gate = self.agent.permissions_mut();
                gate.set_auto_allow(false);
                gate.clear();
                self.renderer
                    .print_info("Approvals revoked; every gated tool will prompt again.");
            }
            "auto-allow" => {
                let gate = self.agent.permissions_mut();
                let enabled = match rest {
                    "on" => true,
                    "off" => false,
                    _ => !gate.auto_allow(),
                };
                gate.set_auto_allow(enabled);
                self.renderer.print_info(&format!(
                    "auto-allow is {}.",
                    if enabled { "on" } else { "off" }
                ));
            }
            "workflow" => self.cmd_workflow(rest),
            "skills" => self.cmd_skills(),
            "exit" => return Flow::Exit,
            other => {
                self.renderer
                    .print_warning(&format!("Unknown command '/{other}'. Try /help."));
            }
        }
        Flow::Continue
    }

    fn cmd_help(&self) {
        self.renderer.print_info(
            "Commands:\n\
             /help                 show this help\n\
             /clear                drop history (keeps the system prompt)\n\
             /compact              compact history to the context budget\n\
             /sessions             list stored sessions\n\
             /model <name>         switch model (or show the current one)\n\
             /init                 write a QUILL.md project-instructions skeleton\n\
             /todo add|done|list   manage a session todo list\n\
             /plan [text|clear]    show, set, or clear the working plan\n\
             /approve              allow gated tools for this session\n\
             /reject               revoke approvals; prompt again\n\
             /auto-allow [on|off]  toggle approval prompts\n\
             /workflow list|show   browse workflow templates\n\
             /skills               list available skills\n\
             /exit                 quit (also: exit, quit, Ctrl-D)",
        );
    }

    fn cmd_sessions(&self) {
        let sessions = self.store.list();
        if sessions.is_empty() {
            self.renderer.print_info("No stored sessions.");
            return;
        }
        for meta in sessions {
            let short: String = meta.id.chars().take(8).collect();
            self.renderer
                .print_info(&format!("{short}  {}  {}", meta.created_at, meta.title));
        }
    }

    fn cmd_init(&self) {
        let path = self.workspace_root.join("QUILL.md");
        if path.exists() {
            self.renderer.print_info("QUILL.md already exists.");
            return;
        }
        let skeleton = "\
# Project instructions

Describe build commands, test commands, and conventions the agent should
follow in this workspace.

- Build:
- Test:
- Lint:
";
        match std::fs::write(&path, skeleton) {
            Ok(()) => self.renderer.print_info("Wrote QUILL.md."),
            Err(e) => self.renderer.print_error(&format!("could not write QUILL.md: {e}")),
        }
    }

    fn cmd_todo(&mut self, rest: &str) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let action = parts.next().unwrap_or("list");
        let arg = parts.next().unwrap_or("").trim();

        match action {
            "add" if !arg.is_empty() => {
                self.todos.push(TodoItem {
                    text: arg.to_string(),
                    done: false,
                });
            }
            "done" => {
                match arg.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= self.todos.len() => self.todos[n - 1].done = true,
                    _ => {
                        self.renderer.print_warning("Usage: /todo done <number>");
                        return;
                    }
                }
            }
            "list" | "" => {}
            _ => {
                self.renderer
                    .print_warning("Usage: /todo add <text> | done <n> | list");
                return;
            }
        }

        if self.todos.is_empty() {
            self.renderer.print_info("Todo list is empty.");
        } else {
            for (i, item) in self.todos.iter().enumerate() {
                let mark = if item.done { "[x]" } else { "[ ]" };
                self.renderer
                    .print_info(&format!("{}. {mark} {}", i + 1, item.text));
            }
        }
    }

    fn cmd_plan(&mut self, rest: &str) {
        match rest {
            "" => match self.plan {
                Some(ref plan) => self.renderer.print_info(&format!("Plan:\n{plan}")),
                None => self.renderer.print_info("No plan set. /plan <text> to set one."),
            },
            "clear" => {
                self.plan = None;
                self.renderer.print_info("Plan cleared.");
            }
            text => {
                self.plan = Some(text.to_string());
                self.renderer.print_info("Plan recorded.");
            }
        }
    }

    fn cmd_workflow(&self, rest: &str) {
        let dir = self
            .config
            .skills
            .clone()
            .unwrap_or_else(|| CliConfig::config_dir().join("skills"))
            .join("workflows");

        let mut parts = rest.splitn(2, char::is_whitespace);
        let action = parts.next().unwrap_or("list");
        let arg = parts.next().unwrap_or("").trim();

        match action {
            "show" if !arg.is_empty() => {
                let path = dir.join(format!("{arg}.md"));
                match std::fs::read_to_string(&path) {
                    Ok(content) => self.renderer.print_info(&content),
                    Err(_) => self
                        .renderer
                        .print_warning(&format!("No workflow '{arg}' in {}", dir.display())),
                }
            }
            _ => {
                let workflows = list_skills(&dir);
                if workflows.is_empty() {
                    self.renderer
                        .print_info(&format!("No workflows in {}.", dir.display()));
                } else {
                    for w in workflows {
                        self.renderer.print_info(&format!("{}  {}", w.name, w.summary));
                    }
                }
            }
        }
    }

    fn cmd_skills(&self) {
        let dir = self
            .config
            .skills
            .clone()
            .unwrap_or_else(|| CliConfig::config_dir().join("skills"));
        let skills = list_skills(&dir);
        if skills.is_empty() {
            self.renderer
                .print_info(&format!("No skills in {}.", dir.display()));
        } else {
            for skill in skills {
                self.renderer
                    .print_info(&format!("{}  {}", skill.name, skill.summary));
            }
        }
    }
}
