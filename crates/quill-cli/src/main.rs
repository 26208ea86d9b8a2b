//! `quill` — interactive terminal coding agent.
//!
//! ```sh
//! quill                         # interactive session in the current repo
//! quill --model ollama/qwen3 --ollama qwen3
//! quill --resume latest         # continue the most recent session
//! quill skills                  # list available skills
//! ```
//!
//! Exit codes: 0 normal, 1 on config or connectivity failure.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use quill::agent::interrupt::InterruptController;
use quill::agent::permissions::PermissionGate;
use quill::agent::runner::{Agent, AgentConfig};
use quill::api::LlmClient;
use quill::conversation::Conversation;
use quill::tools::build_tools;
use quill::tools::guard::Policy;

use quill_cli::config::CliConfig;
use quill_cli::prompt::{coding_system_prompt, with_project_instructions};
use quill_cli::render::{StdinPrompter, TerminalRenderer};
use quill_cli::repl::{DEFAULT_MAX_CONTEXT_TOKENS, Repl};
use quill_cli::session::SessionStore;
use quill_cli::skills::list_skills;

/// Interactive, model-agnostic coding agent.
#[derive(Parser)]
#[command(name = "quill", version)]
struct Cli {
    /// Model identifier (overrides the config file).
    #[arg(long)]
    model: Option<String>,

    /// Chat-completions server base URL (http:// or https://).
    #[arg(long)]
    api_base: Option<String>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// Per-response output token cap.
    #[arg(long)]
    max_output_tokens: Option<u32>,

    /// Nucleus sampling parameter.
    #[arg(long)]
    top_p: Option<f32>,

    /// Resume a stored session: a session id, or "latest".
    #[arg(long)]
    resume: Option<String>,

    /// Use a specific session id (resumed if it exists, created otherwise).
    #[arg(long)]
    session: Option<String>,

    /// Shortcut for a local Ollama model: sets the model to ollama/<NAME>
    /// and defaults api_base to http://localhost:11434.
    #[arg(long, value_name = "NAME")]
    ollama: Option<String>,

    /// Config file path (default: ~/.quill/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (the default).
    Run,
    /// List available skills and exit.
    Skills,
}

/// Replay stored messages into a fresh conversation, preserving tool-call
/// records and tool-result pairing.
fn replay_into(conversation: &mut Conversation, replay: Vec<quill::Message>) {
    for message in replay {
        match (message.role, message.tool_calls) {
            (quill::MessageRole::Tool, _) => conversation.append_tool_result(
                message.tool_call_id.unwrap_or_default(),
                message.content.unwrap_or_default(),
            ),
            (quill::MessageRole::Assistant, Some(calls)) => {
                conversation.append_assistant_tool_calls(message.content, calls);
            }
            (role, _) => {
                conversation.append(role, message.content.unwrap_or_default());
            }
        }
    }
}

fn effective_config(cli: &Cli) -> Result<CliConfig, String> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(CliConfig::default_path);
    let mut config = CliConfig::load(&path)?;

    if let Some(ref name) = cli.ollama {
        config.select_ollama(name);
    }
    if let Some(ref model) = cli.model {
        config.model = model.clone();
    }
    if let Some(ref api_base) = cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = Some(temperature);
    }
    if let Some(max_output_tokens) = cli.max_output_tokens {
        config.max_output_tokens = Some(max_output_tokens);
    }
    if let Some(top_p) = cli.top_p {
        config.top_p = Some(top_p);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let renderer = TerminalRenderer::new();

    let config = match effective_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            renderer.print_error(&e);
            std::process::exit(1);
        }
    };

    if let Some(ref proxy) = config.https_proxy {
        // SAFETY: set before any worker threads read the environment.
        unsafe { std::env::set_var("HTTPS_PROXY", proxy) };
    }

    if matches!(cli.command, Some(Command::Skills)) {
        let dir = config
            .skills
            .clone()
            .unwrap_or_else(|| CliConfig::config_dir().join("skills"));
        for skill in list_skills(&dir) {
            println!("{}  {}", skill.name, skill.summary);
        }
        return;
    }

    // ── Client + connectivity ──
    let client = match LlmClient::new(config.llm_options()) {
        Ok(c) => c,
        Err(e) => {
            renderer.print_llm_error(&e.to_string());
            std::process::exit(1);
        }
    };
    if let Err(e) = client.verify_connection().await {
        renderer.print_llm_error(&e.to_string());
        std::process::exit(1);
    }

    // ── Workspace + tools ──
    let workspace_root = std::env::current_dir()
        .and_then(|p| p.canonicalize())
        .unwrap_or_else(|_| PathBuf::from("."));
    let audit_log = CliConfig::config_dir().join("audit.jsonl");
    let _ = std::fs::create_dir_all(CliConfig::config_dir());
    let tools = build_tools(&workspace_root, Policy::default(), Some(audit_log));

    // ── Conversation (optionally resumed) ──
    let system_prompt =
        with_project_instructions(coding_system_prompt(), &workspace_root);
    let mut conversation = Conversation::new(&system_prompt, &config.model);

    let store = match SessionStore::new(SessionStore::default_dir()) {
        Ok(s) => s,
        Err(e) => {
            renderer.print_error(&format!("cannot open session store: {e}"));
            std::process::exit(1);
        }
    };

    let mut attached_session: Option<String> = None;
    if let Some(ref resume) = cli.resume {
        let id = if resume.eq_ignore_ascii_case("latest") {
            match store.latest() {
                Some(meta) => meta.id,
                None => {
                    renderer.print_error("no sessions to resume");
                    std::process::exit(1);
                }
            }
        } else {
            resume.clone()
        };
        match store.load_for_resume(&id) {
            Ok((meta, replay)) => {
                let count = replay.len();
                replay_into(&mut conversation, replay);
                renderer.print_info(&format!(
                    "Resumed session {} ({count} messages): {}",
                    meta.id, meta.title
                ));
                attached_session = Some(meta.id);
            }
            Err(e) => {
                renderer.print_error(&e);
                std::process::exit(1);
            }
        }
    } else if let Some(ref id) = cli.session {
        match store.load_for_resume(id) {
            Ok((meta, replay)) => {
                replay_into(&mut conversation, replay);
                attached_session = Some(meta.id);
            }
            Err(_) => {
                if let Ok(meta) = store.create_with_id(id, &config.model, "") {
                    let _ = store.append_message(&meta.id, &conversation.messages()[0]);
                    attached_session = Some(meta.id);
                }
            }
        }
    }

    // ── Agent ──
    let interrupt = InterruptController::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                interrupt.interrupt();
            }
        });
    }

    let agent_config = AgentConfig {
        max_context_tokens: config
            .max_context_tokens
            .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS),
        ..Default::default()
    };
    let agent = Agent::new(client, conversation, tools)
        .with_permissions(PermissionGate::new(Box::new(StdinPrompter)))
        .with_event_handler(Box::new(TerminalRenderer::new()))
        .with_interrupt(interrupt)
        .with_config(agent_config);

    let mut repl = Repl::new(agent, store, config, workspace_root);
    if let Some(id) = attached_session {
        repl.attach_session(id);
    }
    repl.run().await;
}
