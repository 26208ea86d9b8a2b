//! Terminal front end for the `quill` coding agent.
//!
//! Everything here is plumbing around the core: argument parsing, YAML
//! config, the REPL with slash commands, ANSI rendering, the append-only
//! session store, and skills listing. The agent loop, conversation store,
//! and tool layer live in the `quill` library crate.

pub mod config;
pub mod prompt;
pub mod render;
pub mod repl;
pub mod session;
pub mod skills;

pub use config::CliConfig;
pub use prompt::coding_system_prompt;
