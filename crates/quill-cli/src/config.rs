//! YAML configuration with CLI-flag overrides.
//!
//! The config file lives at `~/.quill/config.yaml`. Flags override file
//! values; Ollama models get a default `api_base` of
//! `http://localhost:11434`. Config-load failures are fatal at startup —
//! the only errors in the program that are.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default `api_base` for Ollama models.
pub const OLLAMA_DEFAULT_API_BASE: &str = "http://localhost:11434";

/// On-disk and effective configuration.
///
/// Missing keys fall back to the defaults below, so a partial config file
/// (say, only `api_base`) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Model identifier (e.g. `anthropic/claude-sonnet-4`, `ollama/qwen3`).
    pub model: String,
    /// Chat-completions server base URL; must start with http:// or https://.
    pub api_base: String,
    /// Bearer token for the server, if it needs one.
    pub api_key: Option<String>,
    /// Proxy URL exported as HTTPS_PROXY for subprocesses.
    pub https_proxy: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    /// Context budget handed to conversation compaction.
    pub max_context_tokens: Option<usize>,
    /// Directory of skill files shown by `/skills`.
    pub skills: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".to_string(),
            api_base: "http://localhost:4000".to_string(),
            api_key: None,
            https_proxy: None,
            temperature: None,
            max_output_tokens: None,
            top_p: None,
            max_context_tokens: None,
            skills: None,
        }
    }
}

impl CliConfig {
    /// The per-user config directory (`~/.quill`).
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quill")
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.yaml")
    }

    /// Load from a YAML file, falling back to defaults when the file does
    /// not exist. A file that exists but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| format!("cannot parse config {}: {e}", path.display()))
    }

    /// Validate the effective configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("config error: model must not be empty".to_string());
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(format!(
                "config error: api_base must begin with http:// or https:// (got '{}')",
                self.api_base
            ));
        }
        Ok(())
    }

    /// Select an Ollama model: rewrites the model id and defaults the
    /// `api_base` to the local Ollama endpoint.
    pub fn select_ollama(&mut self, name: &str) {
        self.model = format!("ollama/{name}");
        self.api_base = OLLAMA_DEFAULT_API_BASE.to_string();
    }

    /// Whether the configured model is served by Ollama.
    pub fn is_ollama(&self) -> bool {
        self.model.starts_with("ollama/")
    }

    /// Build the LLM client options from this configuration.
    pub fn llm_options(&self) -> quill::api::LlmOptions {
        let defaults = quill::api::LlmOptions::default();
        quill::api::LlmOptions {
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_output_tokens: self.max_output_tokens.unwrap_or(defaults.max_output_tokens),
            top_p: self.top_p,
        }
    }
}
