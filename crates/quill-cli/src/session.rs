//! Append-only session transcripts.
//!
//! One JSONL file per session under `~/.quill/sessions/`, keyed by UUID.
//! The first line is the session header; every subsequent line is one
//! message. Nothing is ever rewritten — resuming replays the message
//! lines into a fresh conversation, skipping the stored system prompt in
//! favour of the current one.

use std::io::Write;
use std::path::{Path, PathBuf};

use quill::{Message, MessageRole};
use serde::{Deserialize, Serialize};

/// Session header, the first line of every transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    /// First ≤80 chars of the first user message.
    pub title: String,
    pub model: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// One line of a transcript file.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TranscriptLine {
    Meta(SessionMeta),
    Message { message: Message },
}

/// Store of append-only session transcripts in one directory.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) the store at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Default store location (`~/.quill/sessions`).
    pub fn default_dir() -> PathBuf {
        crate::config::CliConfig::config_dir().join("sessions")
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    /// Create a new session and write its header line.
    pub fn create(&self, model: &str, first_user_message: &str) -> std::io::Result<SessionMeta> {
        self.create_with_id(
            &uuid::Uuid::new_v4().to_string(),
            model,
            first_user_message,
        )
    }

    /// Create a session under a caller-chosen id (`--session <id>`).
    pub fn create_with_id(
        &self,
        id: &str,
        model: &str,
        first_user_message: &str,
    ) -> std::io::Result<SessionMeta> {
        let meta = SessionMeta {
            id: id.to_string(),
            title: title_from(first_user_message),
            model: model.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.append_line(&meta.id, &TranscriptLine::Meta(meta.clone()))?;
        Ok(meta)
    }

    /// Append one message to a session transcript.
    pub fn append_message(&self, id: &str, message: &Message) -> std::io::Result<()> {
        self.append_line(
            id,
            &TranscriptLine::Message {
                message: message.clone(),
            },
        )
    }

    fn append_line(&self, id: &str, line: &TranscriptLine) -> std::io::Result<()> {
        let rendered = serde_json::to_string(line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(id))?;
        writeln!(file, "{rendered}")
    }

    /// Load a session's header and messages. Unparseable lines are
    /// skipped — an interrupted write must not brick the whole session.
    pub fn load(&self, id: &str) -> Result<(SessionMeta, Vec<Message>), String> {
        let path = self.path_for(id);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| format!("no session '{id}' in {}", self.dir.display()))?;

        let mut meta: Option<SessionMeta> = None;
        let mut messages = Vec::new();
        for line in raw.lines() {
            match serde_json::from_str::<TranscriptLine>(line) {
                Ok(TranscriptLine::Meta(m)) => meta = Some(m),
                Ok(TranscriptLine::Message { message }) => messages.push(message),
                Err(_) => continue,
            }
        }
        let meta = meta.ok_or_else(|| format!("session '{id}' has no header line"))?;
        Ok((meta, messages))
    }

    /// Messages to replay into a fresh conversation on `--resume`: the
    /// stored system prompt is dropped in favour of the current one.
    pub fn load_for_resume(&self, id: &str) -> Result<(SessionMeta, Vec<Message>), String> {
        let (meta, messages) = self.load(id)?;
        let replay = messages
            .into_iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        Ok((meta, replay))
    }

    /// All session headers, newest first.
    pub fn list(&self) -> Vec<SessionMeta> {
        let mut sessions = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return sessions;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(meta) = first_meta(&path) {
                sessions.push(meta);
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// The most recently created session, for `--resume latest`.
    pub fn latest(&self) -> Option<SessionMeta> {
        self.list().into_iter().next()
    }
}

fn first_meta(path: &Path) -> Option<SessionMeta> {
    let raw = std::fs::read_to_string(path).ok()?;
    let line = raw.lines().next()?;
    match serde_json::from_str::<TranscriptLine>(line).ok()? {
        TranscriptLine::Meta(meta) => Some(meta),
        TranscriptLine::Message { .. } => None,
    }
}

/// Session title: first ≤80 chars of the first user message, one line.
fn title_from(first_user_message: &str) -> String {
    first_user_message
        .lines()
        .next()
        .unwrap_or("")
        .chars()
        .take(80)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill::ToolCall;

    #[test]
    fn create_append_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();

        let meta = store.create("test-model", "fix the parser bug").unwrap();
        store
            .append_message(&meta.id, &Message::system("sys"))
            .unwrap();
        store
            .append_message(&meta.id, &Message::user("fix the parser bug"))
            .unwrap();
        store
            .append_message(&meta.id, &Message::assistant_text("done"))
            .unwrap();

        let (loaded_meta, messages) = store.load(&meta.id).unwrap();
        assert_eq!(loaded_meta.title, "fix the parser bug");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content.as_deref(), Some("done"));
    }

    #[test]
    fn resume_skips_stored_system_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let meta = store.create("m", "hello").unwrap();
        store.append_message(&meta.id, &Message::system("old sys")).unwrap();
        store.append_message(&meta.id, &Message::user("hello")).unwrap();

        let (_, replay) = store.load_for_resume(&meta.id).unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].role, MessageRole::User);
    }

    #[test]
    fn tool_calls_survive_the_transcript() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let meta = store.create("m", "t").unwrap();

        let raw_args = r#"{"path":"a.rs","limit": 3}"#;
        store
            .append_message(
                &meta.id,
                &Message::assistant_tool_calls(
                    None,
                    vec![ToolCall::new("c1", "file_read", raw_args)],
                ),
            )
            .unwrap();

        let (_, messages) = store.load(&meta.id).unwrap();
        let calls = messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, raw_args);
    }

    #[test]
    fn title_is_capped_at_80_chars() {
        let long = "x".repeat(200);
        assert_eq!(title_from(&long).chars().count(), 80);
        assert_eq!(title_from("multi\nline"), "multi");
    }

    #[test]
    fn list_is_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let a = store.create("m", "first").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create("m", "second").unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);

        assert_eq!(store.latest().unwrap().id, b.id);
    }

    #[test]
    fn missing_session_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        assert!(store.load("nope").is_err());
    }
}
