//! Host session API.
//!
//! The bridge's view of the agent-hosting process: enumerate recent
//! sessions and submit a prompt into one. Backends implement
//! [`SessionHost`]; production use is [`CliSessionHost`], which scans the
//! host's transcript directory and shells out to the host CLI.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Host integration errors.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Session directory unavailable: {0}")]
    SessionDir(String),

    #[error("Failed to run host CLI: {0}")]
    Spawn(std::io::Error),

    #[error("Host CLI exited with {code}: {stderr}")]
    CliFailed { code: i32, stderr: String },
}

/// One known session of the host process.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Full session identifier.
    pub id: String,
    /// Human-readable title (first user message, or the id when unknown).
    pub title: String,
    /// Last time the session's transcript changed.
    pub updated_at: SystemTime,
}

/// Capability interface over the agent-hosting process.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// List known sessions, unordered.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, HostError>;

    /// Submit `prompt` into the session identified by `session_id`.
    async fn submit_prompt(&self, session_id: &str, prompt: &str) -> Result<(), HostError>;
}

/// [`SessionHost`] backed by the host CLI and its transcript directory.
///
/// Sessions are discovered as `<session_dir>/<id>.jsonl` transcripts;
/// prompting resumes a session with `<claude_bin> --resume <id> -p <text>`.
pub struct CliSessionHost {
    claude_bin: PathBuf,
    session_dir: PathBuf,
}

impl CliSessionHost {
    pub const fn new(claude_bin: PathBuf, session_dir: PathBuf) -> Self {
        Self {
            claude_bin,
            session_dir,
        }
    }
}

#[async_trait]
impl SessionHost for CliSessionHost {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, HostError> {
        let entries = std::fs::read_dir(&self.session_dir).map_err(|e| {
            HostError::SessionDir(format!("{}: {}", self.session_dir.display(), e))
        })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let updated_at = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let title = transcript_title(&path).unwrap_or_else(|| id.to_string());
            sessions.push(SessionInfo {
                id: id.to_string(),
                title,
                updated_at,
            });
        }

        debug!(count = sessions.len(), "Listed host sessions");
        Ok(sessions)
    }

    async fn submit_prompt(&self, session_id: &str, prompt: &str) -> Result<(), HostError> {
        let output = tokio::process::Command::new(&self.claude_bin)
            .arg("--resume")
            .arg(session_id)
            .arg("-p")
            .arg(prompt)
            .output()
            .await
            .map_err(HostError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(session_id, code = output.status.code(), "Host CLI prompt failed");
            return Err(HostError::CliFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        debug!(session_id, "Prompt submitted to host session");
        Ok(())
    }
}

/// First user text line of a transcript, if one parses.
fn transcript_title(path: &std::path::Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines().take(20) {
        let Ok(raw) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if raw.get("type").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let text = raw
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(extract_text)?;
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.lines().next().unwrap_or(text).to_string());
        }
    }
    None
}

/// Pull plain text out of a string or content-block-array message body.
fn extract_text(content: &Value) -> Option<String> {
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    content.as_array()?.iter().find_map(|block| {
        if block.get("type")?.as_str()? == "text" {
            Some(block.get("text")?.as_str()?.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write_transcript(dir: &std::path::Path, id: &str, first_user_text: &str) {
        let line = serde_json::json!({
            "type": "user",
            "message": {"content": [{"type": "text", "text": first_user_text}]},
        });
        std::fs::write(dir.join(format!("{id}.jsonl")), format!("{line}\n")).unwrap();
    }

    #[tokio::test]
    async fn lists_jsonl_transcripts() {
        let dir = tempfile::tempdir().unwrap();
        write_transcript(dir.path(), "abc123", "fix the login bug");
        write_transcript(dir.path(), "def456", "add dark mode");
        std::fs::write(dir.path().join("ignored.txt"), "nope").unwrap();

        let host = CliSessionHost::new(PathBuf::from("claude"), dir.path().to_path_buf());
        let mut sessions = host.list_sessions().await.unwrap();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "abc123");
        assert_eq!(sessions[0].title, "fix the login bug");
    }

    #[tokio::test]
    async fn title_falls_back_to_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("xyz.jsonl"), "not json\n").unwrap();

        let host = CliSessionHost::new(PathBuf::from("claude"), dir.path().to_path_buf());
        let sessions = host.list_sessions().await.unwrap();
        assert_eq!(sessions[0].title, "xyz");
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let host = CliSessionHost::new(
            PathBuf::from("claude"),
            PathBuf::from("/nonexistent/tether-sessions"),
        );
        assert!(matches!(
            host.list_sessions().await,
            Err(HostError::SessionDir(_))
        ));
    }

    #[tokio::test]
    async fn failed_cli_maps_to_cli_failed() {
        let dir = tempfile::tempdir().unwrap();
        let host = CliSessionHost::new(PathBuf::from("false"), dir.path().to_path_buf());
        assert!(matches!(
            host.submit_prompt("abc", "hello").await,
            Err(HostError::CliFailed { .. })
        ));
    }

    #[test]
    fn string_content_extracts() {
        let v = serde_json::json!("plain text");
        assert_eq!(extract_text(&v), Some("plain text".to_string()));
    }
}
