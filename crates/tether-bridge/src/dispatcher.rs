//! Remote command dispatcher.
//!
//! Consumes inbound channel traffic that did not correlate to a pending
//! permission request: a small slash-command language plus free text
//! forwarded as a prompt into the active session. All effects are channel
//! sends or session-reference mutations; host failures are reported back
//! through the channel, never propagated.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tether_core::{SessionHost, SessionInfo, StateStore};

use crate::channel::{Channel, InboundEvent};

/// Shown session-id prefix length.
const SHORT_ID_CHARS: usize = 8;

/// How many sessions `/list` shows.
const LIST_LIMIT: usize = 5;

/// Help text displayed when the operator sends /help.
pub const HELP_TEXT: &str = "Tether remote control\n\n\
Available commands:\n\
  /help           -- Show this help\n\
  /status         -- Bridge status and active session\n\
  /list           -- Recent sessions, most recent first\n\
  /use <prefix>   -- Select the active session by id prefix\n\n\
Anything else is sent as a prompt to the active session.";

/// Parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteCommand {
    Help,
    Status,
    List,
    Use { prefix: String },
    Unknown { name: String },
}

/// Parse `text` as a slash command; `None` means free text.
fn parse_command(text: &str) -> Option<RemoteCommand> {
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    Some(match name {
        "help" => RemoteCommand::Help,
        "status" => RemoteCommand::Status,
        "list" => RemoteCommand::List,
        "use" => RemoteCommand::Use {
            prefix: parts.next().unwrap_or_default().to_string(),
        },
        other => RemoteCommand::Unknown {
            name: other.to_string(),
        },
    })
}

/// Consumer of uncorrelated inbound events.
pub struct RemoteDispatcher {
    channel: Arc<dyn Channel>,
    host: Arc<dyn SessionHost>,
    state: StateStore,
}

impl RemoteDispatcher {
    pub fn new(channel: Arc<dyn Channel>, host: Arc<dyn SessionHost>, state: StateStore) -> Self {
        Self {
            channel,
            host,
            state,
        }
    }

    /// Drain the inbound queue until it closes. Events are handled in
    /// arrival order, which serializes active-session mutations.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_incoming(&event).await;
        }
        info!("Dispatcher queue closed");
    }

    /// Handle one uncorrelated inbound event.
    pub async fn handle_incoming(&self, event: &InboundEvent) {
        if !self.state.enabled().await {
            debug!("Remote control disabled, ignoring event");
            return;
        }
        let text = event.text().trim();
        if text.is_empty() {
            return;
        }

        if let Some(command) = parse_command(text) {
            debug!(?command, "Dispatching operator command");
            self.dispatch(command).await;
        } else {
            self.forward_prompt(text).await;
        }
    }

    async fn dispatch(&self, command: RemoteCommand) {
        match command {
            RemoteCommand::Help => self.reply(HELP_TEXT).await,
            RemoteCommand::Status => self.report_status().await,
            RemoteCommand::List => self.list_sessions().await,
            RemoteCommand::Use { prefix } => self.use_session(&prefix).await,
            RemoteCommand::Unknown { name } => {
                self.reply(&format!("Unknown command /{name}. Try /help."))
                    .await;
            }
        }
    }

    async fn report_status(&self) {
        let enabled = self.state.enabled().await;
        let session = self.state.active_session().await;
        let session_line = session
            .as_deref()
            .map_or_else(|| "none".to_string(), |s| short_id(s).to_string());
        self.reply(&format!(
            "Remote control: {}\nActive session: {session_line}",
            if enabled { "enabled" } else { "disabled" },
        ))
        .await;
    }

    async fn list_sessions(&self) {
        let mut sessions = match self.host.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Session listing failed");
                self.reply(&format!("\u{26A0} Could not list sessions: {e}"))
                    .await;
                return;
            }
        };

        if sessions.is_empty() {
            self.reply("No sessions found.").await;
            return;
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(LIST_LIMIT);

        let lines: Vec<String> = sessions.iter().map(render_session_line).collect();
        self.reply(&format!(
            "Recent sessions:\n{}\n\nSelect one with /use <prefix>.",
            lines.join("\n")
        ))
        .await;
    }

    async fn use_session(&self, prefix: &str) {
        if prefix.is_empty() {
            self.reply("Usage: /use <session-id-prefix>").await;
            return;
        }

        let sessions = match self.host.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Session listing failed");
                self.reply(&format!("\u{26A0} Could not list sessions: {e}"))
                    .await;
                return;
            }
        };

        let matches: Vec<&SessionInfo> =
            sessions.iter().filter(|s| s.id.starts_with(prefix)).collect();

        match matches.as_slice() {
            [] => {
                self.reply(&format!("No session matches '{prefix}'."))
                    .await;
            }
            [session] => {
                if let Err(e) = self
                    .state
                    .set_active_session(Some(session.id.clone()))
                    .await
                {
                    warn!(error = %e, "Failed to persist active session");
                    self.reply(&format!("\u{26A0} Could not save selection: {e}"))
                        .await;
                    return;
                }
                info!(session_id = %session.id, "Active session selected");
                self.reply(&format!(
                    "Active session: {} {}",
                    short_id(&session.id),
                    session.title
                ))
                .await;
            }
            many => {
                self.reply(&format!(
                    "'{prefix}' is ambiguous ({} matches), use a longer prefix.",
                    many.len()
                ))
                .await;
            }
        }
    }

    async fn forward_prompt(&self, text: &str) {
        let Some(session_id) = self.state.active_session().await else {
            self.reply("No active session. Use /list then /use <prefix> to select one.")
                .await;
            return;
        };

        match self.host.submit_prompt(&session_id, text).await {
            Ok(()) => {
                info!(session_id = %session_id, "Prompt forwarded");
                self.reply(&format!("\u{1F4E4} Sent to {}.", short_id(&session_id)))
                    .await;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Prompt forwarding failed");
                self.reply(&format!(
                    "\u{26A0} Failed to prompt {}: {e}",
                    short_id(&session_id)
                ))
                .await;
            }
        }
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.channel.send(text).await {
            warn!(error = %e, "Failed to send dispatcher reply");
        }
    }
}

fn render_session_line(session: &SessionInfo) -> String {
    format!(
        "{}  {}  ({})",
        short_id(&session.id),
        session.title,
        format_age(session.updated_at)
    )
}

fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(SHORT_ID_CHARS)
        .map_or(id.len(), |(i, _)| i);
    &id[..end]
}

fn format_age(updated_at: SystemTime) -> String {
    let Ok(elapsed) = updated_at.elapsed() else {
        return "just now".to_string();
    };
    let secs = elapsed.as_secs();
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
