//! NDJSON hook feed.
//!
//! The host's plugin hook talks to the bridge over stdin/stdout, one JSON
//! object per line. Tolerant reader: unknown types are logged and
//! skipped, malformed lines never stop the feed. Permission requests run
//! concurrently; their decisions are serialized through a single writer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tether_core::Decision;

use crate::notify::{NotificationEmitter, NotificationKind};
use crate::orchestrator::{PermissionError, PermissionOrchestrator};

/// One permission ask from the host hook.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequestEvent {
    /// Host-side request id, echoed back in the decision line.
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

/// One status event from the host.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub session_id: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Parsed hook line.
#[derive(Debug)]
pub enum HookEvent {
    PermissionRequest(PermissionRequestEvent),
    Notification(NotificationEvent),
    Unknown { event_type: String },
}

/// Parse a single NDJSON line from the host hook.
pub fn parse_hook_line(line: &str) -> serde_json::Result<HookEvent> {
    let raw: Value = serde_json::from_str(line)?;
    let event_type = raw.get("type").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "permission_request" => serde_json::from_value(raw).map(HookEvent::PermissionRequest),
        "notification" => serde_json::from_value(raw).map(HookEvent::Notification),
        other => Ok(HookEvent::Unknown {
            event_type: other.to_string(),
        }),
    }
}

/// Render the decision line for a settled permission request.
///
/// Timeout and shutdown become deny-by-default here, at the host
/// boundary; library callers keep the distinguished errors. Custom
/// operator text is forwarded as structured guidance, not a deny.
fn decision_line(id: &str, outcome: &Result<Decision, PermissionError>) -> String {
    let body = match outcome {
        Ok(Decision::Allow) => serde_json::json!({"behavior": "allow"}),
        Ok(Decision::Deny) => serde_json::json!({"behavior": "deny"}),
        Ok(Decision::Custom(text)) => {
            serde_json::json!({"behavior": "custom", "message": text})
        }
        Err(e) => serde_json::json!({"behavior": "deny", "message": e.to_string()}),
    };
    let mut line = serde_json::json!({
        "type": "permission_decision",
        "id": id,
    });
    if let (Some(obj), Some(extra)) = (line.as_object_mut(), body.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    line.to_string()
}

/// Consumes hook events and produces decision lines.
pub struct HookRunner {
    orchestrator: Arc<PermissionOrchestrator>,
    emitter: Arc<NotificationEmitter>,
}

impl HookRunner {
    pub fn new(orchestrator: Arc<PermissionOrchestrator>, emitter: Arc<NotificationEmitter>) -> Self {
        Self {
            orchestrator,
            emitter,
        }
    }

    /// Read NDJSON lines from `reader` until EOF.
    ///
    /// Each permission request is handled on its own task so a pending
    /// decision never blocks the feed; output lines go through `out_tx`.
    pub async fn run<R>(self: Arc<Self>, reader: R, out_tx: mpsc::Sender<String>)
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.handle_line(line, &out_tx);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Hook feed read failed");
                    break;
                }
            }
        }
        info!("Hook feed closed");
    }

    fn handle_line(self: &Arc<Self>, line: &str, out_tx: &mpsc::Sender<String>) {
        match parse_hook_line(line) {
            Ok(HookEvent::PermissionRequest(event)) => {
                let runner = Arc::clone(self);
                let tx = out_tx.clone();
                tokio::spawn(async move {
                    let outcome = runner
                        .orchestrator
                        .handle_permission_request(
                            &event.session_id,
                            &event.tool_name,
                            event.input,
                        )
                        .await;
                    if tx.send(decision_line(&event.id, &outcome)).await.is_err() {
                        warn!(id = %event.id, "Decision writer gone, dropping decision");
                    }
                });
            }
            Ok(HookEvent::Notification(event)) => {
                let runner = Arc::clone(self);
                tokio::spawn(async move {
                    runner
                        .emitter
                        .notify(event.kind, &event.session_id, event.detail.as_deref())
                        .await;
                });
            }
            Ok(HookEvent::Unknown { event_type }) => {
                warn!(event_type, "Unknown hook event type, skipping");
            }
            Err(e) => {
                warn!(error = %e, "Malformed hook line, skipping");
            }
        }
    }
}

/// Drain decision lines into `writer`, one per line.
pub async fn write_lines<W>(mut rx: mpsc::Receiver<String>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let mut out = line.into_bytes();
        out.push(b'\n');
        if writer.write_all(&out).await.is_err() || writer.flush().await.is_err() {
            warn!("Decision writer closed");
            break;
        }
    }
}
