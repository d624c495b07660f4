//! Channel abstraction.
//!
//! A channel carries bridge traffic to and from the human operator. Every
//! backend implements the [`Channel`] capability set: send a message, send
//! a permission request with response affordances, edit a sent message,
//! and feed inbound events back. Message formatting and decision
//! normalization are free functions shared by all backends.

pub mod correlation;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tether_core::Decision;
use tether_core::decision::truncate_chars;

use crate::pending::{PendingStore, PermissionRequest};

/// Channel-native message identifier.
pub type MessageId = i64;

/// Longest argument excerpt embedded in a permission prompt.
const MAX_ARGS_CHARS: usize = 700;

/// Channel transport and protocol errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed channel response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A normalized unit of incoming channel traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Reply to a previously sent message.
    Reply { message_id: MessageId, text: String },
    /// Button interaction on a previously sent message.
    Callback { message_id: MessageId, payload: String },
    /// Unsolicited text with no reply target.
    Text { text: String },
}

impl InboundEvent {
    /// The human-entered text carried by this event.
    pub fn text(&self) -> &str {
        match self {
            Self::Reply { text, .. } | Self::Text { text } => text,
            Self::Callback { payload, .. } => payload,
        }
    }
}

/// Consumer of decisions correlated to pending requests.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver a decision for `request_id`. Returns whether a pending
    /// request consumed it.
    async fn on_decision(&self, request_id: &str, decision: Decision) -> bool;
}

#[async_trait]
impl ResponseSink for PendingStore {
    async fn on_decision(&self, request_id: &str, decision: Decision) -> bool {
        self.resolve(request_id, decision).await
    }
}

/// Capability set every channel backend implements.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Begin the continuously running receive loop. Must not block the
    /// caller; runs until [`Channel::stop`].
    async fn start(&self) -> Result<(), ChannelError>;

    /// Stop the receive loop. Any in-flight receive is cancelled within
    /// the backend's long-poll timeout; further receive attempts stop.
    async fn stop(&self);

    /// Send a plain text message to the operator.
    async fn send(&self, text: &str) -> Result<(), ChannelError>;

    /// Send a permission request with actionable response affordances.
    ///
    /// The returned native message id is registered in the correlation
    /// table before this call returns, so an immediate reply is matchable.
    async fn send_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<MessageId, ChannelError>;

    /// Best-effort terminal edit of a previously sent message. Failures
    /// are swallowed; the correlation entry is dropped regardless so a
    /// stale id is never matched twice.
    async fn update_message(&self, message_id: MessageId, text: &str);

    /// Register the sink that receives correlated decisions.
    fn set_response_sink(&self, sink: Arc<dyn ResponseSink>);
}

/// Render the outbound permission prompt for any backend.
pub fn format_permission_prompt(request: &PermissionRequest) -> String {
    let args = serde_json::to_string_pretty(&request.input)
        .unwrap_or_else(|_| request.input.to_string());
    format!(
        "\u{1F510} Permission request\n\
         Session: {}\n\
         Tool: {}\n\
         Args:\n{}\n\n\
         Reply allow/deny, tap a button, or answer with instructions.",
        request.session_id,
        request.tool_name,
        truncate_chars(&args, MAX_ARGS_CHARS),
    )
}

/// Render the terminal edit after a request settles with a decision.
pub fn format_decision_update(request: &PermissionRequest, decision: &Decision) -> String {
    match decision {
        Decision::Allow => format!("\u{2705} {} \u{2014} granted", request.tool_name),
        Decision::Deny => format!("\u{274C} {} \u{2014} denied", request.tool_name),
        Decision::Custom(text) => format!(
            "\u{1F4AC} {} \u{2014} answered: {}",
            request.tool_name,
            truncate_chars(text, MAX_ARGS_CHARS)
        ),
    }
}

/// Render the terminal edit after a request times out unanswered.
pub fn format_timeout_update(request: &PermissionRequest) -> String {
    format!(
        "\u{23F0} {} \u{2014} no response received",
        request.tool_name
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PermissionRequest {
        PermissionRequest::new(
            "session-1",
            "Bash",
            serde_json::json!({"command": "ls -la"}),
        )
    }

    #[test]
    fn prompt_names_session_tool_and_args() {
        let text = format_permission_prompt(&request());
        assert!(text.contains("session-1"));
        assert!(text.contains("Bash"));
        assert!(text.contains("ls -la"));
    }

    #[test]
    fn prompt_truncates_oversized_args() {
        let req = PermissionRequest::new(
            "session-1",
            "Write",
            serde_json::json!({"content": "x".repeat(5000)}),
        );
        let text = format_permission_prompt(&req);
        assert!(text.chars().count() < 1000);
        assert!(text.contains('\u{2026}'));
    }

    #[test]
    fn decision_updates_are_human_readable() {
        let req = request();
        assert!(format_decision_update(&req, &Decision::Allow).contains("granted"));
        assert!(format_decision_update(&req, &Decision::Deny).contains("denied"));
        let custom = format_decision_update(&req, &Decision::Custom("sandbox it".into()));
        assert!(custom.contains("sandbox it"));
    }

    #[test]
    fn timeout_update_mentions_no_response() {
        assert!(format_timeout_update(&request()).contains("no response"));
    }

    #[test]
    fn inbound_event_text_extraction() {
        let reply = InboundEvent::Reply {
            message_id: 1,
            text: "yes".into(),
        };
        let callback = InboundEvent::Callback {
            message_id: 1,
            payload: "allow".into(),
        };
        let text = InboundEvent::Text { text: "/help".into() };
        assert_eq!(reply.text(), "yes");
        assert_eq!(callback.text(), "allow");
        assert_eq!(text.text(), "/help");
    }
}
