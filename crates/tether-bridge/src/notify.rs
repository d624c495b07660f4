//! Notification emitter.
//!
//! Stateless, one-way status events keyed by kind. No correlation: a
//! notification is formatted, truncated, and fired through the channel.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use tether_core::config::NotificationConfig;
use tether_core::decision::truncate_chars;

use crate::channel::Channel;

/// Longest detail excerpt embedded in a notification.
const MAX_DETAIL_CHARS: usize = 500;

/// Host status event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Complete,
    Error,
    Idle,
}

/// Formats and sends fire-and-forget status events.
pub struct NotificationEmitter {
    channel: Arc<dyn Channel>,
    config: NotificationConfig,
}

impl NotificationEmitter {
    pub fn new(channel: Arc<dyn Channel>, config: NotificationConfig) -> Self {
        Self { channel, config }
    }

    /// Emit one notification. Send failures are logged and swallowed; a
    /// status event that cannot be delivered must not disturb the host.
    pub async fn notify(&self, kind: NotificationKind, session_id: &str, detail: Option<&str>) {
        if !self.is_enabled(kind) {
            debug!(?kind, "Notification kind disabled, skipping");
            return;
        }
        let text = format_notification(kind, session_id, detail);
        if let Err(e) = self.channel.send(&text).await {
            warn!(?kind, error = %e, "Failed to deliver notification");
        }
    }

    const fn is_enabled(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Complete => self.config.on_complete,
            NotificationKind::Error => self.config.on_error,
            NotificationKind::Idle => self.config.on_idle,
        }
    }
}

fn format_notification(
    kind: NotificationKind,
    session_id: &str,
    detail: Option<&str>,
) -> String {
    let headline = match kind {
        NotificationKind::Complete => format!("\u{2705} Session {session_id} finished"),
        NotificationKind::Error => format!("\u{2757} Session {session_id} hit an error"),
        NotificationKind::Idle => format!("\u{1F4A4} Session {session_id} is idle"),
    };
    match detail.map(str::trim).filter(|d| !d.is_empty()) {
        Some(detail) => format!("{headline}\n{}", truncate_chars(detail, MAX_DETAIL_CHARS)),
        None => headline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;

    fn emitter(channel: &Arc<RecordingChannel>, config: NotificationConfig) -> NotificationEmitter {
        NotificationEmitter::new(Arc::clone(channel) as Arc<dyn Channel>, config)
    }

    #[tokio::test]
    async fn complete_notifications_sent_by_default() {
        let channel = Arc::new(RecordingChannel::new());
        let emitter = emitter(&channel, NotificationConfig::default());

        emitter
            .notify(NotificationKind::Complete, "abcd", Some("all tests pass"))
            .await;

        let sent = channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("abcd"));
        assert!(sent[0].contains("all tests pass"));
    }

    #[tokio::test]
    async fn idle_notifications_gated_off_by_default() {
        let channel = Arc::new(RecordingChannel::new());
        let emitter = emitter(&channel, NotificationConfig::default());

        emitter.notify(NotificationKind::Idle, "abcd", None).await;

        assert!(channel.sent().await.is_empty());
    }

    #[tokio::test]
    async fn detail_truncated_to_bound() {
        let channel = Arc::new(RecordingChannel::new());
        let emitter = emitter(&channel, NotificationConfig::default());
        let long_detail = "x".repeat(2000);

        emitter
            .notify(NotificationKind::Error, "abcd", Some(&long_detail))
            .await;

        let sent = channel.sent().await;
        let detail_line = sent[0].lines().nth(1).unwrap_or("");
        assert_eq!(detail_line.chars().count(), MAX_DETAIL_CHARS + 1);
        assert!(detail_line.ends_with('\u{2026}'));
    }

    #[tokio::test]
    async fn send_failure_is_swallowed() {
        let channel = Arc::new(RecordingChannel::failing());
        let emitter = emitter(&channel, NotificationConfig::default());

        // Must not panic or propagate.
        emitter
            .notify(NotificationKind::Error, "abcd", Some("boom"))
            .await;
    }

    #[test]
    fn empty_detail_is_omitted() {
        let text = format_notification(NotificationKind::Complete, "abcd", Some("   "));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn kind_parses_from_lowercase() {
        let kind: NotificationKind = serde_json::from_str("\"idle\"").unwrap_or(NotificationKind::Error);
        assert_eq!(kind, NotificationKind::Idle);
    }
}
