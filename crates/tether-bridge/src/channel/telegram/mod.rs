//! Telegram channel backend.
//!
//! Long-polls getUpdates on a dedicated task, matches replies and button
//! callbacks against the correlation table, and forwards everything else
//! to the remote dispatcher queue.

pub mod api;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tether_core::StateStore;
use tether_core::config::TelegramConfig;
use tether_core::decision::{normalize_decision, truncate_chars};

use crate::pending::PermissionRequest;

use super::correlation::CorrelationTable;
use super::{
    Channel, ChannelError, InboundEvent, MessageId, ResponseSink, format_permission_prompt,
};

use api::{TelegramApi, Update};

/// Hard cap on outbound message length (Telegram allows 4096).
const MESSAGE_LIMIT_CHARS: usize = 4000;

/// Fixed backoff after a transient receive failure.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram long-poll channel.
pub struct TelegramChannel {
    api: TelegramApi,
    chat_id: i64,
    poll_timeout_secs: u64,
    correlation: Arc<CorrelationTable>,
    sink: std::sync::Mutex<Option<Arc<dyn ResponseSink>>>,
    dispatcher_tx: mpsc::Sender<InboundEvent>,
    state: StateStore,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl TelegramChannel {
    /// Build the channel from validated configuration.
    pub fn new(
        config: &TelegramConfig,
        state: StateStore,
        dispatcher_tx: mpsc::Sender<InboundEvent>,
    ) -> Result<Self, ChannelError> {
        let token = config
            .bot_token
            .as_deref()
            .ok_or_else(|| ChannelError::Config("telegram bot token missing".into()))?;
        let chat_id = config
            .chat_id
            .ok_or_else(|| ChannelError::Config("telegram chat id missing".into()))?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            api: TelegramApi::new(&config.api_base, token)?,
            chat_id,
            poll_timeout_secs: config.poll_timeout_secs,
            correlation: Arc::new(CorrelationTable::new()),
            sink: std::sync::Mutex::new(None),
            dispatcher_tx,
            state,
            shutdown_tx,
            started: AtomicBool::new(false),
        })
    }

    /// The channel's correlation table.
    pub fn correlation(&self) -> &CorrelationTable {
        &self.correlation
    }

    fn current_sink(&self) -> Option<Arc<dyn ResponseSink>> {
        self.sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn start(&self) -> Result<(), ChannelError> {
        let Some(sink) = self.current_sink() else {
            return Err(ChannelError::Config(
                "response sink must be set before start".into(),
            ));
        };
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Receive loop already running");
            return Ok(());
        }

        let worker = PollWorker {
            api: self.api.clone(),
            chat_id: self.chat_id,
            poll_timeout_secs: self.poll_timeout_secs,
            correlation: Arc::clone(&self.correlation),
            sink,
            dispatcher_tx: self.dispatcher_tx.clone(),
            state: self.state.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(worker.run(shutdown_rx));

        info!(chat_id = self.chat_id, "Telegram receive loop started");
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Telegram receive loop stopping");
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        self.api
            .send_message(self.chat_id, &truncate_chars(text, MESSAGE_LIMIT_CHARS))
            .await?;
        Ok(())
    }

    async fn send_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<MessageId, ChannelError> {
        let text = format_permission_prompt(request);
        let message = self
            .api
            .send_message_with_keyboard(
                self.chat_id,
                &text,
                &[("\u{2705} Allow", "allow"), ("\u{274C} Deny", "deny")],
            )
            .await?;

        // Register before returning so a reply arriving immediately after
        // the send is guaranteed to be matchable.
        self.correlation.insert(&request.id, message.message_id);
        Ok(message.message_id)
    }

    async fn update_message(&self, message_id: MessageId, text: &str) {
        if let Err(e) = self
            .api
            .edit_message_text(
                self.chat_id,
                message_id,
                &truncate_chars(text, MESSAGE_LIMIT_CHARS),
            )
            .await
        {
            warn!(message_id, error = %e, "Best-effort message edit failed");
        }
        // The entry goes regardless of edit success so a stale id is
        // never matched twice.
        self.correlation.remove_by_message(message_id);
    }

    fn set_response_sink(&self, sink: Arc<dyn ResponseSink>) {
        *self
            .sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
    }
}

/// State owned by the receive loop task.
struct PollWorker {
    api: TelegramApi,
    chat_id: i64,
    poll_timeout_secs: u64,
    correlation: Arc<CorrelationTable>,
    sink: Arc<dyn ResponseSink>,
    dispatcher_tx: mpsc::Sender<InboundEvent>,
    state: StateStore,
}

impl PollWorker {
    /// Run until the shutdown signal flips.
    ///
    /// Transient receive failures back off and retry; only cancellation
    /// exits the loop.
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut cursor = self.state.cursor().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                result = self.api.get_updates(cursor, self.poll_timeout_secs) => {
                    match result {
                        Ok(updates) => {
                            if updates.is_empty() {
                                continue;
                            }
                            for update in &updates {
                                cursor = Some(
                                    cursor.unwrap_or(0).max(update.update_id + 1),
                                );
                                self.handle_update(update).await;
                            }
                            if let Some(next) = cursor {
                                self.state.set_cursor(next).await;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Receive failed, backing off");
                            tokio::select! {
                                () = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                                _ = shutdown_rx.changed() => break,
                            }
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        info!("Telegram receive loop stopped");
    }

    async fn handle_update(&self, update: &Update) {
        // Acknowledge callbacks up front; a failed ack only leaves a
        // spinner on the operator's screen.
        if let Some(cb) = &update.callback_query {
            if let Err(e) = self.api.answer_callback_query(&cb.id).await {
                debug!(callback_id = %cb.id, error = %e, "Callback ack failed");
            }
        }

        match classify_update(update, self.chat_id) {
            Classified::Event(event) => self.route_event(event).await,
            Classified::Unauthorized { chat_id } => {
                warn!(chat_id, "Dropping update from unauthorized chat");
            }
            Classified::Ignored => {
                debug!(update_id = update.update_id, "Ignoring update without text");
            }
        }
    }

    /// Correlated replies and callbacks resolve pending requests; all
    /// other traffic goes to the remote dispatcher.
    async fn route_event(&self, event: InboundEvent) {
        let target = match &event {
            InboundEvent::Reply { message_id, .. }
            | InboundEvent::Callback { message_id, .. } => Some(*message_id),
            InboundEvent::Text { .. } => None,
        };

        if let Some(message_id) = target {
            if let Some(request_id) = self.correlation.request_for_message(message_id) {
                let decision = normalize_decision(event.text());
                if !self.sink.on_decision(&request_id, decision).await {
                    debug!(request_id, "Correlated decision found no pending request");
                }
                return;
            }
        }

        if self.dispatcher_tx.send(event).await.is_err() {
            warn!("Dispatcher queue closed, dropping inbound event");
        }
    }
}

/// What one update means, before correlation lookup.
#[derive(Debug, PartialEq, Eq)]
enum Classified {
    /// Actionable traffic from the configured chat.
    Event(InboundEvent),
    /// Traffic from some other chat.
    Unauthorized { chat_id: i64 },
    /// Nothing actionable (no text, unsupported update kind).
    Ignored,
}

fn classify_update(update: &Update, allowed_chat: i64) -> Classified {
    if let Some(cb) = &update.callback_query {
        let Some(message) = &cb.message else {
            return Classified::Ignored;
        };
        if message.chat.id != allowed_chat {
            return Classified::Unauthorized {
                chat_id: message.chat.id,
            };
        }
        let Some(payload) = cb.data.as_deref().filter(|d| !d.is_empty()) else {
            return Classified::Ignored;
        };
        return Classified::Event(InboundEvent::Callback {
            message_id: message.message_id,
            payload: payload.to_string(),
        });
    }

    if let Some(message) = &update.message {
        if message.chat.id != allowed_chat {
            return Classified::Unauthorized {
                chat_id: message.chat.id,
            };
        }
        let Some(text) = message.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Classified::Ignored;
        };
        if let Some(replied) = &message.reply_to_message {
            return Classified::Event(InboundEvent::Reply {
                message_id: replied.message_id,
                text: text.to_string(),
            });
        }
        return Classified::Event(InboundEvent::Text {
            text: text.to_string(),
        });
    }

    Classified::Ignored
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CHAT: i64 = 99;

    fn parse(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn callback_classifies_with_origin_message_id() {
        let update = parse(
            r#"{"update_id":1,"callback_query":{"id":"c1","data":"allow",
                "message":{"message_id":42,"chat":{"id":99}}}}"#,
        );
        assert_eq!(
            classify_update(&update, CHAT),
            Classified::Event(InboundEvent::Callback {
                message_id: 42,
                payload: "allow".to_string()
            })
        );
    }

    #[test]
    fn reply_classifies_with_reply_target_id() {
        let update = parse(
            r#"{"update_id":2,"message":{"message_id":5,"chat":{"id":99},"text":"deny",
                "reply_to_message":{"message_id":42,"chat":{"id":99}}}}"#,
        );
        assert_eq!(
            classify_update(&update, CHAT),
            Classified::Event(InboundEvent::Reply {
                message_id: 42,
                text: "deny".to_string()
            })
        );
    }

    #[test]
    fn bare_text_classifies_as_unsolicited() {
        let update =
            parse(r#"{"update_id":3,"message":{"message_id":6,"chat":{"id":99},"text":"/list"}}"#);
        assert_eq!(
            classify_update(&update, CHAT),
            Classified::Event(InboundEvent::Text {
                text: "/list".to_string()
            })
        );
    }

    #[test]
    fn foreign_chat_is_unauthorized() {
        let update =
            parse(r#"{"update_id":4,"message":{"message_id":7,"chat":{"id":1},"text":"hi"}}"#);
        assert_eq!(
            classify_update(&update, CHAT),
            Classified::Unauthorized { chat_id: 1 }
        );
    }

    #[test]
    fn textless_update_is_ignored() {
        let update = parse(r#"{"update_id":5,"message":{"message_id":8,"chat":{"id":99}}}"#);
        assert_eq!(classify_update(&update, CHAT), Classified::Ignored);
        let empty = parse(r#"{"update_id":6,"message":{"message_id":9,"chat":{"id":99},"text":"  "}}"#);
        assert_eq!(classify_update(&empty, CHAT), Classified::Ignored);
    }

    #[test]
    fn callback_without_payload_is_ignored() {
        let update = parse(
            r#"{"update_id":7,"callback_query":{"id":"c2",
                "message":{"message_id":42,"chat":{"id":99}}}}"#,
        );
        assert_eq!(classify_update(&update, CHAT), Classified::Ignored);
    }
}
