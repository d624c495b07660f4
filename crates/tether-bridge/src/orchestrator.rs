//! Permission orchestrator.
//!
//! Relays one host permission request through the channel, waits for the
//! operator's decision via the pending store, and finalizes the channel
//! message with the outcome.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use tether_core::Decision;

use crate::channel::{Channel, ChannelError, format_decision_update, format_timeout_update};
use crate::pending::{PendingError, PendingStore, PermissionRequest};

/// Failures surfaced to the host permission hook.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("No operator response for request {request_id}")]
    TimedOut { request_id: String },

    #[error("Bridge shut down while request {request_id} was pending")]
    Cleared { request_id: String },
}

/// Orchestrates the send/await/finalize cycle per permission request.
pub struct PermissionOrchestrator {
    channel: Arc<dyn Channel>,
    store: PendingStore,
}

impl PermissionOrchestrator {
    pub fn new(channel: Arc<dyn Channel>, store: PendingStore) -> Self {
        Self { channel, store }
    }

    pub fn store(&self) -> &PendingStore {
        &self.store
    }

    /// Relay one permission ask and wait for its outcome.
    ///
    /// Fails only by propagating a channel send failure, a timeout, or a
    /// cleared store; the host decides the default behavior in those cases.
    pub async fn handle_permission_request(
        &self,
        session_id: &str,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<Decision, PermissionError> {
        let request = PermissionRequest::new(session_id, tool_name, input);
        info!(
            request_id = %request.id,
            session_id,
            tool_name,
            "Relaying permission request"
        );

        let message_id = self.channel.send_permission_request(&request).await?;
        let ticket = self.store.register(&request, message_id).await;

        match ticket.wait().await {
            Ok(decision) => {
                self.channel
                    .update_message(message_id, &format_decision_update(&request, &decision))
                    .await;
                info!(
                    request_id = %request.id,
                    outcome = decision.status_label(),
                    "Permission request settled"
                );
                Ok(decision)
            }
            Err(PendingError::TimedOut { .. }) => {
                self.channel
                    .update_message(message_id, &format_timeout_update(&request))
                    .await;
                warn!(request_id = %request.id, "Permission request timed out");
                Err(PermissionError::TimedOut {
                    request_id: request.id,
                })
            }
            Err(PendingError::Cleared { .. }) => {
                // Shutdown path; the receive loop is already gone, so no
                // terminal edit is attempted.
                Err(PermissionError::Cleared {
                    request_id: request.id,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;
    use std::time::Duration;

    fn orchestrator(
        channel: &Arc<RecordingChannel>,
        timeout: Duration,
    ) -> PermissionOrchestrator {
        PermissionOrchestrator::new(
            Arc::clone(channel) as Arc<dyn Channel>,
            PendingStore::new(timeout),
        )
    }

    #[tokio::test]
    async fn decision_finalizes_message_and_returns() {
        let channel = Arc::new(RecordingChannel::new());
        let orch = orchestrator(&channel, Duration::from_secs(60));
        let store = orch.store().clone();

        let channel_inner = Arc::clone(&channel);
        let resolver = tokio::spawn(async move {
            // Wait until the request is sent and registered, then answer
            // it like the receive loop would.
            let (request_id, _message_id) = channel_inner.wait_for_request().await;
            while store.count().await == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            store.resolve(&request_id, Decision::Allow).await
        });

        let decision = orch
            .handle_permission_request("session-1", "Bash", serde_json::json!({"command":"ls"}))
            .await
            .unwrap();

        assert_eq!(decision, Decision::Allow);
        assert!(resolver.await.unwrap());

        let edits = channel.edits().await;
        assert_eq!(edits.len(), 1);
        assert!(edits[0].1.contains("granted"));
    }

    #[tokio::test]
    async fn timeout_edits_no_response_and_raises() {
        let channel = Arc::new(RecordingChannel::new());
        let orch = orchestrator(&channel, Duration::from_millis(20));

        let err = orch
            .handle_permission_request("session-1", "Bash", serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, PermissionError::TimedOut { .. }));
        let edits = channel.edits().await;
        assert_eq!(edits.len(), 1);
        assert!(edits[0].1.contains("no response"));
    }

    #[tokio::test]
    async fn cleared_store_raises_without_edit() {
        let channel = Arc::new(RecordingChannel::new());
        let orch = orchestrator(&channel, Duration::from_secs(60));
        let store = orch.store().clone();

        let channel_inner = Arc::clone(&channel);
        tokio::spawn(async move {
            channel_inner.wait_for_request().await;
            while store.count().await == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            store.clear().await;
        });

        let err = orch
            .handle_permission_request("session-1", "Bash", serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, PermissionError::Cleared { .. }));
        assert!(channel.edits().await.is_empty());
    }

    #[tokio::test]
    async fn send_failure_propagates() {
        let channel = Arc::new(RecordingChannel::failing());
        let orch = orchestrator(&channel, Duration::from_secs(60));

        let err = orch
            .handle_permission_request("session-1", "Bash", serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, PermissionError::Channel(_)));
        // Nothing registered when the send never went out.
        assert_eq!(orch.store().count().await, 0);
    }
}
