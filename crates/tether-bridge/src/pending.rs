//! Pending permission request store.
//!
//! Tracks permission requests awaiting a human decision. Each registered
//! request hands back an awaitable ticket that settles exactly once:
//! with a decision, with a timeout, or with a cleared-store error at
//! shutdown. Whichever of the reply path and the timer path takes the
//! record out of the map first wins; the loser is a silent no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use tether_core::Decision;

/// Ways a pending request can terminate without a decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    #[error("No response within {timeout_secs}s for request {request_id}")]
    TimedOut { request_id: String, timeout_secs: u64 },

    #[error("Store cleared while request {request_id} was outstanding")]
    Cleared { request_id: String },
}

/// One permission ask from the host.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Process-unique request id.
    pub id: String,
    /// Session the request originates from.
    pub session_id: String,
    /// Tool the host wants to run.
    pub tool_name: String,
    /// Opaque tool arguments.
    pub input: serde_json::Value,
    /// When the request was created.
    pub created_at: SystemTime,
}

impl PermissionRequest {
    /// Build a request with a fresh id.
    pub fn new(session_id: &str, tool_name: &str, input: serde_json::Value) -> Self {
        Self {
            id: fresh_request_id(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            input,
            created_at: SystemTime::now(),
        }
    }
}

/// Process-unique request id: millisecond timestamp plus a random suffix.
fn fresh_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("perm-{millis:x}-{}", &suffix[..8])
}

type Completion = oneshot::Sender<Result<Decision, PendingError>>;

struct PendingRecord {
    #[allow(dead_code)] // kept for observability; message routing uses the correlation table
    message_id: i64,
    resolve_tx: Completion,
}

/// Store of in-flight permission requests.
///
/// Clones share the underlying map. The map is the single source of truth
/// for "is this request still awaitable": removal and handle completion
/// happen under one lock acquisition.
#[derive(Clone)]
pub struct PendingStore {
    requests: Arc<Mutex<HashMap<String, PendingRecord>>>,
    timeout: Duration,
}

impl PendingStore {
    /// Create a store whose requests expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Register a request and start its expiry timer.
    ///
    /// Returns a ticket the caller awaits for the decision. The timer is a
    /// detached task; if the request resolves first the timer finds the id
    /// gone and does nothing.
    pub async fn register(&self, request: &PermissionRequest, message_id: i64) -> PendingTicket {
        let (tx, rx) = oneshot::channel();
        let request_id = request.id.clone();

        self.requests.lock().await.insert(
            request_id.clone(),
            PendingRecord {
                message_id,
                resolve_tx: tx,
            },
        );
        debug!(request_id, message_id, "Registered pending permission request");

        let store = self.clone();
        let timer_id = request_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(store.timeout).await;
            store.expire(&timer_id).await;
        });

        PendingTicket { request_id, rx }
    }

    /// Complete a request with a decision.
    ///
    /// Returns false when the id is absent (already resolved, timed out,
    /// or never registered); that case has no side effect.
    pub async fn resolve(&self, request_id: &str, decision: Decision) -> bool {
        let Some(record) = self.requests.lock().await.remove(request_id) else {
            debug!(request_id, "Resolve for unknown request id, ignoring");
            return false;
        };
        // A dropped receiver means the awaiter gave up; nothing left to do.
        let _ = record.resolve_tx.send(Ok(decision));
        debug!(request_id, "Pending request resolved");
        true
    }

    /// Expire a request after its timeout window. No-op when already settled.
    pub async fn expire(&self, request_id: &str) -> bool {
        let Some(record) = self.requests.lock().await.remove(request_id) else {
            return false;
        };
        warn!(request_id, "Permission request timed out");
        let _ = record.resolve_tx.send(Err(PendingError::TimedOut {
            request_id: request_id.to_string(),
            timeout_secs: self.timeout.as_secs(),
        }));
        true
    }

    /// Fail every outstanding request with a cleared-store error.
    ///
    /// Used at shutdown so callers awaiting a decision always resume.
    pub async fn clear(&self) -> usize {
        let drained: Vec<(String, PendingRecord)> =
            self.requests.lock().await.drain().collect();
        let count = drained.len();
        for (request_id, record) in drained {
            let _ = record.resolve_tx.send(Err(PendingError::Cleared {
                request_id: request_id.clone(),
            }));
            debug!(request_id, "Pending request cleared");
        }
        count
    }

    /// Number of outstanding requests.
    pub async fn count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Configured expiry window.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Awaitable handle for one registered request.
pub struct PendingTicket {
    request_id: String,
    rx: oneshot::Receiver<Result<Decision, PendingError>>,
}

impl PendingTicket {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the request to settle.
    pub async fn wait(self) -> Result<Decision, PendingError> {
        match self.rx.await {
            Ok(result) => result,
            // Sender dropped without completing: the store is gone.
            Err(_) => Err(PendingError::Cleared {
                request_id: self.request_id,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(session_id: &str, tool_name: &str) -> PermissionRequest {
        PermissionRequest::new(session_id, tool_name, serde_json::json!({}))
    }

    #[tokio::test]
    async fn resolve_completes_ticket() {
        let store = PendingStore::new(Duration::from_secs(60));
        let req = request("session-1", "Bash");
        let ticket = store.register(&req, 42).await;

        assert!(store.resolve(&req.id, Decision::Allow).await);
        assert_eq!(ticket.wait().await.unwrap(), Decision::Allow);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn second_resolve_is_a_noop() {
        let store = PendingStore::new(Duration::from_secs(60));
        let req = request("session-1", "Bash");
        let ticket = store.register(&req, 42).await;

        assert!(store.resolve(&req.id, Decision::Allow).await);
        assert!(!store.resolve(&req.id, Decision::Deny).await);
        // First decision stands.
        assert_eq!(ticket.wait().await.unwrap(), Decision::Allow);
    }

    #[tokio::test]
    async fn resolve_unknown_id_returns_false() {
        let store = PendingStore::new(Duration::from_secs(60));
        assert!(!store.resolve("never-registered", Decision::Allow).await);
    }

    #[tokio::test]
    async fn timeout_expires_request() {
        let store = PendingStore::new(Duration::from_millis(20));
        let req = request("session-1", "Bash");
        let ticket = store.register(&req, 42).await;

        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, PendingError::TimedOut { .. }));
        assert_eq!(store.count().await, 0);

        // Late reply after expiry is a no-op.
        assert!(!store.resolve(&req.id, Decision::Allow).await);
    }

    #[tokio::test]
    async fn timeout_never_fires_early() {
        let store = PendingStore::new(Duration::from_millis(100));
        let req = request("session-1", "Bash");
        let mut ticket = store.register(&req, 42).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Still pending well inside the window.
        assert!(ticket.rx.try_recv().is_err());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn resolve_wins_over_timer() {
        let store = PendingStore::new(Duration::from_millis(30));
        let req = request("session-1", "Bash");
        let ticket = store.register(&req, 42).await;

        assert!(store.resolve(&req.id, Decision::Deny).await);
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Timer fired after resolution and must not have overwritten it.
        assert_eq!(ticket.wait().await.unwrap(), Decision::Deny);
    }

    #[tokio::test]
    async fn clear_fails_all_outstanding() {
        let store = PendingStore::new(Duration::from_secs(60));
        let mut tickets = Vec::new();
        for _ in 0..3 {
            let req = request("session-1", "Bash");
            tickets.push(store.register(&req, 1).await);
        }

        assert_eq!(store.clear().await, 3);
        assert_eq!(store.count().await, 0);

        for ticket in tickets {
            assert!(matches!(
                ticket.wait().await.unwrap_err(),
                PendingError::Cleared { .. }
            ));
        }
    }

    #[tokio::test]
    async fn custom_text_decisions_pass_through() {
        let store = PendingStore::new(Duration::from_secs(60));
        let req = request("session-1", "Write");
        let ticket = store.register(&req, 7).await;

        store
            .resolve(&req.id, Decision::Custom("use a tempdir".to_string()))
            .await;
        assert_eq!(
            ticket.wait().await.unwrap(),
            Decision::Custom("use a tempdir".to_string())
        );
    }

    #[test]
    fn request_ids_are_unique() {
        let a = request("s", "Bash");
        let b = request("s", "Bash");
        assert_ne!(a.id, b.id);
    }
}
