//! Request-id to native-message-id correlation table.
//!
//! Owned by the channel backend: only the backend knows native message
//! ids. Grows on every permission send, shrinks on every terminal edit.
//! Inbound replies and callbacks are matched against this table, not the
//! pending store.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use super::MessageId;

/// Bidirectional map between request ids and native message ids.
///
/// Uses a std mutex: critical sections are map operations only, nothing
/// awaits while holding the lock.
#[derive(Default)]
pub struct CorrelationTable {
    inner: Mutex<Maps>,
}

#[derive(Default)]
struct Maps {
    by_request: HashMap<String, MessageId>,
    by_message: HashMap<MessageId, String>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `request_id` was sent as `message_id`.
    pub fn insert(&self, request_id: &str, message_id: MessageId) {
        let mut maps = lock(&self.inner);
        maps.by_request.insert(request_id.to_string(), message_id);
        maps.by_message.insert(message_id, request_id.to_string());
        debug!(request_id, message_id, "Correlation registered");
    }

    /// Find the request a native message id belongs to.
    pub fn request_for_message(&self, message_id: MessageId) -> Option<String> {
        lock(&self.inner).by_message.get(&message_id).cloned()
    }

    /// Find the native message id a request was sent as.
    pub fn message_for_request(&self, request_id: &str) -> Option<MessageId> {
        lock(&self.inner).by_request.get(request_id).copied()
    }

    /// Drop the entry for a native message id, both directions.
    pub fn remove_by_message(&self, message_id: MessageId) -> Option<String> {
        let mut maps = lock(&self.inner);
        let request_id = maps.by_message.remove(&message_id)?;
        maps.by_request.remove(&request_id);
        debug!(request_id, message_id, "Correlation removed");
        Some(request_id)
    }

    /// Number of outstanding correlations.
    pub fn len(&self) -> usize {
        lock(&self.inner).by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock helper tolerating poisoning: the maps stay usable even if a
/// holder panicked.
fn lock(mutex: &Mutex<Maps>) -> std::sync::MutexGuard<'_, Maps> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_both_directions() {
        let table = CorrelationTable::new();
        table.insert("req-1", 42);

        assert_eq!(table.request_for_message(42), Some("req-1".to_string()));
        assert_eq!(table.message_for_request("req-1"), Some(42));
    }

    #[test]
    fn remove_clears_both_directions() {
        let table = CorrelationTable::new();
        table.insert("req-1", 42);

        assert_eq!(table.remove_by_message(42), Some("req-1".to_string()));
        assert_eq!(table.request_for_message(42), None);
        assert_eq!(table.message_for_request("req-1"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn stale_id_never_matches_twice() {
        let table = CorrelationTable::new();
        table.insert("req-1", 42);

        assert!(table.remove_by_message(42).is_some());
        assert!(table.remove_by_message(42).is_none());
    }

    #[test]
    fn unknown_message_id_is_a_miss() {
        let table = CorrelationTable::new();
        assert_eq!(table.request_for_message(7), None);
    }
}
