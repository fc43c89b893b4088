use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

/// What the store knows about one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub vendor_session_id: Option<String>,
    pub parent_message_id: Option<String>,
}

/// Maps a caller's session key to the vendor session and the id of the last
/// assistant message, so the next turn can continue the same thread.
///
/// One store per runtime, shared by reference. Concurrent turns on the same
/// key are last-write-wins.
#[derive(Debug, Default)]
pub struct SessionStore {
    entries: RwLock<FxHashMap<String, SessionSnapshot>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> SessionSnapshot {
        self.entries.read().get(key).cloned().unwrap_or_default()
    }

    /// Bind `key` to a freshly created vendor session. Any parent id recorded
    /// for an earlier session is forgotten.
    pub fn record_new_session(&self, key: &str, vendor_session_id: &str) {
        debug!(key, vendor_session_id, "recording new vendor session");
        self.entries.write().insert(
            key.to_string(),
            SessionSnapshot {
                vendor_session_id: Some(vendor_session_id.to_string()),
                parent_message_id: None,
            },
        );
    }

    /// Record the parent id a response declared. Returns whether it changed.
    pub fn record_parent(&self, key: &str, parent_message_id: &str) -> bool {
        if self.get(key).parent_message_id.as_deref() == Some(parent_message_id) {
            return false;
        }
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_default();
        if entry.parent_message_id.as_deref() == Some(parent_message_id) {
            return false;
        }
        entry.parent_message_id = Some(parent_message_id.to_string());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unknown_key_is_empty() {
        let store = SessionStore::new();
        assert_eq!(store.get("nope"), SessionSnapshot::default());
        assert!(store.is_empty());
    }

    #[test]
    fn new_session_clears_parent() {
        let store = SessionStore::new();
        store.record_new_session("k", "s1");
        assert!(store.record_parent("k", "7"));
        store.record_new_session("k", "s2");
        let snap = store.get("k");
        assert_eq!(snap.vendor_session_id.as_deref(), Some("s2"));
        assert_eq!(snap.parent_message_id, None);
    }

    #[test]
    fn record_parent_is_idempotent() {
        let store = SessionStore::new();
        store.record_new_session("k", "s1");
        assert!(store.record_parent("k", "7"));
        assert!(!store.record_parent("k", "7"));
        assert!(store.record_parent("k", "8"));
        assert_eq!(store.get("k").parent_message_id.as_deref(), Some("8"));
    }

    #[test]
    fn keys_are_independent() {
        let store = SessionStore::new();
        store.record_new_session("a", "s-a");
        store.record_new_session("b", "s-b");
        store.record_parent("a", "1");
        assert_eq!(store.get("b").parent_message_id, None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn shared_across_threads() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.record_new_session(&format!("k{i}"), "s");
                    store.record_parent(&format!("k{i}"), &i.to_string());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 4);
        assert_eq!(store.get("k2").parent_message_id.as_deref(), Some("2"));
    }
}
