//! Bounded rolling conversation history per chat identity.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

/// One remembered exchange.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub role: Role,
    pub identity: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ContextEntry {
    pub fn user(identity: impl Into<String>, text: impl Into<String>) -> Self {
        ContextEntry {
            role: Role::User,
            identity: identity.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn bot(identity: impl Into<String>, text: impl Into<String>) -> Self {
        ContextEntry {
            role: Role::Bot,
            identity: identity.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// In-memory per-identity history, capped FIFO at `capacity` entries.
/// No persistence and no cross-identity sharing.
pub struct ContextStore {
    contexts: DashMap<String, VecDeque<ContextEntry>>,
    capacity: usize,
}

impl ContextStore {
    pub fn new(capacity: usize) -> Self {
        ContextStore {
            contexts: DashMap::new(),
            capacity,
        }
    }

    /// Push one entry, evicting the oldest when the cap is exceeded.
    pub fn append(&self, identity: &str, entry: ContextEntry) {
        let mut context = self.contexts.entry(identity.to_string()).or_default();
        context.push_back(entry);
        while context.len() > self.capacity {
            context.pop_front();
        }
    }

    /// Current history for one identity, oldest first.
    pub fn get(&self, identity: &str) -> Vec<ContextEntry> {
        self.contexts
            .get(identity)
            .map(|context| context.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget one identity's history.
    pub fn clear(&self, identity: &str) {
        self.contexts.remove(identity);
    }

    /// Forget everything.
    pub fn clear_all(&self) {
        self.contexts.clear();
    }

    /// Number of identities currently holding context.
    pub fn tracked_identities(&self) -> usize {
        self.contexts.len()
    }

    /// Drop identities whose newest entry is older than `max_age`, so
    /// long-gone senders do not accumulate forever. Returns how many
    /// identities were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_age.as_secs() as i64);
        let before = self.contexts.len();
        self.contexts
            .retain(|_, context| context.back().is_some_and(|entry| entry.timestamp > cutoff));
        before - self.contexts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_history_fifo_oldest_first() {
        let store = ContextStore::new(5);
        for i in 0..7 {
            store.append("alice", ContextEntry::user("alice", format!("msg {i}")));
        }

        let history = store.get("alice");
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].text, "msg 2");
        assert_eq!(history[4].text, "msg 6");
    }

    #[test]
    fn identities_do_not_share_history() {
        let store = ContextStore::new(5);
        store.append("alice", ContextEntry::user("alice", "from alice"));
        store.append("bob", ContextEntry::user("bob", "from bob"));

        assert_eq!(store.get("alice").len(), 1);
        assert_eq!(store.get("bob").len(), 1);
        assert_eq!(store.get("carol").len(), 0);
        assert_eq!(store.tracked_identities(), 2);
    }

    #[test]
    fn clear_removes_one_identity() {
        let store = ContextStore::new(5);
        store.append("alice", ContextEntry::user("alice", "hi"));
        store.append("bob", ContextEntry::user("bob", "hi"));

        store.clear("alice");
        assert!(store.get("alice").is_empty());
        assert_eq!(store.get("bob").len(), 1);
    }

    #[test]
    fn prune_drops_idle_identities_but_keeps_active_ones() {
        let store = ContextStore::new(5);

        let mut stale = ContextEntry::user("alice", "from hours ago");
        stale.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.append("alice", stale);
        store.append("bob", ContextEntry::user("bob", "just now"));

        assert_eq!(store.prune(Duration::from_secs(3600)), 1);
        assert!(store.get("alice").is_empty());
        assert_eq!(store.get("bob").len(), 1);
        assert_eq!(store.tracked_identities(), 1);
    }

    #[test]
    fn preserves_roles_in_order() {
        let store = ContextStore::new(5);
        store.append("alice", ContextEntry::user("alice", "question"));
        store.append("alice", ContextEntry::bot("Mia", "answer"));

        let history = store.get("alice");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Bot);
        assert_eq!(history[1].identity, "Mia");
    }
}
