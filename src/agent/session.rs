//! Conversation memory keyed by session id.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use super::message::{ChatMessage, assistant_message, user_message};

/// Per-session conversation history.
pub trait ConversationStore: Send + Sync {
    /// Prior turns of `session_id`, oldest first.
    fn history(&self, session_id: &str) -> Vec<ChatMessage>;

    /// Records a completed exchange.
    fn append(&self, session_id: &str, question: &str, answer: &str);

    /// Forgets a session; returns whether it existed.
    fn clear(&self, session_id: &str) -> bool;
}

#[derive(Debug, Default)]
struct Session {
    turns: Vec<ChatMessage>,
    /// Value of the store's clock at the last append.
    touched: u64,
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<String, Session>,
    clock: u64,
}

/// Process-local store keeping the last `limit` messages per session and at
/// most `max_sessions` sessions. The session whose last exchange is oldest
/// is evicted first.
#[derive(Debug)]
pub struct InMemoryConversations {
    sessions: RwLock<Sessions>,
    limit: usize,
    max_sessions: usize,
}

impl InMemoryConversations {
    /// Creates a store trimming each session to `limit` messages and
    /// keeping at most `max_sessions` sessions.
    #[must_use]
    pub fn new(limit: usize, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            limit: limit.max(2),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .by_id
            .len()
    }

    /// Returns `true` if no session has history.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore for InMemoryConversations {
    fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .by_id
            .get(session_id)
            .map(|session| session.turns.clone())
            .unwrap_or_default()
    }

    fn append(&self, session_id: &str, question: &str, answer: &str) {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.clock += 1;
        let now = sessions.clock;

        if !sessions.by_id.contains_key(session_id) && sessions.by_id.len() >= self.max_sessions {
            let oldest = sessions
                .by_id
                .iter()
                .min_by_key(|(_, session)| session.touched)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!(session = %oldest, "evicting least recently used session");
                sessions.by_id.remove(&oldest);
            }
        }

        let session = sessions.by_id.entry(session_id.to_string()).or_default();
        session.touched = now;
        session.turns.push(user_message(question));
        session.turns.push(assistant_message(answer));
        if session.turns.len() > self.limit {
            let excess = session.turns.len() - self.limit;
            session.turns.drain(..excess);
        }
    }

    fn clear(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .by_id
            .remove(session_id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::Role;

    #[test]
    fn test_history_trimmed_to_limit() {
        let store = InMemoryConversations::new(4, 10);
        for i in 0..3 {
            store.append("s1", &format!("q{i}"), &format!("a{i}"));
        }
        let history = store.history("s1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q1");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[3].content, "a2");
    }

    #[test]
    fn test_sessions_are_isolated_and_clearable() {
        let store = InMemoryConversations::new(20, 10);
        store.append("s1", "q", "a");
        assert!(store.history("s2").is_empty());
        assert!(store.clear("s1"));
        assert!(!store.clear("s1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_least_recently_used_session_is_evicted() {
        let store = InMemoryConversations::new(20, 2);
        store.append("s1", "q", "a");
        store.append("s2", "q", "a");
        store.append("s1", "again", "a");
        store.append("s3", "q", "a");

        assert_eq!(store.len(), 2);
        assert_eq!(store.history("s1").len(), 4);
        assert!(store.history("s2").is_empty());
        assert_eq!(store.history("s3").len(), 2);
    }

    #[test]
    fn test_session_count_stays_bounded() {
        let store = InMemoryConversations::new(20, 50);
        for i in 0..500 {
            store.append(&format!("anon-{i}"), "q", "a");
        }
        assert_eq!(store.len(), 50);
        assert_eq!(store.history("anon-499").len(), 2);
        assert!(store.history("anon-0").is_empty());
    }
}
