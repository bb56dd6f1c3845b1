//! Scoped conversation memory
//!
//! One bounded message window per (session, chat) scope. All writes to a
//! scope go through that scope's async mutex, so overlapping requests on
//! the same conversation serialize instead of interleaving partial
//! exchanges.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::providers::{ChatMessage, ChatRole};
use crate::types::ScopeKey;

pub const DEFAULT_WINDOW: usize = 20;

#[derive(Debug, Default)]
struct ScopeWindow {
    messages: VecDeque<ChatMessage>,
}

impl ScopeWindow {
    fn push_bounded(&mut self, message: ChatMessage, max: usize) {
        self.messages.push_back(message);
        while self.messages.len() > max {
            self.messages.pop_front();
        }
    }
}

/// All conversation windows, keyed by scope.
pub struct SessionMemory {
    scopes: DashMap<ScopeKey, Arc<Mutex<ScopeWindow>>>,
    max_messages: usize,
}

impl SessionMemory {
    /// A window smaller than one exchange pair is useless, so 2 is the floor.
    pub fn new(max_messages: usize) -> Self {
        Self {
            scopes: DashMap::new(),
            max_messages: max_messages.max(2),
        }
    }

    fn window(&self, scope: &ScopeKey) -> Arc<Mutex<ScopeWindow>> {
        self.scopes
            .entry(scope.clone())
            .or_insert_with(Default::default)
            .clone()
    }

    /// Append one message, evicting the oldest beyond the window.
    pub async fn append(&self, scope: &ScopeKey, message: ChatMessage) {
        let window = self.window(scope);
        let mut guard = window.lock().await;
        guard.push_bounded(message, self.max_messages);
    }

    /// Commit a finished exchange as one atomic pair. Nothing is written
    /// for a failed call, so a scope never holds half an exchange.
    pub async fn commit_exchange(&self, scope: &ScopeKey, user: ChatMessage, assistant: ChatMessage) {
        let window = self.window(scope);
        let mut guard = window.lock().await;
        guard.push_bounded(user, self.max_messages);
        guard.push_bounded(assistant, self.max_messages);
        debug!("scope {} holds {} messages", scope, guard.messages.len());
    }

    /// Snapshot of a scope's history, oldest first.
    pub async fn history(&self, scope: &ScopeKey) -> Vec<ChatMessage> {
        let window = match self.scopes.get(scope) {
            Some(entry) => entry.value().clone(),
            None => return Vec::new(),
        };
        let guard = window.lock().await;
        guard.messages.iter().cloned().collect()
    }

    /// Drop a scope's history entirely.
    pub fn clear(&self, scope: &ScopeKey) {
        self.scopes.remove(scope);
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

/// Retag roles so no two consecutive messages share one.
///
/// Strict backends reject windows where eviction or fan-out left same-role
/// neighbors. Walks backward flipping the earlier of each violating pair,
/// which keeps the final message (the prompt being sent) untouched.
pub fn enforce_alternation(messages: &mut [ChatMessage]) {
    for i in (1..messages.len()).rev() {
        if messages[i].role == messages[i - 1].role && messages[i].role != ChatRole::System {
            messages[i - 1].role = messages[i - 1].role.flipped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(chat: Option<&str>) -> ScopeKey {
        ScopeKey::new("sess-1", chat.map(str::to_string))
    }

    fn roles(messages: &[ChatMessage]) -> Vec<ChatRole> {
        messages.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_append_and_history_roundtrip() {
        let memory = SessionMemory::new(10);
        let key = scope(Some("chat-1"));
        memory.append(&key, ChatMessage::user("one")).await;
        memory.append(&key, ChatMessage::assistant("two")).await;

        let history = memory.history(&key).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "one");
        assert_eq!(history[1].content, "two");
    }

    #[tokio::test]
    async fn test_window_evicts_oldest() {
        let memory = SessionMemory::new(4);
        let key = scope(None);
        for i in 0..6 {
            memory.append(&key, ChatMessage::user(format!("m{i}"))).await;
        }
        let history = memory.history(&key).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "m2");
        assert_eq!(history[3].content, "m5");
    }

    #[tokio::test]
    async fn test_chat_scopes_are_isolated() {
        let memory = SessionMemory::new(10);
        let a = scope(Some("chat-a"));
        let b = scope(Some("chat-b"));
        let default = scope(None);

        memory.append(&a, ChatMessage::user("for a")).await;
        memory.append(&default, ChatMessage::user("for default")).await;

        assert_eq!(memory.history(&a).await.len(), 1);
        assert!(memory.history(&b).await.is_empty());
        assert_eq!(memory.history(&default).await.len(), 1);
        assert_eq!(memory.history(&default).await[0].content, "for default");
    }

    #[tokio::test]
    async fn test_clear_drops_scope() {
        let memory = SessionMemory::new(10);
        let key = scope(Some("chat-1"));
        memory.append(&key, ChatMessage::user("gone")).await;
        memory.clear(&key);
        assert!(memory.history(&key).await.is_empty());
        assert_eq!(memory.scope_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_exchange_is_a_pair() {
        let memory = SessionMemory::new(10);
        let key = scope(Some("chat-1"));
        memory
            .commit_exchange(&key, ChatMessage::user("q"), ChatMessage::assistant("a"))
            .await;

        let history = memory.history(&key).await;
        assert_eq!(roles(&history), vec![ChatRole::User, ChatRole::Assistant]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_serialize() {
        let memory = Arc::new(SessionMemory::new(200));
        let key = scope(Some("busy"));

        let mut handles = Vec::new();
        for i in 0..100 {
            let memory = Arc::clone(&memory);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                memory
                    .commit_exchange(
                        &key,
                        ChatMessage::user(format!("q{i}")),
                        ChatMessage::assistant(format!("a{i}")),
                    )
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = memory.history(&key).await;
        assert_eq!(history.len(), 200);
        // Pairs never interleave: every user message is followed by its reply.
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, ChatRole::User);
            assert_eq!(pair[1].role, ChatRole::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }

    #[test]
    fn test_alternation_keeps_valid_sequences() {
        let mut messages = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ];
        enforce_alternation(&mut messages);
        assert_eq!(
            roles(&messages),
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
    }

    #[test]
    fn test_alternation_retags_doubled_user() {
        let mut messages = vec![ChatMessage::user("old"), ChatMessage::user("new")];
        enforce_alternation(&mut messages);
        // The message being sent keeps its role; the older one flips.
        assert_eq!(roles(&messages), vec![ChatRole::Assistant, ChatRole::User]);
        assert_eq!(messages[1].content, "new");
    }

    #[test]
    fn test_alternation_cascades() {
        let mut messages = vec![
            ChatMessage::user("1"),
            ChatMessage::user("2"),
            ChatMessage::user("3"),
        ];
        enforce_alternation(&mut messages);
        assert_eq!(
            roles(&messages),
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
    }

    #[test]
    fn test_alternation_ignores_system() {
        let mut messages = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "s1".to_string(),
            },
            ChatMessage {
                role: ChatRole::System,
                content: "s2".to_string(),
            },
            ChatMessage::user("q"),
        ];
        enforce_alternation(&mut messages);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::System);
    }
}
