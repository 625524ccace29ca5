//! Chat transcript mirroring: every consult round and reply is mirrored
//! into a chat-style transcript for human review. Mirroring must never
//! interrupt the retry loop, so the trait itself has no error return.
//! Implementations swallow and log their own failures.

use std::sync::Mutex;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub meta: Value,
}

pub trait ChatAdapter: Send + Sync {
    fn add_message(&self, role: &str, content: &str, meta: Value);
}

/// In-memory transcript, used by the orchestrator when no external chat
/// sink is configured and by tests asserting on what was mirrored.
#[derive(Default)]
pub struct InMemoryChatAdapter {
    messages: Mutex<Vec<ChatMessage>>,
}

impl InMemoryChatAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl ChatAdapter for InMemoryChatAdapter {
    fn add_message(&self, role: &str, content: &str, meta: Value) {
        let message = ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
            meta,
        };
        match self.messages.lock() {
            Ok(mut guard) => guard.push(message),
            Err(_) => tracing::warn!("chat adapter transcript lock poisoned, dropping message"),
        }
    }
}

/// Sink that discards everything; used when no transcript is wanted.
pub struct NullChatAdapter;

impl ChatAdapter for NullChatAdapter {
    fn add_message(&self, _role: &str, _content: &str, _meta: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_adapter_records_messages_in_order() {
        let adapter = InMemoryChatAdapter::new();
        adapter.add_message("assistant", "attempt 1", json!({"attempt": 1}));
        adapter.add_message("assistant", "attempt 2", json!({"attempt": 2}));
        let transcript = adapter.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "attempt 1");
    }

    #[test]
    fn null_adapter_never_panics() {
        let adapter = NullChatAdapter;
        adapter.add_message("user", "anything", json!(null));
    }
}
