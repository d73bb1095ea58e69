use crate::domain::types::{ChatMessage, MessageRole};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-conversation bounded message history.
///
/// Each conversation keeps at most `window` entries; trimming happens on
/// read, dropping the oldest entries first and never reordering. The number
/// of distinct conversation ids is itself capped: touching a conversation
/// refreshes its recency slot and the least recently used id is evicted once
/// the cap is exceeded.
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
    window: usize,
    max_conversations: usize,
}

struct StoreInner {
    conversations: HashMap<String, Vec<ChatMessage>>,
    recency: Vec<String>,
}

impl ConversationStore {
    pub fn new(window: usize, max_conversations: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                conversations: HashMap::new(),
                recency: Vec::new(),
            }),
            window,
            max_conversations,
        }
    }

    pub async fn append(&self, id: &str, role: MessageRole, content: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.touch(id, self.max_conversations);
        inner
            .conversations
            .entry(id.to_string())
            .or_default()
            .push(ChatMessage::new(role, content));
    }

    /// The most recent `window` entries for `id`, in original order.
    pub async fn history(&self, id: &str) -> Vec<ChatMessage> {
        let mut inner = self.inner.lock().await;
        if !inner.conversations.contains_key(id) {
            return Vec::new();
        }
        inner.touch(id, self.max_conversations);
        let window = self.window;
        let Some(messages) = inner.conversations.get_mut(id) else {
            return Vec::new();
        };
        if messages.len() > window {
            let excess = messages.len() - window;
            messages.drain(..excess);
        }
        messages.clone()
    }

    pub async fn clear(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.conversations.remove(id);
        inner.recency.retain(|entry| entry != id);
    }

    /// Drop the most recent entry, used to roll back a user message when the
    /// first completion call fails so the history stays consistent for retry.
    pub async fn pop_last(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(messages) = inner.conversations.get_mut(id) {
            messages.pop();
        }
    }
}

impl StoreInner {
    fn touch(&mut self, id: &str, max_conversations: usize) {
        if let Some(position) = self.recency.iter().position(|entry| entry == id) {
            self.recency.remove(position);
        }
        self.recency.push(id.to_string());

        while self.recency.len() > max_conversations {
            let evicted = self.recency.remove(0);
            self.conversations.remove(&evicted);
            debug!(conversation = %evicted, "Evicted least recently used conversation");
        }
    }
}
