use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
            timestamp: unix_millis(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
            timestamp: unix_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub timestamp: i64,
}

/// All conversation state, owned by the application root and mutated only
/// through the methods below. No ambient globals.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Vec<ChatMessage>>,
    conversation_list: Vec<ConversationSummary>,
    active_id: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self, id: impl Into<String>) {
        self.active_id = Some(id.into());
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// Message lists are append-only in normal operation.
    pub fn append_message(&mut self, id: &str, message: ChatMessage) {
        self.conversations
            .entry(id.to_string())
            .or_default()
            .push(message);
    }

    /// Wholesale replacement, used only when history is fetched for `id`.
    pub fn replace_messages(&mut self, id: &str, messages: Vec<ChatMessage>) {
        self.conversations.insert(id.to_string(), messages);
    }

    pub fn set_conversation_list(&mut self, list: Vec<ConversationSummary>) {
        self.conversation_list = list;
    }

    pub fn conversation_list(&self) -> &[ConversationSummary] {
        &self.conversation_list
    }

    pub fn active_messages(&self) -> &[ChatMessage] {
        self.active_id
            .as_ref()
            .and_then(|id| self.conversations.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn messages(&self, id: &str) -> &[ChatMessage] {
        self.conversations.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn summary(&self, id: &str) -> Option<&ConversationSummary> {
        self.conversation_list.iter().find(|c| c.id == id)
    }

    /// Drops the summary entry and the message list; clears the active id if
    /// it pointed at the removed conversation.
    pub fn remove_conversation(&mut self, id: &str) {
        self.conversation_list.retain(|c| c.id != id);
        self.conversations.remove(id);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
    }
}

pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
