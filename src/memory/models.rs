//! Conversation memory records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role};

/// One persisted chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// What the prompt needs to know about earlier turns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryContext {
    /// Rolling summary of compacted turns
    pub summary: Option<String>,
    /// Verbatim turns, oldest first
    pub messages: Vec<StoredMessage>,
    /// Whether this load folded older turns into the summary
    pub compacted: bool,
}

impl MemoryContext {
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(StoredMessage::to_chat_message).collect()
    }
}
