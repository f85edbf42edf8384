//! Append-only chat message log

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Author shown on system lines
pub const SYSTEM_AUTHOR: &str = "system";

/// Who a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    /// Sent by the local user
    User,
    /// Relayed from another user
    Other,
    /// Generated by the bridge
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub origin: MessageOrigin,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>, origin: MessageOrigin) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            timestamp: Utc::now(),
            origin,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_AUTHOR, text, MessageOrigin::System)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return the stored copy
    pub fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_preserves_order() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::new("bob", "one", MessageOrigin::Other));
        log.push(ChatMessage::system("two"));

        let texts: Vec<&str> = log.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(log.last().map(|m| m.origin), Some(MessageOrigin::System));
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut log = MessageLog::new();
        for i in 0..5 {
            log.push(ChatMessage::system(format!("line {}", i)));
        }
        let stamps: Vec<_> = log.messages().iter().map(|m| m.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_serializes_origin_lowercase() {
        let message = ChatMessage::new("alice", "hi", MessageOrigin::User);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["origin"], "user");
        assert_eq!(json["author"], "alice");
    }
}
