use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Chat,
    Join,
    Leave,
    Private,
}

/// Chat message as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(message_type: MessageType, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_type,
            sender: sender.into(),
            content: content.into(),
            recipient: None,
            timestamp: Utc::now(),
        }
    }

    pub fn join(sender: &str) -> Self {
        Self::new(MessageType::Join, sender, format!("{sender} joined"))
    }

    pub fn leave(sender: &str) -> Self {
        Self::new(MessageType::Leave, sender, format!("{sender} left"))
    }

    pub fn private(sender: &str, recipient: &str, content: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.to_string()),
            ..Self::new(MessageType::Private, sender, content)
        }
    }
}

/// Body of a client `SEND` to an application destination.
///
/// Any `sender` or `type` the client includes is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub recipient: Option<String>,
}
