use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::utils::validation::{MAX_ATTACHMENT_NAME_LENGTH, MAX_URL_LENGTH};

/// A file already placed in object storage and referenced from a message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct Attachment {
    #[garde(length(min = 1, max = MAX_ATTACHMENT_NAME_LENGTH))]
    pub name: String,
    #[garde(skip)]
    pub media_type: String,
    #[garde(length(min = 1, max = MAX_URL_LENGTH))]
    pub url: String,
    /// Unknown for catalog images that were never uploaded through the chat.
    #[garde(skip)]
    pub size_bytes: Option<u64>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image")
    }
}

/// One entry of the remote message log.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
    pub is_customer_authored: bool,
    /// Always true for operator-authored messages.
    #[serde(default)]
    pub read_by_operator: bool,
}

impl ChatMessage {
    /// Customer-authored and not yet seen by an operator.
    pub fn is_unread(&self) -> bool {
        self.is_customer_authored && !self.read_by_operator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unread_only_for_customer_messages() {
        let mut msg = ChatMessage {
            id: "m1".to_string(),
            session_id: "abc".to_string(),
            message: "Hi".to_string(),
            attachments: vec![],
            timestamp: Utc::now(),
            is_customer_authored: true,
            read_by_operator: false,
        };
        assert!(msg.is_unread());

        msg.read_by_operator = true;
        assert!(!msg.is_unread());

        msg.is_customer_authored = false;
        msg.read_by_operator = false;
        assert!(!msg.is_unread());
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = r#"{
            "id": "m1",
            "session_id": "abc",
            "message": "Hi",
            "timestamp": "2026-10-19T08:30:00.000Z",
            "is_customer_authored": true
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(msg.attachments.is_empty());
        assert!(!msg.read_by_operator);
    }
}
