use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::input::ChatMessageDraft;
use crate::models::ChatMessage;

/// Who is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Operator,
}

/// WebSocket frames (shared between server and client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "connect")]
    Connect {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename = "auth_response")]
    AuthResponse { success: bool, message: String },
    #[serde(rename = "append")]
    Append {
        request_id: u64,
        draft: ChatMessageDraft,
    },
    #[serde(rename = "appended")]
    Appended {
        request_id: u64,
        message: ChatMessage,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        subscription_id: u64,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { subscription_id: u64 },
    #[serde(rename = "snapshot")]
    Snapshot {
        subscription_id: u64,
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "mark_read")]
    MarkRead { request_id: u64, message_id: String },
    #[serde(rename = "delete_session")]
    DeleteSession { request_id: u64, session_id: String },
    #[serde(rename = "done")]
    Done {
        request_id: u64,
        #[serde(default)]
        count: Option<usize>,
    },
    #[serde(rename = "failure")]
    Failure {
        #[serde(default)]
        request_id: Option<u64>,
        kind: String,
        message: String,
    },
}

impl WsMessage {
    pub fn failure(request_id: Option<u64>, error: &ChatError) -> Self {
        WsMessage::Failure {
            request_id,
            kind: error.kind().to_string(),
            message: error.message().to_string(),
        }
    }

    /// Correlation id of a reply frame, if it is one.
    pub fn reply_to(&self) -> Option<u64> {
        match self {
            WsMessage::Appended { request_id, .. } | WsMessage::Done { request_id, .. } => {
                Some(*request_id)
            }
            WsMessage::Failure { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_message_serialization() {
        let msg = WsMessage::Connect {
            role: Role::Customer,
            token: None,
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connect\""));
        assert!(json.contains("\"role\":\"customer\""));
        assert!(!json.contains("token"));

        let parsed: WsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_append_from_frontend_format() {
        let json = r#"{
            "type": "append",
            "request_id": 7,
            "draft": {
                "session_id": "abc",
                "message": "Do you have rye today?",
                "is_customer_authored": true
            }
        }"#;
        let msg: WsMessage = serde_json::from_str(json).unwrap();
        if let WsMessage::Append { request_id, draft } = msg {
            assert_eq!(request_id, 7);
            assert_eq!(draft.session_id, "abc");
            assert!(draft.attachments.is_empty());
        } else {
            panic!("Expected Append");
        }
    }

    #[test]
    fn test_subscribe_defaults_to_global_feed() {
        let msg: WsMessage = serde_json::from_str(r#"{"type":"subscribe","subscription_id":3}"#).unwrap();
        assert_eq!(
            msg,
            WsMessage::Subscribe {
                subscription_id: 3,
                session_id: None,
                limit: None
            }
        );
    }

    #[test]
    fn test_failure_carries_error_kind() {
        let msg = WsMessage::failure(Some(9), &ChatError::NotFound("Message m1".into()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"failure\""));
        assert!(json.contains("\"kind\":\"not_found\""));
        assert_eq!(msg.reply_to(), Some(9));
    }

    #[test]
    fn test_reply_to() {
        assert_eq!(WsMessage::Done { request_id: 4, count: None }.reply_to(), Some(4));
        assert_eq!(
            WsMessage::Unsubscribe { subscription_id: 4 }.reply_to(),
            None
        );
        assert_eq!(
            WsMessage::Failure {
                request_id: None,
                kind: "forbidden".into(),
                message: "nope".into()
            }
            .reply_to(),
            None
        );
    }
}
