//! Push protocol message types
//!
//! Every frame is a JSON text frame `{"event": "<name>", "data": {...}}`.
//! Payload fields are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{Message, Thread};

/// Event names used on the wire
pub mod events {
    pub const JOIN_USER_ROOM: &str = "join_user_room";
    pub const JOIN_THREAD: &str = "join_thread";
    pub const LEAVE_THREAD: &str = "leave_thread";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STOP_TYPING: &str = "user_stop_typing";

    pub const NEW_MESSAGE: &str = "new_message";
    pub const NEW_THREAD: &str = "new_thread";
    pub const ADMIN_TYPING: &str = "admin_typing";
    pub const ADMIN_STOP_TYPING: &str = "admin_stop_typing";

    /// Lifecycle pseudo-events dispatched locally by the Connection Manager
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const CONNECT_ERROR: &str = "connect_error";
}

/// A named event with its JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Events sent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    JoinUserRoom { user_id: String },
    JoinThread { thread_id: String },
    LeaveThread { thread_id: String },
    UserTyping { thread_id: String },
    UserStopTyping { thread_id: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinUserRoom { .. } => events::JOIN_USER_ROOM,
            ClientEvent::JoinThread { .. } => events::JOIN_THREAD,
            ClientEvent::LeaveThread { .. } => events::LEAVE_THREAD,
            ClientEvent::UserTyping { .. } => events::USER_TYPING,
            ClientEvent::UserStopTyping { .. } => events::USER_STOP_TYPING,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let data = match self {
            ClientEvent::JoinUserRoom { user_id } => json!({ "userId": user_id }),
            ClientEvent::JoinThread { thread_id }
            | ClientEvent::LeaveThread { thread_id }
            | ClientEvent::UserTyping { thread_id }
            | ClientEvent::UserStopTyping { thread_id } => json!({ "threadId": thread_id }),
        };
        Envelope::new(self.name(), data)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub thread_id: String,
    pub message: Message,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewThreadPayload {
    pub thread_data: Thread,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRef {
    pub thread_id: String,
}

/// Events received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewMessage { thread_id: String, message: Message },
    NewThread { thread: Thread },
    AdminTyping { thread_id: String },
    AdminStopTyping { thread_id: String },
}

impl ServerEvent {
    /// Parse a known server event
    ///
    /// Returns `Ok(None)` for event names this client does not model.
    pub fn parse(event: &str, data: &Value) -> Result<Option<Self>, serde_json::Error> {
        let parsed = match event {
            events::NEW_MESSAGE => {
                let NewMessagePayload {
                    thread_id,
                    mut message,
                } = serde_json::from_value(data.clone())?;
                if message.thread_id.is_empty() {
                    message.thread_id = thread_id.clone();
                }
                ServerEvent::NewMessage { thread_id, message }
            }
            events::NEW_THREAD => {
                let payload: NewThreadPayload = serde_json::from_value(data.clone())?;
                ServerEvent::NewThread {
                    thread: payload.thread_data,
                }
            }
            events::ADMIN_TYPING => {
                let payload: ThreadRef = serde_json::from_value(data.clone())?;
                ServerEvent::AdminTyping {
                    thread_id: payload.thread_id,
                }
            }
            events::ADMIN_STOP_TYPING => {
                let payload: ThreadRef = serde_json::from_value(data.clone())?;
                ServerEvent::AdminStopTyping {
                    thread_id: payload.thread_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, serde_json::Error> {
        Self::parse(&envelope.event, &envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;

    #[test]
    fn test_client_event_encoding() {
        let frame = ClientEvent::JoinThread {
            thread_id: "t-1".to_string(),
        }
        .to_envelope()
        .encode()
        .unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "join_thread");
        assert_eq!(value["data"]["threadId"], "t-1");
    }

    #[test]
    fn test_join_user_room_payload() {
        let env = ClientEvent::JoinUserRoom {
            user_id: "u-7".to_string(),
        }
        .to_envelope();
        assert_eq!(env.event, events::JOIN_USER_ROOM);
        assert_eq!(env.data, json!({ "userId": "u-7" }));
    }

    #[test]
    fn test_new_message_fills_thread_id() {
        let frame = r#"{"event":"new_message","data":{"threadId":"t-9","message":{"sender":"agent","content":"On it","timestamp":"2024-05-01T12:00:00Z"}}}"#;
        let env = Envelope::decode(frame).unwrap();

        match ServerEvent::from_envelope(&env).unwrap() {
            Some(ServerEvent::NewMessage { thread_id, message }) => {
                assert_eq!(thread_id, "t-9");
                assert_eq!(message.thread_id, "t-9");
                assert_eq!(message.sender, Sender::Agent);
                assert!(!message.pending);
            }
            other => panic!("Expected NewMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_new_thread_payload() {
        let data = json!({
            "threadData": {
                "id": "t-3",
                "subject": "Shipping",
                "status": "pending",
                "lastUpdated": "2024-05-01T12:00:00Z"
            }
        });
        let event = ServerEvent::parse(events::NEW_THREAD, &data).unwrap().unwrap();
        match event {
            ServerEvent::NewThread { thread } => assert_eq!(thread.id, "t-3"),
            other => panic!("Expected NewThread, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_none() {
        assert!(ServerEvent::parse("thread_closed", &json!({}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(ServerEvent::parse(events::ADMIN_TYPING, &json!({ "thread": 1 })).is_err());
    }

    #[test]
    fn test_envelope_missing_data_defaults_to_null() {
        let env = Envelope::decode(r#"{"event":"connect"}"#).unwrap();
        assert_eq!(env.data, Value::Null);
    }
}
