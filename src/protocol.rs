//! Wire protocol between the chat client and the relay
//!
//! Every WebSocket text message is one JSON-encoded [`Frame`], tagged by
//! its `type` field:
//!
//! | direction        | type            | fields            |
//! |------------------|-----------------|-------------------|
//! | client → server  | `chat_message`  | `message: string` |
//! | server → client  | `typing_start`  | none              |
//! | server → client  | `chat_response` | `message: string` |
//! | either           | `error`         | `message: string` |

use serde::{Deserialize, Serialize};

/// One JSON text frame on the chat WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// User text to forward to the agent
    ChatMessage { message: String },
    /// Agent reply
    ChatResponse { message: String },
    /// The agent has started working on a message
    TypingStart,
    /// Protocol or processing error
    Error { message: String },
}

impl Frame {
    pub fn chat_message(message: impl Into<String>) -> Self {
        Frame::ChatMessage {
            message: message.into(),
        }
    }

    pub fn chat_response(message: impl Into<String>) -> Self {
        Frame::ChatResponse {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    /// Wire name of the frame type
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::ChatMessage { .. } => "chat_message",
            Frame::ChatResponse { .. } => "chat_response",
            Frame::TypingStart => "typing_start",
            Frame::Error { .. } => "error",
        }
    }

    /// Parse a frame from JSON text
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the frame as JSON text
    pub fn to_json(&self) -> String {
        // A Frame holds only strings; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_wire_format() {
        let frame: Frame = serde_json::from_str(r#"{"type":"chat_message","message":"hi"}"#).unwrap();
        assert_eq!(frame, Frame::chat_message("hi"));
    }

    #[test]
    fn test_typing_start_has_no_fields() {
        assert_eq!(Frame::TypingStart.to_json(), r#"{"type":"typing_start"}"#);
    }

    #[test]
    fn test_response_and_error_serialize_message() {
        let json: serde_json::Value =
            serde_json::from_str(&Frame::chat_response("Hello").to_json()).unwrap();
        assert_eq!(json["type"], "chat_response");
        assert_eq!(json["message"], "Hello");

        let json: serde_json::Value = serde_json::from_str(&Frame::error("boom").to_json()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Frame::parse(r#"{"type":"ping"}"#).is_err());
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse(r#"{"type":"chat_message"}"#).is_err());
    }

    #[test]
    fn test_kind_matches_tag() {
        for frame in [
            Frame::chat_message("a"),
            Frame::chat_response("b"),
            Frame::TypingStart,
            Frame::error("c"),
        ] {
            let json: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
            assert_eq!(json["type"], frame.kind());
        }
    }
}
