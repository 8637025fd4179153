//! WebSocket message protocol
//!
//! Control messages travel as JSON text frames tagged by `type`. Process output
//! travels as raw binary frames and never goes through these types.

use serde::{Deserialize, Serialize};

/// Client -> Server control messages
///
/// Any text frame that does not parse as one of these is treated as raw input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Viewport change, forwarded to the process
    Resize { cols: u16, rows: u16 },
}

impl ClientMessage {
    /// Parse a text frame as a control message.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Server -> Client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Attached to a session
    Session {
        id: String,
        restored: bool,
        cwd: String,
    },
    /// The requested session no longer exists and could not be restored
    Gone { id: String },
    /// Wait flag transition
    State { waiting: bool },
    /// Live and saved session identifiers
    List { ids: Vec<String> },
    /// The session's process exited on its own
    Exit { id: String, code: Option<i32> },
    Error { message: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Plain enums of strings and numbers always serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_parses_from_client_frame() {
        let msg = ClientMessage::parse(r#"{"type":"resize","cols":120,"rows":40}"#);
        assert_eq!(
            msg,
            Some(ClientMessage::Resize {
                cols: 120,
                rows: 40
            })
        );
    }

    #[test]
    fn test_plain_text_is_not_a_control_message() {
        assert_eq!(ClientMessage::parse("ls -la\r"), None);
        assert_eq!(ClientMessage::parse(r#"{"type":"input"}"#), None);
        assert_eq!(ClientMessage::parse("{}"), None);
    }

    #[test]
    fn test_server_messages_use_type_tag() {
        let json = ServerMessage::Session {
            id: "a1b2c3d4".to_string(),
            restored: false,
            cwd: "/home/u/proj".to_string(),
        }
        .to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "session");
        assert_eq!(value["id"], "a1b2c3d4");
        assert_eq!(value["restored"], false);
        assert_eq!(value["cwd"], "/home/u/proj");

        let json = ServerMessage::State { waiting: true }.to_json();
        assert_eq!(json, r#"{"type":"state","waiting":true}"#);

        let json = ServerMessage::Gone {
            id: "a1b2c3d4".to_string(),
        }
        .to_json();
        assert_eq!(json, r#"{"type":"gone","id":"a1b2c3d4"}"#);
    }
}
