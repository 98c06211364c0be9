//! Inbound message envelope and reply types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// Inbound message as received from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default)]
    pub payload: Value,

    /// Echoed back on the reply when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<Value>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Message types the dispatcher understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    AgentTask,
    BrowserAction,
    ToolRequest,
}

impl MessageType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AGENT_TASK" => Some(Self::AgentTask),
            "BROWSER_ACTION" => Some(Self::BrowserAction),
            "MCP_REQUEST" => Some(Self::ToolRequest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentTask => "AGENT_TASK",
            Self::BrowserAction => "BROWSER_ACTION",
            Self::ToolRequest => "MCP_REQUEST",
        }
    }
}

/// Reply sent back for every inbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    #[serde(rename_all = "camelCase")]
    Success {
        result: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        code: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },
}

impl Reply {
    pub fn success(result: Value, request_id: Option<Value>) -> Self {
        Self::Success { result, request_id }
    }

    pub fn error(error: &DispatchError, request_id: Option<Value>) -> Self {
        Self::Error {
            error: error.to_string(),
            code: error.code(),
            request_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Error code for error replies
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Error { code, .. } => Some(*code),
            Self::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_parses_with_and_without_request_id() {
        let bare: Envelope =
            serde_json::from_value(json!({"type": "AGENT_TASK", "payload": {}})).unwrap();
        assert!(bare.request_id.is_none());

        let tagged: Envelope = serde_json::from_value(
            json!({"type": "MCP_REQUEST", "payload": {}, "requestId": "r-1"}),
        )
        .unwrap();
        assert_eq!(tagged.request_id, Some(json!("r-1")));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let envelope: Envelope = serde_json::from_value(json!({"type": "PING"})).unwrap();
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn message_type_names() {
        assert_eq!(MessageType::parse("MCP_REQUEST"), Some(MessageType::ToolRequest));
        assert_eq!(MessageType::ToolRequest.as_str(), "MCP_REQUEST");
        assert_eq!(MessageType::parse("agent_task"), None);
    }

    #[test]
    fn unknown_type_reply_format() {
        let reply = Reply::error(
            &DispatchError::UnknownMessageType("PING".to_string()),
            None,
        );
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json, json!({"error": "Unknown message type", "code": "UnknownMessageType"}));
    }

    #[test]
    fn success_reply_echoes_request_id() {
        let reply = Reply::success(json!({"ok": true}), Some(json!(7)));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["requestId"], 7);
        assert_eq!(json["result"]["ok"], true);
        assert!(!reply.is_error());
    }
}
