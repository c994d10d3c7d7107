//! ESL wire frames: headers plus an optional content-length-delimited body.

use crate::constants::{
    CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
    CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_LOG_DATA, CONTENT_TYPE_RUDE_REJECTION,
    CONTENT_TYPE_TEXT_EVENT_JSON, CONTENT_TYPE_TEXT_EVENT_PLAIN, HEADER_CONTENT_LENGTH,
    HEADER_CONTENT_TYPE, HEADER_REPLY_TEXT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frame classification from the `Content-Type` header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContentType {
    /// Server solicits authentication (inbound mode).
    AuthRequest,
    /// Synchronous reply to a socket command.
    CommandReply,
    /// Synchronous reply to an `api` invocation.
    ApiResponse,
    /// Asynchronous event, plain text payload.
    EventPlain,
    /// Asynchronous event, JSON payload.
    EventJson,
    /// Graceful close from the server.
    DisconnectNotice,
    /// Connection refused by the server ACL.
    RudeRejection,
    /// Forwarded server log line.
    LogData,
    /// Anything else; preserved verbatim.
    Unknown(String),
}

impl ContentType {
    /// Classify a `Content-Type` header value (bytewise comparison).
    pub fn from_header(value: &str) -> Self {
        match value {
            CONTENT_TYPE_AUTH_REQUEST => ContentType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => ContentType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => ContentType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN => ContentType::EventPlain,
            CONTENT_TYPE_TEXT_EVENT_JSON => ContentType::EventJson,
            CONTENT_TYPE_DISCONNECT_NOTICE => ContentType::DisconnectNotice,
            CONTENT_TYPE_RUDE_REJECTION => ContentType::RudeRejection,
            CONTENT_TYPE_LOG_DATA => ContentType::LogData,
            other => ContentType::Unknown(other.to_string()),
        }
    }
}

/// A single parsed ESL frame.
///
/// Header keys are case-preserving and lookups are case-sensitive, per the
/// wire convention. Duplicate keys resolve last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicMessage {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl BasicMessage {
    pub(crate) fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        Self { headers, body }
    }

    /// Look up a header by name (case-sensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|s| s.as_str())
    }

    /// All headers as a map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Frame body, if the frame carried a `Content-Length`.
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Decompose into headers and body.
    pub fn into_parts(self) -> (HashMap<String, String>, Option<String>) {
        (self.headers, self.body)
    }

    /// Classified `Content-Type`.
    pub fn content_type(&self) -> ContentType {
        self.header(HEADER_CONTENT_TYPE)
            .map(ContentType::from_header)
            .unwrap_or_else(|| ContentType::Unknown(String::new()))
    }

    /// Parsed `Content-Length`, absent header reads as 0.
    pub fn content_length(&self) -> usize {
        self.header(HEADER_CONTENT_LENGTH)
            .and_then(|v| {
                v.trim()
                    .parse()
                    .ok()
            })
            .unwrap_or(0)
    }

    /// Raw `Reply-Text` header value.
    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(pairs: &[(&str, &str)], body: Option<&str>) -> BasicMessage {
        let headers = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BasicMessage::new(headers, body.map(|b| b.to_string()))
    }

    #[test]
    fn content_type_classification() {
        assert_eq!(
            ContentType::from_header("auth/request"),
            ContentType::AuthRequest
        );
        assert_eq!(
            ContentType::from_header("command/reply"),
            ContentType::CommandReply
        );
        assert_eq!(
            ContentType::from_header("api/response"),
            ContentType::ApiResponse
        );
        assert_eq!(
            ContentType::from_header("text/event-plain"),
            ContentType::EventPlain
        );
        assert_eq!(
            ContentType::from_header("text/disconnect-notice"),
            ContentType::DisconnectNotice
        );
        assert_eq!(
            ContentType::from_header("application/x-whatever"),
            ContentType::Unknown("application/x-whatever".to_string())
        );
    }

    #[test]
    fn content_length_absent_is_zero() {
        let msg = message(&[("Content-Type", "command/reply")], None);
        assert_eq!(msg.content_length(), 0);
    }

    #[test]
    fn content_length_parsed() {
        let msg = message(
            &[("Content-Type", "api/response"), ("Content-Length", "42")],
            None,
        );
        assert_eq!(msg.content_length(), 42);
    }

    #[test]
    fn header_lookup_is_case_sensitive() {
        let msg = message(&[("Reply-Text", "+OK")], None);
        assert_eq!(msg.header("Reply-Text"), Some("+OK"));
        assert_eq!(msg.header("reply-text"), None);
        assert_eq!(msg.reply_text(), Some("+OK"));
    }
}
