//! Event payloads parsed out of ESL frames.

use crate::{
    constants::{
        CHANNEL_VARIABLE_PREFIX, HEADER_ANSWER_STATE, HEADER_APPLICATION, HEADER_CALLER_UNIQUE_ID,
        HEADER_CHANNEL_STATE, HEADER_CONTENT_LENGTH, HEADER_EVENT_NAME, HEADER_HANGUP_CAUSE,
        HEADER_JOB_UUID, HEADER_UNIQUE_ID,
    },
    error::{EslError, EslResult},
    message::{BasicMessage, ContentType},
    parser::parse_header_block,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One FreeSWITCH event: a header map plus an optional body.
///
/// Built from a `text/event-plain` or `text/event-json` frame, or from the
/// `command/reply` returned by `connect` on an outbound socket (FreeSWITCH
/// hoists the `CHANNEL_DATA` event headers directly into that reply).
///
/// Event names, channel states and hangup causes are opaque strings; this
/// type preserves what the wire carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EventMessage {
    fn build(mut headers: HashMap<String, String>, body: Option<String>) -> Self {
        // Event-Name tokens are uppercase on the wire; normalize so
        // correlation never depends on server casing.
        if let Some(name) = headers.get_mut(HEADER_EVENT_NAME) {
            name.make_ascii_uppercase();
        }
        Self { headers, body }
    }

    /// Parse an event out of a framed message, according to its content type.
    ///
    /// `command/reply` frames qualify only when they already carry an
    /// `Event-Name` header (the `CHANNEL_DATA` reply to `connect`); their
    /// headers become the event headers verbatim.
    pub fn from_message(message: BasicMessage) -> EslResult<Self> {
        match message.content_type() {
            ContentType::CommandReply => {
                if message
                    .header(HEADER_EVENT_NAME)
                    .is_none()
                {
                    return Err(EslError::protocol_error(
                        "command/reply without Event-Name is not an event",
                    ));
                }
                let (headers, body) = message.into_parts();
                Ok(Self::build(headers, body))
            }
            ContentType::EventPlain => {
                let (_, body) = message.into_parts();
                let body = body.ok_or_else(|| EslError::protocol_error("plain event missing body"))?;
                Self::from_plain_body(&body)
            }
            ContentType::EventJson => {
                let (_, body) = message.into_parts();
                let body = body.ok_or_else(|| EslError::protocol_error("JSON event missing body"))?;
                Self::from_json_body(&body)
            }
            other => Err(EslError::protocol_error(format!(
                "not an event frame: {:?}",
                other
            ))),
        }
    }

    /// Parse the plain-text event payload: a `\n\n`-terminated header block,
    /// optionally followed by a sub-body of exactly the nested
    /// `Content-Length` bytes. A single trailing `\n\n` after the sub-body
    /// is discarded.
    fn from_plain_body(body: &str) -> EslResult<Self> {
        let (header_block, rest) = match body.find("\n\n") {
            Some(pos) => (&body[..pos], &body[pos + 2..]),
            None => (body, ""),
        };

        let headers = parse_header_block(header_block)?;

        let sub_body = match headers.get(HEADER_CONTENT_LENGTH) {
            Some(raw) => {
                let length: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| EslError::InvalidHeader {
                        header: format!("{}: {}", HEADER_CONTENT_LENGTH, raw),
                    })?;
                // Exact-length slice; the sub-body may itself contain blank
                // lines, so searching for a terminator would truncate it.
                let sub = rest
                    .get(..length)
                    .ok_or_else(|| {
                        EslError::protocol_error(format!(
                            "event sub-body truncated: expected {} bytes, got {}",
                            length,
                            rest.len()
                        ))
                    })?;
                Some(sub.to_string())
            }
            None if !rest.is_empty() => Some(rest.to_string()),
            None => None,
        };

        Ok(Self::build(headers, sub_body))
    }

    /// Parse the JSON event payload. The `_body` key, when present, becomes
    /// the event body; every other key is an event header.
    fn from_json_body(body: &str) -> EslResult<Self> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        let object = value
            .as_object()
            .ok_or_else(|| EslError::protocol_error("JSON event is not an object"))?;

        let mut headers = HashMap::new();
        let mut event_body = None;
        for (key, value) in object {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if key == "_body" {
                event_body = Some(value);
            } else {
                headers.insert(key.clone(), value);
            }
        }

        Ok(Self::build(headers, event_body))
    }

    /// Look up a header by name (case-sensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|s| s.as_str())
    }

    /// All event headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Event body (e.g. the command output on `BACKGROUND_JOB`).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Uppercased `Event-Name` token.
    pub fn event_name(&self) -> Option<&str> {
        self.header(HEADER_EVENT_NAME)
    }

    /// `Unique-ID` header, falling back to `Caller-Unique-ID`.
    pub fn uuid(&self) -> Option<&str> {
        self.header(HEADER_UNIQUE_ID)
            .or_else(|| self.header(HEADER_CALLER_UNIQUE_ID))
    }

    /// `Job-UUID` header from `BACKGROUND_JOB` events.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(HEADER_JOB_UUID)
    }

    /// `Channel-State` value with the leading `CS_` stripped
    /// (`CS_EXECUTE` reads as `EXECUTE`).
    pub fn channel_state(&self) -> Option<&str> {
        self.header(HEADER_CHANNEL_STATE)
            .map(|s| {
                s.strip_prefix("CS_")
                    .unwrap_or(s)
            })
    }

    /// `Answer-State` header (`answered`, `ringing`, `hangup`).
    pub fn answer_state(&self) -> Option<&str> {
        self.header(HEADER_ANSWER_STATE)
    }

    /// `Hangup-Cause` header (e.g. `NORMAL_CLEARING`, `USER_BUSY`).
    pub fn hangup_cause(&self) -> Option<&str> {
        self.header(HEADER_HANGUP_CAUSE)
    }

    /// `Application` header on `CHANNEL_EXECUTE_COMPLETE` events.
    pub fn application(&self) -> Option<&str> {
        self.header(HEADER_APPLICATION)
    }

    /// Look up a channel variable, exposed by FreeSWITCH as a
    /// `variable_{name}` header.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.header(&format!("{}{}", CHANNEL_VARIABLE_PREFIX, name))
    }
}

/// Completion of a `bgapi` job, built from its `BACKGROUND_JOB` event or
/// from a rejected dispatch reply.
#[derive(Debug, Clone)]
pub struct BackgroundJobResult {
    success: bool,
    error: Option<String>,
    event: Option<EventMessage>,
}

impl BackgroundJobResult {
    /// Classify a completed job: success iff the event body starts with
    /// `+OK`; otherwise the remainder of the body is the error message.
    pub(crate) fn from_event(event: EventMessage) -> Self {
        let body = event
            .body()
            .unwrap_or("")
            .trim_end_matches('\n');
        let success = body.starts_with("+OK");
        let error = if success {
            None
        } else {
            Some(
                body.strip_prefix("-ERR")
                    .unwrap_or(body)
                    .trim()
                    .to_string(),
            )
        };
        Self {
            success,
            error,
            event: Some(event),
        }
    }

    /// A job whose `bgapi` dispatch was rejected before it ever ran.
    pub(crate) fn from_dispatch_failure(reply_text: &str) -> Self {
        Self {
            success: false,
            error: Some(
                reply_text
                    .strip_prefix("-ERR")
                    .unwrap_or(reply_text)
                    .trim()
                    .to_string(),
            ),
            event: None,
        }
    }

    /// Whether the job completed with `+OK`.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Error message on failure, empty on success.
    pub fn error(&self) -> &str {
        self.error
            .as_deref()
            .unwrap_or("")
    }

    /// The `BACKGROUND_JOB` event, absent when the dispatch itself failed.
    pub fn event(&self) -> Option<&EventMessage> {
        self.event
            .as_ref()
    }

    /// Job output body, when the job ran.
    pub fn body(&self) -> Option<&str> {
        self.event
            .as_ref()?
            .body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::EslParser;

    fn parse_frame(data: &[u8]) -> BasicMessage {
        let mut parser = EslParser::new();
        parser
            .add_data(data)
            .unwrap();
        parser
            .parse_message()
            .unwrap()
            .unwrap()
    }

    fn plain_event_frame(event_body: &str) -> Vec<u8> {
        format!(
            "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
            event_body.len(),
            event_body
        )
        .into_bytes()
    }

    #[test]
    fn plain_event_without_sub_body() {
        let message = parse_frame(&plain_event_frame(
            "Event-Name: CHANNEL_ANSWER\nUnique-ID: test-uuid\n\n",
        ));
        let event = EventMessage::from_message(message).unwrap();

        assert_eq!(event.event_name(), Some("CHANNEL_ANSWER"));
        assert_eq!(event.uuid(), Some("test-uuid"));
        assert!(event
            .body()
            .is_none());
    }

    #[test]
    fn channel_state_prefix_stripped() {
        let message = parse_frame(&plain_event_frame(
            "Event-Name: CHANNEL_STATE\nChannel-State: CS_EXECUTE\n\n",
        ));
        let event = EventMessage::from_message(message).unwrap();
        assert_eq!(event.channel_state(), Some("EXECUTE"));
    }

    #[test]
    fn channel_state_without_prefix_passes_through() {
        let message = parse_frame(&plain_event_frame(
            "Event-Name: CHANNEL_STATE\nChannel-State: ROUTING\n\n",
        ));
        let event = EventMessage::from_message(message).unwrap();
        assert_eq!(event.channel_state(), Some("ROUTING"));
    }

    #[test]
    fn event_name_uppercased() {
        let message = parse_frame(&plain_event_frame("Event-Name: channel_answer\n\n"));
        let event = EventMessage::from_message(message).unwrap();
        assert_eq!(event.event_name(), Some("CHANNEL_ANSWER"));
    }

    #[test]
    fn sub_body_sliced_by_exact_length() {
        // The sub-body itself contains a blank line; exact-length slicing
        // must keep it intact.
        let sub_body = "+OK line one\n\nline two";
        let event_body = format!(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: j9\nContent-Length: {}\n\n{}\n\n",
            sub_body.len(),
            sub_body
        );
        let message = parse_frame(&plain_event_frame(&event_body));
        let event = EventMessage::from_message(message).unwrap();

        assert_eq!(event.body(), Some(sub_body));
        assert_eq!(event.job_uuid(), Some("j9"));
    }

    #[test]
    fn trailing_separator_after_sub_body_discarded() {
        let sub_body = "+OK ok";
        let event_body = format!(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: j1\nContent-Length: {}\n\n{}\n\n",
            sub_body.len(),
            sub_body
        );
        let message = parse_frame(&plain_event_frame(&event_body));
        let event = EventMessage::from_message(message).unwrap();
        assert_eq!(event.body(), Some("+OK ok"));
    }

    #[test]
    fn truncated_sub_body_is_protocol_error() {
        let event_body = "Event-Name: BACKGROUND_JOB\nContent-Length: 50\n\nshort";
        let message = parse_frame(&plain_event_frame(event_body));
        assert!(EventMessage::from_message(message).is_err());
    }

    #[test]
    fn channel_data_hoisted_into_command_reply() {
        let message = parse_frame(
            b"Content-Type: command/reply\nReply-Text: +OK\nEvent-Name: CHANNEL_DATA\n\
              Unique-ID: abc\nChannel-State: CS_EXECUTE\nChannel-Call-State: RINGING\n\n",
        );
        let event = EventMessage::from_message(message).unwrap();

        assert_eq!(event.event_name(), Some("CHANNEL_DATA"));
        assert_eq!(event.uuid(), Some("abc"));
        assert_eq!(event.channel_state(), Some("EXECUTE"));
    }

    #[test]
    fn command_reply_without_event_name_rejected() {
        let message = parse_frame(b"Content-Type: command/reply\nReply-Text: +OK\n\n");
        assert!(EventMessage::from_message(message).is_err());
    }

    #[test]
    fn json_event_parsed() {
        let payload = r#"{"Event-Name":"HEARTBEAT","Core-UUID":"abc-123","_body":"stats"}"#;
        let data = format!(
            "Content-Type: text/event-json\nContent-Length: {}\n\n{}",
            payload.len(),
            payload
        );
        let event = EventMessage::from_message(parse_frame(data.as_bytes())).unwrap();

        assert_eq!(event.event_name(), Some("HEARTBEAT"));
        assert_eq!(event.header("Core-UUID"), Some("abc-123"));
        assert_eq!(event.body(), Some("stats"));
    }

    #[test]
    fn channel_variables_read_through_prefix() {
        let message = parse_frame(&plain_event_frame(
            "Event-Name: CHANNEL_ANSWER\nvariable_sip_from_user: alice\n\n",
        ));
        let event = EventMessage::from_message(message).unwrap();
        assert_eq!(event.variable("sip_from_user"), Some("alice"));
    }

    #[test]
    fn background_job_ok() {
        let sub_body = "+OK ok";
        let event_body = format!(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: j1\nContent-Length: {}\n\n{}",
            sub_body.len(),
            sub_body
        );
        let event = EventMessage::from_message(parse_frame(&plain_event_frame(&event_body))).unwrap();
        let result = BackgroundJobResult::from_event(event);

        assert!(result.success());
        assert_eq!(result.error(), "");
        assert_eq!(result.body(), Some("+OK ok"));
    }

    #[test]
    fn background_job_err() {
        let sub_body = "-ERR USER_NOT_REGISTERED\n";
        let event_body = format!(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: j2\nContent-Length: {}\n\n{}",
            sub_body.len(),
            sub_body
        );
        let event = EventMessage::from_message(parse_frame(&plain_event_frame(&event_body))).unwrap();
        let result = BackgroundJobResult::from_event(event);

        assert!(!result.success());
        assert_eq!(result.error(), "USER_NOT_REGISTERED");
    }

    #[test]
    fn background_job_dispatch_failure() {
        let result = BackgroundJobResult::from_dispatch_failure("-ERR invalid command");
        assert!(!result.success());
        assert_eq!(result.error(), "invalid command");
        assert!(result
            .event()
            .is_none());
    }
}
