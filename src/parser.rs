//! Streaming ESL frame parser.
//!
//! Converts an arbitrary byte stream into a sequence of [`BasicMessage`]
//! frames. The parser is restartable across buffer arrivals: feed bytes with
//! [`EslParser::add_data`] and drain completed frames with
//! [`EslParser::parse_message`] until it returns `None`.

use crate::{
    constants::{
        HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE, HEADER_TERMINATOR, MAX_BUFFER_SIZE,
        MAX_MESSAGE_SIZE,
    },
    error::{EslError, EslResult},
    message::BasicMessage,
};
use bytes::{Buf, BytesMut};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use tracing::warn;

/// Parse a `key: value` header block. Keys are case-preserving, values are
/// trimmed and percent-decoded (FreeSWITCH encodes event header values);
/// an invalid percent sequence falls back to the raw value. Duplicate keys
/// resolve last-write-wins.
pub(crate) fn parse_header_block(block: &str) -> EslResult<HashMap<String, String>> {
    let mut headers = HashMap::new();

    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let colon_pos = line
            .find(':')
            .ok_or_else(|| EslError::InvalidHeader {
                header: line.to_string(),
            })?;
        let key = line[..colon_pos]
            .trim()
            .to_string();
        let raw_value = line[colon_pos + 1..].trim();
        let value = percent_decode_str(raw_value)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw_value.to_string());
        headers.insert(key, value);
    }

    Ok(headers)
}

/// Parser state for handling incomplete frames.
#[derive(Debug)]
enum ParseState {
    /// Accumulating a header block.
    Headers,
    /// Header block complete, waiting for `body_length` more bytes.
    Body {
        headers: HashMap<String, String>,
        body_length: usize,
    },
    /// A frame was rejected; discarding through the next blank line.
    Resync,
}

/// Streaming frame parser.
pub struct EslParser {
    buffer: BytesMut,
    state: ParseState,
}

impl EslParser {
    /// Create a parser with an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: ParseState::Headers,
        }
    }

    /// Append transport bytes to the accumulation buffer.
    pub fn add_data(&mut self, data: &[u8]) -> EslResult<()> {
        self.buffer
            .extend_from_slice(data);
        if self
            .buffer
            .len()
            > MAX_BUFFER_SIZE
        {
            return Err(EslError::protocol_error(format!(
                "receive buffer exceeded {} bytes without a complete frame",
                MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Whether the parser is between frames with nothing buffered.
    ///
    /// Used by the reader loop to distinguish a clean EOF from a stream
    /// truncated mid-frame.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParseState::Headers)
            && self
                .buffer
                .is_empty()
    }

    /// Try to parse one complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A frame with a
    /// non-numeric `Content-Length` is rejected: the parser logs, discards
    /// through the next blank line, and resumes with the following frame.
    /// Oversized frames and header blocks without `Content-Type` are
    /// protocol errors that must terminate the connection.
    pub fn parse_message(&mut self) -> EslResult<Option<BasicMessage>> {
        loop {
            match std::mem::replace(&mut self.state, ParseState::Headers) {
                ParseState::Headers => {
                    let Some(block) = self.take_until_blank_line() else {
                        return Ok(None);
                    };

                    let block = String::from_utf8(block)
                        .map_err(|_| EslError::protocol_error("invalid UTF-8 in headers"))?;
                    let headers = parse_header_block(&block)?;

                    // Every server frame carries Content-Type. A missing one
                    // means the stream desynchronized (e.g. after a wrong
                    // Content-Length) and recovery is impossible.
                    if !headers.contains_key(HEADER_CONTENT_TYPE) {
                        return Err(EslError::protocol_error(
                            "missing Content-Type header, stream desynchronized",
                        ));
                    }

                    match Self::body_length(&headers)? {
                        None => {
                            warn!("rejecting frame with malformed Content-Length");
                            self.state = ParseState::Resync;
                        }
                        Some(0) => {
                            return Ok(Some(BasicMessage::new(headers, None)));
                        }
                        Some(length) => {
                            self.state = ParseState::Body {
                                headers,
                                body_length: length,
                            };
                        }
                    }
                }
                ParseState::Body {
                    headers,
                    body_length,
                } => {
                    if self
                        .buffer
                        .len()
                        < body_length
                    {
                        self.state = ParseState::Body {
                            headers,
                            body_length,
                        };
                        return Ok(None);
                    }

                    let body = self
                        .buffer
                        .split_to(body_length);
                    let body = String::from_utf8(body.to_vec())
                        .map_err(|_| EslError::protocol_error("invalid UTF-8 in body"))?;
                    return Ok(Some(BasicMessage::new(headers, Some(body))));
                }
                ParseState::Resync => {
                    if self
                        .take_until_blank_line()
                        .is_none()
                    {
                        self.state = ParseState::Resync;
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Extract bytes up to (and consuming) the next `\n\n`, or `None` if no
    /// terminator is buffered yet.
    fn take_until_blank_line(&mut self) -> Option<Vec<u8>> {
        let terminator = HEADER_TERMINATOR.as_bytes();
        let pos = self
            .buffer
            .windows(terminator.len())
            .position(|w| w == terminator)?;
        let block = self
            .buffer
            .split_to(pos)
            .to_vec();
        self.buffer
            .advance(terminator.len());
        Some(block)
    }

    /// Interpret the `Content-Length` header. `Ok(None)` marks a rejected
    /// frame (non-numeric length); an oversized length is a hard error.
    fn body_length(headers: &HashMap<String, String>) -> EslResult<Option<usize>> {
        let Some(raw) = headers.get(HEADER_CONTENT_LENGTH) else {
            return Ok(Some(0));
        };

        let Ok(length) = raw
            .trim()
            .parse::<usize>()
        else {
            return Ok(None);
        };

        if length > MAX_MESSAGE_SIZE {
            return Err(EslError::protocol_error(format!(
                "Content-Length {} exceeds limit {}",
                length, MAX_MESSAGE_SIZE
            )));
        }

        Ok(Some(length))
    }
}

impl Default for EslParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContentType;

    #[test]
    fn parse_auth_request() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: auth/request\n\n")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.content_type(), ContentType::AuthRequest);
        assert!(message
            .body()
            .is_none());
        assert!(parser.is_idle());
    }

    #[test]
    fn parse_api_response_with_body() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: api/response\nContent-Length: 2\n\nOK")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.content_type(), ContentType::ApiResponse);
        assert_eq!(message.body(), Some("OK"));
    }

    #[test]
    fn incomplete_body_returns_none() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: api/response\nContent-Length: 10\n\ntest")
            .unwrap();

        assert!(parser
            .parse_message()
            .unwrap()
            .is_none());
        assert!(!parser.is_idle());
    }

    #[test]
    fn restartable_across_byte_by_byte_arrivals() {
        let mut parser = EslParser::new();
        let data = b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n";

        for (i, byte) in data
            .iter()
            .enumerate()
        {
            parser
                .add_data(&[*byte])
                .unwrap();
            let parsed = parser
                .parse_message()
                .unwrap();
            if i + 1 < data.len() {
                assert!(parsed.is_none(), "parsed early at byte {}", i);
            } else {
                let message = parsed.unwrap();
                assert_eq!(message.reply_text(), Some("+OK accepted"));
            }
        }
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: auth/request\n\nContent-Type: command/reply\nReply-Text: +OK\n\n")
            .unwrap();

        let first = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(first.content_type(), ContentType::AuthRequest);

        let second = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(second.content_type(), ContentType::CommandReply);
        assert!(parser
            .parse_message()
            .unwrap()
            .is_none());
    }

    #[test]
    fn crlf_line_endings_tolerated_within_frame() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: auth/request\r\nSome-Header: some-value\n\n")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.content_type(), ContentType::AuthRequest);
        assert_eq!(message.header("Some-Header"), Some("some-value"));
    }

    #[test]
    fn duplicate_header_last_write_wins() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: command/reply\nX-Test: first\nX-Test: second\n\n")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.header("X-Test"), Some("second"));
    }

    #[test]
    fn header_values_percent_decoded() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: command/reply\nReply-Text: %2BOK%20accepted\n\n")
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.reply_text(), Some("+OK accepted"));
    }

    #[test]
    fn invalid_percent_sequence_falls_back_to_raw() {
        let headers = parse_header_block("X-Bad: %ZZinvalid\nX-Good: clean").unwrap();
        assert_eq!(
            headers
                .get("X-Bad")
                .map(|s| s.as_str()),
            Some("%ZZinvalid")
        );
        assert_eq!(
            headers
                .get("X-Good")
                .map(|s| s.as_str()),
            Some("clean")
        );
    }

    #[test]
    fn non_numeric_content_length_resyncs_to_next_frame() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Content-Type: api/response\nContent-Length: abc\n\n")
            .unwrap();

        // Rejected frame, nothing to emit yet.
        assert!(parser
            .parse_message()
            .unwrap()
            .is_none());

        // Garbage until the next blank line is discarded, then parsing resumes.
        parser
            .add_data(b"junk that was the body\n\nContent-Type: auth/request\n\n")
            .unwrap();
        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.content_type(), ContentType::AuthRequest);
    }

    #[test]
    fn oversized_content_length_rejected() {
        let mut parser = EslParser::new();
        let data = format!(
            "Content-Type: api/response\nContent-Length: {}\n\n",
            MAX_MESSAGE_SIZE + 1
        );
        parser
            .add_data(data.as_bytes())
            .unwrap();

        assert!(parser
            .parse_message()
            .is_err());
    }

    #[test]
    fn missing_content_type_is_protocol_error() {
        let mut parser = EslParser::new();
        parser
            .add_data(b"Reply-Text: +OK\n\n")
            .unwrap();

        assert!(parser
            .parse_message()
            .is_err());
    }

    #[test]
    fn framing_round_trip() {
        // Serialize an arbitrary header map + body as a frame and re-parse.
        let headers = [
            ("Content-Type", "api/response"),
            ("X-One", "alpha"),
            ("X-Two", "beta gamma"),
        ];
        let body = "line one\nline two\n";

        let mut wire = String::new();
        for (key, value) in &headers {
            wire.push_str(&format!("{}: {}\n", key, value));
        }
        wire.push_str(&format!("Content-Length: {}\n\n{}", body.len(), body));

        let mut parser = EslParser::new();
        parser
            .add_data(wire.as_bytes())
            .unwrap();
        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();

        for (key, value) in &headers {
            assert_eq!(message.header(key), Some(*value));
        }
        assert_eq!(message.body(), Some(body));
        assert_eq!(message.content_length(), body.len());
        assert!(parser.is_idle());
    }

    #[test]
    fn body_containing_blank_lines_read_verbatim() {
        let body = "first\n\nsecond\n\n";
        let mut parser = EslParser::new();
        let data = format!(
            "Content-Type: api/response\nContent-Length: {}\n\n{}",
            body.len(),
            body
        );
        parser
            .add_data(data.as_bytes())
            .unwrap();

        let message = parser
            .parse_message()
            .unwrap()
            .unwrap();
        assert_eq!(message.body(), Some(body));
    }
}
