//! Error types for ESL operations

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Errors surfaced by the ESL client.
///
/// Connection-level errors (`Io`, `Protocol`, `ConnectionClosed`) are
/// terminal: the connection's streams complete and every pending request
/// fails. `CommandFailed`, `ApiFailed` and `BackgroundJobFailed` are
/// per-request; the connection stays usable.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EslError {
    /// Underlying TCP I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request did not complete within the configured timeout.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The peer violated the wire protocol. Terminal for the connection.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// A header line could not be parsed.
    #[error("invalid header: {header}")]
    InvalidHeader {
        /// The offending header line or value.
        header: String,
    },

    /// `auth` was rejected by the server.
    #[error("authentication failed: {message}")]
    AuthFailed {
        /// Server-provided reason, usually the `Reply-Text` value.
        message: String,
    },

    /// A socket command returned a `Reply-Text` that is not `+OK`.
    #[error("command failed: {reply_text}")]
    CommandFailed {
        /// Raw `Reply-Text` value.
        reply_text: String,
    },

    /// An `api` invocation returned a body that is not `+OK`.
    #[error("api command failed: {message}")]
    ApiFailed {
        /// The response body text.
        message: String,
    },

    /// A `bgapi` job was rejected or completed with `-ERR`.
    #[error("background job failed: {message}")]
    BackgroundJobFailed {
        /// Error text from the dispatch reply or the job body.
        message: String,
    },

    /// The connection terminated while a request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation invoked on a connection that is already closed.
    #[error("not connected")]
    NotConnected,

    /// A stream subscriber fell behind and lost messages.
    #[error("event stream lagged, {skipped} messages dropped")]
    Lagged {
        /// Number of messages dropped for this subscriber.
        skipped: u64,
    },

    /// A `text/event-json` payload could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EslError {
    /// Construct a [`EslError::Protocol`] from any message.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        EslError::Protocol {
            message: message.into(),
        }
    }

    /// Construct a [`EslError::AuthFailed`] from any message.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        EslError::AuthFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = EslError::protocol_error("bad frame");
        assert_eq!(err.to_string(), "protocol error: bad frame");

        let err = EslError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "operation timed out after 5000ms");

        let err = EslError::Lagged { skipped: 3 };
        assert_eq!(err.to_string(), "event stream lagged, 3 messages dropped");
    }

    #[test]
    fn io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: EslError = io.into();
        assert!(matches!(err, EslError::Io(_)));
    }
}
