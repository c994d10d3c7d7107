//! Protocol constants and configuration values

/// Default FreeSWITCH ESL port for inbound connections
pub const DEFAULT_ESL_PORT: u16 = 8021;

/// Socket buffer size for reading from TCP stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Maximum single message size (8MB) - validates Content-Length header
/// No legitimate ESL message should exceed this (largest is sofia status ~1-2MB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum total buffer size (16MB) - safety limit to prevent runaway memory
/// Should hold 2 max messages + overhead. Indicates a bug if exceeded.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Protocol message terminators
pub const HEADER_TERMINATOR: &str = "\n\n";
pub const LINE_TERMINATOR: &str = "\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_TEXT_EVENT_JSON: &str = "text/event-json";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";
pub const CONTENT_TYPE_RUDE_REJECTION: &str = "text/rude-rejection";
pub const CONTENT_TYPE_LOG_DATA: &str = "log/data";

/// Protocol framing header: frame type.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
/// Protocol framing header: body length.
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
/// Protocol framing header: command reply status.
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";
/// Disconnect notice disposition (`linger` or `disconnect`).
pub const HEADER_CONTENT_DISPOSITION: &str = "Content-Disposition";

/// Event payload header: event name.
pub const HEADER_EVENT_NAME: &str = "Event-Name";
/// Event payload header: channel UUID.
pub const HEADER_UNIQUE_ID: &str = "Unique-ID";
/// Event payload header: channel UUID as seen from the caller leg.
pub const HEADER_CALLER_UNIQUE_ID: &str = "Caller-Unique-ID";
/// Event payload header: background job correlation id.
pub const HEADER_JOB_UUID: &str = "Job-UUID";
/// Event payload header: channel state (`CS_*`).
pub const HEADER_CHANNEL_STATE: &str = "Channel-State";
/// Event payload header: answer state (`answered`, `ringing`, `hangup`).
pub const HEADER_ANSWER_STATE: &str = "Answer-State";
/// Event payload header: hangup cause token.
pub const HEADER_HANGUP_CAUSE: &str = "Hangup-Cause";
/// Event payload header: dialplan application name on execute events.
pub const HEADER_APPLICATION: &str = "Application";
/// Prefix under which channel variables appear in event headers.
pub const CHANNEL_VARIABLE_PREFIX: &str = "variable_";

/// Event names this library correlates on. Everything else passes through
/// as opaque strings.
pub const EVENT_BACKGROUND_JOB: &str = "BACKGROUND_JOB";
pub const EVENT_CHANNEL_EXECUTE_COMPLETE: &str = "CHANNEL_EXECUTE_COMPLETE";
pub const EVENT_CHANNEL_ANSWER: &str = "CHANNEL_ANSWER";
pub const EVENT_CHANNEL_HANGUP: &str = "CHANNEL_HANGUP";
pub const EVENT_CHANNEL_PROGRESS: &str = "CHANNEL_PROGRESS";
pub const EVENT_CHANNEL_DATA: &str = "CHANNEL_DATA";

/// TCP connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Command response timeout in milliseconds (5 seconds)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Capacity of the per-connection broadcast buffers. A subscriber that
/// falls further behind than this loses the oldest messages and observes
/// a lag marker.
pub const BROADCAST_CAPACITY: usize = 1024;

/// Capacity of the listener's accepted-connection queue.
pub const LISTENER_BACKLOG: usize = 32;
