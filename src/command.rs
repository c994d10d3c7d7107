//! Command wire rendering and reply classification.

use crate::{
    constants::{HEADER_JOB_UUID, HEADER_TERMINATOR, LINE_TERMINATOR},
    error::{EslError, EslResult},
    message::BasicMessage,
};
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// ESL commands are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol commands.
fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::protocol_error(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// Synchronous reply to a socket command (`Content-Type: command/reply`).
#[derive(Debug, Clone)]
pub struct CommandReply {
    message: BasicMessage,
}

impl CommandReply {
    pub(crate) fn new(message: BasicMessage) -> Self {
        Self { message }
    }

    /// `true` iff `Reply-Text` starts with `+OK`.
    pub fn success(&self) -> bool {
        self.reply_text()
            .is_some_and(|t| t.starts_with("+OK"))
    }

    /// Raw `Reply-Text` value (e.g. `+OK accepted`, `-ERR command not found`).
    pub fn reply_text(&self) -> Option<&str> {
        self.message
            .reply_text()
    }

    /// Look up a reply header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.message
            .header(name)
    }

    /// `Job-UUID` header on `bgapi` dispatch replies.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(HEADER_JOB_UUID)
    }

    /// The underlying frame.
    pub fn message(&self) -> &BasicMessage {
        &self.message
    }

    /// Consume into the underlying frame.
    pub fn into_message(self) -> BasicMessage {
        self.message
    }

    /// Convert to a result, failing with [`EslError::CommandFailed`] when the
    /// reply is not `+OK`.
    pub fn into_result(self) -> EslResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(EslError::CommandFailed {
                reply_text: self
                    .reply_text()
                    .unwrap_or("")
                    .to_string(),
            })
        }
    }
}

/// Synchronous reply to an `api` invocation (`Content-Type: api/response`).
///
/// The body is the API output; success iff it starts with `+OK`.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    message: BasicMessage,
}

impl ApiResponse {
    pub(crate) fn new(message: BasicMessage) -> Self {
        Self { message }
    }

    /// `true` iff the body starts with `+OK`.
    pub fn success(&self) -> bool {
        self.message
            .body()
            .is_some_and(|b| b.starts_with("+OK"))
    }

    /// Response body with the single trailing newline FreeSWITCH appends
    /// removed. The raw body is available via [`ApiResponse::message`].
    pub fn body(&self) -> &str {
        let body = self
            .message
            .body()
            .unwrap_or("");
        body.strip_suffix('\n')
            .unwrap_or(body)
    }

    /// The body text when the invocation failed, `None` on success.
    pub fn error_message(&self) -> Option<&str> {
        if self.success() {
            None
        } else {
            Some(self.body())
        }
    }

    /// The underlying frame.
    pub fn message(&self) -> &BasicMessage {
        &self.message
    }

    /// Convert to a result, failing with [`EslError::ApiFailed`] when the
    /// body is not `+OK`.
    pub fn into_result(self) -> EslResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(EslError::ApiFailed {
                message: self
                    .body()
                    .to_string(),
            })
        }
    }
}

/// Builder for commands that carry headers and an optional
/// content-length-delimited body (`sendmsg`, `sendevent`).
///
/// Produces the complete wire frame including the terminating blank line.
#[derive(Debug)]
pub struct CommandBuilder {
    command: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl CommandBuilder {
    /// Start building a command with the given command line.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header. Errors if the name or value contains newlines.
    pub fn header(mut self, name: &str, value: &str) -> EslResult<Self> {
        validate_no_newlines(name, "header name")?;
        validate_no_newlines(value, "header value")?;
        self.headers
            .push((name.to_string(), value.to_string()));
        Ok(self)
    }

    /// Set the command body. The body is length-delimited so it may contain
    /// newlines.
    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Build the wire frame.
    pub fn build(self) -> String {
        use std::fmt::Write;
        let mut result = self.command;
        result.push_str(LINE_TERMINATOR);

        for (key, value) in &self.headers {
            let _ = write!(result, "{}: {}{}", key, value, LINE_TERMINATOR);
        }

        if let Some(body) = &self.body {
            let _ = write!(result, "Content-Length: {}{}", body.len(), LINE_TERMINATOR);
            result.push_str(LINE_TERMINATOR);
            result.push_str(body);
        } else {
            result.push_str(LINE_TERMINATOR);
        }

        result
    }
}

/// Typed socket commands, rendered to complete wire frames.
#[derive(Clone)]
pub enum EslCommand {
    /// Authenticate with password.
    Auth { password: String },
    /// Synchronous API invocation.
    Api { command: String },
    /// Background API invocation with a caller-supplied job id.
    BgApi {
        command: String,
        arg: Option<String>,
        job_uuid: String,
    },
    /// Execute a dialplan application on a channel.
    Execute {
        uuid: String,
        app: String,
        arg: Option<String>,
    },
    /// Subscribe to plain-format events.
    Events { events: String },
    /// Install a server-side event filter.
    Filter { header: String, value: String },
    /// Remove a server-side event filter.
    FilterDelete {
        header: String,
        value: Option<String>,
    },
    /// Subscribe to session events (outbound: no uuid, inbound: with uuid).
    MyEvents { uuid: Option<String> },
    /// Keep the socket open past channel hangup.
    Linger { timeout: Option<u32> },
    /// Cancel linger mode.
    NoLinger,
    /// Fire an event into FreeSWITCH's event bus.
    SendEvent {
        name: String,
        headers: Vec<(String, String)>,
        body: Option<String>,
    },
    /// Request channel data (outbound mode).
    Connect,
    /// Gracefully end the session.
    Exit,
    /// Keepalive.
    NoOp,
}

impl fmt::Debug for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::Api { command } => f
                .debug_struct("Api")
                .field("command", command)
                .finish(),
            EslCommand::BgApi {
                command,
                arg,
                job_uuid,
            } => f
                .debug_struct("BgApi")
                .field("command", command)
                .field("arg", arg)
                .field("job_uuid", job_uuid)
                .finish(),
            EslCommand::Execute { uuid, app, arg } => f
                .debug_struct("Execute")
                .field("uuid", uuid)
                .field("app", app)
                .field("arg", arg)
                .finish(),
            EslCommand::Events { events } => f
                .debug_struct("Events")
                .field("events", events)
                .finish(),
            EslCommand::Filter { header, value } => f
                .debug_struct("Filter")
                .field("header", header)
                .field("value", value)
                .finish(),
            EslCommand::FilterDelete { header, value } => f
                .debug_struct("FilterDelete")
                .field("header", header)
                .field("value", value)
                .finish(),
            EslCommand::MyEvents { uuid } => f
                .debug_struct("MyEvents")
                .field("uuid", uuid)
                .finish(),
            EslCommand::Linger { timeout } => f
                .debug_struct("Linger")
                .field("timeout", timeout)
                .finish(),
            EslCommand::NoLinger => write!(f, "NoLinger"),
            EslCommand::SendEvent { name, .. } => f
                .debug_struct("SendEvent")
                .field("name", name)
                .finish(),
            EslCommand::Connect => write!(f, "Connect"),
            EslCommand::Exit => write!(f, "Exit"),
            EslCommand::NoOp => write!(f, "NoOp"),
        }
    }
}

impl EslCommand {
    /// Format a simple command with optional arguments.
    fn format_simple_command(cmd: &str, args: &[&str]) -> String {
        let mut result = String::from(cmd);
        for arg in args {
            result.push(' ');
            result.push_str(arg);
        }
        result.push_str(HEADER_TERMINATOR);
        result
    }

    /// Validate all user-supplied fields, then render the complete wire
    /// frame including the terminating blank line.
    pub fn to_wire_format(&self) -> EslResult<String> {
        match self {
            EslCommand::Auth { password } => {
                validate_no_newlines(password, "password")?;
                Ok(Self::format_simple_command("auth", &[password]))
            }
            EslCommand::Api { command } => {
                validate_no_newlines(command, "api command")?;
                Ok(Self::format_simple_command("api", &[command]))
            }
            EslCommand::BgApi {
                command,
                arg,
                job_uuid,
            } => {
                validate_no_newlines(command, "bgapi command")?;
                if let Some(a) = arg {
                    validate_no_newlines(a, "bgapi argument")?;
                }
                validate_no_newlines(job_uuid, "job uuid")?;

                let mut line = format!("bgapi {}", command);
                if let Some(a) = arg {
                    line.push(' ');
                    line.push_str(a);
                }
                Ok(format!(
                    "{}{}{}: {}{}",
                    line, LINE_TERMINATOR, HEADER_JOB_UUID, job_uuid, HEADER_TERMINATOR
                ))
            }
            EslCommand::Execute { uuid, app, arg } => {
                validate_no_newlines(uuid, "execute uuid")?;
                validate_no_newlines(app, "execute app")?;

                let mut builder = CommandBuilder::new(&format!("sendmsg {}", uuid))
                    .header("call-command", "execute")?
                    .header("execute-app-name", app)?;
                if let Some(arg) = arg {
                    builder = builder.header("execute-app-arg", arg)?;
                }
                Ok(builder.build())
            }
            EslCommand::Events { events } => {
                validate_no_newlines(events, "event list")?;
                Ok(Self::format_simple_command("event", &["plain", events]))
            }
            EslCommand::Filter { header, value } => {
                validate_no_newlines(header, "filter header")?;
                validate_no_newlines(value, "filter value")?;
                Ok(Self::format_simple_command("filter", &[header, value]))
            }
            EslCommand::FilterDelete { header, value } => {
                validate_no_newlines(header, "filter delete header")?;
                if let Some(v) = value {
                    validate_no_newlines(v, "filter delete value")?;
                }
                Ok(match value {
                    Some(v) => Self::format_simple_command("filter", &["delete", header, v]),
                    None => Self::format_simple_command("filter", &["delete", header]),
                })
            }
            EslCommand::MyEvents { uuid } => {
                if let Some(u) = uuid {
                    validate_no_newlines(u, "myevents uuid")?;
                }
                Ok(match uuid {
                    Some(u) => Self::format_simple_command("myevents", &[u, "plain"]),
                    None => Self::format_simple_command("myevents", &["plain"]),
                })
            }
            EslCommand::Linger { timeout } => Ok(match timeout {
                Some(n) => Self::format_simple_command("linger", &[&n.to_string()]),
                None => Self::format_simple_command("linger", &[]),
            }),
            EslCommand::NoLinger => Ok(Self::format_simple_command("nolinger", &[])),
            EslCommand::SendEvent {
                name,
                headers,
                body,
            } => {
                validate_no_newlines(name, "event name")?;
                let mut builder = CommandBuilder::new(&format!("sendevent {}", name));
                for (key, value) in headers {
                    builder = builder.header(key, value)?;
                }
                if let Some(body) = body {
                    builder = builder.body(body);
                }
                Ok(builder.build())
            }
            EslCommand::Connect => Ok(Self::format_simple_command("connect", &[])),
            EslCommand::Exit => Ok(Self::format_simple_command("exit", &[])),
            EslCommand::NoOp => Ok(Self::format_simple_command("noop", &[])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reply_with_text(text: &str) -> CommandReply {
        let headers: HashMap<String, String> =
            [("Reply-Text".to_string(), text.to_string())].into();
        CommandReply::new(BasicMessage::new(headers, None))
    }

    fn api_with_body(body: &str) -> ApiResponse {
        ApiResponse::new(BasicMessage::new(
            HashMap::new(),
            Some(body.to_string()),
        ))
    }

    #[test]
    fn command_reply_classification() {
        assert!(reply_with_text("+OK accepted").success());
        assert!(!reply_with_text("-ERR invalid").success());
        // Success requires the +OK prefix; anything else is a failure.
        assert!(!reply_with_text("whatever").success());
    }

    #[test]
    fn command_reply_into_result() {
        assert!(reply_with_text("+OK")
            .into_result()
            .is_ok());
        let err = reply_with_text("-ERR invalid command")
            .into_result()
            .unwrap_err();
        assert!(
            matches!(err, EslError::CommandFailed { ref reply_text } if reply_text == "-ERR invalid command")
        );
    }

    #[test]
    fn api_response_classification() {
        let ok = api_with_body("+OK\n");
        assert!(ok.success());
        assert_eq!(ok.body(), "+OK");
        assert!(ok
            .error_message()
            .is_none());

        let err = api_with_body("-ERR no such command\n");
        assert!(!err.success());
        assert_eq!(err.error_message(), Some("-ERR no such command"));
    }

    #[test]
    fn api_body_strips_single_trailing_newline() {
        assert_eq!(api_with_body("+OK\n\n").body(), "+OK\n");
        assert_eq!(api_with_body("+OK").body(), "+OK");
    }

    #[test]
    fn simple_wire_formats() {
        assert_eq!(
            EslCommand::Auth {
                password: "ClueCon".into()
            }
            .to_wire_format()
            .unwrap(),
            "auth ClueCon\n\n"
        );
        assert_eq!(
            EslCommand::Api {
                command: "status".into()
            }
            .to_wire_format()
            .unwrap(),
            "api status\n\n"
        );
        assert_eq!(
            EslCommand::Events {
                events: "CHANNEL_ANSWER CHANNEL_HANGUP".into()
            }
            .to_wire_format()
            .unwrap(),
            "event plain CHANNEL_ANSWER CHANNEL_HANGUP\n\n"
        );
        assert_eq!(
            EslCommand::Connect
                .to_wire_format()
                .unwrap(),
            "connect\n\n"
        );
        assert_eq!(
            EslCommand::Exit
                .to_wire_format()
                .unwrap(),
            "exit\n\n"
        );
    }

    #[test]
    fn bgapi_wire_format_carries_job_uuid() {
        let cmd = EslCommand::BgApi {
            command: "originate".into(),
            arg: Some("sofia/x &park".into()),
            job_uuid: "job-1".into(),
        };
        assert_eq!(
            cmd.to_wire_format()
                .unwrap(),
            "bgapi originate sofia/x &park\nJob-UUID: job-1\n\n"
        );
    }

    #[test]
    fn bgapi_wire_format_without_arg() {
        let cmd = EslCommand::BgApi {
            command: "status".into(),
            arg: None,
            job_uuid: "job-2".into(),
        };
        assert_eq!(
            cmd.to_wire_format()
                .unwrap(),
            "bgapi status\nJob-UUID: job-2\n\n"
        );
    }

    #[test]
    fn execute_wire_format() {
        let cmd = EslCommand::Execute {
            uuid: "abc".into(),
            app: "playback".into(),
            arg: Some("ivr/ivr-welcome.wav".into()),
        };
        let wire = cmd
            .to_wire_format()
            .unwrap();
        assert!(wire.starts_with("sendmsg abc\n"));
        assert!(wire.contains("call-command: execute\n"));
        assert!(wire.contains("execute-app-name: playback\n"));
        assert!(wire.contains("execute-app-arg: ivr/ivr-welcome.wav\n"));
        assert!(wire.ends_with("\n\n"));
    }

    #[test]
    fn execute_wire_format_omits_empty_arg() {
        let cmd = EslCommand::Execute {
            uuid: "abc".into(),
            app: "park".into(),
            arg: None,
        };
        let wire = cmd
            .to_wire_format()
            .unwrap();
        assert!(!wire.contains("execute-app-arg"));
    }

    #[test]
    fn linger_wire_formats() {
        assert_eq!(
            EslCommand::Linger { timeout: None }
                .to_wire_format()
                .unwrap(),
            "linger\n\n"
        );
        assert_eq!(
            EslCommand::Linger { timeout: Some(30) }
                .to_wire_format()
                .unwrap(),
            "linger 30\n\n"
        );
        assert_eq!(
            EslCommand::NoLinger
                .to_wire_format()
                .unwrap(),
            "nolinger\n\n"
        );
    }

    #[test]
    fn command_builder_with_body() {
        let cmd = CommandBuilder::new("sendevent CUSTOM")
            .header("Event-Subclass", "test::case")
            .unwrap()
            .body("test body")
            .build();

        assert!(cmd.starts_with("sendevent CUSTOM\n"));
        assert!(cmd.contains("Event-Subclass: test::case\n"));
        assert!(cmd.contains("Content-Length: 9\n"));
        assert!(cmd.ends_with("\ntest body"));
    }

    #[test]
    fn newline_injection_rejected() {
        let cmd = EslCommand::Api {
            command: "status\nexit".into(),
        };
        assert!(cmd
            .to_wire_format()
            .is_err());

        assert!(CommandBuilder::new("sendmsg")
            .header("key", "value\nexit")
            .is_err());
    }
}
