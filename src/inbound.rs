//! Inbound mode: dial FreeSWITCH, authenticate, drive it.

use std::ops::Deref;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    command::{CommandReply, EslCommand},
    connection::{ConnectOptions, EventSocket},
    constants::{
        EVENT_CHANNEL_ANSWER, EVENT_CHANNEL_HANGUP, EVENT_CHANNEL_PROGRESS, SOCKET_BUF_SIZE,
    },
    error::{EslError, EslResult},
    event::EventMessage,
    message::{BasicMessage, ContentType},
    originate::{OriginateOptions, OriginateResult},
    parser::EslParser,
};

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> EslResult<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(stream)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(EslError::Io(e))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect timed out after {}ms",
                connect_timeout.as_millis()
            );
            Err(EslError::Timeout {
                timeout_ms: connect_timeout.as_millis() as u64,
            })
        }
    }
}

/// Read a single ESL frame from the unsplit stream. Used only during the
/// auth handshake, before the reader task takes over.
async fn recv_message(
    stream: &mut TcpStream,
    parser: &mut EslParser,
    read_buffer: &mut [u8],
    recv_timeout: Duration,
) -> EslResult<BasicMessage> {
    loop {
        if let Some(message) = parser.parse_message()? {
            return Ok(message);
        }

        let bytes_read = match timeout(recv_timeout, stream.read(read_buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(EslError::Io(e)),
            Err(_) => {
                return Err(EslError::Timeout {
                    timeout_ms: recv_timeout.as_millis() as u64,
                })
            }
        };

        if bytes_read == 0 {
            return Err(EslError::ConnectionClosed);
        }
        parser.add_data(&read_buffer[..bytes_read])?;
    }
}

/// Perform the auth handshake: wait for `auth/request`, send the password,
/// require `+OK`.
async fn authenticate(
    stream: &mut TcpStream,
    parser: &mut EslParser,
    read_buffer: &mut [u8],
    password: &str,
    recv_timeout: Duration,
) -> EslResult<()> {
    debug!("[AUTH] Waiting for auth request from FreeSWITCH");
    let message = recv_message(stream, parser, read_buffer, recv_timeout).await?;

    if message.content_type() != ContentType::AuthRequest {
        return Err(EslError::protocol_error("expected auth request"));
    }

    let wire = EslCommand::Auth {
        password: password.to_string(),
    }
    .to_wire_format()?;
    debug!("sending command: auth [REDACTED]");
    stream
        .write_all(wire.as_bytes())
        .await
        .map_err(EslError::Io)?;

    let reply = CommandReply::new(recv_message(stream, parser, read_buffer, recv_timeout).await?);
    if !reply.success() {
        return Err(EslError::auth_failed(
            reply
                .reply_text()
                .unwrap_or("authentication failed")
                .to_string(),
        ));
    }

    debug!("[AUTH] authentication successful");
    Ok(())
}

/// An authenticated inbound connection to FreeSWITCH.
///
/// Derefs to [`EventSocket`], so every socket operation (`api`, `bgapi`,
/// `execute`, `events`, …) is available directly.
pub struct InboundSocket {
    socket: EventSocket,
}

impl Deref for InboundSocket {
    type Target = EventSocket;

    fn deref(&self) -> &EventSocket {
        &self.socket
    }
}

impl std::fmt::Debug for InboundSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundSocket")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl InboundSocket {
    /// Connect to FreeSWITCH and authenticate with a password.
    pub async fn connect(host: &str, port: u16, password: &str) -> EslResult<Self> {
        Self::connect_with_options(host, port, password, ConnectOptions::default()).await
    }

    /// Connect to FreeSWITCH with custom options.
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        password: &str,
        options: ConnectOptions,
    ) -> EslResult<Self> {
        info!("Connecting to FreeSWITCH at {}:{}", host, port);

        let mut stream = tcp_connect_with_timeout(host, port, options.connect_timeout).await?;
        let mut parser = EslParser::new();
        let mut read_buffer = [0u8; SOCKET_BUF_SIZE];

        authenticate(
            &mut stream,
            &mut parser,
            &mut read_buffer,
            password,
            options.connect_timeout,
        )
        .await?;

        info!("Successfully connected and authenticated to FreeSWITCH");
        Ok(Self {
            socket: EventSocket::start(stream, parser, &options),
        })
    }

    /// The underlying connection handle (Clone + Send).
    pub fn socket(&self) -> &EventSocket {
        &self.socket
    }

    /// Originate a call to `endpoint`, parking it on answer.
    ///
    /// See [`originate_app`](Self::originate_app).
    pub async fn originate(
        &self,
        endpoint: &str,
        options: OriginateOptions,
    ) -> EslResult<OriginateResult> {
        self.originate_app(endpoint, options, "park")
            .await
    }

    /// Originate a call to `endpoint` and hand the answered leg to
    /// `application`.
    ///
    /// Issues `bgapi originate <options><endpoint> &<application>` and
    /// resolves with the first qualifying channel event for the minted
    /// `origination_uuid`: `CHANNEL_ANSWER`, `CHANNEL_HANGUP`, or
    /// `CHANNEL_PROGRESS` when `return_ring_ready` is set. If the
    /// background job fails before any of those, the result is built from
    /// the job failure instead. Exactly one of the two paths resolves.
    pub async fn originate_app(
        &self,
        endpoint: &str,
        mut options: OriginateOptions,
        application: &str,
    ) -> EslResult<OriginateResult> {
        let uuid = match options
            .uuid
            .as_deref()
            .filter(|u| !u.is_empty())
        {
            Some(uuid) => uuid.to_string(),
            None => {
                let minted = Uuid::new_v4().to_string();
                options.uuid = Some(minted.clone());
                minted
            }
        };
        let return_ring_ready = options.return_ring_ready;

        let mut wanted = vec![EVENT_CHANNEL_ANSWER, EVENT_CHANNEL_HANGUP];
        if return_ring_ready {
            wanted.push(EVENT_CHANNEL_PROGRESS);
        }
        self.socket
            .ensure_events_subscribed(&wanted)
            .await?;

        // Subscribe before dispatching so a channel event racing the job
        // reply is buffered, not missed.
        let mut events = self
            .socket
            .events();

        let command = format!("{}{} &{}", options, endpoint, application);
        info!("originate {}", command);

        let job = self
            .socket
            .bgapi("originate", Some(&command), None);
        tokio::pin!(job);
        let mut job_pending = true;

        let qualifies = |event: &EventMessage| {
            event.uuid() == Some(uuid.as_str())
                && match event.event_name() {
                    Some(EVENT_CHANNEL_ANSWER) | Some(EVENT_CHANNEL_HANGUP) => true,
                    Some(EVENT_CHANNEL_PROGRESS) => return_ring_ready,
                    _ => false,
                }
        };

        loop {
            // A qualifying event always beats a simultaneous job failure.
            tokio::select! {
                biased;
                event = events.first_match(|event| qualifies(event)) => {
                    return Ok(OriginateResult::from_event(event?));
                }
                result = &mut job, if job_pending => {
                    let result = result?;
                    if !result.success() {
                        debug!(
                            "originate job failed before any channel event: {}",
                            result.error()
                        );
                        return Ok(OriginateResult::from_background_job(&result));
                    }
                    // Job dispatched and completed +OK; the qualifying
                    // channel event decides the outcome.
                    job_pending = false;
                }
            }
        }
    }
}
