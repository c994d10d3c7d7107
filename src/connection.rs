//! Connection management: demultiplexing one ESL socket into command
//! replies, API responses and event streams.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    command::{ApiResponse, CommandReply, EslCommand},
    constants::{
        BROADCAST_CAPACITY, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS,
        EVENT_BACKGROUND_JOB, EVENT_CHANNEL_EXECUTE_COMPLETE, HEADER_CONTENT_DISPOSITION,
        HEADER_TERMINATOR, SOCKET_BUF_SIZE,
    },
    error::{EslError, EslResult},
    event::{BackgroundJobResult, EventMessage},
    message::{BasicMessage, ContentType},
    parser::EslParser,
};

/// Connection status, published through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// ESL session is active.
    Connected,
    /// ESL session ended.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Server sent a text/disconnect-notice
    ServerNotice,
    /// Server sent a text/rude-rejection (client IP not in the ACL)
    Rejected,
    /// The peer violated the wire protocol
    Protocol(String),
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// Client called close()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::Rejected => write!(f, "server rejected the connection"),
            DisconnectReason::Protocol(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested close"),
        }
    }
}

/// Options fixed at connection time.
///
/// Use [`Default::default()`] for standard settings.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// TCP connect timeout (inbound mode). Default: 2 seconds.
    pub connect_timeout: Duration,
    /// Timeout for the synchronous reply to each command. Does not bound
    /// event-correlated waits (`bgapi` jobs, `execute` completions).
    /// Default: 5 seconds; zero disables.
    pub command_timeout: Duration,
    /// Capacity of the per-subscriber event and message buffers.
    /// Default: 1024.
    pub broadcast_capacity: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            broadcast_capacity: BROADCAST_CAPACITY,
        }
    }
}

/// Which reply FIFO a request enqueues on.
#[derive(Debug, Clone, Copy)]
enum QueueKind {
    Command,
    Api,
}

type ReplyQueue = StdMutex<VecDeque<oneshot::Sender<BasicMessage>>>;

/// State shared between client handles and the reader task.
struct SocketInner {
    writer: Mutex<OwnedWriteHalf>,
    /// Pending `command/reply` completions, oldest first.
    command_queue: ReplyQueue,
    /// Pending `api/response` completions, oldest first.
    api_queue: ReplyQueue,
    events_tx: broadcast::Sender<EventMessage>,
    messages_tx: broadcast::Sender<BasicMessage>,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Wakes the reader task out of a blocked read on close().
    shutdown: Notify,
    /// Command response timeout in milliseconds (0 = disabled)
    command_timeout_ms: AtomicU64,
    /// Event names already subscribed on this socket, so correlated
    /// operations can top up the server-side subscription exactly once.
    subscribed_events: StdMutex<HashSet<String>>,
}

impl SocketInner {
    fn queue(&self, kind: QueueKind) -> &ReplyQueue {
        match kind {
            QueueKind::Command => &self.command_queue,
            QueueKind::Api => &self.api_queue,
        }
    }

    /// Flip the status to Disconnected exactly once and fail everything
    /// outstanding. Terminal errors drain BOTH reply queues entirely;
    /// replies are never failed one-per-queue.
    fn terminate(&self, reason: DisconnectReason) {
        let newly_disconnected = self
            .status_tx
            .send_if_modified(|status| {
                if matches!(status, ConnectionStatus::Connected) {
                    *status = ConnectionStatus::Disconnected(reason.clone());
                    true
                } else {
                    false
                }
            });
        if !newly_disconnected {
            return;
        }

        info!("connection terminated: {}", reason);
        Self::drain_queue(&self.command_queue);
        Self::drain_queue(&self.api_queue);
        self.shutdown
            .notify_one();
    }

    /// Dropping the senders completes every pending future with a
    /// connection-closed error.
    fn drain_queue(queue: &ReplyQueue) {
        let drained: Vec<_> = queue
            .lock()
            .unwrap()
            .drain(..)
            .collect();
        drop(drained);
    }
}

/// One ESL connection (Clone + Send).
///
/// All handles share the socket: commands from any task are serialized
/// through the writer mutex, and each request's completion is enqueued
/// together with its write so wire order always equals FIFO order.
/// A handle awaiting its reply does not block other senders, readers or
/// event subscribers.
#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<SocketInner>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for EventSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSocket")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Pop the oldest pending request for this frame kind and complete it.
fn complete_next(queue: &ReplyQueue, message: BasicMessage, kind: &str) {
    let pending = queue
        .lock()
        .unwrap()
        .pop_front();
    match pending {
        // The receiver may have timed out and gone away; the pop itself
        // keeps the FIFO pairing intact.
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => warn!("received {} but no pending request", kind),
    }
}

/// Route one parsed frame. Returns a disconnect reason when the frame is
/// terminal for the connection.
fn dispatch_frame(inner: &SocketInner, message: BasicMessage) -> Option<DisconnectReason> {
    // Every frame is visible on the raw message stream.
    let _ = inner
        .messages_tx
        .send(message.clone());

    match message.content_type() {
        ContentType::CommandReply => {
            complete_next(&inner.command_queue, message, "command/reply");
            None
        }
        ContentType::ApiResponse => {
            complete_next(&inner.api_queue, message, "api/response");
            None
        }
        ContentType::EventPlain | ContentType::EventJson => {
            match EventMessage::from_message(message) {
                Ok(event) => {
                    trace!("event: {:?}", event.event_name());
                    let _ = inner
                        .events_tx
                        .send(event);
                    None
                }
                Err(e) => {
                    warn!("event parse error: {}", e);
                    Some(DisconnectReason::Protocol(e.to_string()))
                }
            }
        }
        ContentType::DisconnectNotice => {
            if message.header(HEADER_CONTENT_DISPOSITION) == Some("linger") {
                debug!("received disconnect notice with linger disposition, ignoring");
                None
            } else {
                info!("received disconnect notice from server");
                Some(DisconnectReason::ServerNotice)
            }
        }
        ContentType::RudeRejection => {
            warn!(
                "server rejected the connection: {}",
                message
                    .body()
                    .unwrap_or("")
                    .trim()
            );
            Some(DisconnectReason::Rejected)
        }
        ContentType::AuthRequest => {
            debug!("ignoring unexpected auth request");
            None
        }
        ContentType::LogData => {
            trace!("log/data frame");
            None
        }
        ContentType::Unknown(ct) => {
            debug!("ignoring frame with content type {:?}", ct);
            None
        }
    }
}

/// Background reader loop
async fn reader_loop(reader: OwnedReadHalf, parser: EslParser, inner: Arc<SocketInner>) {
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(reader, parser, inner.clone()));
    let reason = match futures_util::FutureExt::catch_unwind(result).await {
        Ok(reason) => reason,
        Err(_) => {
            tracing::error!("reader task panicked");
            DisconnectReason::IoError("reader task panicked".to_string())
        }
    };
    inner.terminate(reason);
}

async fn reader_loop_inner(
    mut reader: OwnedReadHalf,
    mut parser: EslParser,
    inner: Arc<SocketInner>,
) -> DisconnectReason {
    let mut read_buffer = [0u8; SOCKET_BUF_SIZE];

    loop {
        // Drain complete frames from buffered data before reading more.
        match parser.parse_message() {
            Ok(Some(message)) => {
                if let Some(reason) = dispatch_frame(&inner, message) {
                    return reason;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("parser error: {}", e);
                return DisconnectReason::Protocol(e.to_string());
            }
        }

        tokio::select! {
            _ = inner.shutdown.notified() => {
                debug!("reader received shutdown signal");
                return DisconnectReason::ClientRequested;
            }
            read = reader.read(&mut read_buffer) => match read {
                Ok(0) => {
                    return if parser.is_idle() {
                        debug!("connection closed (EOF)");
                        DisconnectReason::ConnectionClosed
                    } else {
                        DisconnectReason::Protocol("stream ended mid-frame".to_string())
                    };
                }
                Ok(n) => {
                    trace!("read {} bytes from socket", n);
                    if let Err(e) = parser.add_data(&read_buffer[..n]) {
                        warn!("buffer error: {}", e);
                        return DisconnectReason::Protocol(e.to_string());
                    }
                }
                Err(e) => {
                    warn!("read error: {}", e);
                    return DisconnectReason::IoError(e.to_string());
                }
            }
        }
    }
}

impl EventSocket {
    /// Take ownership of an established TCP stream and spawn the reader
    /// task. `parser` carries any bytes already buffered during a
    /// handshake.
    pub(crate) fn start(stream: TcpStream, parser: EslParser, options: &ConnectOptions) -> Self {
        let (read_half, write_half) = stream.into_split();

        let (events_tx, _) = broadcast::channel(
            options
                .broadcast_capacity
                .max(1),
        );
        let (messages_tx, _) = broadcast::channel(
            options
                .broadcast_capacity
                .max(1),
        );
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);

        let inner = Arc::new(SocketInner {
            writer: Mutex::new(write_half),
            command_queue: StdMutex::new(VecDeque::new()),
            api_queue: StdMutex::new(VecDeque::new()),
            events_tx,
            messages_tx,
            status_tx,
            shutdown: Notify::new(),
            command_timeout_ms: AtomicU64::new(
                options
                    .command_timeout
                    .as_millis() as u64,
            ),
            subscribed_events: StdMutex::new(HashSet::new()),
        });

        tokio::spawn(reader_loop(read_half, parser, inner.clone()));

        EventSocket { inner, status_rx }
    }

    /// Enqueue a pending reply and write the frame, as one atomic step
    /// under the writer mutex. The mutex is released once the bytes are
    /// out; the reply arrives later through the returned channel.
    async fn send_frame(
        &self,
        kind: QueueKind,
        wire: &str,
        log_line: &str,
    ) -> EslResult<oneshot::Receiver<BasicMessage>> {
        if !self.is_connected() {
            return Err(EslError::NotConnected);
        }

        debug!("sending command: {}", log_line);
        let (tx, rx) = oneshot::channel();

        let mut writer = self
            .inner
            .writer
            .lock()
            .await;
        self.inner
            .queue(kind)
            .lock()
            .unwrap()
            .push_back(tx);

        if let Err(e) = writer
            .write_all(wire.as_bytes())
            .await
        {
            // A partial write desynchronizes the stream; the connection is
            // unusable either way.
            warn!("write failed: {}", e);
            let _ = writer
                .shutdown()
                .await;
            drop(writer);
            self.inner
                .terminate(DisconnectReason::IoError(e.to_string()));
            return Err(EslError::Io(e));
        }

        Ok(rx)
    }

    /// Wait for the reply with the configured command timeout. On timeout
    /// the FIFO entry stays in place: the eventual reply pops the dead
    /// sender, so pairing with later requests is preserved.
    async fn await_reply(&self, rx: oneshot::Receiver<BasicMessage>) -> EslResult<BasicMessage> {
        let timeout_ms = self
            .inner
            .command_timeout_ms
            .load(Ordering::Relaxed);
        if timeout_ms == 0 {
            return rx
                .await
                .map_err(|_| EslError::ConnectionClosed);
        }

        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(EslError::ConnectionClosed),
            Err(_) => Err(EslError::Timeout { timeout_ms }),
        }
    }

    async fn command_with_wire(&self, wire: String, log_line: &str) -> EslResult<CommandReply> {
        let rx = self
            .send_frame(QueueKind::Command, &wire, log_line)
            .await?;
        let message = self
            .await_reply(rx)
            .await?;
        let reply = CommandReply::new(message);
        debug!("command reply: success={}", reply.success());
        Ok(reply)
    }

    /// Send a raw socket command and wait for its `command/reply`.
    ///
    /// The text is written followed by the frame terminator; multi-line
    /// commands (e.g. `bgapi` with a `Job-UUID` header) are allowed.
    pub async fn send_command(&self, command: &str) -> EslResult<CommandReply> {
        let wire = format!("{}{}", command, HEADER_TERMINATOR);
        let log_line = command
            .lines()
            .next()
            .unwrap_or("")
            .to_string();
        self.command_with_wire(wire, &log_line)
            .await
    }

    /// Authenticate with a password (inbound mode).
    pub async fn auth(&self, password: &str) -> EslResult<CommandReply> {
        let wire = EslCommand::Auth {
            password: password.to_string(),
        }
        .to_wire_format()?;
        self.command_with_wire(wire, "auth [REDACTED]")
            .await
    }

    /// Execute an API command and wait for its `api/response`.
    ///
    /// FreeSWITCH blocks the socket during `api`; use
    /// [`bgapi`](Self::bgapi) for long-running commands.
    pub async fn api(&self, command: &str) -> EslResult<ApiResponse> {
        let wire = EslCommand::Api {
            command: command.to_string(),
        }
        .to_wire_format()?;
        let rx = self
            .send_frame(QueueKind::Api, &wire, &format!("api {}", command))
            .await?;
        let message = self
            .await_reply(rx)
            .await?;
        Ok(ApiResponse::new(message))
    }

    /// Execute a background API command and wait for its `BACKGROUND_JOB`
    /// completion event.
    ///
    /// A fresh job UUID is minted when `job_uuid` is `None`. The completion
    /// may arrive before or after the synchronous dispatch reply; the
    /// dispatch reply is consumed from the command FIFO and used only to
    /// detect rejection (`-ERR` resolves the result immediately and the
    /// event wait is cancelled).
    pub async fn bgapi(
        &self,
        command: &str,
        arg: Option<&str>,
        job_uuid: Option<&str>,
    ) -> EslResult<BackgroundJobResult> {
        let job_uuid = job_uuid
            .map(str::to_string)
            .unwrap_or_else(|| {
                uuid::Uuid::new_v4()
                    .to_string()
            });

        self.ensure_events_subscribed(&[EVENT_BACKGROUND_JOB])
            .await?;

        // Subscribe before the write so a completion racing the dispatch
        // reply is buffered rather than missed.
        let mut events = self.events();

        let wire = EslCommand::BgApi {
            command: command.to_string(),
            arg: arg.map(str::to_string),
            job_uuid: job_uuid.clone(),
        }
        .to_wire_format()?;
        let reply = self
            .command_with_wire(wire, &format!("bgapi {}", command))
            .await?;

        if !reply.success() {
            debug!("bgapi dispatch rejected: {:?}", reply.reply_text());
            return Ok(BackgroundJobResult::from_dispatch_failure(
                reply
                    .reply_text()
                    .unwrap_or(""),
            ));
        }

        let event = events
            .first_match(|event| {
                event.event_name() == Some(EVENT_BACKGROUND_JOB)
                    && event.job_uuid() == Some(job_uuid.as_str())
            })
            .await?;
        Ok(BackgroundJobResult::from_event(event))
    }

    /// Execute a dialplan application on a channel and wait for its
    /// `CHANNEL_EXECUTE_COMPLETE` event (matched on UUID and application).
    ///
    /// A `-ERR` dispatch reply fails the call immediately; no completion
    /// event would ever arrive for a rejected `sendmsg`.
    pub async fn execute(
        &self,
        uuid: &str,
        app: &str,
        arg: Option<&str>,
    ) -> EslResult<EventMessage> {
        self.ensure_events_subscribed(&[EVENT_CHANNEL_EXECUTE_COMPLETE])
            .await?;
        let mut events = self.events();

        let wire = EslCommand::Execute {
            uuid: uuid.to_string(),
            app: app.to_string(),
            arg: arg.map(str::to_string),
        }
        .to_wire_format()?;
        let reply = self
            .command_with_wire(wire, &format!("sendmsg {} execute {}", uuid, app))
            .await?;
        reply.into_result()?;

        events
            .first_match(|event| {
                event.event_name() == Some(EVENT_CHANNEL_EXECUTE_COMPLETE)
                    && event.uuid() == Some(uuid)
                    && event.application() == Some(app)
            })
            .await
    }

    /// Subscribe to plain-format events by name (`ALL` for everything).
    pub async fn subscribe_events(&self, names: &[&str]) -> EslResult<()> {
        let list = names.join(" ");
        let wire = EslCommand::Events {
            events: list.clone(),
        }
        .to_wire_format()?;
        self.command_with_wire(wire, &format!("event plain {}", list))
            .await?
            .into_result()?;

        let mut subscribed = self
            .inner
            .subscribed_events
            .lock()
            .unwrap();
        for name in names {
            subscribed.insert(name.to_string());
        }
        Ok(())
    }

    /// Top up the server-side subscription with any of `names` not yet
    /// subscribed on this socket.
    pub(crate) async fn ensure_events_subscribed(&self, names: &[&str]) -> EslResult<()> {
        let missing: Vec<&str> = {
            let subscribed = self
                .inner
                .subscribed_events
                .lock()
                .unwrap();
            if subscribed.contains("ALL") {
                return Ok(());
            }
            names
                .iter()
                .copied()
                .filter(|name| !subscribed.contains(*name))
                .collect()
        };

        if missing.is_empty() {
            return Ok(());
        }
        self.subscribe_events(&missing)
            .await
    }

    /// Install a server-side event filter.
    pub async fn filter(&self, header: &str, value: &str) -> EslResult<()> {
        let wire = EslCommand::Filter {
            header: header.to_string(),
            value: value.to_string(),
        }
        .to_wire_format()?;
        self.command_with_wire(wire, &format!("filter {} {}", header, value))
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Remove a server-side event filter. Without a value, removes every
    /// filter for the header.
    pub async fn filter_delete(&self, header: &str, value: Option<&str>) -> EslResult<()> {
        let wire = EslCommand::FilterDelete {
            header: header.to_string(),
            value: value.map(str::to_string),
        }
        .to_wire_format()?;
        self.command_with_wire(wire, &format!("filter delete {}", header))
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Subscribe to all events for one session (`myevents`). Outbound
    /// sockets omit the UUID; inbound sockets must supply one.
    pub async fn myevents(&self, uuid: Option<&str>) -> EslResult<()> {
        let wire = EslCommand::MyEvents {
            uuid: uuid.map(str::to_string),
        }
        .to_wire_format()?;
        self.command_with_wire(wire, "myevents plain")
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Keep the socket open past channel hangup (outbound mode).
    pub async fn linger(&self, timeout: Option<u32>) -> EslResult<CommandReply> {
        let wire = EslCommand::Linger { timeout }.to_wire_format()?;
        self.command_with_wire(wire, "linger")
            .await
    }

    /// Cancel linger mode (outbound mode).
    pub async fn nolinger(&self) -> EslResult<CommandReply> {
        let wire = EslCommand::NoLinger.to_wire_format()?;
        self.command_with_wire(wire, "nolinger")
            .await
    }

    /// Fire an event into FreeSWITCH's event bus.
    pub async fn sendevent(
        &self,
        name: &str,
        headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> EslResult<CommandReply> {
        let wire = EslCommand::SendEvent {
            name: name.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.map(str::to_string),
        }
        .to_wire_format()?;
        self.command_with_wire(wire, &format!("sendevent {}", name))
            .await
    }

    /// Send the `exit` command; the server closes the socket after
    /// replying.
    pub async fn exit(&self) -> EslResult<CommandReply> {
        let wire = EslCommand::Exit.to_wire_format()?;
        self.command_with_wire(wire, "exit")
            .await
    }

    /// Send a no-op command (keepalive).
    pub async fn noop(&self) -> EslResult<CommandReply> {
        let wire = EslCommand::NoOp.to_wire_format()?;
        self.command_with_wire(wire, "noop")
            .await
    }

    /// Subscribe to parsed events. Each subscriber has an independent
    /// bounded buffer; a slow subscriber loses the oldest events and
    /// observes [`EslError::Lagged`]. The stream completes after the
    /// connection terminates and buffered events are drained.
    pub fn events(&self) -> EventStream {
        EventStream {
            inner: Subscription {
                rx: self
                    .inner
                    .events_tx
                    .subscribe(),
                status_rx: self
                    .inner
                    .status_tx
                    .subscribe(),
            },
        }
    }

    /// Subscribe to every raw frame the connection receives, including
    /// command replies and log lines. Same buffering and completion
    /// semantics as [`events`](Self::events).
    pub fn messages(&self) -> MessageStream {
        MessageStream {
            inner: Subscription {
                rx: self
                    .inner
                    .messages_tx
                    .subscribe(),
                status_rx: self
                    .inner
                    .status_tx
                    .subscribe(),
            },
        }
    }

    /// Set the command response timeout. Zero disables it.
    pub fn set_command_timeout(&self, duration: Duration) {
        self.inner
            .command_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether the connection is alive (not yet disconnected).
    pub fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }

    /// Close the connection: fail every pending request, complete the
    /// event and message streams, stop the reader task, and shut down the
    /// TCP write half. Idempotent.
    pub async fn close(&self) {
        self.inner
            .terminate(DisconnectReason::ClientRequested);
        let mut writer = self
            .inner
            .writer
            .lock()
            .await;
        let _ = writer
            .shutdown()
            .await;
    }

    /// Terminate without awaiting the TCP shutdown. Used on drop paths
    /// where no executor is available; the write half closes once the
    /// last handle drops.
    pub(crate) fn close_now(&self) {
        self.inner
            .terminate(DisconnectReason::ClientRequested);
    }
}

/// Shared receive logic for the event and message streams: drain whatever
/// the broadcast buffered, then complete once the connection is gone.
struct Subscription<T: Clone> {
    rx: broadcast::Receiver<T>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl<T: Clone> Subscription<T> {
    async fn recv(&mut self) -> Option<EslResult<T>> {
        use broadcast::error::{RecvError, TryRecvError};

        loop {
            match self
                .rx
                .try_recv()
            {
                Ok(item) => return Some(Ok(item)),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("subscriber lagged, dropped {} oldest messages", skipped);
                    return Some(Err(EslError::Lagged { skipped }));
                }
                Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Empty) => {}
            }

            if !matches!(
                *self
                    .status_rx
                    .borrow(),
                ConnectionStatus::Connected
            ) {
                return None;
            }

            tokio::select! {
                result = self.rx.recv() => match result {
                    Ok(item) => return Some(Ok(item)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("subscriber lagged, dropped {} oldest messages", skipped);
                        return Some(Err(EslError::Lagged { skipped }));
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = self.status_rx.changed() => {}
            }
        }
    }

    fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }
}

/// Multi-subscriber stream of parsed [`EventMessage`]s.
pub struct EventStream {
    inner: Subscription<EventMessage>,
}

impl EventStream {
    /// Receive the next event; `None` once the connection has terminated
    /// and the buffer is drained. `Err(EslError::Lagged)` marks dropped
    /// events for this subscriber.
    pub async fn recv(&mut self) -> Option<EslResult<EventMessage>> {
        self.inner
            .recv()
            .await
    }

    /// Take the first event matching the predicate, skipping the rest.
    ///
    /// Lag markers are logged and skipped: a correlated waiter prefers a
    /// late match over a spurious failure. Fails with
    /// [`EslError::ConnectionClosed`] when the stream completes first.
    pub async fn first_match<F>(&mut self, mut predicate: F) -> EslResult<EventMessage>
    where
        F: FnMut(&EventMessage) -> bool,
    {
        while let Some(item) = self
            .recv()
            .await
        {
            match item {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => {}
                Err(EslError::Lagged { skipped }) => {
                    warn!("event waiter lagged, {} events unseen", skipped);
                }
                Err(e) => return Err(e),
            }
        }
        Err(EslError::ConnectionClosed)
    }

    /// Whether the underlying connection is alive.
    pub fn is_connected(&self) -> bool {
        self.inner
            .is_connected()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Multi-subscriber stream of every raw [`BasicMessage`] frame.
pub struct MessageStream {
    inner: Subscription<BasicMessage>,
}

impl MessageStream {
    /// Receive the next frame; `None` once the connection has terminated
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<EslResult<BasicMessage>> {
        self.inner
            .recv()
            .await
    }

    /// Whether the underlying connection is alive.
    pub fn is_connected(&self) -> bool {
        self.inner
            .is_connected()
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}
