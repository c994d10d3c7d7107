//! Outbound mode: FreeSWITCH dials us, one socket per call leg.

use std::ops::Deref;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    connection::EventSocket,
    error::{EslError, EslResult},
    event::EventMessage,
};

/// One socket-per-call connection accepted from FreeSWITCH's `socket`
/// dialplan application.
///
/// The first operation must be [`connect`](Self::connect), which asks
/// FreeSWITCH for the channel data of the call leg that opened the socket.
/// Derefs to [`EventSocket`] for everything else.
pub struct OutboundSocket {
    socket: EventSocket,
    channel_data: Mutex<Option<EventMessage>>,
}

impl Deref for OutboundSocket {
    type Target = EventSocket;

    fn deref(&self) -> &EventSocket {
        &self.socket
    }
}

impl std::fmt::Debug for OutboundSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSocket")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl OutboundSocket {
    pub(crate) fn new(socket: EventSocket) -> Self {
        Self {
            socket,
            channel_data: Mutex::new(None),
        }
    }

    /// Send `connect` and hydrate the `CHANNEL_DATA` event for this call
    /// leg.
    ///
    /// FreeSWITCH answers with a `command/reply` whose headers carry the
    /// full event (no nested body). The result is cached; subsequent calls
    /// return the cache without touching the wire.
    pub async fn connect(&self) -> EslResult<EventMessage> {
        let mut cached = self
            .channel_data
            .lock()
            .await;
        if let Some(channel_data) = cached.as_ref() {
            return Ok(channel_data.clone());
        }

        let reply = self
            .socket
            .send_command("connect")
            .await?;
        let channel_data = EventMessage::from_message(reply.into_message())?;
        debug!(
            "hydrated channel data for {:?}",
            channel_data.uuid()
        );
        *cached = Some(channel_data.clone());
        Ok(channel_data)
    }

    /// The cached `CHANNEL_DATA` event, if [`connect`](Self::connect) has
    /// completed.
    pub async fn channel_data(&self) -> Option<EventMessage> {
        self.channel_data
            .lock()
            .await
            .clone()
    }

    /// UUID of the channel that opened this socket.
    pub async fn channel_uuid(&self) -> Option<String> {
        self.channel_data()
            .await?
            .uuid()
            .map(str::to_string)
    }

    /// The underlying connection handle (Clone + Send).
    pub fn socket(&self) -> &EventSocket {
        &self.socket
    }

    /// Execute a dialplan application on this socket's own channel and
    /// wait for its completion event.
    ///
    /// Requires [`connect`](Self::connect) to have run so the channel UUID
    /// is known.
    pub async fn execute_app(&self, app: &str, arg: Option<&str>) -> EslResult<EventMessage> {
        let uuid = self
            .channel_uuid()
            .await
            .ok_or_else(|| {
                EslError::protocol_error("channel data not hydrated, call connect() first")
            })?;
        self.socket
            .execute(&uuid, app, arg)
            .await
    }
}
