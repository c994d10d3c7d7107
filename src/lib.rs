//! FreeSWITCH Event Socket Layer (ESL) client for Rust
//!
//! This crate provides an async client for FreeSWITCH's Event Socket Layer,
//! supporting both directions of the protocol: *inbound mode*, where the
//! client dials FreeSWITCH, authenticates and drives it, and *outbound
//! mode*, where FreeSWITCH dials the client once per call leg from the
//! `socket` dialplan application.
//!
//! # Architecture
//!
//! Each connection runs one background reader task that frames the byte
//! stream and routes every frame by `Content-Type`:
//! - `command/reply` and `api/response` frames complete the oldest pending
//!   request of their kind (FreeSWITCH replies strictly in order, so each
//!   request is enqueued together with its write)
//! - event frames fan out to any number of independent subscribers, and
//!   correlated operations ([`EventSocket::bgapi`], [`EventSocket::execute`],
//!   [`InboundSocket::originate`]) resolve on the matching event regardless
//!   of whether it beats the synchronous reply
//!
//! A request awaiting its reply never blocks other senders or event
//! delivery.
//!
//! # Inbound Connection
//!
//! ```rust,no_run
//! use eventsocket::{EslResult, InboundSocket};
//!
//! #[tokio::main]
//! async fn main() -> EslResult<()> {
//!     let socket = InboundSocket::connect("localhost", 8021, "ClueCon").await?;
//!
//!     let response = socket.api("status").await?;
//!     println!("Status: {}", response.body());
//!
//!     let mut events = socket.events();
//!     socket.subscribe_events(&["CHANNEL_CREATE", "CHANNEL_HANGUP"]).await?;
//!     while let Some(Ok(event)) = events.recv().await {
//!         println!("{:?} on {:?}", event.event_name(), event.uuid());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Originating Calls
//!
//! [`InboundSocket::originate`] dispatches the call as a background job and
//! resolves with the first answer, hangup, or (optionally) ring-ready event
//! for the new channel:
//!
//! ```rust,no_run
//! use eventsocket::{EslResult, InboundSocket, OriginateOptions};
//!
//! #[tokio::main]
//! async fn main() -> EslResult<()> {
//!     let socket = InboundSocket::connect("localhost", 8021, "ClueCon").await?;
//!
//!     let options = OriginateOptions {
//!         caller_id_name: Some("Outbound Call".into()),
//!         caller_id_number: Some("5551234".into()),
//!         timeout_seconds: 30,
//!         ..Default::default()
//!     };
//!     let result = socket.originate("sofia/gateway/provider/18005551234", options).await?;
//!     if result.success() {
//!         println!("answered: {:?}", result.answer_state());
//!     } else {
//!         println!("failed: {}", result.error());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Outbound Mode
//!
//! Run a listener and handle one socket per call. The first operation on
//! each connection must be [`OutboundSocket::connect`], which returns the
//! `CHANNEL_DATA` event describing the call leg:
//!
//! ```rust,no_run
//! use eventsocket::{EslListener, EslResult, OutboundSocket};
//!
//! async fn handle_call(connection: OutboundSocket) -> EslResult<()> {
//!     let channel_data = connection.connect().await?;
//!     println!("call from {:?}", channel_data.header("Caller-Caller-ID-Number"));
//!
//!     connection.linger(None).await?;
//!     connection.execute_app("answer", None).await?;
//!     connection.execute_app("playback", Some("ivr/ivr-welcome.wav")).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> EslResult<()> {
//!     let mut listener = EslListener::bind(8040).await?;
//!     println!("listening on port {}", listener.local_port());
//!
//!     while let Some(connection) = listener.accept().await {
//!         tokio::spawn(async move {
//!             if let Err(e) = handle_call(connection).await {
//!                 eprintln!("call error: {}", e);
//!             }
//!         });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Configure FreeSWITCH to connect to your app:
//! ```xml
//! <action application="socket" data="127.0.0.1:8040 async full"/>
//! ```

pub mod command;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod inbound;
pub mod listener;
pub mod message;
pub mod originate;
pub mod outbound;

pub(crate) mod parser;

pub use command::{ApiResponse, CommandBuilder, CommandReply, EslCommand};
pub use connection::{
    ConnectOptions, ConnectionStatus, DisconnectReason, EventSocket, EventStream, MessageStream,
};
pub use constants::DEFAULT_ESL_PORT;
pub use error::{EslError, EslResult};
pub use event::{BackgroundJobResult, EventMessage};
pub use inbound::InboundSocket;
pub use listener::EslListener;
pub use message::{BasicMessage, ContentType};
pub use originate::{OriginateOptions, OriginateResult};
pub use outbound::OutboundSocket;
