//! Listener for outbound-mode connections from FreeSWITCH.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectOptions, EventSocket},
    constants::LISTENER_BACKLOG,
    error::EslResult,
    outbound::OutboundSocket,
    parser::EslParser,
};

/// Accepts outbound-mode connections and hands each one out as an
/// [`OutboundSocket`].
///
/// The listener owns its live connections: [`close`](Self::close) stops
/// accepting, completes the connection stream, and closes every connection
/// it produced. Dropping the listener does the same without awaiting the
/// TCP shutdowns.
///
/// Configure FreeSWITCH to dial it:
/// ```xml
/// <action application="socket" data="127.0.0.1:8040 async full"/>
/// ```
pub struct EslListener {
    local_addr: SocketAddr,
    connections_rx: mpsc::Receiver<OutboundSocket>,
    shutdown_tx: watch::Sender<bool>,
    live: Arc<StdMutex<Vec<EventSocket>>>,
    accept_task: JoinHandle<()>,
}

impl std::fmt::Debug for EslListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl EslListener {
    /// Bind on all interfaces. Port 0 picks a free port; read it back with
    /// [`local_port`](Self::local_port).
    pub async fn bind(port: u16) -> EslResult<Self> {
        Self::bind_with_options(port, ConnectOptions::default()).await
    }

    /// Bind with custom per-connection options.
    pub async fn bind_with_options(port: u16, options: ConnectOptions) -> EslResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("listening for outbound connections on {}", local_addr);

        let (connections_tx, connections_rx) = mpsc::channel(LISTENER_BACKLOG);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let live = Arc::new(StdMutex::new(Vec::new()));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            connections_tx,
            live.clone(),
            shutdown_rx,
            options,
        ));

        Ok(Self {
            local_addr,
            connections_rx,
            shutdown_tx,
            live,
            accept_task,
        })
    }

    /// Next accepted connection, or `None` once the listener has closed.
    pub async fn accept(&mut self) -> Option<OutboundSocket> {
        self.connections_rx
            .recv()
            .await
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port (useful after binding port 0).
    pub fn local_port(&self) -> u16 {
        self.local_addr
            .port()
    }

    /// Stop accepting, complete the connection stream, and close every
    /// live connection this listener produced.
    pub async fn close(&mut self) {
        debug!("closing listener on {}", self.local_addr);
        let _ = self
            .shutdown_tx
            .send(true);

        let live: Vec<EventSocket> = self
            .live
            .lock()
            .unwrap()
            .drain(..)
            .collect();
        for socket in live {
            socket
                .close()
                .await;
        }
    }
}

impl Drop for EslListener {
    fn drop(&mut self) {
        let _ = self
            .shutdown_tx
            .send(true);
        self.accept_task
            .abort();
        // Fail pending requests and complete streams even when close()
        // was never awaited; the TCP halves close as handles drop.
        for socket in self
            .live
            .lock()
            .unwrap()
            .drain(..)
        {
            socket.close_now();
        }
    }
}

/// Background accept loop. Accept errors are logged and the loop keeps
/// going; it terminates on listener shutdown or when the connection
/// consumer goes away.
async fn accept_loop(
    listener: TcpListener,
    connections_tx: mpsc::Sender<OutboundSocket>,
    live: Arc<StdMutex<Vec<EventSocket>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    options: ConnectOptions,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("listener shutting down");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept error: {}", e);
                continue;
            }
        };

        info!("accepted outbound connection from {}", addr);
        let socket = EventSocket::start(stream, EslParser::new(), &options);
        {
            let mut live = live
                .lock()
                .unwrap();
            // Closed peers must not pin dead connections in memory.
            live.retain(|s| s.is_connected());
            live.push(socket.clone());
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("listener shutting down");
                return;
            }
            sent = connections_tx.send(OutboundSocket::new(socket)) => {
                if sent.is_err() {
                    debug!("connection consumer dropped, listener exiting");
                    return;
                }
            }
        }
    }
}
