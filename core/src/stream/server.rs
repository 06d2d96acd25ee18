//! TCP server and dialer for the stream channel

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::protocol::constants::DIAL_TIMEOUT;
use crate::stream::session::{SessionConfig, SessionEvent, StreamSession};
use crate::{Error, Result};

/// Event from the stream server
pub enum ServerEvent {
    /// A peer connected; the session read loop is already running
    SessionOpened {
        peer: SocketAddr,
        session: StreamSession,
        events: mpsc::Receiver<SessionEvent>,
    },
}

impl std::fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerEvent::SessionOpened { peer, .. } => {
                f.debug_struct("SessionOpened").field("peer", peer).finish()
            }
        }
    }
}

/// Accepts stream-channel connections for inbound blob transfers
pub struct StreamServer {
    listener: TcpListener,
    port: u16,
}

impl StreamServer {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind: {}", e)))?;

        let actual_port = listener
            .local_addr()
            .map_err(|e| Error::Network(e.to_string()))?
            .port();

        tracing::info!("stream server listening on port {}", actual_port);

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Get the port we're listening on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start accepting connections, one independent session each
    pub fn start(self, config: SessionConfig) -> (mpsc::Receiver<ServerEvent>, StreamServerHandle) {
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!("incoming stream connection from {}", peer);
                        stream.set_nodelay(true).ok();
                        let (session, events) = StreamSession::spawn(stream, config);
                        if tx
                            .send(ServerEvent::SessionOpened {
                                peer,
                                session,
                                events,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                    }
                }
            }
        });

        (rx, StreamServerHandle { task: handle })
    }
}

/// Handle to the running stream server
pub struct StreamServerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl StreamServerHandle {
    /// Stop accepting connections
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Open a client connection to a peer's stream server
pub async fn dial(
    addr: SocketAddr,
    config: SessionConfig,
) -> Result<(StreamSession, mpsc::Receiver<SessionEvent>)> {
    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Network(format!("connect to {} timed out", addr)))?
        .map_err(|e| Error::Network(e.to_string()))?;
    stream.set_nodelay(true).ok();

    Ok(StreamSession::spawn(stream, config))
}
