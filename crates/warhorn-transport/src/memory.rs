//! In-memory transport: a connector whose connections are paired with a
//! [`MemoryPeer`] that plays the server side.
//!
//! ```text
//! client ── MemoryConnection ══ channels ══ MemoryPeer ── test / embedder
//! ```
//!
//! Every successful [`MemoryConnector::connect`] hands the peer half to the
//! [`MemoryAcceptor`] returned alongside the connector.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Connector, Frame, TransportError};

/// State shared between the two halves of one in-memory link.
#[derive(Default)]
struct LinkFlags {
    /// Set by the peer to make every client write fail.
    fail_writes: AtomicBool,
    /// Set when the client calls `close`.
    closed_by_client: AtomicBool,
}

/// A [`Connector`] that creates in-memory connections.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    /// Creates a connector and the acceptor that receives the server side
    /// of each connection it opens.
    pub fn new() -> (Self, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            refuse: AtomicBool::new(false),
        };
        (connector, MemoryAcceptor { peers: rx })
    }

    /// While set, `connect` fails with [`TransportError::ConnectFailed`].
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        uri: &str,
    ) -> Result<Self::Connection, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("memory connector refused {uri}"),
            )));
        }

        let id = ConnectionId::next();
        let flags = Arc::new(LinkFlags::default());
        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            id,
            to_client: std::sync::Mutex::new(Some(to_client)),
            from_client,
            flags: Arc::clone(&flags),
        };
        self.peers.send(peer).map_err(|_| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "memory acceptor dropped",
            ))
        })?;

        tracing::debug!(%id, uri, "opened in-memory connection");
        Ok(MemoryConnection {
            id,
            to_peer,
            from_peer: Mutex::new(from_peer),
            flags,
        })
    }
}

/// Receives the server side of each connection a [`MemoryConnector`] opens.
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryAcceptor {
    /// Waits for the next connection. Returns `None` once the connector is
    /// dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// The client half of an in-memory link.
pub struct MemoryConnection {
    id: ConnectionId,
    to_peer: mpsc::UnboundedSender<String>,
    from_peer: Mutex<mpsc::UnboundedReceiver<Frame>>,
    flags: Arc<LinkFlags>,
}

impl Connection for MemoryConnection {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.flags.closed_by_client.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed(
                "connection closed locally".into(),
            ));
        }
        if self.flags.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer rejected write",
            )));
        }
        self.to_peer.send(text).map_err(|_| {
            TransportError::ConnectionClosed("peer went away".into())
        })
    }

    async fn recv(&self) -> Result<Option<Frame>, TransportError> {
        if self.flags.closed_by_client.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.from_peer.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.flags.closed_by_client.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// The server half of an in-memory link.
pub struct MemoryPeer {
    id: ConnectionId,
    to_client: std::sync::Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    from_client: mpsc::UnboundedReceiver<String>,
    flags: Arc<LinkFlags>,
}

impl MemoryPeer {
    /// The ID of the client connection this peer is paired with.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Delivers a text message to the client. Returns `false` if the link
    /// is already closed.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Frame::Text(text.into()))
    }

    /// Delivers a binary message to the client.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.push(Frame::Binary(data.into()))
    }

    fn push(&self, frame: Frame) -> bool {
        match self.to_client.lock() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|tx| tx.send(frame).is_ok()),
            Err(_) => false,
        }
    }

    /// Waits for the next text message the client wrote. Returns `None`
    /// once the client side is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Returns the next message the client wrote, if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Closes the server side. The client's next `recv` returns `Ok(None)`
    /// after any frames already sent.
    pub fn close(&self) {
        if let Ok(mut guard) = self.to_client.lock() {
            guard.take();
        }
    }

    /// Makes every subsequent client write fail.
    pub fn fail_writes(&self) {
        self.flags.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the client has closed its side.
    pub fn is_closed_by_client(&self) -> bool {
        self.flags.closed_by_client.load(Ordering::SeqCst)
    }
}
