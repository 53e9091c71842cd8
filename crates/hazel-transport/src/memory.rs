//! In-process datagram transport.
//!
//! A [`MemoryConnector`] is a tiny simulated network: endpoints register an
//! address with [`MemoryConnector::listen`], and `connect` hands the
//! listener the far end of a fresh channel pair. Datagrams are delivered
//! whole and in order, which is enough to script a server in tests while
//! the client code under test talks through the ordinary [`Connection`]
//! trait.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::{Connection, ConnectionId, Connector, TransportError};

type Registry = Arc<StdMutex<HashMap<SocketAddr, mpsc::UnboundedSender<MemoryConnection>>>>;

/// Dials [`MemoryConnection`]s to endpoints registered on the same network.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    endpoints: Registry,
}

impl MemoryConnector {
    /// Creates an empty network with no listening endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listening endpoint at `addr`, replacing any previous one.
    pub fn listen(&self, addr: SocketAddr) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.insert(addr, tx);
        }
        tracing::debug!(%addr, "memory endpoint listening");
        MemoryListener { addr, incoming: rx }
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<MemoryConnection, TransportError> {
        let listener = self
            .endpoints
            .lock()
            .ok()
            .and_then(|endpoints| endpoints.get(&addr).cloned())
            .ok_or(TransportError::Unreachable(addr))?;

        let local: SocketAddr = ([127, 0, 0, 1], 0).into();
        let (client, server) = MemoryConnection::pair(addr, local);
        listener
            .send(server)
            .map_err(|_| TransportError::Unreachable(addr))?;
        Ok(client)
    }
}

/// The accepting side of a memory endpoint.
pub struct MemoryListener {
    addr: SocketAddr,
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryListener {
    /// Waits for the next client to connect. Returns `None` once the
    /// network has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.incoming.recv().await
    }

    /// The address this endpoint listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// One end of an in-process datagram channel.
pub struct MemoryConnection {
    id: ConnectionId,
    peer: SocketAddr,
    tx: StdMutex<Option<mpsc::UnboundedSender<Bytes>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl MemoryConnection {
    /// Creates two connected ends. The first end reports `a_peer` as its
    /// peer address, the second reports `b_peer`.
    pub fn pair(a_peer: SocketAddr, b_peer: SocketAddr) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_peer, a_tx, a_rx), Self::new(b_peer, b_tx, b_rx))
    }

    fn new(
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    /// Returns the next datagram if one is already queued.
    pub fn try_recv(&self) -> Option<Bytes> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let sent = match self.tx.lock() {
            Ok(tx) => tx
                .as_ref()
                .map(|tx| tx.send(Bytes::copy_from_slice(data)).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        };
        if sent {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed("memory peer gone".into()))
        }
    }

    async fn recv(&self) -> Result<Option<Bytes>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            data = rx.recv() => Ok(data),
            _ = self.close_signal.notified() => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        self.close_signal.notify_waiters();
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    #[tokio::test]
    async fn test_pair_delivers_datagrams_both_ways() {
        let (a, b) = MemoryConnection::pair(addr(1), addr(2));

        a.send(&[1, 2, 3]).await.unwrap();
        b.send(&[9]).await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(a.recv().await.unwrap().unwrap().as_ref(), &[9]);
        assert_eq!(a.peer_addr(), addr(1));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (a, b) = MemoryConnection::pair(addr(1), addr(2));

        a.close().await.unwrap();

        assert!(b.recv().await.unwrap().is_none());
        assert!(a.recv().await.unwrap().is_none());
        assert!(a.send(&[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_to_unknown_address_is_unreachable() {
        let net = MemoryConnector::new();

        let result = net.connect(addr(22023)).await;

        assert!(matches!(result, Err(TransportError::Unreachable(a)) if a == addr(22023)));
    }

    #[tokio::test]
    async fn test_listener_accepts_dialed_connection() {
        let net = MemoryConnector::new();
        let mut listener = net.listen(addr(22023));

        let client = net.connect(addr(22023)).await.unwrap();
        let server = listener.accept().await.unwrap();

        client.send(b"hello").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap().as_ref(), b"hello");
        assert_eq!(client.peer_addr(), addr(22023));
        assert_eq!(listener.local_addr(), addr(22023));
    }
}
