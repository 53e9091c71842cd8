//! Datagram transport abstraction for Hazel.
//!
//! The reliability layer above this crate only needs two things from the
//! network: "send these bytes" and "give me the next datagram". The
//! [`Connection`] trait captures exactly that, and [`Connector`] dials a
//! new connection when the session is (re)established, e.g. after the
//! server redirects us to another node.
//!
//! DNS resolution and socket tuning are deliberately not handled here;
//! callers pass an already-resolved [`SocketAddr`].
//!
//! # Feature Flags
//!
//! - `udp` (default): plain UDP sockets via `tokio::net::UdpSocket`
//!
//! The in-process [`memory`] transport is always available. It backs the
//! test suites of the higher crates and lets a test play the server side
//! of a conversation.

mod error;
pub mod memory;
#[cfg(feature = "udp")]
mod udp;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryListener};
#[cfg(feature = "udp")]
pub use udp::{UdpConnection, UdpConnector};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connected datagram channel to one remote endpoint.
///
/// Methods return `Send` futures so a connection can be driven from
/// spawned tasks (retry timers run on their own task).
pub trait Connection: Send + Sync + 'static {
    /// Sends one datagram to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next datagram from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is closed locally or by the
    /// peer. Implementations must be cancel-safe: the session polls this
    /// inside `tokio::select!`.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;

    /// Closes the connection. Further `recv` calls return `Ok(None)`.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The remote address this connection talks to.
    fn peer_addr(&self) -> SocketAddr;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// Dials new connections.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Opens a connection to `addr`.
    fn connect(
        &self,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId(7);
        assert_eq!(id.to_string(), "conn-7");
    }
}
