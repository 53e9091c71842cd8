//! UDP transport implementation using `tokio::net::UdpSocket`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::{Connection, ConnectionId, Connector, TransportError};

/// Largest datagram we are prepared to receive.
const MAX_DATAGRAM: usize = 65_507;

/// Dials [`UdpConnection`]s from an ephemeral local port.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    type Connection = UdpConnection;

    async fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<UdpConnection, TransportError> {
        let local: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(TransportError::ConnectFailed)?;
        socket
            .connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;

        let id = ConnectionId::next();
        tracing::debug!(%id, %addr, "UDP socket connected");

        Ok(UdpConnection {
            id,
            peer: addr,
            socket,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        })
    }
}

/// A UDP socket connected to a single remote endpoint.
pub struct UdpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    socket: UdpSocket,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Connection for UdpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(
                "socket closed locally".into(),
            ));
        }
        self.socket
            .send(data)
            .await
            .map(|_| ())
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Bytes>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::select! {
            res = self.socket.recv(&mut buf) => {
                let len = res.map_err(TransportError::ReceiveFailed)?;
                buf.truncate(len);
                Ok(Some(Bytes::from(buf)))
            }
            _ = self.close_signal.notified() => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
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
