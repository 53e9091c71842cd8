//! A reliable-delivery session over one [`Connection`].
//!
//! ```text
//!            send(packet)                          reader task
//!                │                                      │
//!      stamp nonce, encode                     conn.recv() → decode
//!                │                                      │
//!   ┌────────────┴────────────┐          ┌──────────────┼──────────────┐
//!   │ sent window  + retry task│◄─ Ack ──┤ Reliable/Hello/Ping → ack it │
//!   └─────────────────────────┘          │ Disconnect → shut down        │
//!                                        └──────────────┬──────────────┘
//!                                                       ▼
//!                                           SessionEvent channel
//! ```
//!
//! Every reliable packet gets its own retry task. The task resends the
//! exact same bytes every `retry_interval` until the nonce is
//! acknowledged, the nonce falls out of the sent window, or the session
//! closes. Past `max_attempts` resends the session gives up and
//! disconnects with [`DisconnectCause::AcknowledgementTimeout`].
//!
//! Closing is a handshake. The side that calls [`Session::disconnect`]
//! sends Disconnect and waits up to `disconnect_grace` for the peer's own
//! Disconnect (or for the transport to close) before tearing down. The
//! side that receives a Disconnect answers with one and closes at once.
//!
//! Inbound packets are read by a dedicated task so callers can poll the
//! event channel from inside `tokio::select!` without losing datagrams.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hazel_protocol::{Bound, DisconnectInfo, Packet, Payload};
use hazel_transport::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::window::{self, Reception, RecvWindow, SentWindow};
use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Reliability tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Delay between retransmissions of an unacknowledged packet.
    ///
    /// Default: 1500 ms.
    pub retry_interval: Duration,

    /// Retransmissions allowed before the session times out.
    ///
    /// Default: 8.
    pub max_attempts: u32,

    /// How long [`Session::disconnect`] waits for the peer to answer.
    ///
    /// Default: 500 ms.
    pub disconnect_grace: Duration,

    /// Which direction inbound packets travel. A client decodes
    /// clientbound packets; a test standing in for a server flips this.
    pub bound: Bound,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(1500),
            max_attempts: 8,
            disconnect_grace: Duration::from_millis(500),
            bound: Bound::Clientbound,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// [`Session::disconnect`] was called.
    Local,
    /// The peer sent a Disconnect packet.
    Remote(Option<DisconnectInfo>),
    /// A reliable packet ran out of retransmissions.
    AcknowledgementTimeout { nonce: u16 },
    /// The transport stopped delivering (closed or failed).
    TransportClosed,
}

/// What the session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Payloads from a fresh Reliable or Unreliable packet.
    Payloads {
        reliable: bool,
        payloads: Vec<Payload>,
    },
    /// One of our reliable packets was acknowledged.
    Acknowledged { nonce: u16 },
    /// The session is closed. Always the last event.
    Disconnected(DisconnectCause),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct State {
    connected: bool,
    /// Our Disconnect is out; waiting for the peer's.
    closing: bool,
    next_nonce: u16,
    sent: SentWindow,
    recv: RecvWindow,
    retries: HashMap<u16, JoinHandle<()>>,
    ack_waiters: HashMap<u16, oneshot::Sender<()>>,
}

struct Inner<C> {
    conn: C,
    config: SessionConfig,
    state: Mutex<State>,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed: Notify,
}

/// Handle to a running session. Cheap to clone.
pub struct Session<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Session<C> {
    /// Starts a session on `conn` and spawns its reader task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        conn: C,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            conn,
            config,
            state: Mutex::new(State {
                connected: true,
                closing: false,
                next_nonce: 0,
                sent: SentWindow::new(),
                recv: RecvWindow::new(),
                retries: HashMap::new(),
                ack_waiters: HashMap::new(),
            }),
            events,
            closed: Notify::new(),
        });

        // The reader ends on its own once the connection is closed.
        tokio::spawn(read_loop(Arc::clone(&inner)));

        tracing::debug!(conn = %inner.conn.id(), peer = %inner.conn.peer_addr(), "session started");
        (Self { inner }, events_rx)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.conn.peer_addr()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// `false` once the session is closed or closing.
    pub async fn is_connected(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.connected && !state.closing
    }

    /// Nonces sent but not yet acknowledged, newest first.
    pub async fn pending(&self) -> Vec<u16> {
        self.inner.state.lock().await.sent.pending().collect()
    }

    /// Sends a packet. Reliable packets are stamped with the next nonce,
    /// which is returned, and retried until acknowledged.
    ///
    /// # Errors
    /// [`SessionError::Disconnected`] once the session is closed, or the
    /// encode/transport error for this packet.
    pub async fn send(&self, packet: Packet) -> Result<Option<u16>, SessionError> {
        self.send_inner(packet, None).await
    }

    /// Sends a reliable packet and waits for its acknowledgement.
    ///
    /// # Errors
    /// [`SessionError::Disconnected`] if the session closes first,
    /// whatever the reason.
    pub async fn send_acked(&self, packet: Packet) -> Result<u16, SessionError> {
        let (tx, rx) = oneshot::channel();
        let nonce = self
            .send_inner(packet, Some(tx))
            .await?
            .ok_or(SessionError::NotReliable)?;
        rx.await.map_err(|_| SessionError::Disconnected)?;
        Ok(nonce)
    }

    async fn send_inner(
        &self,
        mut packet: Packet,
        waiter: Option<oneshot::Sender<()>>,
    ) -> Result<Option<u16>, SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !state.connected || state.closing {
            return Err(SessionError::Disconnected);
        }

        if !packet.is_reliable() {
            let bytes = packet.encode()?;
            drop(state);
            inner.conn.send(&bytes).await?;
            return Ok(None);
        }

        state.next_nonce = state.next_nonce.wrapping_add(1);
        let nonce = state.next_nonce;
        packet.set_nonce(nonce);
        let bytes = packet.encode()?;

        // Hold the lock across the first send so an acknowledgement can't
        // be processed before the nonce is in the sent window.
        inner.conn.send(&bytes).await?;

        if let Some(evicted) = state.sent.push(nonce) {
            tracing::debug!(nonce = evicted, "unacknowledged packet left the sent window");
            if let Some(task) = state.retries.remove(&evicted) {
                task.abort();
            }
            state.ack_waiters.remove(&evicted);
        }
        if let Some(waiter) = waiter {
            state.ack_waiters.insert(nonce, waiter);
        }
        let task = tokio::spawn(retry_loop(Arc::clone(inner), nonce, bytes));
        state.retries.insert(nonce, task);

        tracing::trace!(nonce, opcode = ?packet.opcode(), "reliable packet sent");
        Ok(Some(nonce))
    }

    /// Sends a Disconnect packet (best effort), waits up to
    /// [`SessionConfig::disconnect_grace`] for the peer to answer and
    /// closes the session. Every pending acknowledgement waiter fails.
    /// New sends are refused as soon as this is called.
    pub async fn disconnect(&self, info: Option<DisconnectInfo>) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock().await;
            if !state.connected || state.closing {
                return;
            }
            state.closing = true;
        }

        let answered = inner.closed.notified();
        tokio::pin!(answered);
        answered.as_mut().enable();

        match (Packet::Disconnect { info }).encode() {
            Ok(bytes) => match inner.conn.send(&bytes).await {
                Ok(()) => {
                    let grace = inner.config.disconnect_grace;
                    if tokio::time::timeout(grace, answered).await.is_err() {
                        tracing::debug!(?grace, "peer did not answer disconnect");
                    }
                }
                Err(err) => tracing::debug!(error = %err, "could not send disconnect"),
            },
            Err(err) => tracing::warn!(error = %err, "could not encode disconnect"),
        }
        inner.shutdown(DisconnectCause::Local).await;
    }
}

impl<C: Connection> Inner<C> {
    /// Tears the session down exactly once. Safe to call from a retry
    /// task: its own handle is aborted last, after the final await.
    /// Once our own Disconnect is out, the cause is always `Local`.
    async fn shutdown(&self, cause: DisconnectCause) {
        let (retries, cause) = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return;
            }
            state.connected = false;
            let cause = if state.closing {
                DisconnectCause::Local
            } else {
                cause
            };
            state.ack_waiters.clear();
            state.sent.clear();
            state.recv.clear();
            let retries = state.retries.drain().map(|(_, task)| task).collect::<Vec<_>>();
            (retries, cause)
        };

        match &cause {
            DisconnectCause::AcknowledgementTimeout { nonce } => {
                tracing::error!(nonce, "acknowledgement timeout, disconnecting")
            }
            other => tracing::info!(cause = ?other, "session disconnected"),
        }
        let _ = self.events.send(SessionEvent::Disconnected(cause));

        if let Err(err) = self.conn.close().await {
            tracing::debug!(error = %err, "closing transport failed");
        }
        self.closed.notify_waiters();
        for task in retries {
            task.abort();
        }
    }

    async fn answer_disconnect(&self) {
        match (Packet::Disconnect { info: None }).encode() {
            Ok(bytes) => {
                if let Err(err) = self.conn.send(&bytes).await {
                    tracing::debug!(error = %err, "could not answer disconnect");
                }
            }
            Err(err) => tracing::warn!(error = %err, "could not encode disconnect"),
        }
    }

    async fn send_ack(&self, nonce: u16, missing: u8) {
        let ack = Packet::Acknowledge { nonce, missing };
        match ack.encode() {
            Ok(bytes) => {
                if let Err(err) = self.conn.send(&bytes).await {
                    tracing::warn!(nonce, error = %err, "failed to send acknowledgement");
                }
            }
            Err(err) => tracing::warn!(nonce, error = %err, "failed to encode acknowledgement"),
        }
    }

    async fn handle_packet(&self, packet: Packet) {
        match packet {
            Packet::Reliable { nonce, payloads } => {
                if self.receive_reliable(nonce).await {
                    let _ = self.events.send(SessionEvent::Payloads {
                        reliable: true,
                        payloads,
                    });
                }
            }
            Packet::Hello { nonce, .. } | Packet::Ping { nonce } => {
                self.receive_reliable(nonce).await;
            }
            Packet::Unreliable { payloads } => {
                let _ = self.events.send(SessionEvent::Payloads {
                    reliable: false,
                    payloads,
                });
            }
            Packet::Acknowledge { nonce, missing } => self.receive_ack(nonce, missing).await,
            Packet::Disconnect { info } => {
                let closing = self.state.lock().await.closing;
                if !closing {
                    self.answer_disconnect().await;
                }
                self.shutdown(DisconnectCause::Remote(info)).await;
            }
        }
    }

    /// Records and acknowledges a reliable nonce. Returns `true` when the
    /// packet is new and should be processed.
    async fn receive_reliable(&self, nonce: u16) -> bool {
        let (reception, missing) = {
            let mut state = self.state.lock().await;
            let reception = state.recv.record(nonce);
            (reception, state.recv.missing_bits(nonce))
        };
        match reception {
            Reception::Fresh => {
                self.send_ack(nonce, missing).await;
                true
            }
            Reception::Duplicate => {
                tracing::debug!(nonce, "duplicate reliable packet, acknowledging again");
                self.send_ack(nonce, missing).await;
                false
            }
            Reception::Stale => {
                tracing::debug!(nonce, "reliable packet older than the window, dropped");
                false
            }
        }
    }

    async fn receive_ack(&self, nonce: u16, missing: u8) {
        let reacks = {
            let mut state = self.state.lock().await;
            if state.sent.acknowledge(nonce) {
                if let Some(task) = state.retries.remove(&nonce) {
                    task.abort();
                }
                if let Some(waiter) = state.ack_waiters.remove(&nonce) {
                    let _ = waiter.send(());
                }
                let _ = self.events.send(SessionEvent::Acknowledged { nonce });
                tracing::trace!(nonce, "acknowledged");
            }
            let lost = state.sent.flagged_pending(missing);
            if !lost.is_empty() {
                tracing::debug!(?lost, "peer reports our packets missing, retry timers will resend");
            }
            window::flagged(state.recv.nonces(), missing)
                .into_iter()
                .map(|n| (n, state.recv.missing_bits(n)))
                .collect::<Vec<_>>()
        };
        for (nonce, bits) in reacks {
            tracing::debug!(nonce, "peer reports our acknowledgement missing, re-acknowledging");
            self.send_ack(nonce, bits).await;
        }
    }
}

async fn read_loop<C: Connection>(inner: Arc<Inner<C>>) {
    loop {
        let datagram = match inner.conn.recv().await {
            Ok(Some(datagram)) => datagram,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "transport receive failed");
                break;
            }
        };
        match Packet::decode(&datagram, inner.config.bound) {
            Ok(packet) => inner.handle_packet(packet).await,
            Err(err) => {
                tracing::warn!(error = %err, len = datagram.len(), "dropping malformed packet");
            }
        }
    }
    inner.shutdown(DisconnectCause::TransportClosed).await;
}

async fn retry_loop<C: Connection>(inner: Arc<Inner<C>>, nonce: u16, bytes: Bytes) {
    let mut attempts = 0u32;
    loop {
        tokio::time::sleep(inner.config.retry_interval).await;
        {
            let state = inner.state.lock().await;
            if !state.connected || state.sent.is_acknowledged(nonce) {
                return;
            }
        }

        attempts += 1;
        if attempts > inner.config.max_attempts {
            inner
                .shutdown(DisconnectCause::AcknowledgementTimeout { nonce })
                .await;
            return;
        }

        tracing::warn!(nonce, attempt = attempts, "retransmitting unacknowledged packet");
        if let Err(err) = inner.conn.send(&bytes).await {
            tracing::warn!(nonce, error = %err, "retransmission failed");
            inner
                .shutdown(DisconnectCause::AcknowledgementTimeout { nonce })
                .await;
            return;
        }
    }
}
