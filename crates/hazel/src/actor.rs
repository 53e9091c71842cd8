//! The background task behind a connected client.
//!
//! One actor runs per connection. It is the only code path that feeds
//! inbound payloads into the [`Room`], and the only one that drains the
//! room's outbound stream:
//!
//! ```text
//!             commands (mpsc)            session events (mpsc)
//! HazelClient ───────────────► ┌───────┐ ◄──────────────────── Session
//!   (Expect / Detach)          │ Actor │
//!                              └───┬───┘ ── tick ──► room.flush() ──► Session
//!                                  ▼
//!                         Room (Arc<Mutex<_>>)
//! ```
//!
//! Callers that wait for a particular answer (a join, a new game code,
//! a game list) register an [`Expectation`] before sending their
//! request. `biased` polling handles commands first, so the expectation
//! is always in place before the reply can be dispatched.

use std::net::SocketAddr;
use std::sync::Arc;

use hazel_protocol::{GameCode, GameList, GameListing, HostGame, JoinGame, Packet, Payload};
use hazel_room::Room;
use hazel_session::{DisconnectCause, Session, SessionError, SessionEvent};
use hazel_tick::{TickConfig, TickScheduler};
use hazel_transport::Connection;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::HazelError;

// ---------------------------------------------------------------------------
// Expectations
// ---------------------------------------------------------------------------

/// Where an awaited exchange went.
#[derive(Debug)]
pub(crate) enum Step<T> {
    Done(T),
    /// Try again on another node.
    Redirect(SocketAddr),
}

pub(crate) type Reply<T> = oneshot::Sender<Result<Step<T>, HazelError>>;

/// A caller waiting for one specific answer from the server.
pub(crate) enum Expectation {
    /// JoinedGame, a JoinGame refusal or a Redirect.
    Join(Reply<()>),
    /// A HostGame code, a refusal or a Redirect.
    Host(Reply<GameCode>),
    /// A game listing or a Redirect.
    List(Reply<Vec<GameListing>>),
}

impl Expectation {
    fn is_closed(&self) -> bool {
        match self {
            Self::Join(tx) => tx.is_closed(),
            Self::Host(tx) => tx.is_closed(),
            Self::List(tx) => tx.is_closed(),
        }
    }

    fn matches(&self, payload: &Payload) -> bool {
        match (self, payload) {
            (_, Payload::Redirect { .. }) => true,
            (Self::Join(_), Payload::JoinedGame { .. }) => true,
            (Self::Join(_) | Self::Host(_), Payload::JoinGame(JoinGame::Error { .. })) => true,
            (Self::Host(_), Payload::HostGame(HostGame::Created { .. })) => true,
            (Self::List(_), Payload::GetGameList(GameList::Listing { .. })) => true,
            _ => false,
        }
    }

    /// Completes the waiting caller with `payload`, which must satisfy
    /// [`matches`](Self::matches).
    fn resolve(self, payload: &Payload) {
        match (self, payload) {
            (Self::Join(tx), Payload::Redirect { addr }) => {
                let _ = tx.send(Ok(Step::Redirect(SocketAddr::V4(*addr))));
            }
            (Self::Host(tx), Payload::Redirect { addr }) => {
                let _ = tx.send(Ok(Step::Redirect(SocketAddr::V4(*addr))));
            }
            (Self::List(tx), Payload::Redirect { addr }) => {
                let _ = tx.send(Ok(Step::Redirect(SocketAddr::V4(*addr))));
            }
            (this, Payload::JoinGame(JoinGame::Error { reason, message })) => {
                this.fail(HazelError::refused(*reason, message.clone()));
            }
            (Self::Join(tx), Payload::JoinedGame { .. }) => {
                let _ = tx.send(Ok(Step::Done(())));
            }
            (Self::Host(tx), Payload::HostGame(HostGame::Created { code })) => {
                let _ = tx.send(Ok(Step::Done(*code)));
            }
            (Self::List(tx), Payload::GetGameList(GameList::Listing { games, .. })) => {
                let _ = tx.send(Ok(Step::Done(games.clone())));
            }
            (this, payload) => {
                tracing::warn!(tag = payload.tag(), "expectation resolved with unrelated payload");
                this.fail(HazelError::Disconnected);
            }
        }
    }

    fn fail(self, err: HazelError) {
        match self {
            Self::Join(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Host(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::List(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(crate) enum Command {
    /// Wait for an answer; must be sent before the request goes out.
    Expect(Expectation),
    /// Stop without reporting a disconnect to the room, because the
    /// client is moving to another node.
    Detach,
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Actor<K: Connection> {
    session: Session<K>,
    room: Arc<Mutex<Room>>,
    commands: mpsc::UnboundedReceiver<Command>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    ticks: TickScheduler,
    expectations: Vec<Expectation>,
}

/// Spawns the actor for a freshly started session. Returns the command
/// sender and the task handle.
pub(crate) fn spawn_actor<K: Connection>(
    session: Session<K>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    room: Arc<Mutex<Room>>,
    tick: TickConfig,
) -> (mpsc::UnboundedSender<Command>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut ticks = TickScheduler::new(tick);
    ticks.pause();

    let actor = Actor {
        session,
        room,
        commands: rx,
        session_events,
        ticks,
        expectations: Vec::new(),
    };
    (tx, tokio::spawn(actor.run()))
}

impl<K: Connection> Actor<K> {
    async fn run(mut self) {
        tracing::debug!(peer = %self.session.peer_addr(), "client actor started");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Expect(expectation)) => self.expectations.push(expectation),
                    Some(Command::Detach) => {
                        self.fail_all(|| HazelError::Disconnected);
                        break;
                    }
                    None => {
                        // Every client handle is gone.
                        self.session.disconnect(None).await;
                        self.fail_all(|| HazelError::Disconnected);
                        break;
                    }
                },

                event = self.session_events.recv() => match event {
                    Some(SessionEvent::Payloads { payloads, .. }) => self.dispatch(payloads).await,
                    Some(SessionEvent::Acknowledged { .. }) => {}
                    Some(SessionEvent::Disconnected(cause)) => {
                        self.disconnected(cause).await;
                        break;
                    }
                    None => {
                        self.disconnected(DisconnectCause::TransportClosed).await;
                        break;
                    }
                },

                tick = self.ticks.wait_for_tick() => {
                    tracing::trace!(tick = tick.tick, "flushing room stream");
                    self.flush().await;
                }
            }
        }

        tracing::debug!("client actor stopped");
    }

    /// Applies inbound payloads to the room in order, then hands any
    /// awaited answer to its caller.
    async fn dispatch(&mut self, payloads: Vec<Payload>) {
        let in_game = {
            let mut room = self.room.lock().await;
            for payload in &payloads {
                room.handle_payload(payload);
            }
            room.state().in_game()
        };
        self.sync_ticks(in_game);

        self.expectations.retain(|e| !e.is_closed());
        for payload in &payloads {
            match payload {
                Payload::RemoveGame { reason } => {
                    tracing::info!(%reason, "server removed the game");
                }
                Payload::Unknown { tag, .. } => {
                    tracing::debug!(tag, "unknown root payload ignored");
                }
                _ => {}
            }
            if let Some(index) = self.expectations.iter().position(|e| e.matches(payload)) {
                self.expectations.remove(index).resolve(payload);
            }
        }
    }

    /// Sends everything the room queued since the last tick as one
    /// reliable packet.
    async fn flush(&mut self) {
        let (payloads, in_game) = {
            let mut room = self.room.lock().await;
            (room.flush(), room.state().in_game())
        };
        self.sync_ticks(in_game);
        if payloads.is_empty() {
            return;
        }
        let count = payloads.len();
        let packet = Packet::Reliable { nonce: 0, payloads };
        match self.session.send(packet).await {
            Ok(nonce) => tracing::trace!(?nonce, count, "room stream flushed"),
            Err(SessionError::Disconnected) => {}
            Err(err) => tracing::warn!(error = %err, count, "failed to flush room stream"),
        }
    }

    /// Ticks run only while there is a game to replicate.
    fn sync_ticks(&mut self, in_game: bool) {
        if in_game {
            self.ticks.resume();
        } else {
            self.ticks.pause();
        }
    }

    async fn disconnected(&mut self, cause: DisconnectCause) {
        let (reason, message) = match &cause {
            DisconnectCause::Remote(Some(info)) => (Some(info.reason), info.message.clone()),
            DisconnectCause::Remote(None) | DisconnectCause::Local => (None, None),
            DisconnectCause::AcknowledgementTimeout { nonce } => {
                (None, Some(format!("packet {nonce} was never acknowledged")))
            }
            DisconnectCause::TransportClosed => (None, Some("transport closed".into())),
        };
        tracing::info!(?reason, ?message, "connection closed");
        self.room.lock().await.notify_disconnected(reason, message);

        match cause {
            DisconnectCause::AcknowledgementTimeout { nonce } => self.fail_all(|| {
                HazelError::Session(SessionError::AcknowledgementTimeout { nonce })
            }),
            _ => self.fail_all(|| HazelError::Disconnected),
        }
    }

    fn fail_all(&mut self, err: impl Fn() -> HazelError) {
        for expectation in self.expectations.drain(..) {
            expectation.fail(err());
        }
    }
}
