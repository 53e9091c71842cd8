//! The public client handle.
//!
//! [`HazelClient`] sequences payload exchanges into the operations a
//! program actually wants: connect, join, host, list, start, leave. Each
//! awaited exchange is a one-shot expectation registered with the actor
//! and raced against [`ClientConfig::request_timeout`]; nothing polls.
//!
//! ```text
//! join_game(code)
//!   ├─ Expect(Join) ──────────► actor
//!   ├─ Reliable[JoinGame] ────► server
//!   │        ◄──────────────── JoinedGame        → announce scene, done
//!   │        ◄──────────────── JoinGame error    → HazelError::JoinFailed
//!   │        ◄──────────────── Redirect(addr)    → reconnect, Hello, retry
//!   └─ timeout / disconnect                       → Timeout / Disconnected
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use hazel_protocol::{
    GameCode, GameList, GameListing, GameOptions, Hello, HostGame, JoinGame, Packet, Payload,
    HAZEL_VERSION,
};
use hazel_room::{Room, RoomEvent, RoomState};
use hazel_session::{Session, SessionConfig};
use hazel_transport::Connector;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::actor::{spawn_actor, Command, Expectation, Reply, Step};
use crate::{ClientConfig, HazelError};

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// The live connection: a session and the actor serving it.
struct Link<K> {
    session: Session<K>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<K> Clone for Link<K> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            commands: self.commands.clone(),
        }
    }
}

struct Active<K> {
    link: Link<K>,
    actor: JoinHandle<()>,
}

struct Inner<C: Connector> {
    connector: C,
    config: ClientConfig,
    room: Arc<Mutex<Room>>,
    active: Mutex<Option<Active<C::Connection>>>,
}

// ---------------------------------------------------------------------------
// HazelClient
// ---------------------------------------------------------------------------

/// A Hazel game client. Cheap to clone; clones share one connection and
/// one room, so one task can `disconnect` while another is waiting in
/// `join_game`.
pub struct HazelClient<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for HazelClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> HazelClient<C> {
    /// Creates a disconnected client and the receiving end of its room
    /// event bus. The bus outlives reconnects.
    pub fn new(connector: C, config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (room, events) = Room::new(config.room.clone());
        let inner = Arc::new(Inner {
            connector,
            config,
            room: Arc::new(Mutex::new(room)),
            active: Mutex::new(None),
        });
        (Self { inner }, events)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The replicated room. Lock it briefly; the actor needs it to
    /// process every inbound packet.
    pub fn room(&self) -> Arc<Mutex<Room>> {
        Arc::clone(&self.inner.room)
    }

    pub async fn is_connected(&self) -> bool {
        match self.link().await {
            Ok(link) => link.session.is_connected().await,
            Err(_) => false,
        }
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Dials `addr`, starts the actor and identifies with Hello. Resolves
    /// once the server acknowledges the Hello. Any previous connection is
    /// dropped first without reporting a disconnect.
    ///
    /// # Errors
    /// [`HazelError::Transport`] if dialling fails, [`HazelError::Timeout`]
    /// if the Hello is not acknowledged within the request timeout.
    pub async fn connect(&self, addr: SocketAddr) -> Result<(), HazelError> {
        self.close(false).await;

        let config = &self.inner.config;
        let conn = self.inner.connector.connect(addr).await?;
        let session_config = SessionConfig {
            disconnect_grace: config.disconnect_grace,
            ..config.session.clone()
        };
        let (session, session_events) = Session::new(conn, session_config);
        let (commands, actor) = spawn_actor(
            session.clone(),
            session_events,
            Arc::clone(&self.inner.room),
            config.tick.clone(),
        );
        *self.inner.active.lock().await = Some(Active {
            link: Link {
                session: session.clone(),
                commands,
            },
            actor,
        });

        let hello = Packet::Hello {
            nonce: 0,
            hello: Hello {
                hazel_version: HAZEL_VERSION,
                client_version: config.version,
                username: config.username.clone(),
                auth_token: config.auth_token,
            },
        };
        match tokio::time::timeout(config.request_timeout, session.send_acked(hello)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(HazelError::from_session(err)),
            Err(_) => {
                tracing::warn!(%addr, "hello was not acknowledged in time");
                self.close(true).await;
                return Err(HazelError::Timeout);
            }
        }

        self.inner.room.lock().await.set_state(RoomState::Identified);
        tracing::info!(%addr, username = %config.username, "connected");
        Ok(())
    }

    /// Leaves the server. Sends Disconnect, waits up to
    /// [`ClientConfig::disconnect_grace`] for the server to answer and
    /// again for the actor to wind down, then fails every pending
    /// operation with [`HazelError::Disconnected`].
    pub async fn disconnect(&self) {
        self.close(true).await;
    }

    /// Tears the current link down. When `announce` is false the room
    /// does not see a disconnect; used when moving to another node.
    async fn close(&self, announce: bool) {
        let Some(Active { link, mut actor }) = self.inner.active.lock().await.take() else {
            return;
        };
        if !announce {
            let _ = link.commands.send(Command::Detach);
        }
        link.session.disconnect(None).await;

        let grace = self.inner.config.disconnect_grace;
        if tokio::time::timeout(grace, &mut actor).await.is_err() {
            tracing::debug!("client actor did not stop in time, aborting");
            actor.abort();
        }
        if !announce {
            self.inner.room.lock().await.set_state(RoomState::Connecting);
        }
    }

    async fn link(&self) -> Result<Link<C::Connection>, HazelError> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.link.clone())
            .ok_or(HazelError::Disconnected)
    }

    /// Counts one redirect against the limit and reconnects to `addr`.
    async fn follow_redirect(&self, redirects: &mut u32, addr: SocketAddr) -> Result<(), HazelError> {
        *redirects += 1;
        let max = self.inner.config.max_redirects;
        if *redirects > max {
            return Err(HazelError::TooManyRedirects(max));
        }
        tracing::info!(%addr, redirect = *redirects, "redirected to another node");
        self.connect(addr).await
    }

    /// Registers an expectation, sends `payload` reliably and waits for
    /// the answer.
    async fn request<T>(
        &self,
        payload: Payload,
        expect: impl FnOnce(Reply<T>) -> Expectation,
    ) -> Result<Step<T>, HazelError> {
        let link = self.link().await?;
        let (tx, rx) = oneshot::channel();
        link.commands
            .send(Command::Expect(expect(tx)))
            .map_err(|_| HazelError::Disconnected)?;
        link.session
            .send(Packet::Reliable {
                nonce: 0,
                payloads: vec![payload],
            })
            .await
            .map_err(HazelError::from_session)?;

        match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HazelError::Disconnected),
            Err(_) => Err(HazelError::Timeout),
        }
    }

    // -----------------------------------------------------------------------
    // Games
    // -----------------------------------------------------------------------

    /// Joins the game `code`, following redirects. On success the room is
    /// reset for the game and this client announces it has loaded in.
    ///
    /// # Errors
    /// [`HazelError::JoinFailed`] with the server's reason when refused;
    /// the connection stays up.
    pub async fn join_game(&self, code: GameCode) -> Result<(), HazelError> {
        let map_ownership = self.inner.config.room.map_ownership;
        let mut redirects = 0;
        loop {
            let request = Payload::JoinGame(JoinGame::Request {
                code,
                map_ownership,
            });
            match self.request(request, Expectation::Join).await? {
                Step::Done(()) => break,
                Step::Redirect(addr) => self.follow_redirect(&mut redirects, addr).await?,
            }
        }

        let mut room = self.inner.room.lock().await;
        room.announce_scene()?;
        tracing::info!(%code, client_id = room.client_id(), host_id = room.host_id(), "joined game");
        Ok(())
    }

    /// Asks the server for a new game with `options`, then joins it as
    /// host. Returns the new code.
    pub async fn create_game(&self, options: GameOptions) -> Result<GameCode, HazelError> {
        let mut redirects = 0;
        let code = loop {
            let request = Payload::HostGame(HostGame::Request {
                options: options.clone(),
            });
            match self.request(request, Expectation::Host).await? {
                Step::Done(code) => break code,
                Step::Redirect(addr) => self.follow_redirect(&mut redirects, addr).await?,
            }
        };
        tracing::info!(%code, "game created");
        self.join_game(code).await?;
        Ok(code)
    }

    /// Lists public games matching `options`.
    pub async fn find_games(&self, options: GameOptions) -> Result<Vec<GameListing>, HazelError> {
        let mut redirects = 0;
        loop {
            let request = Payload::GetGameList(GameList::Request {
                options: options.clone(),
            });
            match self.request(request, Expectation::List).await? {
                Step::Done(games) => {
                    tracing::debug!(count = games.len(), "game list received");
                    return Ok(games);
                }
                Step::Redirect(addr) => self.follow_redirect(&mut redirects, addr).await?,
            }
        }
    }

    /// Starts the game as host. Waits until every player is ready or the
    /// ready timeout passes, then removes whoever is not. Returns the
    /// removed client ids.
    ///
    /// # Errors
    /// [`HazelError::Disconnected`] if the connection drops while waiting.
    pub async fn start_game(&self) -> Result<Vec<i32>, HazelError> {
        let removed = hazel_room::start_game(&self.inner.room)
            .await
            .map_err(HazelError::from_room)?;
        if !removed.is_empty() {
            tracing::info!(?removed, "started without unready players");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // In-game actions
    // -----------------------------------------------------------------------
    //
    // These only queue messages; the next tick sends them.

    pub async fn set_name(&self, name: &str) -> Result<(), HazelError> {
        Ok(self.inner.room.lock().await.set_name(name)?)
    }

    pub async fn set_color(&self, color: u8) -> Result<(), HazelError> {
        Ok(self.inner.room.lock().await.set_color(color)?)
    }

    pub async fn send_chat(&self, message: &str) -> Result<(), HazelError> {
        Ok(self.inner.room.lock().await.send_chat(message)?)
    }

    /// Host only.
    pub async fn set_settings(&self, options: GameOptions) -> Result<(), HazelError> {
        Ok(self.inner.room.lock().await.set_settings(options)?)
    }

    /// Host only.
    pub async fn kick_player(&self, client_id: i32, banned: bool) -> Result<(), HazelError> {
        Ok(self.inner.room.lock().await.kick_player(client_id, banned)?)
    }

    /// Host only.
    pub async fn set_public(&self, is_public: bool) -> Result<(), HazelError> {
        Ok(self.inner.room.lock().await.set_public(is_public)?)
    }
}
