//! Client operations against a scripted server.
//!
//! The server side is a memory endpoint wrapped in a serverbound session,
//! so acknowledgements and retries behave as on the wire while each test
//! decides what the server answers. All tests run with a paused clock.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use hazel::prelude::*;
use hazel::protocol::{
    Bound, DisconnectInfo, GameDataMessage, GameList, HostGame, JoinGame, Packet, Payload,
    RemovePlayer, SpawnType,
};
use hazel::session::{Session, SessionEvent};
use hazel::transport::{MemoryConnection, MemoryListener};
use tokio::sync::{mpsc, oneshot};

const CODE: GameCode = GameCode(0x2a2a_2a2a);

fn addr(port: u16) -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port).into()
}

fn v4(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

// =========================================================================
// Scripted server
// =========================================================================

struct Peer {
    session: Session<MemoryConnection>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    queued: VecDeque<Payload>,
}

impl Peer {
    async fn accept(listener: &mut MemoryListener) -> Self {
        let conn = listener.accept().await.expect("client dialled");
        let config = SessionConfig {
            bound: Bound::Serverbound,
            ..SessionConfig::default()
        };
        let (session, events) = Session::new(conn, config);
        Self {
            session,
            events,
            queued: VecDeque::new(),
        }
    }

    /// Next payload the client sent, in order.
    async fn next_payload(&mut self) -> Payload {
        loop {
            if let Some(payload) = self.queued.pop_front() {
                return payload;
            }
            match self.events.recv().await.expect("peer session alive") {
                SessionEvent::Payloads { payloads, .. } => self.queued.extend(payloads),
                SessionEvent::Acknowledged { .. } => {}
                SessionEvent::Disconnected(cause) => panic!("client went away: {cause:?}"),
            }
        }
    }

    /// Skips payloads until one satisfies `pred`.
    async fn find_payload(&mut self, pred: impl Fn(&Payload) -> bool) -> Payload {
        loop {
            let payload = self.next_payload().await;
            if pred(&payload) {
                return payload;
            }
        }
    }

    async fn reply(&self, payload: Payload) {
        self.session
            .send(Packet::Reliable {
                nonce: 0,
                payloads: vec![payload],
            })
            .await
            .unwrap();
    }

    /// Waits for the client to hang up.
    async fn closed(&mut self) {
        loop {
            match self.events.recv().await {
                Some(SessionEvent::Disconnected(_)) | None => return,
                Some(_) => {}
            }
        }
    }
}

fn client_with(config: ClientConfig) -> (
    HazelClient<MemoryConnector>,
    mpsc::UnboundedReceiver<RoomEvent>,
    MemoryConnector,
) {
    let network = MemoryConnector::new();
    let (client, events) = HazelClient::new(network.clone(), config);
    (client, events, network)
}

fn client() -> (
    HazelClient<MemoryConnector>,
    mpsc::UnboundedReceiver<RoomEvent>,
    MemoryConnector,
) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    client_with(ClientConfig {
        username: "weakeyes".into(),
        ..ClientConfig::default()
    })
}

fn drain(events: &mut mpsc::UnboundedReceiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn is_join_request(payload: &Payload) -> bool {
    matches!(payload, Payload::JoinGame(JoinGame::Request { .. }))
}

// =========================================================================
// Connecting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_acknowledged_hello_identifies() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move { Peer::accept(&mut listener).await });

    client.connect(addr(22023)).await.unwrap();
    let _peer = server.await.unwrap();

    assert!(client.is_connected().await);
    assert_eq!(client.room().lock().await.state(), RoomState::Identified);
}

#[tokio::test(start_paused = true)]
async fn test_connect_unreachable_returns_transport_error() {
    let (client, _events, _network) = client();
    let err = client.connect(addr(1)).await.unwrap_err();
    assert!(matches!(err, HazelError::Transport(_)));
    assert!(!client.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_unacknowledged_hello_times_out() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    // Accept the raw connection but never acknowledge anything.
    let server = tokio::spawn(async move { listener.accept().await });

    let err = client.connect(addr(22023)).await.unwrap_err();
    assert!(matches!(err, HazelError::Timeout));
    assert!(!client.is_connected().await);
    drop(server);
}

// =========================================================================
// Joining
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_game_registers_players_and_announces_scene() {
    let (client, mut events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        let request = peer.next_payload().await;
        assert_eq!(
            request,
            Payload::JoinGame(JoinGame::Request {
                code: CODE,
                map_ownership: 0x07,
            })
        );
        peer.reply(Payload::JoinedGame {
            code: CODE,
            client_id: 7,
            host_id: 1,
            others: vec![1],
        })
        .await;
        // The next tick carries our scene change.
        let data = peer
            .find_payload(|p| matches!(p, Payload::GameData { .. }))
            .await;
        (peer, data)
    });

    client.connect(addr(22023)).await.unwrap();
    client.join_game(CODE).await.unwrap();
    let (_peer, data) = server.await.unwrap();

    match data {
        Payload::GameData { code, messages } => {
            assert_eq!(code, CODE);
            assert_eq!(
                messages[0],
                GameDataMessage::SceneChange {
                    client_id: 7,
                    scene: "OnlineGame".into(),
                }
            );
        }
        other => panic!("unexpected {other:?}"),
    }

    let room = client.room();
    let room = room.lock().await;
    assert_eq!(room.state(), RoomState::Joined);
    assert_eq!(room.client_id(), 7);
    assert_eq!(room.host_id(), 1);
    assert!(!room.am_host());
    assert!(drain(&mut events).contains(&RoomEvent::PlayerJoined { client_id: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_join_game_redirect_is_transparent() {
    let (client, mut events, network) = client();
    let mut first = network.listen(addr(22023));
    let mut second = network.listen(addr(22024));

    let first_node = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut first).await;
        assert!(is_join_request(&peer.next_payload().await));
        peer.reply(Payload::Redirect { addr: v4(22024) }).await;
        peer.closed().await;
    });
    let second_node = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut second).await;
        let request = peer.next_payload().await;
        assert_eq!(
            request,
            Payload::JoinGame(JoinGame::Request {
                code: CODE,
                map_ownership: 0x07,
            })
        );
        peer.reply(Payload::JoinedGame {
            code: CODE,
            client_id: 9,
            host_id: 1,
            others: vec![1],
        })
        .await;
        peer
    });

    client.connect(addr(22023)).await.unwrap();
    client.join_game(CODE).await.unwrap();

    first_node.await.unwrap();
    let _peer = second_node.await.unwrap();
    assert_eq!(client.room().lock().await.client_id(), 9);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, RoomEvent::Disconnected { .. })),
        "a redirect is not a disconnect"
    );
}

#[tokio::test(start_paused = true)]
async fn test_join_game_redirect_loop_gives_up() {
    let (client, _events, network) = client_with(ClientConfig {
        max_redirects: 1,
        ..ClientConfig::default()
    });
    let mut listeners = vec![
        network.listen(addr(22023)),
        network.listen(addr(22024)),
    ];

    let nodes = tokio::spawn(async move {
        for (listener, next) in listeners.iter_mut().zip([22024, 22025]) {
            let mut peer = Peer::accept(listener).await;
            assert!(is_join_request(&peer.next_payload().await));
            peer.reply(Payload::Redirect { addr: v4(next) }).await;
            peer.closed().await;
        }
    });

    client.connect(addr(22023)).await.unwrap();
    let err = client.join_game(CODE).await.unwrap_err();
    assert!(matches!(err, HazelError::TooManyRedirects(1)));
    client.disconnect().await;
    nodes.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_join_game_refused_keeps_connection() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        assert!(is_join_request(&peer.next_payload().await));
        peer.reply(Payload::JoinGame(JoinGame::Error {
            reason: DisconnectReason::GameNotFound,
            message: None,
        }))
        .await;
        peer
    });

    client.connect(addr(22023)).await.unwrap();
    let err = client.join_game(CODE).await.unwrap_err();
    let _peer = server.await.unwrap();

    match err {
        HazelError::JoinFailed { reason, message } => {
            assert_eq!(reason, DisconnectReason::GameNotFound);
            assert_eq!(message, "Could not find the game you're looking for.");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.is_connected().await);
    assert_eq!(client.room().lock().await.state(), RoomState::Identified);
}

#[tokio::test(start_paused = true)]
async fn test_join_game_custom_refusal_carries_server_text() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.next_payload().await;
        peer.reply(Payload::JoinGame(JoinGame::Error {
            reason: DisconnectReason::Custom,
            message: Some("maintenance".into()),
        }))
        .await;
        peer
    });

    client.connect(addr(22023)).await.unwrap();
    let err = client.join_game(CODE).await.unwrap_err();
    let _peer = server.await.unwrap();
    assert_eq!(err.to_string(), "server refused the request: maintenance");
}

#[tokio::test(start_paused = true)]
async fn test_join_game_without_answer_times_out() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.next_payload().await;
        peer
    });

    client.connect(addr(22023)).await.unwrap();
    let started = tokio::time::Instant::now();
    let err = client.join_game(CODE).await.unwrap_err();
    let _peer = server.await.unwrap();

    assert!(matches!(err, HazelError::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_join_game_before_connect_is_disconnected() {
    let (client, _events, _network) = client();
    let err = client.join_game(CODE).await.unwrap_err();
    assert!(matches!(err, HazelError::Disconnected));
}

// =========================================================================
// Disconnecting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_unblocks_pending_join() {
    let (client, mut events, network) = client();
    let mut listener = network.listen(addr(22023));
    let (seen_tx, seen_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.next_payload().await;
        let _ = seen_tx.send(());
        peer.closed().await;
    });

    client.connect(addr(22023)).await.unwrap();
    let joining = {
        let client = client.clone();
        tokio::spawn(async move { client.join_game(CODE).await })
    };
    seen_rx.await.unwrap();
    client.disconnect().await;

    let result = joining.await.unwrap();
    assert!(matches!(result, Err(HazelError::Disconnected)));
    server.await.unwrap();
    assert!(!client.is_connected().await);
    assert!(drain(&mut events).contains(&RoomEvent::Disconnected {
        reason: None,
        message: None,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_remote_disconnect_fails_pending_find_games() {
    let (client, mut events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.next_payload().await;
        peer.session
            .disconnect(Some(DisconnectInfo {
                reason: DisconnectReason::ServerFull,
                message: None,
            }))
            .await;
    });

    client.connect(addr(22023)).await.unwrap();
    let err = client.find_games(GameOptions::default()).await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, HazelError::Disconnected));
    let events = drain(&mut events);
    assert!(events.contains(&RoomEvent::Disconnected {
        reason: Some(DisconnectReason::ServerFull),
        message: None,
    }));
    assert_eq!(client.room().lock().await.state(), RoomState::Connecting);
}

// =========================================================================
// Listing and hosting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_find_games_returns_listing() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let listing = GameListing {
        addr: v4(22023),
        code: CODE,
        host_name: "dumbo".into(),
        players: 4,
        age: 30,
        map: GameMap::Polus.as_u8(),
        impostors: 1,
        max_players: 10,
    };
    let sent = listing.clone();
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        let request = peer.next_payload().await;
        assert!(matches!(
            request,
            Payload::GetGameList(GameList::Request { .. })
        ));
        peer.reply(Payload::GetGameList(GameList::Listing {
            counts: Some([3, 0, 1]),
            games: vec![sent],
        }))
        .await;
        peer
    });

    client.connect(addr(22023)).await.unwrap();
    let games = client.find_games(GameOptions::default()).await.unwrap();
    let _peer = server.await.unwrap();
    assert_eq!(games, vec![listing]);
}

#[tokio::test(start_paused = true)]
async fn test_create_game_joins_as_host_and_spawns_lobby() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        let request = peer.next_payload().await;
        assert!(matches!(request, Payload::HostGame(HostGame::Request { .. })));
        peer.reply(Payload::HostGame(HostGame::Created { code: CODE }))
            .await;

        assert!(is_join_request(&peer.next_payload().await));
        peer.reply(Payload::JoinedGame {
            code: CODE,
            client_id: 1,
            host_id: 1,
            others: vec![],
        })
        .await;

        let data = peer
            .find_payload(|p| matches!(p, Payload::GameData { .. }))
            .await;
        (peer, data)
    });

    client.connect(addr(22023)).await.unwrap();
    let code = client.create_game(GameOptions::default()).await.unwrap();
    let (_peer, data) = server.await.unwrap();
    assert_eq!(code, CODE);

    let Payload::GameData { messages, .. } = data else {
        panic!("expected game data");
    };
    let spawned: Vec<u32> = messages
        .iter()
        .filter_map(|m| match m {
            GameDataMessage::Spawn(spawn) => Some(spawn.spawn_type),
            _ => None,
        })
        .collect();
    assert_eq!(
        spawned,
        vec![
            SpawnType::LobbyBehaviour.as_u32(),
            SpawnType::GameData.as_u32(),
            SpawnType::Player.as_u32(),
        ]
    );
    assert!(client.room().lock().await.am_host());
}

// =========================================================================
// Starting
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_game_removes_player_that_never_readies() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let (joined_tx, joined_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        assert!(is_join_request(&peer.next_payload().await));
        peer.reply(Payload::JoinedGame {
            code: CODE,
            client_id: 1,
            host_id: 1,
            others: vec![],
        })
        .await;
        peer.reply(Payload::JoinGame(JoinGame::Joined {
            code: CODE,
            client_id: 3,
            host_id: 1,
        }))
        .await;
        let _ = joined_tx.send(());

        peer.find_payload(|p| matches!(p, Payload::StartGame { .. }))
            .await;
        peer.reply(Payload::StartGame { code: CODE }).await;

        let mut removals = Vec::new();
        loop {
            match peer.next_payload().await {
                Payload::RemovePlayer(request) => {
                    removals.push(request);
                    break;
                }
                _ => continue,
            }
        }
        (peer, removals)
    });

    client.connect(addr(22023)).await.unwrap();
    client.join_game(CODE).await.unwrap();
    joined_rx.await.unwrap();
    // Let the actor apply the second join.
    while client.room().lock().await.owner(3).is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = tokio::time::Instant::now();
    let removed = client.start_game().await.unwrap();
    assert_eq!(removed, vec![3]);
    assert!(started.elapsed() >= Duration::from_secs(5));

    let (mut peer, removals) = server.await.unwrap();
    assert_eq!(
        removals,
        vec![RemovePlayer::Request {
            code: CODE,
            client_id: 3,
            reason: DisconnectReason::Error,
        }]
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    let mut later: Vec<Payload> = peer.queued.drain(..).collect();
    while let Ok(event) = peer.events.try_recv() {
        if let SessionEvent::Payloads { payloads, .. } = event {
            later.extend(payloads);
        }
    }
    assert!(!later.iter().any(|p| matches!(p, Payload::RemovePlayer(_))));
    assert_eq!(client.room().lock().await.state(), RoomState::Started);
}

#[tokio::test(start_paused = true)]
async fn test_start_game_fails_when_server_disconnects() {
    let (client, _events, network) = client();
    let mut listener = network.listen(addr(22023));
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        assert!(is_join_request(&peer.next_payload().await));
        peer.reply(Payload::JoinedGame {
            code: CODE,
            client_id: 1,
            host_id: 1,
            others: vec![3],
        })
        .await;
        peer.find_payload(|p| matches!(p, Payload::StartGame { .. }))
            .await;
        peer.session.disconnect(None).await;
    });

    client.connect(addr(22023)).await.unwrap();
    client.join_game(CODE).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = client.start_game().await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, HazelError::Disconnected));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.room().lock().await.state(), RoomState::Connecting);
}
