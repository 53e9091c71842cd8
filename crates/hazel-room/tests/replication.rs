//! Integration tests for replication: spawning, despawning, RPC
//! arbitration, host replies and the start sequence.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hazel_protocol::{
    BufferWriter, DisconnectReason, GameCode, GameDataMessage, Payload, RemovePlayer, Rpc,
    SpawnComponent, SpawnMessage, SpawnType, Vector2,
};
use hazel_room::components::{CustomNetworkTransform, PlayerControl};
use hazel_room::{
    start_game, ComponentKind, Networkable, Room, RoomConfig, RoomError, RoomEvent, RoomState,
    GLOBAL_OWNER,
};
use tokio::sync::{mpsc, Mutex};

const CODE: GameCode = GameCode(0x1234);
const HOST: i32 = 1;
const ME: i32 = 5;

// =========================================================================
// Helpers
// =========================================================================

fn host_room() -> (Room, mpsc::UnboundedReceiver<RoomEvent>) {
    let (mut room, events) = Room::new(RoomConfig::default());
    room.reset(CODE, HOST, HOST);
    (room, events)
}

fn replica_room() -> (Room, mpsc::UnboundedReceiver<RoomEvent>) {
    let (mut room, events) = Room::new(RoomConfig::default());
    room.reset(CODE, ME, HOST);
    (room, events)
}

fn drain(events: &mut mpsc::UnboundedReceiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn full_state(component: &dyn Networkable) -> Bytes {
    let mut w = BufferWriter::new();
    component.write_full(&mut w).unwrap();
    w.into_bytes()
}

fn player_spawn(owner_id: i32, first_netid: u32, player_id: u8) -> GameDataMessage {
    let control = PlayerControl {
        is_new: true,
        player_id,
    };
    GameDataMessage::Spawn(SpawnMessage {
        spawn_type: SpawnType::Player.as_u32(),
        owner_id,
        flags: 1,
        components: vec![
            SpawnComponent {
                netid: first_netid,
                data: full_state(&control),
            },
            SpawnComponent {
                netid: first_netid + 1,
                data: Bytes::new(),
            },
            SpawnComponent {
                netid: first_netid + 2,
                data: full_state(&CustomNetworkTransform::default()),
            },
        ],
    })
}

fn game_data_spawn(first_netid: u32) -> GameDataMessage {
    GameDataMessage::Spawn(SpawnMessage {
        spawn_type: SpawnType::GameData.as_u32(),
        owner_id: GLOBAL_OWNER,
        flags: 0,
        components: vec![
            SpawnComponent {
                netid: first_netid,
                data: Bytes::from_static(&[0]),
            },
            SpawnComponent {
                netid: first_netid + 1,
                data: Bytes::from_static(&[0]),
            },
        ],
    })
}

/// Host with the game table, its own player and a second player.
fn lobby_with_two_players() -> (Room, mpsc::UnboundedReceiver<RoomEvent>) {
    let (mut room, events) = host_room();
    room.announce_scene().unwrap();
    room.spawn_prefab(SpawnType::Player, 2).unwrap();
    room.flush();
    (room, events)
}

fn rpcs(payloads: &[Payload]) -> Vec<Rpc> {
    payloads
        .iter()
        .filter_map(|p| match p {
            Payload::GameData { messages, .. } => Some(messages),
            _ => None,
        })
        .flatten()
        .filter_map(|m| match m {
            GameDataMessage::Rpc { rpc, .. } => Some(rpc.clone()),
            _ => None,
        })
        .collect()
}

// =========================================================================
// Spawning and despawning
// =========================================================================

#[test]
fn test_spawn_player_builds_components_in_prefab_order() {
    let (mut room, mut events) = replica_room();
    drain(&mut events);

    room.handle_game_data(&player_spawn(7, 20, 3));

    assert_eq!(room.component_count(), 3);
    assert_eq!(room.component(20).unwrap().kind(), ComponentKind::PlayerControl);
    assert_eq!(room.component(21).unwrap().kind(), ComponentKind::PlayerPhysics);
    assert_eq!(
        room.component(22).unwrap().kind(),
        ComponentKind::CustomNetworkTransform
    );
    assert_eq!(room.player_id_of(7), Some(3));
    assert_eq!(room.netid_of(7, ComponentKind::CustomNetworkTransform), Some(22));

    let spawned: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            RoomEvent::Spawned { netid, .. } => Some(netid),
            _ => None,
        })
        .collect();
    assert_eq!(spawned, vec![20, 21, 22]);
    room.check_integrity().unwrap();
}

#[test]
fn test_spawn_duplicate_netid_skipped() {
    let (mut room, _events) = replica_room();
    room.handle_game_data(&player_spawn(7, 20, 3));
    room.handle_game_data(&player_spawn(7, 20, 4));

    assert_eq!(room.component_count(), 3);
    assert_eq!(room.player_id_of(7), Some(3));
}

#[test]
fn test_despawn_twice_is_noop() {
    let (mut room, _events) = replica_room();
    room.handle_game_data(&player_spawn(7, 20, 3));

    room.handle_game_data(&GameDataMessage::Despawn { netid: 21 });
    assert_eq!(room.component_count(), 2);
    assert_eq!(room.owner(7).unwrap().slot(1), None);
    assert_eq!(room.owner(7).unwrap().slot(2), Some(22));

    room.handle_game_data(&GameDataMessage::Despawn { netid: 21 });
    assert_eq!(room.component_count(), 2);
    room.check_integrity().unwrap();
}

#[test]
fn test_integrity_holds_across_spawn_despawn_sequence() {
    let (mut room, _events) = host_room();
    room.spawn_prefab(SpawnType::GameData, GLOBAL_OWNER).unwrap();
    room.spawn_prefab(SpawnType::ShipStatus, GLOBAL_OWNER).unwrap();
    for client in 1..=4 {
        room.spawn_prefab(SpawnType::Player, client).unwrap();
        room.check_integrity().unwrap();
    }
    let ship = room.netid_of(GLOBAL_OWNER, ComponentKind::ShipStatus).unwrap();
    assert!(room.despawn_component(ship));
    assert!(!room.despawn_component(ship));
    room.check_integrity().unwrap();

    room.handle_leave(3);
    room.check_integrity().unwrap();

    let replacement = room.spawn_prefab(SpawnType::PlanetMap, GLOBAL_OWNER).unwrap();
    assert_eq!(room.netid_of(GLOBAL_OWNER, ComponentKind::ShipStatus), replacement.first().copied());
    room.check_integrity().unwrap();
}

#[test]
fn test_spawn_into_occupied_slot_replaces_previous() {
    let (mut room, _events) = replica_room();
    room.handle_game_data(&game_data_spawn(30));
    room.handle_game_data(&game_data_spawn(40));

    assert!(room.component(30).is_none());
    assert_eq!(room.netid_of(GLOBAL_OWNER, ComponentKind::GameData), Some(40));
    room.check_integrity().unwrap();
}

#[test]
fn test_unknown_prefab_and_netid_are_ignored() {
    let (mut room, _events) = replica_room();
    room.handle_game_data(&GameDataMessage::Spawn(SpawnMessage {
        spawn_type: 99,
        owner_id: 7,
        flags: 0,
        components: vec![],
    }));
    room.handle_game_data(&GameDataMessage::Rpc {
        netid: 999,
        rpc: Rpc::SendChat {
            message: "hello".into(),
        },
    });
    room.handle_game_data(&GameDataMessage::Data {
        netid: 999,
        data: Bytes::from_static(&[1, 2, 3]),
    });
    assert_eq!(room.component_count(), 0);
}

#[test]
fn test_spawn_prefab_requires_host() {
    let (mut room, _events) = replica_room();
    assert!(matches!(
        room.spawn_prefab(SpawnType::LobbyBehaviour, GLOBAL_OWNER),
        Err(RoomError::NotHost)
    ));
}

#[test]
fn test_spawn_prefab_runs_out_of_player_ids() {
    let (mut room, _events) = host_room();
    for client in 1..=10 {
        room.spawn_prefab(SpawnType::Player, client).unwrap();
    }
    assert!(matches!(
        room.spawn_prefab(SpawnType::Player, 11),
        Err(RoomError::NoFreePlayerSlot)
    ));
    assert!(matches!(
        room.spawn_prefab(SpawnType::Player, GLOBAL_OWNER),
        Err(RoomError::InvalidOwner(GLOBAL_OWNER))
    ));
}

// =========================================================================
// Leaving
// =========================================================================

#[test]
fn test_leave_removes_components_and_table_entry() {
    let (mut room, mut events) = lobby_with_two_players();
    let pid = room.player_id_of(2).unwrap();
    assert!(room.game_data().unwrap().player(pid).is_some());
    drain(&mut events);

    assert!(room.handle_leave(2));

    assert!(room.owner(2).is_none());
    assert!(room.game_data().unwrap().player(pid).is_none());
    assert_eq!(room.netid_of(2, ComponentKind::PlayerControl), None);
    let events = drain(&mut events);
    assert_eq!(
        events.iter().filter(|e| matches!(e, RoomEvent::Despawned { .. })).count(),
        3
    );
    assert_eq!(events.last(), Some(&RoomEvent::PlayerLeft { client_id: 2 }));
    room.check_integrity().unwrap();
    assert!(!room.handle_leave(2));
}

#[test]
fn test_remove_player_payload_migrates_host() {
    let (mut room, mut events) = replica_room();
    room.handle_join(HOST);
    drain(&mut events);

    room.handle_payload(&Payload::RemovePlayer(RemovePlayer::Removed {
        code: CODE,
        client_id: HOST,
        host_id: ME,
        reason: DisconnectReason::ExitGame,
    }));

    assert!(room.am_host());
    assert_eq!(
        drain(&mut events),
        vec![
            RoomEvent::PlayerLeft { client_id: HOST },
            RoomEvent::HostChanged { host_id: ME }
        ]
    );
}

// =========================================================================
// Host arbitration
// =========================================================================

#[test]
fn test_check_name_conflict_appends_suffix() {
    let (mut room, _events) = lobby_with_two_players();
    room.set_name("red").unwrap();
    room.flush();

    let control = room.netid_of(2, ComponentKind::PlayerControl).unwrap();
    room.handle_game_data(&GameDataMessage::Rpc {
        netid: control,
        rpc: Rpc::CheckName { name: "red".into() },
    });

    assert_eq!(room.player_info(2).unwrap().name, "red 1");
    let payloads = room.flush();
    assert_eq!(
        rpcs(&payloads),
        vec![Rpc::SetName {
            name: "red 1".into()
        }]
    );
    let has_table_delta = payloads.iter().any(|p| match p {
        Payload::GameData { messages, .. } => messages
            .iter()
            .any(|m| matches!(m, GameDataMessage::Data { .. })),
        _ => false,
    });
    assert!(has_table_delta);
}

#[test]
fn test_check_color_conflict_advances_to_free_color() {
    let (mut room, mut events) = lobby_with_two_players();
    room.set_color(4).unwrap();
    room.flush();
    drain(&mut events);

    let control = room.netid_of(2, ComponentKind::PlayerControl).unwrap();
    room.handle_game_data(&GameDataMessage::Rpc {
        netid: control,
        rpc: Rpc::CheckColor { color: 4 },
    });

    assert_eq!(room.player_info(2).unwrap().color, 5);
    assert_eq!(rpcs(&room.flush()), vec![Rpc::SetColor { color: 5 }]);
    assert!(drain(&mut events).contains(&RoomEvent::ColorChanged {
        client_id: 2,
        color: 5
    }));
}

#[test]
fn test_replica_forwards_check_name_to_host() {
    let (mut room, _events) = replica_room();
    room.handle_game_data(&game_data_spawn(30));
    room.handle_game_data(&player_spawn(ME, 20, 2));

    room.set_name("blue").unwrap();
    assert_eq!(
        rpcs(&room.flush()),
        vec![Rpc::CheckName {
            name: "blue".into()
        }]
    );
    assert!(room.player_info(ME).is_none());

    room.handle_game_data(&GameDataMessage::Rpc {
        netid: 20,
        rpc: Rpc::SetName {
            name: "blue 1".into(),
        },
    });
    assert_eq!(room.player_info(ME).unwrap().name, "blue 1");
}

#[test]
fn test_replica_ignores_check_color() {
    let (mut room, _events) = replica_room();
    room.handle_game_data(&game_data_spawn(30));
    room.handle_game_data(&player_spawn(7, 20, 2));

    room.handle_game_data(&GameDataMessage::Rpc {
        netid: 20,
        rpc: Rpc::CheckColor { color: 3 },
    });
    assert!(room.flush().is_empty());
}

// =========================================================================
// Scene change and flush
// =========================================================================

#[test]
fn test_scene_change_host_sends_snapshot_then_spawns_player() {
    let (mut room, mut events) = host_room();
    room.announce_scene().unwrap();
    room.flush();
    drain(&mut events);

    room.handle_game_data(&GameDataMessage::SceneChange {
        client_id: 2,
        scene: "OnlineGame".into(),
    });

    assert!(room.owner(2).unwrap().in_scene);
    let payloads = room.flush();
    assert_eq!(payloads.len(), 2);

    let Payload::GameData { messages, .. } = &payloads[0] else {
        panic!("expected broadcast first, got {:?}", payloads[0]);
    };
    let GameDataMessage::Spawn(spawn) = &messages[0] else {
        panic!("expected player spawn, got {:?}", messages[0]);
    };
    assert_eq!(spawn.owner_id, 2);
    assert_eq!(spawn.spawn_type, SpawnType::Player.as_u32());
    assert!(matches!(
        messages[1],
        GameDataMessage::Rpc {
            rpc: Rpc::SyncSettings { .. },
            ..
        }
    ));

    let Payload::GameDataTo {
        recipient,
        messages,
        ..
    } = &payloads[1]
    else {
        panic!("expected directed snapshot, got {:?}", payloads[1]);
    };
    assert_eq!(*recipient, 2);
    let owners: Vec<i32> = messages
        .iter()
        .map(|m| match m {
            GameDataMessage::Spawn(s) => s.owner_id,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(owners, vec![GLOBAL_OWNER, GLOBAL_OWNER, HOST]);
}

#[test]
fn test_scene_change_other_scene_ignored() {
    let (mut room, _events) = host_room();
    room.handle_game_data(&GameDataMessage::SceneChange {
        client_id: 2,
        scene: "Tutorial".into(),
    });
    assert!(room.owner(2).is_none());
    assert!(room.flush().is_empty());
}

#[test]
fn test_replica_scene_change_does_not_reply() {
    let (mut room, mut events) = replica_room();
    room.handle_game_data(&GameDataMessage::SceneChange {
        client_id: 9,
        scene: "OnlineGame".into(),
    });
    assert!(room.flush().is_empty());
    assert!(drain(&mut events).contains(&RoomEvent::InScene { client_id: 9 }));
}

#[test]
fn test_flush_nothing_queued_returns_no_payloads() {
    let (mut room, _events) = host_room();
    assert!(room.flush().is_empty());
    room.announce_scene().unwrap();
    assert!(!room.flush().is_empty());
    assert!(room.flush().is_empty());
}

#[test]
fn test_move_to_flushes_transform_delta() {
    let (mut room, _events) = host_room();
    room.announce_scene().unwrap();
    room.flush();

    room.move_to(Vector2::new(1.0, 2.0), Vector2::default()).unwrap();
    let payloads = room.flush();
    let Payload::GameData { messages, .. } = &payloads[0] else {
        panic!("expected game data");
    };
    let transform = room.netid_of(HOST, ComponentKind::CustomNetworkTransform).unwrap();
    assert!(matches!(
        &messages[0],
        GameDataMessage::Data { netid, data } if *netid == transform && data.len() == 10
    ));
}

#[test]
fn test_data_updates_transform_and_emits_moved() {
    let (mut room, mut events) = replica_room();
    room.handle_game_data(&player_spawn(7, 20, 1));
    drain(&mut events);

    let moved = CustomNetworkTransform {
        sequence: 1,
        position: Vector2::new(3.0, -4.0),
        velocity: Vector2::default(),
    };
    room.handle_game_data(&GameDataMessage::Data {
        netid: 22,
        data: full_state(&moved),
    });

    let events = drain(&mut events);
    let [RoomEvent::Moved { client_id, position }] = events.as_slice() else {
        panic!("expected one Moved event, got {events:?}");
    };
    assert_eq!(*client_id, 7);
    assert!((position.x - 3.0).abs() < 0.01);
    assert!((position.y + 4.0).abs() < 0.01);
}

// =========================================================================
// Payload handling
// =========================================================================

#[test]
fn test_start_game_payload_answers_with_ready_once() {
    let (mut room, mut events) = replica_room();
    room.handle_payload(&Payload::StartGame { code: CODE });
    room.handle_payload(&Payload::StartGame { code: CODE });

    assert_eq!(room.state(), RoomState::Started);
    let payloads = room.flush();
    assert_eq!(
        payloads,
        vec![Payload::GameData {
            code: CODE,
            messages: vec![GameDataMessage::Ready { client_id: ME }]
        }]
    );
    assert!(drain(&mut events).contains(&RoomEvent::GameStarted));
}

#[test]
fn test_payload_for_other_game_ignored() {
    let (mut room, _events) = replica_room();
    room.handle_payload(&Payload::StartGame {
        code: GameCode(0x999),
    });
    assert_eq!(room.state(), RoomState::Joined);
}

#[test]
fn test_joined_game_resets_and_registers_peers() {
    let (mut room, mut events) = Room::new(RoomConfig::default());
    room.set_state(RoomState::Identified);
    room.handle_payload(&Payload::JoinedGame {
        code: CODE,
        client_id: ME,
        host_id: HOST,
        others: vec![HOST, 8],
    });

    assert_eq!(room.state(), RoomState::Joined);
    assert_eq!(room.players(), vec![HOST, ME, 8]);
    assert!(!room.am_host());
    assert!(drain(&mut events).contains(&RoomEvent::PlayerJoined { client_id: 8 }));
}

#[test]
fn test_end_game_moves_to_ended() {
    let (mut room, mut events) = replica_room();
    room.handle_payload(&Payload::StartGame { code: CODE });
    room.handle_payload(&Payload::EndGame {
        code: CODE,
        reason: 2,
        show_ad: false,
    });
    assert_eq!(room.state(), RoomState::Ended);
    assert!(drain(&mut events).contains(&RoomEvent::GameEnded { reason: 2 }));
}

// =========================================================================
// Start sequence
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_game_removes_only_unready_player() {
    let (mut room, _events) = host_room();
    room.handle_join(2);
    room.handle_join(3);
    let room = Arc::new(Mutex::new(room));

    let feeder = {
        let room = Arc::clone(&room);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            room.lock()
                .await
                .handle_game_data(&GameDataMessage::Ready { client_id: 2 });
        })
    };

    let started = tokio::time::Instant::now();
    let removed = start_game(&room).await.unwrap();
    feeder.await.unwrap();

    assert_eq!(removed, vec![3]);
    assert!(started.elapsed() >= Duration::from_secs(5));

    let payloads = room.lock().await.flush();
    let removes: Vec<&Payload> = payloads
        .iter()
        .filter(|p| matches!(p, Payload::RemovePlayer(_)))
        .collect();
    assert_eq!(
        removes,
        vec![&Payload::RemovePlayer(RemovePlayer::Request {
            code: CODE,
            client_id: 3,
            reason: DisconnectReason::Error,
        })]
    );
    assert!(payloads.contains(&Payload::StartGame { code: CODE }));
}

#[tokio::test(start_paused = true)]
async fn test_start_game_fails_when_connection_drops() {
    let (mut room, _events) = host_room();
    room.handle_join(2);
    let room = Arc::new(Mutex::new(room));

    let dropper = {
        let room = Arc::clone(&room);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            room.lock().await.notify_disconnected(None, None);
        })
    };

    let started = tokio::time::Instant::now();
    let result = start_game(&room).await;
    dropper.await.unwrap();

    assert!(matches!(result, Err(RoomError::Disconnected)));
    assert!(started.elapsed() < Duration::from_secs(1));
    let mut room = room.lock().await;
    assert_eq!(room.state(), RoomState::Connecting);
    assert!(room.flush().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_game_returns_once_everyone_ready() {
    let (mut room, _events) = host_room();
    room.handle_join(2);
    let room = Arc::new(Mutex::new(room));

    let feeder = {
        let room = Arc::clone(&room);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            room.lock()
                .await
                .handle_game_data(&GameDataMessage::Ready { client_id: 2 });
        })
    };

    let started = tokio::time::Instant::now();
    let removed = start_game(&room).await.unwrap();
    feeder.await.unwrap();

    assert!(removed.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_start_game_rejected_for_replica() {
    let (room, _events) = replica_room();
    let room = Mutex::new(room);
    assert!(matches!(start_game(&room).await, Err(RoomError::NotHost)));
}
