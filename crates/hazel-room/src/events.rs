//! Typed notifications published by the room.
//!
//! Everything that changes in the replicated world is announced on one
//! unbounded channel handed out by [`Room::new`](crate::Room::new).
//! Consumers that fall behind never block replication.

use hazel_protocol::{DisconnectReason, GameOptions, SystemType, Vector2};

use crate::components::ComponentKind;

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    PlayerJoined { client_id: i32 },
    PlayerLeft { client_id: i32 },
    HostChanged { host_id: i32 },
    Spawned { netid: u32, owner_id: i32, kind: ComponentKind },
    Despawned { netid: u32 },
    /// The client finished loading the lobby scene.
    InScene { client_id: i32 },
    Ready { client_id: i32 },
    GameStarted,
    GameEnded { reason: u8 },
    SettingsChanged(Box<GameOptions>),
    PrivacyChanged { is_public: bool },
    NameChanged { client_id: i32, name: String },
    ColorChanged { client_id: i32, color: u8 },
    ChatMessage { client_id: i32, message: String },
    /// Lobby countdown; -1 cancels it.
    StartCounter { counter: i8 },
    Murder { murderer: i32, victim: i32 },
    /// `reported` is `None` for the emergency button.
    MeetingStarted { caller: i32, reported: Option<u8> },
    VoteCast { voter: u8, suspect: u8 },
    /// `exiled` is `None` on a skip or tie.
    VotingComplete { exiled: Option<u8>, tie: bool },
    MeetingClosed,
    Exiled { client_id: i32 },
    Moved { client_id: i32, position: Vector2 },
    Vented { client_id: i32, vent_id: u32, entered: bool },
    SystemRepaired { system: SystemType, client_id: i32, amount: u8 },
    DoorsClosed { system: SystemType },
    Disconnected { reason: Option<DisconnectReason>, message: Option<String> },
}
