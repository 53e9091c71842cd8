//! Error types for the room layer.

use hazel_protocol::ProtocolError;

/// Errors from room operations. Replication of inbound messages never
/// fails; these come from local requests the room cannot honour.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Only the host may spawn prefabs, start the game or change settings.
    #[error("this client is not the host")]
    NotHost,

    /// The room is not in a game.
    #[error("not joined to a game")]
    NotJoined,

    /// The connection was lost while an operation was waiting.
    #[error("connection lost")]
    Disconnected,

    /// All ten player ids are taken.
    #[error("no free player id")]
    NoFreePlayerSlot,

    /// This client has no PlayerControl yet (the host has not spawned us).
    #[error("local player has not been spawned")]
    PlayerNotSpawned,

    /// The prefab cannot be owned by this owner (a Player prefab on the
    /// global object, or a ship on a player).
    #[error("owner {0} cannot own this prefab")]
    InvalidOwner(i32),

    /// The referenced client is not in the room.
    #[error("client {0} not in room")]
    UnknownPlayer(i32),

    /// `netobjects` and owner slots disagree.
    #[error("replication state diverged: {0}")]
    Integrity(String),

    /// Serialising a component or message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
