//! Wire protocol for Hazel.
//!
//! This crate is the "language" the client and the game server speak. It
//! knows nothing about sockets, retries or rooms; it only turns bytes into
//! typed values and back.
//!
//! ```text
//! datagram
//! └── Packet            opcode, nonce            (packet.rs)
//!     └── Payload       [len][tag] root message  (payload.rs)
//!         └── GameDataMessage  Data/RPC/Spawn…   (message.rs)
//!             └── Rpc / component state          (rpc.rs, options.rs, info.rs)
//! ```
//!
//! Every layer uses the same `[u16 length][u8 tag][body]` framing provided
//! by [`BufferWriter::write_message`] and [`BufferReader::read_message`].
//! Unknown tags at any layer are preserved as `Unknown` variants rather
//! than rejected, so newer servers do not break older clients.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

pub mod buffer;
mod code;
mod error;
mod info;
mod message;
mod options;
mod packet;
mod payload;
mod rpc;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use buffer::{BufferReader, BufferWriter, MAX_MESSAGE_LEN};
pub use code::GameCode;
pub use error::ProtocolError;
pub use info::{PlayerInfo, TaskState};
pub use message::{GameDataMessage, SpawnComponent, SpawnMessage, SPAWN_FLAG_CLIENT_CHARACTER};
pub use options::{GameOptions, LANGUAGE_ALL, LANGUAGE_ENGLISH, LATEST_OPTIONS_VERSION};
pub use packet::{DisconnectInfo, Hello, Opcode, Packet, HAZEL_VERSION};
pub use payload::{
    GameList, GameListing, HostGame, JoinGame, Payload, RemovePlayer, ALTER_GAME_PRIVACY,
};
pub use rpc::{Rpc, NO_PLAYER};
pub use types::{
    sequence_newer, Bound, ClientVersion, DisconnectReason, GameMap, SpawnType, SystemType,
    Vector2, COLOR_COUNT,
};
