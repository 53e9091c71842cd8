//! Closed enumerations and small value types shared across the protocol.
//!
//! The enums here mirror fixed tables in the game: an unknown value on
//! the wire is never an error. Each `from_*` constructor either returns
//! `None` or keeps the raw value in an `Unknown` variant so it can be
//! re-encoded verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferReader, BufferWriter};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Bound
// ---------------------------------------------------------------------------

/// Direction a packet travels. Several payloads share a tag but carry a
/// different body towards the server than towards the client, so every
/// decoder needs to know which side it is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Bound {
    /// Server to client. What a client decodes.
    #[default]
    Clientbound,
    /// Client to server. What a server (or a test playing one) decodes.
    Serverbound,
}

// ---------------------------------------------------------------------------
// DisconnectReason
// ---------------------------------------------------------------------------

/// Why a connection, join or game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    ExitGame,
    GameFull,
    GameStarted,
    GameNotFound,
    IncorrectVersion,
    Banned,
    Kicked,
    /// The server supplies its own message text.
    Custom,
    InvalidName,
    Hacking,
    Destroy,
    Error,
    IncorrectGame,
    ServerRequest,
    ServerFull,
    FocusLostBackground,
    IntentionalLeaving,
    FocusLost,
    NewConnection,
    /// A reason code this client does not know.
    Unknown(u8),
}

impl DisconnectReason {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::ExitGame,
            1 => Self::GameFull,
            2 => Self::GameStarted,
            3 => Self::GameNotFound,
            5 => Self::IncorrectVersion,
            6 => Self::Banned,
            7 => Self::Kicked,
            8 => Self::Custom,
            9 => Self::InvalidName,
            10 => Self::Hacking,
            16 => Self::Destroy,
            17 => Self::Error,
            18 => Self::IncorrectGame,
            19 => Self::ServerRequest,
            20 => Self::ServerFull,
            207 => Self::FocusLostBackground,
            208 => Self::IntentionalLeaving,
            209 => Self::FocusLost,
            210 => Self::NewConnection,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::ExitGame => 0,
            Self::GameFull => 1,
            Self::GameStarted => 2,
            Self::GameNotFound => 3,
            Self::IncorrectVersion => 5,
            Self::Banned => 6,
            Self::Kicked => 7,
            Self::Custom => 8,
            Self::InvalidName => 9,
            Self::Hacking => 10,
            Self::Destroy => 16,
            Self::Error => 17,
            Self::IncorrectGame => 18,
            Self::ServerRequest => 19,
            Self::ServerFull => 20,
            Self::FocusLostBackground => 207,
            Self::IntentionalLeaving => 208,
            Self::FocusLost => 209,
            Self::NewConnection => 210,
            Self::Unknown(other) => other,
        }
    }

    /// The message the game shows for this reason. `Custom` has no fixed
    /// text; the server sends one alongside it.
    pub fn message(self) -> &'static str {
        match self {
            Self::ExitGame => "You disconnected from the server.",
            Self::GameFull => "The game you tried to join is full.",
            Self::GameStarted => "The game you tried to join already started.",
            Self::GameNotFound => "Could not find the game you're looking for.",
            Self::IncorrectVersion => "You are running an older version of the game.",
            Self::Banned => "You were banned from the room.",
            Self::Kicked => "You were kicked from the room.",
            Self::Custom => "",
            Self::InvalidName => "Server refused username.",
            Self::Hacking => "You were banned for hacking.",
            Self::Destroy => "The game has been destroyed.",
            Self::Error => "You disconnected due to an error.",
            Self::IncorrectGame => "The server stopped this game.",
            Self::ServerRequest => "The server requested you to disconnect.",
            Self::ServerFull => "The server is full.",
            Self::FocusLostBackground => "You were disconnected because the game was in the background.",
            Self::IntentionalLeaving => "You left the game.",
            Self::FocusLost => "You were disconnected because the game lost focus.",
            Self::NewConnection => "You connected from another device.",
            Self::Unknown(_) => "An unknown error occurred.",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// SpawnType
// ---------------------------------------------------------------------------

/// Prefab identifiers used by Spawn messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpawnType {
    /// The Skeld ship.
    ShipStatus,
    MeetingHud,
    LobbyBehaviour,
    GameData,
    Player,
    /// MIRA HQ.
    HeadQuarters,
    /// Polus.
    PlanetMap,
    /// Mirrored Skeld.
    AprilShipStatus,
}

impl SpawnType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::ShipStatus,
            1 => Self::MeetingHud,
            2 => Self::LobbyBehaviour,
            3 => Self::GameData,
            4 => Self::Player,
            5 => Self::HeadQuarters,
            6 => Self::PlanetMap,
            7 => Self::AprilShipStatus,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Ship prefab for a map.
    pub fn for_map(map: GameMap) -> Self {
        match map {
            GameMap::TheSkeld => Self::ShipStatus,
            GameMap::MiraHq => Self::HeadQuarters,
            GameMap::Polus => Self::PlanetMap,
            GameMap::AprilSkeld => Self::AprilShipStatus,
        }
    }
}

// ---------------------------------------------------------------------------
// SystemType
// ---------------------------------------------------------------------------

/// Ship rooms and subsystems. Only the ones that carry replicated state
/// (and the rooms doors or sabotages refer to) are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SystemType {
    Hallway = 0,
    Storage = 1,
    Cafeteria = 2,
    Reactor = 3,
    UpperEngine = 4,
    Nav = 5,
    Admin = 6,
    Electrical = 7,
    LifeSupp = 8,
    Shields = 9,
    MedBay = 10,
    Security = 11,
    Weapons = 12,
    LowerEngine = 13,
    Comms = 14,
    ShipTasks = 15,
    Doors = 16,
    Sabotage = 17,
    Decontamination = 18,
    Launchpad = 19,
    LockerRoom = 20,
    Laboratory = 21,
    Balcony = 22,
    Office = 23,
    Greenhouse = 24,
    Dropship = 25,
    Decontamination2 = 26,
    Outside = 27,
    Specimens = 28,
    BoilerRoom = 29,
}

impl SystemType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use SystemType::*;
        const ALL: [SystemType; 30] = [
            Hallway, Storage, Cafeteria, Reactor, UpperEngine, Nav, Admin,
            Electrical, LifeSupp, Shields, MedBay, Security, Weapons,
            LowerEngine, Comms, ShipTasks, Doors, Sabotage, Decontamination,
            Launchpad, LockerRoom, Laboratory, Balcony, Office, Greenhouse,
            Dropship, Decontamination2, Outside, Specimens, BoilerRoom,
        ];
        ALL.get(value as usize).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// GameMap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameMap {
    #[default]
    TheSkeld,
    MiraHq,
    Polus,
    AprilSkeld,
}

impl GameMap {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::TheSkeld,
            1 => Self::MiraHq,
            2 => Self::Polus,
            3 => Self::AprilSkeld,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Number of player colours. Colour ids are `0..COLOR_COUNT`.
pub const COLOR_COUNT: u8 = 12;

// ---------------------------------------------------------------------------
// ClientVersion
// ---------------------------------------------------------------------------

/// Game build the client claims to be, sent in Hello.
///
/// On the wire it is a single `i32`:
/// `year * 25000 + month * 1800 + day * 50 + revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientVersion {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub revision: i32,
}

impl ClientVersion {
    pub const fn new(year: i32, month: i32, day: i32, revision: i32) -> Self {
        Self {
            year,
            month,
            day,
            revision,
        }
    }

    pub fn encode(self) -> i32 {
        self.year * 25000 + self.month * 1800 + self.day * 50 + self.revision
    }

    pub fn decode(value: i32) -> Self {
        let year = value / 25000;
        let value = value % 25000;
        let month = value / 1800;
        let value = value % 1800;
        Self {
            year,
            month,
            day: value / 50,
            revision: value % 50,
        }
    }
}

impl Default for ClientVersion {
    fn default() -> Self {
        Self::new(2021, 3, 5, 0)
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.year, self.month, self.day, self.revision)
    }
}

// ---------------------------------------------------------------------------
// Vector2
// ---------------------------------------------------------------------------

/// A position or velocity. Serialized as two `u16` values lerped over
/// `[-40, 40]`, so precision is about 0.0012 units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

const LERP_MIN: f32 = -40.0;
const LERP_MAX: f32 = 40.0;

fn lerp_to_u16(value: f32) -> u16 {
    let t = ((value - LERP_MIN) / (LERP_MAX - LERP_MIN)).clamp(0.0, 1.0);
    (t * f32::from(u16::MAX)).round() as u16
}

fn u16_to_lerp(value: u16) -> f32 {
    let t = f32::from(value) / f32::from(u16::MAX);
    LERP_MIN + (LERP_MAX - LERP_MIN) * t
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn read(reader: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let x = u16_to_lerp(reader.read_u16_le()?);
        let y = u16_to_lerp(reader.read_u16_le()?);
        Ok(Self { x, y })
    }

    pub fn write(&self, writer: &mut BufferWriter) {
        writer.write_u16_le(lerp_to_u16(self.x));
        writer.write_u16_le(lerp_to_u16(self.y));
    }
}

/// `true` when `a` is newer than `b` in 16-bit wrapping sequence space.
/// Used for reliable nonces and for movement sequence numbers.
pub fn sequence_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}
