//! Room configuration and state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Tunables for a replicated room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// How long the host waits for every player to report Ready after
    /// StartGame before removing the stragglers.
    pub start_ready_timeout: Duration,

    /// Scene name a joining client announces once it has loaded the lobby.
    pub in_scene_sentinel: String,

    /// Map ownership bitmask sent with JoinGame (bit per map).
    pub map_ownership: u8,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            start_ready_timeout: Duration::from_secs(5),
            in_scene_sentinel: "OnlineGame".to_string(),
            map_ownership: 0x07,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// Where this client is in a room's lifecycle.
///
/// ```text
/// Connecting → Identified → Joined → Started → Ended
///                              ↑                  │
///                              └──────────────────┘  (next game)
/// ```
///
/// - **Connecting**: no session yet, or the Hello is in flight.
/// - **Identified**: the server acknowledged Hello; not in a game.
/// - **Joined**: in a lobby, replication is live.
/// - **Started**: the host sent StartGame.
/// - **Ended**: EndGame received. The room can be joined again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomState {
    #[default]
    Connecting,
    Identified,
    Joined,
    Started,
    Ended,
}

impl RoomState {
    /// Returns `true` while replication messages should be processed.
    pub fn in_game(&self) -> bool {
        matches!(self, Self::Joined | Self::Started)
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Identified),
            Self::Identified => Some(Self::Joined),
            Self::Joined => Some(Self::Started),
            Self::Started => Some(Self::Ended),
            Self::Ended => Some(Self::Joined),
        }
    }

    /// Returns `true` if moving to `target` is a legal step.
    ///
    /// Besides the forward chain, a client may jump straight back to
    /// `Identified` from anywhere past it (leaving a game, redirects) and
    /// to `Connecting` from anywhere (session lost).
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
            || target == Self::Connecting
            || (target == Self::Identified && self != Self::Connecting)
            || (self == Self::Joined && target == Self::Ended)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Identified => write!(f, "Identified"),
            Self::Joined => write!(f, "Joined"),
            Self::Started => write!(f, "Started"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}
