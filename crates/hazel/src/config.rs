//! Client configuration.

use std::time::Duration;

use hazel_protocol::ClientVersion;
use hazel_room::RoomConfig;
use hazel_session::SessionConfig;
use hazel_tick::TickConfig;
use serde::{Deserialize, Serialize};

/// Everything a [`HazelClient`](crate::HazelClient) needs to know before
/// it dials. Override single fields with struct-update syntax:
///
/// ```rust
/// use std::time::Duration;
/// use hazel::ClientConfig;
///
/// let config = ClientConfig {
///     username: "weakeyes".into(),
///     request_timeout: Duration::from_secs(10),
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.max_redirects, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name sent in Hello and requested for our player.
    pub username: String,

    /// Game build we claim to be. Servers refuse mismatched versions.
    pub version: ClientVersion,

    /// Token some matchmakers require in Hello.
    pub auth_token: Option<u32>,

    /// How long `connect`, `join_game`, `create_game` and `find_games`
    /// wait for their answer.
    ///
    /// Default: 6 s.
    pub request_timeout: Duration,

    /// How long `disconnect` waits for the server's answering Disconnect,
    /// and then for the actor to stop. Overrides the session's own value.
    ///
    /// Default: 500 ms.
    pub disconnect_grace: Duration,

    /// Redirects followed by one operation before giving up.
    ///
    /// Default: 4.
    pub max_redirects: u32,

    pub session: SessionConfig,
    pub room: RoomConfig,
    pub tick: TickConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: "player".into(),
            version: ClientVersion::default(),
            auth_token: None,
            request_timeout: Duration::from_secs(6),
            disconnect_grace: Duration::from_millis(500),
            max_redirects: 4,
            session: SessionConfig::default(),
            room: RoomConfig::default(),
            tick: TickConfig::default(),
        }
    }
}
