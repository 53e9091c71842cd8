//! # Hazel
//!
//! A client for the Hazel reliable-UDP game protocol, with the entity
//! replication needed to sit in a lobby as a real player or host one.
//!
//! The crate ties the layers together:
//!
//! ```text
//! HazelClient (this crate)   connect / join / host / list / start
//!     │
//!     ├── hazel-room         owners, components, RPCs, host arbitration
//!     ├── hazel-tick         fixed-rate flush of the outbound stream
//!     ├── hazel-session      nonces, acknowledgements, retries
//!     ├── hazel-protocol     packets, payloads, messages, binary codec
//!     └── hazel-transport    Connection / Connector (UDP, memory)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hazel::prelude::*;
//!
//! # async fn run() -> Result<(), HazelError> {
//! let (client, mut events) = HazelClient::new(UdpConnector, ClientConfig::default());
//! client.connect("127.0.0.1:22023".parse().unwrap()).await?;
//! client.join_game(GameCode::parse("ABCDEF")?).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod actor;
mod client;
mod config;
mod error;

pub use client::HazelClient;
pub use config::ClientConfig;
pub use error::HazelError;

pub use hazel_protocol as protocol;
pub use hazel_room as room;
pub use hazel_session as session;
pub use hazel_tick as tick;
pub use hazel_transport as transport;

/// Everything most programs need.
pub mod prelude {
    pub use crate::{ClientConfig, HazelClient, HazelError};
    pub use hazel_protocol::{
        ClientVersion, DisconnectReason, GameCode, GameListing, GameMap, GameOptions, PlayerInfo,
        Vector2,
    };
    pub use hazel_room::{Room, RoomConfig, RoomEvent, RoomState};
    pub use hazel_session::SessionConfig;
    pub use hazel_tick::TickConfig;
    pub use hazel_transport::{Connection, Connector, MemoryConnector};
    #[cfg(feature = "udp")]
    pub use hazel_transport::UdpConnector;
}
