//! Entity replication for Hazel games.
//!
//! A room mirrors the host's object graph: owners (the global object and
//! one per player) holding components that are spawned, updated by
//! deltas, driven by RPCs and despawned over the wire.
//!
//! # Key types
//!
//! - [`Room`]: owners, components, inbound dispatch and outbound queue
//! - [`Networkable`]: full/delta serialisation every component implements
//! - [`RoomEvent`]: everything that changed, on one typed channel
//! - [`RoomState`]: lifecycle state machine
//! - [`RoomConfig`]: timeouts and scene/map constants

pub mod components;
mod config;
mod error;
mod events;
mod owner;
mod room;

pub use components::{Component, ComponentData, ComponentKind, Networkable};
pub use config::{RoomConfig, RoomState};
pub use error::RoomError;
pub use events::RoomEvent;
pub use owner::{Owner, OwnerKind, GLOBAL_OWNER};
pub use room::{start_game, Room};
