//! Replicated components and the prefab table.
//!
//! A component is the unit of replication: it has a netid, an owner, and
//! state that can be written in full (at spawn) or as a delta (in Data
//! messages). The [`Networkable`] trait is that contract; concrete state
//! lives in one struct per component type, gathered in [`ComponentData`].
//!
//! ```text
//! Spawn { type: Player, components: [a, b, c] }
//!                                    │  │  │
//!             prefab_components ──▶ [PlayerControl, PlayerPhysics, CustomNetworkTransform]
//! ```
//!
//! The position of a component inside a Spawn message decides its type,
//! so [`prefab_components`] must list each prefab exactly as the game
//! does.

mod game_data;
mod meeting;
mod player;
mod ship;
mod systems;

pub use game_data::{GameData, VoteBanSystem};
pub use meeting::{MeetingHud, VoteState};
pub use player::{CustomNetworkTransform, PlayerControl};
pub use ship::ShipStatus;
pub use systems::{
    AutoDoorsSystem, DeconSystem, DoorState, DoorsSystem, HqHudSystem, HudOverrideSystem,
    LifeSuppSystem, MedScanSystem, ReactorSystem, SabotageSystem, SecurityCameraSystem,
    SwitchSystem, SystemState,
};

use hazel_protocol::{BufferReader, BufferWriter, GameMap, ProtocolError, SpawnType};

use crate::owner::OwnerKind;

// ---------------------------------------------------------------------------
// Networkable
// ---------------------------------------------------------------------------

/// Full and delta (de)serialisation of a component's replicated state.
///
/// `write_delta` receives the component's dirty mask; types with a
/// single replicated field ignore it and write everything.
pub trait Networkable {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError>;

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError>;

    fn write_delta(&self, dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        let _ = dirty;
        self.write_full(w)
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.read_full(r)
    }

    /// Resets change tracking kept inside the state after a delta was
    /// written.
    fn clear_dirty(&mut self) {}
}

// ---------------------------------------------------------------------------
// ComponentKind and the prefab table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    ShipStatus,
    MeetingHud,
    LobbyBehaviour,
    GameData,
    VoteBanSystem,
    PlayerControl,
    PlayerPhysics,
    CustomNetworkTransform,
}

impl ComponentKind {
    /// Fixed slot in the owner's component array.
    pub fn slot(self) -> usize {
        match self {
            Self::ShipStatus => 0,
            Self::MeetingHud => 1,
            Self::LobbyBehaviour => 2,
            Self::GameData => 3,
            Self::VoteBanSystem => 4,
            Self::PlayerControl => 0,
            Self::PlayerPhysics => 1,
            Self::CustomNetworkTransform => 2,
        }
    }

    pub fn owner_kind(self) -> OwnerKind {
        match self {
            Self::PlayerControl | Self::PlayerPhysics | Self::CustomNetworkTransform => {
                OwnerKind::Player
            }
            _ => OwnerKind::Global,
        }
    }
}

/// Component types of a prefab, in wire order.
pub fn prefab_components(spawn_type: SpawnType) -> &'static [ComponentKind] {
    match spawn_type {
        SpawnType::ShipStatus
        | SpawnType::HeadQuarters
        | SpawnType::PlanetMap
        | SpawnType::AprilShipStatus => &[ComponentKind::ShipStatus],
        SpawnType::MeetingHud => &[ComponentKind::MeetingHud],
        SpawnType::LobbyBehaviour => &[ComponentKind::LobbyBehaviour],
        SpawnType::GameData => &[ComponentKind::GameData, ComponentKind::VoteBanSystem],
        SpawnType::Player => &[
            ComponentKind::PlayerControl,
            ComponentKind::PlayerPhysics,
            ComponentKind::CustomNetworkTransform,
        ],
    }
}

/// Map whose ship a ship prefab builds.
pub fn ship_map(spawn_type: SpawnType) -> Option<GameMap> {
    match spawn_type {
        SpawnType::ShipStatus => Some(GameMap::TheSkeld),
        SpawnType::HeadQuarters => Some(GameMap::MiraHq),
        SpawnType::PlanetMap => Some(GameMap::Polus),
        SpawnType::AprilShipStatus => Some(GameMap::AprilSkeld),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ComponentData {
    ShipStatus(ShipStatus),
    MeetingHud(MeetingHud),
    LobbyBehaviour,
    GameData(GameData),
    VoteBanSystem(VoteBanSystem),
    PlayerControl(PlayerControl),
    PlayerPhysics,
    CustomNetworkTransform(CustomNetworkTransform),
}

impl ComponentData {
    /// Default state for a component of `kind` spawned as part of
    /// `spawn_type`.
    pub fn new(kind: ComponentKind, spawn_type: SpawnType) -> Self {
        match kind {
            ComponentKind::ShipStatus => {
                Self::ShipStatus(ShipStatus::new(ship_map(spawn_type).unwrap_or_default()))
            }
            ComponentKind::MeetingHud => Self::MeetingHud(MeetingHud::default()),
            ComponentKind::LobbyBehaviour => Self::LobbyBehaviour,
            ComponentKind::GameData => Self::GameData(GameData::default()),
            ComponentKind::VoteBanSystem => Self::VoteBanSystem(VoteBanSystem::default()),
            ComponentKind::PlayerControl => Self::PlayerControl(PlayerControl::default()),
            ComponentKind::PlayerPhysics => Self::PlayerPhysics,
            ComponentKind::CustomNetworkTransform => {
                Self::CustomNetworkTransform(CustomNetworkTransform::default())
            }
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::ShipStatus(_) => ComponentKind::ShipStatus,
            Self::MeetingHud(_) => ComponentKind::MeetingHud,
            Self::LobbyBehaviour => ComponentKind::LobbyBehaviour,
            Self::GameData(_) => ComponentKind::GameData,
            Self::VoteBanSystem(_) => ComponentKind::VoteBanSystem,
            Self::PlayerControl(_) => ComponentKind::PlayerControl,
            Self::PlayerPhysics => ComponentKind::PlayerPhysics,
            Self::CustomNetworkTransform(_) => ComponentKind::CustomNetworkTransform,
        }
    }

    fn networkable(&self) -> Option<&dyn Networkable> {
        match self {
            Self::ShipStatus(c) => Some(c),
            Self::MeetingHud(c) => Some(c),
            Self::GameData(c) => Some(c),
            Self::VoteBanSystem(c) => Some(c),
            Self::PlayerControl(c) => Some(c),
            Self::CustomNetworkTransform(c) => Some(c),
            Self::LobbyBehaviour | Self::PlayerPhysics => None,
        }
    }

    fn networkable_mut(&mut self) -> Option<&mut dyn Networkable> {
        match self {
            Self::ShipStatus(c) => Some(c),
            Self::MeetingHud(c) => Some(c),
            Self::GameData(c) => Some(c),
            Self::VoteBanSystem(c) => Some(c),
            Self::PlayerControl(c) => Some(c),
            Self::CustomNetworkTransform(c) => Some(c),
            Self::LobbyBehaviour | Self::PlayerPhysics => None,
        }
    }
}

// Stateless components write and read nothing.
impl Networkable for ComponentData {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        self.networkable().map_or(Ok(()), |c| c.write_full(w))
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.networkable_mut().map_or(Ok(()), |c| c.read_full(r))
    }

    fn write_delta(&self, dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        self.networkable().map_or(Ok(()), |c| c.write_delta(dirty, w))
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.networkable_mut().map_or(Ok(()), |c| c.read_delta(r))
    }

    fn clear_dirty(&mut self) {
        if let Some(c) = self.networkable_mut() {
            c.clear_dirty();
        }
    }
}

/// A replicated object registered in the room.
#[derive(Debug, Clone)]
pub struct Component {
    pub netid: u32,
    pub owner_id: i32,
    /// Prefab this component was spawned as part of.
    pub spawn_type: SpawnType,
    /// Sub-fields changed since the last flush. Non-zero means "send a
    /// Data message on the next flush".
    pub dirty_bit: u32,
    pub data: ComponentData,
}

impl Component {
    pub fn new(netid: u32, owner_id: i32, spawn_type: SpawnType, data: ComponentData) -> Self {
        Self {
            netid,
            owner_id,
            spawn_type,
            dirty_bit: 0,
            data,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.data.kind()
    }

    pub fn mark_dirty(&mut self, bits: u32) {
        self.dirty_bit |= bits;
    }

    pub fn full_state(&self) -> Result<bytes::Bytes, ProtocolError> {
        let mut w = BufferWriter::new();
        self.data.write_full(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Delta for the current dirty mask, or `None` when clean.
    pub fn take_delta(&mut self) -> Result<Option<bytes::Bytes>, ProtocolError> {
        if self.dirty_bit == 0 {
            return Ok(None);
        }
        let mut w = BufferWriter::new();
        self.data.write_delta(self.dirty_bit, &mut w)?;
        self.data.clear_dirty();
        self.dirty_bit = 0;
        Ok(Some(w.into_bytes()))
    }
}
