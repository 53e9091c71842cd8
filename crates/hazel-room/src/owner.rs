//! Owners: the room-global object and the players.
//!
//! Each owner holds its components in a fixed-size array of optional
//! netids. A despawned component leaves its slot empty; nothing is ever
//! shifted, so "slot 2 of a player" always means its network transform.

/// Owner id of the room-global object (ship, lobby, game data, meeting).
pub const GLOBAL_OWNER: i32 = -2;

/// Slot count for the global owner.
pub const GLOBAL_SLOTS: usize = 5;

/// Slot count for a player.
pub const PLAYER_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Global,
    Player,
}

#[derive(Debug, Clone)]
pub struct Owner {
    id: i32,
    kind: OwnerKind,
    slots: Box<[Option<u32>]>,
    pub in_scene: bool,
    pub ready: bool,
}

impl Owner {
    pub fn global() -> Self {
        Self::with_slots(GLOBAL_OWNER, OwnerKind::Global, GLOBAL_SLOTS)
    }

    pub fn player(client_id: i32) -> Self {
        Self::with_slots(client_id, OwnerKind::Player, PLAYER_SLOTS)
    }

    fn with_slots(id: i32, kind: OwnerKind, len: usize) -> Self {
        Self {
            id,
            kind,
            slots: vec![None; len].into_boxed_slice(),
            in_scene: false,
            ready: false,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn kind(&self) -> OwnerKind {
        self.kind
    }

    pub fn slot(&self, index: usize) -> Option<u32> {
        self.slots.get(index).copied().flatten()
    }

    /// Puts `netid` into `index`, returning the previous occupant.
    /// Out-of-range indices are ignored.
    pub fn set_slot(&mut self, index: usize, netid: u32) -> Option<u32> {
        self.slots.get_mut(index).and_then(|slot| slot.replace(netid))
    }

    /// Empties whichever slot holds `netid`. Returns `true` if one did.
    pub fn clear_netid(&mut self, netid: u32) -> bool {
        match self.slots.iter_mut().find(|slot| **slot == Some(netid)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Occupied slots as `(index, netid)`.
    pub fn components(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|netid| (index, netid)))
    }
}
