//! Ship subsystems.
//!
//! Each system's wire state is self-contained; [`ShipStatus`](super::ShipStatus)
//! writes them back to back in the map's fixed order. Only the host
//! changes system state, through [`SystemState::apply_repair`] and door
//! closing; replicas just read.

use std::collections::BTreeMap;

use hazel_protocol::{BufferReader, BufferWriter, ProtocolError};

use super::Networkable;

pub const SKELD_DOOR_COUNT: usize = 13;
pub const POLUS_DOOR_COUNT: usize = 12;

/// Open (`true`) or closed.
pub type DoorState = bool;

// ---------------------------------------------------------------------------
// Individual systems
// ---------------------------------------------------------------------------

/// Reactor meltdown (also Polus' laboratory seismic stabilisers).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactorSystem {
    pub countdown: f32,
    /// `(player id, console id)` for everyone holding a console.
    pub consoles: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchSystem {
    pub expected: u8,
    pub actual: u8,
    /// Light level, 255 = fully lit.
    pub value: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifeSuppSystem {
    pub countdown: f32,
    pub completed: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedScanSystem {
    pub queue: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityCameraSystem {
    pub watching: Vec<u8>,
}

/// Comms on the Skeld and Polus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HudOverrideSystem {
    pub sabotaged: bool,
}

/// Comms on MIRA HQ: two consoles that must both be fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HqHudSystem {
    pub active: Vec<(u8, u8)>,
    pub completed: Vec<u8>,
}

/// Skeld doors. Deltas carry only the doors that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoDoorsSystem {
    pub doors: Vec<DoorState>,
    dirty: u32,
}

impl AutoDoorsSystem {
    pub fn new(count: usize) -> Self {
        Self {
            doors: vec![true; count],
            dirty: 0,
        }
    }

    pub fn set_door(&mut self, index: usize, open: bool) {
        if let Some(door) = self.doors.get_mut(index) {
            if *door != open {
                *door = open;
                self.dirty |= 1u32.checked_shl(index as u32).unwrap_or(0);
            }
        }
    }
}

/// Polus doors with per-room cooldown timers.
#[derive(Debug, Clone, PartialEq)]
pub struct DoorsSystem {
    pub timers: BTreeMap<u8, f32>,
    pub doors: Vec<DoorState>,
}

impl DoorsSystem {
    pub fn new(count: usize) -> Self {
        Self {
            timers: BTreeMap::new(),
            doors: vec![true; count],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeconSystem {
    pub timer: u8,
    pub state: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SabotageSystem {
    pub cooldown: f32,
}

// ---------------------------------------------------------------------------
// SystemState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SystemState {
    Reactor(ReactorSystem),
    Switch(SwitchSystem),
    LifeSupp(LifeSuppSystem),
    MedScan(MedScanSystem),
    SecurityCamera(SecurityCameraSystem),
    HudOverride(HudOverrideSystem),
    HqHud(HqHudSystem),
    AutoDoors(AutoDoorsSystem),
    Doors(DoorsSystem),
    Decon(DeconSystem),
    Sabotage(SabotageSystem),
}

impl SystemState {
    /// Applies a repair request on the host. Returns `true` if the
    /// state changed and must be replicated.
    pub fn apply_repair(&mut self, player_id: u8, amount: u8) -> bool {
        match self {
            Self::Switch(s) if amount < 8 => {
                s.actual ^= 1 << amount;
                true
            }
            Self::HudOverride(s) if s.sabotaged => {
                s.sabotaged = false;
                true
            }
            Self::HqHud(s) => {
                let console = amount & 0x0f;
                if s.completed.contains(&console) {
                    return false;
                }
                s.completed.push(console);
                true
            }
            Self::Reactor(s) => {
                let entry = (player_id, amount & 0x03);
                if s.consoles.contains(&entry) {
                    return false;
                }
                s.consoles.push(entry);
                true
            }
            Self::LifeSupp(s) => {
                let console = u32::from(amount & 0x03);
                if s.completed.contains(&console) {
                    return false;
                }
                s.completed.push(console);
                true
            }
            Self::MedScan(s) => {
                let before = s.queue.len();
                if amount & 0x80 != 0 {
                    if !s.queue.contains(&player_id) {
                        s.queue.push(player_id);
                    }
                } else {
                    s.queue.retain(|p| *p != player_id);
                }
                s.queue.len() != before
            }
            Self::SecurityCamera(s) => {
                let before = s.watching.len();
                if amount == 1 {
                    if !s.watching.contains(&player_id) {
                        s.watching.push(player_id);
                    }
                } else {
                    s.watching.retain(|p| *p != player_id);
                }
                s.watching.len() != before
            }
            _ => false,
        }
    }
}

fn write_pairs(w: &mut BufferWriter, pairs: &[(u8, u8)]) {
    w.write_packed_u32(pairs.len() as u32);
    for (a, b) in pairs {
        w.write_u8(*a);
        w.write_u8(*b);
    }
}

fn read_pairs(r: &mut BufferReader<'_>) -> Result<Vec<(u8, u8)>, ProtocolError> {
    let count = r.read_packed_u32()?;
    let mut pairs = Vec::new();
    for _ in 0..count {
        pairs.push((r.read_u8()?, r.read_u8()?));
    }
    Ok(pairs)
}

fn write_ids(w: &mut BufferWriter, ids: &[u8]) {
    w.write_packed_u32(ids.len() as u32);
    w.write_bytes(ids);
}

fn read_ids(r: &mut BufferReader<'_>) -> Result<Vec<u8>, ProtocolError> {
    let count = r.read_packed_u32()? as usize;
    Ok(r.read_bytes(count)?.to_vec())
}

fn read_doors(r: &mut BufferReader<'_>, doors: &mut [DoorState]) -> Result<(), ProtocolError> {
    for door in doors {
        *door = r.read_bool()?;
    }
    Ok(())
}

impl Networkable for SystemState {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        match self {
            Self::Reactor(s) => {
                w.write_f32_le(s.countdown);
                write_pairs(w, &s.consoles);
            }
            Self::Switch(s) => {
                w.write_u8(s.expected);
                w.write_u8(s.actual);
                w.write_u8(s.value);
            }
            Self::LifeSupp(s) => {
                w.write_f32_le(s.countdown);
                w.write_packed_u32(s.completed.len() as u32);
                for console in &s.completed {
                    w.write_packed_u32(*console);
                }
            }
            Self::MedScan(s) => write_ids(w, &s.queue),
            Self::SecurityCamera(s) => write_ids(w, &s.watching),
            Self::HudOverride(s) => w.write_bool(s.sabotaged),
            Self::HqHud(s) => {
                write_pairs(w, &s.active);
                write_ids(w, &s.completed);
            }
            Self::AutoDoors(s) => {
                for door in &s.doors {
                    w.write_bool(*door);
                }
            }
            Self::Doors(s) => {
                w.write_packed_u32(s.timers.len() as u32);
                for (system, timer) in &s.timers {
                    w.write_u8(*system);
                    w.write_f32_le(*timer);
                }
                for door in &s.doors {
                    w.write_bool(*door);
                }
            }
            Self::Decon(s) => {
                w.write_u8(s.timer);
                w.write_u8(s.state);
            }
            Self::Sabotage(s) => w.write_f32_le(s.cooldown),
        }
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        match self {
            Self::Reactor(s) => {
                s.countdown = r.read_f32_le()?;
                s.consoles = read_pairs(r)?;
            }
            Self::Switch(s) => {
                s.expected = r.read_u8()?;
                s.actual = r.read_u8()?;
                s.value = r.read_u8()?;
            }
            Self::LifeSupp(s) => {
                s.countdown = r.read_f32_le()?;
                let count = r.read_packed_u32()?;
                s.completed.clear();
                for _ in 0..count {
                    s.completed.push(r.read_packed_u32()?);
                }
            }
            Self::MedScan(s) => s.queue = read_ids(r)?,
            Self::SecurityCamera(s) => s.watching = read_ids(r)?,
            Self::HudOverride(s) => s.sabotaged = r.read_bool()?,
            Self::HqHud(s) => {
                s.active = read_pairs(r)?;
                s.completed = read_ids(r)?;
            }
            Self::AutoDoors(s) => read_doors(r, &mut s.doors)?,
            Self::Doors(s) => {
                let count = r.read_packed_u32()?;
                s.timers.clear();
                for _ in 0..count {
                    let system = r.read_u8()?;
                    s.timers.insert(system, r.read_f32_le()?);
                }
                read_doors(r, &mut s.doors)?;
            }
            Self::Decon(s) => {
                s.timer = r.read_u8()?;
                s.state = r.read_u8()?;
            }
            Self::Sabotage(s) => s.cooldown = r.read_f32_le()?,
        }
        Ok(())
    }

    fn write_delta(&self, _dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        match self {
            Self::AutoDoors(s) => {
                w.write_packed_u32(s.dirty);
                for (index, door) in s.doors.iter().enumerate().take(32) {
                    if s.dirty & (1 << index) != 0 {
                        w.write_bool(*door);
                    }
                }
                Ok(())
            }
            _ => self.write_full(w),
        }
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        match self {
            Self::AutoDoors(s) => {
                let mask = r.read_packed_u32()?;
                for (index, door) in s.doors.iter_mut().enumerate().take(32) {
                    if mask & (1 << index) != 0 {
                        *door = r.read_bool()?;
                    }
                }
                Ok(())
            }
            _ => self.read_full(r),
        }
    }

    fn clear_dirty(&mut self) {
        if let Self::AutoDoors(s) = self {
            s.dirty = 0;
        }
    }
}
