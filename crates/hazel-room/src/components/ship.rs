//! The ship: one component per map holding every subsystem.

use hazel_protocol::{BufferReader, BufferWriter, GameMap, ProtocolError, SystemType};

use super::systems::{
    AutoDoorsSystem, DeconSystem, DoorsSystem, HqHudSystem, HudOverrideSystem, LifeSuppSystem,
    MedScanSystem, ReactorSystem, SabotageSystem, SecurityCameraSystem, SwitchSystem,
    SystemState, POLUS_DOOR_COUNT, SKELD_DOOR_COUNT,
};
use super::Networkable;

/// Ship state. Systems are kept in the map's wire order; the component's
/// dirty mask uses `1 << system type`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipStatus {
    pub map: GameMap,
    pub systems: Vec<(SystemType, SystemState)>,
}

impl ShipStatus {
    pub fn new(map: GameMap) -> Self {
        Self {
            map,
            systems: layout(map),
        }
    }

    pub fn dirty_bit(system: SystemType) -> u32 {
        1u32.checked_shl(u32::from(system.as_u8())).unwrap_or(0)
    }

    pub fn system(&self, system: SystemType) -> Option<&SystemState> {
        self.systems
            .iter()
            .find(|(ty, _)| *ty == system)
            .map(|(_, state)| state)
    }

    pub fn system_mut(&mut self, system: SystemType) -> Option<&mut SystemState> {
        self.systems
            .iter_mut()
            .find(|(ty, _)| *ty == system)
            .map(|(_, state)| state)
    }
}

fn layout(map: GameMap) -> Vec<(SystemType, SystemState)> {
    use SystemType::*;

    let switch = || {
        SystemState::Switch(SwitchSystem {
            value: u8::MAX,
            ..SwitchSystem::default()
        })
    };
    let reactor = || SystemState::Reactor(ReactorSystem::default());
    let life = || SystemState::LifeSupp(LifeSuppSystem::default());
    let medscan = || SystemState::MedScan(MedScanSystem::default());
    let security = || SystemState::SecurityCamera(SecurityCameraSystem::default());
    let comms = || SystemState::HudOverride(HudOverrideSystem::default());
    let sabotage = || SystemState::Sabotage(SabotageSystem::default());
    let decon = || SystemState::Decon(DeconSystem::default());

    match map {
        GameMap::TheSkeld | GameMap::AprilSkeld => vec![
            (Reactor, reactor()),
            (Electrical, switch()),
            (LifeSupp, life()),
            (MedBay, medscan()),
            (Security, security()),
            (Comms, comms()),
            (Doors, SystemState::AutoDoors(AutoDoorsSystem::new(SKELD_DOOR_COUNT))),
            (Sabotage, sabotage()),
        ],
        GameMap::MiraHq => vec![
            (Reactor, reactor()),
            (Electrical, switch()),
            (LifeSupp, life()),
            (MedBay, medscan()),
            (Comms, SystemState::HqHud(HqHudSystem::default())),
            (Sabotage, sabotage()),
            (Decontamination, decon()),
        ],
        GameMap::Polus => vec![
            (Electrical, switch()),
            (MedBay, medscan()),
            (Security, security()),
            (Comms, comms()),
            (Doors, SystemState::Doors(DoorsSystem::new(POLUS_DOOR_COUNT))),
            (Decontamination, decon()),
            (Decontamination2, decon()),
            (Sabotage, sabotage()),
            (Laboratory, reactor()),
        ],
    }
}

impl Networkable for ShipStatus {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        for (_, state) in &self.systems {
            state.write_full(w)?;
        }
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        for (_, state) in &mut self.systems {
            state.read_full(r)?;
        }
        Ok(())
    }

    fn write_delta(&self, dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_packed_u32(dirty);
        for (ty, state) in &self.systems {
            if dirty & Self::dirty_bit(*ty) != 0 {
                state.write_delta(dirty, w)?;
            }
        }
        Ok(())
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        let mask = r.read_packed_u32()?;
        for (ty, state) in &mut self.systems {
            if mask & Self::dirty_bit(*ty) != 0 {
                state.read_delta(r)?;
            }
        }
        Ok(())
    }

    fn clear_dirty(&mut self) {
        for (_, state) in &mut self.systems {
            state.clear_dirty();
        }
    }
}
