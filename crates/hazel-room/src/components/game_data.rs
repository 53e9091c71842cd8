//! The GameData table and the vote-kick tally that spawns alongside it.

use std::collections::BTreeMap;

use hazel_protocol::{BufferReader, BufferWriter, PlayerInfo, ProtocolError};

use super::Networkable;

// ---------------------------------------------------------------------------
// GameData
// ---------------------------------------------------------------------------

/// Every player's [`PlayerInfo`], keyed by player id.
///
/// This is the only place names, colours, cosmetics, tasks and life
/// state live. RPC handlers mutate it here and mark the player's bit
/// (`1 << player_id`) dirty when this client is host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameData {
    pub players: BTreeMap<u8, PlayerInfo>,
}

impl GameData {
    /// Dirty bit for a player id.
    pub fn dirty_bit(player_id: u8) -> u32 {
        1u32.checked_shl(u32::from(player_id)).unwrap_or(0)
    }

    pub fn player(&self, player_id: u8) -> Option<&PlayerInfo> {
        self.players.get(&player_id)
    }

    pub fn player_mut(&mut self, player_id: u8) -> Option<&mut PlayerInfo> {
        self.players.get_mut(&player_id)
    }

    /// Returns the entry for `player_id`, creating an empty one.
    pub fn entry(&mut self, player_id: u8) -> &mut PlayerInfo {
        self.players
            .entry(player_id)
            .or_insert_with(|| PlayerInfo::new(player_id))
    }

    pub fn remove(&mut self, player_id: u8) -> Option<PlayerInfo> {
        self.players.remove(&player_id)
    }
}

impl Networkable for GameData {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_packed_u32(self.players.len() as u32);
        for (id, info) in &self.players {
            w.write_u8(*id);
            info.write(w);
        }
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        let count = r.read_packed_u32()?;
        self.players.clear();
        for _ in 0..count {
            let id = r.read_u8()?;
            self.players.insert(id, PlayerInfo::read(id, r)?);
        }
        Ok(())
    }

    fn write_delta(&self, dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        for (id, info) in &self.players {
            if dirty & Self::dirty_bit(*id) != 0 {
                w.write_message(*id, |w| {
                    info.write(w);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        while !r.is_empty() {
            let (id, mut body) = r.read_message()?;
            self.players.insert(id, PlayerInfo::read(id, &mut body)?);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VoteBanSystem
// ---------------------------------------------------------------------------

/// Voters per kick target. A target is kicked after three votes; `0`
/// marks an unused voter slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteBanSystem {
    pub votes: BTreeMap<i32, [i32; 3]>,
}

impl VoteBanSystem {
    /// Records `voter` against `target`. Returns the number of votes the
    /// target now has; repeated votes by the same voter count once.
    pub fn add_vote(&mut self, voter: i32, target: i32) -> usize {
        let slots = self.votes.entry(target).or_insert([0; 3]);
        if !slots.contains(&voter) {
            if let Some(free) = slots.iter_mut().find(|v| **v == 0) {
                *free = voter;
            }
        }
        slots.iter().filter(|v| **v != 0).count()
    }

    /// Drops every trace of a departed client.
    pub fn remove_client(&mut self, client_id: i32) {
        self.votes.remove(&client_id);
        for slots in self.votes.values_mut() {
            for v in slots.iter_mut().filter(|v| **v == client_id) {
                *v = 0;
            }
        }
    }
}

impl Networkable for VoteBanSystem {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        let count = self.votes.len().min(u8::MAX as usize);
        w.write_u8(count as u8);
        for (target, voters) in self.votes.iter().take(count) {
            w.write_i32_le(*target);
            for voter in voters {
                w.write_packed_i32(*voter);
            }
        }
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        let count = r.read_u8()?;
        self.votes.clear();
        for _ in 0..count {
            let target = r.read_i32_le()?;
            let mut voters = [0; 3];
            for voter in &mut voters {
                *voter = r.read_packed_i32()?;
            }
            self.votes.insert(target, voters);
        }
        Ok(())
    }
}
