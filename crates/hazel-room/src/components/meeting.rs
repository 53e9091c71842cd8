//! Meeting votes.

use hazel_protocol::{BufferReader, BufferWriter, ProtocolError, NO_PLAYER};

use super::Networkable;

const DEAD: u8 = 0x80;
const DID_VOTE: u8 = 0x40;
const DID_REPORT: u8 = 0x20;
const VOTE_MASK: u8 = 0x0f;
const SKIPPED: u8 = 0x0f;

/// One player area's vote byte: low nibble is `voted_for + 1`
/// (`0` = no vote, `0xf` = skipped), high bits are flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteState(pub u8);

impl VoteState {
    pub fn voted_for(self) -> Option<u8> {
        match self.0 & VOTE_MASK {
            0 => None,
            SKIPPED => Some(NO_PLAYER),
            n => Some(n - 1),
        }
    }

    pub fn set_vote(&mut self, suspect: u8) {
        let nibble = if suspect == NO_PLAYER {
            SKIPPED
        } else {
            suspect.wrapping_add(1) & VOTE_MASK
        };
        self.0 = (self.0 & !VOTE_MASK) | nibble | DID_VOTE;
    }

    pub fn clear_vote(&mut self) {
        self.0 &= !(VOTE_MASK | DID_VOTE);
    }

    pub fn is_dead(self) -> bool {
        self.0 & DEAD != 0
    }

    pub fn did_vote(self) -> bool {
        self.0 & DID_VOTE != 0
    }

    pub fn did_report(self) -> bool {
        self.0 & DID_REPORT != 0
    }

    pub fn new(dead: bool, did_report: bool) -> Self {
        let mut byte = 0;
        if dead {
            byte |= DEAD;
        }
        if did_report {
            byte |= DID_REPORT;
        }
        Self(byte)
    }
}

/// Vote state per player area. Areas are ordered by player id; the
/// room fills `players` when the hud is spawned so votes can be mapped
/// back to players.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingHud {
    pub players: Vec<u8>,
    pub states: Vec<VoteState>,
}

impl MeetingHud {
    pub fn area_of(&self, player_id: u8) -> Option<usize> {
        self.players.iter().position(|p| *p == player_id)
    }

    /// Records a vote. Returns the voter's area index for dirty marking.
    pub fn cast_vote(&mut self, voter: u8, suspect: u8) -> Option<usize> {
        let index = self.area_of(voter)?;
        let state = self.states.get_mut(index)?;
        if state.is_dead() || state.did_vote() {
            return None;
        }
        state.set_vote(suspect);
        Some(index)
    }

    /// `true` once every living player has voted.
    pub fn all_voted(&self) -> bool {
        self.states.iter().all(|s| s.is_dead() || s.did_vote())
    }

    /// Tallies votes. Returns the exiled player, or `None` on a skip or
    /// a tie, plus whether it was a tie.
    pub fn tally(&self) -> (Option<u8>, bool) {
        let mut counts = std::collections::BTreeMap::<u8, usize>::new();
        for suspect in self.states.iter().filter_map(|s| s.voted_for()) {
            *counts.entry(suspect).or_default() += 1;
        }
        let Some(max) = counts.values().copied().max() else {
            return (None, false);
        };
        let mut leaders = counts.iter().filter(|(_, c)| **c == max).map(|(p, _)| *p);
        match (leaders.next(), leaders.next()) {
            (Some(_), Some(_)) => (None, true),
            (Some(NO_PLAYER), None) | (None, _) => (None, false),
            (Some(player), None) => (Some(player), false),
        }
    }
}

impl Networkable for MeetingHud {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        for state in &self.states {
            w.write_u8(state.0);
        }
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.states = r.read_rest().iter().map(|b| VoteState(*b)).collect();
        Ok(())
    }

    fn write_delta(&self, dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_packed_u32(dirty);
        for (index, state) in self.states.iter().enumerate().take(32) {
            if dirty & (1 << index) != 0 {
                w.write_u8(state.0);
            }
        }
        Ok(())
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        let mask = r.read_packed_u32()?;
        for (index, state) in self.states.iter_mut().enumerate().take(32) {
            if mask & (1 << index) != 0 {
                *state = VoteState(r.read_u8()?);
            }
        }
        Ok(())
    }
}
