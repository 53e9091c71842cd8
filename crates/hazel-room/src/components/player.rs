//! Per-player components.

use hazel_protocol::{sequence_newer, BufferReader, BufferWriter, ProtocolError, Vector2};

use super::Networkable;

/// Binds a client to a player id in the GameData table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerControl {
    /// `true` only in the spawn that first creates the player; replicas
    /// use it to play the join animation.
    pub is_new: bool,
    pub player_id: u8,
}

impl Networkable for PlayerControl {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_bool(self.is_new);
        w.write_u8(self.player_id);
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.is_new = r.read_bool()?;
        self.player_id = r.read_u8()?;
        Ok(())
    }

    fn write_delta(&self, _dirty: u32, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_u8(self.player_id);
        Ok(())
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.player_id = r.read_u8()?;
        Ok(())
    }
}

/// Position replication. Updates carry a sequence number; anything not
/// newer than the last applied one is discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomNetworkTransform {
    pub sequence: u16,
    pub position: Vector2,
    pub velocity: Vector2,
}

impl CustomNetworkTransform {
    /// Applies a movement if `sequence` is newer. Returns whether it was.
    pub fn apply(&mut self, sequence: u16, position: Vector2, velocity: Vector2) -> bool {
        if !sequence_newer(sequence, self.sequence) {
            return false;
        }
        self.sequence = sequence;
        self.position = position;
        self.velocity = velocity;
        true
    }

    /// Moves to `position` under the next sequence number.
    pub fn advance(&mut self, position: Vector2, velocity: Vector2) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.position = position;
        self.velocity = velocity;
        self.sequence
    }
}

impl Networkable for CustomNetworkTransform {
    fn write_full(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_u16_le(self.sequence);
        self.position.write(w);
        self.velocity.write(w);
        Ok(())
    }

    fn read_full(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        self.sequence = r.read_u16_le()?;
        self.position = Vector2::read(r)?;
        self.velocity = Vector2::read(r)?;
        Ok(())
    }

    fn read_delta(&mut self, r: &mut BufferReader<'_>) -> Result<(), ProtocolError> {
        let sequence = r.read_u16_le()?;
        let position = Vector2::read(r)?;
        let velocity = Vector2::read(r)?;
        if !self.apply(sequence, position, velocity) {
            tracing::trace!(sequence, last = self.sequence, "stale movement ignored");
        }
        Ok(())
    }
}
