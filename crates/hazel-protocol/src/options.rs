//! Lobby settings (`GameOptions`).
//!
//! The block is versioned: each version appends fields to the previous
//! layout. We decode every version from 1 to 4 and always remember which
//! version we read, so re-encoding produces the same bytes.

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferReader, BufferWriter};
use crate::ProtocolError;

/// Newest layout this crate writes by default.
pub const LATEST_OPTIONS_VERSION: u8 = 4;

/// The "all languages" keyword used in game-list searches.
pub const LANGUAGE_ALL: u32 = 0;
pub const LANGUAGE_ENGLISH: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOptions {
    pub version: u8,
    pub max_players: u8,
    /// Bitflags of chat languages.
    pub language: u32,
    pub map: u8,
    pub player_speed: f32,
    pub crewmate_vision: f32,
    pub impostor_vision: f32,
    pub kill_cooldown: f32,
    pub common_tasks: u8,
    pub long_tasks: u8,
    pub short_tasks: u8,
    pub emergency_meetings: i32,
    pub impostors: u8,
    pub kill_distance: u8,
    pub discussion_time: i32,
    pub voting_time: i32,
    pub is_defaults: bool,
    /// Version 2 and later.
    pub emergency_cooldown: u8,
    /// Version 3 and later.
    pub confirm_ejects: bool,
    pub visual_tasks: bool,
    /// Version 4.
    pub anonymous_votes: bool,
    pub task_bar_mode: u8,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            version: LATEST_OPTIONS_VERSION,
            max_players: 10,
            language: LANGUAGE_ENGLISH,
            map: 0,
            player_speed: 1.0,
            crewmate_vision: 1.0,
            impostor_vision: 1.5,
            kill_cooldown: 15.0,
            common_tasks: 1,
            long_tasks: 1,
            short_tasks: 2,
            emergency_meetings: 1,
            impostors: 1,
            kill_distance: 1,
            discussion_time: 15,
            voting_time: 120,
            is_defaults: true,
            emergency_cooldown: 15,
            confirm_ejects: true,
            visual_tasks: true,
            anonymous_votes: false,
            task_bar_mode: 0,
        }
    }
}

impl GameOptions {
    /// Options for a game-list search: any map, any language, any
    /// impostor count.
    pub fn search() -> Self {
        Self {
            language: LANGUAGE_ALL,
            map: 0b0111,
            impostors: 0,
            ..Self::default()
        }
    }

    /// Reads a packed-length-prefixed options block.
    pub fn read(reader: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let len = reader.read_packed_u32()? as usize;
        let mut body = BufferReader::new(reader.read_bytes(len)?);
        Self::read_body(&mut body)
    }

    fn read_body(r: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let version = r.read_u8()?;
        if !(1..=LATEST_OPTIONS_VERSION).contains(&version) {
            return Err(ProtocolError::InvalidMessage(format!(
                "unsupported game options version {version}"
            )));
        }
        let defaults = Self::default();
        let mut options = Self {
            version,
            max_players: r.read_u8()?,
            language: r.read_u32_le()?,
            map: r.read_u8()?,
            player_speed: r.read_f32_le()?,
            crewmate_vision: r.read_f32_le()?,
            impostor_vision: r.read_f32_le()?,
            kill_cooldown: r.read_f32_le()?,
            common_tasks: r.read_u8()?,
            long_tasks: r.read_u8()?,
            short_tasks: r.read_u8()?,
            emergency_meetings: r.read_i32_le()?,
            impostors: r.read_u8()?,
            kill_distance: r.read_u8()?,
            discussion_time: r.read_i32_le()?,
            voting_time: r.read_i32_le()?,
            is_defaults: r.read_bool()?,
            ..defaults
        };
        if version >= 2 {
            options.emergency_cooldown = r.read_u8()?;
        }
        if version >= 3 {
            options.confirm_ejects = r.read_bool()?;
            options.visual_tasks = r.read_bool()?;
        }
        if version >= 4 {
            options.anonymous_votes = r.read_bool()?;
            options.task_bar_mode = r.read_u8()?;
        }
        Ok(options)
    }

    /// Writes a packed-length-prefixed options block in `self.version`'s
    /// layout.
    pub fn write(&self, writer: &mut BufferWriter) {
        let mut body = BufferWriter::with_capacity(48);
        self.write_body(&mut body);
        writer.write_packed_u32(body.len() as u32);
        writer.write_bytes(body.as_slice());
    }

    fn write_body(&self, w: &mut BufferWriter) {
        w.write_u8(self.version);
        w.write_u8(self.max_players);
        w.write_u32_le(self.language);
        w.write_u8(self.map);
        w.write_f32_le(self.player_speed);
        w.write_f32_le(self.crewmate_vision);
        w.write_f32_le(self.impostor_vision);
        w.write_f32_le(self.kill_cooldown);
        w.write_u8(self.common_tasks);
        w.write_u8(self.long_tasks);
        w.write_u8(self.short_tasks);
        w.write_i32_le(self.emergency_meetings);
        w.write_u8(self.impostors);
        w.write_u8(self.kill_distance);
        w.write_i32_le(self.discussion_time);
        w.write_i32_le(self.voting_time);
        w.write_bool(self.is_defaults);
        if self.version >= 2 {
            w.write_u8(self.emergency_cooldown);
        }
        if self.version >= 3 {
            w.write_bool(self.confirm_ejects);
            w.write_bool(self.visual_tasks);
        }
        if self.version >= 4 {
            w.write_bool(self.anonymous_votes);
            w.write_u8(self.task_bar_mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(options: &GameOptions) -> (Vec<u8>, GameOptions) {
        let mut w = BufferWriter::new();
        options.write(&mut w);
        let bytes = w.as_slice().to_vec();
        let decoded = GameOptions::read(&mut BufferReader::new(&bytes)).unwrap();
        (bytes, decoded)
    }

    #[test]
    fn test_write_version_four_length_prefix() {
        let (bytes, decoded) = round_trip(&GameOptions::default());
        // 41 bytes for version 1, +1 for v2, +2 for v3, +2 for v4.
        assert_eq!(bytes[0], 46);
        assert_eq!(bytes.len(), 47);
        assert_eq!(decoded, GameOptions::default());
    }

    #[test]
    fn test_read_version_one_keeps_later_fields_default() {
        let options = GameOptions {
            version: 1,
            impostors: 3,
            emergency_cooldown: 99,
            ..GameOptions::default()
        };
        let (bytes, decoded) = round_trip(&options);

        assert_eq!(bytes[0], 41);
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.impostors, 3);
        assert_eq!(decoded.emergency_cooldown, GameOptions::default().emergency_cooldown);
    }

    #[test]
    fn test_read_unsupported_version_errors() {
        let bytes = [1u8, 9];
        let result = GameOptions::read(&mut BufferReader::new(&bytes));
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_read_ignores_trailing_bytes_inside_block() {
        let mut w = BufferWriter::new();
        GameOptions::default().write(&mut w);
        let mut bytes = w.as_slice().to_vec();
        bytes[0] += 2;
        bytes.extend_from_slice(&[0xee, 0xee, 0x07]);

        let mut r = BufferReader::new(&bytes);
        let decoded = GameOptions::read(&mut r).unwrap();

        assert_eq!(decoded, GameOptions::default());
        assert_eq!(r.read_u8().unwrap(), 0x07);
    }
}
