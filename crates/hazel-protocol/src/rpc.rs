//! Remote procedure calls carried inside RPC game-data messages.
//!
//! The id set is closed; anything outside it decodes to [`Rpc::Unknown`]
//! with its body kept as-is so it can be forwarded or ignored.

use bytes::Bytes;

use crate::buffer::{BufferReader, BufferWriter};
use crate::info::PlayerInfo;
use crate::options::GameOptions;
use crate::types::Vector2;
use crate::ProtocolError;

/// Sentinel player id meaning "nobody" (skip vote, emergency button).
pub const NO_PLAYER: u8 = 0xff;

#[derive(Debug, Clone, PartialEq)]
pub enum Rpc {
    PlayAnimation { task_type: u8 },
    CompleteTask { task_index: u32 },
    SyncSettings { options: GameOptions },
    SetInfected { impostors: Vec<u8> },
    Exiled,
    CheckName { name: String },
    SetName { name: String },
    CheckColor { color: u8 },
    SetColor { color: u8 },
    SetHat { hat: u32 },
    SetSkin { skin: u32 },
    /// `player_id` is [`NO_PLAYER`] for the emergency button.
    ReportDeadBody { player_id: u8 },
    MurderPlayer { victim_netid: u32 },
    SendChat { message: String },
    StartMeeting { player_id: u8 },
    SetScanner { scanning: bool, sequence: u8 },
    SendChatNote { player_id: u8, note: u8 },
    SetPet { pet: u32 },
    /// `counter` of -1 cancels the countdown.
    SetStartCounter { sequence: u32, counter: i8 },
    EnterVent { vent_id: u32 },
    ExitVent { vent_id: u32 },
    SnapTo { position: Vector2, sequence: u16 },
    Close,
    /// `states` holds one vote-state byte per player area.
    VotingComplete { states: Vec<u8>, exiled: u8, tie: bool },
    CastVote { voter: u8, suspect: u8 },
    ClearVote,
    AddVote { voter: i32, target: i32 },
    CloseDoorsOfType { system: u8 },
    RepairSystem { system: u8, player_netid: u32, amount: u8 },
    SetTasks { player_id: u8, tasks: Vec<u8> },
    UpdateGameData { players: Vec<PlayerInfo> },
    Unknown { id: u8, body: Bytes },
}

impl Rpc {
    pub fn id(&self) -> u8 {
        match self {
            Self::PlayAnimation { .. } => 0,
            Self::CompleteTask { .. } => 1,
            Self::SyncSettings { .. } => 2,
            Self::SetInfected { .. } => 3,
            Self::Exiled => 4,
            Self::CheckName { .. } => 5,
            Self::SetName { .. } => 6,
            Self::CheckColor { .. } => 7,
            Self::SetColor { .. } => 8,
            Self::SetHat { .. } => 9,
            Self::SetSkin { .. } => 10,
            Self::ReportDeadBody { .. } => 11,
            Self::MurderPlayer { .. } => 12,
            Self::SendChat { .. } => 13,
            Self::StartMeeting { .. } => 14,
            Self::SetScanner { .. } => 15,
            Self::SendChatNote { .. } => 16,
            Self::SetPet { .. } => 17,
            Self::SetStartCounter { .. } => 18,
            Self::EnterVent { .. } => 19,
            Self::ExitVent { .. } => 20,
            Self::SnapTo { .. } => 21,
            Self::Close => 22,
            Self::VotingComplete { .. } => 23,
            Self::CastVote { .. } => 24,
            Self::ClearVote => 25,
            Self::AddVote { .. } => 26,
            Self::CloseDoorsOfType { .. } => 27,
            Self::RepairSystem { .. } => 28,
            Self::SetTasks { .. } => 29,
            Self::UpdateGameData { .. } => 30,
            Self::Unknown { id, .. } => *id,
        }
    }

    pub fn decode(id: u8, r: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let rpc = match id {
            0 => Self::PlayAnimation { task_type: r.read_u8()? },
            1 => Self::CompleteTask { task_index: r.read_packed_u32()? },
            2 => Self::SyncSettings { options: GameOptions::read(r)? },
            3 => {
                let count = r.read_packed_u32()? as usize;
                Self::SetInfected {
                    impostors: r.read_bytes(count)?.to_vec(),
                }
            }
            4 => Self::Exiled,
            5 => Self::CheckName { name: r.read_string()? },
            6 => Self::SetName { name: r.read_string()? },
            7 => Self::CheckColor { color: r.read_u8()? },
            8 => Self::SetColor { color: r.read_u8()? },
            9 => Self::SetHat { hat: r.read_packed_u32()? },
            10 => Self::SetSkin { skin: r.read_packed_u32()? },
            11 => Self::ReportDeadBody { player_id: r.read_u8()? },
            12 => Self::MurderPlayer { victim_netid: r.read_packed_u32()? },
            13 => Self::SendChat { message: r.read_string()? },
            14 => Self::StartMeeting { player_id: r.read_u8()? },
            15 => Self::SetScanner {
                scanning: r.read_bool()?,
                sequence: r.read_u8()?,
            },
            16 => Self::SendChatNote {
                player_id: r.read_u8()?,
                note: r.read_u8()?,
            },
            17 => Self::SetPet { pet: r.read_packed_u32()? },
            18 => Self::SetStartCounter {
                sequence: r.read_packed_u32()?,
                counter: r.read_i8()?,
            },
            19 => Self::EnterVent { vent_id: r.read_packed_u32()? },
            20 => Self::ExitVent { vent_id: r.read_packed_u32()? },
            21 => Self::SnapTo {
                position: Vector2::read(r)?,
                sequence: r.read_u16_le()?,
            },
            22 => Self::Close,
            23 => {
                let count = r.read_packed_u32()? as usize;
                Self::VotingComplete {
                    states: r.read_bytes(count)?.to_vec(),
                    exiled: r.read_u8()?,
                    tie: r.read_bool()?,
                }
            }
            24 => Self::CastVote {
                voter: r.read_u8()?,
                suspect: r.read_u8()?,
            },
            25 => Self::ClearVote,
            26 => Self::AddVote {
                voter: r.read_i32_le()?,
                target: r.read_i32_le()?,
            },
            27 => Self::CloseDoorsOfType { system: r.read_u8()? },
            28 => Self::RepairSystem {
                system: r.read_u8()?,
                player_netid: r.read_packed_u32()?,
                amount: r.read_u8()?,
            },
            29 => {
                let player_id = r.read_u8()?;
                let count = r.read_packed_u32()? as usize;
                Self::SetTasks {
                    player_id,
                    tasks: r.read_bytes(count)?.to_vec(),
                }
            }
            30 => {
                let mut players = Vec::new();
                while !r.is_empty() {
                    let (player_id, mut body) = r.read_message()?;
                    players.push(PlayerInfo::read(player_id, &mut body)?);
                }
                Self::UpdateGameData { players }
            }
            id => Self::Unknown {
                id,
                body: Bytes::copy_from_slice(r.read_rest()),
            },
        };
        Ok(rpc)
    }

    /// Writes the body only; the caller writes the id.
    pub fn encode(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        match self {
            Self::PlayAnimation { task_type } => w.write_u8(*task_type),
            Self::CompleteTask { task_index } => w.write_packed_u32(*task_index),
            Self::SyncSettings { options } => options.write(w),
            Self::SetInfected { impostors } => {
                w.write_packed_u32(impostors.len() as u32);
                w.write_bytes(impostors);
            }
            Self::Exiled | Self::Close | Self::ClearVote => {}
            Self::CheckName { name } | Self::SetName { name } => w.write_string(name),
            Self::CheckColor { color } | Self::SetColor { color } => w.write_u8(*color),
            Self::SetHat { hat } => w.write_packed_u32(*hat),
            Self::SetSkin { skin } => w.write_packed_u32(*skin),
            Self::ReportDeadBody { player_id } | Self::StartMeeting { player_id } => {
                w.write_u8(*player_id)
            }
            Self::MurderPlayer { victim_netid } => w.write_packed_u32(*victim_netid),
            Self::SendChat { message } => w.write_string(message),
            Self::SetScanner { scanning, sequence } => {
                w.write_bool(*scanning);
                w.write_u8(*sequence);
            }
            Self::SendChatNote { player_id, note } => {
                w.write_u8(*player_id);
                w.write_u8(*note);
            }
            Self::SetPet { pet } => w.write_packed_u32(*pet),
            Self::SetStartCounter { sequence, counter } => {
                w.write_packed_u32(*sequence);
                w.write_i8(*counter);
            }
            Self::EnterVent { vent_id } | Self::ExitVent { vent_id } => {
                w.write_packed_u32(*vent_id)
            }
            Self::SnapTo { position, sequence } => {
                position.write(w);
                w.write_u16_le(*sequence);
            }
            Self::VotingComplete {
                states,
                exiled,
                tie,
            } => {
                w.write_packed_u32(states.len() as u32);
                w.write_bytes(states);
                w.write_u8(*exiled);
                w.write_bool(*tie);
            }
            Self::CastVote { voter, suspect } => {
                w.write_u8(*voter);
                w.write_u8(*suspect);
            }
            Self::AddVote { voter, target } => {
                w.write_i32_le(*voter);
                w.write_i32_le(*target);
            }
            Self::CloseDoorsOfType { system } => w.write_u8(*system),
            Self::RepairSystem {
                system,
                player_netid,
                amount,
            } => {
                w.write_u8(*system);
                w.write_packed_u32(*player_netid);
                w.write_u8(*amount);
            }
            Self::SetTasks { player_id, tasks } => {
                w.write_u8(*player_id);
                w.write_packed_u32(tasks.len() as u32);
                w.write_bytes(tasks);
            }
            Self::UpdateGameData { players } => {
                for player in players {
                    w.write_message(player.player_id, |w| {
                        player.write(w);
                        Ok(())
                    })?;
                }
            }
            Self::Unknown { body, .. } => w.write_bytes(body),
        }
        Ok(())
    }
}
