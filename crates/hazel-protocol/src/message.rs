//! Game-data messages: the replication traffic inside GameData and
//! GameDataTo payloads.

use bytes::Bytes;

use crate::buffer::{BufferReader, BufferWriter};
use crate::rpc::Rpc;
use crate::ProtocolError;

/// Spawn flag marking the prefab as a player's own character.
pub const SPAWN_FLAG_CLIENT_CHARACTER: u8 = 0x01;

/// Tag of the nested message holding one component's state in a Spawn.
const COMPONENT_STATE_TAG: u8 = 1;

/// Full state of one component inside a Spawn message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnComponent {
    pub netid: u32,
    pub data: Bytes,
}

/// A prefab instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnMessage {
    /// Raw spawn type; see [`SpawnType`](crate::SpawnType). Kept raw so an
    /// unknown prefab can still be forwarded.
    pub spawn_type: u32,
    /// Owning client id, or `-2` for room-global objects.
    pub owner_id: i32,
    pub flags: u8,
    /// Components in prefab order.
    pub components: Vec<SpawnComponent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameDataMessage {
    /// Delta state for one component.
    Data { netid: u32, data: Bytes },
    Rpc { netid: u32, rpc: Rpc },
    Spawn(SpawnMessage),
    Despawn { netid: u32 },
    SceneChange { client_id: i32, scene: String },
    Ready { client_id: i32 },
    Unknown { tag: u8, body: Bytes },
}

impl GameDataMessage {
    pub const TAG_DATA: u8 = 1;
    pub const TAG_RPC: u8 = 2;
    pub const TAG_SPAWN: u8 = 4;
    pub const TAG_DESPAWN: u8 = 5;
    pub const TAG_SCENE_CHANGE: u8 = 6;
    pub const TAG_READY: u8 = 7;

    pub fn tag(&self) -> u8 {
        match self {
            Self::Data { .. } => Self::TAG_DATA,
            Self::Rpc { .. } => Self::TAG_RPC,
            Self::Spawn(_) => Self::TAG_SPAWN,
            Self::Despawn { .. } => Self::TAG_DESPAWN,
            Self::SceneChange { .. } => Self::TAG_SCENE_CHANGE,
            Self::Ready { .. } => Self::TAG_READY,
            Self::Unknown { tag, .. } => *tag,
        }
    }

    /// Reads one framed message.
    pub fn read(r: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let (tag, mut body) = r.read_message()?;
        Self::decode(tag, &mut body)
    }

    /// Decodes a message body whose tag has already been read.
    pub fn decode(tag: u8, r: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        let message = match tag {
            Self::TAG_DATA => Self::Data {
                netid: r.read_packed_u32()?,
                data: Bytes::copy_from_slice(r.read_rest()),
            },
            Self::TAG_RPC => {
                let netid = r.read_packed_u32()?;
                let id = r.read_u8()?;
                Self::Rpc {
                    netid,
                    rpc: Rpc::decode(id, r)?,
                }
            }
            Self::TAG_SPAWN => Self::Spawn(read_spawn(r)?),
            Self::TAG_DESPAWN => Self::Despawn {
                netid: r.read_packed_u32()?,
            },
            Self::TAG_SCENE_CHANGE => Self::SceneChange {
                client_id: r.read_packed_i32()?,
                scene: r.read_string()?,
            },
            Self::TAG_READY => Self::Ready {
                client_id: r.read_packed_i32()?,
            },
            tag => Self::Unknown {
                tag,
                body: Bytes::copy_from_slice(r.read_rest()),
            },
        };
        Ok(message)
    }

    /// Writes the message with its frame.
    pub fn write(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_message(self.tag(), |w| self.encode_body(w))
    }

    fn encode_body(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        match self {
            Self::Data { netid, data } => {
                w.write_packed_u32(*netid);
                w.write_bytes(data);
            }
            Self::Rpc { netid, rpc } => {
                w.write_packed_u32(*netid);
                w.write_u8(rpc.id());
                rpc.encode(w)?;
            }
            Self::Spawn(spawn) => write_spawn(spawn, w)?,
            Self::Despawn { netid } => w.write_packed_u32(*netid),
            Self::SceneChange { client_id, scene } => {
                w.write_packed_i32(*client_id);
                w.write_string(scene);
            }
            Self::Ready { client_id } => w.write_packed_i32(*client_id),
            Self::Unknown { body, .. } => w.write_bytes(body),
        }
        Ok(())
    }
}

fn read_spawn(r: &mut BufferReader<'_>) -> Result<SpawnMessage, ProtocolError> {
    let spawn_type = r.read_packed_u32()?;
    let owner_id = r.read_packed_i32()?;
    let flags = r.read_u8()?;
    let count = r.read_packed_u32()?;
    let mut components = Vec::with_capacity(count.min(16) as usize);
    for _ in 0..count {
        let netid = r.read_packed_u32()?;
        let (_tag, mut state) = r.read_message()?;
        components.push(SpawnComponent {
            netid,
            data: Bytes::copy_from_slice(state.read_rest()),
        });
    }
    Ok(SpawnMessage {
        spawn_type,
        owner_id,
        flags,
        components,
    })
}

fn write_spawn(spawn: &SpawnMessage, w: &mut BufferWriter) -> Result<(), ProtocolError> {
    w.write_packed_u32(spawn.spawn_type);
    w.write_packed_i32(spawn.owner_id);
    w.write_u8(spawn.flags);
    w.write_packed_u32(spawn.components.len() as u32);
    for component in &spawn.components {
        w.write_packed_u32(component.netid);
        w.write_message(COMPONENT_STATE_TAG, |w| {
            w.write_bytes(&component.data);
            Ok(())
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(message: &GameDataMessage) -> Vec<u8> {
        let mut w = BufferWriter::new();
        message.write(&mut w).unwrap();
        w.as_slice().to_vec()
    }

    #[test]
    fn test_write_global_spawn_encodes_owner_as_unsigned() {
        let spawn = GameDataMessage::Spawn(SpawnMessage {
            spawn_type: 2,
            owner_id: -2,
            flags: 0,
            components: vec![SpawnComponent {
                netid: 5,
                data: Bytes::new(),
            }],
        });

        let bytes = encode(&spawn);

        assert_eq!(
            bytes,
            &[12, 0, 4, 2, 0xfe, 0xff, 0xff, 0xff, 0x0f, 0, 1, 5, 0, 0, 1]
        );
        let decoded = GameDataMessage::read(&mut BufferReader::new(&bytes)).unwrap();
        assert_eq!(decoded, spawn);
    }

    #[test]
    fn test_read_rpc_message() {
        let bytes = [3, 0, 2, 7, 8, 3];
        let message = GameDataMessage::read(&mut BufferReader::new(&bytes)).unwrap();
        assert_eq!(
            message,
            GameDataMessage::Rpc {
                netid: 7,
                rpc: Rpc::SetColor { color: 3 }
            }
        );
    }

    #[test]
    fn test_scene_change_layout() {
        let message = GameDataMessage::SceneChange {
            client_id: 1,
            scene: "OnlineGame".into(),
        };
        let bytes = encode(&message);
        assert_eq!(&bytes[..5], &[12, 0, 6, 1, 10]);
        assert_eq!(&bytes[5..], b"OnlineGame");
    }

    #[test]
    fn test_unknown_tag_preserved() {
        let bytes = [2, 0, 99, 0xaa, 0xbb];
        let message = GameDataMessage::read(&mut BufferReader::new(&bytes)).unwrap();
        assert_eq!(message.tag(), 99);
        assert_eq!(encode(&message), bytes);
    }

    #[test]
    fn test_spawn_with_missing_component_state_errors() {
        // Claims two components, carries one.
        let bytes = [8, 0, 4, 4, 1, 1, 2, 10, 0, 0, 1];
        assert!(GameDataMessage::read(&mut BufferReader::new(&bytes)).is_err());
    }
}
