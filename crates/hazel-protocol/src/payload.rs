//! Root messages carried by Reliable and Unreliable packets.
//!
//! Each payload is one `[u16 length][u8 tag][body]` frame. Several tags
//! carry a different body depending on direction (a HostGame *request*
//! holds options, a HostGame *response* holds the new code), so decoding
//! takes a [`Bound`].

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::buffer::{BufferReader, BufferWriter};
use crate::code::GameCode;
use crate::message::GameDataMessage;
use crate::options::GameOptions;
use crate::types::{Bound, DisconnectReason};
use crate::ProtocolError;

/// AlterGame tag for the public/private toggle, the only one defined.
pub const ALTER_GAME_PRIVACY: u8 = 1;

/// Game-list filter flag sent before the search options.
const GAME_LIST_FILTER: u32 = 0x02;

const GAME_LIST_GAMES_TAG: u8 = 0;
const GAME_LIST_COUNTS_TAG: u8 = 1;

// ---------------------------------------------------------------------------
// Payload bodies with a request and a response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum HostGame {
    Request { options: GameOptions },
    Created { code: GameCode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinGame {
    Request {
        code: GameCode,
        map_ownership: u8,
    },
    /// Another client (or we) joined the game.
    Joined {
        code: GameCode,
        client_id: i32,
        host_id: i32,
    },
    /// The server refused the join.
    Error {
        reason: DisconnectReason,
        /// Present only for [`DisconnectReason::Custom`].
        message: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovePlayer {
    Request {
        code: GameCode,
        client_id: i32,
        reason: DisconnectReason,
    },
    Removed {
        code: GameCode,
        client_id: i32,
        host_id: i32,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameList {
    Request { options: GameOptions },
    Listing {
        /// Games per map (Skeld, MIRA, Polus) when the server sends them.
        counts: Option<[i32; 3]>,
        games: Vec<GameListing>,
    },
}

/// One row of a game list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameListing {
    pub addr: SocketAddrV4,
    pub code: GameCode,
    pub host_name: String,
    pub players: u8,
    /// Seconds since the game was created.
    pub age: u32,
    pub map: u8,
    pub impostors: u8,
    pub max_players: u8,
}

impl GameListing {
    fn read(r: &mut BufferReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            addr: read_addr(r)?,
            code: GameCode(r.read_i32_le()?),
            host_name: r.read_string()?,
            players: r.read_u8()?,
            age: r.read_packed_u32()?,
            map: r.read_u8()?,
            impostors: r.read_u8()?,
            max_players: r.read_u8()?,
        })
    }

    fn write(&self, w: &mut BufferWriter) {
        write_addr(&self.addr, w);
        w.write_i32_le(self.code.0);
        w.write_string(&self.host_name);
        w.write_u8(self.players);
        w.write_packed_u32(self.age);
        w.write_u8(self.map);
        w.write_u8(self.impostors);
        w.write_u8(self.max_players);
    }
}

fn read_addr(r: &mut BufferReader<'_>) -> Result<SocketAddrV4, ProtocolError> {
    let octets = r.read_bytes(4)?;
    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    Ok(SocketAddrV4::new(ip, r.read_u16_le()?))
}

fn write_addr(addr: &SocketAddrV4, w: &mut BufferWriter) {
    w.write_bytes(&addr.ip().octets());
    w.write_u16_le(addr.port());
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    HostGame(HostGame),
    JoinGame(JoinGame),
    StartGame {
        code: GameCode,
    },
    RemoveGame {
        reason: DisconnectReason,
    },
    RemovePlayer(RemovePlayer),
    GameData {
        code: GameCode,
        messages: Vec<GameDataMessage>,
    },
    GameDataTo {
        code: GameCode,
        recipient: i32,
        messages: Vec<GameDataMessage>,
    },
    /// Sent to the joining client only: who is already in the game.
    JoinedGame {
        code: GameCode,
        client_id: i32,
        host_id: i32,
        others: Vec<i32>,
    },
    EndGame {
        code: GameCode,
        reason: u8,
        show_ad: bool,
    },
    AlterGame {
        code: GameCode,
        is_public: bool,
    },
    KickPlayer {
        code: GameCode,
        client_id: i32,
        banned: bool,
    },
    WaitForHost {
        code: GameCode,
        client_id: i32,
    },
    /// Reconnect to another server node and retry there.
    Redirect {
        addr: SocketAddrV4,
    },
    GetGameList(GameList),
    Unknown {
        tag: u8,
        body: Bytes,
    },
}

impl Payload {
    pub const TAG_HOST_GAME: u8 = 0;
    pub const TAG_JOIN_GAME: u8 = 1;
    pub const TAG_START_GAME: u8 = 2;
    pub const TAG_REMOVE_GAME: u8 = 3;
    pub const TAG_REMOVE_PLAYER: u8 = 4;
    pub const TAG_GAME_DATA: u8 = 5;
    pub const TAG_GAME_DATA_TO: u8 = 6;
    pub const TAG_JOINED_GAME: u8 = 7;
    pub const TAG_END_GAME: u8 = 8;
    pub const TAG_ALTER_GAME: u8 = 10;
    pub const TAG_KICK_PLAYER: u8 = 11;
    pub const TAG_WAIT_FOR_HOST: u8 = 12;
    pub const TAG_REDIRECT: u8 = 13;
    pub const TAG_GET_GAME_LIST_V2: u8 = 16;

    pub fn tag(&self) -> u8 {
        match self {
            Self::HostGame(_) => Self::TAG_HOST_GAME,
            Self::JoinGame(_) => Self::TAG_JOIN_GAME,
            Self::StartGame { .. } => Self::TAG_START_GAME,
            Self::RemoveGame { .. } => Self::TAG_REMOVE_GAME,
            Self::RemovePlayer(_) => Self::TAG_REMOVE_PLAYER,
            Self::GameData { .. } => Self::TAG_GAME_DATA,
            Self::GameDataTo { .. } => Self::TAG_GAME_DATA_TO,
            Self::JoinedGame { .. } => Self::TAG_JOINED_GAME,
            Self::EndGame { .. } => Self::TAG_END_GAME,
            Self::AlterGame { .. } => Self::TAG_ALTER_GAME,
            Self::KickPlayer { .. } => Self::TAG_KICK_PLAYER,
            Self::WaitForHost { .. } => Self::TAG_WAIT_FOR_HOST,
            Self::Redirect { .. } => Self::TAG_REDIRECT,
            Self::GetGameList(_) => Self::TAG_GET_GAME_LIST_V2,
            Self::Unknown { tag, .. } => *tag,
        }
    }

    /// Reads one framed payload.
    pub fn read(r: &mut BufferReader<'_>, bound: Bound) -> Result<Self, ProtocolError> {
        let (tag, mut body) = r.read_message()?;
        Self::decode(tag, &mut body, bound)
    }

    /// Reads framed payloads until the reader is exhausted.
    pub fn read_all(r: &mut BufferReader<'_>, bound: Bound) -> Result<Vec<Self>, ProtocolError> {
        let mut payloads = Vec::new();
        while !r.is_empty() {
            payloads.push(Self::read(r, bound)?);
        }
        Ok(payloads)
    }

    pub fn decode(tag: u8, r: &mut BufferReader<'_>, bound: Bound) -> Result<Self, ProtocolError> {
        let serverbound = bound == Bound::Serverbound;
        let payload = match tag {
            Self::TAG_HOST_GAME if serverbound => Self::HostGame(HostGame::Request {
                options: GameOptions::read(r)?,
            }),
            Self::TAG_HOST_GAME => Self::HostGame(HostGame::Created {
                code: GameCode(r.read_i32_le()?),
            }),
            Self::TAG_JOIN_GAME if serverbound => Self::JoinGame(JoinGame::Request {
                code: GameCode(r.read_i32_le()?),
                map_ownership: r.read_u8()?,
            }),
            Self::TAG_JOIN_GAME => Self::JoinGame(decode_join_response(r)?),
            Self::TAG_START_GAME => Self::StartGame {
                code: GameCode(r.read_i32_le()?),
            },
            Self::TAG_REMOVE_GAME => Self::RemoveGame {
                reason: DisconnectReason::from_u8(r.read_u8()?),
            },
            Self::TAG_REMOVE_PLAYER if serverbound => Self::RemovePlayer(RemovePlayer::Request {
                code: GameCode(r.read_i32_le()?),
                client_id: r.read_packed_i32()?,
                reason: DisconnectReason::from_u8(r.read_u8()?),
            }),
            Self::TAG_REMOVE_PLAYER => Self::RemovePlayer(RemovePlayer::Removed {
                code: GameCode(r.read_i32_le()?),
                client_id: r.read_i32_le()?,
                host_id: r.read_i32_le()?,
                reason: DisconnectReason::from_u8(r.read_u8()?),
            }),
            Self::TAG_GAME_DATA => Self::GameData {
                code: GameCode(r.read_i32_le()?),
                messages: read_messages(r)?,
            },
            Self::TAG_GAME_DATA_TO => Self::GameDataTo {
                code: GameCode(r.read_i32_le()?),
                recipient: r.read_packed_i32()?,
                messages: read_messages(r)?,
            },
            Self::TAG_JOINED_GAME => {
                let code = GameCode(r.read_i32_le()?);
                let client_id = r.read_i32_le()?;
                let host_id = r.read_i32_le()?;
                let count = r.read_packed_u32()?;
                let mut others = Vec::with_capacity(count.min(16) as usize);
                for _ in 0..count {
                    others.push(r.read_packed_i32()?);
                }
                Self::JoinedGame {
                    code,
                    client_id,
                    host_id,
                    others,
                }
            }
            Self::TAG_END_GAME => Self::EndGame {
                code: GameCode(r.read_i32_le()?),
                reason: r.read_u8()?,
                show_ad: r.read_bool()?,
            },
            Self::TAG_ALTER_GAME => {
                let code = GameCode(r.read_i32_le()?);
                let alter_tag = r.read_u8()?;
                if alter_tag != ALTER_GAME_PRIVACY {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "unknown alter game tag {alter_tag}"
                    )));
                }
                Self::AlterGame {
                    code,
                    is_public: r.read_bool()?,
                }
            }
            Self::TAG_KICK_PLAYER => Self::KickPlayer {
                code: GameCode(r.read_i32_le()?),
                client_id: r.read_packed_i32()?,
                banned: r.read_bool()?,
            },
            Self::TAG_WAIT_FOR_HOST => Self::WaitForHost {
                code: GameCode(r.read_i32_le()?),
                client_id: r.read_i32_le()?,
            },
            Self::TAG_REDIRECT => Self::Redirect {
                addr: read_addr(r)?,
            },
            Self::TAG_GET_GAME_LIST_V2 if serverbound => {
                let _filter = r.read_packed_u32()?;
                Self::GetGameList(GameList::Request {
                    options: GameOptions::read(r)?,
                })
            }
            Self::TAG_GET_GAME_LIST_V2 => Self::GetGameList(decode_game_list(r)?),
            tag => Self::Unknown {
                tag,
                body: Bytes::copy_from_slice(r.read_rest()),
            },
        };
        Ok(payload)
    }

    /// Writes the payload with its frame.
    pub fn write(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        w.write_message(self.tag(), |w| self.encode_body(w))
    }

    fn encode_body(&self, w: &mut BufferWriter) -> Result<(), ProtocolError> {
        match self {
            Self::HostGame(HostGame::Request { options }) => options.write(w),
            Self::HostGame(HostGame::Created { code }) => w.write_i32_le(code.0),
            Self::JoinGame(JoinGame::Request {
                code,
                map_ownership,
            }) => {
                w.write_i32_le(code.0);
                w.write_u8(*map_ownership);
            }
            Self::JoinGame(JoinGame::Joined {
                code,
                client_id,
                host_id,
            }) => {
                w.write_i32_le(code.0);
                w.write_i32_le(*client_id);
                w.write_i32_le(*host_id);
            }
            Self::JoinGame(JoinGame::Error { reason, message }) => {
                w.write_i32_le(i32::from(reason.as_u8()));
                if let Some(message) = message {
                    w.write_string(message);
                }
            }
            Self::StartGame { code } => w.write_i32_le(code.0),
            Self::RemoveGame { reason } => w.write_u8(reason.as_u8()),
            Self::RemovePlayer(RemovePlayer::Request {
                code,
                client_id,
                reason,
            }) => {
                w.write_i32_le(code.0);
                w.write_packed_i32(*client_id);
                w.write_u8(reason.as_u8());
            }
            Self::RemovePlayer(RemovePlayer::Removed {
                code,
                client_id,
                host_id,
                reason,
            }) => {
                w.write_i32_le(code.0);
                w.write_i32_le(*client_id);
                w.write_i32_le(*host_id);
                w.write_u8(reason.as_u8());
            }
            Self::GameData { code, messages } => {
                w.write_i32_le(code.0);
                for message in messages {
                    message.write(w)?;
                }
            }
            Self::GameDataTo {
                code,
                recipient,
                messages,
            } => {
                w.write_i32_le(code.0);
                w.write_packed_i32(*recipient);
                for message in messages {
                    message.write(w)?;
                }
            }
            Self::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            } => {
                w.write_i32_le(code.0);
                w.write_i32_le(*client_id);
                w.write_i32_le(*host_id);
                w.write_packed_u32(others.len() as u32);
                for other in others {
                    w.write_packed_i32(*other);
                }
            }
            Self::EndGame {
                code,
                reason,
                show_ad,
            } => {
                w.write_i32_le(code.0);
                w.write_u8(*reason);
                w.write_bool(*show_ad);
            }
            Self::AlterGame { code, is_public } => {
                w.write_i32_le(code.0);
                w.write_u8(ALTER_GAME_PRIVACY);
                w.write_bool(*is_public);
            }
            Self::KickPlayer {
                code,
                client_id,
                banned,
            } => {
                w.write_i32_le(code.0);
                w.write_packed_i32(*client_id);
                w.write_bool(*banned);
            }
            Self::WaitForHost { code, client_id } => {
                w.write_i32_le(code.0);
                w.write_i32_le(*client_id);
            }
            Self::Redirect { addr } => write_addr(addr, w),
            Self::GetGameList(GameList::Request { options }) => {
                w.write_packed_u32(GAME_LIST_FILTER);
                options.write(w);
            }
            Self::GetGameList(GameList::Listing { counts, games }) => {
                if let Some(counts) = counts {
                    w.write_message(GAME_LIST_COUNTS_TAG, |w| {
                        for count in counts {
                            w.write_i32_le(*count);
                        }
                        Ok(())
                    })?;
                }
                w.write_message(GAME_LIST_GAMES_TAG, |w| {
                    for game in games {
                        w.write_message(0, |w| {
                            game.write(w);
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
            }
            Self::Unknown { body, .. } => w.write_bytes(body),
        }
        Ok(())
    }
}

fn read_messages(r: &mut BufferReader<'_>) -> Result<Vec<GameDataMessage>, ProtocolError> {
    let mut messages = Vec::new();
    while !r.is_empty() {
        messages.push(GameDataMessage::read(r)?);
    }
    Ok(messages)
}

/// A clientbound JoinGame is either a join notice or an error. Game codes
/// are either negative (V2) or four ASCII letters, so a first field below
/// 256 can only be a disconnect reason.
fn decode_join_response(r: &mut BufferReader<'_>) -> Result<JoinGame, ProtocolError> {
    let first = r.read_i32_le()?;
    if (0..256).contains(&first) {
        let reason = DisconnectReason::from_u8(first as u8);
        let message = if reason == DisconnectReason::Custom && !r.is_empty() {
            Some(r.read_string()?)
        } else {
            None
        };
        return Ok(JoinGame::Error { reason, message });
    }
    Ok(JoinGame::Joined {
        code: GameCode(first),
        client_id: r.read_i32_le()?,
        host_id: r.read_i32_le()?,
    })
}

fn decode_game_list(r: &mut BufferReader<'_>) -> Result<GameList, ProtocolError> {
    let mut counts = None;
    let mut games = Vec::new();
    while !r.is_empty() {
        let (tag, mut body) = r.read_message()?;
        match tag {
            GAME_LIST_COUNTS_TAG => {
                counts = Some([body.read_i32_le()?, body.read_i32_le()?, body.read_i32_le()?]);
            }
            GAME_LIST_GAMES_TAG => {
                while !body.is_empty() {
                    let (_, mut game) = body.read_message()?;
                    games.push(GameListing::read(&mut game)?);
                }
            }
            _ => {}
        }
    }
    Ok(GameList::Listing { counts, games })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Rpc;

    fn encode(payload: &Payload) -> Vec<u8> {
        let mut w = BufferWriter::new();
        payload.write(&mut w).unwrap();
        w.as_slice().to_vec()
    }

    fn decode(bytes: &[u8], bound: Bound) -> Payload {
        Payload::read(&mut BufferReader::new(bytes), bound).unwrap()
    }

    #[test]
    fn test_join_game_request_layout() {
        let payload = Payload::JoinGame(JoinGame::Request {
            code: GameCode(32),
            map_ownership: 0x07,
        });
        let bytes = encode(&payload);
        assert_eq!(bytes, &[5, 0, 1, 32, 0, 0, 0, 7]);
        assert_eq!(decode(&bytes, Bound::Serverbound), payload);
    }

    #[test]
    fn test_join_game_small_first_field_is_error() {
        let bytes = [4, 0, 1, 1, 0, 0, 0];
        assert_eq!(
            decode(&bytes, Bound::Clientbound),
            Payload::JoinGame(JoinGame::Error {
                reason: DisconnectReason::GameFull,
                message: None
            })
        );
    }

    #[test]
    fn test_join_game_custom_error_carries_message() {
        let payload = Payload::JoinGame(JoinGame::Error {
            reason: DisconnectReason::Custom,
            message: Some("go away".into()),
        });
        let bytes = encode(&payload);
        assert_eq!(decode(&bytes, Bound::Clientbound), payload);
    }

    #[test]
    fn test_join_game_v2_code_is_join_notice() {
        let code = GameCode::parse("REDSUS").unwrap();
        let payload = Payload::JoinGame(JoinGame::Joined {
            code,
            client_id: 7,
            host_id: 1,
        });
        assert_eq!(decode(&encode(&payload), Bound::Clientbound), payload);
    }

    #[test]
    fn test_host_game_body_depends_on_direction() {
        let created = Payload::HostGame(HostGame::Created { code: GameCode(-5) });
        let bytes = encode(&created);
        assert_eq!(decode(&bytes, Bound::Clientbound), created);

        let request = Payload::HostGame(HostGame::Request {
            options: GameOptions::default(),
        });
        assert_eq!(decode(&encode(&request), Bound::Serverbound), request);
    }

    #[test]
    fn test_redirect_layout() {
        let bytes = [6, 0, 13, 127, 0, 0, 1, 0x07, 0x56];
        assert_eq!(
            decode(&bytes, Bound::Clientbound),
            Payload::Redirect {
                addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 22023)
            }
        );
    }

    #[test]
    fn test_game_data_carries_messages_in_order() {
        let payload = Payload::GameData {
            code: GameCode(32),
            messages: vec![
                GameDataMessage::Despawn { netid: 9 },
                GameDataMessage::Rpc {
                    netid: 4,
                    rpc: Rpc::SendChat {
                        message: "hi".into(),
                    },
                },
            ],
        };
        assert_eq!(decode(&encode(&payload), Bound::Clientbound), payload);
    }

    #[test]
    fn test_game_list_with_counts_round_trip() {
        let payload = Payload::GetGameList(GameList::Listing {
            counts: Some([3, 0, 1]),
            games: vec![GameListing {
                addr: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 22023),
                code: GameCode::parse("ABCDEF").unwrap(),
                host_name: "host".into(),
                players: 4,
                age: 300,
                map: 2,
                impostors: 1,
                max_players: 10,
            }],
        });
        assert_eq!(decode(&encode(&payload), Bound::Clientbound), payload);
    }

    #[test]
    fn test_game_list_request_starts_with_filter() {
        let payload = Payload::GetGameList(GameList::Request {
            options: GameOptions::search(),
        });
        let bytes = encode(&payload);
        assert_eq!(bytes[3], 0x02);
        assert_eq!(decode(&bytes, Bound::Serverbound), payload);
    }

    #[test]
    fn test_remove_player_shapes() {
        let removed = Payload::RemovePlayer(RemovePlayer::Removed {
            code: GameCode(32),
            client_id: 3,
            host_id: 1,
            reason: DisconnectReason::ExitGame,
        });
        assert_eq!(decode(&encode(&removed), Bound::Clientbound), removed);

        let request = Payload::RemovePlayer(RemovePlayer::Request {
            code: GameCode(32),
            client_id: 3,
            reason: DisconnectReason::Error,
        });
        assert_eq!(encode(&request), &[6, 0, 4, 32, 0, 0, 0, 3, 17]);
    }

    #[test]
    fn test_unknown_tag_re_encodes_verbatim() {
        let bytes = [3, 0, 42, 1, 2, 3];
        let payload = decode(&bytes, Bound::Clientbound);
        assert_eq!(payload.tag(), 42);
        assert_eq!(encode(&payload), bytes);
    }

    #[test]
    fn test_read_all_stops_at_end() {
        let mut w = BufferWriter::new();
        Payload::StartGame { code: GameCode(32) }.write(&mut w).unwrap();
        Payload::EndGame {
            code: GameCode(32),
            reason: 0,
            show_ad: false,
        }
        .write(&mut w)
        .unwrap();

        let payloads =
            Payload::read_all(&mut BufferReader::new(w.as_slice()), Bound::Clientbound).unwrap();
        assert_eq!(payloads.len(), 2);
    }
}
