//! Hazel packets: the outermost layer of every datagram.
//!
//! ```text
//! Unreliable   [0x00] payloads…
//! Reliable     [0x01][nonce BE] payloads…
//! Hello        [0x08][nonce BE][hazel ver][client ver i32][username][auth?]
//! Disconnect   [0x09] ([forced][len u16][tag 0][reason][message?])?
//! Acknowledge  [0x0a][nonce BE][missing bitfield]
//! Ping         [0x0c][nonce BE]
//! ```

use bytes::Bytes;

use crate::buffer::{BufferReader, BufferWriter};
use crate::payload::Payload;
use crate::types::{Bound, ClientVersion, DisconnectReason};
use crate::ProtocolError;

/// Hazel protocol version sent in Hello.
pub const HAZEL_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Unreliable = 0x00,
    Reliable = 0x01,
    Hello = 0x08,
    Disconnect = 0x09,
    Acknowledge = 0x0a,
    Ping = 0x0c,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x00 => Self::Unreliable,
            0x01 => Self::Reliable,
            0x08 => Self::Hello,
            0x09 => Self::Disconnect,
            0x0a => Self::Acknowledge,
            0x0c => Self::Ping,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }

    /// Opcodes whose packets carry a nonce and must be acknowledged.
    pub fn is_reliable(self) -> bool {
        matches!(self, Self::Reliable | Self::Hello | Self::Ping)
    }
}

/// The identification block sent when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub hazel_version: u8,
    pub client_version: ClientVersion,
    pub username: String,
    pub auth_token: Option<u32>,
}

/// Why the peer closed the connection, when it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub reason: DisconnectReason,
    /// Only sent with [`DisconnectReason::Custom`].
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Unreliable { payloads: Vec<Payload> },
    Reliable { nonce: u16, payloads: Vec<Payload> },
    Hello { nonce: u16, hello: Hello },
    Disconnect { info: Option<DisconnectInfo> },
    /// `missing` has bit `i` set when nonce `nonce - i` was not received.
    Acknowledge { nonce: u16, missing: u8 },
    Ping { nonce: u16 },
}

impl Packet {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Unreliable { .. } => Opcode::Unreliable,
            Self::Reliable { .. } => Opcode::Reliable,
            Self::Hello { .. } => Opcode::Hello,
            Self::Disconnect { .. } => Opcode::Disconnect,
            Self::Acknowledge { .. } => Opcode::Acknowledge,
            Self::Ping { .. } => Opcode::Ping,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.opcode().is_reliable()
    }

    /// The nonce of a reliable packet, or the acknowledged nonce.
    pub fn nonce(&self) -> Option<u16> {
        match self {
            Self::Reliable { nonce, .. }
            | Self::Hello { nonce, .. }
            | Self::Ping { nonce }
            | Self::Acknowledge { nonce, .. } => Some(*nonce),
            Self::Unreliable { .. } | Self::Disconnect { .. } => None,
        }
    }

    /// Stamps a nonce on a reliable packet. No effect on other kinds.
    pub fn set_nonce(&mut self, value: u16) {
        if let Self::Reliable { nonce, .. } | Self::Hello { nonce, .. } | Self::Ping { nonce } = self {
            *nonce = value;
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut w = BufferWriter::with_capacity(64);
        w.write_u8(self.opcode() as u8);
        match self {
            Self::Unreliable { payloads } => write_payloads(payloads, &mut w)?,
            Self::Reliable { nonce, payloads } => {
                w.write_u16_be(*nonce);
                write_payloads(payloads, &mut w)?;
            }
            Self::Hello { nonce, hello } => {
                w.write_u16_be(*nonce);
                w.write_u8(hello.hazel_version);
                w.write_i32_le(hello.client_version.encode());
                w.write_string(&hello.username);
                if let Some(token) = hello.auth_token {
                    w.write_u32_le(token);
                }
            }
            Self::Disconnect { info } => {
                if let Some(info) = info {
                    w.write_bool(true);
                    w.write_message(0, |w| {
                        w.write_u8(info.reason.as_u8());
                        if let Some(message) = &info.message {
                            w.write_string(message);
                        }
                        Ok(())
                    })?;
                }
            }
            Self::Acknowledge { nonce, missing } => {
                w.write_u16_be(*nonce);
                w.write_u8(*missing);
            }
            Self::Ping { nonce } => w.write_u16_be(*nonce),
        }
        Ok(w.into_bytes())
    }

    pub fn decode(data: &[u8], bound: Bound) -> Result<Self, ProtocolError> {
        let mut r = BufferReader::new(data);
        let opcode = Opcode::from_u8(r.read_u8()?)?;
        let packet = match opcode {
            Opcode::Unreliable => Self::Unreliable {
                payloads: Payload::read_all(&mut r, bound)?,
            },
            Opcode::Reliable => Self::Reliable {
                nonce: r.read_u16_be()?,
                payloads: Payload::read_all(&mut r, bound)?,
            },
            Opcode::Hello => {
                let nonce = r.read_u16_be()?;
                let hazel_version = r.read_u8()?;
                let client_version = ClientVersion::decode(r.read_i32_le()?);
                let username = r.read_string()?;
                let auth_token = if r.remaining() >= 4 {
                    Some(r.read_u32_le()?)
                } else {
                    None
                };
                Self::Hello {
                    nonce,
                    hello: Hello {
                        hazel_version,
                        client_version,
                        username,
                        auth_token,
                    },
                }
            }
            Opcode::Disconnect => Self::Disconnect {
                info: decode_disconnect(&mut r)?,
            },
            Opcode::Acknowledge => Self::Acknowledge {
                nonce: r.read_u16_be()?,
                missing: if r.is_empty() { 0 } else { r.read_u8()? },
            },
            Opcode::Ping => Self::Ping {
                nonce: r.read_u16_be()?,
            },
        };
        Ok(packet)
    }
}

fn write_payloads(payloads: &[Payload], w: &mut BufferWriter) -> Result<(), ProtocolError> {
    for payload in payloads {
        payload.write(w)?;
    }
    Ok(())
}

fn decode_disconnect(r: &mut BufferReader<'_>) -> Result<Option<DisconnectInfo>, ProtocolError> {
    if r.is_empty() {
        return Ok(None);
    }
    let _forced = r.read_bool()?;
    if r.is_empty() {
        return Ok(None);
    }
    let (_tag, mut body) = r.read_message()?;
    if body.is_empty() {
        return Ok(None);
    }
    let reason = DisconnectReason::from_u8(body.read_u8()?);
    let message = if reason == DisconnectReason::Custom && !body.is_empty() {
        Some(body.read_string()?)
    } else {
        None
    };
    Ok(Some(DisconnectInfo { reason, message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::GameCode;

    fn hello() -> Packet {
        Packet::Hello {
            nonce: 1,
            hello: Hello {
                hazel_version: HAZEL_VERSION,
                client_version: ClientVersion::new(2021, 3, 5, 0),
                username: "weakeyes".into(),
                auth_token: None,
            },
        }
    }

    #[test]
    fn test_encode_hello_layout() {
        let bytes = hello().encode().unwrap();
        let mut expected = vec![0x08, 0x00, 0x01, 0x00];
        expected.extend_from_slice(&50_530_650i32.to_le_bytes());
        expected.push(8);
        expected.extend_from_slice(b"weakeyes");
        assert_eq!(bytes.as_ref(), expected.as_slice());
        assert_eq!(Packet::decode(&bytes, Bound::Serverbound).unwrap(), hello());
    }

    #[test]
    fn test_hello_auth_token_optional() {
        let mut packet = hello();
        if let Packet::Hello { hello, .. } = &mut packet {
            hello.auth_token = Some(0xdead_beef);
        }
        let bytes = packet.encode().unwrap();
        assert_eq!(Packet::decode(&bytes, Bound::Serverbound).unwrap(), packet);
    }

    #[test]
    fn test_acknowledge_layout() {
        let packet = Packet::Acknowledge {
            nonce: 0x0102,
            missing: 0b0000_0100,
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x0a, 0x01, 0x02, 0x04]);
        assert_eq!(Packet::decode(&bytes, Bound::Clientbound).unwrap(), packet);
    }

    #[test]
    fn test_reliable_carries_payloads() {
        let packet = Packet::Reliable {
            nonce: 7,
            payloads: vec![Payload::StartGame { code: GameCode(32) }],
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x01, 0x00, 0x07, 4, 0, 2, 32, 0, 0, 0]);
        assert_eq!(Packet::decode(&bytes, Bound::Clientbound).unwrap(), packet);
    }

    #[test]
    fn test_disconnect_empty_and_with_reason() {
        let bare = Packet::Disconnect { info: None };
        assert_eq!(bare.encode().unwrap().as_ref(), &[0x09]);
        assert_eq!(Packet::decode(&[0x09], Bound::Clientbound).unwrap(), bare);

        let bytes = [0x09, 0x01, 0x01, 0x00, 0x00, 0x01];
        assert_eq!(
            Packet::decode(&bytes, Bound::Clientbound).unwrap(),
            Packet::Disconnect {
                info: Some(DisconnectInfo {
                    reason: DisconnectReason::GameFull,
                    message: None
                })
            }
        );
    }

    #[test]
    fn test_disconnect_custom_message_round_trip() {
        let packet = Packet::Disconnect {
            info: Some(DisconnectInfo {
                reason: DisconnectReason::Custom,
                message: Some("maintenance".into()),
            }),
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(Packet::decode(&bytes, Bound::Clientbound).unwrap(), packet);
    }

    #[test]
    fn test_decode_unknown_opcode_errors() {
        assert_eq!(
            Packet::decode(&[0x42, 0x00], Bound::Clientbound),
            Err(ProtocolError::UnknownOpcode(0x42))
        );
    }

    #[test]
    fn test_set_nonce_only_touches_reliable_kinds() {
        let mut ping = Packet::Ping { nonce: 0 };
        ping.set_nonce(9);
        assert_eq!(ping.nonce(), Some(9));

        let mut unreliable = Packet::Unreliable { payloads: vec![] };
        unreliable.set_nonce(9);
        assert_eq!(unreliable.nonce(), None);
    }

    #[test]
    fn test_decode_empty_datagram_errors() {
        assert!(matches!(
            Packet::decode(&[], Bound::Clientbound),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }
}
