//! Game codes.
//!
//! A room is addressed by an `i32` on the wire. Players see it as letters:
//!
//! - **V1** (four letters): the ASCII bytes read as a little-endian `i32`.
//!   These are always positive.
//! - **V2** (six letters): each letter is mapped through a scrambled
//!   alphabet, two letters packed into the low 10 bits and four into the
//!   next 20, with the sign bit set. These are always negative.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

const V2_ALPHABET: &[u8; 26] = b"QWXRTYLPESDFGHUJKZOCVBINMA";

/// A room identifier, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameCode(pub i32);

impl GameCode {
    /// Parses a four- or six-letter code. Lower-case input is accepted.
    pub fn parse(code: &str) -> Result<Self, ProtocolError> {
        let upper = code.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        if !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(ProtocolError::InvalidGameCode(code.to_owned()));
        }
        match bytes.len() {
            4 => Ok(Self(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))),
            6 => Ok(Self(encode_v2(bytes))),
            _ => Err(ProtocolError::InvalidGameCode(code.to_owned())),
        }
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Renders the code as letters, or `None` when the number is neither
    /// a V2 code nor four upper-case ASCII bytes.
    pub fn to_letters(self) -> Option<String> {
        if self.0 < 0 {
            return Some(decode_v2(self.0));
        }
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(u8::is_ascii_uppercase) {
            return Some(bytes.iter().map(|&b| b as char).collect());
        }
        None
    }
}

fn v2_index(letter: u8) -> u32 {
    // Callers only pass A-Z, all of which appear in the alphabet.
    V2_ALPHABET
        .iter()
        .position(|&c| c == letter)
        .unwrap_or_default() as u32
}

fn encode_v2(letters: &[u8]) -> i32 {
    let [a, b, c, d, e, f] = [
        v2_index(letters[0]),
        v2_index(letters[1]),
        v2_index(letters[2]),
        v2_index(letters[3]),
        v2_index(letters[4]),
        v2_index(letters[5]),
    ];
    let one = (a + 26 * b) & 0x3ff;
    let two = c + 26 * (d + 26 * (e + 26 * f));
    (one | ((two << 10) & 0x3fff_fc00) | 0x8000_0000) as i32
}

fn decode_v2(code: i32) -> String {
    let raw = code as u32;
    let a = (raw & 0x3ff) as usize;
    let b = ((raw >> 10) & 0xf_ffff) as usize;
    [
        a % 26,
        a / 26,
        b % 26,
        b / 26 % 26,
        b / 676 % 26,
        b / 17_576 % 26,
    ]
    .iter()
    .map(|&i| V2_ALPHABET[i] as char)
    .collect()
}

impl FromStr for GameCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i32> for GameCode {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for GameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_letters() {
            Some(letters) => f.write_str(&letters),
            None => write!(f, "{}", self.0),
        }
    }
}
