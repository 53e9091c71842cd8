//! Error types for the protocol layer.
//!
//! Every decode path in this crate returns a [`ProtocolError`] instead of
//! panicking, so a malformed datagram from the network can only ever be
//! logged and dropped by the session above us.

/// Errors that can occur while encoding or decoding Hazel data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read needed more bytes than the buffer had left.
    #[error("unexpected end of data: needed {needed} byte(s), {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the read wanted.
        needed: usize,
        /// Bytes that were actually left.
        remaining: usize,
    },

    /// A packed integer ran past five bytes or past 32 bits.
    #[error("packed integer overflows 32 bits")]
    VarIntOverflow,

    /// A length-prefixed string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidString,

    /// The first byte of a packet is not a known opcode.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// The message is structurally valid but breaks a protocol rule,
    /// e.g. a nested message longer than 65535 bytes.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A game code string is not four or six letters A-Z.
    #[error("invalid game code {0:?}")]
    InvalidGameCode(String),
}
