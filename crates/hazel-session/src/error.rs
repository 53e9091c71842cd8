//! Error types for the session layer.

use hazel_protocol::ProtocolError;
use hazel_transport::TransportError;

/// Errors surfaced by [`Session`](crate::Session) operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session is closed; nothing more can be sent.
    #[error("session is disconnected")]
    Disconnected,

    /// A reliable packet was retransmitted the maximum number of times
    /// without being acknowledged. The session is torn down.
    #[error("packet {nonce} was never acknowledged")]
    AcknowledgementTimeout { nonce: u16 },

    /// Only Reliable, Hello and Ping packets can be waited on.
    #[error("packet kind is not acknowledged")]
    NotReliable,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
