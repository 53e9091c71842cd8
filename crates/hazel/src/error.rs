//! Unified error type for the Hazel client.

use hazel_protocol::{DisconnectReason, ProtocolError};
use hazel_room::RoomError;
use hazel_session::SessionError;
use hazel_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Client operations return this single type. The `#[from]` variants let
/// `?` convert sub-crate errors; the rest describe how an awaited
/// exchange with the server ended.
#[derive(Debug, thiserror::Error)]
pub enum HazelError {
    /// The server refused a join or create request. The session stays
    /// connected and the call may be retried.
    #[error("server refused the request: {message}")]
    JoinFailed {
        reason: DisconnectReason,
        message: String,
    },

    /// No answer arrived within the request timeout.
    #[error("timed out waiting for the server")]
    Timeout,

    /// The connection closed before the operation finished.
    #[error("disconnected")]
    Disconnected,

    #[error("redirected more than {0} times")]
    TooManyRedirects(u32),

    /// The operation needs a joined game.
    #[error("not in a game")]
    NotJoined,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),
}

impl HazelError {
    /// A refusal carrying the server's text, or the fixed message for
    /// `reason` when the server sent none.
    pub(crate) fn refused(reason: DisconnectReason, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| reason.message().to_string());
        Self::JoinFailed { reason, message }
    }

    /// Folds a closed session into [`HazelError::Disconnected`].
    pub(crate) fn from_session(err: SessionError) -> Self {
        match err {
            SessionError::Disconnected => Self::Disconnected,
            other => Self::Session(other),
        }
    }

    /// Folds a room operation cut short by a lost connection into
    /// [`HazelError::Disconnected`].
    pub(crate) fn from_room(err: RoomError) -> Self {
        match err {
            RoomError::Disconnected => Self::Disconnected,
            other => Self::Room(other),
        }
    }
}
