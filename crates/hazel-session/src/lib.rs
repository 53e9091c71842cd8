//! Reliable delivery for Hazel.
//!
//! Hazel runs over plain datagrams. This crate adds just enough on top to
//! make "reliable" packets reliable:
//!
//! 1. **Nonces**: every Reliable, Hello and Ping packet we send carries a
//!    16-bit sequence number.
//! 2. **Acknowledgements**: every one we receive is acknowledged at once,
//!    with a bitfield describing which of the previous eight arrived.
//! 3. **Retries**: anything not acknowledged is resent on a timer, and
//!    the session gives up after a bounded number of attempts.
//!
//! # How it fits in the stack
//!
//! ```text
//! Client orchestration (above)  ← sends payloads, consumes SessionEvents
//!     ↕
//! Session (this crate)          ← nonces, acks, retries, disconnect
//!     ↕
//! Protocol + Transport (below)  ← Packet codec, Connection trait
//! ```

mod error;
mod session;
pub mod window;

pub use error::SessionError;
pub use session::{DisconnectCause, Session, SessionConfig, SessionEvent};
pub use window::{Reception, WINDOW_SIZE};
