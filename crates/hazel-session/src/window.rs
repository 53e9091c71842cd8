//! The 8-slot history windows behind acknowledgements.
//!
//! Both directions keep the most recent nonces newest-first:
//!
//! ```text
//! recv window   [5, 4, 3, 2, 1, 0, 255, 254]
//!                ^ index 0 = newest
//! ```
//!
//! An Acknowledge for nonce `n` carries a bitfield where bit `i` is set
//! when `n - i` (wrapping) is *not* in the receiver's window, so the
//! sender can tell which of its recent packets went missing.

use std::collections::VecDeque;

use hazel_protocol::sequence_newer;

/// Number of nonces each window remembers.
pub const WINDOW_SIZE: usize = 8;

/// Outcome of recording an inbound reliable nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// First time we see this nonce; process the packet.
    Fresh,
    /// Already in the window; acknowledge again but do not process.
    Duplicate,
    /// Older than anything the window can still describe; drop silently.
    Stale,
}

/// Nonces of recently received reliable packets.
#[derive(Debug, Default, Clone)]
pub struct RecvWindow {
    nonces: VecDeque<u16>,
}

impl RecvWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `nonce` at the front of the window.
    pub fn record(&mut self, nonce: u16) -> Reception {
        if self.nonces.contains(&nonce) {
            return Reception::Duplicate;
        }
        if let Some(&newest) = self.nonces.front() {
            let behind = newest.wrapping_sub(nonce);
            if sequence_newer(newest, nonce) && behind as usize >= WINDOW_SIZE {
                return Reception::Stale;
            }
        }
        self.nonces.push_front(nonce);
        self.nonces.truncate(WINDOW_SIZE);
        Reception::Fresh
    }

    /// Bitfield for an Acknowledge of `nonce`. Bits are indexed by nonce
    /// offset: bit `i` covers `nonce - i`, whatever the window holds.
    ///
    /// Inbound bitfields are read by window position instead (see
    /// [`flagged`]). The two readings agree when `nonce` is the newest
    /// entry, which is the case for every fresh packet. Change both sides
    /// together or neither.
    pub fn missing_bits(&self, nonce: u16) -> u8 {
        (0..WINDOW_SIZE as u16).fold(0u8, |bits, i| {
            if self.nonces.contains(&nonce.wrapping_sub(i)) {
                bits
            } else {
                bits | (1 << i)
            }
        })
    }

    /// Window contents, newest first.
    pub fn nonces(&self) -> impl Iterator<Item = u16> + '_ {
        self.nonces.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    pub fn clear(&mut self) {
        self.nonces.clear();
    }
}

/// The window entries named by `missing`: bit `i` selects the `i`-th
/// newest nonce. Bits past the end of the window select nothing.
///
/// This is positional, unlike the nonce-offset bits built by
/// [`RecvWindow::missing_bits`].
pub fn flagged<I>(window: I, missing: u8) -> Vec<u16>
where
    I: IntoIterator<Item = u16>,
{
    window
        .into_iter()
        .take(WINDOW_SIZE)
        .enumerate()
        .filter(|(i, _)| missing & (1 << i) != 0)
        .map(|(_, nonce)| nonce)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SentEntry {
    nonce: u16,
    acknowledged: bool,
}

/// Nonces of recently sent reliable packets and whether each was acked.
#[derive(Debug, Default, Clone)]
pub struct SentWindow {
    entries: VecDeque<SentEntry>,
}

impl SentWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new outgoing nonce. Returns the nonce pushed out of the
    /// window if it was still unacknowledged.
    pub fn push(&mut self, nonce: u16) -> Option<u16> {
        self.entries.push_front(SentEntry {
            nonce,
            acknowledged: false,
        });
        if self.entries.len() > WINDOW_SIZE {
            return self
                .entries
                .pop_back()
                .filter(|entry| !entry.acknowledged)
                .map(|entry| entry.nonce);
        }
        None
    }

    /// Marks `nonce` acknowledged. Returns `false` if it is unknown or was
    /// already acknowledged.
    pub fn acknowledge(&mut self, nonce: u16) -> bool {
        match self.entries.iter_mut().find(|e| e.nonce == nonce) {
            Some(entry) if !entry.acknowledged => {
                entry.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_acknowledged(&self, nonce: u16) -> bool {
        self.entries
            .iter()
            .any(|e| e.nonce == nonce && e.acknowledged)
    }

    /// Unacknowledged nonces, newest first.
    pub fn pending(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.acknowledged)
            .map(|e| e.nonce)
    }

    /// Unacknowledged entries selected by a peer's missing bitfield.
    pub fn flagged_pending(&self, missing: u8) -> Vec<u16> {
        let flagged_nonces = flagged(self.entries.iter().map(|e| e.nonce), missing);
        flagged_nonces
            .into_iter()
            .filter(|n| !self.is_acknowledged(*n))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
