//! Output capability contract
//!
//! An output is one downstream client stream. The engine writes packets to
//! it during fan-out passes but never owns its transport; concrete
//! implementations (RTP-over-UDP client, interleaved TCP, test recorders)
//! live in the session layer.
//!
//! Each registration also carries a [`BookmarkTable`]: a fixed-capacity map
//! from sender identity to queue position, so a pass blocked by backpressure
//! resumes exactly where it stopped instead of rescanning from the start.
//! One table serves both directions (RTP and RTCP) of a stream.

use crate::packet::Packet;
use crate::sender::SenderId;
use crate::stream::StreamId;

/// Which half of the RTP/RTCP pair a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rtp,
    Rtcp,
}

/// Per-write metadata handed to an output
#[derive(Debug, Clone, Copy)]
pub struct WriteFlags {
    /// RTP or RTCP
    pub direction: Direction,
    /// Whether this packet begins a key frame
    pub keyframe: bool,
}

/// Result of one `write_packet` attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Packet accepted by the output's transport
    Sent,
    /// Transport is flow-controlled; the packet must be retried, optionally
    /// no sooner than the given delay
    WouldBlock {
        /// Output-suggested retry delay in milliseconds
        retry_in_ms: Option<u64>,
    },
    /// Transport failed; the output will be skipped until it recovers or is
    /// removed
    Failed,
}

/// One downstream client stream
///
/// Calls arrive while the stream mutex is held, so implementations must
/// not call back into the stream that is writing to them.
pub trait ReflectorOutput: Send + Sync {
    /// Write one packet
    ///
    /// `lateness_ms` is how far behind "now" this packet is delivered,
    /// including the stagger delay of the output's bucket; the output uses
    /// it to schedule actual transmission. A `WouldBlock` return means the
    /// packet was NOT consumed and will be offered again.
    fn write_packet(
        &self,
        packet: &Packet,
        stream: StreamId,
        flags: WriteFlags,
        lateness_ms: i64,
    ) -> WriteOutcome;

    /// Whether this output currently participates in fan-out passes
    fn is_playing(&self) -> bool;

    /// Release transport resources at session end
    fn teardown(&self);
}

/// Retry backoff bounds after `WouldBlock`
pub(crate) const RETRY_MIN_MS: u64 = 5;
pub(crate) const RETRY_MAX_MS: u64 = 100;

/// Slots per bookmark table: one per (sender, direction) the output can
/// participate in, with headroom
const MAX_BOOKMARK_SLOTS: usize = 4;

/// Saved scan position for one sender
#[derive(Debug, Clone, Copy)]
pub struct Bookmark {
    /// Owning sender
    pub sender: SenderId,
    /// Queue position (per-stream packet sequence counter)
    pub position: u64,
    /// Do not retry before this time (monotonic ms)
    pub retry_at_ms: u64,
    /// Current backoff step; 0 until the first `WouldBlock`
    pub backoff_ms: u64,
}

/// Fixed-capacity map from sender identity to queue position
#[derive(Debug, Clone, Default)]
pub struct BookmarkTable {
    slots: [Option<Bookmark>; MAX_BOOKMARK_SLOTS],
}

impl BookmarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bookmark for the given sender, if one is claimed
    pub fn get(&self, sender: SenderId) -> Option<&Bookmark> {
        self.slots
            .iter()
            .flatten()
            .find(|b| b.sender == sender)
    }

    /// Claim or update the bookmark for a sender
    ///
    /// Returns `false` if every slot is taken by other senders. With table
    /// capacity above the two directions a stream registers, that is a
    /// programming error, not a runtime condition.
    pub fn set(&mut self, sender: SenderId, position: u64) -> bool {
        if let Some(slot) = self.slot_mut(sender) {
            slot.position = position;
            return true;
        }
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Bookmark {
                    sender,
                    position,
                    retry_at_ms: 0,
                    backoff_ms: 0,
                });
                return true;
            }
        }
        debug_assert!(false, "bookmark table full");
        false
    }

    /// Release the slot claimed for a sender
    pub fn release(&mut self, sender: SenderId) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(b) if b.sender == sender) {
                *slot = None;
            }
        }
    }

    /// Record a blocked write: keep the position, double the backoff
    ///
    /// The output may suggest its own retry delay; otherwise the backoff
    /// doubles from 5 ms up to 100 ms.
    pub fn note_blocked(
        &mut self,
        sender: SenderId,
        position: u64,
        now_ms: u64,
        suggested_ms: Option<u64>,
    ) {
        if !self.set(sender, position) {
            return;
        }
        if let Some(slot) = self.slot_mut(sender) {
            let backoff = match suggested_ms {
                Some(ms) => ms,
                None if slot.backoff_ms == 0 => RETRY_MIN_MS,
                None => (slot.backoff_ms * 2).min(RETRY_MAX_MS),
            };
            slot.backoff_ms = backoff;
            slot.retry_at_ms = now_ms + backoff;
        }
    }

    /// Record a successful write: backoff resets
    pub fn note_delivered(&mut self, sender: SenderId) {
        if let Some(slot) = self.slot_mut(sender) {
            slot.backoff_ms = 0;
            slot.retry_at_ms = 0;
        }
    }

    fn slot_mut(&mut self, sender: SenderId) -> Option<&mut Bookmark> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|b| b.sender == sender)
    }
}
