//! Reusable datagram buffer
//!
//! One `Packet` holds one RTP or RTCP datagram in a fixed-capacity buffer,
//! plus the metadata the relay needs: arrival time, a per-stream sequence
//! counter, and the needed-by-output flag driving eviction.
//!
//! Header accessors decode big-endian fields in place:
//!
//! ```text
//! RTP:   V/P/X/CC (1) | M/PT (1) | sequence (2) | timestamp (4) | SSRC (4)
//! RTCP:  V/P/RC (1)   | PT (1)   | length (2)   | SSRC (4)
//!        SR only:       NTP timestamp (8) | RTP timestamp (4) | ...
//! ```
//!
//! A buffer too short for a requested field yields 0 rather than an error;
//! truncated input from the network must never disrupt the relay.

use bytes::BytesMut;

/// Fixed capacity of a packet buffer; larger datagrams are truncated
pub const MAX_PACKET_SIZE: usize = 2048;

/// RTCP packet type for a Sender Report
pub const RTCP_SENDER_REPORT: u8 = 200;

/// One pooled datagram plus relay metadata
#[derive(Debug)]
pub struct Packet {
    /// Datagram bytes; capacity pinned at [`MAX_PACKET_SIZE`]
    buf: BytesMut,
    /// Whether this datagram arrived on the RTCP half of the pair
    is_rtcp: bool,
    /// Arrival time, monotonic milliseconds
    arrival_ms: u64,
    /// Per-stream monotone sequence counter, assigned at enqueue
    seq: u64,
    /// Still needed by some output; set during fan-out, read by eviction
    needed: bool,
}

impl Packet {
    /// Create an empty packet with full capacity reserved
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            is_rtcp: false,
            arrival_ms: 0,
            seq: 0,
            needed: false,
        }
    }

    /// Copy a datagram into the buffer
    ///
    /// Returns `false` if the input exceeded [`MAX_PACKET_SIZE`] and was
    /// truncated.
    pub fn set(&mut self, data: &[u8], is_rtcp: bool) -> bool {
        let fits = data.len() <= MAX_PACKET_SIZE;
        let take = data.len().min(MAX_PACKET_SIZE);

        self.buf.clear();
        self.buf.extend_from_slice(&data[..take]);
        self.is_rtcp = is_rtcp;
        fits
    }

    /// Clear all fields for reuse
    pub fn reset(&mut self) {
        self.buf.clear();
        self.is_rtcp = false;
        self.arrival_ms = 0;
        self.seq = 0;
        self.needed = false;
    }

    /// Datagram bytes
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Datagram length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no data
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Shorten the datagram, e.g. to strip a trailing receive-time tag
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Whether this is an RTCP datagram
    pub fn is_rtcp(&self) -> bool {
        self.is_rtcp
    }

    /// Arrival time in monotonic milliseconds
    pub fn arrival_ms(&self) -> u64 {
        self.arrival_ms
    }

    /// Overwrite the arrival time
    pub fn set_arrival_ms(&mut self, ms: u64) {
        self.arrival_ms = ms;
    }

    /// Per-stream sequence counter
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub(crate) fn is_needed(&self) -> bool {
        self.needed
    }

    pub(crate) fn set_needed(&mut self, needed: bool) {
        self.needed = needed;
    }

    fn be_u16(&self, offset: usize) -> u16 {
        match self.buf.get(offset..offset + 2) {
            Some(b) => u16::from_be_bytes([b[0], b[1]]),
            None => 0,
        }
    }

    fn be_u32(&self, offset: usize) -> u32 {
        match self.buf.get(offset..offset + 4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    /// RTP sequence number, or 0 if the buffer is too short
    pub fn rtp_sequence(&self) -> u16 {
        self.be_u16(2)
    }

    /// Media timestamp: the RTP header timestamp, or for RTCP the RTP
    /// timestamp carried in a Sender Report; 0 if too short
    pub fn timestamp(&self) -> u32 {
        if self.is_rtcp {
            self.be_u32(16)
        } else {
            self.be_u32(4)
        }
    }

    /// Synchronization source: second word for RTCP, third for RTP; 0 if
    /// too short
    pub fn ssrc(&self) -> u32 {
        if self.is_rtcp {
            self.be_u32(4)
        } else {
            self.be_u32(8)
        }
    }

    /// RTCP packet type byte of the first sub-packet, or 0 if too short
    pub fn rtcp_packet_type(&self) -> u8 {
        self.buf.get(1).copied().unwrap_or(0)
    }

    /// 64-bit NTP timestamp from a Sender Report, or 0 if too short
    pub fn rtcp_ntp_time(&self) -> u64 {
        match self.buf.get(8..16) {
            Some(b) => u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            None => 0,
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}
