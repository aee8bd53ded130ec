//! Prebuilt RTCP receiver-report compound
//!
//! The relay answers its source with a fixed three-part compound packet:
//!
//! ```text
//! +--------------------+----------------------+---------------------------+
//! | Receiver Report    | Source Description   | Application packet        |
//! | PT=201, no blocks  | PT=202, CNAME chunk  | PT=204, name + eye counts |
//! +--------------------+----------------------+---------------------------+
//! ```
//!
//! The APP section carries the live audience: total registered outputs,
//! outputs currently playing, and a reserved word. The whole compound is
//! built once per stream and sent verbatim, with only the eye-count fields
//! patched per send.

use bytes::{BufMut, BytesMut};

const RTCP_VERSION: u8 = 0x80;
const PT_RECEIVER_REPORT: u8 = 201;
const PT_SOURCE_DESCRIPTION: u8 = 202;
const PT_APPLICATION: u8 = 204;

const SDES_CNAME: u8 = 1;

/// Four-character name identifying our APP extension
const APP_NAME: &[u8; 4] = b"eyes";

/// Prebuilt receiver-report compound with patchable eye counts
#[derive(Debug)]
pub struct ReceiverReport {
    buf: BytesMut,
    eyes_offset: usize,
}

impl ReceiverReport {
    /// Build the compound once for a stream
    pub fn new(ssrc: u32, cname: &str) -> Self {
        let mut buf = BytesMut::with_capacity(128);

        // Empty Receiver Report: header + sender SSRC, zero report blocks
        buf.put_u8(RTCP_VERSION);
        buf.put_u8(PT_RECEIVER_REPORT);
        buf.put_u16(1);
        buf.put_u32(ssrc);

        // Source Description, one chunk: SSRC + CNAME item, null-terminated
        // and padded to a word boundary
        let cname = cname.as_bytes();
        let item_len = 4 + 2 + cname.len() + 1;
        let padded = (item_len + 3) & !3;
        buf.put_u8(RTCP_VERSION | 0x01); // one chunk
        buf.put_u8(PT_SOURCE_DESCRIPTION);
        buf.put_u16((padded / 4) as u16);
        buf.put_u32(ssrc);
        buf.put_u8(SDES_CNAME);
        buf.put_u8(cname.len() as u8);
        buf.put_slice(cname);
        for _ in item_len..=padded {
            buf.put_u8(0);
        }

        // Application packet: two 32-bit eye counters + one reserved word
        let eyes_offset = buf.len() + 12;
        buf.put_u8(RTCP_VERSION);
        buf.put_u8(PT_APPLICATION);
        buf.put_u16(5);
        buf.put_u32(ssrc);
        buf.put_slice(APP_NAME);
        buf.put_u32(0); // total eyes
        buf.put_u32(0); // playing eyes
        buf.put_u32(0); // reserved

        Self { buf, eyes_offset }
    }

    /// Patch the volatile eye-count fields
    pub fn set_eye_counts(&mut self, total: u32, playing: u32) {
        self.buf[self.eyes_offset..self.eyes_offset + 4].copy_from_slice(&total.to_be_bytes());
        self.buf[self.eyes_offset + 4..self.eyes_offset + 8]
            .copy_from_slice(&playing.to_be_bytes());
    }

    /// Wire bytes of the compound
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}
