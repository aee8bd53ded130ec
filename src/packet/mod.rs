//! Reusable datagram buffers and their free pool
//!
//! A [`Packet`] holds one received datagram plus relay metadata and is
//! recycled through a [`PacketPool`] rather than freed; in steady state the
//! receive path performs no allocation.

pub mod packet;
pub mod pool;

pub use packet::{Packet, MAX_PACKET_SIZE, RTCP_SENDER_REPORT};
pub use pool::PacketPool;
