//! # rtp-reflector
//!
//! An RTP/RTCP reflection engine: one live source stream in (unicast push
//! or multicast), independently paced copies out to any number of
//! downstream clients.
//!
//! ```text
//!                 UDP source (or push_packet)
//!                           │
//!                           ▼
//!                   ReflectorSocket ──── demux by source IP, SSRC filter,
//!                           │            H.264 key-frame tracking
//!                           ▼
//!                   ReflectorStream ──── one mutex: RTP + RTCP queues,
//!                           │            bucket table, report template
//!            ┌──────────────┼──────────────┐
//!            ▼              ▼              ▼
//!       [bucket 0]     [bucket 1]     [bucket 2]       staggered by
//!        Output(s)      Output(s)      Output(s)       bucket_delay each
//! ```
//!
//! The engine is cooperative: it owns no threads and never blocks. The
//! session layer (or [`ReflectorSocket::spawn_driver`]) invokes `run_pass`
//! when a socket is readable or a wake time expires; each pass drains the
//! socket, enqueues into the senders, fans out to every playing output,
//! and evicts packets no output still needs. Backpressure from an output
//! parks a bookmark instead of dropping data; new clients bootstrap from
//! the most recent key frame.
//!
//! Downstream transports implement the [`ReflectorOutput`] trait and are
//! registered with [`ReflectorStream::add_output`]; everything else about
//! the client session lives outside this crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod media;
pub mod output;
pub mod packet;
pub mod sender;
pub mod socket;
pub mod stats;
pub mod stream;

pub use config::ReflectorConfig;
pub use error::{Error, Result};
pub use output::{Direction, ReflectorOutput, WriteFlags, WriteOutcome};
pub use packet::{Packet, PacketPool, MAX_PACKET_SIZE};
pub use sender::{PacingMode, Sender, SenderId};
pub use socket::{ReflectorSocket, SocketPair, SocketPool};
pub use stats::{RelaySnapshot, RelayStats};
pub use stream::{KeyFrameSignal, MediaKind, ReflectorStream, StreamId};
