//! One negotiated source track and its fan-out state
//!
//! A [`ReflectorStream`] pairs the RTP and RTCP senders for one track under
//! a single mutex, owns the bucket table of registered outputs, accounts
//! bit rate, and answers the source with periodic receiver reports.
//!
//! ```text
//!                         ReflectorStream
//!                  ┌──────────────────────────┐
//!                  │ Mutex<StreamCore> {      │
//!                  │   rtp:  Sender (queue)   │
//!                  │   rtcp: Sender (queue)   │
//!                  │   outputs: BucketTable   │
//!                  │   report: ReceiverReport │
//!                  │ }                        │
//!                  └───────────┬──────────────┘
//!                              │ reflect()
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!     [bucket 0]          [bucket 1]          [bucket 2]
//!     lateness +0ms       +bucket_delay       +2×bucket_delay
//! ```

pub mod buckets;
pub mod report;
pub mod stream;

pub use buckets::BucketTable;
pub use report::ReceiverReport;
pub use stream::{KeyFrameSignal, MediaKind, ReflectorStream};

/// Opaque stream identity, chosen by the session layer
pub type StreamId = u64;
