//! Relay-wide statistics
//!
//! Counters shared across every stream and socket. Updated with atomic
//! fetch-adds so the hot receive/send paths never take a lock for accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide relay counters
///
/// Cheap to share via `Arc`; one instance typically spans all streams.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Total bytes received from sources
    bytes_received: AtomicU64,
    /// Total bytes written to outputs
    bytes_sent: AtomicU64,
    /// Total packets received from sources
    packets_received: AtomicU64,
    /// Total packets written to outputs
    packets_sent: AtomicU64,
}

/// Point-in-time copy of the relay counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

impl RelayStats {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one received packet
    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Account one packet written to an output
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting
    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
        }
    }
}
