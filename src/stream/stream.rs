//! Stream state and fan-out entry points
//!
//! All mutable state for one track (both sender queues, the bucket table,
//! the report template) lives behind a single mutex, held for the whole of
//! each cooperative pass. Different streams share nothing but the socket
//! and packet pools and the atomic relay counters, so they reflect
//! concurrently on different worker threads.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ReflectorConfig;
use crate::error::Result;
use crate::media::nal;
use crate::output::{Direction, ReflectorOutput};
use crate::packet::{Packet, PacketPool};
use crate::sender::{PacingMode, PassContext, Sender};
use crate::socket::{SocketPair, SocketPool};
use crate::stats::RelayStats;

use super::buckets::BucketTable;
use super::report::ReceiverReport;
use super::StreamId;

/// Receiver reports go to the source at most this often
const RECEIVER_REPORT_INTERVAL_MS: u64 = 5000;

/// Bit-rate accounting interval
const BITRATE_INTERVAL_MS: u64 = 30_000;

/// What the negotiated track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Session-scoped flag linking a video stream's key-frame updates to its
/// audio siblings
///
/// When the video stream pins a new key frame it raises the flag; the next
/// audio packet on any stream sharing the signal is pinned too, keeping the
/// audio and video bootstrap points close together for new clients.
#[derive(Debug, Default)]
pub struct KeyFrameSignal(AtomicBool);

impl KeyFrameSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Everything guarded by the stream mutex
struct StreamCore {
    rtp: Sender,
    rtcp: Sender,
    outputs: BucketTable,
    report: ReceiverReport,
    sockets: Option<Arc<SocketPair>>,
    source_rtcp_addr: Option<SocketAddr>,
    bitrate_interval_start_ms: u64,
}

/// One negotiated source track: an RTP/RTCP sender pair plus its outputs
pub struct ReflectorStream {
    id: StreamId,
    kind: MediaKind,
    mode: PacingMode,
    config: ReflectorConfig,
    pool: Arc<PacketPool>,
    stats: Arc<RelayStats>,
    keyframe_signal: Arc<KeyFrameSignal>,
    core: Mutex<StreamCore>,
    /// Bytes received in the current accounting interval; reset by
    /// subtracting the observed value so concurrent increments survive
    interval_bytes: AtomicU64,
    bitrate_bps: AtomicU64,
}

impl ReflectorStream {
    /// Create an unbound stream
    pub fn new(
        id: StreamId,
        kind: MediaKind,
        config: ReflectorConfig,
        pool: Arc<PacketPool>,
    ) -> Self {
        let ssrc = derive_ssrc(id);
        let cname = format!("reflector-{}", id);
        let outputs = BucketTable::new(config.slots_per_bucket);

        Self {
            id,
            kind,
            mode: PacingMode::Buffered,
            config,
            pool,
            stats: Arc::new(RelayStats::new()),
            keyframe_signal: KeyFrameSignal::new(),
            core: Mutex::new(StreamCore {
                rtp: Sender::new(Direction::Rtp),
                rtcp: Sender::new(Direction::Rtcp),
                outputs,
                report: ReceiverReport::new(ssrc, &cname),
                sockets: None,
                source_rtcp_addr: None,
                bitrate_interval_start_ms: 0,
            }),
            interval_bytes: AtomicU64::new(0),
            bitrate_bps: AtomicU64::new(0),
        }
    }

    /// Use the relay (unbuffered) fan-out strategy
    pub fn with_mode(mut self, mode: PacingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Share relay-wide counters
    pub fn with_stats(mut self, stats: Arc<RelayStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Share one key-frame signal across the streams of a session
    pub fn with_keyframe_signal(mut self, signal: Arc<KeyFrameSignal>) -> Self {
        self.keyframe_signal = signal;
        self
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    /// Registered output count
    pub fn output_count(&self) -> usize {
        self.core.lock().unwrap().outputs.len()
    }

    /// Whether a socket pair is currently bound
    pub fn is_bound(&self) -> bool {
        self.core.lock().unwrap().sockets.is_some()
    }

    /// Most recent bit-rate estimate in bits/second
    pub fn bitrate_bps(&self) -> u64 {
        self.bitrate_bps.load(Ordering::Relaxed)
    }

    /// Relay-wide counters this stream reports into
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    #[cfg(test)]
    pub(crate) fn queued_rtp_arrivals(&self) -> Vec<u64> {
        self.core.lock().unwrap().rtp.queued_arrivals()
    }

    /// Register an output, optionally into a specific bucket (used to
    /// co-locate registrations belonging to one client)
    ///
    /// Returns the bucket index used, or `None` if a requested bucket was
    /// already full.
    pub fn add_output(
        &self,
        output: Arc<dyn ReflectorOutput>,
        preferred_bucket: Option<usize>,
    ) -> Option<usize> {
        let mut core = self.core.lock().unwrap();
        let bucket = core.outputs.insert(output, preferred_bucket);

        if let Some(bucket) = bucket {
            tracing::info!(
                stream = self.id,
                bucket = bucket,
                outputs = core.outputs.len(),
                "Output registered"
            );
        }
        bucket
    }

    /// Unregister an output; its bookmarks die with the registration
    pub fn remove_output(&self, output: &Arc<dyn ReflectorOutput>) -> bool {
        let mut core = self.core.lock().unwrap();
        let removed = core.outputs.remove(output);
        debug_assert!(removed, "removed an output that was never registered");

        if removed {
            tracing::info!(
                stream = self.id,
                outputs = core.outputs.len(),
                "Output removed"
            );
        }
        removed
    }

    /// Remove every output and invoke its `teardown` (session end)
    pub fn clear_outputs(&self) {
        let mut core = self.core.lock().unwrap();
        core.outputs.drain_all(|output| output.teardown());
        tracing::info!(stream = self.id, "All outputs cleared");
    }

    /// Bind a pooled socket pair for this stream's source
    ///
    /// The pair is keyed by destination, so unrelated broadcasts sharing a
    /// port are demultiplexed by `source_ip`; pass `None` to accept any
    /// source. Joins the multicast group (and sets the TTL) when the
    /// destination is multicast. Failures are returned to the caller and
    /// not retried.
    pub fn bind_sockets(
        self: &Arc<Self>,
        sockets: &SocketPool,
        dest: SocketAddr,
        source_ip: Option<IpAddr>,
    ) -> Result<()> {
        let pair = sockets.acquire(dest, &self.config)?;
        pair.rtp.register(source_ip, self);
        pair.rtcp.register(source_ip, self);
        self.core.lock().unwrap().sockets = Some(pair);

        tracing::info!(stream = self.id, dest = %dest, source = ?source_ip, "Stream bound");
        Ok(())
    }

    /// Bind a private, unshared socket pair for a direct (TCP-push)
    /// transport feeding [`push_packet`](Self::push_packet)
    pub fn bind_direct(self: &Arc<Self>, sockets: &SocketPool) -> Result<()> {
        let pair = sockets.acquire_private(&self.config)?;
        pair.rtp.register(None, self);
        pair.rtcp.register(None, self);
        self.core.lock().unwrap().sockets = Some(pair);

        tracing::info!(stream = self.id, "Stream bound (private pair)");
        Ok(())
    }

    /// Release the bound socket pair back toward the pool
    pub fn release_sockets(&self) {
        let pair = self.core.lock().unwrap().sockets.take();
        if let Some(pair) = pair {
            pair.rtp.unregister(self.id);
            pair.rtcp.unregister(self.id);
            tracing::info!(stream = self.id, "Stream unbound");
        }
    }

    /// Full teardown: outputs torn down, sockets released, queues drained
    pub fn teardown(&self) {
        self.clear_outputs();
        self.release_sockets();

        let mut core = self.core.lock().unwrap();
        let StreamCore { rtp, rtcp, .. } = &mut *core;
        rtp.drain_to(&self.pool);
        rtcp.drain_to(&self.pool);
    }

    /// Inject one datagram directly, bypassing the socket layer
    /// (interleaved/TCP transports)
    pub fn push_packet(&self, data: &[u8], direction: Direction, now_ms: u64) {
        let mut pkt = self.pool.take();
        pkt.set(data, direction == Direction::Rtcp);
        pkt.set_arrival_ms(now_ms);
        self.ingest(pkt);
    }

    /// Enqueue a received packet, maintaining key-frame state
    pub(crate) fn ingest(&self, pkt: Box<Packet>) {
        if pkt.is_empty() {
            self.pool.recycle(pkt);
            return;
        }
        self.stats.record_received(pkt.len());
        self.interval_bytes
            .fetch_add(pkt.len() as u64, Ordering::Relaxed);

        let mut core = self.core.lock().unwrap();
        if pkt.is_rtcp() {
            core.rtcp.enqueue(pkt);
            return;
        }

        let pin = match self.kind {
            MediaKind::Video => {
                let keyframe = nal::is_keyframe_start(pkt.data());
                if keyframe {
                    self.keyframe_signal.raise();
                }
                keyframe
            }
            MediaKind::Audio => self.keyframe_signal.take(),
        };

        let seq = core.rtp.enqueue(pkt);
        if pin {
            core.rtp.pin_keyframe(seq);
            tracing::trace!(stream = self.id, seq = seq, "Key frame pinned");
        }
    }

    /// Record where the source's RTCP reports come from, enabling receiver
    /// reports back to it
    pub(crate) fn learn_rtcp_source(&self, addr: SocketAddr) {
        let mut core = self.core.lock().unwrap();
        if core.source_rtcp_addr.is_none() {
            core.source_rtcp_addr = Some(addr);
            tracing::debug!(stream = self.id, source = %addr, "Source RTCP address learned");
        }
    }

    /// Whether a pass for the given direction is due; folds the stream's
    /// desired wake time into the caller's aggregate otherwise
    pub fn should_reflect_now(&self, direction: Direction, now_ms: u64, io_wake_ms: &mut u64) -> bool {
        let core = self.core.lock().unwrap();
        match direction {
            Direction::Rtp => core.rtp.should_reflect_now(now_ms, io_wake_ms),
            Direction::Rtcp => core.rtcp.should_reflect_now(now_ms, io_wake_ms),
        }
    }

    /// One cooperative fan-out pass for one direction
    ///
    /// Holds the stream mutex for the whole pass. Never blocks; an output
    /// that cannot accept a packet is bookmarked and retried next pass.
    pub fn reflect(&self, direction: Direction, now_ms: u64, io_wake_ms: &mut u64) {
        let mut core = self.core.lock().unwrap();

        let due = match direction {
            Direction::Rtp => core.rtp.should_reflect_now(now_ms, io_wake_ms),
            Direction::Rtcp => core.rtcp.should_reflect_now(now_ms, io_wake_ms),
        };
        if !due {
            return;
        }

        if direction == Direction::Rtcp
            && now_ms.saturating_sub(core.rtcp.last_report_ms) >= RECEIVER_REPORT_INTERVAL_MS
        {
            self.send_report_locked(&mut core, now_ms);
        }

        self.update_bitrate(&mut core, now_ms);

        let StreamCore {
            rtp, rtcp, outputs, ..
        } = &mut *core;
        let sender = match direction {
            Direction::Rtp => rtp,
            Direction::Rtcp => rtcp,
        };
        let ctx = PassContext {
            config: &self.config,
            now_ms,
            stream_id: self.id,
            pool: &self.pool,
            stats: &self.stats,
        };
        let next = sender.reflect(outputs, self.mode, &ctx);
        *io_wake_ms = (*io_wake_ms).min(next);
    }

    /// Send the prebuilt receiver-report compound to the source now
    pub fn send_receiver_report(&self, now_ms: u64) {
        let mut core = self.core.lock().unwrap();
        self.send_report_locked(&mut core, now_ms);
    }

    fn send_report_locked(&self, core: &mut StreamCore, now_ms: u64) {
        core.rtcp.last_report_ms = now_ms;

        // The source address is only known once it has sent us something;
        // until then there is nowhere to report to
        let Some(addr) = core.source_rtcp_addr else {
            return;
        };
        let Some(pair) = core.sockets.clone() else {
            return;
        };

        let total = core.outputs.len() as u32;
        let playing = core.outputs.playing_count() as u32;
        core.report.set_eye_counts(total, playing);

        match pair.rtcp.try_send_to(core.report.as_bytes(), addr) {
            Ok(sent) => {
                self.stats.record_sent(sent);
                tracing::debug!(stream = self.id, to = %addr, eyes = total, "Receiver report sent");
            }
            Err(e) => {
                tracing::debug!(stream = self.id, error = %e, "Receiver report send failed");
            }
        }
    }

    fn update_bitrate(&self, core: &mut StreamCore, now_ms: u64) {
        if core.bitrate_interval_start_ms == 0 {
            core.bitrate_interval_start_ms = now_ms;
            return;
        }
        let elapsed = now_ms.saturating_sub(core.bitrate_interval_start_ms);
        if elapsed < BITRATE_INTERVAL_MS || elapsed == 0 {
            return;
        }

        let bytes = self.interval_bytes.load(Ordering::Relaxed);
        self.interval_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.bitrate_bps.store(bytes * 8 * 1000 / elapsed, Ordering::Relaxed);
        core.bitrate_interval_start_ms = now_ms;

        tracing::debug!(
            stream = self.id,
            bps = self.bitrate_bps.load(Ordering::Relaxed),
            "Bit rate updated"
        );
    }
}

impl Drop for ReflectorStream {
    fn drop(&mut self) {
        if let Ok(core) = self.core.get_mut() {
            debug_assert!(
                core.outputs.is_empty(),
                "stream dropped with outputs still registered"
            );
        }
    }
}

fn derive_ssrc(id: StreamId) -> u32 {
    (id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as u32
}
