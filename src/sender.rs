//! Per-direction packet queue and fan-out
//!
//! A `Sender` owns the FIFO queue for one direction (RTP or RTCP) of one
//! stream and drives the bucketed fan-out scan over the stream's registered
//! outputs. One invocation of [`Sender::reflect`] is one cooperative,
//! run-to-completion pass: it never blocks, and stops early for an
//! individual output only on backpressure, resuming from that output's
//! bookmark next pass.
//!
//! Two pacing modes exist behind the [`PacingMode`] seam:
//!
//! - `Buffered`: key-frame-aware bootstrap for new outputs, retention-window
//!   eviction. The default for jitter-buffered clients.
//! - `Relay`: no bootstrap bookkeeping; packets are forwarded once and
//!   evicted as soon as no output still needs them. Serves
//!   low-latency/no-jitter-buffer use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ReflectorConfig;
use crate::output::{Direction, WriteFlags, WriteOutcome};
use crate::packet::{Packet, PacketPool};
use crate::stats::RelayStats;
use crate::stream::buckets::BucketTable;
use crate::stream::StreamId;

/// Default pass interval when nothing else asks to run sooner
const IDLE_RUN_INTERVAL_MS: u64 = 1000;

/// Identity of one sender, stable for its lifetime
///
/// Bookmarks are keyed by this rather than by reference, so an output's
/// bookmark table can span both directions of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(u64);

impl SenderId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SenderId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Fan-out strategy for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    /// Buffered fan-out: key-frame bootstrap, retention-window eviction
    Buffered,
    /// Straight relay: forward once, evict immediately when unneeded
    Relay,
}

/// Shared context for one fan-out pass
pub(crate) struct PassContext<'a> {
    pub config: &'a ReflectorConfig,
    pub now_ms: u64,
    pub stream_id: StreamId,
    pub pool: &'a PacketPool,
    pub stats: &'a RelayStats,
}

/// FIFO queue plus fan-out state for one direction of one stream
#[derive(Debug)]
pub struct Sender {
    id: SenderId,
    direction: Direction,
    queue: VecDeque<Box<Packet>>,
    /// Next value of the per-stream packet sequence counter
    next_seq: u64,
    /// First packet enqueued since the last pass; doubles as the
    /// "has new work" signal for [`should_reflect_now`](Self::should_reflect_now)
    first_new_seq: Option<u64>,
    /// Pinned key-frame-start packet; never evicted while current
    keyframe_seq: Option<u64>,
    /// Absolute time of the next desired pass
    next_run_ms: u64,
    /// Last receiver-report send time (RTCP direction only)
    pub(crate) last_report_ms: u64,
}

impl Sender {
    pub fn new(direction: Direction) -> Self {
        Self {
            id: SenderId::next(),
            direction,
            queue: VecDeque::new(),
            next_seq: 1,
            first_new_seq: None,
            keyframe_seq: None,
            next_run_ms: 0,
            last_report_ms: 0,
        }
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queued packet count
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Sequence of the pinned key-frame-start packet, if any
    pub fn keyframe_seq(&self) -> Option<u64> {
        self.keyframe_seq
    }

    /// Append a packet; returns its assigned sequence number
    ///
    /// The first packet enqueued since the last pass becomes the first-new
    /// marker that wakes the next pass.
    pub fn enqueue(&mut self, mut packet: Box<Packet>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        packet.set_seq(seq);
        self.queue.push_back(packet);

        if self.first_new_seq.is_none() {
            self.first_new_seq = Some(seq);
        }
        seq
    }

    /// Pin the packet with the given sequence as the key-frame start,
    /// unpinning any previous one
    pub fn pin_keyframe(&mut self, seq: u64) {
        self.keyframe_seq = Some(seq);
    }

    /// Whether a pass is due
    ///
    /// When there is no new work and the scheduled next run has not
    /// arrived, the sender's own wake time is folded into the caller's
    /// aggregate and `false` is returned, so an idle sender costs nothing.
    pub fn should_reflect_now(&self, now_ms: u64, io_wake_ms: &mut u64) -> bool {
        if self.first_new_seq.is_none() && self.next_run_ms > now_ms {
            *io_wake_ms = (*io_wake_ms).min(self.next_run_ms);
            return false;
        }
        true
    }

    /// One fan-out pass; returns the absolute next desired run time
    pub(crate) fn reflect(
        &mut self,
        outputs: &mut BucketTable,
        mode: PacingMode,
        ctx: &PassContext<'_>,
    ) -> u64 {
        let now = ctx.now_ms;
        let mut next_run = now + IDLE_RUN_INTERVAL_MS;

        for pkt in self.queue.iter_mut() {
            pkt.set_needed(false);
        }

        let bootstrap = match mode {
            PacingMode::Buffered => self.bootstrap_start_seq(ctx),
            PacingMode::Relay => self.queue.front().map(|p| p.seq()),
        };

        let bucket_delay = ctx.config.bucket_delay_ms();
        for bucket in 0..outputs.bucket_count() {
            for entry in outputs.bucket_mut(bucket) {
                let Some(entry) = entry else { continue };
                if !entry.output.is_playing() {
                    continue;
                }

                let start = match entry.bookmarks.get(self.id) {
                    Some(bm) => {
                        if bm.retry_at_ms > now {
                            // Backing off; keep its packets alive meanwhile
                            next_run = next_run.min(bm.retry_at_ms);
                            self.mark_needed_from(bm.position);
                            continue;
                        }
                        self.relocated_position(bm.position, mode, ctx)
                    }
                    None => match bootstrap {
                        Some(seq) => seq,
                        None => continue,
                    },
                };

                let lateness_base = (bucket as u64 * bucket_delay) as i64;
                let mut idx = self.queue.partition_point(|p| p.seq() < start);
                let mut blocked = false;

                while idx < self.queue.len() {
                    let pkt = &self.queue[idx];
                    let seq = pkt.seq();
                    let lateness = now.saturating_sub(pkt.arrival_ms()) as i64 + lateness_base;
                    let flags = WriteFlags {
                        direction: self.direction,
                        keyframe: self.keyframe_seq == Some(seq),
                    };

                    match entry.output.write_packet(pkt, ctx.stream_id, flags, lateness) {
                        WriteOutcome::Sent => {
                            ctx.stats.record_sent(pkt.len());
                            entry.bookmarks.set(self.id, seq + 1);
                            entry.bookmarks.note_delivered(self.id);
                        }
                        WriteOutcome::WouldBlock { retry_in_ms } => {
                            entry.bookmarks.note_blocked(self.id, seq, now, retry_in_ms);
                            if let Some(bm) = entry.bookmarks.get(self.id) {
                                next_run = next_run.min(bm.retry_at_ms);
                            }
                            blocked = true;
                            break;
                        }
                        WriteOutcome::Failed => {
                            // Lost to this output; skip it and move on
                            entry.bookmarks.set(self.id, seq + 1);
                        }
                    }
                    idx += 1;
                }

                if blocked {
                    self.mark_needed_from(self.queue[idx].seq());
                }
            }
        }

        match mode {
            PacingMode::Buffered => self.evict_aged(ctx),
            PacingMode::Relay => self.evict_unneeded(ctx),
        }

        self.first_new_seq = None;
        self.next_run_ms = next_run;
        next_run
    }

    /// Remove packets nothing still needs
    ///
    /// Buffered mode: oldest to newest, a packet goes back to the pool only
    /// if it is not flagged needed AND older than the retention window; the
    /// scan stops at the first keeper (everything behind it is newer). The
    /// pinned key-frame packet is skipped over and retained regardless of
    /// age.
    fn evict_aged(&mut self, ctx: &PassContext<'_>) {
        let window = ctx.config.overbuffer_window_ms();
        let mut pinned: Option<Box<Packet>> = None;

        while let Some(front) = self.queue.front() {
            let age = ctx.now_ms.saturating_sub(front.arrival_ms());
            if front.is_needed() || age <= window {
                break;
            }
            if let Some(pkt) = self.queue.pop_front() {
                if self.keyframe_seq == Some(pkt.seq()) {
                    pinned = Some(pkt);
                    continue;
                }
                ctx.pool.recycle(pkt);
            }
        }

        if let Some(kf) = pinned {
            // Oldest surviving packet by construction
            self.queue.push_front(kf);
        }
    }

    /// Relay-mode eviction: a packet delivered to every output (no needed
    /// flag after a full scan) is recycled immediately
    fn evict_unneeded(&mut self, ctx: &PassContext<'_>) {
        while let Some(front) = self.queue.front() {
            if front.is_needed() {
                break;
            }
            if let Some(pkt) = self.queue.pop_front() {
                ctx.pool.recycle(pkt);
            }
        }
    }

    /// Scan start for outputs with no bookmark yet: the pinned key frame if
    /// set, else the oldest packet within the bootstrap window, else the
    /// newest packet
    fn bootstrap_start_seq(&self, ctx: &PassContext<'_>) -> Option<u64> {
        if let Some(seq) = self.keyframe_seq {
            return Some(seq);
        }
        let window = ctx
            .config
            .bootstrap_offset_ms()
            .min(ctx.config.overbuffer_window_ms());
        let horizon = ctx.now_ms.saturating_sub(window);
        self.queue
            .iter()
            .find(|p| p.arrival_ms() >= horizon)
            .map(|p| p.seq())
            .or_else(|| self.queue.back().map(|p| p.seq()))
    }

    /// Bounded catch-up: a bookmark that has drifted more than the
    /// relocation threshold behind the live key frame snaps forward to it,
    /// trading completeness for latency
    fn relocated_position(&self, position: u64, mode: PacingMode, ctx: &PassContext<'_>) -> u64 {
        if mode == PacingMode::Relay {
            return position;
        }
        let Some(kf_seq) = self.keyframe_seq else {
            return position;
        };
        if position >= kf_seq {
            return position;
        }

        let kf_arrival = self.arrival_of(kf_seq);
        let bm_arrival = self
            .queue
            .get(self.queue.partition_point(|p| p.seq() < position))
            .map(|p| p.arrival_ms());

        match (bm_arrival, kf_arrival) {
            (Some(bm), Some(kf)) if kf.saturating_sub(bm) > ctx.config.relocate_threshold_ms() => {
                tracing::debug!(
                    stream = ctx.stream_id,
                    from = position,
                    to = kf_seq,
                    "Bookmark relocated to key frame"
                );
                kf_seq
            }
            _ => position,
        }
    }

    fn arrival_of(&self, seq: u64) -> Option<u64> {
        let idx = self.queue.partition_point(|p| p.seq() < seq);
        match self.queue.get(idx) {
            Some(p) if p.seq() == seq => Some(p.arrival_ms()),
            _ => None,
        }
    }

    fn mark_needed_from(&mut self, seq: u64) {
        let idx = self.queue.partition_point(|p| p.seq() < seq);
        for pkt in self.queue.range_mut(idx..) {
            pkt.set_needed(true);
        }
    }

    /// Drain the queue back into the pool (stream teardown)
    pub(crate) fn drain_to(&mut self, pool: &PacketPool) {
        while let Some(pkt) = self.queue.pop_front() {
            pool.recycle(pkt);
        }
        self.first_new_seq = None;
        self.keyframe_seq = None;
    }

    #[cfg(test)]
    pub(crate) fn queued_seqs(&self) -> Vec<u64> {
        self.queue.iter().map(|p| p.seq()).collect()
    }

    #[cfg(test)]
    pub(crate) fn queued_arrivals(&self) -> Vec<u64> {
        self.queue.iter().map(|p| p.arrival_ms()).collect()
    }

    #[cfg(test)]
    pub(crate) fn packet_needed(&self, seq: u64) -> bool {
        let idx = self.queue.partition_point(|p| p.seq() < seq);
        self.queue.get(idx).map(|p| p.is_needed()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::stream::buckets::BucketTable;

    /// Records every write; optionally blocks at one packet sequence
    struct RecordingOutput {
        written: Mutex<Vec<(u64, i64)>>,
        block_at: Mutex<Option<u64>>,
        playing: bool,
    }

    impl RecordingOutput {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                written: Mutex::new(Vec::new()),
                block_at: Mutex::new(None),
                playing: true,
            })
        }

        fn blocking_at(seq: u64) -> Arc<Self> {
            let out = Self::new();
            *out.block_at.lock().unwrap() = Some(seq);
            out
        }

        fn unblock(&self) {
            *self.block_at.lock().unwrap() = None;
        }

        fn written_seqs(&self) -> Vec<u64> {
            self.written.lock().unwrap().iter().map(|w| w.0).collect()
        }

        fn written(&self) -> Vec<(u64, i64)> {
            self.written.lock().unwrap().clone()
        }
    }

    impl crate::output::ReflectorOutput for RecordingOutput {
        fn write_packet(
            &self,
            packet: &Packet,
            _stream: StreamId,
            _flags: WriteFlags,
            lateness_ms: i64,
        ) -> WriteOutcome {
            if *self.block_at.lock().unwrap() == Some(packet.seq()) {
                return WriteOutcome::WouldBlock { retry_in_ms: None };
            }
            self.written.lock().unwrap().push((packet.seq(), lateness_ms));
            WriteOutcome::Sent
        }

        fn is_playing(&self) -> bool {
            self.playing
        }

        fn teardown(&self) {}
    }

    fn ctx<'a>(
        config: &'a ReflectorConfig,
        pool: &'a PacketPool,
        stats: &'a RelayStats,
        now_ms: u64,
    ) -> PassContext<'a> {
        PassContext {
            config,
            now_ms,
            stream_id: 1,
            pool,
            stats,
        }
    }

    fn enqueue_at(sender: &mut Sender, pool: &PacketPool, arrival_ms: u64) -> u64 {
        let mut pkt = pool.take();
        pkt.set(&[0x80, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0xAB], false);
        pkt.set_arrival_ms(arrival_ms);
        sender.enqueue(pkt)
    }

    #[test]
    fn test_fifo_order_preserved() {
        let pool = PacketPool::new(0);
        let mut sender = Sender::new(Direction::Rtp);

        for t in [10, 20, 30, 40] {
            enqueue_at(&mut sender, &pool, t);
        }

        let arrivals = sender.queued_arrivals();
        let mut sorted = arrivals.clone();
        sorted.sort_unstable();
        assert_eq!(arrivals, sorted);
        assert_eq!(sender.queued_seqs(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_outputs_receive_in_fifo_order() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::new();
        outputs.insert(out.clone(), None);

        for t in [100, 110, 120] {
            enqueue_at(&mut sender, &pool, t);
        }
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 130));

        assert_eq!(out.written_seqs(), vec![1, 2, 3]);
    }

    #[test]
    fn test_should_reflect_now_folds_wake_time() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        // Nothing queued, never run: first call is due
        let mut wake = u64::MAX;
        assert!(sender.should_reflect_now(0, &mut wake));

        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 100));

        // Idle after a pass: not due, wake time folded
        let mut wake = u64::MAX;
        assert!(!sender.should_reflect_now(200, &mut wake));
        assert_eq!(wake, 1100);

        // New packet makes it due again
        enqueue_at(&mut sender, &pool, 210);
        assert!(sender.should_reflect_now(211, &mut wake));
    }

    #[test]
    fn test_bucket_stagger_lateness() {
        let config = ReflectorConfig::default(); // 73 ms bucket delay
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out0 = RecordingOutput::new();
        let out1 = RecordingOutput::new();
        assert_eq!(outputs.insert(out0.clone(), Some(0)), Some(0));
        assert_eq!(outputs.insert(out1.clone(), Some(1)), Some(1));

        enqueue_at(&mut sender, &pool, 1000);
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 1000));

        assert_eq!(out0.written(), vec![(1, 0)]);
        assert_eq!(out1.written(), vec![(1, 73)]);
    }

    #[test]
    fn test_would_block_bookmarks_and_resumes() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::blocking_at(3);
        outputs.insert(out.clone(), None);

        for t in [100, 101, 102, 103, 104] {
            enqueue_at(&mut sender, &pool, t);
        }
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 110));

        // Packets 1-2 delivered, bookmark parked on 3
        assert_eq!(out.written_seqs(), vec![1, 2]);
        let sender_id = sender.id();
        assert_eq!(outputs.bucket_mut(0)[0].as_ref().unwrap().bookmarks.get(sender_id).unwrap().position, 3);
        assert!(sender.packet_needed(3));
        assert!(sender.packet_needed(5));

        // Next pass after the backoff resumes at 3 without re-delivering
        out.unblock();
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 200));
        assert_eq!(out.written_seqs(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_backoff_skips_output_until_retry_time() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::blocking_at(1);
        outputs.insert(out.clone(), None);

        enqueue_at(&mut sender, &pool, 100);
        let next = sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 100));
        // First block: 5 ms backoff wins over the 1 s idle interval
        assert_eq!(next, 105);

        // Within the backoff window the output is left alone but its
        // packets stay pinned
        out.unblock();
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 102));
        assert!(out.written_seqs().is_empty());
        assert!(sender.packet_needed(1));

        // Past the retry time delivery resumes
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 106));
        assert_eq!(out.written_seqs(), vec![1]);
    }

    #[test]
    fn test_eviction_age_and_needed() {
        let config = ReflectorConfig::default().overbuffer_window(std::time::Duration::from_secs(1));
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        // No outputs: eviction is purely age-based
        for t in [0, 100, 5000, 5100] {
            enqueue_at(&mut sender, &pool, t);
        }
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 5200));

        // Packets older than the window are gone; the rest survive
        assert_eq!(sender.queued_seqs(), vec![3, 4]);
        assert_eq!(pool.free_count(), 2);

        // Every survivor is young or needed
        for (seq, arrival) in sender.queued_seqs().iter().zip(sender.queued_arrivals()) {
            assert!(5200 - arrival <= 1000 || sender.packet_needed(*seq));
        }
    }

    #[test]
    fn test_blocked_packets_survive_eviction() {
        let config = ReflectorConfig::default().overbuffer_window(std::time::Duration::from_millis(50));
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::blocking_at(1);
        outputs.insert(out.clone(), None);

        enqueue_at(&mut sender, &pool, 100);
        enqueue_at(&mut sender, &pool, 101);

        // Both packets are far older than the window, but the blocked
        // output still needs them
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 1000));
        assert_eq!(sender.queue_len(), 2);
    }

    #[test]
    fn test_keyframe_never_evicted_while_pinned() {
        let config = ReflectorConfig::default().overbuffer_window(std::time::Duration::from_millis(100));
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let kf = enqueue_at(&mut sender, &pool, 0);
        enqueue_at(&mut sender, &pool, 10);
        enqueue_at(&mut sender, &pool, 20);
        sender.pin_keyframe(kf);

        // Hours later everything around the pin ages out
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 100_000));
        assert_eq!(sender.queued_seqs(), vec![kf]);

        // Re-pinning releases the old frame on the following pass
        let kf2 = enqueue_at(&mut sender, &pool, 100_000);
        sender.pin_keyframe(kf2);
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 200_100));
        assert_eq!(sender.queued_seqs(), vec![kf2]);
    }

    #[test]
    fn test_new_output_bootstraps_from_keyframe() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        enqueue_at(&mut sender, &pool, 100);
        enqueue_at(&mut sender, &pool, 200);
        let kf = enqueue_at(&mut sender, &pool, 300);
        sender.pin_keyframe(kf);
        enqueue_at(&mut sender, &pool, 400);

        let out = RecordingOutput::new();
        outputs.insert(out.clone(), None);
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 450));

        // History before the key frame is not replayed
        assert_eq!(out.written_seqs(), vec![kf, kf + 1]);
    }

    #[test]
    fn test_bootstrap_window_without_keyframe() {
        let config = ReflectorConfig::default(); // 500 ms bootstrap offset
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        enqueue_at(&mut sender, &pool, 1000);
        enqueue_at(&mut sender, &pool, 5600);
        enqueue_at(&mut sender, &pool, 5800);

        let out = RecordingOutput::new();
        outputs.insert(out.clone(), None);
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 6000));

        // Only packets within the 500 ms bootstrap window are replayed
        assert_eq!(out.written_seqs(), vec![2, 3]);
    }

    #[test]
    fn test_bookmark_relocates_to_keyframe() {
        let config = ReflectorConfig::default(); // 1000 ms relocation threshold
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::blocking_at(1);
        outputs.insert(out.clone(), None);

        enqueue_at(&mut sender, &pool, 0);
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 10));
        assert!(out.written_seqs().is_empty());

        // Stream advances far past the stuck bookmark; a new key frame lands
        for t in [2000, 2100] {
            enqueue_at(&mut sender, &pool, t);
        }
        let kf = enqueue_at(&mut sender, &pool, 2200);
        sender.pin_keyframe(kf);

        out.unblock();
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 2300));

        // Catch-up starts at the key frame, not the abandoned position
        assert_eq!(out.written_seqs(), vec![kf]);
    }

    #[test]
    fn test_relay_mode_evicts_delivered_immediately() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::new();
        outputs.insert(out.clone(), None);

        for t in [100, 110] {
            enqueue_at(&mut sender, &pool, t);
        }
        sender.reflect(&mut outputs, PacingMode::Relay, &ctx(&config, &pool, &stats, 120));

        assert_eq!(out.written_seqs(), vec![1, 2]);
        assert_eq!(sender.queue_len(), 0);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_relay_mode_keeps_blocked_tail() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = RecordingOutput::blocking_at(2);
        outputs.insert(out.clone(), None);

        for t in [100, 110, 120] {
            enqueue_at(&mut sender, &pool, t);
        }
        sender.reflect(&mut outputs, PacingMode::Relay, &ctx(&config, &pool, &stats, 130));

        // Packet 1 was delivered and evicted; 2-3 wait for the retry
        assert_eq!(sender.queued_seqs(), vec![2, 3]);

        out.unblock();
        sender.reflect(&mut outputs, PacingMode::Relay, &ctx(&config, &pool, &stats, 200));
        assert_eq!(out.written_seqs(), vec![1, 2, 3]);
        assert_eq!(sender.queue_len(), 0);
    }

    #[test]
    fn test_non_playing_output_skipped() {
        let config = ReflectorConfig::default();
        let pool = PacketPool::new(0);
        let stats = RelayStats::new();
        let mut sender = Sender::new(Direction::Rtp);
        let mut outputs = BucketTable::new(config.slots_per_bucket);

        let out = Arc::new(RecordingOutput {
            written: Mutex::new(Vec::new()),
            block_at: Mutex::new(None),
            playing: false,
        });
        outputs.insert(out.clone(), None);

        enqueue_at(&mut sender, &pool, 100);
        sender.reflect(&mut outputs, PacingMode::Buffered, &ctx(&config, &pool, &stats, 110));
        assert!(out.written_seqs().is_empty());
    }
}
