//! Reflector configuration

use std::time::Duration;

/// Tuning options for the reflection engine
///
/// One config is shared by a stream and the sockets bound to it. Defaults
/// match typical live-broadcast deployments; all values are overridable with
/// the chainable setters.
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Outputs per stagger bucket
    pub slots_per_bucket: usize,

    /// Extra pacing delay between adjacent buckets
    pub bucket_delay: Duration,

    /// How much look-back a sender queue retains for late joiners
    pub overbuffer_window: Duration,

    /// How far before "now" a newly registered output starts when no key
    /// frame is pinned
    pub bootstrap_offset: Duration,

    /// How far a bookmark may drift behind the live key frame before it is
    /// snapped forward to it
    pub relocate_threshold: Duration,

    /// Trust a sender-side wall-clock tag appended to each payload and
    /// normalize arrival times from it
    pub trust_packet_time: bool,

    /// Maximum accepted future skew for tag-derived arrival times
    pub max_future_skew: Duration,

    /// How long the accepted SSRC survives without traffic before another
    /// source may take over
    pub ssrc_timeout: Duration,

    /// Packets allocated eagerly per pool before lazy growth takes over
    pub packet_pool_prealloc: usize,

    /// TTL applied when the destination is a multicast group
    pub multicast_ttl: u32,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            slots_per_bucket: 16,
            bucket_delay: Duration::from_millis(73),
            overbuffer_window: Duration::from_secs(10),
            bootstrap_offset: Duration::from_millis(500),
            relocate_threshold: Duration::from_millis(1000),
            trust_packet_time: false,
            max_future_skew: Duration::from_secs(5),
            ssrc_timeout: Duration::from_secs(30),
            packet_pool_prealloc: 64,
            multicast_ttl: 16,
        }
    }
}

impl ReflectorConfig {
    /// Create a config with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set outputs per stagger bucket (minimum 1)
    pub fn slots_per_bucket(mut self, slots: usize) -> Self {
        self.slots_per_bucket = slots.max(1);
        self
    }

    /// Set the per-bucket stagger delay
    pub fn bucket_delay(mut self, delay: Duration) -> Self {
        self.bucket_delay = delay;
        self
    }

    /// Set the retained look-back window
    pub fn overbuffer_window(mut self, window: Duration) -> Self {
        self.overbuffer_window = window;
        self
    }

    /// Set the new-output bootstrap offset
    pub fn bootstrap_offset(mut self, offset: Duration) -> Self {
        self.bootstrap_offset = offset;
        self
    }

    /// Set the bookmark relocation threshold
    pub fn relocate_threshold(mut self, threshold: Duration) -> Self {
        self.relocate_threshold = threshold;
        self
    }

    /// Honor sender-side receive-time tags
    pub fn trust_packet_time(mut self, trust: bool) -> Self {
        self.trust_packet_time = trust;
        self
    }

    /// Set the maximum accepted future skew for tagged arrival times
    pub fn max_future_skew(mut self, skew: Duration) -> Self {
        self.max_future_skew = skew;
        self
    }

    /// Set the SSRC acceptance timeout
    pub fn ssrc_timeout(mut self, timeout: Duration) -> Self {
        self.ssrc_timeout = timeout;
        self
    }

    /// Set the packet pool preallocation count
    pub fn packet_pool_prealloc(mut self, count: usize) -> Self {
        self.packet_pool_prealloc = count;
        self
    }

    /// Set the multicast TTL
    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    pub(crate) fn bucket_delay_ms(&self) -> u64 {
        self.bucket_delay.as_millis() as u64
    }

    pub(crate) fn overbuffer_window_ms(&self) -> u64 {
        self.overbuffer_window.as_millis() as u64
    }

    pub(crate) fn bootstrap_offset_ms(&self) -> u64 {
        self.bootstrap_offset.as_millis() as u64
    }

    pub(crate) fn relocate_threshold_ms(&self) -> u64 {
        self.relocate_threshold.as_millis() as u64
    }

    pub(crate) fn max_future_skew_ms(&self) -> u64 {
        self.max_future_skew.as_millis() as u64
    }

    pub(crate) fn ssrc_timeout_ms(&self) -> u64 {
        self.ssrc_timeout.as_millis() as u64
    }
}
