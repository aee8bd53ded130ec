//! UDP ingestion, demultiplexing, and source filtering
//!
//! A [`ReflectorSocket`] wraps one non-blocking UDP socket. Port parity
//! decides what it carries (odd = RTCP). Inbound datagrams are pulled into
//! pooled packets, filtered by source identity, and dispatched to the
//! stream registered for the sender's address (or a wildcard registration);
//! the same cooperative pass then runs the fan-out for every stream bound
//! to this socket.
//!
//! The engine performs no blocking calls and owns no threads: `run_pass`
//! is invoked by the session layer's event loop when the socket is
//! readable or a wake time expires. [`ReflectorSocket::spawn_driver`] is a
//! ready-made embodiment of that loop for applications that want one.

pub mod pool;

pub use pool::{SocketPair, SocketPool};

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};

use tokio::net::UdpSocket;

use crate::config::ReflectorConfig;
use crate::error::Result;
use crate::output::Direction;
use crate::packet::{Packet, PacketPool, MAX_PACKET_SIZE, RTCP_SENDER_REPORT};
use crate::stream::{ReflectorStream, StreamId};

/// Wall-clock tag appended to payloads when `trust_packet_time` is on
const TIME_TAG_LEN: usize = 8;

/// Source-identity filter
///
/// The first packet seen establishes the accepted SSRC; packets carrying a
/// different non-zero SSRC are dropped until the accepted source has been
/// silent past the timeout, at which point the next source takes over.
/// Tolerates source restarts without interleaving two logical streams.
#[derive(Debug, Default)]
struct SsrcFilter {
    accepted: Option<u32>,
    last_match_ms: u64,
}

impl SsrcFilter {
    fn accept(&mut self, ssrc: u32, now_ms: u64, timeout_ms: u64) -> bool {
        if ssrc == 0 {
            return true;
        }
        match self.accepted {
            None => {
                self.accepted = Some(ssrc);
                self.last_match_ms = now_ms;
                true
            }
            Some(acc) if acc == ssrc => {
                self.last_match_ms = now_ms;
                true
            }
            Some(acc) => {
                if now_ms.saturating_sub(self.last_match_ms) > timeout_ms {
                    tracing::info!(old = acc, new = ssrc, "Accepted SSRC re-established");
                    self.accepted = Some(ssrc);
                    self.last_match_ms = now_ms;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// One stream registration on this socket's demultiplexer
struct Binding {
    /// Expected source IP; `None` accepts any source
    source: Option<IpAddr>,
    stream: Weak<ReflectorStream>,
    filter: SsrcFilter,
}

/// Per-SSRC epoch for receive-time tag normalization
struct TagEpoch {
    tag0: u64,
    local0: u64,
}

#[derive(Default)]
struct SocketInner {
    bindings: Vec<Binding>,
    epochs: HashMap<u32, TagEpoch>,
}

/// One UDP socket plus its demultiplexer state
pub struct ReflectorSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    direction: Direction,
    config: ReflectorConfig,
    pool: Arc<PacketPool>,
    inner: Mutex<SocketInner>,
}

impl ReflectorSocket {
    /// Wrap an already-bound non-blocking socket
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        std_socket: std::net::UdpSocket,
        pool: Arc<PacketPool>,
        config: ReflectorConfig,
    ) -> Result<Arc<Self>> {
        let local_addr = std_socket.local_addr()?;
        let socket = UdpSocket::from_std(std_socket)?;
        let direction = if local_addr.port() % 2 == 1 {
            Direction::Rtcp
        } else {
            Direction::Rtp
        };

        Ok(Arc::new(Self {
            socket,
            local_addr,
            direction,
            config,
            pool,
            inner: Mutex::new(SocketInner::default()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// What this socket carries, by port parity (odd = RTCP)
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Register a stream for packets from `source` (or any source)
    pub fn register(&self, source: Option<IpAddr>, stream: &Arc<ReflectorStream>) {
        let mut inner = self.inner.lock().unwrap();
        inner.bindings.push(Binding {
            source,
            stream: Arc::downgrade(stream),
            filter: SsrcFilter::default(),
        });
        tracing::debug!(
            socket = %self.local_addr,
            stream = stream.id(),
            source = ?source,
            "Stream registered on socket"
        );
    }

    /// Drop every registration for a stream (and any dead ones)
    pub fn unregister(&self, stream_id: StreamId) {
        let mut inner = self.inner.lock().unwrap();
        inner.bindings.retain(|b| {
            b.stream
                .upgrade()
                .map(|s| s.id() != stream_id)
                .unwrap_or(false)
        });
    }

    /// Live registrations on this socket
    pub fn binding_count(&self) -> usize {
        self.inner.lock().unwrap().bindings.len()
    }

    /// Non-blocking send, used for receiver reports
    pub fn try_send_to(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.socket.try_send_to(data, to)
    }

    /// One cooperative invocation: drain pending datagrams, then run the
    /// fan-out pass for every stream bound here that is due
    ///
    /// Returns the aggregate next wake time.
    pub fn run_pass(&self, now_ms: u64) -> u64 {
        self.read_incoming(now_ms);

        let mut streams: Vec<Arc<ReflectorStream>> = Vec::new();
        {
            let inner = self.inner.lock().unwrap();
            for binding in &inner.bindings {
                if let Some(stream) = binding.stream.upgrade() {
                    if !streams.iter().any(|s| s.id() == stream.id()) {
                        streams.push(stream);
                    }
                }
            }
        }

        let mut wake = now_ms + 1000;
        for stream in streams {
            stream.reflect(self.direction, now_ms, &mut wake);
        }
        wake
    }

    /// Pull datagrams into pooled packets until the socket runs dry
    fn read_incoming(&self, now_ms: u64) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    if len == 0 {
                        continue;
                    }
                    let mut pkt = self.pool.take();
                    pkt.set(&buf[..len], self.direction == Direction::Rtcp);
                    pkt.set_arrival_ms(now_ms);
                    self.process_packet(pkt, from, now_ms);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(socket = %self.local_addr, error = %e, "Receive error");
                    break;
                }
            }
        }
    }

    /// Classify, filter, and dispatch one received packet
    pub fn process_packet(&self, mut pkt: Box<Packet>, from: SocketAddr, now_ms: u64) {
        // Only the stream source originates Sender Reports; pure receiver
        // reports or garbage on the RTCP port are discarded outright
        if self.direction == Direction::Rtcp && pkt.rtcp_packet_type() != RTCP_SENDER_REPORT {
            self.pool.recycle(pkt);
            return;
        }

        let target = {
            let mut inner = self.inner.lock().unwrap();
            let SocketInner { bindings, epochs } = &mut *inner;

            let Some(binding) = find_binding(bindings, from.ip()) else {
                tracing::trace!(socket = %self.local_addr, from = %from, "No stream for source");
                self.pool.recycle(pkt);
                return;
            };

            if !binding
                .filter
                .accept(pkt.ssrc(), now_ms, self.config.ssrc_timeout_ms())
            {
                pkt.truncate(0);
            } else if self.direction == Direction::Rtp && self.config.trust_packet_time {
                normalize_arrival(&mut pkt, epochs, now_ms, &self.config);
            }

            binding.stream.upgrade()
        };

        let Some(stream) = target else {
            self.pool.recycle(pkt);
            return;
        };
        if pkt.is_empty() {
            self.pool.recycle(pkt);
            return;
        }

        if self.direction == Direction::Rtcp {
            stream.learn_rtcp_source(from);
        }
        stream.ingest(pkt);
    }

    /// Drive this socket on a tokio task: run a pass whenever the socket
    /// becomes readable or the aggregate wake time expires
    ///
    /// Abort the returned handle to stop driving.
    pub fn spawn_driver(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let socket = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = crate::clock::now_ms();
                let wake = socket.run_pass(now);
                let delay = wake.saturating_sub(now).max(1);
                tokio::select! {
                    ready = socket.socket.readable() => {
                        if ready.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay)) => {}
                }
            }
        })
    }
}

fn find_binding(bindings: &mut [Binding], ip: IpAddr) -> Option<&mut Binding> {
    if let Some(i) = bindings.iter().position(|b| b.source == Some(ip)) {
        return bindings.get_mut(i);
    }
    if let Some(i) = bindings.iter().position(|b| b.source.is_none()) {
        return bindings.get_mut(i);
    }
    None
}

/// Rewrite the packet's arrival time from the sender-side wall-clock tag
/// appended to the payload, normalized against a per-SSRC epoch and clamped
/// to the configured future skew; the tag itself is stripped
fn normalize_arrival(
    pkt: &mut Packet,
    epochs: &mut HashMap<u32, TagEpoch>,
    now_ms: u64,
    config: &ReflectorConfig,
) {
    let len = pkt.len();
    if len < 12 + TIME_TAG_LEN {
        return;
    }

    let data = pkt.data();
    let mut tag_bytes = [0u8; TIME_TAG_LEN];
    tag_bytes.copy_from_slice(&data[len - TIME_TAG_LEN..]);
    let tag = u64::from_be_bytes(tag_bytes);

    let epoch = epochs.entry(pkt.ssrc()).or_insert(TagEpoch {
        tag0: tag,
        local0: now_ms,
    });
    let offset = tag as i64 - epoch.tag0 as i64;
    let arrival = (epoch.local0 as i64 + offset).max(0) as u64;
    let cap = now_ms + config.max_future_skew_ms();

    pkt.set_arrival_ms(arrival.min(cap));
    pkt.truncate(len - TIME_TAG_LEN);
}
