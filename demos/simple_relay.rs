//! Simple one-stream relay example
//!
//! Run with: cargo run --example simple_relay [RTP_PORT]
//!
//! Examples:
//!   cargo run --example simple_relay            # listens on 0.0.0.0:5004/5005
//!   cargo run --example simple_relay 6000       # listens on 0.0.0.0:6000/6001
//!
//! ## Feeding it
//!
//! With ffmpeg (H.264 over RTP):
//!   ffmpeg -re -i input.mp4 -an -c:v libx264 -f rtp rtp://127.0.0.1:5004
//!
//! Every received packet is reflected to the forwarding outputs registered
//! below (two plain UDP forwarders in different stagger buckets), and the
//! source gets a receiver report with the live eye count every 5 seconds.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtp_reflector::{
    Direction, MediaKind, Packet, PacketPool, ReflectorConfig, ReflectorOutput, ReflectorStream,
    SocketPool, StreamId, WriteFlags, WriteOutcome,
};

/// Forwards every packet to a fixed downstream address over UDP
struct UdpForwarder {
    socket: std::net::UdpSocket,
    dest: SocketAddr,
    sent: AtomicU64,
}

impl UdpForwarder {
    fn new(dest: SocketAddr) -> std::io::Result<Self> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            dest,
            sent: AtomicU64::new(0),
        })
    }
}

impl ReflectorOutput for UdpForwarder {
    fn write_packet(
        &self,
        packet: &Packet,
        _stream: StreamId,
        flags: WriteFlags,
        _lateness_ms: i64,
    ) -> WriteOutcome {
        if flags.direction == Direction::Rtcp {
            return WriteOutcome::Sent;
        }
        match self.socket.send_to(packet.data(), self.dest) {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                WriteOutcome::Sent
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                WriteOutcome::WouldBlock { retry_in_ms: None }
            }
            Err(_) => WriteOutcome::Failed,
        }
    }

    fn is_playing(&self) -> bool {
        true
    }

    fn teardown(&self) {
        tracing::info!(dest = %self.dest, sent = self.sent.load(Ordering::Relaxed), "Forwarder done");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let rtp_port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(5004);

    let config = ReflectorConfig::default();
    let packets = Arc::new(PacketPool::new(config.packet_pool_prealloc));
    let sockets = SocketPool::new(packets.clone());

    let stream = Arc::new(ReflectorStream::new(
        1,
        MediaKind::Video,
        config.clone(),
        packets,
    ));

    let dest: SocketAddr = ([0, 0, 0, 0], rtp_port).into();
    stream.bind_sockets(&sockets, dest, None)?;

    // Two forwarders in different buckets: the second sees every packet
    // with an extra bucket_delay of accounted lateness
    let near = Arc::new(UdpForwarder::new("127.0.0.1:5204".parse()?)?);
    let far = Arc::new(UdpForwarder::new("127.0.0.1:5206".parse()?)?);
    stream.add_output(near, Some(0));
    stream.add_output(far, Some(1));

    let pair = sockets.acquire(dest, &config)?;
    let rtp_driver = pair.rtp.spawn_driver();
    let rtcp_driver = pair.rtcp.spawn_driver();
    tracing::info!(port = rtp_port, "Relay listening");

    tokio::signal::ctrl_c().await?;
    rtp_driver.abort();
    rtcp_driver.abort();
    stream.teardown();
    Ok(())
}
