//! Pooled UDP socket pairs
//!
//! Socket pairs are keyed by destination address/port, so several unrelated
//! broadcasts pushed to the same port share one pair and are pulled apart by
//! the per-socket demultiplexer (source IP). Direct (TCP-push) transports
//! get a private, unshared pair instead.
//!
//! The pool is an explicitly constructed object passed by reference, never
//! a process-wide singleton; it is internally mutex-guarded and safe to
//! share across worker threads.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::ReflectorConfig;
use crate::error::{Error, Result};
use crate::packet::PacketPool;

use super::ReflectorSocket;

/// Attempts at finding an adjacent even/odd ephemeral port pair
const PRIVATE_PAIR_ATTEMPTS: usize = 40;

/// An RTP socket and its odd-port RTCP companion
pub struct SocketPair {
    pub rtp: Arc<ReflectorSocket>,
    pub rtcp: Arc<ReflectorSocket>,
}

/// Allocator for shared socket pairs
pub struct SocketPool {
    packet_pool: Arc<PacketPool>,
    shared: Mutex<HashMap<SocketAddr, Weak<SocketPair>>>,
}

impl SocketPool {
    /// Create a pool whose sockets draw packets from `packet_pool`
    pub fn new(packet_pool: Arc<PacketPool>) -> Self {
        Self {
            packet_pool,
            shared: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the socket pair for a destination, creating and binding it
    /// on first use
    ///
    /// Joins the multicast group and applies the configured TTL when the
    /// destination is multicast. The pair stays alive as long as any stream
    /// holds it; a later acquire for the same destination returns the same
    /// pair. Must be called from within a tokio runtime.
    pub fn acquire(&self, dest: SocketAddr, config: &ReflectorConfig) -> Result<Arc<SocketPair>> {
        let mut shared = self.shared.lock().unwrap();
        shared.retain(|_, pair| pair.strong_count() > 0);

        if let Some(pair) = shared.get(&dest).and_then(Weak::upgrade) {
            return Ok(pair);
        }

        let pair = Arc::new(self.create_pair(dest, config)?);
        shared.insert(dest, Arc::downgrade(&pair));
        tracing::info!(dest = %dest, "Socket pair bound");
        Ok(pair)
    }

    /// Allocate a private, unshared pair on an ephemeral even/odd port pair
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire_private(&self, config: &ReflectorConfig) -> Result<Arc<SocketPair>> {
        for _ in 0..PRIVATE_PAIR_ATTEMPTS {
            let probe = match std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let port = match probe.local_addr() {
                Ok(addr) => addr.port() & !1,
                Err(_) => continue,
            };
            drop(probe);
            if port == 0 {
                continue;
            }

            let dest = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            if let Ok(pair) = self.create_pair(dest, config) {
                tracing::debug!(port = port, "Private socket pair bound");
                return Ok(Arc::new(pair));
            }
        }
        Err(Error::PortPairExhausted)
    }

    /// Pairs currently tracked (live shared pairs)
    pub fn shared_count(&self) -> usize {
        let mut shared = self.shared.lock().unwrap();
        shared.retain(|_, pair| pair.strong_count() > 0);
        shared.len()
    }

    fn create_pair(&self, dest: SocketAddr, config: &ReflectorConfig) -> Result<SocketPair> {
        let rtp = self.bind_socket(dest, dest.port(), config)?;
        let rtcp = self.bind_socket(dest, dest.port().wrapping_add(1), config)?;
        Ok(SocketPair { rtp, rtcp })
    }

    fn bind_socket(
        &self,
        dest: SocketAddr,
        port: u16,
        config: &ReflectorConfig,
    ) -> Result<Arc<ReflectorSocket>> {
        let bind_addr: SocketAddr = match dest.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, port).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, port).into(),
        };

        let domain = Domain::for_address(bind_addr);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&bind_addr.into())
            .map_err(|source| Error::Bind {
                addr: bind_addr,
                source,
            })?;

        if dest.ip().is_multicast() {
            match dest.ip() {
                IpAddr::V4(group) => {
                    socket
                        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                        .map_err(|source| Error::MulticastJoin {
                            group: dest.ip(),
                            source,
                        })?;
                    socket.set_multicast_ttl_v4(config.multicast_ttl)?;
                }
                IpAddr::V6(group) => {
                    socket
                        .join_multicast_v6(&group, 0)
                        .map_err(|source| Error::MulticastJoin {
                            group: dest.ip(),
                            source,
                        })?;
                }
            }
        }

        ReflectorSocket::new(socket.into(), Arc::clone(&self.packet_pool), config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Direction;

    fn pool() -> SocketPool {
        SocketPool::new(Arc::new(PacketPool::new(4)))
    }

    #[tokio::test]
    async fn test_private_pair_ports_adjacent() {
        let pool = pool();
        let pair = pool.acquire_private(&ReflectorConfig::default()).unwrap();

        let rtp_port = pair.rtp.local_addr().port();
        let rtcp_port = pair.rtcp.local_addr().port();
        assert_eq!(rtp_port % 2, 0);
        assert_eq!(rtcp_port, rtp_port + 1);
        assert_eq!(pair.rtp.direction(), Direction::Rtp);
        assert_eq!(pair.rtcp.direction(), Direction::Rtcp);
    }

    #[tokio::test]
    async fn test_private_pairs_not_pooled() {
        let pool = pool();
        let a = pool.acquire_private(&ReflectorConfig::default()).unwrap();
        let b = pool.acquire_private(&ReflectorConfig::default()).unwrap();

        assert_ne!(a.rtp.local_addr().port(), b.rtp.local_addr().port());
        assert_eq!(pool.shared_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_pair_reused_by_destination() {
        let pool = pool();
        let config = ReflectorConfig::default();

        // Find a usable even port first
        let probe = pool.acquire_private(&config).unwrap();
        let port = probe.rtp.local_addr().port();
        drop(probe);

        let dest: SocketAddr = SocketAddr::from(([127, 0, 0, 1], port));
        let a = pool.acquire(dest, &config).unwrap();
        let b = pool.acquire(dest, &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.shared_count(), 1);

        // Dropping all holders releases the pair
        drop(a);
        drop(b);
        assert_eq!(pool.shared_count(), 0);
    }
}
