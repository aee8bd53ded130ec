//! Packet free pool
//!
//! Explicitly constructed and shared by reference between the sockets that
//! allocate packets and the streams that evict them; never a process-wide
//! singleton. Internally mutex-guarded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::packet::Packet;

/// Free-list of reusable [`Packet`]s
///
/// Packets are created lazily: `take` prefers the free list and allocates
/// only when it is empty. `recycle` resets and returns a packet. In steady
/// state the population stabilizes at the relay's high-water mark and no
/// further allocation happens.
#[derive(Debug)]
pub struct PacketPool {
    free: Mutex<Vec<Box<Packet>>>,
    allocated: AtomicUsize,
    prealloc: usize,
}

impl PacketPool {
    /// Create a pool that eagerly holds `prealloc` free packets
    pub fn new(prealloc: usize) -> Self {
        let free = (0..prealloc).map(|_| Box::new(Packet::new())).collect();
        Self {
            free: Mutex::new(free),
            allocated: AtomicUsize::new(prealloc),
            prealloc,
        }
    }

    /// Take a packet from the free list, allocating if none is available
    pub fn take(&self) -> Box<Packet> {
        if let Some(p) = self.free.lock().unwrap().pop() {
            return p;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Box::new(Packet::new())
    }

    /// Reset a packet and return it to the free list
    pub fn recycle(&self, mut packet: Box<Packet>) {
        packet.reset();
        self.free.lock().unwrap().push(packet);
    }

    /// Packets currently on the free list
    pub fn free_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// Packets ever allocated by this pool
    pub fn allocated_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Configured preallocation count
    pub fn prealloc(&self) -> usize {
        self.prealloc
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(64)
    }
}
