//! Monotonic millisecond clock
//!
//! Every engine entry point takes an explicit `now_ms` so passes are
//! deterministic under test; callers that do not keep their own clock can use
//! [`now_ms`], which measures from a process-wide epoch.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the first call in this process
pub fn now_ms() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}
