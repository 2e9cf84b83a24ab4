//! Router-time clock anchor.
//!
//! `relay_init` hands back the router's notion of the current time; the
//! relay anchors that value against its own monotonic clock and derives
//! every subsequent timestamp (session expiry, ping history, counters
//! reporting) from the anchor rather than `SystemTime::now()`, so a relay
//! with a skewed wall clock still agrees with the rest of the mesh about
//! how much time has passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Clock {
    anchor_router_time: AtomicU64,
    anchor_instant: Instant,
}

impl Clock {
    /// Anchored at construction time to `router_time == 0`; call
    /// [`Clock::anchor`] once `relay_init` returns the real value.
    pub fn new() -> Self {
        Self {
            anchor_router_time: AtomicU64::new(0),
            anchor_instant: Instant::now(),
        }
    }

    pub fn anchor(&self, router_time: u64) {
        self.anchor_router_time.store(router_time, Ordering::Relaxed);
    }

    /// Current router time, in whole seconds.
    pub fn now(&self) -> u64 {
        let anchor = self.anchor_router_time.load(Ordering::Relaxed);
        anchor + self.anchor_instant.elapsed().as_secs()
    }

    /// Current router time, fractional seconds, for the ping mesh's RTT
    /// math which needs sub-second resolution.
    pub fn now_f64(&self) -> f64 {
        let anchor = self.anchor_router_time.load(Ordering::Relaxed);
        anchor as f64 + self.anchor_instant.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_tracks_from_anchor() {
        let clock = Clock::new();
        clock.anchor(1_000_000);
        assert!(clock.now() >= 1_000_000);
    }
}
