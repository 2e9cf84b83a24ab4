//! Per-session bandwidth envelope.
//!
//! Route tokens carry a `kbps_up` / `kbps_down` budget negotiated by the
//! session server. The reference relay tracks this but does not enforce
//! it; this one does, with a standard token bucket sized to absorb one
//! packet-train burst rather than metering byte-by-byte.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const BURST_MILLIS: i64 = 250;

/// Token bucket capped at `kbps * BURST_MILLIS / 8000` bytes, refilled at
/// `kbps` kilobits/sec. `last_refill` is behind a mutex because refill
/// needs a read-modify-write against wall-clock time; `tokens` alone
/// could be an atomic but the two must move together.
pub struct Envelope {
    kbps: AtomicI64,
    state: Mutex<State>,
}

struct State {
    tokens: i64,
    last_refill: Instant,
}

impl Envelope {
    pub fn new(kbps: u32) -> Self {
        let capacity = Self::capacity_for(kbps);
        Self {
            kbps: AtomicI64::new(kbps as i64),
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn capacity_for(kbps: u32) -> i64 {
        (kbps as i64) * 1000 / 8 * BURST_MILLIS / 1000
    }

    pub fn set_kbps(&self, kbps: u32) {
        self.kbps.store(kbps as i64, Ordering::Relaxed);
    }

    /// Returns `true` if `bytes` fit in the current budget and deducts
    /// them; `false` if the caller should drop or delay the packet.
    pub fn allow(&self, bytes: usize) -> bool {
        let kbps = self.kbps.load(Ordering::Relaxed);
        if kbps <= 0 {
            // Unlimited: a route token with kbps == 0 means "no cap negotiated".
            return true;
        }

        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let elapsed_millis = now.duration_since(state.last_refill).as_millis() as i64;
        if elapsed_millis > 0 {
            let refill = kbps * 1000 / 8 * elapsed_millis / 1000;
            let capacity = Self::capacity_for(kbps as u32);
            state.tokens = (state.tokens + refill).min(capacity);
            state.last_refill = now;
        }

        if state.tokens >= bytes as i64 {
            state.tokens -= bytes as i64;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn unlimited_kbps_always_allows() {
        let e = Envelope::new(0);
        assert!(e.allow(1_000_000));
    }

    #[test]
    fn burst_within_capacity_is_allowed() {
        let e = Envelope::new(8000); // 1000 bytes/ms, 250ms burst => 250_000 bytes
        assert!(e.allow(100_000));
    }

    #[test]
    fn exceeding_capacity_is_rejected() {
        let e = Envelope::new(8);
        assert!(!e.allow(10_000));
    }

    #[test]
    fn tokens_refill_over_time() {
        let e = Envelope::new(8000);
        assert!(e.allow(250_000));
        assert!(!e.allow(1));
        sleep(Duration::from_millis(20));
        assert!(e.allow(1));
    }
}
