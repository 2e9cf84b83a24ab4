//! Relay-to-relay ping mesh: per-peer ping history and derived stats.
//!
//! Every function here takes the current time explicitly rather than
//! reading the clock itself, mirroring the reference relay's ping code
//! (which threads a `double current_time` through every call). That
//! keeps the stats math deterministic and unit-testable without a real
//! clock, and lets the caller use whatever monotonic source it already
//! maintains for the scheduler loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use relay_codec::Address;

/// Depth of the per-peer ping history ring. Matches the reference
/// relay's `RELAY_PING_HISTORY_ENTRY_COUNT`: at one ping every 0.1s this
/// covers 25.6 seconds, comfortably more than the 10s stats window below.
pub const PING_HISTORY_ENTRY_COUNT: usize = 256;

/// Width of the sliding window stats are computed over.
pub const STATS_WINDOW_SECONDS: f64 = 10.0;

/// A ping older than this without a reply is assumed lost rather than
/// merely in flight, matching the scheduler's own 0.1s ping interval plus
/// slack for a slow peer.
pub const PING_SAFETY_SECONDS: f64 = 1.0;

pub const PING_INTERVAL_SECONDS: f64 = 0.1;

#[derive(Clone, Copy, Debug)]
struct PingEntry {
    sequence: u64,
    send_time: f64,
    receive_time: Option<f64>,
}

/// RTT, jitter and packet loss derived from a peer's ping history over
/// the trailing [`STATS_WINDOW_SECONDS`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PeerStats {
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss: f64,
}

struct PingHistory {
    entries: Vec<Option<PingEntry>>,
    next_sequence: u64,
}

impl PingHistory {
    fn new() -> Self {
        Self {
            entries: vec![None; PING_HISTORY_ENTRY_COUNT],
            next_sequence: 0,
        }
    }

    fn slot(sequence: u64) -> usize {
        (sequence % PING_HISTORY_ENTRY_COUNT as u64) as usize
    }

    fn record_sent(&mut self, now: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries[Self::slot(sequence)] = Some(PingEntry {
            sequence,
            send_time: now,
            receive_time: None,
        });
        sequence
    }

    fn record_received(&mut self, sequence: u64, now: f64) {
        let slot = Self::slot(sequence);
        if let Some(entry) = self.entries[slot].as_mut() {
            if entry.sequence == sequence {
                entry.receive_time = Some(now);
            }
        }
    }

    /// RTT is the mean of received round trips in the window. Jitter is a
    /// one-sided measure: three times the RMS deviation of only the RTTs
    /// that sit at or above that mean, so a relay that occasionally gets a
    /// much *faster* hop than usual doesn't get charged jitter for it --
    /// only the slow tail counts. `packet_loss` is reported as a 0-100
    /// percentage, not a fraction. When no pong has landed in the window at
    /// all there's nothing to average, so this reports the same ceiling
    /// values the router treats as "this peer is unreachable": 10 second
    /// RTT, zero jitter, 100% loss.
    fn stats(&self, now: f64) -> PeerStats {
        let window_start = now - STATS_WINDOW_SECONDS;

        let mut rtts = Vec::new();
        let mut sent = 0usize;
        let mut lost = 0usize;

        for entry in self.entries.iter().flatten() {
            if entry.send_time < window_start || entry.send_time > now {
                continue;
            }

            sent += 1;
            match entry.receive_time {
                Some(receive_time) => rtts.push((receive_time - entry.send_time) * 1000.0),
                None => {
                    if now - entry.send_time > PING_SAFETY_SECONDS {
                        lost += 1;
                    }
                }
            }
        }

        if rtts.is_empty() {
            return PeerStats {
                rtt_ms: 10_000.0,
                jitter_ms: 0.0,
                packet_loss: 100.0,
            };
        }

        let mean = rtts.iter().sum::<f64>() / rtts.len() as f64;

        let (jitter_sum_sq, jitter_samples) = rtts
            .iter()
            .filter(|&&rtt| rtt >= mean)
            .fold((0.0_f64, 0usize), |(sum, n), rtt| (sum + (rtt - mean).powi(2), n + 1));
        let jitter = if jitter_samples > 0 {
            3.0 * (jitter_sum_sq / jitter_samples as f64).sqrt()
        } else {
            0.0
        };

        let packet_loss = if sent > 0 { 100.0 * lost as f64 / sent as f64 } else { 100.0 };

        PeerStats {
            rtt_ms: mean,
            jitter_ms: jitter,
            packet_loss,
        }
    }
}

/// One known peer relay: its ping history plus the cached stats derived
/// from it. Stats are recomputed on demand rather than on every received
/// pong, since the ping scheduler only needs a fresh figure once per
/// update cycle.
pub struct Peer {
    pub address: Address,
    pub internal: bool,
    /// X25519 shared secret with this peer, used to authenticate mesh
    /// ping headers. Computed once by the caller (which owns the crypto
    /// dependency) and handed in, so this crate never needs to know how
    /// it was derived.
    pub shared_key: [u8; 32],
    history: Mutex<PingHistory>,
    last_seen_sequence: AtomicU64,
    /// Next time this peer is due a ping. Seeded with a linear spread
    /// across `PING_INTERVAL_SECONDS` at construction so a peer-list
    /// change (every peer showing up in `PeerTable::sync` at once)
    /// doesn't make the scheduler ping every peer in the same instant.
    next_ping_due: Mutex<f64>,
}

impl Peer {
    pub fn new(address: Address, internal: bool, shared_key: [u8; 32], first_due: f64) -> Self {
        Self {
            address,
            internal,
            shared_key,
            history: Mutex::new(PingHistory::new()),
            last_seen_sequence: AtomicU64::new(u64::MAX),
            next_ping_due: Mutex::new(first_due),
        }
    }

    pub fn record_ping_sent(&self, now: f64) -> u64 {
        *self.next_ping_due.lock() = now + PING_INTERVAL_SECONDS;
        self.history.lock().record_sent(now)
    }

    pub fn record_pong_received(&self, sequence: u64, now: f64) {
        self.last_seen_sequence.store(sequence, Ordering::Relaxed);
        self.history.lock().record_received(sequence, now);
    }

    pub fn stats(&self, now: f64) -> PeerStats {
        self.history.lock().stats(now)
    }

    pub fn is_ping_due(&self, now: f64) -> bool {
        now >= *self.next_ping_due.lock()
    }
}

/// All known peer relays, keyed by their internal (relay-to-relay)
/// address.
pub struct PeerTable {
    peers: RwLock<HashMap<Address, std::sync::Arc<Peer>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the peer set with `addresses`, preserving ping history for
    /// peers that are still present. Called whenever a router heartbeat
    /// response (§4.H) delivers a refreshed peer list. New peers get a
    /// first ping due time linearly spread across `PING_INTERVAL_SECONDS`
    /// by their position in the incoming list, so a peer-list change
    /// doesn't put every new peer in lockstep with each other.
    pub fn sync(&self, peers_in: &[(Address, bool, [u8; 32])], now: f64) {
        let mut peers = self.peers.write();
        let mut next = HashMap::with_capacity(peers_in.len());
        let count = peers_in.len().max(1);
        for (i, &(address, internal, shared_key)) in peers_in.iter().enumerate() {
            let peer = peers.remove(&address).unwrap_or_else(|| {
                let spread = PING_INTERVAL_SECONDS * (i as f64 / count as f64);
                std::sync::Arc::new(Peer::new(address, internal, shared_key, now + spread))
            });
            next.insert(address, peer);
        }
        *peers = next;
    }

    pub fn get(&self, address: &Address) -> Option<std::sync::Arc<Peer>> {
        self.peers.read().get(address).cloned()
    }

    pub fn iter_snapshot(&self) -> Vec<std::sync::Arc<Peer>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Address {
        Address::V4 {
            octets: [10, 0, 0, 1],
            port,
        }
    }

    #[test]
    fn rtt_reflects_send_receive_gap() {
        let peer = Peer::new(addr(1), true, [0; 32], 0.0);
        let seq = peer.record_ping_sent(0.0);
        peer.record_pong_received(seq, 0.020);

        let stats = peer.stats(0.020);
        assert!((stats.rtt_ms - 20.0).abs() < 1e-6);
        assert_eq!(stats.packet_loss, 0.0);
    }

    #[test]
    fn unanswered_ping_past_safety_margin_counts_as_loss() {
        let peer = Peer::new(addr(1), true, [0; 32], 0.0);
        peer.record_ping_sent(0.0);

        let stats = peer.stats(0.0 + PING_SAFETY_SECONDS + 0.1);
        assert_eq!(stats.packet_loss, 100.0);
    }

    #[test]
    fn in_flight_ping_within_safety_margin_is_not_lost_yet() {
        let peer = Peer::new(addr(1), true, [0; 32], 0.0);
        peer.record_ping_sent(0.0);

        let stats = peer.stats(0.5);
        assert_eq!(stats.packet_loss, 0.0);
    }

    #[test]
    fn peer_table_sync_preserves_history_for_retained_peers() {
        let table = PeerTable::new();
        table.sync(&[(addr(1), true, [0; 32])], 0.0);
        let peer = table.get(&addr(1)).unwrap();
        let seq = peer.record_ping_sent(0.0);

        table.sync(&[(addr(1), true, [0; 32]), (addr(2), false, [0; 32])], 0.0);
        let same_peer = table.get(&addr(1)).unwrap();
        same_peer.record_pong_received(seq, 0.01);

        assert_eq!(table.len(), 2);
        assert!(same_peer.stats(0.01).rtt_ms > 0.0);
    }

    #[test]
    fn newly_synced_peers_are_spread_across_the_ping_interval() {
        let table = PeerTable::new();
        table.sync(
            &[(addr(1), true, [0; 32]), (addr(2), true, [0; 32]), (addr(3), true, [0; 32])],
            100.0,
        );

        let due_count = |now: f64| {
            [addr(1), addr(2), addr(3)]
                .iter()
                .filter(|a| table.get(a).unwrap().is_ping_due(now))
                .count()
        };

        // Immediately after sync, not every peer should be due at once.
        assert!(due_count(100.0) < 3);
        // By a full interval later, all of them are due.
        assert_eq!(due_count(100.0 + PING_INTERVAL_SECONDS), 3);
    }
}
