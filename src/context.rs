//! Shared state handed to every receive worker.
//!
//! One `Context` is built at startup and wrapped in an `Arc`; every
//! worker thread, the ping scheduler and the router heartbeat thread all
//! hold a clone of it. Nothing here is per-connection state -- that lives
//! in `relay_service::SessionTable` -- this is the process-wide stuff:
//! config, counters, the session/peer tables and the rotating magic.

use std::sync::Arc;

use parking_lot::RwLock;

use relay_service::{PeerTable, SessionTable};

use crate::clock::Clock;
use crate::config::Config;
use crate::counters::Counters;

/// The three magic values a relay accepts packets under at any moment.
/// The router hands out all three on every heartbeat rather than letting
/// this relay derive them locally: `current` is live now, `previous` is
/// still accepted for one extra cycle so a packet already in flight when
/// the rotation happens isn't spuriously dropped, and `upcoming` is
/// accepted early so a relay that hasn't heartbeat-ed yet this cycle
/// doesn't reject a peer that has. Checked in that order --
/// current, then previous, then upcoming -- per spec.md's match order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicTriple {
    pub current: [u8; 8],
    pub previous: [u8; 8],
    pub upcoming: [u8; 8],
}

impl MagicTriple {
    pub fn set(&mut self, previous: [u8; 8], current: [u8; 8], upcoming: [u8; 8]) {
        self.previous = previous;
        self.current = current;
        self.upcoming = upcoming;
    }
}

pub struct Context {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionTable>,
    pub peers: Arc<PeerTable>,
    pub counters: Arc<Counters>,
    pub clock: Arc<Clock>,
    pub magic: RwLock<MagicTriple>,
    pub shutting_down: std::sync::atomic::AtomicBool,
    /// The relay token the router echoed back from `relay_init`, replayed
    /// on every `relay_update` so the router can recognize this relay
    /// across restarts without a persisted identity of its own.
    pub router_token: RwLock<[u8; 32]>,
}

impl Context {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionTable>,
        peers: Arc<PeerTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            peers,
            counters: Arc::new(Counters::new()),
            clock: Arc::new(Clock::new()),
            magic: RwLock::new(MagicTriple::default()),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
            router_token: RwLock::new([0u8; 32]),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }
}
