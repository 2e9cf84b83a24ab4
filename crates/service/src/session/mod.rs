//! Session table.
//!
//! A session is created the first time a relay sees a valid route token
//! for a given `session_id`, refreshed on every continue token, and
//! removed either lazily (the next lookup after expiry) or by the
//! background sweep thread, whichever happens first. The table itself
//! never blocks forwarding on the sweep: lookups take a read lock, the
//! sweep only takes a write lock once a second.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use ahash::AHasher;
use parking_lot::{Mutex, RwLock};
use zeroize::Zeroize;

use relay_codec::Address;

use crate::envelope::Envelope;
use crate::replay::ReplayWindow;

type Table<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

/// One direction of a session's routing state: the hop a packet arrived
/// from and the hop it should be forwarded to next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub address: Address,
    pub internal: bool,
}

impl Hop {
    pub const NONE: Hop = Hop {
        address: Address::None,
        internal: false,
    };
}

/// Live routing state for one session, keyed by `session_id` in
/// [`SessionTable`]. Fields that change on every packet (replay windows)
/// live behind their own locks so a refresh never blocks forwarding on an
/// unrelated session.
pub struct Session {
    pub session_id: u64,
    pub session_version: RwLock<u8>,
    pub private_key: [u8; 32],
    pub kbps_up: AtomicU64,
    pub kbps_down: AtomicU64,
    pub prev_hop: RwLock<Hop>,
    pub next_hop: RwLock<Hop>,
    pub expire_timestamp: AtomicU64,
    pub client_to_server_replay: Mutex<ReplayWindow>,
    pub server_to_client_replay: Mutex<ReplayWindow>,
    pub client_to_server_envelope: Envelope,
    pub server_to_client_envelope: Envelope,
    pub created_at: u64,
}

impl Session {
    pub fn new(
        session_id: u64,
        session_version: u8,
        private_key: [u8; 32],
        kbps_up: u32,
        kbps_down: u32,
        expire_timestamp: u64,
        now: u64,
    ) -> Self {
        Self {
            session_id,
            session_version: RwLock::new(session_version),
            private_key,
            kbps_up: AtomicU64::new(kbps_up as u64),
            kbps_down: AtomicU64::new(kbps_down as u64),
            prev_hop: RwLock::new(Hop::NONE),
            next_hop: RwLock::new(Hop::NONE),
            expire_timestamp: AtomicU64::new(expire_timestamp),
            client_to_server_replay: Mutex::new(ReplayWindow::new()),
            server_to_client_replay: Mutex::new(ReplayWindow::new()),
            client_to_server_envelope: Envelope::new(kbps_up),
            server_to_client_envelope: Envelope::new(kbps_down),
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expire_timestamp.load(Ordering::Relaxed)
    }

    pub fn refresh(&self, expire_timestamp: u64, session_version: u8) {
        self.expire_timestamp
            .store(expire_timestamp, Ordering::Relaxed);
        *self.session_version.write() = session_version;
    }

    pub fn set_next_hop(&self, address: Address, internal: bool) {
        *self.next_hop.write() = Hop { address, internal };
    }

    pub fn set_prev_hop(&self, address: Address, internal: bool) {
        *self.prev_hop.write() = Hop { address, internal };
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

pub struct SessionTableOptions {
    pub capacity: usize,
    pub sweep_interval: Duration,
}

impl Default for SessionTableOptions {
    fn default() -> Self {
        Self {
            capacity: 4096,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Owns every active session and a background thread that sweeps expired
/// entries once a second. The sweep thread holds only a [`Weak`]
/// reference to the table, so dropping the last `Arc<SessionTable>` stops
/// it without any explicit shutdown signal.
pub struct SessionTable {
    sessions: RwLock<Table<u64, Arc<Session>>>,
    clock: AtomicU64,
}

impl SessionTable {
    pub fn new(options: SessionTableOptions) -> Arc<Self> {
        let this = Arc::new(Self {
            sessions: RwLock::new(Table::with_capacity_and_hasher(
                options.capacity,
                BuildHasherDefault::default(),
            )),
            clock: AtomicU64::new(0),
        });

        let weak: Weak<Self> = Arc::downgrade(&this);
        thread::Builder::new()
            .name("session-sweep".into())
            .spawn(move || {
                while let Some(table) = weak.upgrade() {
                    thread::sleep(options.sweep_interval);
                    table.sweep();
                }
            })
            .expect("failed to spawn session sweep thread");

        this
    }

    /// Router-time seconds, advanced by the caller (`set_clock`) from the
    /// clock anchor the router hands out on init (§3 Clock). Sessions
    /// expire against this value, not wall-clock `SystemTime`, so a
    /// relay with no synchronized clock still expires sessions
    /// consistently with the rest of the mesh.
    pub fn set_clock(&self, now: u64) {
        self.clock.store(now, Ordering::Relaxed);
    }

    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.write().insert(session.session_id, session);
    }

    /// Lazy expiry: a lookup for an expired session removes it and
    /// returns `None`, so forwarding never routes traffic through a
    /// session the sweep thread hasn't gotten to yet.
    pub fn get(&self, session_id: u64) -> Option<Arc<Session>> {
        let now = self.clock();
        let session = self.sessions.read().get(&session_id).cloned()?;
        if session.is_expired(now) {
            self.sessions.write().remove(&session_id);
            return None;
        }

        Some(session)
    }

    pub fn remove(&self, session_id: u64) {
        self.sessions.write().remove(&session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every live session's envelope allowance, reported on the
    /// router heartbeat as the relay's current kbps-up/kbps-down load.
    pub fn total_envelope_kbps(&self) -> (u64, u64) {
        self.sessions.read().values().fold((0, 0), |(up, down), session| {
            (
                up + session.kbps_up.load(Ordering::Relaxed),
                down + session.kbps_down.load(Ordering::Relaxed),
            )
        })
    }

    fn sweep(&self) {
        let now = self.clock();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            log::debug!("session sweep removed {removed} expired session(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u64, expire: u64) -> Arc<Session> {
        Arc::new(Session::new(id, 0, [0; 32], 0, 0, expire, 0))
    }

    #[test]
    fn lazy_lookup_removes_expired_session() {
        let table = SessionTable::new(SessionTableOptions {
            capacity: 8,
            sweep_interval: Duration::from_secs(3600),
        });

        table.insert(session(1, 10));
        table.set_clock(5);
        assert!(table.get(1).is_some());

        table.set_clock(20);
        assert!(table.get(1).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn refresh_extends_expiry() {
        let table = SessionTable::new(SessionTableOptions {
            capacity: 8,
            sweep_interval: Duration::from_secs(3600),
        });

        table.insert(session(1, 10));
        table.set_clock(5);
        let s = table.get(1).unwrap();
        s.refresh(100, 1);

        table.set_clock(50);
        assert!(table.get(1).is_some());
    }

    #[test]
    fn hops_default_to_none() {
        let s = session(1, 10);
        assert_eq!(*s.next_hop.read(), Hop::NONE);
        assert_eq!(*s.prev_hop.read(), Hop::NONE);
    }
}
