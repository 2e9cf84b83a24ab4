//! Observability counters.
//!
//! The reference relay keeps one named atomic per `(packet type, drop or
//! forward reason)` pair -- on the order of 150 distinct counters. Rather
//! than hand-declare 150 atomics, this keeps the same addressable shape
//! (every counter is still independently readable by name) as a flat
//! array indexed by `packet_type * reasons + reason`, which is both
//! cheaper to extend and impossible to get out of sync with the packet
//! type list in `relay_codec::PacketType`.

use std::sync::atomic::{AtomicU64, Ordering};

use relay_codec::PacketType;

/// Why a packet was counted: either it made progress (`Received`,
/// `ForwardedTo*Hop`) or it was dropped at a specific stage of the
/// forwarding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Reason {
    Received = 0,
    FilteredOut,
    BadPacketLength,
    CouldNotReadToken,
    TokenExpired,
    CouldNotFindSession,
    AlreadyReceived,
    HeaderDidNotVerify,
    BandwidthLimited,
    ForwardedToNextHop,
    ForwardedToPrevHop,
    ForwardFailed,
}

impl Reason {
    pub const ALL: [Reason; 12] = [
        Reason::Received,
        Reason::FilteredOut,
        Reason::BadPacketLength,
        Reason::CouldNotReadToken,
        Reason::TokenExpired,
        Reason::CouldNotFindSession,
        Reason::AlreadyReceived,
        Reason::HeaderDidNotVerify,
        Reason::BandwidthLimited,
        Reason::ForwardedToNextHop,
        Reason::ForwardedToPrevHop,
        Reason::ForwardFailed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Reason::Received => "received",
            Reason::FilteredOut => "filtered_out",
            Reason::BadPacketLength => "bad_packet_length",
            Reason::CouldNotReadToken => "could_not_read_token",
            Reason::TokenExpired => "token_expired",
            Reason::CouldNotFindSession => "could_not_find_session",
            Reason::AlreadyReceived => "already_received",
            Reason::HeaderDidNotVerify => "header_did_not_verify",
            Reason::BandwidthLimited => "bandwidth_limited",
            Reason::ForwardedToNextHop => "forwarded_to_next_hop",
            Reason::ForwardedToPrevHop => "forwarded_to_prev_hop",
            Reason::ForwardFailed => "forward_failed",
        }
    }
}

const NUM_REASONS: usize = Reason::ALL.len();
const NUM_PACKET_TYPES: usize = PacketType::ALL.len();

fn packet_type_index(packet_type: PacketType) -> usize {
    PacketType::ALL
        .iter()
        .position(|t| *t == packet_type)
        .expect("PacketType::ALL is exhaustive")
}

/// Flat table of `packet_type * reason` atomics. Lookup is a multiply and
/// an array index, cheap enough to call on every packet without it
/// showing up as measurable overhead.
pub struct Counters {
    cells: Vec<AtomicU64>,
}

impl Counters {
    pub fn new() -> Self {
        let mut cells = Vec::with_capacity(NUM_PACKET_TYPES * NUM_REASONS);
        cells.resize_with(NUM_PACKET_TYPES * NUM_REASONS, || AtomicU64::new(0));
        Self { cells }
    }

    fn index(packet_type: PacketType, reason: Reason) -> usize {
        packet_type_index(packet_type) * NUM_REASONS + reason as usize
    }

    pub fn incr(&self, packet_type: PacketType, reason: Reason) {
        self.cells[Self::index(packet_type, reason)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, packet_type: PacketType, reason: Reason) -> u64 {
        self.cells[Self::index(packet_type, reason)].load(Ordering::Relaxed)
    }

    /// Every nonzero `(packet_type, reason, count)` triple, for logging or
    /// an eventual metrics export.
    pub fn snapshot(&self) -> Vec<(PacketType, Reason, u64)> {
        let mut out = Vec::new();
        for packet_type in PacketType::ALL {
            for reason in Reason::ALL {
                let value = self.get(packet_type, reason);
                if value > 0 {
                    out.push((packet_type, reason, value));
                }
            }
        }
        out
    }

    /// Every cell in index order, dense (including zeros). This is the
    /// "full counter array" the router heartbeat reports, as distinct from
    /// [`Counters::snapshot`] which is for local logging.
    pub fn dense(&self) -> Vec<u64> {
        self.cells.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_are_independent_per_cell() {
        let counters = Counters::new();
        counters.incr(PacketType::RouteRequest, Reason::Received);
        counters.incr(PacketType::RouteRequest, Reason::Received);
        counters.incr(PacketType::RouteResponse, Reason::Received);

        assert_eq!(counters.get(PacketType::RouteRequest, Reason::Received), 2);
        assert_eq!(counters.get(PacketType::RouteResponse, Reason::Received), 1);
        assert_eq!(counters.get(PacketType::RouteRequest, Reason::TokenExpired), 0);
    }

    #[test]
    fn snapshot_only_reports_nonzero_cells() {
        let counters = Counters::new();
        counters.incr(PacketType::ContinueRequest, Reason::CouldNotFindSession);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, PacketType::ContinueRequest);
        assert_eq!(snapshot[0].1, Reason::CouldNotFindSession);
        assert_eq!(snapshot[0].2, 1);
    }
}
