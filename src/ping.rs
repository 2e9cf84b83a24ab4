//! Relay-to-relay ping mesh.
//!
//! Every known peer is pinged once every `PING_INTERVAL_SECONDS` on a
//! dedicated scheduler thread, staggered across peers by
//! `relay_service::PeerTable::sync`'s linear spread so a peer-list change
//! doesn't put every peer in lockstep; replies update that peer's ping history in
//! `relay_service::PeerTable`, from which RTT/jitter/loss stats are
//! derived on demand (e.g. for the next router heartbeat). Ping packets
//! use the same frame shape as session traffic but are authenticated
//! with a per-peer X25519 shared secret rather than a session key, since
//! there is no session between two relays -- just a standing mesh link.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relay_codec::filter::{CHONKLE_BYTES, PITTLE_BYTES};
use relay_codec::packet::HEADER_BYTES;
use relay_codec::{crypto, Address, Header, PacketType};

/// How often the scheduler loop wakes to check for due pings. Finer than
/// `PING_INTERVAL_SECONDS` itself so the per-peer linear spread
/// (`PeerTable::sync`) actually staggers sends instead of collapsing back
/// to one tick per interval.
const SCHEDULER_TICK_SECONDS: f64 = 0.02;

use crate::context::Context;
use crate::counters::Reason;
use crate::forwarding::Action;

fn own_internal_address(ctx: &Context) -> SocketAddr {
    ctx.config.server.internal_bind
}

/// Builds one framed mesh ping packet: `sequence` goes in the 8-byte
/// payload, authenticated (not encrypted) by `shared_key`.
fn build_ping_packet(
    ctx: &Context,
    packet_type: PacketType,
    shared_key: &[u8; 32],
    sequence: u64,
    to: SocketAddr,
) -> Vec<u8> {
    let payload = sequence.to_le_bytes();
    let tag = crypto::seal_header(shared_key, packet_type as u8, sequence, 0, 0);
    let header = Header {
        sequence,
        session_id: 0,
        session_version: 0,
        tag,
    };
    let header_bytes = header.encode();

    let body_len = 1 + CHONKLE_BYTES + HEADER_BYTES + payload.len() + PITTLE_BYTES;
    let mut out = vec![0u8; body_len];
    out[0] = packet_type as u8;
    out[1 + CHONKLE_BYTES..1 + CHONKLE_BYTES + HEADER_BYTES].copy_from_slice(&header_bytes);
    let payload_start = 1 + CHONKLE_BYTES + HEADER_BYTES;
    out[payload_start..payload_start + payload.len()].copy_from_slice(&payload);

    let magic = ctx.magic.read().current;
    let from_addr = Address::from(own_internal_address(ctx));
    let to_addr = Address::from(to);
    let (from_bytes, from_port) = from_addr.filter_bytes();
    let (to_bytes, to_port) = to_addr.filter_bytes();

    let chonkle = relay_codec::filter::generate_chonkle(
        &magic,
        &from_bytes,
        from_port,
        &to_bytes,
        to_port,
        body_len as u32,
    );
    out[1..1 + CHONKLE_BYTES].copy_from_slice(&chonkle);

    let pittle = relay_codec::filter::generate_pittle(&from_bytes, from_port, &to_bytes, to_port, body_len as u32);
    let tail = out.len() - PITTLE_BYTES;
    out[tail..].copy_from_slice(&pittle);

    out
}

/// Handles an inbound mesh ping request or response once it has already
/// passed the ingress filter and frame parsing in `forwarding::dispatch`.
pub fn handle_mesh_ping(
    ctx: &Context,
    from: SocketAddr,
    packet_type: PacketType,
    header: &Header,
    payload: &[u8],
) -> Action {
    let from_address = Address::from(from);
    let Some(peer) = ctx.peers.get(&from_address) else {
        ctx.counters.incr(packet_type, Reason::CouldNotFindSession);
        return Action::Drop;
    };

    if crypto::verify_header(&peer.shared_key, packet_type as u8, header.sequence, 0, 0, &header.tag).is_err() {
        ctx.counters.incr(packet_type, Reason::HeaderDidNotVerify);
        return Action::Drop;
    }

    match packet_type {
        PacketType::RelayPing => {
            let bytes = build_ping_packet(ctx, PacketType::RelayPong, &peer.shared_key, header.sequence, from);
            Action::SendInternal { to: from, bytes }
        }
        PacketType::RelayPong => {
            if let Some(sequence_bytes) = payload.get(..8) {
                let sequence = u64::from_le_bytes(sequence_bytes.try_into().unwrap());
                peer.record_pong_received(sequence, ctx.clock.now_f64());
            }
            Action::Drop
        }
        _ => Action::Drop,
    }
}

/// Spawns the background thread that checks every known peer for a due
/// ping on each `SCHEDULER_TICK_SECONDS` wakeup. Stops when `ctx` is
/// dropped everywhere else and the weak upgrade fails, mirroring the
/// session table's sweep thread.
pub fn spawn_scheduler(ctx: Arc<Context>, socket: Arc<std::net::UdpSocket>) {
    let weak = Arc::downgrade(&ctx);
    thread::Builder::new()
        .name("ping-scheduler".into())
        .spawn(move || {
            while let Some(ctx) = weak.upgrade() {
                if ctx.is_shutting_down() {
                    break;
                }

                let now = ctx.clock.now_f64();
                for peer in ctx.peers.iter_snapshot() {
                    if !peer.is_ping_due(now) {
                        continue;
                    }

                    let Ok(to) = SocketAddr::try_from(peer.address) else {
                        continue;
                    };

                    let sequence = peer.record_ping_sent(now);
                    let bytes = build_ping_packet(&ctx, PacketType::RelayPing, &peer.shared_key, sequence, to);

                    if let Err(e) = socket.send_to(&bytes, to) {
                        log::debug!("failed to send mesh ping to {to}: {e}");
                    }
                }

                drop(ctx);
                thread::sleep(Duration::from_secs_f64(SCHEDULER_TICK_SECONDS));
            }
        })
        .expect("failed to spawn ping scheduler thread");
}

