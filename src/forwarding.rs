//! Forwarding state machine.
//!
//! Every packet that survives the ingress filter (`relay_codec::filter`)
//! lands here. This module strips the wire framing, authenticates and
//! replay-checks the header against the session it claims to belong to,
//! and either establishes/refreshes that session (route and continue
//! requests) or forwards the payload on to the next hop (everything
//! else). Nothing here touches a socket directly -- `Action` describes
//! what the caller (a receive worker) should do, so this stays unit
//! testable without a real UDP socket.
//!
//! Framing is not uniform across packet types. Route request (9) and
//! continue request (15) carry raw sealed token bytes with no header at
//! all: a route request is a chain of one 116-byte sealed route token per
//! remaining hop, and a continue request is one 57-byte sealed continue
//! token followed by the same kind of chain for the hops after this one.
//! Near ping (20) carries an 8-byte sequence and an 8-byte session id with
//! neither header nor token. Everything else rides the 33-byte AEAD
//! header defined in `relay_codec::packet`.

use std::net::SocketAddr;

use relay_codec::filter::{CHONKLE_BYTES, PITTLE_BYTES};
use relay_codec::packet::HEADER_BYTES;
use relay_codec::{crypto, Address, ContinueToken, Header, PacketType, RouteToken};

use relay_service::session::Hop;
use relay_service::Session;

use crate::context::Context;
use crate::counters::Reason;

pub const PREFIX_BYTES: usize = 1 + CHONKLE_BYTES;
pub const SUFFIX_BYTES: usize = PITTLE_BYTES;
pub const MIN_PACKET_BYTES: usize = PREFIX_BYTES + SUFFIX_BYTES;

const SEALED_ROUTE_TOKEN_BYTES: usize = relay_codec::token::ROUTE_TOKEN_BYTES + crypto::TOKEN_BOX_OVERHEAD;
const SEALED_CONTINUE_TOKEN_BYTES: usize = relay_codec::token::CONTINUE_TOKEN_BYTES + crypto::TOKEN_BOX_OVERHEAD;
const NEAR_PING_BODY_BYTES: usize = 8 + 8;

/// What a receive worker should do after `dispatch` returns.
pub enum Action {
    /// Nothing to send; the packet was consumed, dropped or rejected.
    Drop,
    /// Send `bytes` to `to` on the internal (relay-to-relay) socket.
    SendInternal { to: SocketAddr, bytes: Vec<u8> },
    /// Send `bytes` to `to` on the public socket.
    SendPublic { to: SocketAddr, bytes: Vec<u8> },
}

/// The address this relay appears to send *from*, for chonkle/pittle
/// purposes: the bound socket matching which side of the mesh `hop` is
/// on. The receiving relay computes the same filter trailer using this
/// exact value as its observed source address, so the two must agree.
fn own_address(ctx: &Context, internal: bool) -> SocketAddr {
    if internal {
        ctx.config.server.internal_bind
    } else {
        ctx.config.server.bind
    }
}

fn send_towards(hop: Hop, bytes: Vec<u8>) -> Action {
    match std::net::SocketAddr::try_from(hop.address) {
        Ok(to) if hop.internal => Action::SendInternal { to, bytes },
        Ok(to) => Action::SendPublic { to, bytes },
        Err(_) => Action::Drop,
    }
}

/// Everything forwarding needs out of a packet's body, shaped differently
/// per packet type (see the module doc comment).
enum Body<'a> {
    Header { header: Header, payload: &'a [u8] },
    RawToken { payload: &'a [u8] },
    NearPing { ping_sequence: u64, session_id: u64 },
}

struct Framed<'a> {
    packet_type: PacketType,
    body: Body<'a>,
}

fn parse_frame(data: &[u8]) -> Option<Framed<'_>> {
    if data.len() < MIN_PACKET_BYTES {
        return None;
    }

    let packet_type = PacketType::try_from(data[0]).ok()?;
    let body = &data[PREFIX_BYTES..data.len() - SUFFIX_BYTES];

    let body = match packet_type {
        PacketType::RouteRequest | PacketType::ContinueRequest => Body::RawToken { payload: body },
        PacketType::NearPing | PacketType::NearPong => {
            if body.len() < NEAR_PING_BODY_BYTES {
                return None;
            }
            let ping_sequence = u64::from_le_bytes(body[0..8].try_into().ok()?);
            let session_id = u64::from_le_bytes(body[8..16].try_into().ok()?);
            Body::NearPing { ping_sequence, session_id }
        }
        _ => {
            if body.len() < HEADER_BYTES {
                return None;
            }
            let header = Header::decode(&body[..HEADER_BYTES]).ok()?;
            Body::Header {
                header,
                payload: &body[HEADER_BYTES..],
            }
        }
    };

    Some(Framed { packet_type, body })
}

/// Stamps `out`'s chonkle (bytes `1..16`) and pittle (final two bytes)
/// against the current magic and the concrete from/to addresses of this
/// specific hop. `out[0]` (the packet type) must already be set; this
/// only touches the filter trailer.
fn stamp_filter(ctx: &Context, hop: Hop, out: &mut [u8]) {
    let to = SocketAddr::try_from(hop.address).expect("caller already validated hop.address");
    let from = own_address(ctx, hop.internal);

    let magic = ctx.magic.read().current;
    let from_addr = Address::from(from);
    let to_addr = Address::from(to);
    let (from_bytes, from_port) = from_addr.filter_bytes();
    let (to_bytes, to_port) = to_addr.filter_bytes();
    let body_len = out.len() as u32;

    let chonkle = relay_codec::filter::generate_chonkle(&magic, &from_bytes, from_port, &to_bytes, to_port, body_len);
    out[1..1 + CHONKLE_BYTES].copy_from_slice(&chonkle);

    let pittle = relay_codec::filter::generate_pittle(&from_bytes, from_port, &to_bytes, to_port, body_len);
    let tail = out.len() - PITTLE_BYTES;
    out[tail..].copy_from_slice(&pittle);
}

/// Re-stamps a forwarded packet with a fresh header (new sequence number,
/// same session) and wraps it back in frame + chonkle/pittle for the next
/// hop.
fn reframe(
    ctx: &Context,
    packet_type: PacketType,
    session: &Session,
    sequence: u64,
    payload: &[u8],
    hop: Hop,
) -> Vec<u8> {
    let session_version = *session.session_version.read();
    let tag = crypto::seal_header(
        &session.private_key,
        packet_type as u8,
        sequence,
        session.session_id,
        session_version,
    );

    let header = Header {
        sequence,
        session_id: session.session_id,
        session_version,
        tag,
    };
    let header_bytes = header.encode();

    let body_len = 1 + CHONKLE_BYTES + HEADER_BYTES + payload.len() + PITTLE_BYTES;
    let mut out = vec![0u8; body_len];
    out[0] = packet_type as u8;
    out[1 + CHONKLE_BYTES..1 + CHONKLE_BYTES + HEADER_BYTES].copy_from_slice(&header_bytes);
    let payload_start = 1 + CHONKLE_BYTES + HEADER_BYTES;
    out[payload_start..payload_start + payload.len()].copy_from_slice(payload);

    stamp_filter(ctx, hop, &mut out);
    out
}

/// Re-frames a raw token chain for the next hop, with no header: used for
/// route and continue requests, which forward whatever sealed tokens are
/// left after this relay strips its own off the front.
fn reframe_raw(ctx: &Context, packet_type: PacketType, payload: &[u8], hop: Hop) -> Vec<u8> {
    let body_len = 1 + CHONKLE_BYTES + payload.len() + PITTLE_BYTES;
    let mut out = vec![0u8; body_len];
    out[0] = packet_type as u8;
    out[1 + CHONKLE_BYTES..1 + CHONKLE_BYTES + payload.len()].copy_from_slice(payload);

    stamp_filter(ctx, hop, &mut out);
    out
}

fn verify_and_replay_check(
    ctx: &Context,
    session: &Session,
    packet_type: PacketType,
    header: &Header,
    client_to_server: bool,
) -> bool {
    let session_version = *session.session_version.read();
    if crypto::verify_header(
        &session.private_key,
        packet_type as u8,
        header.sequence,
        header.session_id,
        session_version,
        &header.tag,
    )
    .is_err()
    {
        ctx.counters.incr(packet_type, Reason::HeaderDidNotVerify);
        return false;
    }

    let mut replay = if client_to_server {
        session.client_to_server_replay.lock()
    } else {
        session.server_to_client_replay.lock()
    };

    if !replay.check_and_update(header.sequence) {
        ctx.counters.incr(packet_type, Reason::AlreadyReceived);
        return false;
    }

    true
}

/// Entry point called by a receive worker for every packet that passed
/// the ingress filter. `from` is the socket address the packet arrived
/// from; `local_is_internal` tells us which socket (public vs internal)
/// received it, used to pick the response socket on route establishment.
pub fn dispatch(ctx: &Context, from: SocketAddr, local_is_internal: bool, data: &[u8]) -> Action {
    let Some(frame) = parse_frame(data) else {
        // Type 0 (Direct) is too short to carry a header and isn't
        // dispatched: it is a bare liveness probe, counted and dropped.
        if !data.is_empty() && data[0] == PacketType::Direct as u8 {
            ctx.counters.incr(PacketType::Direct, Reason::Received);
        }
        return Action::Drop;
    };

    ctx.counters.incr(frame.packet_type, Reason::Received);

    match (frame.packet_type, frame.body) {
        (PacketType::RouteRequest, Body::RawToken { payload }) => {
            handle_route_request(ctx, from, local_is_internal, payload)
        }
        (PacketType::ContinueRequest, Body::RawToken { payload }) => handle_continue_request(ctx, payload),
        (PacketType::NearPing, Body::NearPing { ping_sequence, session_id }) => {
            handle_near_ping(ctx, from, local_is_internal, ping_sequence, session_id)
        }
        (PacketType::NearPong, _) => Action::Drop,
        (PacketType::ClientToServer | PacketType::SessionPing, Body::Header { header, payload }) => {
            handle_session_forward(ctx, frame.packet_type, &header, payload, true)
        }
        (
            PacketType::ServerToClient | PacketType::SessionPong | PacketType::RouteResponse | PacketType::ContinueResponse,
            Body::Header { header, payload },
        ) => handle_session_forward(ctx, frame.packet_type, &header, payload, false),
        (PacketType::RelayPing | PacketType::RelayPong, Body::Header { header, payload }) => {
            crate::ping::handle_mesh_ping(ctx, from, frame.packet_type, &header, payload)
        }
        _ => Action::Drop,
    }
}

/// Module J: a near ping is stateless and carries no crypto of its own --
/// it exists so a client can measure RTT to the nearest relay before a
/// session even exists. Echoed straight back to whoever sent it as a near
/// pong, same sequence and session id, no session lookup involved.
fn handle_near_ping(
    ctx: &Context,
    from: SocketAddr,
    local_is_internal: bool,
    ping_sequence: u64,
    session_id: u64,
) -> Action {
    let body_len = 1 + CHONKLE_BYTES + NEAR_PING_BODY_BYTES + PITTLE_BYTES;
    let mut out = vec![0u8; body_len];
    out[0] = PacketType::NearPong as u8;
    let payload_start = 1 + CHONKLE_BYTES;
    out[payload_start..payload_start + 8].copy_from_slice(&ping_sequence.to_le_bytes());
    out[payload_start + 8..payload_start + 16].copy_from_slice(&session_id.to_le_bytes());

    let hop = Hop {
        address: Address::from(from),
        internal: local_is_internal,
    };
    stamp_filter(ctx, hop, &mut out);

    ctx.counters.incr(PacketType::NearPing, Reason::ForwardedToPrevHop);
    send_towards(hop, out)
}

/// The router's long-term box public key, the sender side of every route
/// and continue token this relay is handed.
fn router_box_public(ctx: &Context) -> crypto_box::PublicKey {
    crypto_box::PublicKey::from(ctx.config.router.router_public_key)
}

fn crypto_secret(ctx: &Context) -> crypto_box::SecretKey {
    crypto_box::SecretKey::from(ctx.config.router.relay_secret_key)
}

/// A route request's body is a chain of sealed route tokens, one per
/// remaining hop, 116 bytes each. This relay only ever owns the leading
/// one: opening it tells us where to send what's left, which is forwarded
/// byte-for-byte untouched -- the relays further down the chain can only
/// open their own token, not this one.
fn handle_route_request(ctx: &Context, from: SocketAddr, local_is_internal: bool, payload: &[u8]) -> Action {
    let Some(sealed_token) = payload.get(..SEALED_ROUTE_TOKEN_BYTES) else {
        ctx.counters
            .incr(PacketType::RouteRequest, Reason::CouldNotReadToken);
        return Action::Drop;
    };

    let Ok(cleartext) = crypto::open_token_box(sealed_token, &router_box_public(ctx), &crypto_secret(ctx)) else {
        ctx.counters
            .incr(PacketType::RouteRequest, Reason::CouldNotReadToken);
        return Action::Drop;
    };

    let Ok(token) = RouteToken::decode(&cleartext) else {
        ctx.counters
            .incr(PacketType::RouteRequest, Reason::CouldNotReadToken);
        return Action::Drop;
    };

    let remainder = &payload[SEALED_ROUTE_TOKEN_BYTES..];

    let now = ctx.clock.now();
    if token.expire_timestamp <= now {
        ctx.counters.incr(PacketType::RouteRequest, Reason::TokenExpired);
        return Action::Drop;
    }

    let session = std::sync::Arc::new(Session::new(
        token.session_id,
        token.session_version,
        token.session_private_key,
        token.kbps_up,
        token.kbps_down,
        token.expire_timestamp,
        now,
    ));
    session.set_prev_hop(Address::from(from), local_is_internal);
    session.set_next_hop(token.next_address, token.next_is_internal);
    ctx.sessions.insert(session.clone());

    let next_hop = Hop {
        address: token.next_address,
        internal: token.next_is_internal,
    };

    if std::net::SocketAddr::try_from(next_hop.address).is_err() {
        ctx.counters.incr(PacketType::RouteRequest, Reason::ForwardFailed);
        return Action::Drop;
    }

    let bytes = reframe_raw(ctx, PacketType::RouteRequest, remainder, next_hop);
    ctx.counters
        .incr(PacketType::RouteRequest, Reason::ForwardedToNextHop);
    send_towards(next_hop, bytes)
}

/// A continue request's body is a 57-byte sealed continue token followed
/// by the same kind of chain a route request carries. Unlike a route
/// request it never creates a session: the token's own `session_id` is
/// looked up in the existing table, and if that session isn't there this
/// relay has nothing to refresh.
fn handle_continue_request(ctx: &Context, payload: &[u8]) -> Action {
    let Some(sealed_token) = payload.get(..SEALED_CONTINUE_TOKEN_BYTES) else {
        ctx.counters
            .incr(PacketType::ContinueRequest, Reason::CouldNotReadToken);
        return Action::Drop;
    };

    let Ok(cleartext) = crypto::open_token_box(sealed_token, &router_box_public(ctx), &crypto_secret(ctx)) else {
        ctx.counters
            .incr(PacketType::ContinueRequest, Reason::CouldNotReadToken);
        return Action::Drop;
    };

    let Ok(token) = ContinueToken::decode(&cleartext) else {
        ctx.counters
            .incr(PacketType::ContinueRequest, Reason::CouldNotReadToken);
        return Action::Drop;
    };

    let Some(session) = ctx.sessions.get(token.session_id) else {
        ctx.counters
            .incr(PacketType::ContinueRequest, Reason::CouldNotFindSession);
        return Action::Drop;
    };

    let now = ctx.clock.now();
    if token.expire_timestamp <= now {
        ctx.counters
            .incr(PacketType::ContinueRequest, Reason::TokenExpired);
        return Action::Drop;
    }

    session.refresh(token.expire_timestamp, token.session_version);

    let next_hop = *session.next_hop.read();
    if std::net::SocketAddr::try_from(next_hop.address).is_err() {
        ctx.counters
            .incr(PacketType::ContinueRequest, Reason::ForwardFailed);
        return Action::Drop;
    }

    let remainder = &payload[SEALED_CONTINUE_TOKEN_BYTES..];
    let bytes = reframe_raw(ctx, PacketType::ContinueRequest, remainder, next_hop);
    ctx.counters
        .incr(PacketType::ContinueRequest, Reason::ForwardedToNextHop);
    send_towards(next_hop, bytes)
}

/// Shared path for everything that just rides an existing session:
/// client-to-server/server-to-client traffic, their ping variants, and
/// route/continue responses traveling back towards the client.
fn handle_session_forward(
    ctx: &Context,
    packet_type: PacketType,
    header: &Header,
    payload: &[u8],
    client_to_server: bool,
) -> Action {
    let Some(session) = ctx.sessions.get(header.session_id) else {
        ctx.counters.incr(packet_type, Reason::CouldNotFindSession);
        return Action::Drop;
    };

    if !verify_and_replay_check(ctx, &session, packet_type, header, client_to_server) {
        return Action::Drop;
    }

    let hop = if client_to_server {
        *session.next_hop.read()
    } else {
        *session.prev_hop.read()
    };

    let envelope = if client_to_server {
        &session.client_to_server_envelope
    } else {
        &session.server_to_client_envelope
    };

    if !envelope.allow(payload.len()) {
        ctx.counters.incr(packet_type, Reason::BandwidthLimited);
        return Action::Drop;
    }

    if std::net::SocketAddr::try_from(hop.address).is_err() {
        ctx.counters.incr(packet_type, Reason::ForwardFailed);
        return Action::Drop;
    }

    let bytes = reframe(ctx, packet_type, &session, header.sequence, payload, hop);

    ctx.counters.incr(
        packet_type,
        if client_to_server {
            Reason::ForwardedToNextHop
        } else {
            Reason::ForwardedToPrevHop
        },
    );
    send_towards(hop, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_rejects_short_packets() {
        assert!(parse_frame(&[0u8; 10]).is_none());
    }
}
