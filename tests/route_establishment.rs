//! End-to-end coverage of the forwarding state machine over the seed
//! scenarios in spec.md §8: a route request creates a session and
//! forwards towards the next hop (stripping only its own token off a
//! multi-hop chain), a replayed packet is rejected, and a continue
//! request refreshes the session's expiry.
//!
//! These drive `relay_node::forwarding::dispatch` directly rather than
//! real UDP sockets -- the ingress filter (chonkle/pittle) is a separate
//! concern tested in `relay-codec`, and `dispatch` is the unit that
//! actually needs to agree with itself across these scenarios.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::OsRng;

use relay_codec::crypto::TOKEN_BOX_OVERHEAD;
use relay_codec::filter::{CHONKLE_BYTES, PITTLE_BYTES};
use relay_codec::packet::HEADER_BYTES;
use relay_codec::token::{ContinueToken, RouteToken, CONTINUE_TOKEN_BYTES, ROUTE_TOKEN_BYTES};
use relay_codec::{Address, Header, PacketType};

use relay_node::config::{Config, Log, Router, Server};
use relay_node::context::Context;
use relay_node::forwarding::{self, Action};

use relay_service::session::SessionTableOptions;
use relay_service::{PeerTable, SessionTable};

const RELAY_SECRET_KEY: [u8; 32] = [0x11; 32];
const ROUTER_SECRET_KEY: [u8; 32] = [0x22; 32];

const SEALED_ROUTE_TOKEN_BYTES: usize = ROUTE_TOKEN_BYTES + TOKEN_BOX_OVERHEAD;
const SEALED_CONTINUE_TOKEN_BYTES: usize = CONTINUE_TOKEN_BYTES + TOKEN_BOX_OVERHEAD;

fn router_secret() -> crypto_box::SecretKey {
    crypto_box::SecretKey::from(ROUTER_SECRET_KEY)
}

fn relay_public() -> crypto_box::PublicKey {
    crypto_box::SecretKey::from(RELAY_SECRET_KEY).public_key()
}

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        server: Server {
            bind: "127.0.0.1:30100".parse().unwrap(),
            internal_bind: "127.0.0.1:30101".parse().unwrap(),
            threads: 1,
            session_capacity: 64,
        },
        router: Router {
            base_url: "https://router.invalid".to_string(),
            relay_name: "test-relay".to_string(),
            relay_secret_key: RELAY_SECRET_KEY,
            router_public_key: *router_secret().public_key().as_bytes(),
            heartbeat_interval_secs: 10,
            max_init_attempts: 1,
        },
        log: Log::default(),
    })
}

fn test_context() -> Arc<Context> {
    let sessions = SessionTable::new(SessionTableOptions {
        capacity: 64,
        sweep_interval: std::time::Duration::from_secs(3600),
    });
    let peers = Arc::new(PeerTable::new());

    let ctx = Context::new(test_config(), sessions, peers);
    ctx.clock.anchor(1_000);
    ctx.sessions.set_clock(1_000);
    ctx
}

/// Frames a header-bearing packet the way `forwarding::reframe` does,
/// without bothering to stamp a real chonkle/pittle trailer: `dispatch`
/// never re-validates the ingress filter, that happens earlier in the
/// receive worker.
fn frame(packet_type: PacketType, header: Header, payload: &[u8]) -> Vec<u8> {
    let header_bytes = header.encode();
    let mut out = vec![0u8; 1 + CHONKLE_BYTES + HEADER_BYTES + payload.len() + PITTLE_BYTES];
    out[0] = packet_type as u8;
    out[1 + CHONKLE_BYTES..1 + CHONKLE_BYTES + HEADER_BYTES].copy_from_slice(&header_bytes);
    let payload_start = 1 + CHONKLE_BYTES + HEADER_BYTES;
    out[payload_start..payload_start + payload.len()].copy_from_slice(payload);
    out
}

/// Frames a raw-token packet (route/continue request): no header, just
/// the sealed token chain immediately after chonkle.
fn frame_raw(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 1 + CHONKLE_BYTES + payload.len() + PITTLE_BYTES];
    out[0] = packet_type as u8;
    out[1 + CHONKLE_BYTES..1 + CHONKLE_BYTES + payload.len()].copy_from_slice(payload);
    out
}

fn sealed_route_request(session_id: u64, next_address: Address, session_private_key: [u8; 32]) -> Vec<u8> {
    let token = RouteToken {
        expire_timestamp: 2_000,
        session_id,
        session_version: 0,
        kbps_up: 0,
        kbps_down: 0,
        next_address,
        next_is_internal: false,
        prev_is_internal: false,
        session_private_key,
    };

    let mut rng = OsRng;
    let sealed = relay_codec::crypto::seal_token_box(&mut rng, &token.encode(), &router_secret(), &relay_public());
    assert_eq!(sealed.len(), SEALED_ROUTE_TOKEN_BYTES);

    frame_raw(PacketType::RouteRequest, &sealed)
}

#[test]
fn route_request_creates_session_and_forwards() {
    let ctx = test_context();
    let client: SocketAddr = "203.0.113.1:40000".parse().unwrap();
    let next_hop: SocketAddr = "198.51.100.1:9000".parse().unwrap();

    let packet = sealed_route_request(0xaabb_ccdd, Address::from(next_hop), [0x77; 32]);
    let action = forwarding::dispatch(&ctx, client, false, &packet);

    match action {
        Action::SendPublic { to, bytes } => {
            assert_eq!(to, next_hop);
            // A single-token route request leaves nothing to forward.
            assert_eq!(bytes.len(), 1 + CHONKLE_BYTES + PITTLE_BYTES);
        }
        _ => panic!("expected the route request to forward to the next hop"),
    }

    let session = ctx.sessions.get(0xaabb_ccdd).expect("session was created");
    assert_eq!(
        *session.prev_hop.read(),
        relay_service::session::Hop {
            address: Address::from(client),
            internal: false,
        }
    );
}

#[test]
fn route_request_with_multiple_hops_forwards_only_the_remaining_tokens() {
    let ctx = test_context();
    let client: SocketAddr = "203.0.113.1:40000".parse().unwrap();
    let next_hop: SocketAddr = "198.51.100.1:9000".parse().unwrap();

    let token = RouteToken {
        expire_timestamp: 2_000,
        session_id: 0x9999_1111,
        session_version: 0,
        kbps_up: 0,
        kbps_down: 0,
        next_address: Address::from(next_hop),
        next_is_internal: false,
        prev_is_internal: false,
        session_private_key: [0x55; 32],
    };

    let mut rng = OsRng;
    let own_sealed = relay_codec::crypto::seal_token_box(&mut rng, &token.encode(), &router_secret(), &relay_public());

    // A downstream hop's token: this relay has no way to open it and must
    // forward it byte-for-byte unchanged.
    let downstream_token: Vec<u8> = (0..SEALED_ROUTE_TOKEN_BYTES).map(|i| i as u8).collect();

    let mut payload = own_sealed;
    payload.extend_from_slice(&downstream_token);

    let packet = frame_raw(PacketType::RouteRequest, &payload);
    let action = forwarding::dispatch(&ctx, client, false, &packet);

    match action {
        Action::SendPublic { to, bytes } => {
            assert_eq!(to, next_hop);
            let forwarded_payload = &bytes[1 + CHONKLE_BYTES..bytes.len() - PITTLE_BYTES];
            assert_eq!(forwarded_payload, downstream_token.as_slice());
        }
        _ => panic!("expected the route request to forward to the next hop"),
    }
}

#[test]
fn client_to_server_traffic_rejects_replayed_sequence() {
    let ctx = test_context();
    let client: SocketAddr = "203.0.113.1:40000".parse().unwrap();
    let next_hop: SocketAddr = "198.51.100.1:9000".parse().unwrap();
    let session_private_key = [0x77; 32];

    let route_packet = sealed_route_request(0x1234_5678, Address::from(next_hop), session_private_key);
    forwarding::dispatch(&ctx, client, false, &route_packet);

    let header = Header {
        sequence: 1,
        session_id: 0x1234_5678,
        session_version: 0,
        tag: relay_codec::crypto::seal_header(
            &session_private_key,
            PacketType::ClientToServer as u8,
            1,
            0x1234_5678,
            0,
        ),
    };
    let data_packet = frame(PacketType::ClientToServer, header, b"game traffic payload");

    let first = forwarding::dispatch(&ctx, client, false, &data_packet);
    assert!(matches!(first, Action::SendPublic { .. }));

    let second = forwarding::dispatch(&ctx, client, false, &data_packet);
    assert!(matches!(second, Action::Drop));
}

#[test]
fn continue_request_refreshes_session_expiry() {
    let ctx = test_context();
    let client: SocketAddr = "203.0.113.1:40000".parse().unwrap();
    let next_hop: SocketAddr = "198.51.100.1:9000".parse().unwrap();
    let session_private_key = [0x99; 32];

    let route_packet = sealed_route_request(0x5555_5555, Address::from(next_hop), session_private_key);
    forwarding::dispatch(&ctx, client, false, &route_packet);

    ctx.sessions.set_clock(1_999);
    assert!(ctx.sessions.get(0x5555_5555).is_some());

    let continue_token = ContinueToken {
        expire_timestamp: 5_000,
        session_id: 0x5555_5555,
        session_version: 1,
    };
    let mut rng = OsRng;
    let sealed =
        relay_codec::crypto::seal_token_box(&mut rng, &continue_token.encode(), &router_secret(), &relay_public());
    assert_eq!(sealed.len(), SEALED_CONTINUE_TOKEN_BYTES);

    let continue_packet = frame_raw(PacketType::ContinueRequest, &sealed);

    let action = forwarding::dispatch(&ctx, client, false, &continue_packet);
    assert!(matches!(action, Action::SendPublic { .. }));

    ctx.sessions.set_clock(4_999);
    let session = ctx.sessions.get(0x5555_5555).expect("continue extended the session");
    assert_eq!(*session.session_version.read(), 1);
}
