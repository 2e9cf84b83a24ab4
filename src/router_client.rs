//! Router control plane client.
//!
//! Two calls, both `application/octet-stream` bodies rather than JSON:
//! `relay_init` once at startup (anchors the clock, echoes back a relay
//! token this relay replays on every subsequent call) and `relay_update`
//! on a recurring heartbeat (reports liveness, peer ping stats, session
//! count, build version, CPU load and the full counter array; receives
//! the current peer list, target version and magic rotation in return).
//! Both are blocking `reqwest` calls running on their own OS thread --
//! there is no async runtime anywhere in this process, by design (§9).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::RngCore;
use sysinfo::System;

use relay_codec::primitives::{Reader, Writer};
use relay_codec::{crypto, Address};

use crate::context::Context;

fn relay_public_key(ctx: &Context) -> [u8; 32] {
    let secret = x25519_dalek::StaticSecret::from(ctx.config.router.relay_secret_key);
    x25519_dalek::PublicKey::from(&secret).to_bytes()
}

/// `init`'s request carries a random nonce purely so the response (echoing
/// a router-issued token) can't be replayed from a previous process's
/// `relay_init` call; spec.md §4.H only requires the nonce be present, not
/// any particular derivation.
fn encode_init_request(ctx: &Context) -> Vec<u8> {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut w = Writer::default();
    w.write_string(&ctx.config.router.relay_name);
    w.write_bytes(&relay_public_key(ctx));
    Address::from(ctx.config.server.bind).write_long(&mut w);
    w.write_bytes(&nonce);
    w.into_inner()
}

struct InitResponse {
    router_time: u64,
    relay_token: [u8; 32],
}

fn decode_init_response(data: &[u8]) -> relay_codec::Result<InitResponse> {
    let mut r = Reader::new(data);
    Ok(InitResponse {
        router_time: r.read_u64()?,
        relay_token: r.read_array()?,
    })
}

struct UpdateResponse {
    router_time: u64,
    magic_upcoming: [u8; 8],
    magic_current: [u8; 8],
    magic_previous: [u8; 8],
    peers: Vec<(Address, bool, [u8; 32])>,
}

/// Coarse 0-255 CPU load sample for the heartbeat's "CPU-load byte"
/// (spec.md §4.H). `sysinfo` needs one throwaway refresh before
/// `global_cpu_usage` is meaningful, so the heartbeat thread keeps its own
/// `System` rather than building one per tick.
fn sample_cpu_load(sys: &mut System) -> u8 {
    sys.refresh_cpu_usage();
    (sys.global_cpu_usage().clamp(0.0, 100.0) * 2.55) as u8
}

fn encode_update_request(ctx: &Context, cpu_load: u8) -> Vec<u8> {
    let mut w = Writer::default();
    w.write_string(&ctx.config.router.relay_name);
    w.write_bytes(&*ctx.router_token.read());
    w.write_u64(ctx.clock.now());

    let now = ctx.clock.now_f64();
    let snapshot = ctx.peers.iter_snapshot();
    w.write_u32(snapshot.len() as u32);
    for peer in &snapshot {
        peer.address.write_long(&mut w);
        let stats = peer.stats(now);
        w.write_f32(stats.rtt_ms as f32);
        w.write_f32(stats.jitter_ms as f32);
        w.write_f32(stats.packet_loss as f32);
    }

    w.write_u64(ctx.sessions.len() as u64);
    w.write_u8(ctx.is_shutting_down() as u8);
    w.write_string(env!("CARGO_PKG_VERSION"));
    w.write_u8(cpu_load);

    let (kbps_up, kbps_down) = ctx.sessions.total_envelope_kbps();
    w.write_u64(kbps_up);
    w.write_u64(kbps_down);

    // Per-relay tx/rx byte totals aren't tracked anywhere yet (only
    // per-packet-type/reason counts are); report zero until that's added,
    // same as the reference relay's own "todo: redo bandwidth".
    w.write_u64(0);
    w.write_u64(0);

    let dense = ctx.counters.dense();
    w.write_u32(dense.len() as u32);
    for value in dense {
        w.write_u64(value);
    }

    w.into_inner()
}

fn decode_update_response(data: &[u8]) -> relay_codec::Result<UpdateResponse> {
    let mut r = Reader::new(data);
    let router_time = r.read_u64()?;
    let peer_count = r.read_u32()? as usize;

    let mut peers = Vec::with_capacity(peer_count);
    for _ in 0..peer_count {
        let address = Address::read_long(&mut r)?;
        let internal = r.read_u8()? != 0;
        let public_key: [u8; 32] = r.read_array()?;
        peers.push((address, internal, public_key));
    }

    let _target_version = r.read_string(32)?;
    let magic_upcoming: [u8; 8] = r.read_array()?;
    let magic_current: [u8; 8] = r.read_array()?;
    let magic_previous: [u8; 8] = r.read_array()?;

    Ok(UpdateResponse {
        router_time,
        magic_upcoming,
        magic_current,
        magic_previous,
        peers,
    })
}

fn post(client: &reqwest::blocking::Client, url: &str, body: Vec<u8>) -> anyhow::Result<Vec<u8>> {
    let response = client
        .post(url)
        .header("content-type", "application/octet-stream")
        .body(body)
        .send()?
        .error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

/// One-shot at startup: anchors the clock against the router's time.
/// Retries up to `max_init_attempts` times with capped exponential
/// backoff; exhausting the budget is the one control-plane failure that
/// actually terminates the process (§9 Open Question: everything past
/// init degrades to "keep serving with last-known state" instead).
pub fn init(ctx: &Context) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::new();
    let url = format!("{}/relay_init", ctx.config.router.base_url);
    let body = encode_init_request(ctx);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match post(&client, &url, body.clone()) {
            Ok(bytes) => {
                let response = decode_init_response(&bytes)
                    .map_err(|e| anyhow::anyhow!("malformed relay_init response: {e}"))?;
                ctx.clock.anchor(response.router_time);
                *ctx.router_token.write() = response.relay_token;
                log::info!("relay_init succeeded on attempt {attempt}, router_time={}", response.router_time);
                return Ok(());
            }
            Err(e) => {
                log::warn!("relay_init attempt {attempt} failed: {e}");
                if attempt >= ctx.config.router.max_init_attempts {
                    anyhow::bail!("relay_init failed after {attempt} attempts: {e}");
                }
                thread::sleep(backoff(attempt));
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let capped = attempt.min(6);
    Duration::from_millis(250 * 2u64.pow(capped))
}

/// Recurring heartbeat. Failures never terminate the process: the relay
/// keeps forwarding with whatever peer list and magic it already has and
/// simply retries on the next tick, since a router outage should degrade
/// gracefully rather than take every relay offline with it.
pub fn spawn_heartbeat(ctx: Arc<Context>) {
    thread::Builder::new()
        .name("router-heartbeat".into())
        .spawn(move || {
            let client = reqwest::blocking::Client::new();
            let url = format!("{}/relay_update", ctx.config.router.base_url);
            let mut sys = System::new();

            loop {
                if ctx.is_shutting_down() {
                    return;
                }

                let cpu_load = sample_cpu_load(&mut sys);
                let body = encode_update_request(&ctx, cpu_load);
                match post(&client, &url, body) {
                    Ok(bytes) => match decode_update_response(&bytes) {
                        Ok(response) => {
                            ctx.clock.anchor(response.router_time);
                            ctx.magic.write().set(
                                response.magic_previous,
                                response.magic_current,
                                response.magic_upcoming,
                            );

                            let peers: Vec<(Address, bool, [u8; 32])> = response
                                .peers
                                .iter()
                                .map(|&(address, internal, public_key)| {
                                    let shared_key = crypto::diffie_hellman(
                                        &ctx.config.router.relay_secret_key,
                                        &public_key,
                                    );
                                    (address, internal, shared_key)
                                })
                                .collect();
                            ctx.peers.sync(&peers, ctx.clock.now_f64());
                        }
                        Err(e) => log::warn!("malformed relay_update response: {e}"),
                    },
                    Err(e) => log::warn!("relay_update failed: {e}"),
                }

                thread::sleep(Duration::from_secs(ctx.config.router.heartbeat_interval_secs));
            }
        })
        .expect("failed to spawn router heartbeat thread");
}

