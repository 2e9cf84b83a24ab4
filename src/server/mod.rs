//! Receive worker pool.
//!
//! Binds the public and internal sockets `threads` times each via
//! `SO_REUSEPORT` and spawns one blocking receive loop per socket. Every
//! worker shares the same `Context` and the same pair of send sockets
//! (also `SO_REUSEPORT`-bound to the same two addresses, so sending from
//! them looks identical to sending from any worker's own socket).

pub mod socket;

use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use relay_codec::filter::{advanced_packet_filter, basic_packet_filter};
use relay_codec::Address;

use crate::context::Context;
use crate::forwarding::{self, Action};

const MAX_PACKET_BYTES: usize = 1400;

fn send_action(action: Action, public: &UdpSocket, internal: &UdpSocket) {
    match action {
        Action::Drop => {}
        Action::SendPublic { to, bytes } => {
            if let Err(e) = public.send_to(&bytes, to) {
                log::debug!("send_to {to} on public socket failed: {e}");
            }
        }
        Action::SendInternal { to, bytes } => {
            if let Err(e) = internal.send_to(&bytes, to) {
                log::debug!("send_to {to} on internal socket failed: {e}");
            }
        }
    }
}

fn worker_loop(
    ctx: Arc<Context>,
    recv_socket: UdpSocket,
    public_send: Arc<UdpSocket>,
    internal_send: Arc<UdpSocket>,
    local_is_internal: bool,
) {
    // A bounded read timeout, rather than an indefinitely blocking
    // `recv_from`, is what lets this loop notice `ctx.is_shutting_down()`
    // during the clean-shutdown window instead of sitting blocked until
    // the next packet happens to arrive.
    if let Err(e) = recv_socket.set_read_timeout(Some(std::time::Duration::from_millis(500))) {
        log::warn!("failed to set socket read timeout: {e}");
    }

    let mut buf = [0u8; MAX_PACKET_BYTES];

    loop {
        if ctx.is_shutting_down() {
            return;
        }

        let (len, from) = match recv_socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::warn!("recv_from failed: {e}");
                continue;
            }
        };

        let data = &buf[..len];
        if !basic_packet_filter(data) {
            continue;
        }

        let magic = ctx.magic.read();
        let from_addr = Address::from(from);
        let to_addr = if local_is_internal {
            ctx.config.server.internal_bind_address()
        } else {
            ctx.config.server.bind_address()
        };
        let (from_bytes, from_port) = from_addr.filter_bytes();
        let (to_bytes, to_port) = to_addr.filter_bytes();

        let accepted = advanced_packet_filter(data, &magic.current, &from_bytes, from_port, &to_bytes, to_port)
            || advanced_packet_filter(data, &magic.previous, &from_bytes, from_port, &to_bytes, to_port)
            || advanced_packet_filter(data, &magic.upcoming, &from_bytes, from_port, &to_bytes, to_port);
        drop(magic);

        if !accepted {
            continue;
        }

        let action = forwarding::dispatch(&ctx, from, local_is_internal, data);
        send_action(action, &public_send, &internal_send);
    }
}

/// Spawns `config.server.threads` receive workers on the public socket
/// and one dedicated receive worker on the internal socket, plus the
/// ping scheduler and router heartbeat. Returns the worker join handles
/// so the caller can wait on them during shutdown.
pub fn start(ctx: Arc<Context>) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let public_send = Arc::new(socket::bind_reuseport(ctx.config.server.bind)?);
    let internal_send = Arc::new(socket::bind_reuseport(ctx.config.server.internal_bind)?);

    crate::ping::spawn_scheduler(ctx.clone(), internal_send.clone());
    crate::router_client::spawn_heartbeat(ctx.clone());

    let mut handles = Vec::new();

    let public_workers = ctx.config.server.threads.saturating_sub(1).max(1);
    for i in 0..public_workers {
        let recv_socket = socket::bind_reuseport(ctx.config.server.bind)?;
        let ctx = ctx.clone();
        let public_send = public_send.clone();
        let internal_send = internal_send.clone();
        handles.push(
            thread::Builder::new()
                .name(format!("relay-recv-pub-{i}"))
                .spawn(move || worker_loop(ctx, recv_socket, public_send, internal_send, false))?,
        );
    }

    {
        let recv_socket = socket::bind_reuseport(ctx.config.server.internal_bind)?;
        let ctx = ctx.clone();
        let public_send = public_send.clone();
        let internal_send = internal_send.clone();
        handles.push(
            thread::Builder::new()
                .name("relay-recv-internal".to_string())
                .spawn(move || worker_loop(ctx, recv_socket, public_send, internal_send, true))?,
        );
    }

    log::info!(
        "relay listening on {} ({} public worker(s)) and {} (1 internal worker)",
        ctx.config.server.bind,
        public_workers,
        ctx.config.server.internal_bind,
    );

    Ok(handles)
}
