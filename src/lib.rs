//! Encrypted multi-hop UDP relay node.
//!
//! `run` wires together the pieces every other module in this crate
//! implements: configuration, the shared `Context`, the router
//! control-plane client, the receive worker pool, and clean shutdown.
//! There is deliberately no async runtime here -- every concurrent thing
//! in this process is a plain OS thread, matching the blocking-syscall
//! design the forwarding path needs to keep latency predictable.

pub mod clock;
pub mod config;
pub mod context;
pub mod counters;
pub mod forwarding;
pub mod lifecycle;
pub mod ping;
pub mod router_client;
pub mod server;

use std::sync::Arc;

use relay_service::{PeerTable, SessionTable};

use config::Config;
use context::Context;

pub fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let sessions = SessionTable::new(relay_service::session::SessionTableOptions {
        capacity: config.server.session_capacity,
        sweep_interval: std::time::Duration::from_secs(1),
    });
    let peers = Arc::new(PeerTable::new());

    let ctx = Context::new(config, sessions, peers);

    lifecycle::install_signal_handler(ctx.clone())?;

    router_client::init(&ctx)?;

    let handles = server::start(ctx.clone())?;

    // The session table keeps its own clock (it can't depend on
    // `relay_node::Clock` from `relay-service`) -- push the anchored
    // router time into it on the same tick that watches for shutdown, so
    // expiry and the sweep thread both see real time passing.
    while !ctx.is_shutting_down() {
        ctx.sessions.set_clock(ctx.clock.now());
        std::thread::sleep(std::time::Duration::from_millis(500));
    }

    log::info!("shutdown signal observed, draining workers");
    lifecycle::wait_for_drain(&ctx, handles);
    log::info!("relay stopped");

    Ok(())
}
