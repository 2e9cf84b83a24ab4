#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    let config = std::sync::Arc::new(relay_node::config::Config::load()?);

    simple_logger::init_with_level(config.log.level.as_level())
        .map_err(|e| anyhow::anyhow!("failed to initialize logger: {e}"))?;

    if config.server.bind.port() == 0 {
        log::warn!("server.bind has no port configured; the relay will not accept any traffic");
    }

    relay_node::run(config)
}
