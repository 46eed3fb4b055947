#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use saltyrtc_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.server.keys.is_empty() {
        log::warn!(
            "No permanent keys are configured, clients will not be able to pin this server's identity"
        );
    }

    saltyrtc_server::startup(config).await
}
