pub mod config;
pub mod observer;
pub mod server;

use std::{sync::Arc, time::Duration};

use codec::crypto::KeyPair;
use service::{Service, ServiceOptions};

use self::{config::Config, observer::Observer, server::WsTransport};

/// In order to let the integration tests use the crate directly and
/// start the server, a function is opened to replace the main function.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let mut permanent_keys = Vec::with_capacity(config.server.keys.len());
    for encoded in &config.server.keys {
        let mut bytes = [0u8; codec::KEY_LENGTH];
        hex::decode_to_slice(encoded, &mut bytes)
            .map_err(|_| anyhow::anyhow!("invalid permanent key in configuration"))?;
        permanent_keys.push(KeyPair::from_bytes(bytes));
    }

    let service: Service<Observer, WsTransport> = Service::new(ServiceOptions {
        permanent_keys,
        subprotocols: config.server.subprotocols.clone(),
        relay_timeout: Duration::from_secs(config.signaling.relay_timeout),
        keep_alive_interval: Duration::from_secs(config.signaling.keep_alive_interval),
        keep_alive_timeout: Duration::from_secs(config.signaling.keep_alive_timeout),
        handler: Observer,
    })?;

    tokio::select! {
        result = server::start(&config, &service) => result,
        _ = tokio::signal::ctrl_c() => {
            service.shutdown().await;
            Ok(())
        }
    }
}
