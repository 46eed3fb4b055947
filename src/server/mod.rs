mod transport;

pub use transport::WsTransport;

use anyhow::Result;
use service::{Service, ServiceHandler};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::handshake::server::{ErrorResponse, Request, Response},
};

use crate::config::Config;

/// Accept WebSocket connections and hand them to the signaling service.
///
/// Subprotocol negotiation happens during the WebSocket handshake: the
/// first of our advertised subprotocols that the client offered is
/// echoed back. Connections without an acceptable subprotocol are still
/// accepted here; the service closes them with the proper close code.
pub async fn start<H>(config: &Config, service: &Service<H, WsTransport>) -> Result<()>
where
    H: ServiceHandler,
{
    let listener = TcpListener::bind(config.server.listen).await?;
    log::info!("signaling server listening: {}", config.server.listen);

    loop {
        let (stream, addr) = listener.accept().await?;
        let service = service.clone();
        let subprotocols = config.server.subprotocols.clone();

        tokio::spawn(async move {
            log::debug!("tcp socket accept: addr={:?}", addr);

            let mut ws_path = String::new();
            let mut negotiated: Option<String> = None;
            let callback = |request: &Request, mut response: Response| {
                ws_path = request.uri().path().to_string();

                if let Some(offered) = request
                    .headers()
                    .get("Sec-WebSocket-Protocol")
                    .and_then(|value| value.to_str().ok())
                {
                    let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
                    if let Some(chosen) = subprotocols
                        .iter()
                        .find(|ours| offered.contains(&ours.as_str()))
                    {
                        if let Ok(value) = chosen.parse() {
                            response
                                .headers_mut()
                                .insert("Sec-WebSocket-Protocol", value);
                            negotiated = Some(chosen.clone());
                        }
                    }
                }

                Ok::<_, ErrorResponse>(response)
            };

            let accepted = accept_hdr_async(stream, callback).await;
            match accepted {
                Ok(socket) => {
                    service
                        .handle_connection(WsTransport::new(socket), &ws_path, negotiated.as_deref())
                        .await;
                }
                Err(error) => {
                    log::debug!("websocket handshake failed: addr={:?}, error={}", addr, error);
                }
            }
        });
    }
}
