use service::ServiceHandler;

/// Logs signaling lifecycle events.
///
/// The service invokes these callbacks without awaiting them; anything
/// heavier than logging belongs in a spawned task.
#[derive(Clone)]
pub struct Observer;

impl ServiceHandler for Observer {
    fn on_initiator_connected(&self, path: &str) {
        log::info!("initiator connected: path={}", path);
    }

    fn on_responder_connected(&self, path: &str) {
        log::info!("responder connected: path={}", path);
    }

    fn on_disconnected(&self, path: Option<&str>, code: u16) {
        log::info!("disconnected: path={:?}, code={}", path, code);
    }
}
