pub mod client;
pub mod error;
pub mod path;
pub mod transport;

mod worker;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use codec::{KEY_LENGTH, close_code::CloseCode, crypto::KeyPair};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    client::{Client, Task},
    error::SignalingError,
    path::PathManager,
    transport::Transport,
};

/// The subprotocol identifier the server advertises by default.
pub const SUBPROTOCOL: &str = "v1.saltyrtc.org";

pub const KEEP_ALIVE_INTERVAL_DEFAULT: Duration = Duration::from_secs(3600);
pub const KEEP_ALIVE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);
pub const RELAY_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

/// Lifecycle events of the signaling service.
///
/// Callbacks are fire-and-forget: the core invokes them without awaiting
/// anything, so implementations that need to do real work should hand it
/// off to a task of their own.
pub trait ServiceHandler: Send + Sync + 'static {
    /// An initiator completed the handshake on the given path.
    #[allow(unused_variables)]
    fn on_initiator_connected(&self, path: &str) {}

    /// A responder completed the handshake on the given path.
    #[allow(unused_variables)]
    fn on_responder_connected(&self, path: &str) {}

    /// A connection ended with the given close code. `path` is unset for
    /// connections rejected before they reached a path.
    #[allow(unused_variables)]
    fn on_disconnected(&self, path: Option<&str>, code: u16) {}
}

pub struct ServiceOptions<H> {
    /// The server's permanent keys, ordered by preference. The first key
    /// is the primary one. May be empty.
    pub permanent_keys: Vec<KeyPair>,
    /// Advertised subprotocols, ordered by preference.
    pub subprotocols: Vec<String>,
    /// How long a relayer waits for the peer's send to complete.
    pub relay_timeout: Duration,
    /// Default keep-alive interval, until a client requests its own.
    pub keep_alive_interval: Duration,
    /// How long to wait for a pong.
    pub keep_alive_timeout: Duration,
    pub handler: H,
}

pub(crate) struct WorkerHandle<T> {
    client: Arc<Client<T>>,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct Inner<H, T> {
    pub(crate) keys: Vec<Arc<KeyPair>>,
    pub(crate) subprotocols: Vec<String>,
    pub(crate) relay_timeout: Duration,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) keep_alive_timeout: Duration,
    pub(crate) handler: H,
    pub(crate) paths: PathManager<T>,
    workers: Mutex<HashMap<u64, WorkerHandle<T>>>,
    worker_seq: AtomicU64,
}

impl<H, T> Inner<H, T> {
    pub(crate) fn unregister(&self, worker_id: u64) {
        self.workers.lock().remove(&worker_id);
    }
}

/// Signaling service.
pub struct Service<H, T> {
    inner: Arc<Inner<H, T>>,
}

impl<H, T> Clone for Service<H, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H, T> Service<H, T>
where
    H: ServiceHandler,
    T: Transport,
{
    /// Create the signaling service.
    ///
    /// Fails when a permanent key is repeated.
    pub fn new(options: ServiceOptions<H>) -> Result<Self, SignalingError> {
        let mut keys: Vec<Arc<KeyPair>> = Vec::with_capacity(options.permanent_keys.len());
        for key in options.permanent_keys {
            let public_key = key.public_key();
            if keys.iter().any(|existing| existing.public_key() == public_key) {
                return Err(SignalingError::ServerKey(
                    "repeated permanent keys".to_string(),
                ));
            }
            keys.push(Arc::new(key));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                keys,
                subprotocols: options.subprotocols,
                relay_timeout: options.relay_timeout,
                keep_alive_interval: options.keep_alive_interval,
                keep_alive_timeout: options.keep_alive_timeout,
                handler: options.handler,
                paths: PathManager::default(),
                workers: Mutex::new(HashMap::with_capacity(64)),
                worker_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Admit a freshly accepted transport.
    ///
    /// The URL path must be 64 lowercase hex characters naming the
    /// initiator's permanent key, and the transport-level subprotocol
    /// negotiation must have selected one of ours; otherwise the
    /// connection is closed without creating a client.
    pub async fn handle_connection(&self, conn: T, ws_path: &str, subprotocol: Option<&str>) {
        let inner = &self.inner;

        // No client is created and no event fires; the connection never
        // reached the signaling layer.
        let Some(subprotocol) =
            subprotocol.filter(|chosen| inner.subprotocols.iter().any(|ours| ours == chosen))
        else {
            log::info!("could not negotiate a subprotocol, dropping client");
            conn.close(CloseCode::SubprotocolError).await;
            return;
        };

        let key = match parse_path(ws_path) {
            Ok(key) => key,
            Err(reason) => {
                log::info!("closing due to path error: {}", reason);
                conn.close(CloseCode::ProtocolError).await;
                inner
                    .handler
                    .on_disconnected(None, CloseCode::ProtocolError.into());
                return;
            }
        };

        log::info!("connection established: path={}", hex::encode(key));

        let path = inner.paths.get_or_create(key);
        let client = Arc::new(Client::new(
            conn,
            key,
            inner.keep_alive_interval,
            inner.keep_alive_timeout,
        ));

        let worker_id = inner.worker_seq.fetch_add(1, Ordering::Relaxed);
        {
            inner.workers.lock().insert(
                worker_id,
                WorkerHandle {
                    client: client.clone(),
                    handle: None,
                },
            );
        }

        let handle = tokio::spawn(worker::run(
            inner.clone(),
            path,
            client,
            subprotocol.to_string(),
            worker_id,
        ));

        // The worker unregisters itself on exit; tolerate it already
        // being gone.
        if let Some(worker) = inner.workers.lock().get_mut(&worker_id) {
            worker.handle = Some(handle);
        }
    }

    /// Close every live connection with `going-away` and wait for the
    /// workers to finish.
    pub async fn shutdown(&self) {
        let workers: Vec<WorkerHandle<T>> = {
            let mut lock = self.inner.workers.lock();
            lock.drain().map(|(_, worker)| worker).collect()
        };

        log::info!("shutting down, closing {} connections", workers.len());
        for worker in &workers {
            let _ = worker.client.enqueue(Task::Close(CloseCode::GoingAway));
        }

        for worker in workers {
            if let Some(handle) = worker.handle {
                let _ = handle.await;
            }
        }
    }

    /// Number of live paths.
    pub fn path_count(&self) -> usize {
        self.inner.paths.len()
    }
}

fn parse_path(ws_path: &str) -> Result<[u8; KEY_LENGTH], String> {
    let hex_key = ws_path.strip_prefix('/').unwrap_or(ws_path);
    if hex_key.len() != KEY_LENGTH * 2 {
        return Err(format!("invalid path length: {}", hex_key.len()));
    }
    if !hex_key
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err("path is not lowercase hex".to_string());
    }

    let mut key = [0u8; KEY_LENGTH];
    hex::decode_to_slice(hex_key, &mut key).map_err(|error| error.to_string())?;

    Ok(key)
}
