use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use codec::{
    COOKIE_LENGTH, KEY_LENGTH, SERVER_ADDRESS,
    close_code::CloseCode,
    crypto::{CryptoBox, KeyPair, constant_time_eq},
    message::Message,
    nonce::{CombinedSequenceNumber, Nonce, is_valid_initial_csn, random_cookie},
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Disconnected, SignalingError},
    transport::Transport,
};

/// Values below this floor requested via `client-auth.ping_interval` are
/// silently ignored.
pub const KEEP_ALIVE_INTERVAL_MIN: Duration = Duration::from_secs(1);

/// Role a connection assumes during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// A deferred unit of work on a client's task queue.
///
/// The queue is the sole post-handshake path to the transport's write
/// side; exactly one task executes at a time, so outbound frames of a
/// client never interleave.
pub enum Task {
    /// Typed signaling message to this client.
    Message(Message),
    /// Opaque peer frame, relayed verbatim. The outcome is reported back
    /// to the relaying worker.
    Relay(Bytes, oneshot::Sender<Result<(), SignalingError>>),
    /// Close the connection with the given code.
    Close(CloseCode),
}

struct State {
    cookie_out: Option<[u8; COOKIE_LENGTH]>,
    cookie_in: Option<[u8; COOKIE_LENGTH]>,
    csn_out: Option<CombinedSequenceNumber>,
    csn_in: Option<CombinedSequenceNumber>,
    // The path's initiator key until a `client-hello` replaces it.
    client_key: [u8; KEY_LENGTH],
    server_permanent_key: Option<Arc<KeyPair>>,
    session_box: Option<Arc<CryptoBox>>,
    role: Option<Role>,
    id: u8,
    authenticated: bool,
    keep_alive_interval: Duration,
    keep_alive_timeout: Duration,
}

/// One authenticated or authenticating connection.
pub struct Client<T> {
    conn: T,
    session_key: KeyPair,
    state: Mutex<State>,
    queue_tx: mpsc::UnboundedSender<Task>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
}

impl<T: Transport> Client<T> {
    pub fn new(
        conn: T,
        initiator_key: [u8; KEY_LENGTH],
        keep_alive_interval: Duration,
        keep_alive_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Self {
            conn,
            session_key: KeyPair::generate(),
            state: Mutex::new(State {
                cookie_out: None,
                cookie_in: None,
                csn_out: None,
                csn_in: None,
                client_key: initiator_key,
                server_permanent_key: None,
                session_box: None,
                role: None,
                id: SERVER_ADDRESS,
                authenticated: false,
                keep_alive_interval,
                keep_alive_timeout,
            }),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    /// Enqueue a task onto this client's queue. Returns `false` when the
    /// client's worker is gone and the task will never run.
    pub fn enqueue(&self, task: Task) -> bool {
        self.queue_tx.send(task).is_ok()
    }

    /// Take the receiving end of the task queue. Only the client's own
    /// worker may drain it.
    pub(crate) fn take_queue(&self) -> Option<mpsc::UnboundedReceiver<Task>> {
        self.queue_rx.lock().take()
    }

    pub fn role(&self) -> Option<Role> {
        self.state.lock().role
    }

    pub(crate) fn set_role(&self, role: Role) {
        self.state.lock().role = Some(role);
    }

    pub fn id(&self) -> u8 {
        self.state.lock().id
    }

    pub fn authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    /// Place the client into a slot. Only `Path` may call this.
    pub(crate) fn set_authenticated(&self, id: u8) {
        let mut state = self.state.lock();
        state.authenticated = true;
        state.id = id;
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub(crate) fn cookie_out(&self) -> Option<[u8; COOKIE_LENGTH]> {
        self.state.lock().cookie_out
    }

    pub(crate) fn cookie_in(&self) -> Option<[u8; COOKIE_LENGTH]> {
        self.state.lock().cookie_in
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.state.lock().keep_alive_interval
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.state.lock().keep_alive_timeout
    }

    /// Apply a client-requested keep-alive interval, ignoring values
    /// below the floor.
    pub(crate) fn set_keep_alive_interval(&self, interval: Duration) {
        if interval >= KEEP_ALIVE_INTERVAL_MIN {
            self.state.lock().keep_alive_interval = interval;
        }
    }

    /// Replace the client key learned from a `client-hello`.
    pub(crate) fn set_client_key(&self, key: [u8; KEY_LENGTH]) {
        let mut state = self.state.lock();
        state.client_key = key;
        state.session_box = None;
    }

    pub(crate) fn set_server_permanent_key(&self, key: Arc<KeyPair>) {
        self.state.lock().server_permanent_key = Some(key);
    }

    fn session_box(&self) -> Arc<CryptoBox> {
        let mut state = self.state.lock();
        match &state.session_box {
            Some(sealer) => sealer.clone(),
            None => {
                let sealer = Arc::new(CryptoBox::new(&state.client_key, &self.session_key));
                state.session_box = Some(sealer.clone());
                sealer
            }
        }
    }

    /// The nonce for the next outbound server frame. The cookie and the
    /// initial sequence number are generated lazily on first use.
    fn next_nonce(&self) -> Result<Nonce, SignalingError> {
        let mut state = self.state.lock();

        let cookie = *state.cookie_out.get_or_insert_with(random_cookie);
        let csn = *state
            .csn_out
            .get_or_insert_with(CombinedSequenceNumber::random_initial);

        let Some(value) = csn.value() else {
            return Err(SignalingError::MessageFlow(
                "cannot send any more messages, outgoing sequence number overflow".to_string(),
            ));
        };
        state.csn_out = Some(csn.increment());

        Ok(Nonce {
            cookie,
            source: SERVER_ADDRESS,
            destination: state.id,
            csn: value,
        })
    }

    /// Check that a frame claims the source address this client owns.
    pub(crate) fn check_source(&self, nonce: &Nonce) -> Result<(), SignalingError> {
        let id = self.state.lock().id;
        if nonce.source != id {
            return Err(SignalingError::Protocol(format!(
                "unexpected source address 0x{:02x}, expected 0x{:02x}",
                nonce.source, id
            )));
        }

        Ok(())
    }

    /// Validate the cookie and sequence number of a server-addressed
    /// frame. Peer-addressed frames pass through without this check.
    ///
    /// On the first frame the client's cookie is learned (and must differ
    /// from ours) and the initial sequence number is learned (and must
    /// have its upper 16 bits zero). Afterwards the cookie must repeat
    /// and the sequence number must advance by exactly one per frame.
    pub(crate) fn validate_server_bound(&self, nonce: &Nonce) -> Result<(), SignalingError> {
        let mut state = self.state.lock();

        match state.cookie_in {
            None => {
                if let Some(cookie_out) = state.cookie_out {
                    if constant_time_eq(&nonce.cookie, &cookie_out) {
                        return Err(SignalingError::Protocol(
                            "client and server cookies are identical".to_string(),
                        ));
                    }
                }
                state.cookie_in = Some(nonce.cookie);
            }
            Some(cookie_in) => {
                if !constant_time_eq(&nonce.cookie, &cookie_in) {
                    return Err(SignalingError::Protocol("cookie mismatch".to_string()));
                }
            }
        }

        let expected = match state.csn_in {
            None => {
                if !is_valid_initial_csn(nonce.csn) {
                    return Err(SignalingError::Protocol(
                        "leading 16 bits of the initial sequence number are not zero".to_string(),
                    ));
                }
                state.csn_in = Some(CombinedSequenceNumber::Value(nonce.csn));
                nonce.csn
            }
            Some(CombinedSequenceNumber::Overflow) => {
                return Err(SignalingError::MessageFlow(
                    "cannot receive any more messages, incoming sequence number overflow"
                        .to_string(),
                ));
            }
            Some(CombinedSequenceNumber::Value(value)) => value,
        };

        if nonce.csn != expected {
            return Err(SignalingError::Protocol(format!(
                "invalid sequence number, expected {}, got {}",
                expected, nonce.csn
            )));
        }
        state.csn_in = Some(CombinedSequenceNumber::Value(expected).increment());

        Ok(())
    }

    /// Open a sealed server-addressed payload with the session box.
    pub(crate) fn open_session(
        &self,
        nonce: &Nonce,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignalingError> {
        self.session_box()
            .open(&nonce.encode(), ciphertext)
            .map_err(|_| SignalingError::Protocol("could not decrypt payload".to_string()))
    }

    /// Send the unencrypted `server-hello` carrying the session key.
    pub(crate) async fn send_server_hello(&self) -> Result<(), SignalingError> {
        let message = Message::ServerHello {
            key: self.session_key.public_key().to_vec(),
        };

        let nonce = self.next_nonce()?;
        let mut frame = nonce.encode().to_vec();
        frame.extend_from_slice(&message.encode()?);

        log::trace!("server >> {}", message.kind());
        Ok(self.conn.send(frame.into()).await?)
    }

    /// Seal and send a typed signaling message with the session box.
    pub(crate) async fn send_signaling(&self, message: &Message) -> Result<(), SignalingError> {
        let nonce = self.next_nonce()?;
        let mut frame = nonce.encode().to_vec();
        frame.extend_from_slice(&self.session_box().seal(&nonce.encode(), &message.encode()?)?);

        log::trace!("server >> {}", message.kind());
        Ok(self.conn.send(frame.into()).await?)
    }

    /// Seal and send the `server-auth` message.
    ///
    /// `signed_keys` is the session and client public keys sealed under
    /// the selected server permanent key with this frame's nonce, nested
    /// inside the outer session encryption. Omitted on keyless servers.
    pub(crate) async fn send_server_auth(
        &self,
        responders: Option<Vec<u8>>,
        initiator_connected: Option<bool>,
    ) -> Result<(), SignalingError> {
        let your_cookie = self.cookie_in().ok_or_else(|| {
            SignalingError::Internal("client cookie not learned before server-auth".to_string())
        })?;

        let nonce = self.next_nonce()?;
        let nonce_bytes = nonce.encode();

        let signed_keys = {
            let state = self.state.lock();
            match &state.server_permanent_key {
                Some(permanent) => {
                    let mut keys = Vec::with_capacity(KEY_LENGTH * 2);
                    keys.extend_from_slice(&self.session_key.public_key());
                    keys.extend_from_slice(&state.client_key);

                    Some(CryptoBox::new(&state.client_key, permanent).seal(&nonce_bytes, &keys)?)
                }
                None => None,
            }
        };

        let message = Message::ServerAuth {
            your_cookie: your_cookie.to_vec(),
            signed_keys,
            initiator_connected,
            responders,
        };

        let mut frame = nonce_bytes.to_vec();
        frame.extend_from_slice(&self.session_box().seal(&nonce_bytes, &message.encode()?)?);

        log::trace!("server >> {}", message.kind());
        Ok(self.conn.send(frame.into()).await?)
    }

    /// Forward an opaque peer frame verbatim.
    pub(crate) async fn relay(&self, frame: Bytes) -> Result<(), Disconnected> {
        self.conn.send(frame).await
    }

    pub(crate) async fn recv_frame(&self) -> Result<Bytes, Disconnected> {
        self.conn.recv().await
    }

    pub(crate) async fn ping(&self) -> Result<(), Disconnected> {
        self.conn.ping().await
    }

    pub(crate) async fn pong(&self) {
        self.conn.pong().await
    }

    pub(crate) async fn close(&self, code: CloseCode) {
        // No reason text is sent, only the code.
        self.conn.close(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::nonce::CSN_MAX;

    struct NoopTransport;

    impl Transport for NoopTransport {
        async fn send(&self, _frame: Bytes) -> Result<(), Disconnected> {
            Ok(())
        }

        async fn recv(&self) -> Result<Bytes, Disconnected> {
            Err(Disconnected(1006))
        }

        async fn ping(&self) -> Result<(), Disconnected> {
            Ok(())
        }

        async fn pong(&self) {}

        async fn close(&self, _code: CloseCode) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn client() -> Client<NoopTransport> {
        Client::new(
            NoopTransport,
            [7u8; KEY_LENGTH],
            Duration::from_secs(3600),
            Duration::from_secs(30),
        )
    }

    fn nonce(cookie: [u8; 16], csn: u64) -> Nonce {
        Nonce {
            cookie,
            source: 0x00,
            destination: 0x00,
            csn,
        }
    }

    #[test]
    fn learns_cookie_and_csn_on_first_frame() {
        let client = client();

        client.validate_server_bound(&nonce([1u8; 16], 42)).unwrap();
        assert_eq!(client.cookie_in(), Some([1u8; 16]));

        // The next frame must repeat the cookie and advance by one.
        client.validate_server_bound(&nonce([1u8; 16], 43)).unwrap();
    }

    #[test]
    fn rejects_cookie_change() {
        let client = client();

        client.validate_server_bound(&nonce([1u8; 16], 0)).unwrap();
        assert!(client.validate_server_bound(&nonce([2u8; 16], 1)).is_err());
    }

    #[test]
    fn rejects_client_reusing_server_cookie() {
        let client = client();
        client.state.lock().cookie_out = Some([9u8; 16]);

        assert!(client.validate_server_bound(&nonce([9u8; 16], 0)).is_err());
    }

    #[test]
    fn rejects_initial_csn_with_upper_bits() {
        let client = client();

        assert!(
            client
                .validate_server_bound(&nonce([1u8; 16], 1 << 32))
                .is_err()
        );
    }

    #[test]
    fn rejects_non_monotonic_csn() {
        let client = client();

        client.validate_server_bound(&nonce([1u8; 16], 5)).unwrap();
        assert!(client.validate_server_bound(&nonce([1u8; 16], 5)).is_err());
    }

    #[test]
    fn incoming_overflow_is_terminal() {
        let client = client();
        {
            let mut state = client.state.lock();
            state.cookie_in = Some([1u8; 16]);
            state.csn_in = Some(CombinedSequenceNumber::Value(CSN_MAX));
        }

        // The last representable number is still accepted...
        client
            .validate_server_bound(&nonce([1u8; 16], CSN_MAX))
            .unwrap();

        // ...after which no frame can be consumed any more.
        let result = client.validate_server_bound(&nonce([1u8; 16], 0));
        assert!(matches!(result, Err(SignalingError::MessageFlow(_))));
    }

    #[test]
    fn outgoing_overflow_blocks_sends() {
        let client = client();
        {
            let mut state = client.state.lock();
            state.cookie_out = Some([2u8; 16]);
            state.csn_out = Some(CombinedSequenceNumber::Value(CSN_MAX));
        }

        // The last representable number can still be emitted.
        assert_eq!(client.next_nonce().unwrap().csn, CSN_MAX);

        let result = client.next_nonce();
        assert!(matches!(result, Err(SignalingError::MessageFlow(_))));
    }

    #[test]
    fn keep_alive_floor() {
        let client = client();

        client.set_keep_alive_interval(Duration::from_millis(10));
        assert_eq!(client.keep_alive_interval(), Duration::from_secs(3600));

        client.set_keep_alive_interval(Duration::from_secs(60));
        assert_eq!(client.keep_alive_interval(), Duration::from_secs(60));
    }

    #[test]
    fn source_check() {
        let client = client();

        let mut n = nonce([1u8; 16], 0);
        assert!(client.check_source(&n).is_ok());

        n.source = 0x01;
        assert!(client.check_source(&n).is_err());

        client.set_authenticated(0x01);
        assert!(client.check_source(&n).is_ok());
    }
}
