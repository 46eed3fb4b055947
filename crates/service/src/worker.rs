use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use codec::{
    INITIATOR_ADDRESS, KEY_LENGTH, NONCE_LENGTH, SERVER_ADDRESS,
    close_code::CloseCode,
    crypto::constant_time_eq,
    is_responder_id,
    message::Message,
    nonce::Nonce,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
    time::timeout,
};

use crate::{
    Inner, ServiceHandler,
    client::{Client, Role, Task},
    error::SignalingError,
    path::Path,
    transport::Transport,
};

/// Drive one connection from handshake to teardown.
pub(crate) async fn run<H, T>(
    inner: Arc<Inner<H, T>>,
    path: Arc<Path<T>>,
    client: Arc<Client<T>>,
    subprotocol: String,
    worker_id: u64,
) where
    H: ServiceHandler,
    T: Transport,
{
    let hex_path = hex::encode(path.key());
    log::debug!("worker started: path={}", hex_path);

    let error = match handshake(&inner, &path, &client, &subprotocol).await {
        Err(error) => error,
        Ok(role) => {
            log::info!(
                "handshake completed: path={}, role={:?}, id=0x{:02x}",
                hex_path,
                role,
                client.id()
            );

            match role {
                Role::Initiator => inner.handler.on_initiator_connected(&hex_path),
                Role::Responder => inner.handler.on_responder_connected(&hex_path),
            }

            run_activities(&inner, &path, &client, role).await
        }
    };

    let code = match &error {
        SignalingError::Disconnected(code) => {
            log::info!("connection closed: path={}, code={}", hex_path, code);
            *code
        }
        error => {
            let code = error.close_code();
            log::info!(
                "closing connection: path={}, code={}, reason={}",
                hex_path,
                u16::from(code),
                error
            );
            client.close(code).await;
            u16::from(code)
        }
    };

    // Identity-checked: a successor that replaced this client in its
    // slot is left in place.
    path.remove_client(&client);
    inner.unregister(worker_id);
    inner.paths.reap(&path);
    inner.handler.on_disconnected(Some(&hex_path), code);

    log::debug!("worker stopped: path={}", hex_path);
}

/// The three post-handshake activities. The first to finish decides the
/// outcome; the rest are cancelled.
async fn run_activities<H, T>(
    inner: &Arc<Inner<H, T>>,
    path: &Arc<Path<T>>,
    client: &Arc<Client<T>>,
    role: Role,
) -> SignalingError
where
    H: ServiceHandler,
    T: Transport,
{
    let Some(queue) = client.take_queue() else {
        return SignalingError::Internal("task queue already taken".to_string());
    };

    let mut activities = JoinSet::new();
    activities.spawn(task_loop(client.clone(), queue));
    match role {
        Role::Initiator => {
            activities.spawn(initiator_loop(inner.clone(), path.clone(), client.clone()))
        }
        Role::Responder => {
            activities.spawn(responder_loop(inner.clone(), path.clone(), client.clone()))
        }
    };
    activities.spawn(keep_alive_loop(client.clone()));

    let error = loop {
        match activities.join_next().await {
            // Only the task loop can finish cleanly (its queue drained
            // out early); the connection lives on with the remaining
            // activities.
            Some(Ok(Ok(()))) => continue,
            Some(Ok(Err(error))) => break error,
            Some(Err(_)) => break SignalingError::Internal("an activity panicked".to_string()),
            None => break SignalingError::Internal("all activities returned".to_string()),
        }
    };

    activities.abort_all();
    error
}

/// GREETING → AWAIT_CLIENT → AUTHENTICATING → AUTHENTICATED.
async fn handshake<H, T>(
    inner: &Arc<Inner<H, T>>,
    path: &Arc<Path<T>>,
    client: &Arc<Client<T>>,
    subprotocol: &str,
) -> Result<Role, SignalingError>
where
    H: ServiceHandler,
    T: Transport,
{
    client.send_server_hello().await?;

    let (nonce, frame) = next_frame(client).await?;
    check_handshake_destination(&nonce)?;
    client.validate_server_bound(&nonce)?;

    // `client-hello` is the only message a client may send unencrypted;
    // everything else after `server-hello` must be sealed.
    match Message::decode(&frame[NONCE_LENGTH..]) {
        Ok(Message::ClientHello { key }) => {
            log::debug!("received client-hello");
            client.set_role(Role::Responder);

            let key: [u8; KEY_LENGTH] = key.as_slice().try_into().map_err(|_| {
                SignalingError::Protocol("invalid client key length".to_string())
            })?;
            client.set_client_key(key);

            handshake_responder(inner, path, client, subprotocol).await?;
            Ok(Role::Responder)
        }
        Ok(Message::ClientAuth { .. }) => Err(SignalingError::Protocol(
            "'client-auth' must be encrypted".to_string(),
        )),
        Ok(message) => Err(SignalingError::MessageFlow(format!(
            "expected 'client-hello' or 'client-auth', got '{}'",
            message.kind()
        ))),
        Err(_) => {
            // Sealed payload: an initiator authenticating under the
            // path's permanent key.
            log::debug!("received sealed payload, expecting client-auth");
            client.set_role(Role::Initiator);

            let payload = client.open_session(&nonce, &frame[NONCE_LENGTH..])?;
            match Message::decode(&payload)? {
                Message::ClientAuth {
                    your_cookie,
                    subprotocols,
                    ping_interval,
                    server_key,
                } => {
                    handle_client_auth(
                        inner,
                        client,
                        subprotocol,
                        &your_cookie,
                        &subprotocols,
                        ping_interval,
                        server_key.as_deref(),
                    )?;
                    handshake_initiator(path, client).await?;
                    Ok(Role::Initiator)
                }
                message => Err(SignalingError::MessageFlow(format!(
                    "expected 'client-auth', got '{}'",
                    message.kind()
                ))),
            }
        }
    }
}

async fn handshake_initiator<T: Transport>(
    path: &Arc<Path<T>>,
    client: &Arc<Client<T>>,
) -> Result<(), SignalingError> {
    // The displaced initiator is dropped through its own task queue; its
    // worker drains the close. It must be enqueued before any
    // new-initiator fan-out.
    if let Some(previous) = path.set_initiator(client) {
        log::debug!("dropping previous initiator");
        let _ = previous.enqueue(Task::Close(CloseCode::DropByInitiator));
    }

    let responder_ids = path.responder_ids();
    for id in &responder_ids {
        if let Some(responder) = path.get_responder(*id) {
            let _ = responder.enqueue(Task::Message(Message::NewInitiator));
        }
    }

    client.send_server_auth(Some(responder_ids), None).await
}

async fn handshake_responder<H, T>(
    inner: &Arc<Inner<H, T>>,
    path: &Arc<Path<T>>,
    client: &Arc<Client<T>>,
    subprotocol: &str,
) -> Result<(), SignalingError>
where
    H: ServiceHandler,
    T: Transport,
{
    let (nonce, frame) = next_frame(client).await?;
    check_handshake_destination(&nonce)?;
    client.validate_server_bound(&nonce)?;

    let payload = client.open_session(&nonce, &frame[NONCE_LENGTH..])?;
    match Message::decode(&payload)? {
        Message::ClientAuth {
            your_cookie,
            subprotocols,
            ping_interval,
            server_key,
        } => handle_client_auth(
            inner,
            client,
            subprotocol,
            &your_cookie,
            &subprotocols,
            ping_interval,
            server_key.as_deref(),
        )?,
        message => {
            return Err(SignalingError::MessageFlow(format!(
                "expected 'client-auth', got '{}'",
                message.kind()
            )));
        }
    }

    let id = path.add_responder(client)?;
    log::debug!("added responder: id=0x{:02x}", id);

    let initiator = path.get_initiator();
    let initiator_connected = initiator.is_some();
    if let Some(initiator) = initiator {
        let _ = initiator.enqueue(Task::Message(Message::NewResponder { id }));
    }

    client.send_server_auth(None, Some(initiator_connected)).await
}

fn handle_client_auth<H, T>(
    inner: &Inner<H, T>,
    client: &Client<T>,
    negotiated: &str,
    your_cookie: &[u8],
    subprotocols: &[String],
    ping_interval: Option<u32>,
    server_key: Option<&[u8]>,
) -> Result<(), SignalingError>
where
    H: ServiceHandler,
    T: Transport,
{
    let cookie_out = client.cookie_out().ok_or_else(|| {
        SignalingError::Internal("server cookie not generated before client-auth".to_string())
    })?;
    if !constant_time_eq(your_cookie, &cookie_out) {
        return Err(SignalingError::Protocol("cookies do not match".to_string()));
    }

    // Downgrade detection: the subprotocol negotiated at the transport
    // level must still be the best common choice given the client's full
    // list.
    if select_subprotocol(subprotocols, &inner.subprotocols).as_deref() != Some(negotiated) {
        return Err(SignalingError::Downgrade);
    }

    if let Some(interval) = ping_interval {
        client.set_keep_alive_interval(Duration::from_secs(interval as u64));
    }

    match server_key {
        Some(requested) => {
            if inner.keys.is_empty() {
                return Err(SignalingError::ServerKey(
                    "server does not have a permanent key".to_string(),
                ));
            }

            let key = inner
                .keys
                .iter()
                .find(|key| constant_time_eq(&key.public_key(), requested))
                .ok_or_else(|| {
                    SignalingError::ServerKey(
                        "server does not have the requested permanent key".to_string(),
                    )
                })?;
            client.set_server_permanent_key(key.clone());
        }
        None => {
            // Default to the primary permanent key.
            if let Some(primary) = inner.keys.first() {
                client.set_server_permanent_key(primary.clone());
            }
        }
    }

    Ok(())
}

/// Pick the first entry of the server's preference order that the client
/// also offers. The transport-level negotiation applies the same rule,
/// so a disagreement with the negotiated subprotocol means the client's
/// claimed list would have led to a different (downgraded) choice.
fn select_subprotocol(client: &[String], server: &[String]) -> Option<String> {
    server
        .iter()
        .find(|ours| client.iter().any(|theirs| theirs == *ours))
        .cloned()
}

/// Drain the client's task queue, one task at a time. This is the only
/// post-handshake path to the transport's write side.
async fn task_loop<T: Transport>(
    client: Arc<Client<T>>,
    mut queue: mpsc::UnboundedReceiver<Task>,
) -> Result<(), SignalingError> {
    while let Some(task) = queue.recv().await {
        match task {
            Task::Message(message) => client.send_signaling(&message).await?,
            Task::Relay(frame, done) => {
                let outcome = client.relay(frame).await.map_err(SignalingError::from);
                let _ = done.send(outcome.clone());
                outcome?;
            }
            Task::Close(code) => client.close(code).await,
        }
    }

    Ok(())
}

/// Read a frame and check its claimed source address.
async fn next_frame<T: Transport>(client: &Client<T>) -> Result<(Nonce, Bytes), SignalingError> {
    let frame = client.recv_frame().await?;
    if frame.len() < NONCE_LENGTH + 1 {
        return Err(SignalingError::Protocol("frame too short".to_string()));
    }

    let nonce = Nonce::decode(&frame)?;
    client.check_source(&nonce)?;

    Ok((nonce, frame))
}

fn check_handshake_destination(nonce: &Nonce) -> Result<(), SignalingError> {
    if nonce.destination != SERVER_ADDRESS {
        return Err(SignalingError::Protocol(
            "handshake frames must be addressed to the server".to_string(),
        ));
    }

    Ok(())
}

async fn initiator_loop<H, T>(
    inner: Arc<Inner<H, T>>,
    path: Arc<Path<T>>,
    client: Arc<Client<T>>,
) -> Result<(), SignalingError>
where
    H: ServiceHandler,
    T: Transport,
{
    loop {
        let (nonce, frame) = next_frame(&client).await?;

        if nonce.destination == SERVER_ADDRESS {
            client.validate_server_bound(&nonce)?;
            let payload = client.open_session(&nonce, &frame[NONCE_LENGTH..])?;

            match Message::decode(&payload)? {
                Message::DropResponder { id, reason } => drop_responder(&path, id, reason)?,
                message => {
                    return Err(SignalingError::MessageFlow(format!(
                        "expected relay message or 'drop-responder', got '{}'",
                        message.kind()
                    )));
                }
            }
        } else if is_responder_id(nonce.destination) {
            // Relay sequence numbers are peer-owned; no inspection here.
            let destination = path.get_responder(nonce.destination);
            relay_frame(&inner, &client, destination, nonce.destination, frame).await?;
        } else {
            return Err(SignalingError::Protocol(
                "initiators may only relay to responder slots".to_string(),
            ));
        }
    }
}

async fn responder_loop<H, T>(
    inner: Arc<Inner<H, T>>,
    path: Arc<Path<T>>,
    client: Arc<Client<T>>,
) -> Result<(), SignalingError>
where
    H: ServiceHandler,
    T: Transport,
{
    loop {
        let (nonce, frame) = next_frame(&client).await?;

        if nonce.destination == SERVER_ADDRESS {
            client.validate_server_bound(&nonce)?;
            let payload = client.open_session(&nonce, &frame[NONCE_LENGTH..])?;
            let message = Message::decode(&payload)?;

            return Err(SignalingError::MessageFlow(format!(
                "expected relay message, got '{}'",
                message.kind()
            )));
        } else if nonce.destination == INITIATOR_ADDRESS {
            let destination = path.get_initiator();
            relay_frame(&inner, &client, destination, nonce.destination, frame).await?;
        } else {
            return Err(SignalingError::Protocol(
                "responders may only relay to the initiator".to_string(),
            ));
        }
    }
}

fn drop_responder<T: Transport>(
    path: &Path<T>,
    id: u8,
    reason: Option<u16>,
) -> Result<(), SignalingError> {
    if !is_responder_id(id) {
        return Err(SignalingError::Protocol(format!(
            "invalid responder identifier 0x{:02x}",
            id
        )));
    }

    let reason = match reason {
        None => CloseCode::DropByInitiator,
        Some(code) => match CloseCode::try_from(code) {
            Ok(code) if code.is_valid_drop_reason() => code,
            _ => {
                return Err(SignalingError::Protocol(format!(
                    "close code {} is not a valid drop reason",
                    code
                )));
            }
        },
    };

    match path.get_responder(id) {
        Some(responder) => {
            log::debug!("dropping responder: id=0x{:02x}, reason={}", id, u16::from(reason));
            let _ = responder.enqueue(Task::Close(reason));
        }
        None => log::debug!("responder 0x{:02x} already gone, nothing to do", id),
    }

    Ok(())
}

/// Hand an opaque frame to the destination's task queue and wait for the
/// outcome. A missing destination, a dead queue, a send failure or a
/// timeout all collapse into one `send-error` back to the relayer.
async fn relay_frame<H, T>(
    inner: &Inner<H, T>,
    source: &Arc<Client<T>>,
    destination: Option<Arc<Client<T>>>,
    destination_id: u8,
    frame: Bytes,
) -> Result<(), SignalingError>
where
    H: ServiceHandler,
    T: Transport,
{
    let frame_id = Nonce::frame_id(&frame)?;

    let delivered = match destination {
        None => {
            log::debug!(
                "cannot relay message, no connection for destination 0x{:02x}",
                destination_id
            );
            false
        }
        Some(destination) => {
            let (done_tx, done_rx) = oneshot::channel();
            if destination.enqueue(Task::Relay(frame, done_tx)) {
                matches!(
                    timeout(inner.relay_timeout, done_rx).await,
                    Ok(Ok(Ok(())))
                )
            } else {
                false
            }
        }
    };

    if !delivered {
        log::debug!("relaying to 0x{:02x} failed, enqueuing send-error", destination_id);
        let _ = source.enqueue(Task::Message(Message::SendError {
            id: frame_id.to_vec(),
        }));
    }

    Ok(())
}

async fn keep_alive_loop<T: Transport>(client: Arc<Client<T>>) -> Result<(), SignalingError> {
    loop {
        tokio::time::sleep(client.keep_alive_interval()).await;

        log::trace!("ping");
        client.ping().await?;
        if timeout(client.keep_alive_timeout(), client.pong()).await.is_err() {
            return Err(SignalingError::PingTimeout);
        }
        log::trace!("pong");
    }
}
