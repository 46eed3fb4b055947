use std::future::Future;

use bytes::Bytes;
use codec::CloseCode;

use crate::error::Disconnected;

/// What the signaling core needs from a WebSocket-like connection.
///
/// The host wires a real transport in behind this trait; the core never
/// touches framing, TLS or subprotocol negotiation itself. All methods
/// take `&self`: a transport is shared between the worker's activities
/// and serializes access internally.
pub trait Transport: Send + Sync + 'static {
    /// Send one binary frame.
    fn send(&self, frame: Bytes) -> impl Future<Output = Result<(), Disconnected>> + Send;

    /// Receive the next binary frame.
    fn recv(&self) -> impl Future<Output = Result<Bytes, Disconnected>> + Send;

    /// Send a transport-level ping.
    fn ping(&self) -> impl Future<Output = Result<(), Disconnected>> + Send;

    /// Resolve when the next pong arrives.
    fn pong(&self) -> impl Future<Output = ()> + Send;

    /// Close the connection with the given code.
    fn close(&self, code: CloseCode) -> impl Future<Output = ()> + Send;

    /// Whether the connection has terminated.
    fn is_closed(&self) -> bool;
}
