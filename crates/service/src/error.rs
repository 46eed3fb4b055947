use codec::CloseCode;

/// The transport ended, carrying the close code observed on the wire.
///
/// This is clean termination, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected(pub u16);

/// Everything that can end a signaling connection.
#[derive(Debug, Clone)]
pub enum SignalingError {
    /// Transport ended (peer or network).
    Disconnected(u16),
    /// Wrong message shape, bad cookie, bad sequence number, bad address.
    Protocol(String),
    /// Unexpected message at the current state.
    MessageFlow(String),
    /// Subprotocol downgrade detected.
    Downgrade,
    /// No free responder slot at authenticate time.
    SlotsFull,
    /// Requested server permanent key missing, or none available.
    ServerKey(String),
    /// No pong within the keep-alive timeout.
    PingTimeout,
    /// Invariant violation in the server.
    Internal(String),
}

impl SignalingError {
    /// The close code the worker emits when terminating on this error.
    ///
    /// `Disconnected` needs no close; the returned code is only
    /// meaningful for the other variants.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Disconnected(_) => CloseCode::Normal,
            Self::Protocol(_) | Self::MessageFlow(_) | Self::Downgrade => CloseCode::ProtocolError,
            Self::SlotsFull => CloseCode::PathFull,
            Self::ServerKey(_) => CloseCode::InvalidKey,
            Self::PingTimeout => CloseCode::Timeout,
            Self::Internal(_) => CloseCode::InternalError,
        }
    }
}

impl std::error::Error for SignalingError {}

impl std::fmt::Display for SignalingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected(code) => write!(f, "disconnected, close code {}", code),
            Self::Protocol(reason) => write!(f, "protocol error: {}", reason),
            Self::MessageFlow(reason) => write!(f, "message flow error: {}", reason),
            Self::Downgrade => write!(f, "subprotocol downgrade detected"),
            Self::SlotsFull => write!(f, "no free responder slot on path"),
            Self::ServerKey(reason) => write!(f, "server key error: {}", reason),
            Self::PingTimeout => write!(f, "no pong within the keep-alive timeout"),
            Self::Internal(reason) => write!(f, "internal error: {}", reason),
        }
    }
}

impl From<Disconnected> for SignalingError {
    fn from(value: Disconnected) -> Self {
        Self::Disconnected(value.0)
    }
}

impl From<codec::Error> for SignalingError {
    fn from(value: codec::Error) -> Self {
        Self::Protocol(value.to_string())
    }
}
