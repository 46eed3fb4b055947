use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Close codes emitted by the server or accepted from clients.
///
/// The 1000-range values are WebSocket-level codes, the 3000-range values
/// are defined by the signaling protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    SubprotocolError = 1002,
    PathFull = 3000,
    ProtocolError = 3001,
    InternalError = 3002,
    Handover = 3003,
    DropByInitiator = 3004,
    InitiatorCouldNotDecrypt = 3005,
    NoSharedTask = 3006,
    InvalidKey = 3007,
    Timeout = 3008,
}

impl CloseCode {
    /// Whether this code may be used as the `reason` of a
    /// `drop-responder` message. Codes the server reserves for its own
    /// conditions (such as `PathFull` or `InternalError`) may not.
    pub fn is_valid_drop_reason(self) -> bool {
        matches!(
            self,
            Self::DropByInitiator | Self::InitiatorCouldNotDecrypt | Self::NoSharedTask
        )
    }
}
