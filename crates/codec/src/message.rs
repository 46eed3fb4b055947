use serde::{Deserialize, Serialize};

use crate::Error;

/// A signaling message exchanged with the server.
///
/// On the wire every message is a MessagePack map keyed by `type`, plus
/// kind-specific fields. Only frames addressed to the server carry these;
/// peer-addressed frames are opaque and never reach this codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    ServerHello {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
    ClientHello {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
    ClientAuth {
        #[serde(with = "serde_bytes")]
        your_cookie: Vec<u8>,
        subprotocols: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ping_interval: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
        server_key: Option<Vec<u8>>,
    },
    ServerAuth {
        #[serde(with = "serde_bytes")]
        your_cookie: Vec<u8>,
        // Omitted when the server holds no permanent keys.
        #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
        signed_keys: Option<Vec<u8>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initiator_connected: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        responders: Option<Vec<u8>>,
    },
    NewInitiator,
    NewResponder {
        id: u8,
    },
    DropResponder {
        id: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<u16>,
    },
    SendError {
        #[serde(with = "serde_bytes")]
        id: Vec<u8>,
    },
}

impl Message {
    /// The `type` field value, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerHello { .. } => "server-hello",
            Self::ClientHello { .. } => "client-hello",
            Self::ClientAuth { .. } => "client-auth",
            Self::ServerAuth { .. } => "server-auth",
            Self::NewInitiator => "new-initiator",
            Self::NewResponder { .. } => "new-responder",
            Self::DropResponder { .. } => "drop-responder",
            Self::SendError { .. } => "send-error",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
