//! ## SaltyRTC signaling wire layer
//!
//! [SaltyRTC]: https://github.com/saltyrtc/saltyrtc-meta
//!
//! SaltyRTC is an end-to-end encrypted signalling protocol. Two kinds of
//! peers meet on a shared path: a single initiator and up to 253
//! responders. The server authenticates each peer to itself via
//! authenticated public-key encryption, assigns it a per-path address and
//! relays opaque peer-to-peer messages between the slots.
//!
//! Every frame on the wire is a 24-byte nonce followed by a payload.
//! Frames addressed to the server (destination `0x00`) carry MessagePack
//! maps, sealed in an authenticated box after the initial `server-hello`.
//! Frames addressed to a peer slot are opaque to the server and are
//! relayed verbatim.

pub mod close_code;
pub mod crypto;
pub mod message;
pub mod nonce;

use std::array::TryFromSliceError;

pub use self::close_code::CloseCode;

/// Length of a permanent or session public key.
pub const KEY_LENGTH: usize = 32;

/// Length of the per-direction cookie carried in the nonce.
pub const COOKIE_LENGTH: usize = 16;

/// Length of the nonce preceding every payload.
pub const NONCE_LENGTH: usize = 24;

/// Length of the sealed `signed_keys` field: 16-byte MAC plus two keys.
pub const SIGNED_KEYS_LENGTH: usize = 80;

/// The server's own address.
pub const SERVER_ADDRESS: u8 = 0x00;

/// The initiator slot address.
pub const INITIATOR_ADDRESS: u8 = 0x01;

pub fn is_initiator_id(id: u8) -> bool {
    id == INITIATOR_ADDRESS
}

pub fn is_responder_id(id: u8) -> bool {
    id >= 0x02
}

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    UnknownMessage,
    EncryptFailed,
    DecryptFailed,
    EncodeFailed(rmp_serde::encode::Error),
    DecodeFailed(rmp_serde::decode::Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(value: rmp_serde::encode::Error) -> Self {
        Self::EncodeFailed(value)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self::DecodeFailed(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
