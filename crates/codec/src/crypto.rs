use crypto_box::{
    PublicKey, SalsaBox, SecretKey,
    aead::{Aead, OsRng},
};
use subtle::ConstantTimeEq;

use crate::{Error, KEY_LENGTH, NONCE_LENGTH};

/// An X25519 key pair.
///
/// Used both for the server's long-lived permanent keys and for the
/// per-connection session keys.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self {
            secret: SecretKey::from(bytes),
        }
    }

    pub fn public_key(&self) -> [u8; KEY_LENGTH] {
        *self.secret.public_key().as_bytes()
    }
}

/// An authenticated public-key encryption box.
///
/// NaCl-compatible: the sealed output is a 16-byte MAC followed by the
/// ciphertext, under an explicit 24-byte nonce.
pub struct CryptoBox(SalsaBox);

impl CryptoBox {
    pub fn new(peer_public_key: &[u8; KEY_LENGTH], pair: &KeyPair) -> Self {
        Self(SalsaBox::new(&PublicKey::from(*peer_public_key), &pair.secret))
    }

    pub fn seal(&self, nonce: &[u8; NONCE_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.0
            .encrypt(nonce.into(), plaintext)
            .map_err(|_| Error::EncryptFailed)
    }

    pub fn open(&self, nonce: &[u8; NONCE_LENGTH], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self.0
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| Error::DecryptFailed)
    }
}

/// Constant-time equality for cookies and keys.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
