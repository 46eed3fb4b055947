use rand::Rng;

use crate::{COOKIE_LENGTH, Error, NONCE_LENGTH};

/// Largest value a 48-bit combined sequence number can hold.
pub const CSN_MAX: u64 = (1 << 48) - 1;

/// The nonce preceding every framed payload.
///
/// Wire layout: `cookie[16] || source[1] || destination[1] || csn[6]`,
/// with the combined sequence number as a big-endian unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce {
    pub cookie: [u8; COOKIE_LENGTH],
    pub source: u8,
    pub destination: u8,
    pub csn: u64,
}

impl Nonce {
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < NONCE_LENGTH {
            return Err(Error::InvalidInput);
        }

        let mut csn = [0u8; 8];
        csn[2..].copy_from_slice(&bytes[18..24]);

        Ok(Self {
            cookie: bytes[..COOKIE_LENGTH].try_into()?,
            source: bytes[16],
            destination: bytes[17],
            csn: u64::from_be_bytes(csn),
        })
    }

    pub fn encode(&self) -> [u8; NONCE_LENGTH] {
        let mut bytes = [0u8; NONCE_LENGTH];
        bytes[..COOKIE_LENGTH].copy_from_slice(&self.cookie);
        bytes[16] = self.source;
        bytes[17] = self.destination;
        bytes[18..].copy_from_slice(&self.csn.to_be_bytes()[2..]);
        bytes
    }

    /// The 8 bytes following the cookie, `source || destination || csn`.
    ///
    /// This is the identifier a `send-error` message echoes back to the
    /// sender of an undeliverable frame.
    pub fn frame_id(frame: &[u8]) -> Result<[u8; 8], Error> {
        if frame.len() < NONCE_LENGTH {
            return Err(Error::InvalidInput);
        }

        Ok(frame[COOKIE_LENGTH..NONCE_LENGTH].try_into()?)
    }
}

/// A 48-bit per-direction sequence number.
///
/// Once the counter cannot advance without crossing 2^48 it transitions
/// into the terminal `Overflow` state, distinct from any numeric value.
/// No further frames may be produced or consumed in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinedSequenceNumber {
    Value(u64),
    Overflow,
}

impl CombinedSequenceNumber {
    /// Initial outgoing sequence number: random 32-bit low half, upper
    /// 16 bits zero.
    pub fn random_initial() -> Self {
        Self::Value(rand::rng().random::<u32>() as u64)
    }

    /// The next sequence number, or `Overflow` once the 48-bit space is
    /// exhausted.
    pub fn increment(self) -> Self {
        match self {
            Self::Value(value) if value < CSN_MAX => Self::Value(value + 1),
            _ => Self::Overflow,
        }
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Value(value) => Some(*value),
            Self::Overflow => None,
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow)
    }
}

/// The first sequence number received from a client must have its upper
/// 16 bits set to zero.
pub fn is_valid_initial_csn(csn: u64) -> bool {
    csn & 0xffff_0000_0000 == 0
}

/// Generate a random cookie.
pub fn random_cookie() -> [u8; COOKIE_LENGTH] {
    let mut cookie = [0u8; COOKIE_LENGTH];
    rand::rng().fill(&mut cookie);

    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_round_trip() {
        let nonce = Nonce {
            cookie: [0xab; 16],
            source: 0x01,
            destination: 0x02,
            csn: 0x0000_1234_5678_9abc,
        };

        let bytes = nonce.encode();
        assert_eq!(bytes.len(), NONCE_LENGTH);
        assert_eq!(Nonce::decode(&bytes).unwrap(), nonce);
    }

    #[test]
    fn nonce_layout() {
        let nonce = Nonce {
            cookie: [0x11; 16],
            source: 0x01,
            destination: 0xff,
            csn: 1,
        };

        let bytes = nonce.encode();
        assert_eq!(&bytes[..16], &[0x11; 16]);
        assert_eq!(bytes[16], 0x01);
        assert_eq!(bytes[17], 0xff);
        assert_eq!(&bytes[18..], &[0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn nonce_too_short() {
        assert!(Nonce::decode(&[0u8; 23]).is_err());
    }

    #[test]
    fn frame_id_is_source_destination_csn() {
        let nonce = Nonce {
            cookie: [0; 16],
            source: 0x01,
            destination: 0x02,
            csn: 3,
        };

        let mut frame = nonce.encode().to_vec();
        frame.extend_from_slice(b"payload");

        let id = Nonce::frame_id(&frame).unwrap();
        assert_eq!(id, [0x01, 0x02, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn csn_increment() {
        let csn = CombinedSequenceNumber::Value(7);
        assert_eq!(csn.increment(), CombinedSequenceNumber::Value(8));
    }

    #[test]
    fn csn_overflow_is_terminal() {
        let csn = CombinedSequenceNumber::Value(CSN_MAX);
        assert_eq!(csn.value(), Some(CSN_MAX));

        let overflowed = csn.increment();
        assert!(overflowed.is_overflow());
        assert_eq!(overflowed.value(), None);
        assert!(overflowed.increment().is_overflow());
    }

    #[test]
    fn initial_csn_upper_bits() {
        assert!(is_valid_initial_csn(0));
        assert!(is_valid_initial_csn(u32::MAX as u64));
        assert!(!is_valid_initial_csn(1 << 32));
        assert!(!is_valid_initial_csn(CSN_MAX));
    }

    #[test]
    fn random_initial_fits_32_bits() {
        for _ in 0..64 {
            let csn = CombinedSequenceNumber::random_initial();
            assert!(csn.value().unwrap() <= u32::MAX as u64);
        }
    }

    #[test]
    fn cookies_are_distinct() {
        assert_ne!(random_cookie(), random_cookie());
    }
}
